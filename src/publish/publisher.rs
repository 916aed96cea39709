//! Queue publisher over the broker's HTTP API.
//!
//! Publishes to the default exchange with the queue name as routing key,
//! the same addressing a direct AMQP `basic.publish("", queue)` uses.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::publish::event::ChangeEvent;
use crate::resilience::Operation;

/// Persistent delivery.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

const CONTENT_TYPE_JSON: &str = "application/json";

/// Errors from a single publish attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("broker rejected publish with status {status}")]
    Rejected { status: u16 },

    #[error("message was not routed to queue {queue}")]
    NotRouted { queue: String },
}

#[derive(Debug, Serialize)]
struct MessageProperties {
    delivery_mode: u8,
    content_type: &'static str,
    message_id: String,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    properties: MessageProperties,
    routing_key: &'a str,
    payload: String,
    payload_encoding: &'static str,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    routed: bool,
}

/// Publishes change events to one queue.
#[derive(Debug, Clone)]
pub struct QueuePublisher {
    client: reqwest::Client,
    publish_url: Url,
    queue: String,
    username: String,
    password: String,
}

impl QueuePublisher {
    /// Build a publisher; every request is bounded by `request_timeout_secs`.
    pub fn new(config: &QueueConfig) -> Result<Self, PublishError> {
        let publish_url = publish_url(&config.url, &config.vhost)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            publish_url,
            queue: config.queue.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn publish_url(&self) -> &Url {
        &self.publish_url
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    fn request<'a>(&'a self, event: &ChangeEvent) -> Result<PublishRequest<'a>, PublishError> {
        Ok(PublishRequest {
            properties: MessageProperties {
                delivery_mode: DELIVERY_MODE_PERSISTENT,
                content_type: CONTENT_TYPE_JSON,
                message_id: Uuid::new_v4().to_string(),
            },
            routing_key: &self.queue,
            payload: event.to_payload()?,
            payload_encoding: "string",
        })
    }

    /// Publish one event. Not retried.
    pub async fn publish(&self, event: &ChangeEvent) -> Result<(), PublishError> {
        let body = self.request(event)?;

        let response = self
            .client
            .post(self.publish_url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected {
                status: status.as_u16(),
            });
        }

        let outcome: PublishResponse = response.json().await?;
        if !outcome.routed {
            return Err(PublishError::NotRouted {
                queue: self.queue.clone(),
            });
        }

        tracing::debug!(
            queue = %self.queue,
            message_id = %body.properties.message_id,
            "Event published"
        );
        Ok(())
    }
}

impl Operation<ChangeEvent> for QueuePublisher {
    type Output = ();
    type Error = PublishError;

    async fn call(&self, event: ChangeEvent) -> Result<(), PublishError> {
        self.publish(&event).await
    }
}

/// `{base}/api/exchanges/{vhost}/amq.default/publish`, vhost percent-encoded.
fn publish_url(base: &str, vhost: &str) -> Result<Url, PublishError> {
    let mut url = Url::parse(base).map_err(|e| PublishError::InvalidEndpoint(format!("{}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| PublishError::InvalidEndpoint(base.to_string()))?
        .pop_if_empty()
        .extend(["api", "exchanges", vhost, "amq.default", "publish"]);
    Ok(url)
}
