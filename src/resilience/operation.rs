//! The protected call a breaker wraps.
//!
//! A breaker is content-agnostic: it forwards an opaque message to its
//! operation and only looks at whether the result is `Ok` or `Err`.

use std::future::Future;

/// A fallible call taking a message of type `M`.
pub trait Operation<M>: Send + Sync {
    /// Value produced on success.
    type Output;
    /// Failure passed back to the caller unmodified.
    type Error;

    /// Run the operation once.
    fn call(&self, message: M) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

/// Adapter turning an async closure into an [`Operation`].
///
/// Created with [`operation_fn`].
#[derive(Debug, Clone, Copy)]
pub struct OperationFn<F> {
    f: F,
}

/// Wrap a closure returning a future as an [`Operation`].
pub fn operation_fn<F>(f: F) -> OperationFn<F> {
    OperationFn { f }
}

impl<M, F, Fut, T, E> Operation<M> for OperationFn<F>
where
    F: Fn(M) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
{
    type Output = T;
    type Error = E;

    fn call(&self, message: M) -> impl Future<Output = Result<T, E>> + Send {
        (self.f)(message)
    }
}
