//! External call abstractions
//!
//! A call is one attempt at the caller-supplied operation for a work item. Calls:
//! - Receive an [`AttemptContext`] carrying the item payload and attempt metadata
//! - Fail with a [`CallError`] that the retry classifier inspects
//! - Can observe run cancellation to finish early

mod context;
mod error;

pub use context::AttemptContext;
pub use error::{CallError, CallResult};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased operation invoked once per attempt
pub type CallHandler<T, R> = Arc<
    dyn Fn(AttemptContext<T>) -> Pin<Box<dyn Future<Output = CallResult<R>> + Send>>
        + Send
        + Sync,
>;

/// Box a caller-supplied operation into a [`CallHandler`]
pub(crate) fn into_handler<T, R, F, Fut>(operation: F) -> CallHandler<T, R>
where
    F: Fn(AttemptContext<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult<R>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(operation(ctx)))
}
