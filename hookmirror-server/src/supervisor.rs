//! Per-request fault isolation.

use std::any::Any;
use std::future::Future;

use tracing::{error, Instrument};

use crate::error::TaskFault;
use crate::github::CorrelationId;

/// Run `work` on its own task and wait for it.
///
/// The task inherits the caller's span and delivery correlation ID, and keeps
/// running if the caller is dropped (e.g. the client disconnects). A panic inside `work` is logged and returned as a
/// [`TaskFault`] instead of unwinding into the caller.
pub async fn supervise<F, T, E>(description: impl Into<String>, work: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<TaskFault> + Send + 'static,
{
    let description = description.into();
    let work = work.in_current_span();
    let handle = match CorrelationId::current() {
        Some(id) => tokio::spawn(id.scope(work)),
        None => tokio::spawn(work),
    };
    match handle.await {
        Ok(result) => result,
        Err(join_error) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                "task was cancelled".to_string()
            };
            error!("Handling {} failed unexpectedly: {}", description, message);
            Err(TaskFault {
                description,
                message,
            }
            .into())
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
