use std::future::Future;
use std::time::Duration;

use suggest_core::error::{Result, SuggestError};

/// Run one remote call under a deadline. Expiry is an ordinary failure;
/// nothing is retried.
pub async fn with_deadline<T, F>(operation: &'static str, after: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, ?after, "remote call timed out");
            Err(SuggestError::Timeout { operation, after })
        }
    }
}
