//! Replay-once-after-refresh policy

use std::sync::Arc;

use common::Secret;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::refresh::RefreshCoordinator;
use crate::request::{ApiResponse, RequestDescriptor};

/// Handle a 401 (`original`) for a request that was sent with `rejected`.
///
/// Refreshes through the coordinator, then replays the request exactly once
/// with the new access token. The replay is never retried again: a second
/// 401 hands back `original`, any other replay failure is returned as is.
/// If the refresh fails the caller gets `original`.
pub(crate) async fn replay_after_refresh(
    executor: &Executor,
    coordinator: &Arc<RefreshCoordinator>,
    descriptor: &RequestDescriptor,
    rejected: Option<&Secret<String>>,
    original: Error,
) -> Result<ApiResponse<Value>> {
    let session = match coordinator.refresh(rejected).await {
        Ok(session) => session,
        Err(e) => {
            debug!(error = %e, "refresh failed, returning original 401");
            return Err(original);
        }
    };

    match executor
        .attempt(descriptor, Some(&session.access_token))
        .await
    {
        Err(replayed) if replayed.is_unauthorized() => {
            warn!(
                endpoint = descriptor.endpoint(),
                "request still unauthorized after refresh"
            );
            Err(original)
        }
        other => other,
    }
}
