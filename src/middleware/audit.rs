use std::sync::Arc;

use crate::models::audit::RequestLog;
use crate::store::LogSink;

/// Async request-log writer. Fires off a Tokio task to append the record
/// without blocking the response path. A failed write never reaches the
/// caller.
pub fn log_async(sink: Arc<dyn LogSink>, record: RequestLog) {
    // Drop guards can fire after the runtime is gone
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(request_id = %record.request_id, "no runtime, request log dropped");
        return;
    };
    handle.spawn(async move {
        if let Err(e) = sink.append(&record).await {
            tracing::warn!(request_id = %record.request_id, "failed to write request log: {}", e);
        } else {
            tracing::debug!(request_id = %record.request_id, status = record.status.as_str(), "request log recorded");
        }
    });
}
