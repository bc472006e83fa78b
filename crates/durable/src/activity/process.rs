//! Local request-processing activity

use async_trait::async_trait;
use tracing::{info, warn};

use super::{ActivityContext, ActivityError, ActivityExecutor};
use crate::workflow::RequestEnvelope;

/// Activity type of [`ProcessRequestActivity`]
pub const PROCESS_REQUEST: &str = "process_request";

/// Inspects an admitted [`RequestEnvelope`] and acknowledges it
///
/// Expects the serialized envelope as input (the first step of a pipeline
/// receives it). A caller-flagged `payloadError` is a permanent failure:
/// retrying cannot repair a payload the caller already marked malformed.
#[derive(Debug, Clone, Default)]
pub struct ProcessRequestActivity;

impl ProcessRequestActivity {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActivityExecutor for ProcessRequestActivity {
    fn activity_type(&self) -> &str {
        PROCESS_REQUEST
    }

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        let envelope: RequestEnvelope = serde_json::from_value(input).map_err(|e| {
            ActivityError::permanent(format!("malformed request envelope: {}", e))
                .with_type("MALFORMED_ENVELOPE")
        })?;

        let identifier = &ctx.identifier;
        info!(%identifier, attempt = ctx.attempt, "processing request");

        if envelope.payload.is_some() {
            info!(%identifier, "processing payload");
        }

        if envelope.feedback.is_some() {
            info!(%identifier, "processing feedback");
        }

        if let Some(transaction_id) = &envelope.transaction_id {
            info!(%identifier, %transaction_id, "processing transaction");
        }

        if let Some(payload_error) = &envelope.payload_error {
            warn!(%identifier, %payload_error, "payload flagged as malformed by caller");
            return Err(
                ActivityError::permanent(format!("payload error: {}", payload_error))
                    .with_type("PAYLOAD_ERROR"),
            );
        }

        Ok(serde_json::json!({
            "identifier": identifier.as_str(),
            "transactionId": envelope.transaction_id,
            "message": format!("Request {} processed successfully", identifier),
        }))
    }
}
