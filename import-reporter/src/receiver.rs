use std::sync::Arc;

use apache_avro::{from_avro_datum, from_value, Schema};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::avro_schema::REPORT_EVENT_SCHEMA;
use crate::error::ReceiverError;
use crate::handler::EventHandler;
use crate::metrics_consts::DECODE_FAILED;
use crate::model::ReportEvent;

/// Processes the payload of one inbound message.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process_message(&self, payload: &[u8]) -> Result<(), ReceiverError>;
}

/// Decodes avro report events from message payloads and hands them to an event handler.
pub struct Receiver {
    handler: Arc<dyn EventHandler>,
    schema: Schema,
}

impl Receiver {
    pub fn new(handler: Arc<dyn EventHandler>) -> Result<Self, ReceiverError> {
        let schema = Schema::parse_str(REPORT_EVENT_SCHEMA).map_err(ReceiverError::Schema)?;
        Ok(Self { handler, schema })
    }

    fn decode(&self, mut payload: &[u8]) -> Result<ReportEvent, ReceiverError> {
        let value =
            from_avro_datum(&self.schema, &mut payload, None).map_err(ReceiverError::Decode)?;
        from_value(&value).map_err(ReceiverError::Decode)
    }
}

#[async_trait]
impl MessageProcessor for Receiver {
    async fn process_message(&self, payload: &[u8]) -> Result<(), ReceiverError> {
        debug!(size = payload.len(), "decoding report event");
        let event = self.decode(payload).inspect_err(|_| {
            metrics::counter!(DECODE_FAILED).increment(1);
        })?;

        self.handler.handle_event(&event).await?;

        info!(instance_id = %event.instance_id, "report event handled successfully");
        Ok(())
    }
}
