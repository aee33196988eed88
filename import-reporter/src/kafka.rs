use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Message};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::consumer::{InboundMessage, Transport};
use crate::error::TransportError;
use crate::metrics_consts::TRANSPORT_RECV_ERRORS;

/// Single topic consumer group member. Offsets are stored as messages are
/// committed and flushed by the client's periodic auto commit.
pub struct KafkaTransport {
    inner: Arc<Inner>,
    stopped: CancellationToken,
    closed: AtomicBool,
    errors_tx: mpsc::UnboundedSender<TransportError>,
    errors_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportError>>>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaTransport {
    pub fn new(config: &KafkaConfig) -> Result<Self, TransportError> {
        let consumer: StreamConsumer = ClientConfig::from(config).create()?;
        consumer.subscribe(&[config.kafka_consumer_topic.as_str()])?;

        info!(
            topic = config.kafka_consumer_topic.as_str(),
            group = config.kafka_consumer_group.as_str(),
            "subscribed to kafka topic"
        );

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Arc::new(Inner {
                consumer,
                topic: config.kafka_consumer_topic.as_str().to_owned(),
            }),
            stopped: CancellationToken::new(),
            closed: AtomicBool::new(false),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        })
    }

    /// Receive errors, each forwarded as it happens. Can only be taken once.
    pub fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<TransportError>> {
        self.errors_rx.lock().ok()?.take()
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    type Message = KafkaMessage;

    async fn incoming(&self) -> Option<KafkaMessage> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.stopped.cancelled() => return None,
                received = self.inner.consumer.recv() => received,
            };

            match received {
                Ok(message) => {
                    return Some(KafkaMessage {
                        payload: message.payload().unwrap_or_default().to_vec(),
                        partition: message.partition(),
                        offset: message.offset(),
                        handle: Arc::downgrade(&self.inner),
                    })
                }
                Err(e) => {
                    metrics::counter!(TRANSPORT_RECV_ERRORS).increment(1);
                    error!(topic = %self.inner.topic, "error receiving kafka message: {}", e);
                    if self.errors_tx.send(TransportError::Kafka(e)).is_err() {
                        debug!("nobody is listening for transport errors");
                    }
                }
            }
        }
    }

    async fn stop_listening(&self) {
        info!(topic = %self.inner.topic, "kafka transport stopped listening");
        self.stopped.cancel();
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stopped.cancel();

        match self.inner.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => {}
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {
                debug!("no stored offsets to commit on close")
            }
            Err(e) => warn!("failed to commit stored offsets on close: {}", e),
        }
        self.inner.consumer.unsubscribe();

        info!(topic = %self.inner.topic, "kafka transport closed");
        Ok(())
    }
}

pub struct KafkaMessage {
    payload: Vec<u8>,
    partition: i32,
    offset: i64,
    handle: Weak<Inner>,
}

impl InboundMessage for KafkaMessage {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn offset(&self) -> i64 {
        self.offset
    }

    fn commit(self) -> Result<(), TransportError> {
        let inner = self.handle.upgrade().ok_or(TransportError::Gone)?;
        // The stored offset is the next one to read
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset + 1)?;
        debug!(
            partition = self.partition,
            offset = self.offset,
            "stored message offset"
        );
        Ok(())
    }
}
