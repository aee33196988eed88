use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::metrics_consts::{
    MESSAGES_COMMITTED, MESSAGES_RECEIVED, MESSAGE_COMMIT_FAILED, MESSAGE_PROCESSING_FAILED,
    MESSAGE_PROCESSING_TIME,
};
use crate::receiver::MessageProcessor;

const MIN_LIVENESS_INTERVAL: Duration = Duration::from_millis(1);

/// A message delivered by a transport.
pub trait InboundMessage: Send + Sync + 'static {
    fn payload(&self) -> &[u8];
    fn offset(&self) -> i64;
    /// Marks the message as consumed, releasing it back to the transport.
    fn commit(self) -> Result<(), TransportError>;
}

/// The message source the consumer listens to.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Message: InboundMessage;

    /// Waits for the next inbound message. Returns None once the transport has
    /// stopped delivering. Must be cancel safe, the dispatch loop races it against
    /// shutdown and liveness ticks.
    async fn incoming(&self) -> Option<Self::Message>;

    /// Stops delivering new messages.
    async fn stop_listening(&self);

    /// Releases the transport. Messages committed after this may be redelivered.
    async fn close(&self) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Listening,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The dispatch loop exited before the deadline
    Graceful,
    /// The deadline passed first, the dispatch loop was aborted
    Forced,
}

/// Consumes messages from a transport one at a time and passes each payload to
/// a message processor. Every message is committed once processed, whether or
/// not processing succeeded.
pub struct Consumer<T: Transport> {
    transport: Arc<T>,
    processor: Arc<dyn MessageProcessor>,
    liveness: HealthHandle,
    liveness_interval: Duration,
    shutdown_timeout: Duration,
    cancel: CancellationToken,
    dispatch_task: Option<JoinHandle<()>>,
    state: ConsumerState,
}

impl<T: Transport> Consumer<T> {
    pub fn new(
        transport: Arc<T>,
        processor: Arc<dyn MessageProcessor>,
        liveness: HealthHandle,
        liveness_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            processor,
            liveness,
            // tokio intervals panic on a zero period
            liveness_interval: liveness_interval.max(MIN_LIVENESS_INTERVAL),
            shutdown_timeout,
            cancel: CancellationToken::new(),
            dispatch_task: None,
            state: ConsumerState::Idle,
        }
    }

    /// A listening consumer whose loop has exited on its own, because the transport
    /// stopped delivering, reports `Closed`.
    pub fn state(&self) -> ConsumerState {
        match (&self.state, &self.dispatch_task) {
            (ConsumerState::Listening, Some(task)) if task.is_finished() => ConsumerState::Closed,
            (state, _) => *state,
        }
    }

    /// Spawns the dispatch loop. Has no effect unless the consumer is idle.
    pub fn listen(&mut self) {
        if self.state != ConsumerState::Idle {
            warn!(state = ?self.state, "consumer is not idle, ignoring listen");
            return;
        }

        info!("starting report event consumer loop");
        self.dispatch_task = Some(tokio::spawn(dispatch_loop(
            self.transport.clone(),
            self.processor.clone(),
            self.cancel.clone(),
            self.liveness.clone(),
            self.liveness_interval,
        )));
        self.state = ConsumerState::Listening;
    }

    /// Stops delivery, cancels the dispatch loop and closes the transport, then
    /// waits for the loop to exit. Returns once the loop has exited or the timeout
    /// has elapsed, whichever comes first. Without a timeout the configured
    /// shutdown timeout applies.
    pub async fn close(&mut self, timeout: Option<Duration>) -> ShutdownOutcome {
        if self.state == ConsumerState::Closed {
            return ShutdownOutcome::Graceful;
        }
        self.state = ConsumerState::Closing;

        let deadline = Instant::now() + timeout.unwrap_or(self.shutdown_timeout);
        let mut outcome = ShutdownOutcome::Graceful;

        if timeout_at(deadline, self.transport.stop_listening())
            .await
            .is_err()
        {
            warn!("timed out asking the transport to stop listening");
            outcome = ShutdownOutcome::Forced;
        }

        self.cancel.cancel();

        match timeout_at(deadline, self.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("failed to close transport: {:#}", eyre::Report::new(e)),
            Err(_) => {
                warn!("timed out closing the transport");
                outcome = ShutdownOutcome::Forced;
            }
        }

        if let Some(mut task) = self.dispatch_task.take() {
            match timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("consumer loop task failed: {}", e),
                Err(_) => {
                    task.abort();
                    outcome = ShutdownOutcome::Forced;
                }
            }
        }

        match outcome {
            ShutdownOutcome::Graceful => info!("gracefully shutdown consumer loop"),
            ShutdownOutcome::Forced => warn!("forced shutdown of consumer loop"),
        }
        self.state = ConsumerState::Closed;
        outcome
    }
}

async fn dispatch_loop<T: Transport>(
    transport: Arc<T>,
    processor: Arc<dyn MessageProcessor>,
    cancel: CancellationToken,
    liveness: HealthHandle,
    liveness_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval(liveness_interval);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("attempting to close down consumer loop");
                break;
            }

            _ = heartbeat.tick() => liveness.report_healthy(),

            message = transport.incoming() => {
                let Some(message) = message else {
                    warn!("transport stopped delivering messages, exiting consumer loop");
                    break;
                };
                dispatch(processor.as_ref(), message).await;
                liveness.report_healthy();
            }
        }
    }
}

async fn dispatch<M: InboundMessage>(processor: &dyn MessageProcessor, message: M) {
    let offset = message.offset();
    debug!(offset, "incoming received a message");
    metrics::counter!(MESSAGES_RECEIVED).increment(1);

    let started = Instant::now();
    let result = processor.process_message(message.payload()).await;
    metrics::histogram!(MESSAGE_PROCESSING_TIME).record(started.elapsed().as_secs_f64());

    if let Err(e) = result {
        metrics::counter!(MESSAGE_PROCESSING_FAILED).increment(1);
        error!(
            offset,
            "failed to process message, committing it anyway: {:#}",
            eyre::Report::new(e)
        );
    }

    match message.commit() {
        Ok(()) => metrics::counter!(MESSAGES_COMMITTED).increment(1),
        Err(e) => {
            metrics::counter!(MESSAGE_COMMIT_FAILED).increment(1);
            error!(offset, "failed to commit message: {:#}", eyre::Report::new(e));
        }
    }
}
