use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::dataset_api::DatasetApi;
use crate::error::{CacheError, HandlerError};
use crate::metrics_consts::{
    CACHE_HITS, CACHE_MISSES, EVENTS_ALREADY_RECORDED, INSTANCES_FAILED, INSTANCE_EVENTS_ADDED,
};
use crate::model::{Event, ReportEvent, State, EVENT_TYPE_ERROR, STATE_FAILED};

/// Handles a decoded report event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &ReportEvent) -> Result<(), HandlerError>;
}

/// Records report events against their dataset instance, at most once per
/// (instance, event type, service) within the cache expiry window.
pub struct Handler {
    dataset_api: Arc<dyn DatasetApi>,
    cache: Arc<dyn Cache>,
    expire_seconds: u64,
}

impl Handler {
    pub fn new(
        dataset_api: Arc<dyn DatasetApi>,
        cache: Arc<dyn Cache>,
        expire_seconds: u64,
    ) -> Self {
        Self {
            dataset_api,
            cache,
            expire_seconds,
        }
    }

    /// Resets the expiry of an entry that is already cached.
    fn touch(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        self.cache.del(key);
        self.cache.set(key, value, self.expire_seconds)
    }

    /// Brings the remote instance in line with `event`. Nothing is cached here,
    /// so a failure leaves the event to be reconciled again on redelivery.
    async fn reconcile(&self, event: &ReportEvent) -> Result<(), HandlerError> {
        let instance = self
            .dataset_api
            .get_instance(&event.instance_id)
            .await
            .map_err(HandlerError::GetInstance)?;

        let new_event = Event::from_report(event, Utc::now());

        if instance.contains_event(&new_event) {
            info!(
                instance_id = %event.instance_id,
                event_type = %event.event_type,
                "report event already recorded against instance, skipping update"
            );
            metrics::counter!(EVENTS_ALREADY_RECORDED).increment(1);
            return Ok(());
        }

        info!(
            instance_id = %event.instance_id,
            event_type = %event.event_type,
            "adding report event to instance"
        );
        self.dataset_api
            .add_event_to_instance(&event.instance_id, &new_event)
            .await
            .map_err(HandlerError::AddEventToInstance)?;
        metrics::counter!(INSTANCE_EVENTS_ADDED).increment(1);

        // failed is terminal, it is never set back
        if event.event_type == EVENT_TYPE_ERROR && instance.state != STATE_FAILED {
            info!(
                instance_id = %event.instance_id,
                previous_state = %instance.state,
                "updating instance state to failed"
            );
            self.dataset_api
                .update_instance_status(&event.instance_id, &State::failed())
                .await
                .map_err(HandlerError::UpdateInstanceStatus)?;
            metrics::counter!(INSTANCES_FAILED).increment(1);
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn handle_event(&self, event: &ReportEvent) -> Result<(), HandlerError> {
        info!(
            instance_id = %event.instance_id,
            event_type = %event.event_type,
            service_name = %event.service_name,
            "handling report event"
        );

        let (key, value) = event.generate_cache_key_and_value()?;

        match self.cache.get(&key) {
            Ok(_) => {
                info!(
                    instance_id = %event.instance_id,
                    "report event found in cache, refreshing cache expiry"
                );
                metrics::counter!(CACHE_HITS).increment(1);
                self.touch(&key, &value)?;
                return Ok(());
            }
            Err(CacheError::NotFound) => {}
            Err(e) => warn!("cache lookup failed, treating as a miss: {}", e),
        }

        info!(
            instance_id = %event.instance_id,
            "report event not in cache, retrieving instance from dataset api"
        );
        metrics::counter!(CACHE_MISSES).increment(1);

        self.reconcile(event).await?;

        self.cache.set(&key, &value, self.expire_seconds)?;
        Ok(())
    }
}
