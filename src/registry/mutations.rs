use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::info;

use crate::engine::{EngineError, StoreError};
use crate::limits::*;
use crate::model::*;

use super::{append_event, Registry, WalCommand};

impl Registry {
    /// Register a doctor with an empty day. Ids are unique per registry.
    pub async fn create_resource(
        &self,
        id: &str,
        category: &str,
        capacity: u32,
    ) -> Result<Resource, EngineError> {
        let id = id.trim();
        let category = category.trim();
        if id.is_empty() {
            return Err(EngineError::InvalidResource("doctor id is required"));
        }
        if category.is_empty() {
            return Err(EngineError::InvalidResource("specialization is required"));
        }
        if capacity < 1 {
            return Err(EngineError::InvalidResource(
                "max daily patients must be at least 1",
            ));
        }
        if id.len() > MAX_ID_LEN {
            return Err(EngineError::LimitExceeded("doctor id too long"));
        }
        if category.len() > MAX_CATEGORY_LEN {
            return Err(EngineError::LimitExceeded("specialization too long"));
        }
        if capacity > MAX_CAPACITY {
            return Err(EngineError::LimitExceeded("max daily patients too large"));
        }

        let registration = self.create_lock.clone().lock_owned().await;
        if self.resources.len() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many doctors"));
        }
        if self.resources.contains_key(id) {
            return Err(EngineError::AlreadyExists(id.to_string()));
        }

        let resource = Resource::new(id, category, capacity);
        let event = Event::ResourceCreated {
            id: resource.id.clone(),
            category: resource.category.clone(),
            capacity,
            used: 0,
        };
        // Logged and inserted on a spawned task holding registration, so a
        // dropped caller cannot leave a logged doctor missing from memory.
        let resources = self.resources.clone();
        let wal_tx = self.wal_tx.clone();
        let stored = resource.clone();
        tokio::spawn(async move {
            let _registration = registration;
            if let Some(wal_tx) = &wal_tx {
                append_event(wal_tx, event).await?;
            }
            resources.insert(stored.id.clone(), Arc::new(RwLock::new(stored)));
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Wal(format!("commit task failed: {e}")))??;
        info!("registered doctor {id} ({category}), {capacity}/day");
        Ok(resource)
    }

    /// The atomic primitive behind every booking: under the doctor's write
    /// lock, re-check `used < capacity`, log, then apply.
    pub async fn increment_if_available(&self, id: &str) -> Result<Option<Resource>, StoreError> {
        let Some(shared) = self.get_resource(id) else {
            return Ok(None);
        };
        let guard = shared.write_owned().await;
        if !guard.is_available() {
            return Ok(None);
        }
        let event = Event::AppointmentBooked { id: guard.id.clone() };
        self.log_and_apply(guard, event, |r| r.used += 1)
            .await
            .map(Some)
    }

    /// Zero every doctor's counter for a new day. Each doctor is reset under
    /// its own lock; bookings racing the reset land either side of it.
    /// Returns how many counters actually changed.
    pub async fn reset_usage(&self) -> Result<usize, StoreError> {
        let mut changed = 0;
        for shared in self.shared_resources() {
            let guard = shared.write_owned().await;
            if guard.used == 0 {
                continue;
            }
            let event = Event::UsageReset { id: guard.id.clone() };
            self.log_and_apply(guard, event, |r| r.used = 0).await?;
            changed += 1;
        }
        info!("daily appointments reset, {changed} doctor(s) updated");
        Ok(changed)
    }

    /// Rewrite the WAL as one `ResourceCreated` per doctor carrying the live
    /// counter. Registration and every counter are frozen until the new log
    /// is in place, so nothing can be committed to the log being replaced.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _registration = self.create_lock.lock().await;

        // Nothing else ever holds two doctor locks, so acquisition order is free.
        let mut guards = Vec::new();
        for s in self.shared_resources() {
            guards.push(s.read_owned().await);
        }
        guards.sort_by(|a, b| a.id.cmp(&b.id));

        let events: Vec<Event> = guards
            .iter()
            .map(|g| Event::ResourceCreated {
                id: g.id.clone(),
                category: g.category.clone(),
                capacity: g.capacity,
                used: g.used,
            })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        drop(guards);

        info!("WAL compacted to {count} events");
        Ok(())
    }
}
