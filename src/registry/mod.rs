mod mutations;
mod queries;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::info;

use crate::engine::{ResourceStore, StoreError};
use crate::model::*;
use crate::wal::Wal;

pub type SharedResource = Arc<RwLock<Resource>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Each wake-up takes every append already queued and commits
/// them with one fsync; a non-append command ends the batch early.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't bleed into
    // the next batch; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL commit of {} events failed: {e}", batch.len());
    }

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Queue `event` and wait for its group commit.
pub(super) async fn append_event(
    wal_tx: &mpsc::Sender<WalCommand>,
    event: Event,
) -> Result<(), StoreError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { event, response: tx })
        .await
        .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
        .map_err(|e| StoreError::Wal(e.to_string()))
}

/// Fold replayed events into the doctor table. Later events win.
fn rebuild(events: Vec<Event>) -> DashMap<String, SharedResource> {
    let mut table: HashMap<String, Resource> = HashMap::new();
    for event in events {
        match event {
            Event::ResourceCreated { id, category, capacity, used } => {
                let mut r = Resource::new(id.clone(), category, capacity);
                r.used = used.min(capacity);
                table.insert(id, r);
            }
            Event::AppointmentBooked { id } => {
                if let Some(r) = table.get_mut(&id)
                    && r.is_available() {
                        r.used += 1;
                    }
            }
            Event::UsageReset { id } => {
                if let Some(r) = table.get_mut(&id) {
                    r.used = 0;
                }
            }
        }
    }
    table
        .into_iter()
        .map(|(id, r)| (id, Arc::new(RwLock::new(r))))
        .collect()
}

/// The doctor registry: authoritative store for resources and their counters.
///
/// Each doctor sits behind its own `RwLock`; the conditional increment holds
/// that lock across check, log and apply, which is what makes it atomic.
pub struct Registry {
    resources: Arc<DashMap<String, SharedResource>>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Serializes registration (id uniqueness) and compaction snapshots.
    create_lock: Arc<Mutex<()>>,
}

impl Registry {
    /// Volatile registry, nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            resources: Arc::new(DashMap::new()),
            wal_tx: None,
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Replay `wal_path` and start its writer task. Must run inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let replayed = events.len();
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let resources = rebuild(events);
        info!(
            "registry {} loaded: {} doctors from {replayed} events",
            wal_path.display(),
            resources.len()
        );
        Ok(Self {
            resources: Arc::new(resources),
            wal_tx: Some(wal_tx),
            create_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get_resource(&self, id: &str) -> Option<SharedResource> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    /// Clone the handles out so no map shard guard is held across an `.await`.
    fn shared_resources(&self) -> Vec<SharedResource> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }

    async fn wal_request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<Option<T>, StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(None);
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(build(tx))
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map(Some)
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))
    }

    /// Log `event`, then apply `apply` to the locked doctor.
    ///
    /// Both steps run on a spawned task that owns the write guard, so a caller
    /// dropped mid-commit cannot leave the log ahead of memory. Without a WAL
    /// the change is applied in place.
    async fn log_and_apply(
        &self,
        mut guard: OwnedRwLockWriteGuard<Resource>,
        event: Event,
        apply: fn(&mut Resource),
    ) -> Result<Resource, StoreError> {
        let Some(wal_tx) = self.wal_tx.clone() else {
            apply(&mut guard);
            return Ok((*guard).clone());
        };
        tokio::spawn(async move {
            append_event(&wal_tx, event).await?;
            apply(&mut guard);
            Ok::<_, StoreError>((*guard).clone())
        })
        .await
        .map_err(|e| StoreError::Wal(format!("commit task failed: {e}")))?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.wal_request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .ok()
            .flatten()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ResourceStore for Registry {
    async fn find_by_category(&self, category: &str) -> Result<Vec<Resource>, StoreError> {
        Ok(self.matching(category).await)
    }

    async fn conditional_increment(&self, id: &str) -> Result<Option<Resource>, StoreError> {
        self.increment_if_available(id).await
    }

    async fn read_all(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.snapshot().await)
    }
}
