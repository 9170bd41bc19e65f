use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use time::{Date, OffsetDateTime};

use crate::config::AppConfig;
use crate::dates;
use crate::error::LoadError;
use crate::inventory::{ItemDraft, RowId};
use crate::remote::{RemoteGateway, RemoteSnapshot};
use crate::search::ItemQuery;
use crate::storage::{
    ChangeId, LocalCache, PendingChange, PendingQueue, StorageHandle, WalCheckpointStats,
};
use crate::sync::{Connectivity, DrainReport, RetryPolicy, SyncEngine, Transition};

mod actions;
pub mod state;

pub use actions::ActionDispatcher;
pub use state::{overlay_pending, DataSource, InventoryView, LoadedItems};

/// Result of a user mutation: the queued change, and the drain that followed
/// when the remote was believed reachable.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub change: ChangeId,
    pub sync: Option<DrainReport>,
}

/// One round of the periodic refresh loop.
#[derive(Debug, Clone)]
pub struct WatchTick {
    pub transition: Transition,
    pub sync: Option<DrainReport>,
    pub view: InventoryView,
}

#[derive(Debug, Clone, Copy)]
pub struct ShutdownReport {
    pub pending: usize,
    pub checkpoint: WalCheckpointStats,
}

/// Wires cache, queue and sync engine together behind the operations a
/// front end needs. Built once at startup; close with [`InventoryApp::shutdown`].
pub struct InventoryApp<G> {
    config: Arc<AppConfig>,
    storage: StorageHandle,
    cache: LocalCache,
    engine: SyncEngine<G>,
    network_enabled: bool,
    /// Set once a remote read has been attempted in this process.
    probed: AtomicBool,
}

impl<G: RemoteGateway> InventoryApp<G> {
    /// With `network_enabled` false the app never contacts the remote and
    /// works from the cache and queue alone.
    pub fn new(
        config: Arc<AppConfig>,
        storage: StorageHandle,
        gateway: G,
        network_enabled: bool,
    ) -> Self {
        let queue = PendingQueue::new(storage.clone());
        let engine = SyncEngine::new(
            gateway,
            queue,
            Arc::new(Connectivity::new(network_enabled)),
            RetryPolicy::new(config.sync.max_retries),
        );
        Self {
            cache: LocalCache::new(storage.clone()),
            config,
            storage,
            engine,
            network_enabled,
            probed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn gateway(&self) -> &G {
        self.engine.gateway()
    }

    pub fn is_online(&self) -> bool {
        self.engine.connectivity().is_online()
    }

    pub fn startup(&self) -> Result<Option<DrainReport>> {
        let pending = self
            .engine
            .queue()
            .len()
            .context("counting pending changes")?;
        if pending > 0 {
            tracing::info!(pending, "pending changes from a previous session");
        }
        if pending == 0 || !self.config.sync.drain_on_start {
            return Ok(None);
        }
        self.reachable();
        self.sync_now().map(Some)
    }

    /// Whether a drain may run. The first call in a process confirms the
    /// remote answers with a read before any queued write is attempted.
    fn reachable(&self) -> bool {
        if self.is_online() && !self.probed.load(Ordering::Acquire) {
            if let Err(err) = self.refresh() {
                tracing::debug!(error = %err, "no inventory available while checking the remote");
            }
        }
        self.is_online()
    }

    /// Read the inventory from the remote, falling back to the cache with an
    /// advisory. Fails only when neither source has data.
    pub fn refresh(&self) -> Result<LoadedItems, LoadError> {
        if !self.is_online() {
            return self.from_cache("offline".to_string());
        }
        let fetched = self.engine.gateway().fetch_all();
        self.probed.store(true, Ordering::Release);
        match fetched {
            Ok(snapshot) => Ok(self.accept(snapshot)),
            Err(err) => {
                if err.is_connectivity() {
                    self.engine.connectivity().set_online(false);
                }
                tracing::warn!(error = %err, "remote read failed");
                self.from_cache(err.to_string())
            }
        }
    }

    fn accept(&self, snapshot: RemoteSnapshot) -> LoadedItems {
        let fetched_at = OffsetDateTime::now_utc();
        self.cache
            .save(&snapshot.items, fetched_at, snapshot.last_updated.as_deref());
        tracing::debug!(items = snapshot.items.len(), "fetched inventory");
        LoadedItems {
            items: snapshot.items,
            source: DataSource::Remote,
            advisory: None,
            last_updated: snapshot.last_updated,
            fetched_at: Some(fetched_at),
        }
    }

    fn from_cache(&self, reason: String) -> Result<LoadedItems, LoadError> {
        match self.cache.load() {
            Some(snapshot) => Ok(LoadedItems {
                items: snapshot.items,
                source: DataSource::Cache,
                advisory: Some(format!("Using cached data ({reason})")),
                last_updated: snapshot.last_updated,
                fetched_at: Some(snapshot.fetched_at),
            }),
            None => Err(LoadError { reason }),
        }
    }

    pub fn view(&self, query: &ItemQuery) -> Result<InventoryView> {
        self.view_at(query, dates::today())
    }

    pub fn view_at(&self, query: &ItemQuery, today: Date) -> Result<InventoryView> {
        let loaded = self.refresh()?;
        self.render(loaded, query, today)
    }

    fn render(&self, loaded: LoadedItems, query: &ItemQuery, today: Date) -> Result<InventoryView> {
        let pending = self.pending()?;
        Ok(InventoryView::build(loaded, &pending, query, today))
    }

    pub fn pending(&self) -> Result<Vec<PendingChange>> {
        self.engine
            .queue()
            .dequeue_all()
            .context("reading pending changes")
    }

    fn dispatcher(&self) -> ActionDispatcher<'_> {
        ActionDispatcher::new(self.engine.queue(), &self.config.display)
    }

    pub fn add(&self, draft: ItemDraft) -> Result<MutationOutcome> {
        let change = self.dispatcher().add(draft)?;
        self.after_mutation(change)
    }

    pub fn update(&self, target: RowId, draft: ItemDraft) -> Result<MutationOutcome> {
        let change = self.dispatcher().update(target, draft)?;
        self.after_mutation(change)
    }

    pub fn delete(&self, target: RowId) -> Result<MutationOutcome> {
        let change = self.dispatcher().delete(target)?;
        self.after_mutation(change)
    }

    fn after_mutation(&self, change: ChangeId) -> Result<MutationOutcome> {
        let sync = if self.reachable() {
            Some(self.sync_now()?)
        } else {
            tracing::info!(change = %change, "offline, change kept for later sync");
            None
        };
        Ok(MutationOutcome { change, sync })
    }

    fn drain(&self) -> Result<DrainReport> {
        self.engine.drain().context("syncing pending changes")
    }

    /// Drain the queue and, when anything reached the remote, refresh the
    /// cache.
    pub fn sync_now(&self) -> Result<DrainReport> {
        let report = self.drain()?;
        if report.succeeded > 0 {
            if let Err(err) = self.refresh() {
                tracing::warn!(error = %err, "refresh after sync failed");
            }
        }
        Ok(report)
    }

    /// Record a connectivity observation. Coming back online drains the
    /// queue.
    pub fn set_online(&self, online: bool) -> Result<(Transition, Option<DrainReport>)> {
        let online = online && self.network_enabled;
        let transition = self.engine.connectivity().set_online(online);
        if transition == Transition::WentOnline {
            return Ok((transition, Some(self.sync_now()?)));
        }
        Ok((transition, None))
    }

    /// Probe the remote, drain when reachable, and rebuild the view.
    pub fn tick(&self, query: &ItemQuery, today: Date) -> Result<WatchTick> {
        if !self.network_enabled {
            return Ok(WatchTick {
                transition: Transition::Unchanged,
                sync: None,
                view: self.view_at(query, today)?,
            });
        }

        let fetched = self.engine.gateway().fetch_all();
        self.probed.store(true, Ordering::Release);
        let reachable = match &fetched {
            Ok(_) => true,
            Err(err) => !err.is_connectivity(),
        };
        let transition = self.engine.connectivity().set_online(reachable);
        let sync = if reachable { Some(self.drain()?) } else { None };

        let synced = sync.as_ref().is_some_and(|report| report.succeeded > 0);
        let loaded = match fetched {
            _ if synced => self.refresh()?,
            Ok(snapshot) => self.accept(snapshot),
            Err(err) => {
                tracing::warn!(error = %err, "remote read failed");
                self.from_cache(err.to_string())?
            }
        };
        Ok(WatchTick {
            transition,
            sync,
            view: self.render(loaded, query, today)?,
        })
    }

    pub fn shutdown(self) -> Result<ShutdownReport> {
        let pending = self
            .engine
            .queue()
            .len()
            .context("counting pending changes")?;
        if pending > 0 {
            tracing::info!(pending, "changes still waiting for sync");
        }
        let checkpoint = self
            .storage
            .run_wal_health_check()
            .context("checkpointing local database")?;
        tracing::debug!(?checkpoint, "local storage closed");
        Ok(ShutdownReport {
            pending,
            checkpoint,
        })
    }
}
