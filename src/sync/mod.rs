use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{GatewayError, QueueError};
use crate::remote::{RemoteGateway, WriteAck};
use crate::storage::{ChangeKind, ChangeRequest, PendingChange, PendingQueue};

mod network;

pub use network::{Connectivity, Transition};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    /// Whether a change that has failed `retries` times should be dropped.
    pub fn exhausted(&self, retries: u32) -> bool {
        retries >= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Why a drain did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SkipReason {
    Busy,
    Offline,
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    pub retained: usize,
    pub skipped: Option<SkipReason>,
    /// Changes dropped during this drain after reaching the retry ceiling.
    pub dropped: Vec<PendingChange>,
    /// Set when the remote became unreachable mid-drain; later changes were
    /// left untouched.
    pub interrupted: bool,
}

impl DrainReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    pub fn is_busy(&self) -> bool {
        self.skipped == Some(SkipReason::Busy)
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.retained
    }
}

/// Replays queued changes against the remote store. Only one drain runs at a
/// time; a drain started while another is in flight returns immediately.
#[derive(Debug)]
pub struct SyncEngine<G> {
    gateway: G,
    queue: PendingQueue,
    connectivity: Arc<Connectivity>,
    policy: RetryPolicy,
    in_flight: Mutex<()>,
}

impl<G: RemoteGateway> SyncEngine<G> {
    pub fn new(
        gateway: G,
        queue: PendingQueue,
        connectivity: Arc<Connectivity>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            queue,
            connectivity,
            policy,
            in_flight: Mutex::new(()),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn connectivity(&self) -> &Arc<Connectivity> {
        &self.connectivity
    }

    pub fn drain(&self) -> Result<DrainReport, QueueError> {
        self.drain_with_progress(|_, _| {})
    }

    /// Drain the queue, calling `on_progress(done, total)` after each change.
    pub fn drain_with_progress<F>(&self, mut on_progress: F) -> Result<DrainReport, QueueError>
    where
        F: FnMut(usize, usize),
    {
        let Some(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("drain already in progress");
            return Ok(DrainReport::skipped(SkipReason::Busy));
        };
        if !self.connectivity.is_online() {
            tracing::debug!("offline, leaving pending changes queued");
            return Ok(DrainReport::skipped(SkipReason::Offline));
        }

        let pending = logged(self.queue.dequeue_all())?;
        if pending.is_empty() {
            return Ok(DrainReport::skipped(SkipReason::Empty));
        }

        let total = pending.len();
        tracing::info!(pending = total, "syncing pending changes");
        let mut report = DrainReport::default();
        for (index, change) in pending.into_iter().enumerate() {
            let mut unreachable = false;
            match self.replay(&change) {
                Ok(ack) => {
                    logged(self.queue.remove(change.id))?;
                    report.succeeded += 1;
                    tracing::info!(change = %change.id, kind = %change.kind(), message = %ack.message, "change synced");
                }
                Err(err) => {
                    unreachable = err.is_connectivity();
                    let retries = logged(self.queue.record_failure(change.id))?;
                    if self.policy.exhausted(retries) {
                        logged(self.queue.remove(change.id))?;
                        tracing::error!(
                            change = %change.id,
                            kind = %change.kind(),
                            retries,
                            error = %err,
                            "change exceeded max retries, dropping"
                        );
                        report.failed += 1;
                        report.dropped.push(PendingChange {
                            retry_count: retries,
                            ..change
                        });
                    } else {
                        tracing::warn!(
                            change = %change.id,
                            kind = %change.kind(),
                            retries,
                            max = self.policy.max_retries,
                            error = %err,
                            "change failed, will retry"
                        );
                        report.retained += 1;
                    }
                }
            }
            on_progress(index + 1, total);
            if unreachable {
                self.connectivity.set_online(false);
                report.interrupted = true;
                tracing::warn!(
                    remaining = total - index - 1,
                    "remote unreachable, pausing sync"
                );
                break;
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            retained = report.retained,
            "sync finished"
        );
        Ok(report)
    }

    fn replay(&self, change: &PendingChange) -> Result<WriteAck, GatewayError> {
        if change.kind() == ChangeKind::Add && change.retry_count > 0 {
            tracing::warn!(
                change = %change.id,
                attempt = change.retry_count + 1,
                "retrying add; an earlier attempt may already have created the row"
            );
        }
        match &change.request {
            ChangeRequest::Add { item } => self.gateway.add(item),
            ChangeRequest::Update { target, item } => self.gateway.update(*target, item),
            ChangeRequest::Delete { target } => self.gateway.delete(*target),
        }
    }
}

fn logged<T>(result: Result<T, QueueError>) -> Result<T, QueueError> {
    result.map_err(|err| {
        tracing::error!(error = %err, "pending-change storage failed during sync");
        err
    })
}

#[cfg(test)]
mod tests {
    use std::thread;

    use assert_matches::assert_matches;
    use crossbeam_channel::bounded;

    use super::*;
    use crate::inventory::{ItemDraft, RowId};
    use crate::remote::testing::{Call, ScriptedGateway};
    use crate::remote::RemoteSnapshot;
    use crate::storage::testing::init_storage;

    fn named(name: &str) -> ItemDraft {
        ItemDraft {
            name: Some(name.into()),
            ..ItemDraft::default()
        }
    }

    fn engine<G: RemoteGateway>(gateway: G, queue: PendingQueue) -> SyncEngine<G> {
        SyncEngine::new(
            gateway,
            queue,
            Arc::new(Connectivity::new(true)),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn replays_add_update_delete_in_order() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        queue.enqueue(ChangeRequest::Add { item: named("Honey") })?;
        queue.enqueue(ChangeRequest::Update {
            target: RowId::new(5),
            item: named("Raw honey"),
        })?;
        queue.enqueue(ChangeRequest::Delete {
            target: RowId::new(6),
        })?;

        let engine = engine(ScriptedGateway::default(), queue.clone());
        let report = engine.drain()?;

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.skipped, None);
        assert_eq!(
            engine.gateway().calls(),
            vec![
                Call::Add(named("Honey")),
                Call::Update(RowId::new(5), named("Raw honey")),
                Call::Delete(RowId::new(6)),
            ]
        );
        assert!(!queue.has_pending()?);
        Ok(())
    }

    #[test]
    fn changes_are_dropped_after_max_retries() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        for name in ["Tea", "Rice", "Beans"] {
            queue.enqueue(ChangeRequest::Add { item: named(name) })?;
        }
        let gateway = ScriptedGateway::default();
        gateway.set_fail_all_writes(true);
        let engine = engine(gateway, queue.clone());

        for _ in 0..2 {
            let report = engine.drain()?;
            assert_eq!(report.retained, 3);
            assert_eq!(report.failed, 0);
            assert_eq!(queue.len()?, 3);
        }
        let last = engine.drain()?;
        assert_eq!(last.failed, 3);
        assert_eq!(last.retained, 0);
        assert_eq!(last.dropped.len(), 3);
        assert!(last.dropped.iter().all(|change| change.retry_count == 3));
        assert!(!queue.has_pending()?);
        assert_eq!(engine.gateway().calls().len(), 9);
        Ok(())
    }

    #[test]
    fn a_failure_does_not_halt_the_drain() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        let first = queue.enqueue(ChangeRequest::Add { item: named("Salt") })?;
        queue.enqueue(ChangeRequest::Delete {
            target: RowId::new(3),
        })?;
        let gateway = ScriptedGateway::default();
        gateway.fail_next(GatewayError::Rejected("Row locked".into()));
        let engine = engine(gateway, queue.clone());

        let report = engine.drain()?;
        assert_eq!((report.succeeded, report.retained, report.failed), (1, 1, 0));
        let remaining = queue.dequeue_all()?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, first);
        assert_eq!(remaining[0].retry_count, 1);

        queue.enqueue(ChangeRequest::Delete {
            target: RowId::new(8),
        })?;
        let report = engine.drain()?;
        assert_eq!(report.succeeded, 2);
        let calls = engine.gateway().calls();
        assert_eq!(
            &calls[2..],
            &[Call::Add(named("Salt")), Call::Delete(RowId::new(8))]
        );
        Ok(())
    }

    #[test]
    fn skips_when_offline_or_empty() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        let engine = engine(ScriptedGateway::default(), queue.clone());
        assert_eq!(engine.drain()?, DrainReport::skipped(SkipReason::Empty));

        queue.enqueue(ChangeRequest::Add { item: named("Oil") })?;
        engine.connectivity().set_online(false);
        assert_eq!(engine.drain()?, DrainReport::skipped(SkipReason::Offline));
        assert!(engine.gateway().calls().is_empty());
        assert_eq!(queue.len()?, 1);
        Ok(())
    }

    #[test]
    fn unreachable_remote_pauses_the_drain() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        for name in ["Oats", "Rice", "Beans"] {
            queue.enqueue(ChangeRequest::Add { item: named(name) })?;
        }
        let gateway = ScriptedGateway::default();
        gateway.set_offline(true);
        let engine = engine(gateway, queue.clone());

        let report = engine.drain()?;
        assert!(report.interrupted);
        assert_eq!((report.succeeded, report.retained, report.failed), (0, 1, 0));
        assert!(!engine.connectivity().is_online());
        assert_eq!(engine.gateway().calls().len(), 1);

        for _ in 0..3 {
            assert_eq!(engine.drain()?, DrainReport::skipped(SkipReason::Offline));
        }
        let retries: Vec<_> = queue
            .dequeue_all()?
            .iter()
            .map(|change| change.retry_count)
            .collect();
        assert_eq!(retries, vec![1, 0, 0]);
        Ok(())
    }

    #[test]
    fn progress_reports_every_change() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        queue.enqueue(ChangeRequest::Add { item: named("A") })?;
        queue.enqueue(ChangeRequest::Add { item: named("B") })?;
        let engine = engine(ScriptedGateway::default(), queue);
        let mut seen = Vec::new();
        engine.drain_with_progress(|done, total| seen.push((done, total)))?;
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
        Ok(())
    }

    #[test]
    fn retry_policy_never_allows_zero() {
        assert!(RetryPolicy::new(0).exhausted(1));
        assert!(!RetryPolicy::default().exhausted(2));
        assert!(RetryPolicy::default().exhausted(3));
    }

    /// Parks inside `add` until the test releases it.
    struct ParkedGateway {
        entered: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
        adds: Mutex<usize>,
    }

    impl RemoteGateway for ParkedGateway {
        fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError> {
            Ok(RemoteSnapshot::default())
        }

        fn add(&self, _item: &ItemDraft) -> Result<WriteAck, GatewayError> {
            *self.adds.lock() += 1;
            let _ = self.entered.send(());
            self.release
                .recv()
                .map_err(|err| GatewayError::Transport(err.to_string()))?;
            Ok(WriteAck::ok("added"))
        }

        fn update(&self, _id: RowId, _item: &ItemDraft) -> Result<WriteAck, GatewayError> {
            Ok(WriteAck::ok("updated"))
        }

        fn delete(&self, _id: RowId) -> Result<WriteAck, GatewayError> {
            Ok(WriteAck::ok("deleted"))
        }
    }

    #[test]
    fn concurrent_drain_is_refused() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let queue = PendingQueue::new(storage);
        queue.enqueue(ChangeRequest::Add { item: named("Flour") })?;
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let engine = engine(
            ParkedGateway {
                entered: entered_tx,
                release: release_rx,
                adds: Mutex::new(0),
            },
            queue.clone(),
        );

        let (first, second) = thread::scope(|scope| {
            let running = scope.spawn(|| engine.drain());
            entered_rx.recv().expect("first drain reached the gateway");
            let second = engine.drain();
            release_tx.send(()).expect("release parked drain");
            let first = running.join().expect("drain thread panicked");
            (first, second)
        });

        assert_matches!(second, Ok(report) if report.is_busy() && report.processed() == 0);
        assert_matches!(first, Ok(report) if report.succeeded == 1);
        assert_eq!(*engine.gateway().adds.lock(), 1);
        assert!(!queue.has_pending()?);
        Ok(())
    }
}
