//! Contact sync orchestration: staging, reconciliation cycles and lifecycle triggers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::contact_sync_scheduler::{should_auto_sync, SyncConfig};
use super::retry_policy::SyncRetryClass;
use super::status_publisher::{Subscription, SyncStatusPublisher};
use super::sync_state_model::{
    LifecycleEvent, SyncCycleResult, SyncCycleStatus, SyncCycleTrigger, SyncState,
};
use super::write_coalescer::{BatchSink, WriteCoalescer};
use crate::contacts::{
    confirm_pushed, merge, outstanding_tombstones, pending_operations, rebase_staged,
    removed_contacts, removed_during_push, without_tombstones, Contact, ContactRecord,
    ContactSet, KeyValueStoreTrait, LocalContactStore, LocalSnapshot, NewContact,
    RemoteContactServiceTrait, Tombstone,
};
use crate::errors::{Error, Result};

const AUTH_REQUIRED_MESSAGE: &str = "Authentication required";

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A staged contact list together with the canonical list it was derived from.
#[derive(Debug, Clone)]
struct StagedContacts {
    contacts: ContactSet,
    base: ContactSet,
}

#[derive(Debug, Default)]
struct RetryState {
    consecutive_failures: u32,
    next_retry_at: Option<DateTime<Utc>>,
}

/// How a cycle request treats an in-flight cycle and the backoff window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Skipped while another cycle runs; deferred inside backoff.
    IfIdle,
    /// Waits for the running cycle and ignores backoff.
    Forced,
}

#[derive(Debug, Clone, Copy)]
enum CyclePhase {
    Pull,
    Push,
}

/// Marks the publisher as syncing for as long as it lives.
struct SyncingGuard<'a> {
    publisher: &'a SyncStatusPublisher,
}

impl<'a> SyncingGuard<'a> {
    fn new(publisher: &'a SyncStatusPublisher) -> Self {
        publisher.update(|state| state.is_syncing = true);
        Self { publisher }
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.publisher.update(|state| state.is_syncing = false);
    }
}

/// Progress of one cycle, used to build its result.
struct CycleContext {
    trigger: SyncCycleTrigger,
    started_at: Instant,
    pulled_count: usize,
    pushed_count: usize,
}

impl CycleContext {
    fn result(&self, status: SyncCycleStatus, pending_operations: usize) -> SyncCycleResult {
        SyncCycleResult {
            status,
            pulled_count: self.pulled_count,
            pushed_count: self.pushed_count,
            pending_operations,
            duration_ms: self.started_at.elapsed().as_millis() as i64,
        }
    }
}

/// A push payload and the local contacts it was built from.
struct OutgoingPush {
    payload: ContactRecord,
    contacts: ContactSet,
    tombstone_ids: HashSet<String>,
    operations: usize,
}

impl OutgoingPush {
    /// The server replaces its record wholesale, so the payload carries the
    /// pulled profile fields and unrecognized entries back unchanged.
    fn build(
        snapshot: &LocalSnapshot,
        record: &ContactRecord,
        passthrough: Vec<serde_json::Value>,
    ) -> Self {
        let payload = ContactRecord {
            emergency_contacts: snapshot
                .contacts
                .iter()
                .map(|c| Contact {
                    synced: true,
                    ..c.clone()
                })
                .collect(),
            unrecognized_contacts: passthrough,
            user_info: record.user_info.clone(),
            medical_info: record.medical_info.clone(),
        };
        Self {
            payload,
            contacts: snapshot.contacts.clone(),
            tombstone_ids: snapshot.tombstones.iter().map(|t| t.id.clone()).collect(),
            operations: pending_operations(&snapshot.contacts, &snapshot.tombstones),
        }
    }
}

/// State shared by the service, the coalescer sink and spawned cycles.
struct SyncCore {
    store: LocalContactStore,
    remote: Arc<dyn RemoteContactServiceTrait>,
    config: SyncConfig,
    publisher: SyncStatusPublisher,
    cycle_mutex: Mutex<()>,
    /// Set by post-mutation pushes; a cycle that ends with it set pushes again.
    follow_up_push: AtomicBool,
    /// Canonical in-memory copy of what is persisted.
    local: Mutex<LocalSnapshot>,
    retry: StdMutex<RetryState>,
}

impl SyncCore {
    fn pending_operations(&self) -> usize {
        self.publisher.current().pending_operations
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        let next_retry_at = lock(&self.retry).next_retry_at;
        should_auto_sync(
            self.publisher.current().last_sync_at,
            next_retry_at,
            now,
            self.config.auto_sync_interval,
        )
    }

    fn in_backoff(&self, now: DateTime<Utc>) -> bool {
        lock(&self.retry)
            .next_retry_at
            .is_some_and(|retry_at| now < retry_at)
    }

    async fn reconcile(
        self: &Arc<Self>,
        admission: Admission,
        trigger: SyncCycleTrigger,
    ) -> Result<SyncCycleResult> {
        if trigger == SyncCycleTrigger::LocalMutation {
            self.follow_up_push.store(true, Ordering::SeqCst);
        }
        let cycle = match admission {
            Admission::IfIdle => match self.cycle_mutex.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!(
                        "[ContactSync] Cycle already in flight, skipping {:?} trigger",
                        trigger
                    );
                    return Ok(SyncCycleResult::without_cycle(
                        SyncCycleStatus::Skipped,
                        self.pending_operations(),
                    ));
                }
            },
            Admission::Forced => self.cycle_mutex.lock().await,
        };
        // The cycle about to run reads every mutation persisted so far.
        self.follow_up_push.store(false, Ordering::SeqCst);

        let result = self.run_gated(admission, trigger).await;
        drop(cycle);

        if self.follow_up_push.swap(false, Ordering::SeqCst) && self.pending_operations() > 0 {
            debug!("[ContactSync] Pushing edits made during the cycle");
            self.schedule_push();
        }
        result
    }

    async fn run_gated(
        &self,
        admission: Admission,
        trigger: SyncCycleTrigger,
    ) -> Result<SyncCycleResult> {
        if admission == Admission::IfIdle && self.in_backoff(Utc::now()) {
            debug!("[ContactSync] In retry backoff, deferring {:?} trigger", trigger);
            return Ok(SyncCycleResult::without_cycle(
                SyncCycleStatus::NotDue,
                self.pending_operations(),
            ));
        }

        let _syncing = SyncingGuard::new(&self.publisher);
        let mut ctx = CycleContext {
            trigger,
            started_at: Instant::now(),
            pulled_count: 0,
            pushed_count: 0,
        };
        self.run_cycle(&mut ctx).await
    }

    /// Pull, merge, push. The local snapshot is only locked while it is
    /// read or written, never across a network call.
    async fn run_cycle(&self, ctx: &mut CycleContext) -> Result<SyncCycleResult> {
        debug!("[ContactSync] Starting cycle ({:?})", ctx.trigger);

        let record = match self.remote.fetch_record().await {
            Ok(record) => record,
            Err(err) => {
                let pending = self.pending_operations();
                return Ok(self.fail(ctx, CyclePhase::Pull, err, pending));
            }
        };
        let (remote_contacts, passthrough) = record.partition_contacts();
        ctx.pulled_count = remote_contacts.len();

        let reconciled = self.apply_pull(&remote_contacts).await?;
        let outgoing = (reconciled.contacts.has_unsynced() || !reconciled.tombstones.is_empty())
            .then(|| OutgoingPush::build(&reconciled, &record, passthrough));

        let mut push_failure = None;
        if let Some(push) = &outgoing {
            match self.remote.replace_record(&push.payload).await {
                Ok(()) => ctx.pushed_count = push.operations,
                Err(err) => push_failure = Some(err),
            }
        }

        let now = Utc::now();
        let confirmed = if push_failure.is_none() {
            outgoing.as_ref()
        } else {
            None
        };
        let pending = self
            .finish_cycle(confirmed, push_failure.is_none(), now)
            .await?;

        if let Some(err) = push_failure {
            return Ok(self.fail(ctx, CyclePhase::Push, err, pending));
        }

        *lock(&self.retry) = RetryState::default();
        self.publisher.update(|state| {
            state.is_online = true;
            state.last_error = None;
            state.last_sync_at = Some(now);
            state.pending_operations = pending;
        });
        debug!(
            "[ContactSync] Cycle complete: pulled={} pushed={} pending={}",
            ctx.pulled_count, ctx.pushed_count, pending
        );
        Ok(ctx.result(SyncCycleStatus::Ok, pending))
    }

    /// Merges the pulled set into the local snapshot and persists the result.
    async fn apply_pull(&self, remote_contacts: &ContactSet) -> Result<LocalSnapshot> {
        let mut local = self.local.lock().await;
        let baseline = without_tombstones(remote_contacts, &local.tombstones);
        let next = LocalSnapshot {
            contacts: merge(&local.contacts, &baseline),
            tombstones: outstanding_tombstones(remote_contacts, &local.tombstones),
            last_sync_at: local.last_sync_at,
        };
        if next != *local {
            self.persist_reconciled(&next).await?;
            *local = next.clone();
        }
        Ok(next)
    }

    /// Applies a confirmed push to whatever the snapshot holds now, which may
    /// include edits made while the push was in flight.
    async fn finish_cycle(
        &self,
        confirmed: Option<&OutgoingPush>,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut local = self.local.lock().await;
        let mut next = local.clone();
        if let Some(push) = confirmed {
            next.tombstones.retain(|t| !push.tombstone_ids.contains(&t.id));
            for removed in removed_during_push(&next.contacts, &push.contacts, &next.tombstones) {
                next.tombstones.push(Tombstone::for_contact(&removed, now));
            }
            next.contacts = confirm_pushed(&next.contacts, &push.contacts);
        }
        if completed {
            next.last_sync_at = Some(now);
        }

        if next != *local {
            self.persist_reconciled(&next).await?;
            *local = next;
        }
        Ok(pending_operations(&local.contacts, &local.tombstones))
    }

    async fn persist_reconciled(&self, snapshot: &LocalSnapshot) -> Result<()> {
        if let Err(err) = self.store.save_snapshot(snapshot).await {
            error!("[ContactSync] Failed to persist reconciled contacts: {}", err);
            let message = err.to_string();
            self.publisher
                .update(|state| state.last_error = Some(message));
            return Err(err);
        }
        Ok(())
    }

    /// Records a remote failure: publishes status, arms backoff, keeps local data.
    fn fail(
        &self,
        ctx: &CycleContext,
        phase: CyclePhase,
        err: Error,
        pending: usize,
    ) -> SyncCycleResult {
        let (status, message, offline) = match &err {
            Error::Remote(remote) if remote.is_offline() => (
                SyncCycleStatus::Offline,
                format!("Offline: {}", remote.message),
                true,
            ),
            Error::Remote(remote) if remote.retry_class() == SyncRetryClass::ReauthRequired => (
                SyncCycleStatus::AuthError,
                AUTH_REQUIRED_MESSAGE.to_string(),
                false,
            ),
            _ => {
                let status = match phase {
                    CyclePhase::Pull => SyncCycleStatus::PullError,
                    CyclePhase::Push => SyncCycleStatus::PushError,
                };
                (status, err.to_string(), false)
            }
        };

        let retry_after = {
            let mut retry = lock(&self.retry);
            retry.consecutive_failures = retry.consecutive_failures.saturating_add(1);
            let delay = self
                .config
                .retry
                .delay_after(status, retry.consecutive_failures)
                .unwrap_or_default();
            retry.next_retry_at = chrono::Duration::from_std(delay)
                .ok()
                .map(|delay| Utc::now() + delay);
            delay
        };
        warn!(
            "[ContactSync] {:?} failed ({:?}): {}. Retrying in {}s",
            phase,
            status,
            err,
            retry_after.as_secs()
        );

        self.publisher.update(|state| {
            state.last_error = Some(message);
            if offline {
                state.is_online = false;
            }
            state.pending_operations = pending;
        });
        ctx.result(status, pending)
    }

    /// Spawns a push after a local mutation was persisted. Skipped while a
    /// cycle is in flight; that cycle then pushes again once it is done.
    fn schedule_push(self: &Arc<Self>) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            match core
                .reconcile(Admission::IfIdle, SyncCycleTrigger::LocalMutation)
                .await
            {
                Ok(result) => debug!("[ContactSync] Post-mutation cycle: {:?}", result.status),
                Err(err) => error!("[ContactSync] Post-mutation cycle failed: {}", err),
            }
        });
    }
}

/// Persists staged contact lists and derives tombstones for removed contacts.
struct MutationSink {
    core: Arc<SyncCore>,
}

#[async_trait]
impl BatchSink<StagedContacts> for MutationSink {
    async fn write_batch(&self, batch: StagedContacts) -> Result<()> {
        let core = &self.core;
        let mut local = core.local.lock().await;
        let contacts = rebase_staged(&batch.contacts, &batch.base, &local.contacts);

        let now = Utc::now();
        let mut tombstones: Vec<Tombstone> = local
            .tombstones
            .iter()
            .filter(|t| !contacts.contains_id(&t.id))
            .cloned()
            .collect();
        for removed in removed_contacts(&batch.base, &batch.contacts) {
            // Never-synced contacts are simply dropped.
            let Some(latest) = local.contacts.get(&removed.id) else {
                continue;
            };
            if latest.synced && !tombstones.iter().any(|t| t.id == latest.id) {
                tombstones.push(Tombstone::for_contact(latest, now));
            }
        }

        let next = LocalSnapshot {
            contacts,
            tombstones,
            last_sync_at: local.last_sync_at,
        };
        if let Err(err) = core.store.save_snapshot(&next).await {
            drop(local);
            error!("[ContactSync] Failed to persist staged contacts: {}", err);
            let message = err.to_string();
            core.publisher
                .update(|state| state.last_error = Some(message));
            return Err(err);
        }

        let pending = pending_operations(&next.contacts, &next.tombstones);
        debug!(
            "[ContactSync] Persisted {} contacts ({} pending)",
            next.contacts.len(),
            pending
        );
        *local = next;
        drop(local);

        core.publisher
            .update(|state| state.pending_operations = pending);
        if core.config.push_on_mutation && pending > 0 {
            core.schedule_push();
        }
        Ok(())
    }
}

struct LifecycleListener {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Owns the emergency circle: the canonical contact set, its persistence and
/// its synchronization with the remote contact service.
pub struct ContactSyncService {
    core: Arc<SyncCore>,
    coalescer: WriteCoalescer<StagedContacts>,
    /// Serializes read-modify-stage sequences.
    mutation_lock: Mutex<()>,
    listener: StdMutex<Option<LifecycleListener>>,
}

impl ContactSyncService {
    /// Loads the persisted snapshot and builds the service around it.
    pub async fn new(
        kv: Arc<dyn KeyValueStoreTrait>,
        remote: Arc<dyn RemoteContactServiceTrait>,
        config: SyncConfig,
    ) -> Result<Self> {
        let store = LocalContactStore::new(kv);
        let snapshot = store.load().await?;
        let publisher = SyncStatusPublisher::new(SyncState {
            pending_operations: pending_operations(&snapshot.contacts, &snapshot.tombstones),
            last_sync_at: snapshot.last_sync_at,
            ..SyncState::default()
        });
        let batch_delay = config.batch_delay;

        let core = Arc::new(SyncCore {
            store,
            remote,
            config,
            publisher,
            cycle_mutex: Mutex::new(()),
            follow_up_push: AtomicBool::new(false),
            local: Mutex::new(snapshot),
            retry: StdMutex::new(RetryState::default()),
        });
        let sink = Arc::new(MutationSink {
            core: Arc::clone(&core),
        });

        Ok(Self {
            core,
            coalescer: WriteCoalescer::new(sink, batch_delay),
            mutation_lock: Mutex::new(()),
            listener: StdMutex::new(None),
        })
    }

    pub fn state(&self) -> SyncState {
        self.core.publisher.current()
    }

    /// See [`SyncStatusPublisher::subscribe`].
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.core.publisher.subscribe(callback)
    }

    /// The circle as the user sees it, including staged but unflushed edits.
    pub async fn contacts(&self) -> ContactSet {
        match self.coalescer.pending() {
            Some(staged) => staged.contacts,
            None => self.core.local.lock().await.contacts.clone(),
        }
    }

    async fn view_and_base(&self) -> (ContactSet, ContactSet) {
        match self.coalescer.pending() {
            Some(staged) => (staged.contacts, staged.base),
            None => {
                let contacts = self.core.local.lock().await.contacts.clone();
                (contacts.clone(), contacts)
            }
        }
    }

    /// Replaces the circle with `contacts`; persisted after the batch delay.
    pub async fn stage(&self, contacts: ContactSet) -> Result<()> {
        for contact in &contacts {
            contact.validate()?;
        }
        let _guard = self.mutation_lock.lock().await;
        let (_, base) = self.view_and_base().await;
        self.coalescer.stage(StagedContacts { contacts, base });
        Ok(())
    }

    /// Adds a contact with a temporary id and stages the new circle.
    pub async fn add_contact(&self, new_contact: NewContact) -> Result<Contact> {
        new_contact.validate()?;
        let _guard = self.mutation_lock.lock().await;
        let (mut contacts, base) = self.view_and_base().await;
        if let Some(existing) = contacts.find_by_phone(&new_contact.phone) {
            return Err(Error::validation(format!(
                "{} already uses this phone number",
                existing.name
            )));
        }

        let contact = Contact::new_local(new_contact);
        contacts.push(contact.clone());
        self.coalescer.stage(StagedContacts { contacts, base });
        info!("[ContactSync] Added contact {}", contact.id);
        Ok(contact)
    }

    /// Removes a contact; false if no contact has this id.
    pub async fn remove_contact(&self, id: &str) -> Result<bool> {
        let _guard = self.mutation_lock.lock().await;
        let (contacts, base) = self.view_and_base().await;
        let Some(contacts) = contacts.without(id) else {
            return Ok(false);
        };
        self.coalescer.stage(StagedContacts { contacts, base });
        info!("[ContactSync] Removed contact {}", id);
        Ok(true)
    }

    /// Persists any staged edit now.
    pub async fn flush(&self) -> Result<()> {
        self.coalescer.flush().await
    }

    /// Runs one reconciliation cycle.
    ///
    /// Without `force`, returns `Skipped` if a cycle is in flight and
    /// `NotDue` inside the retry backoff window. With `force`, waits for the
    /// in-flight cycle and ignores the backoff window.
    pub async fn reconcile(&self, force: bool) -> Result<SyncCycleResult> {
        let admission = if force {
            Admission::Forced
        } else {
            Admission::IfIdle
        };
        self.core.reconcile(admission, SyncCycleTrigger::Manual).await
    }

    /// Flushes staged edits, then forces a cycle.
    pub async fn sync_now(&self) -> Result<SyncCycleResult> {
        self.flush().await?;
        self.core
            .reconcile(Admission::Forced, SyncCycleTrigger::Manual)
            .await
    }

    /// Startup trigger: syncs if the last sync is stale.
    pub async fn sync_on_startup(&self) -> Result<SyncCycleResult> {
        self.maybe_sync(SyncCycleTrigger::Startup).await
    }

    pub async fn on_lifecycle_event(
        &self,
        event: LifecycleEvent,
    ) -> Result<Option<SyncCycleResult>> {
        match event {
            LifecycleEvent::Foreground => self
                .maybe_sync(SyncCycleTrigger::Foreground)
                .await
                .map(Some),
            LifecycleEvent::ScreenFocus => self
                .maybe_sync(SyncCycleTrigger::ScreenFocus)
                .await
                .map(Some),
            LifecycleEvent::Background => {
                self.flush().await?;
                Ok(None)
            }
        }
    }

    async fn maybe_sync(&self, trigger: SyncCycleTrigger) -> Result<SyncCycleResult> {
        if !self.core.is_due(Utc::now()) {
            debug!("[ContactSync] {:?}: last sync is fresh", trigger);
            return Ok(SyncCycleResult::without_cycle(
                SyncCycleStatus::NotDue,
                self.core.pending_operations(),
            ));
        }
        self.core.reconcile(Admission::IfIdle, trigger).await
    }

    /// Routes host lifecycle events from `events` until stopped or the
    /// sender is dropped. Replaces any running listener.
    pub fn start_lifecycle_listener(self: &Arc<Self>, mut events: mpsc::Receiver<LifecycleEvent>) {
        let service: Weak<Self> = Arc::downgrade(self);
        let stop = Arc::new(Notify::new());
        let stop_signal = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = stop_signal.notified() => break,
                };
                let Some(service) = service.upgrade() else {
                    break;
                };
                match service.on_lifecycle_event(event).await {
                    Ok(Some(result)) => {
                        debug!("[ContactSync] {:?} -> {:?}", event, result.status)
                    }
                    Ok(None) => {}
                    Err(err) => error!("[ContactSync] {:?} handling failed: {}", event, err),
                }
            }
            debug!("[ContactSync] Lifecycle listener stopped");
        });

        let previous = lock(&self.listener).replace(LifecycleListener { stop, handle });
        if let Some(previous) = previous {
            previous.stop.notify_one();
        }
    }

    /// Stops the listener after it finishes the event in hand.
    pub async fn stop_lifecycle_listener(&self) {
        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            listener.stop.notify_one();
            if let Err(err) = listener.handle.await {
                warn!("[ContactSync] Lifecycle listener ended abnormally: {}", err);
            }
        }
    }

    /// Stops listening, persists staged edits and waits for any in-flight cycle.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_lifecycle_listener().await;
        self.flush().await?;
        let _cycle = self.core.cycle_mutex.lock().await;
        Ok(())
    }
}
