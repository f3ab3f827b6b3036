//! Confirmation tracking for outbound commands
//!
//! After a command is sent, the device's next telegrams are checked for the
//! state the command should have produced. Each pending command ends exactly
//! once: confirmed by a matching telegram, timed out by the sweep, replaced
//! by a newer command for the same entity, or cancelled.
//!
//! A newer command for the same device and entity supersedes the older one,
//! which is dropped without any callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use enolink_eep::{values_match, Command, FieldMap};
use enolink_esp3::DeviceId;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Called when a telegram confirms a command: (device, entity, command, fields)
pub type ConfirmCallback = Arc<dyn Fn(DeviceId, &str, &Command, &FieldMap) + Send + Sync>;

/// Called when a command expires unconfirmed: (device, entity, command)
pub type TimeoutCallback = Arc<dyn Fn(DeviceId, &str, &Command) + Send + Sync>;

/// A command waiting for confirmation
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// Correlation id for logs
    pub id: Uuid,
    /// Command as sent
    pub command: Command,
    /// Fields a confirming telegram must carry
    pub expected: FieldMap,
    /// When the command was registered
    pub created: Instant,
    /// When the command expires
    pub deadline: Instant,
}

impl PendingCommand {
    fn is_confirmed_by(&self, fields: &FieldMap) -> bool {
        self.expected.iter().all(|(key, expected)| {
            fields
                .get(key)
                .is_some_and(|actual| values_match(expected, actual))
        })
    }
}

type PendingKey = (DeviceId, String);

struct TrackerInner {
    pending: Mutex<HashMap<PendingKey, PendingCommand>>,
    running: AtomicBool,
    /// Bumped on every stop so a batch collected before it fires nothing
    generation: AtomicU64,
    on_confirm: ConfirmCallback,
    on_timeout: TimeoutCallback,
}

impl TrackerInner {
    /// Whether callbacks collected under `generation` may still fire
    fn live(&self, generation: u64) -> bool {
        self.running.load(Ordering::Acquire)
            && self.generation.load(Ordering::Acquire) == generation
    }

    fn sweep(&self, now: Instant) -> usize {
        let generation = self.generation.load(Ordering::Acquire);
        let expired: Vec<(PendingKey, PendingCommand)> = {
            let mut pending = self.pending.lock();
            let keys: Vec<PendingKey> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        // No lock is held from here on, callbacks may call back into the tracker
        let mut fired = 0;
        for ((device, entity), entry) in &expired {
            if !self.live(generation) {
                break;
            }
            warn!(
                device = %device,
                entity = %entity,
                command = entry.command.kind(),
                id = %entry.id,
                "Command not confirmed before timeout"
            );
            (self.on_timeout)(*device, entity, &entry.command);
            fired += 1;
        }
        fired
    }
}

/// Tracks sent commands until a telegram confirms them or they expire
pub struct CommandTracker {
    inner: Arc<TrackerInner>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CommandTracker {
    /// Create a tracker with its callbacks
    pub fn new<C, T>(sweep_interval: Duration, on_confirm: C, on_timeout: T) -> Self
    where
        C: Fn(DeviceId, &str, &Command, &FieldMap) + Send + Sync + 'static,
        T: Fn(DeviceId, &str, &Command) + Send + Sync + 'static,
    {
        let on_confirm: ConfirmCallback = Arc::new(on_confirm);
        let on_timeout: TimeoutCallback = Arc::new(on_timeout);
        Self {
            inner: Arc::new(TrackerInner {
                pending: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                on_confirm,
                on_timeout,
            }),
            sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Start the periodic expiry sweep
    ///
    /// Must be called from within a tokio runtime. Starting twice is a
    /// no-op.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        self.inner.running.store(true, Ordering::Release);

        let inner = Arc::clone(&self.inner);
        let period = self.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                inner.sweep(Instant::now());
            }
        }));
        info!(interval = ?period, "Command tracker started");
    }

    /// Stop the sweep
    ///
    /// A callback already in progress finishes, no new one starts after
    /// this returns.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
            info!("Command tracker stopped");
        }
    }

    /// Whether the sweep is running
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Register a command awaiting confirmation
    ///
    /// Replaces (without callbacks) any command pending for the same device
    /// and entity. Returns the correlation id of the new entry.
    pub fn add_pending(
        &self,
        device: DeviceId,
        entity: &str,
        command: Command,
        expected: FieldMap,
        timeout: Duration,
    ) -> Uuid {
        let now = Instant::now();
        let entry = PendingCommand {
            id: Uuid::new_v4(),
            command,
            expected,
            created: now,
            deadline: now + timeout,
        };
        let id = entry.id;

        let replaced = self
            .inner
            .pending
            .lock()
            .insert((device, entity.to_string()), entry);
        if let Some(old) = replaced {
            debug!(device = %device, entity, superseded = %old.id, id = %id, "Command superseded");
        }
        debug!(device = %device, entity, id = %id, timeout = ?timeout, "Tracking command");
        id
    }

    /// Drop a pending command without callbacks
    pub fn cancel(&self, device: DeviceId, entity: &str) -> bool {
        let removed = self
            .inner
            .pending
            .lock()
            .remove(&(device, entity.to_string()));
        if let Some(entry) = &removed {
            debug!(device = %device, entity, id = %entry.id, "Command cancelled");
        }
        removed.is_some()
    }

    /// Drop the pending command only if it is still the entry `id`
    ///
    /// A newer command that superseded `id` stays pending.
    pub fn cancel_id(&self, device: DeviceId, entity: &str, id: Uuid) -> bool {
        let key = (device, entity.to_string());
        let mut pending = self.inner.pending.lock();
        if !pending.get(&key).is_some_and(|entry| entry.id == id) {
            return false;
        }
        pending.remove(&key);
        debug!(device = %device, entity, id = %id, "Command cancelled");
        true
    }

    /// Check a decoded telegram against the device's pending commands
    ///
    /// Returns the number of commands confirmed.
    pub fn check_telegram(&self, device: DeviceId, fields: &FieldMap) -> usize {
        let generation = self.inner.generation.load(Ordering::Acquire);
        let confirmed: Vec<(String, PendingCommand)> = {
            let mut pending = self.inner.pending.lock();
            let keys: Vec<PendingKey> = pending
                .iter()
                .filter(|((id, _), entry)| *id == device && entry.is_confirmed_by(fields))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key).map(|entry| (key.1, entry)))
                .collect()
        };

        let mut fired = 0;
        for (entity, entry) in &confirmed {
            if !self.inner.live(generation) {
                break;
            }
            info!(
                device = %device,
                entity = %entity,
                command = entry.command.kind(),
                id = %entry.id,
                latency = ?entry.created.elapsed(),
                "Command confirmed"
            );
            (self.inner.on_confirm)(device, entity, &entry.command, fields);
            fired += 1;
        }
        fired
    }

    /// Expire overdue commands now instead of waiting for the sweep
    pub fn sweep_now(&self) -> usize {
        self.inner.sweep(Instant::now())
    }

    /// Number of commands awaiting confirmation
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Whether a command is pending for this device and entity
    pub fn is_pending(&self, device: DeviceId, entity: &str) -> bool {
        self.inner
            .pending
            .lock()
            .contains_key(&(device, entity.to_string()))
    }
}

impl Drop for CommandTracker {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for CommandTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTracker")
            .field("pending", &self.pending_count())
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}
