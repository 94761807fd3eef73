use std::time::Duration;

use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::message::{Message, MessageType};
use crate::shutdown::ShutdownSignal;
use crate::store::{Storage, StoredMessage};
use crate::Result;

/// The agent's outbound work queue.
///
/// One mutex guards the persistent store; a condition variable wakes
/// blocking waiters and a [`Notify`] wakes cooperative ones. Both are
/// signalled on every successful push and pop, and both kinds of
/// waiter re-check state on a poll tick derived from
/// `status_refresh_timer`, so a missed wake-up costs at most one tick.
pub struct MultiTypeQueue {
    store: Mutex<Storage>,
    state_changed: Condvar,
    notify: Notify,
    capacity: usize,
    batch_interval: Duration,
    refresh: Duration,
    shutdown: ShutdownSignal,
}

impl MultiTypeQueue {
    /// Opens (or creates) the queue database under the configured data
    /// directory. Failure to open the store is fatal to the caller.
    pub fn new(config: QueueConfig, shutdown: ShutdownSignal) -> Result<Self> {
        let config = config.sanitized();
        std::fs::create_dir_all(config.data_path()).map_err(|source| {
            error!("could not create queue data directory: {source}");
            QueueError::DataDir {
                path: config.data_path().display().to_string(),
                source,
            }
        })?;
        let store = Storage::open(&config.db_file())?;
        Ok(Self {
            store: Mutex::new(store),
            state_changed: Condvar::new(),
            notify: Notify::new(),
            capacity: config.queue_size,
            batch_interval: config.batch_interval(),
            refresh: config.status_refresh_timer(),
            shutdown,
        })
    }

    /// Persists the message's payload items (1 for an object, one per
    /// element for an array) and returns how many were stored. When
    /// the queue is full: returns the partial count immediately if
    /// `should_wait` is false, otherwise blocks — re-checking every
    /// poll tick — until space frees up or shutdown is requested.
    pub fn push(&self, message: &Message, should_wait: bool) -> Result<usize> {
        let elements = payload_elements(&message.payload);
        let mut pushed = 0;
        let mut store = self.store.lock();
        loop {
            pushed += self.drain_into_store(&store, message, &elements[pushed..])?;
            if pushed == elements.len() || !should_wait || self.shutdown.is_set() {
                break;
            }
            let _ = self.state_changed.wait_for(&mut store, self.refresh);
        }
        Ok(pushed)
    }

    /// Pushes each message in turn without blocking; returns the total
    /// number of persisted items.
    pub fn push_batch(&self, messages: &[Message]) -> Result<usize> {
        let mut total = 0;
        for message in messages {
            total += self.push(message, false)?;
        }
        Ok(total)
    }

    /// Cooperative [`Self::push`]: suspends the task (parking no OS
    /// thread) while the queue is full, resuming on pop or shutdown.
    pub async fn push_awaitable(&self, message: &Message) -> Result<usize> {
        let elements = payload_elements(&message.payload);
        let mut pushed = 0;
        loop {
            {
                let store = self.store.lock();
                pushed += self.drain_into_store(&store, message, &elements[pushed..])?;
            }
            if pushed == elements.len() || self.shutdown.is_set() {
                return Ok(pushed);
            }
            let _ = tokio::time::timeout(self.refresh, self.notify.notified()).await;
        }
    }

    /// Oldest message of `kind`, or the null message when the channel
    /// (after filtering) is empty. Does not remove anything.
    pub fn get_next(&self, kind: MessageType, module: &str, module_type: &str) -> Result<Message> {
        let mut found = self.get_next_n(kind, 1, module, module_type)?;
        Ok(match found.pop() {
            Some(message) => message,
            None => Message::null(kind, module, module_type),
        })
    }

    /// Up to `n` oldest messages of `kind`.
    pub fn get_next_n(
        &self,
        kind: MessageType,
        n: usize,
        module: &str,
        module_type: &str,
    ) -> Result<Vec<Message>> {
        let store = self.store.lock();
        store
            .peek(kind, n, module, module_type)?
            .into_iter()
            .map(|stored| decode_stored(kind, stored))
            .collect()
    }

    /// Cooperative peek: suspends until `n` messages are available for
    /// `kind` (or shutdown is requested, returning what exists).
    pub async fn get_next_n_awaitable(
        &self,
        kind: MessageType,
        n: usize,
        module: &str,
        module_type: &str,
    ) -> Result<Vec<Message>> {
        loop {
            {
                let store = self.store.lock();
                if store.count(kind, module, module_type)? >= n || self.shutdown.is_set() {
                    drop(store);
                    return self.get_next_n(kind, n, module, module_type);
                }
            }
            let _ = tokio::time::timeout(self.refresh, self.notify.notified()).await;
        }
    }

    /// Removes the oldest message of `kind`; false when there was
    /// nothing to remove.
    pub fn pop(&self, kind: MessageType, module: &str, module_type: &str) -> Result<bool> {
        Ok(self.pop_n(kind, 1, module, module_type)? > 0)
    }

    /// Removes up to `n` oldest messages of `kind`; returns how many
    /// were removed.
    pub fn pop_n(
        &self,
        kind: MessageType,
        n: usize,
        module: &str,
        module_type: &str,
    ) -> Result<usize> {
        let store = self.store.lock();
        let removed = store.remove(kind, n, module, module_type)?;
        if removed > 0 {
            debug!("popped {removed} message(s) from {}", kind.table_name());
            self.state_changed.notify_all();
            self.notify.notify_waiters();
        }
        Ok(removed)
    }

    pub fn is_empty(&self, kind: MessageType, module: &str, module_type: &str) -> Result<bool> {
        Ok(self.stored_items(kind, module, module_type)? == 0)
    }

    /// Whether a push would currently be refused.
    pub fn is_full(&self) -> Result<bool> {
        let store = self.store.lock();
        Ok(store.total()? >= self.capacity)
    }

    /// Queued items of `kind` matching the module filters.
    pub fn stored_items(&self, kind: MessageType, module: &str, module_type: &str) -> Result<usize> {
        let store = self.store.lock();
        store.count(kind, module, module_type)
    }

    /// Queued items of `kind`, unfiltered.
    pub fn size_per_type(&self, kind: MessageType) -> Result<usize> {
        self.stored_items(kind, "", "")
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Egress batching hint from configuration.
    pub fn batch_interval(&self) -> Duration {
        self.batch_interval
    }

    /// Inserts as many of `elements` as capacity allows, signalling
    /// waiters when anything went in. Must be called with the store
    /// lock held.
    fn drain_into_store(
        &self,
        store: &Storage,
        message: &Message,
        elements: &[&serde_json::Value],
    ) -> Result<usize> {
        let mut pushed = 0;
        while pushed < elements.len() && store.total()? < self.capacity {
            store.insert(
                message.kind,
                elements[pushed],
                &message.module_name,
                &message.module_type,
                &message.metadata,
            )?;
            pushed += 1;
        }
        if pushed > 0 {
            self.state_changed.notify_all();
            self.notify.notify_waiters();
        }
        Ok(pushed)
    }
}

fn payload_elements(payload: &serde_json::Value) -> Vec<&serde_json::Value> {
    match payload {
        serde_json::Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn decode_stored(kind: MessageType, stored: StoredMessage) -> Result<Message> {
    Ok(Message {
        kind,
        payload: serde_json::from_str(&stored.message)?,
        module_name: stored.module,
        module_type: stored.module_type,
        metadata: stored.metadata,
    })
}
