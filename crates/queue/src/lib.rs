//! Durable, bounded, multi-channel work queue.
//!
//! Each message kind ([`MessageType`]) is its own FIFO channel,
//! persisted as one table of an embedded database so that undelivered
//! messages survive a restart (at-least-once: a message stays queued
//! until an explicit pop). Total capacity across channels is bounded;
//! producers choose between non-blocking, blocking and cooperative
//! (`async`) push, and consumers mirror that on the peek side.

mod config;
mod error;
mod message;
mod queue;
mod shutdown;
mod store;

pub use config::{
    QueueConfig, BATCH_INTERVAL_MAX_MS, BATCH_INTERVAL_MIN_MS, DEFAULT_BATCH_INTERVAL_MS,
    DEFAULT_QUEUE_SIZE, DEFAULT_STATUS_REFRESH_MS, QUEUE_SIZE_MAX, QUEUE_SIZE_MIN,
};
pub use error::QueueError;
pub use message::{Message, MessageType};
pub use queue::MultiTypeQueue;
pub use shutdown::ShutdownSignal;

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
