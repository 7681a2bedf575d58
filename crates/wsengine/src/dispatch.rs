//! Keyed task offloading.
//!
//! Message callbacks run inside the connection's read path and must not block.
//! [`ShardedDispatcher`] moves work to a fixed set of worker tasks instead. The
//! shard is chosen by hashing a key (FNV-1a), so tasks sharing a key run one
//! after another in submission order while different keys spread across
//! workers.
//!
//! Submission never waits. A full shard rejects the task with
//! [`DispatchError::Full`] and the caller decides what to drop.

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    assemble::Message,
    context::ConnectionId,
    server::{MessageHandler, Responder},
};

/// Error type returned by dispatched tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Task = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// Errors returned when submitting a task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The shard's queue is at capacity.
    #[error("{name}: shard {shard} is full")]
    Full { name: Arc<str>, shard: usize },

    /// The shard's worker has stopped.
    #[error("{name}: shard {shard} is closed")]
    Closed { name: Arc<str>, shard: usize },
}

/// 32-bit FNV-1a hash.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    bytes.iter().fold(OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(PRIME)
    })
}

/// A pool of worker tasks, one bounded queue each.
pub struct ShardedDispatcher {
    name: Arc<str>,
    shards: Vec<mpsc::Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl fmt::Debug for ShardedDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedDispatcher")
            .field("name", &self.name)
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl ShardedDispatcher {
    /// Spawns `shards` workers with queues of `capacity` tasks.
    ///
    /// Must be called from within a tokio runtime. Zero values are raised to one.
    pub fn new(name: impl Into<Arc<str>>, shards: usize, capacity: usize) -> Self {
        let name = name.into();
        let (senders, workers) = (0..shards.max(1))
            .map(|shard| {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                let worker = tokio::spawn(run_worker(Arc::clone(&name), shard, rx));
                (tx, worker)
            })
            .unzip();

        Self {
            name,
            shards: senders,
            workers,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The shard tasks submitted under `key` run on.
    pub fn shard_for(&self, key: &[u8]) -> usize {
        fnv1a(key) as usize % self.shards.len()
    }

    /// Queues `task` on the shard owning `key` without waiting.
    pub fn dispatch<K, F, E>(&self, key: K, task: F) -> Result<(), DispatchError>
    where
        K: AsRef<[u8]>,
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let shard = self.shard_for(key.as_ref());
        let task: Task = Box::pin(async move { task.await.map_err(Into::into) });

        match self.shards[shard].try_send(task) {
            Ok(()) => {
                tracing::trace!(name = %self.name, shard, "task queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(DispatchError::Full {
                name: Arc::clone(&self.name),
                shard,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed {
                name: Arc::clone(&self.name),
                shard,
            }),
        }
    }

    /// Stops accepting tasks and waits until every queued task has run.
    pub async fn shutdown(self) {
        drop(self.shards);
        for worker in self.workers {
            if let Err(err) = worker.await {
                tracing::warn!(name = %self.name, error = %err, "dispatch worker panicked");
            }
        }
    }
}

async fn run_worker(name: Arc<str>, shard: usize, mut rx: mpsc::Receiver<Task>) {
    while let Some(task) = rx.recv().await {
        if let Err(err) = task.await {
            tracing::warn!(name = %name, shard, error = %err, "dispatched task failed");
        }
    }
    tracing::debug!(name = %name, shard, "dispatch worker stopped");
}

/// [`MessageHandler`] that runs an async job per message on a
/// [`ShardedDispatcher`], keyed by connection so each connection's messages
/// are handled in order.
///
/// Messages arriving while the connection's shard is full are dropped with a
/// warning.
pub struct DispatchHandler<F> {
    dispatcher: ShardedDispatcher,
    job: F,
}

impl<F> DispatchHandler<F> {
    pub fn new(dispatcher: ShardedDispatcher, job: F) -> Self {
        Self { dispatcher, job }
    }

    #[inline]
    pub fn dispatcher(&self) -> &ShardedDispatcher {
        &self.dispatcher
    }

    pub fn into_dispatcher(self) -> ShardedDispatcher {
        self.dispatcher
    }
}

impl<F, Fut, E> MessageHandler for DispatchHandler<F>
where
    F: Fn(ConnectionId, Message, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn on_message(&self, id: ConnectionId, message: Message, responder: &Responder) {
        let job = (self.job)(id, message, responder.clone());
        if let Err(err) = self.dispatcher.dispatch(id.0.to_be_bytes(), job) {
            tracing::warn!(conn = %id, error = %err, "dropping message");
        }
    }
}
