//! Serialized key-press execution
//!
//! Exactly one worker drains the queue: concurrent key injection would race
//! and corrupt input timing in the receiving application. The fixed pause
//! between presses paces synthetic input and avoids input-buffer overruns.

use crate::capture::KeyInjector;
use log::info;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// FIFO of pending key tokens with atomic batch enqueue and atomic clear.
///
/// Cloning is cheap and shares the underlying queue; the evaluator enqueues
/// while the worker dequeues.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    tokens: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tokens: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Appends a whole batch under one lock: either every token in the
    /// batch becomes pending, or (if the caller bails first) none do.
    pub async fn enqueue_batch(&self, tokens: &[String]) {
        if tokens.is_empty() {
            return;
        }
        {
            let mut queue = self.inner.tokens.lock().await;
            for token in tokens {
                queue.push_back(token.clone());
            }
        }
        self.inner.notify.notify_one();
    }

    pub async fn pop(&self) -> Option<String> {
        self.inner.tokens.lock().await.pop_front()
    }

    /// Discards every not-yet-dequeued token and returns how many were
    /// dropped. A token the worker already pulled still executes; clear
    /// affects only pending ones.
    pub async fn clear(&self) -> usize {
        let mut queue = self.inner.tokens.lock().await;
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub async fn len(&self) -> usize {
        self.inner.tokens.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.tokens.lock().await.is_empty()
    }

    async fn wait_for_work(&self) {
        self.inner.notify.notified().await;
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the single consumer task. For each dequeued token: inject, then
/// sleep `delay` before looking at the queue again.
pub fn spawn_worker(
    queue: ActionQueue,
    injector: Arc<dyn KeyInjector>,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Action dispatcher started");
        loop {
            match queue.pop().await {
                Some(key) => {
                    injector.press(&key);
                    sleep(delay).await;
                }
                None => queue.wait_for_work().await,
            }
        }
    })
}
