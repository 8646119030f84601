//! Proximity evaluation: the cooldown-gated trigger that turns peer
//! positions into buff key batches.

use crate::dispatcher::ActionQueue;
use log::info;
use shared::{
    within_proximity, Position, BUFF_COOLDOWN_SECS, EVAL_INTERVAL_MS, PROXIMITY_THRESHOLD,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// The client's cached view of the world: its own latest detected position
/// and the peer positions from the most recent relay snapshot.
///
/// Snapshots replace the peer map wholesale; there is no per-peer merging,
/// so the view is always a complete state from some point in relay history.
#[derive(Clone)]
pub struct PeerView {
    inner: Arc<RwLock<ViewInner>>,
}

#[derive(Default)]
struct ViewInner {
    my_id: Option<u32>,
    my_position: Option<Position>,
    peers: HashMap<u32, Position>,
}

impl PeerView {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ViewInner::default())),
        }
    }

    pub async fn set_my_id(&self, id: u32) {
        self.inner.write().await.my_id = Some(id);
    }

    pub async fn my_id(&self) -> Option<u32> {
        self.inner.read().await.my_id
    }

    pub async fn set_my_position(&self, pos: Position) {
        self.inner.write().await.my_position = Some(pos);
    }

    pub async fn my_position(&self) -> Option<Position> {
        self.inner.read().await.my_position
    }

    /// Atomically replaces the cached peer map with a fresh snapshot.
    pub async fn replace_peers(&self, peers: HashMap<u32, Position>) {
        self.inner.write().await.peers = peers;
    }

    /// Drops all cached peers. Called on disconnect so stale positions
    /// cannot keep triggering buffs while the relay is unreachable.
    pub async fn clear_peers(&self) {
        self.inner.write().await.peers.clear();
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.read().await.peers.len()
    }

    /// Copies out what one evaluation cycle needs, releasing the lock
    /// before any distance math happens. Our own relay echo is excluded by
    /// id; the zero-distance check downstream stays as a fallback for the
    /// window before the id is known.
    pub async fn proximity_inputs(&self) -> (Option<Position>, Vec<Position>) {
        let view = self.inner.read().await;
        let peers = view
            .peers
            .iter()
            .filter(|(id, _)| Some(**id) != view.my_id)
            .map(|(_, pos)| *pos)
            .collect();
        (view.my_position, peers)
    }
}

impl Default for PeerView {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StartError {
    /// Evaluator is already armed; callers must stop it first.
    AlreadyRunning,
    /// Key list was empty or contained blank entries.
    InvalidKeys,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// Informational, not an error: stop on an idle evaluator is a no-op.
    AlreadyIdle,
}

struct EvalState {
    running: bool,
    keys: Vec<String>,
    /// None doubles as the "trigger immediately" sentinel after start().
    last_trigger: Option<Instant>,
}

impl EvalState {
    fn cooldown_elapsed(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_trigger {
            None => true,
            Some(at) => now.duration_since(at) >= cooldown,
        }
    }
}

/// Periodic decision loop: when armed, fires the configured key batch
/// whenever any peer is within the proximity threshold, at most once per
/// cooldown window.
pub struct ProximityEvaluator {
    state: Mutex<EvalState>,
    queue: ActionQueue,
    threshold: f32,
    cooldown: Duration,
}

impl ProximityEvaluator {
    pub fn new(queue: ActionQueue, threshold: f32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(EvalState {
                running: false,
                keys: Vec::new(),
                last_trigger: None,
            }),
            queue,
            threshold,
            cooldown,
        }
    }

    pub fn with_defaults(queue: ActionQueue) -> Self {
        Self::new(
            queue,
            PROXIMITY_THRESHOLD,
            Duration::from_secs(BUFF_COOLDOWN_SECS),
        )
    }

    /// Arms the evaluator with an ordered buff key sequence. Resets the
    /// cooldown so the first eligible cycle may trigger immediately.
    pub async fn start(&self, keys: Vec<String>) -> Result<(), StartError> {
        if keys.is_empty() || keys.iter().any(|k| k.trim().is_empty()) {
            return Err(StartError::InvalidKeys);
        }

        let mut state = self.state.lock().await;
        if state.running {
            return Err(StartError::AlreadyRunning);
        }

        info!("Proximity evaluator armed with keys {:?}", keys);
        state.running = true;
        state.keys = keys;
        state.last_trigger = None;
        Ok(())
    }

    /// Disarms the evaluator, clears the configured keys, and flushes
    /// pending (not yet dispatched) actions. After this returns, no new
    /// trigger can occur; a key already pulled by the dispatcher still
    /// finishes.
    pub async fn stop(&self) -> StopOutcome {
        {
            let mut state = self.state.lock().await;
            if !state.running {
                return StopOutcome::AlreadyIdle;
            }
            state.running = false;
            state.keys.clear();
        }

        let dropped = self.queue.clear().await;
        info!("Proximity evaluator stopped, {} pending actions flushed", dropped);
        StopOutcome::Stopped
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// One evaluation cycle against explicit inputs and clock. Returns true
    /// when a batch was enqueued.
    ///
    /// The cheap precondition copy happens under the lock, the distance
    /// scan outside it, and then preconditions are re-checked before the
    /// batch is committed: the enqueue and the `last_trigger` stamp are one
    /// atomic step, so a concurrent stop() can never see a partial trigger
    /// and two close cycles can never both pass the cooldown gate.
    pub async fn evaluate_at(
        &self,
        now: Instant,
        my_pos: Option<Position>,
        peers: &[Position],
    ) -> bool {
        let my_pos = match my_pos {
            Some(pos) => pos,
            None => return false,
        };
        if peers.is_empty() {
            return false;
        }

        {
            let state = self.state.lock().await;
            if !state.running
                || state.keys.is_empty()
                || !state.cooldown_elapsed(now, self.cooldown)
            {
                return false;
            }
        }

        let near = peers
            .iter()
            .any(|peer| within_proximity(&my_pos, peer, self.threshold));
        if !near {
            return false;
        }

        let mut state = self.state.lock().await;
        if !state.running || state.keys.is_empty() || !state.cooldown_elapsed(now, self.cooldown) {
            return false;
        }

        info!("Peer within proximity, dispatching {} buff keys", state.keys.len());
        self.queue.enqueue_batch(&state.keys).await;
        state.last_trigger = Some(now);
        true
    }

    /// Spawns the poll loop over the shared peer view.
    pub fn spawn(self: Arc<Self>, view: PeerView) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(EVAL_INTERVAL_MS));
            loop {
                interval.tick().await;
                let (my_pos, peers) = view.proximity_inputs().await;
                self.evaluate_at(Instant::now(), my_pos, &peers).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    fn evaluator() -> ProximityEvaluator {
        ProximityEvaluator::with_defaults(ActionQueue::new())
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_keys() {
        let eval = evaluator();
        assert_eq!(eval.start(vec![]).await, Err(StartError::InvalidKeys));
        assert_eq!(
            eval.start(keys(&["alt+1", "  "])).await,
            Err(StartError::InvalidKeys)
        );
        assert!(!eval.is_running().await);
    }

    #[tokio::test]
    async fn test_start_while_running_is_an_error() {
        let eval = evaluator();
        assert!(eval.start(keys(&["alt+1"])).await.is_ok());
        assert_eq!(
            eval.start(keys(&["alt+2"])).await,
            Err(StartError::AlreadyRunning)
        );

        // Original sequence is untouched by the failed start
        assert!(eval.is_running().await);
        let triggered = eval
            .evaluate_at(
                Instant::now(),
                Some(Position::new(0.0, 0.0)),
                &[Position::new(5.0, 0.0)],
            )
            .await;
        assert!(triggered);
        assert_eq!(eval.queue.pop().await.as_deref(), Some("alt+1"));
        assert_eq!(eval.queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_stop_idempotence() {
        let eval = evaluator();
        eval.start(keys(&["alt+1"])).await.unwrap();

        assert_eq!(eval.stop().await, StopOutcome::Stopped);
        assert_eq!(eval.stop().await, StopOutcome::AlreadyIdle);
        assert!(!eval.is_running().await);
    }

    #[tokio::test]
    async fn test_no_trigger_without_preconditions() {
        let eval = evaluator();
        let now = Instant::now();
        let me = Position::new(0.0, 0.0);
        let near = Position::new(5.0, 0.0);

        // Not running
        assert!(!eval.evaluate_at(now, Some(me), &[near]).await);

        eval.start(keys(&["alt+1"])).await.unwrap();
        // No local position
        assert!(!eval.evaluate_at(now, None, &[near]).await);
        // No peers
        assert!(!eval.evaluate_at(now, Some(me), &[]).await);
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let eval = ProximityEvaluator::new(
            ActionQueue::new(),
            PROXIMITY_THRESHOLD,
            Duration::from_secs(0),
        );
        eval.start(keys(&["alt+1"])).await.unwrap();
        let me = Position::new(0.0, 0.0);
        let now = Instant::now();

        // Exactly at the threshold: no trigger
        assert!(
            !eval
                .evaluate_at(now, Some(me), &[Position::new(PROXIMITY_THRESHOLD, 0.0)])
                .await
        );
        // Zero distance is a self echo: no trigger
        assert!(!eval.evaluate_at(now, Some(me), &[me]).await);
        // Strictly inside: trigger
        assert!(
            eval.evaluate_at(now, Some(me), &[Position::new(34.9, 0.0)])
                .await
        );
    }

    #[tokio::test]
    async fn test_cooldown_allows_exactly_one_trigger() {
        let eval = evaluator();
        eval.start(keys(&["alt+1", "alt+2"])).await.unwrap();

        let me = Position::new(100.0, 100.0);
        let peer = Position::new(110.0, 105.0);
        let t0 = Instant::now();

        assert!(eval.evaluate_at(t0, Some(me), &[peer]).await);
        // Within the cooldown window: skipped entirely
        assert!(!eval.evaluate_at(t0 + Duration::from_secs(1), Some(me), &[peer]).await);
        assert!(!eval.evaluate_at(t0 + Duration::from_secs(9), Some(me), &[peer]).await);
        // Exactly one batch in the queue
        assert_eq!(eval.queue.len().await, 2);

        // After the cooldown: eligible again
        assert!(
            eval.evaluate_at(t0 + Duration::from_secs(10), Some(me), &[peer])
                .await
        );
        assert_eq!(eval.queue.len().await, 4);
    }

    #[tokio::test]
    async fn test_trigger_enqueues_whole_batch_in_order() {
        let eval = evaluator();
        eval.start(keys(&["alt+1", "alt+2", "alt+3"])).await.unwrap();

        let triggered = eval
            .evaluate_at(
                Instant::now(),
                Some(Position::new(0.0, 0.0)),
                &[Position::new(10.0, 10.0)],
            )
            .await;
        assert!(triggered);

        assert_eq!(eval.queue.pop().await.as_deref(), Some("alt+1"));
        assert_eq!(eval.queue.pop().await.as_deref(), Some("alt+2"));
        assert_eq!(eval.queue.pop().await.as_deref(), Some("alt+3"));
    }

    #[tokio::test]
    async fn test_stop_flushes_pending_queue() {
        let eval = evaluator();
        eval.start(keys(&["alt+1", "alt+2"])).await.unwrap();

        eval.evaluate_at(
            Instant::now(),
            Some(Position::new(0.0, 0.0)),
            &[Position::new(1.0, 1.0)],
        )
        .await;
        assert_eq!(eval.queue.len().await, 2);

        assert_eq!(eval.stop().await, StopOutcome::Stopped);
        assert!(eval.queue.is_empty().await);

        // No new trigger after stop returns
        assert!(
            !eval
                .evaluate_at(
                    Instant::now() + Duration::from_secs(60),
                    Some(Position::new(0.0, 0.0)),
                    &[Position::new(1.0, 1.0)],
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_restart_allows_immediate_trigger() {
        let eval = evaluator();
        let me = Position::new(0.0, 0.0);
        let peer = Position::new(5.0, 5.0);
        let t0 = Instant::now();

        eval.start(keys(&["alt+1"])).await.unwrap();
        assert!(eval.evaluate_at(t0, Some(me), &[peer]).await);

        eval.stop().await;
        eval.start(keys(&["alt+1"])).await.unwrap();

        // last_trigger was reset by start: no cooldown carryover
        assert!(eval.evaluate_at(t0 + Duration::from_secs(1), Some(me), &[peer]).await);
    }

    #[tokio::test]
    async fn test_peer_view_excludes_own_echo_by_id() {
        let view = PeerView::new();
        view.set_my_id(7).await;
        view.set_my_position(Position::new(100.0, 100.0)).await;

        let mut peers = HashMap::new();
        // Our own relay entry lags slightly behind the live position, so
        // the zero-distance check alone would not catch it
        peers.insert(7, Position::new(98.0, 99.0));
        peers.insert(8, Position::new(110.0, 105.0));
        view.replace_peers(peers).await;

        let (_, positions) = view.proximity_inputs().await;
        assert_eq!(positions, vec![Position::new(110.0, 105.0)]);
    }

    #[tokio::test]
    async fn test_peer_view_replace_and_clear() {
        let view = PeerView::new();
        let mut peers = HashMap::new();
        peers.insert(1, Position::new(1.0, 2.0));
        peers.insert(2, Position::new(3.0, 4.0));

        view.replace_peers(peers).await;
        assert_eq!(view.peer_count().await, 2);

        let mut smaller = HashMap::new();
        smaller.insert(2, Position::new(5.0, 6.0));
        view.replace_peers(smaller).await;

        let (_, positions) = view.proximity_inputs().await;
        assert_eq!(positions, vec![Position::new(5.0, 6.0)]);

        view.clear_peers().await;
        assert_eq!(view.peer_count().await, 0);
    }
}
