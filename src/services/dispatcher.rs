//! Priority action queue and drain worker
//!
//! Actions are enqueued synchronously: HIGH priority goes to the front
//! (newest HIGH first), everything else to the back in submission order.
//! A single drain task pops one action at a time and executes it, so at
//! most one actuator call is in flight. A failed action is reported and
//! the drain moves on; there is no retry.

use crate::domain::action::{
    ActionKind, ActionRequest, AudioPlayCommand, Priority, VideoPlayCommand,
};
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::EgressSender;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, info, warn};

/// Capacity of the outcome broadcast channel
const OUTCOME_CHANNEL_SIZE: usize = 64;

/// Seam for the video/audio actuators. HTTP in production, recorded
/// in tests.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    async fn play_video(&self, cmd: VideoPlayCommand) -> Result<()>;
    async fn play_audio(&self, cmd: AudioPlayCommand) -> Result<()>;
}

/// Terminal result of one dispatched action
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Completed(ActionRequest),
    Failed { action: ActionRequest, error: String },
}

/// Two-tier action queue with a single background drain task
pub struct ActionDispatcher {
    queue: Mutex<VecDeque<ActionRequest>>,
    wake: Notify,
    player: Arc<dyn MediaPlayer>,
    egress: Option<EgressSender>,
    outcomes: broadcast::Sender<DispatchOutcome>,
    metrics: Arc<Metrics>,
}

impl ActionDispatcher {
    pub fn new(
        player: Arc<dyn MediaPlayer>,
        egress: Option<EgressSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_SIZE);
        Self {
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            player,
            egress,
            outcomes,
            metrics,
        }
    }

    /// Subscribe to dispatch outcomes. One message per executed action,
    /// success or failure.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.outcomes.subscribe()
    }

    /// Enqueue an action and wake the drain task. HIGH actions jump to the
    /// front of the queue; LOW and NORMAL keep submission order at the back.
    pub fn submit(&self, action: ActionRequest) {
        {
            let mut queue = self.queue.lock();
            Self::enqueue(&mut queue, action);
        }
        self.wake.notify_one();
    }

    /// Enqueue a burst of actions under one queue lock, then wake the drain
    /// once. The running drain cannot pop between two actions of the batch,
    /// so a HIGH action always ends up ahead of the batch's NORMAL and LOW
    /// ones no matter how submission races the drain.
    pub fn submit_all(&self, actions: Vec<ActionRequest>) {
        if actions.is_empty() {
            return;
        }
        {
            let mut queue = self.queue.lock();
            for action in actions {
                Self::enqueue(&mut queue, action);
            }
        }
        self.wake.notify_one();
    }

    fn enqueue(queue: &mut VecDeque<ActionRequest>, action: ActionRequest) {
        debug!(
            action_id = %action.id,
            kind = %action.kind.as_str(),
            queued = %queue.len(),
            "action_submitted"
        );
        match action.priority {
            Priority::High => queue.push_front(action),
            Priority::Normal | Priority::Low => queue.push_back(action),
        }
    }

    /// Discard all pending actions. An in-flight action is not interrupted.
    /// Returns the number of actions discarded.
    pub fn clear_queue(&self) -> usize {
        let mut queue = self.queue.lock();
        let discarded = queue.len();
        queue.clear();
        if discarded > 0 {
            info!(discarded = %discarded, "action_queue_cleared");
        }
        discarded
    }

    /// Current queue depth
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the drain task until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("action_dispatcher_started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(pending = %self.queue_len(), "action_dispatcher_shutdown");
                        return;
                    }
                }
                _ = self.wake.notified() => {
                    self.drain().await;
                }
            }
        }
    }

    /// Pop and execute actions until the queue is empty. The lock is held
    /// only for the pop, never across an actuator call.
    async fn drain(&self) {
        loop {
            let action = self.queue.lock().pop_front();
            let Some(action) = action else {
                return;
            };
            self.execute(action).await;
        }
    }

    async fn execute(&self, action: ActionRequest) {
        let result = self.perform(&action).await;
        match result {
            Ok(()) => {
                debug!(action_id = %action.id, kind = %action.kind.as_str(), "action_completed");
                self.metrics.record_action_completed();
                if let Some(egress) = &self.egress {
                    egress.send_outcome(&action, None);
                }
                let _ = self.outcomes.send(DispatchOutcome::Completed(action));
            }
            Err(e) => {
                let error = format!("{e:#}");
                warn!(action_id = %action.id, kind = %action.kind.as_str(), error = %error, "action_failed");
                self.metrics.record_action_failed();
                if let Some(egress) = &self.egress {
                    egress.send_outcome(&action, Some(&error));
                }
                let _ = self.outcomes.send(DispatchOutcome::Failed { action, error });
            }
        }
    }

    async fn perform(&self, action: &ActionRequest) -> Result<()> {
        match action.kind {
            ActionKind::VideoPlay => {
                let cmd: VideoPlayCommand = serde_json::from_value(action.payload.clone())
                    .context("invalid VIDEO_PLAY payload")?;
                self.player.play_video(cmd).await
            }
            ActionKind::AudioPlay => {
                let cmd: AudioPlayCommand = serde_json::from_value(action.payload.clone())
                    .context("invalid AUDIO_PLAY payload")?;
                self.player.play_audio(cmd).await
            }
            ActionKind::Custom => {
                match &self.egress {
                    Some(egress) => {
                        egress.send_custom(action);
                        Ok(())
                    }
                    // No broker configured: the action still completes, it
                    // just has no external audience.
                    None => {
                        debug!(action_id = %action.id, "custom_action_without_egress");
                        Ok(())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::egress_channel::{create_egress_channel, EgressMessage};
    use anyhow::bail;
    use serde_json::json;

    struct RecordingPlayer {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingPlayer {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: Mutex::new(Vec::new()), fail_on: None })
        }

        fn failing_on(id: &str) -> Arc<Self> {
            Arc::new(Self { calls: Mutex::new(Vec::new()), fail_on: Some(id.to_string()) })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl MediaPlayer for RecordingPlayer {
        async fn play_video(&self, cmd: VideoPlayCommand) -> Result<()> {
            if self.fail_on.as_deref() == Some(cmd.video_id.as_str()) {
                bail!("player unavailable");
            }
            self.calls.lock().push(cmd.video_id);
            Ok(())
        }

        async fn play_audio(&self, cmd: AudioPlayCommand) -> Result<()> {
            let id = cmd.audio_id.or(cmd.text).unwrap_or_default();
            if self.fail_on.as_deref() == Some(id.as_str()) {
                bail!("player unavailable");
            }
            self.calls.lock().push(id);
            Ok(())
        }
    }

    fn video(id: &str, priority: Priority) -> ActionRequest {
        ActionRequest::new(ActionKind::VideoPlay, json!({"videoId": id}), priority)
    }

    fn dispatcher(player: Arc<RecordingPlayer>) -> Arc<ActionDispatcher> {
        Arc::new(ActionDispatcher::new(player, None, Arc::new(Metrics::new())))
    }

    async fn collect_outcomes(
        rx: &mut broadcast::Receiver<DispatchOutcome>,
        n: usize,
    ) -> Vec<DispatchOutcome> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(rx.recv().await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_high_priority_jumps_queue() {
        let player = RecordingPlayer::new();
        let d = dispatcher(player.clone());
        let mut outcomes = d.subscribe();

        // All enqueued before the drain task starts
        d.submit(video("a", Priority::Normal));
        d.submit(video("b", Priority::High));
        d.submit(video("c", Priority::High));

        let (_tx, shutdown) = watch::channel(false);
        tokio::spawn(d.clone().run(shutdown));

        collect_outcomes(&mut outcomes, 3).await;
        assert_eq!(player.calls(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_burst_priority_holds_with_drain_running() {
        // The drain task is live before anything is submitted; a batch must
        // still come out HIGH-first because it enters under one lock.
        for _ in 0..100 {
            let player = RecordingPlayer::new();
            let d = dispatcher(player.clone());
            let mut outcomes = d.subscribe();

            let (shutdown_tx, shutdown) = watch::channel(false);
            tokio::spawn(d.clone().run(shutdown));

            d.submit_all(vec![video("a", Priority::Normal), video("b", Priority::High)]);

            collect_outcomes(&mut outcomes, 2).await;
            assert_eq!(player.calls(), vec!["b", "a"]);
            let _ = shutdown_tx.send(true);
        }
    }

    #[tokio::test]
    async fn test_empty_burst_is_a_noop() {
        let player = RecordingPlayer::new();
        let d = dispatcher(player);
        d.submit_all(Vec::new());
        assert_eq!(d.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_normal_and_low_keep_fifo_order() {
        let player = RecordingPlayer::new();
        let d = dispatcher(player.clone());
        let mut outcomes = d.subscribe();

        d.submit(video("a", Priority::Normal));
        d.submit(video("b", Priority::Low));
        d.submit(video("c", Priority::Normal));

        let (_tx, shutdown) = watch::channel(false);
        tokio::spawn(d.clone().run(shutdown));

        collect_outcomes(&mut outcomes, 3).await;
        assert_eq!(player.calls(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_drain() {
        let player = RecordingPlayer::failing_on("a");
        let d = dispatcher(player.clone());
        let mut outcomes = d.subscribe();

        d.submit(video("a", Priority::Normal));
        d.submit(video("b", Priority::Normal));

        let (_tx, shutdown) = watch::channel(false);
        tokio::spawn(d.clone().run(shutdown));

        let results = collect_outcomes(&mut outcomes, 2).await;
        assert!(matches!(&results[0], DispatchOutcome::Failed { error, .. } if error.contains("player unavailable")));
        assert!(matches!(&results[1], DispatchOutcome::Completed(a) if a.payload["videoId"] == "b"));
        assert_eq!(player.calls(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_failed_action() {
        let player = RecordingPlayer::new();
        let d = dispatcher(player.clone());
        let mut outcomes = d.subscribe();

        d.submit(ActionRequest::new(ActionKind::VideoPlay, json!({}), Priority::Normal));
        d.submit(video("ok", Priority::Normal));

        let (_tx, shutdown) = watch::channel(false);
        tokio::spawn(d.clone().run(shutdown));

        let results = collect_outcomes(&mut outcomes, 2).await;
        assert!(matches!(&results[0], DispatchOutcome::Failed { error, .. } if error.contains("VIDEO_PLAY")));
        assert_eq!(player.calls(), vec!["ok"], "player never sees the malformed action");
    }

    #[tokio::test]
    async fn test_custom_action_goes_to_egress() {
        let (egress, mut egress_rx) = create_egress_channel(16, "site1".to_string());
        let player = RecordingPlayer::new();
        let d = Arc::new(ActionDispatcher::new(player, Some(egress), Arc::new(Metrics::new())));
        let mut outcomes = d.subscribe();

        d.submit(ActionRequest::new(
            ActionKind::Custom,
            json!({"command": "lights_on"}),
            Priority::Normal,
        ));

        let (_tx, shutdown) = watch::channel(false);
        tokio::spawn(d.clone().run(shutdown));

        let results = collect_outcomes(&mut outcomes, 1).await;
        assert!(matches!(&results[0], DispatchOutcome::Completed(_)));

        let Some(EgressMessage::Custom(payload)) = egress_rx.recv().await else {
            panic!("expected custom egress message");
        };
        assert_eq!(payload.payload["command"], "lights_on");
        assert_eq!(payload.site.as_deref(), Some("site1"));

        // Outcome notification follows on the same channel
        let Some(EgressMessage::Outcome(outcome)) = egress_rx.recv().await else {
            panic!("expected outcome egress message");
        };
        assert_eq!(outcome.status, "completed");
    }

    #[tokio::test]
    async fn test_clear_queue_discards_pending() {
        let player = RecordingPlayer::new();
        let d = dispatcher(player);

        d.submit(video("a", Priority::Normal));
        d.submit(video("b", Priority::High));
        d.submit(video("c", Priority::Normal));
        assert_eq!(d.queue_len(), 3);

        assert_eq!(d.clear_queue(), 3);
        assert_eq!(d.queue_len(), 0);
    }
}
