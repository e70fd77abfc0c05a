//! End-to-end pipeline tests: sensor messages in, actions and egress out

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use roomcast::domain::action::{ActionKind, AudioPlayCommand, Priority, VideoPlayCommand};
use roomcast::domain::message::{CameraEvent, EventMessage, EventName, SensorMessage, StateData, StateMessage};
use roomcast::infra::Metrics;
use roomcast::io::egress_channel::{create_egress_channel, EgressMessage, EgressSender};
use roomcast::services::counter::OccupancyCounter;
use roomcast::services::dispatcher::{ActionDispatcher, DispatchOutcome, MediaPlayer};
use roomcast::services::rules::{ActionTemplate, EventRule};
use roomcast::services::{Pipeline, RuleBook};
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, watch};

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

fn state(sensor: &str, count: i64) -> SensorMessage {
    SensorMessage::State(StateMessage {
        camera_id: sensor.to_string(),
        timestamp: now_ms(),
        data: StateData { person_count: count, people: Vec::new() },
    })
}

fn event(sensor: &str, name: EventName) -> SensorMessage {
    SensorMessage::Event(EventMessage {
        camera_id: sensor.to_string(),
        timestamp: now_ms(),
        event: CameraEvent { name, command_request: None },
    })
}

/// Records every actuator call in order; optionally fails on one id
struct RecordingPlayer {
    calls: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl RecordingPlayer {
    fn new() -> Arc<Self> {
        Arc::new(Self { calls: Mutex::new(Vec::new()), fail_on: None })
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
        self.calls.lock().push(format!("video:{}", cmd.video_id));
        Ok(())
    }

    async fn play_audio(&self, cmd: AudioPlayCommand) -> Result<()> {
        let id = cmd.audio_id.or(cmd.text).unwrap_or_default();
        if self.fail_on.as_deref() == Some(id.as_str()) {
            bail!("player unavailable");
        }
        self.calls.lock().push(format!("audio:{id}"));
        Ok(())
    }
}

struct Harness {
    player: Arc<RecordingPlayer>,
    pipeline: Arc<Pipeline>,
    msg_tx: mpsc::Sender<SensorMessage>,
    outcomes: broadcast::Receiver<DispatchOutcome>,
    shutdown_tx: watch::Sender<bool>,
}

/// Wire up the full processing graph the way main does, minus MQTT
fn harness(egress: Option<EgressSender>, quorum: usize) -> Harness {
    let metrics = Arc::new(Metrics::new());
    let player = RecordingPlayer::new();
    let dispatcher =
        Arc::new(ActionDispatcher::new(player.clone(), egress.clone(), metrics.clone()));
    let outcomes = dispatcher.subscribe();
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(OccupancyCounter::new(quorum, 30_000)),
        Arc::new(RuleBook::with_defaults()),
        dispatcher.clone(),
        egress,
        metrics,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(dispatcher.run(shutdown_rx.clone()));

    let (msg_tx, msg_rx) = mpsc::channel(64);
    let run_pipeline = pipeline.clone();
    tokio::spawn(async move {
        run_pipeline.run(msg_rx, shutdown_rx).await;
    });

    Harness { player, pipeline, msg_tx, outcomes, shutdown_tx }
}

async fn next_outcome(rx: &mut broadcast::Receiver<DispatchOutcome>) -> DispatchOutcome {
    tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for outcome")
        .expect("outcome channel closed")
}

#[tokio::test]
async fn test_event_triggers_default_rule_action() {
    let mut h = harness(None, 3);

    h.msg_tx.send(event("cam1", EventName::SittingConfirmed)).await.unwrap();

    let DispatchOutcome::Completed(action) = next_outcome(&mut h.outcomes).await else {
        panic!("expected completed action");
    };
    assert_eq!(action.payload["videoId"], "welcome_video");
    assert_eq!(h.player.calls(), vec!["video:welcome_video"]);

    let _ = h.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_occupancy_transitions_reach_egress() {
    let (egress, mut egress_rx) = create_egress_channel(64, "it-site".to_string());
    let h = harness(Some(egress), 3);

    // Empty -> occupied
    h.msg_tx.send(state("cam1", 2)).await.unwrap();

    let Some(EgressMessage::Occupancy(occ)) = egress_rx.recv().await else {
        panic!("expected occupancy message");
    };
    assert_eq!(occ.previous, 0);
    assert_eq!(occ.current, 2);

    // The synthesized room_occupied CUSTOM action follows through the
    // dispatcher onto the same channel.
    let mut saw_custom = false;
    for _ in 0..2 {
        match egress_rx.recv().await {
            Some(EgressMessage::Custom(custom)) => {
                assert_eq!(custom.payload["event"], "room_occupied");
                assert_eq!(custom.payload["count"], 2);
                saw_custom = true;
            }
            Some(EgressMessage::Outcome(outcome)) => {
                assert_eq!(outcome.status, "completed");
            }
            other => panic!("unexpected egress message: {other:?}"),
        }
    }
    assert!(saw_custom);

    // Occupied -> empty
    h.msg_tx.send(state("cam1", 0)).await.unwrap();

    let Some(EgressMessage::Occupancy(occ)) = egress_rx.recv().await else {
        panic!("expected occupancy message");
    };
    assert_eq!(occ.current, 0);

    let mut saw_empty = false;
    for _ in 0..2 {
        match egress_rx.recv().await {
            Some(EgressMessage::Custom(custom)) => {
                assert_eq!(custom.payload["event"], "room_empty");
                saw_empty = true;
            }
            Some(EgressMessage::Outcome(_)) => {}
            other => panic!("unexpected egress message: {other:?}"),
        }
    }
    assert!(saw_empty);

    let _ = h.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_event_burst_keeps_priority_against_live_drain() {
    let mut h = harness(None, 3);

    // A rule emitting NORMAL then HIGH; the HIGH action must execute first
    // even though the drain task has been running since harness setup.
    h.pipeline.add_rule(
        EventName::PersonStoodUp,
        EventRule::new(
            "farewell_pair",
            vec![
                ActionTemplate {
                    kind: ActionKind::VideoPlay,
                    payload: json!({"videoId": "credits"}),
                    priority: Priority::Normal,
                },
                ActionTemplate {
                    kind: ActionKind::VideoPlay,
                    payload: json!({"videoId": "goodbye"}),
                    priority: Priority::High,
                },
            ],
        ),
    );

    h.msg_tx.send(event("cam1", EventName::PersonStoodUp)).await.unwrap();

    let _ = next_outcome(&mut h.outcomes).await;
    let _ = next_outcome(&mut h.outcomes).await;
    assert_eq!(h.player.calls(), vec!["video:goodbye", "video:credits"]);

    let _ = h.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_multi_sensor_majority_vote() {
    let mut h = harness(None, 3);

    h.msg_tx.send(state("cam1", 4)).await.unwrap();
    h.msg_tx.send(state("cam2", 4)).await.unwrap();
    h.msg_tx.send(state("cam3", 2)).await.unwrap();
    h.msg_tx.send(event("cam1", EventName::PersonEntered)).await.unwrap();

    // Two outcomes are due: the room_occupied synthesis from the first
    // state and the greeting audio. The audio is submitted only after the
    // third state was handled, so both outcomes mean all states landed.
    let _ = next_outcome(&mut h.outcomes).await;
    let _ = next_outcome(&mut h.outcomes).await;

    let stats = h.pipeline.stats();
    assert_eq!(stats.counter.official_count, 4, "majority of [4, 4, 2]");
    assert_eq!(stats.counter.active_sensors, 3);

    let _ = h.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_command_request_flows_to_custom_egress() {
    let (egress, mut egress_rx) = create_egress_channel(64, "it-site".to_string());
    let h = harness(Some(egress), 3);

    h.msg_tx
        .send(SensorMessage::Event(EventMessage {
            camera_id: "cam2".to_string(),
            timestamp: now_ms(),
            event: CameraEvent {
                name: EventName::PersonStoodUp,
                command_request: Some("spotlight_on".to_string()),
            },
        }))
        .await
        .unwrap();

    let Some(EgressMessage::Custom(custom)) = egress_rx.recv().await else {
        panic!("expected custom message");
    };
    assert_eq!(custom.payload["command"], "spotlight_on");
    assert_eq!(custom.payload["source"], "cam2");
    assert_eq!(custom.site.as_deref(), Some("it-site"));

    let _ = h.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_state_history_served_by_management_surface() {
    let mut h = harness(None, 3);

    h.msg_tx.send(state("cam1", 1)).await.unwrap();
    h.msg_tx.send(state("cam1", 2)).await.unwrap();
    h.msg_tx.send(event("cam1", EventName::PersonEntered)).await.unwrap();

    // Two outcomes are due (room_occupied synthesis and greeting audio,
    // in either order); both landing means every message was processed.
    let _ = next_outcome(&mut h.outcomes).await;
    let _ = next_outcome(&mut h.outcomes).await;

    let history = h.pipeline.state_history("cam1", None);
    assert_eq!(history.len(), 2);
    assert_eq!(h.pipeline.latest_state("cam1").unwrap().data.person_count, 2);

    let _ = h.shutdown_tx.send(true);
}
