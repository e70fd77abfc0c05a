//! Message pipeline: telemetry in, actions out
//!
//! Consumes normalized sensor messages from a bounded channel and fans them
//! out to the counter and the rule book. One message is fully processed
//! before the next is taken, so the tables never see overlapping writers.
//! The pipeline also synthesizes room-transition actions when the official
//! count crosses zero, and carries the management surface used by the HTTP
//! API.

use crate::domain::action::{ActionKind, ActionRequest, Priority};
use crate::domain::message::{EventMessage, EventName, SensorMessage, StateMessage};
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::EgressSender;
use crate::services::counter::{CountChange, CounterStatistics, OccupancyCounter, SensorCount};
use crate::services::dispatcher::ActionDispatcher;
use crate::services::rules::{EventRule, RuleBook};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Snapshot served by the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub counter: CounterStatistics,
    pub queue_len: usize,
    pub sensors: Vec<SensorCount>,
}

pub struct Pipeline {
    counter: Arc<OccupancyCounter>,
    rules: Arc<RuleBook>,
    dispatcher: Arc<ActionDispatcher>,
    egress: Option<EgressSender>,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        counter: Arc<OccupancyCounter>,
        rules: Arc<RuleBook>,
        dispatcher: Arc<ActionDispatcher>,
        egress: Option<EgressSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { counter, rules, dispatcher, egress, metrics }
    }

    /// Process messages until the channel closes or shutdown is signalled
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<SensorMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("pipeline_started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("pipeline_shutdown");
                        return;
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => self.handle(msg),
                        None => {
                            info!("pipeline_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Process one message to completion
    pub fn handle(&self, msg: SensorMessage) {
        match msg {
            SensorMessage::State(state) => self.handle_state(state),
            SensorMessage::Event(event) => self.handle_event(event),
        }
    }

    fn handle_state(&self, state: StateMessage) {
        self.metrics.record_state_processed();
        self.rules.record_state(&state);

        if let Some(change) = self.counter.ingest(&state) {
            self.metrics.record_count_change();
            if let Some(egress) = &self.egress {
                egress.send_occupancy(&change);
            }
            self.synthesize_transition(&change);
        }
    }

    /// Emit a CUSTOM action when the room flips between empty and occupied.
    /// Transitions that stay on one side of zero synthesize nothing.
    fn synthesize_transition(&self, change: &CountChange) {
        if change.previous == 0 && change.current > 0 {
            debug!(count = %change.current, "room_occupied");
            self.dispatcher.submit(ActionRequest::new(
                ActionKind::Custom,
                json!({"event": "room_occupied", "count": change.current}),
                Priority::Normal,
            ));
        } else if change.previous > 0 && change.current == 0 {
            debug!("room_empty");
            self.dispatcher.submit(ActionRequest::new(
                ActionKind::Custom,
                json!({"event": "room_empty"}),
                Priority::Normal,
            ));
        }
    }

    fn handle_event(&self, event: EventMessage) {
        self.metrics.record_event_processed();
        // One event's actions enter the queue as a single batch so HIGH
        // priority holds against the concurrently running drain.
        self.dispatcher.submit_all(self.rules.process(&event));
    }

    // Management surface, used by the HTTP API

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            counter: self.counter.statistics(),
            queue_len: self.dispatcher.queue_len(),
            sensors: self.counter.sensor_counts(),
        }
    }

    pub fn latest_state(&self, sensor_id: &str) -> Option<StateMessage> {
        self.rules.latest_state(sensor_id)
    }

    pub fn state_history(&self, sensor_id: &str, limit: Option<usize>) -> Vec<StateMessage> {
        self.rules.state_history(sensor_id, limit)
    }

    pub fn all_latest_states(&self) -> Vec<StateMessage> {
        self.rules.all_latest()
    }

    pub fn count_history(&self, limit: Option<usize>) -> Vec<crate::services::counter::CountSample> {
        self.counter.history(limit)
    }

    pub fn add_rule(&self, event: EventName, rule: EventRule) {
        self.rules.add_rule(event, rule);
    }

    pub fn remove_rule(&self, event: EventName, index: usize) -> bool {
        self.rules.remove_rule(event, index)
    }

    pub fn rule_labels(&self) -> Vec<(EventName, Vec<String>)> {
        self.rules.rule_labels()
    }

    pub fn clear_state_history(&self, sensor_id: Option<&str>) {
        self.rules.clear_history(sensor_id);
    }

    pub fn reset_counter(&self) {
        self.counter.reset();
    }

    pub fn clear_queue(&self) -> usize {
        self.dispatcher.clear_queue()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
