//! Event rule registry
//!
//! Maps camera events to outbound actions. Rules are registered per event
//! name and evaluated in registration order; each rule carries an optional
//! predicate and an ordered list of action templates. The book also keeps a
//! short per-sensor history of raw state messages for the management API.

use crate::domain::action::{ActionKind, ActionRequest, Priority};
use crate::domain::message::{EventMessage, EventName, StateMessage};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Raw state messages kept per sensor
const MAX_STATE_HISTORY: usize = 100;

/// Predicate deciding whether a rule applies to a given event. Fallible:
/// an `Err` skips that rule only and evaluation moves on.
pub type RulePredicate = Box<dyn Fn(&EventMessage) -> anyhow::Result<bool> + Send + Sync>;

/// One action produced by a rule. A fresh id is minted per emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTemplate {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
}

impl ActionTemplate {
    fn instantiate(&self) -> ActionRequest {
        ActionRequest::new(self.kind, self.payload.clone(), self.priority)
    }
}

/// A registered rule: label for logs, optional predicate, actions in order
pub struct EventRule {
    pub label: String,
    pub predicate: Option<RulePredicate>,
    pub actions: Vec<ActionTemplate>,
}

impl EventRule {
    pub fn new(label: impl Into<String>, actions: Vec<ActionTemplate>) -> Self {
        Self { label: label.into(), predicate: None, actions }
    }

    pub fn with_predicate(mut self, predicate: RulePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

struct RuleBookInner {
    rules: FxHashMap<EventName, Vec<Arc<EventRule>>>,
    states: FxHashMap<String, VecDeque<StateMessage>>,
}

/// Registry of event rules plus per-sensor state history
pub struct RuleBook {
    inner: Mutex<RuleBookInner>,
}

impl RuleBook {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RuleBookInner {
                rules: FxHashMap::default(),
                states: FxHashMap::default(),
            }),
        }
    }

    /// Book preloaded with the stock showroom ruleset
    pub fn with_defaults() -> Self {
        let book = Self::new();
        book.add_rule(
            EventName::SittingConfirmed,
            EventRule::new(
                "welcome_video",
                vec![ActionTemplate {
                    kind: ActionKind::VideoPlay,
                    payload: json!({"videoId": "welcome_video", "loop": false, "volume": 0.8}),
                    priority: Priority::High,
                }],
            ),
        );
        book.add_rule(
            EventName::AllPeopleLeft,
            EventRule::new(
                "idle_video",
                vec![ActionTemplate {
                    kind: ActionKind::VideoPlay,
                    payload: json!({"videoId": "idle_video", "loop": true, "volume": 0.5}),
                    priority: Priority::Normal,
                }],
            ),
        );
        book.add_rule(
            EventName::PersonEntered,
            EventRule::new(
                "greeting_audio",
                vec![ActionTemplate {
                    kind: ActionKind::AudioPlay,
                    payload: json!({"text": "いらっしゃいませ", "volume": 0.7}),
                    priority: Priority::High,
                }],
            ),
        );
        book
    }

    /// Register a rule. Registering the same event again appends; earlier
    /// rules keep their position.
    pub fn add_rule(&self, event: EventName, rule: EventRule) {
        let mut inner = self.inner.lock();
        info!(event = %event, rule = %rule.label, "rule_registered");
        inner.rules.entry(event).or_default().push(Arc::new(rule));
    }

    /// Remove the rule at `index` for `event`. Returns false when no such
    /// rule exists.
    pub fn remove_rule(&self, event: EventName, index: usize) -> bool {
        let mut inner = self.inner.lock();
        match inner.rules.get_mut(&event) {
            Some(rules) if index < rules.len() => {
                let removed = rules.remove(index);
                info!(event = %event, rule = %removed.label, "rule_removed");
                true
            }
            _ => false,
        }
    }

    /// Number of rules registered for `event`
    pub fn rule_count(&self, event: EventName) -> usize {
        self.inner.lock().rules.get(&event).map_or(0, |r| r.len())
    }

    /// Rule labels per event, for the management surface
    pub fn rule_labels(&self) -> Vec<(EventName, Vec<String>)> {
        let inner = self.inner.lock();
        inner
            .rules
            .iter()
            .map(|(event, rules)| (*event, rules.iter().map(|r| r.label.clone()).collect()))
            .collect()
    }

    /// Evaluate an event against the registry. Matching rules contribute
    /// their actions in registration order; a `command_request` on the event
    /// appends one trailing CUSTOM action.
    ///
    /// Predicates run on a snapshot of the matching rules, outside the
    /// registry lock, so they may call back into the book.
    pub fn process(&self, event: &EventMessage) -> Vec<ActionRequest> {
        let matched: Vec<Arc<EventRule>> = {
            let inner = self.inner.lock();
            inner.rules.get(&event.event.name).cloned().unwrap_or_default()
        };

        let mut out = Vec::new();
        for rule in &matched {
            if let Some(predicate) = &rule.predicate {
                match predicate(event) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(
                            event = %event.event.name,
                            rule = %rule.label,
                            error = %e,
                            "rule_predicate_failed"
                        );
                        continue;
                    }
                }
            }
            out.extend(rule.actions.iter().map(ActionTemplate::instantiate));
        }

        if let Some(command) = &event.event.command_request {
            out.push(ActionRequest::new(
                ActionKind::Custom,
                json!({"command": command, "source": event.camera_id}),
                Priority::Normal,
            ));
        }

        debug!(event = %event.event.name, camera_id = %event.camera_id, actions = %out.len(), "event_processed");
        out
    }

    /// Append a raw state message to the sensor's bounded history
    pub fn record_state(&self, state: &StateMessage) {
        let mut inner = self.inner.lock();
        let history = inner.states.entry(state.camera_id.clone()).or_default();
        history.push_back(state.clone());
        if history.len() > MAX_STATE_HISTORY {
            history.pop_front();
        }
    }

    /// Most recent state from one sensor
    pub fn latest_state(&self, sensor_id: &str) -> Option<StateMessage> {
        self.inner.lock().states.get(sensor_id).and_then(|h| h.back().cloned())
    }

    /// State history for one sensor, oldest first. `limit` trims to the tail.
    pub fn state_history(&self, sensor_id: &str, limit: Option<usize>) -> Vec<StateMessage> {
        let inner = self.inner.lock();
        let Some(history) = inner.states.get(sensor_id) else {
            return Vec::new();
        };
        let states: Vec<StateMessage> = history.iter().cloned().collect();
        match limit {
            Some(n) if n < states.len() => states[states.len() - n..].to_vec(),
            _ => states,
        }
    }

    /// Latest state from every sensor that has reported
    pub fn all_latest(&self) -> Vec<StateMessage> {
        let inner = self.inner.lock();
        inner.states.values().filter_map(|h| h.back().cloned()).collect()
    }

    /// Drop history for one sensor, or all of it
    pub fn clear_history(&self, sensor_id: Option<&str>) {
        let mut inner = self.inner.lock();
        match sensor_id {
            Some(id) => {
                inner.states.remove(id);
            }
            None => inner.states.clear(),
        }
    }
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::{CameraEvent, StateData};
    use anyhow::bail;

    fn event(name: EventName) -> EventMessage {
        EventMessage {
            camera_id: "cam1".to_string(),
            timestamp: 1_700_000_000_000,
            event: CameraEvent { name, command_request: None },
        }
    }

    fn state(sensor: &str, count: i64, timestamp: u64) -> StateMessage {
        StateMessage {
            camera_id: sensor.to_string(),
            timestamp,
            data: StateData { person_count: count, people: Vec::new() },
        }
    }

    fn template(kind: ActionKind, priority: Priority) -> ActionTemplate {
        ActionTemplate { kind, payload: json!({}), priority }
    }

    #[test]
    fn test_default_ruleset_sitting_confirmed() {
        let book = RuleBook::with_defaults();
        let actions = book.process(&event(EventName::SittingConfirmed));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::VideoPlay);
        assert_eq!(actions[0].priority, Priority::High);
        assert_eq!(actions[0].payload["videoId"], "welcome_video");
    }

    #[test]
    fn test_default_ruleset_all_people_left() {
        let book = RuleBook::with_defaults();
        let actions = book.process(&event(EventName::AllPeopleLeft));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].priority, Priority::Normal);
        assert_eq!(actions[0].payload["loop"], true);
    }

    #[test]
    fn test_unmatched_event_yields_nothing() {
        let book = RuleBook::with_defaults();
        assert!(book.process(&event(EventName::PersonStoodUp)).is_empty());
    }

    #[test]
    fn test_registration_appends_and_preserves_order() {
        let book = RuleBook::new();
        book.add_rule(
            EventName::PersonEntered,
            EventRule::new("first", vec![template(ActionKind::AudioPlay, Priority::Normal)]),
        );
        book.add_rule(
            EventName::PersonEntered,
            EventRule::new(
                "second",
                vec![
                    template(ActionKind::VideoPlay, Priority::High),
                    template(ActionKind::Custom, Priority::Low),
                ],
            ),
        );

        let actions = book.process(&event(EventName::PersonEntered));
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].kind, ActionKind::AudioPlay);
        assert_eq!(actions[1].kind, ActionKind::VideoPlay);
        assert_eq!(actions[2].kind, ActionKind::Custom);
    }

    #[test]
    fn test_predicate_false_skips_rule() {
        let book = RuleBook::new();
        book.add_rule(
            EventName::PersonEntered,
            EventRule::new("gated", vec![template(ActionKind::VideoPlay, Priority::Normal)])
                .with_predicate(Box::new(|_| Ok(false))),
        );
        assert!(book.process(&event(EventName::PersonEntered)).is_empty());
    }

    #[test]
    fn test_predicate_error_skips_only_that_rule() {
        let book = RuleBook::new();
        book.add_rule(
            EventName::PersonEntered,
            EventRule::new("broken", vec![template(ActionKind::VideoPlay, Priority::Normal)])
                .with_predicate(Box::new(|_| bail!("lookup failed"))),
        );
        book.add_rule(
            EventName::PersonEntered,
            EventRule::new("healthy", vec![template(ActionKind::AudioPlay, Priority::Normal)]),
        );

        let actions = book.process(&event(EventName::PersonEntered));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::AudioPlay);
    }

    #[test]
    fn test_predicate_may_call_back_into_the_book() {
        let book = Arc::new(RuleBook::new());
        let registry = book.clone();
        book.add_rule(
            EventName::PersonEntered,
            EventRule::new("reentrant", vec![template(ActionKind::AudioPlay, Priority::Normal)])
                .with_predicate(Box::new(move |_| {
                    Ok(registry.rule_count(EventName::PersonEntered) == 1)
                })),
        );

        let actions = book.process(&event(EventName::PersonEntered));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_command_request_appends_trailing_custom() {
        let book = RuleBook::with_defaults();
        let mut ev = event(EventName::SittingConfirmed);
        ev.event.command_request = Some("spotlight_on".to_string());

        let actions = book.process(&ev);
        assert_eq!(actions.len(), 2);
        let custom = actions.last().unwrap();
        assert_eq!(custom.kind, ActionKind::Custom);
        assert_eq!(custom.payload["command"], "spotlight_on");
        assert_eq!(custom.payload["source"], "cam1");
    }

    #[test]
    fn test_command_request_without_rules_still_emits_custom() {
        let book = RuleBook::new();
        let mut ev = event(EventName::PersonStoodUp);
        ev.event.command_request = Some("lights_off".to_string());

        let actions = book.process(&ev);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Custom);
    }

    #[test]
    fn test_remove_rule_by_index() {
        let book = RuleBook::with_defaults();
        assert_eq!(book.rule_count(EventName::PersonEntered), 1);
        assert!(book.remove_rule(EventName::PersonEntered, 0));
        assert_eq!(book.rule_count(EventName::PersonEntered), 0);
        assert!(!book.remove_rule(EventName::PersonEntered, 0));
        assert!(book.process(&event(EventName::PersonEntered)).is_empty());
    }

    #[test]
    fn test_emitted_actions_get_fresh_ids() {
        let book = RuleBook::with_defaults();
        let a = book.process(&event(EventName::PersonEntered));
        let b = book.process(&event(EventName::PersonEntered));
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn test_state_history_bounded_fifo() {
        let book = RuleBook::new();
        for i in 0..120u64 {
            book.record_state(&state("cam1", i as i64, 1_700_000_000_000 + i));
        }
        let history = book.state_history("cam1", None);
        assert_eq!(history.len(), 100);
        assert_eq!(history[0].data.person_count, 20, "oldest entries dropped first");
        assert_eq!(book.latest_state("cam1").unwrap().data.person_count, 119);
    }

    #[test]
    fn test_state_history_limit_takes_tail() {
        let book = RuleBook::new();
        for i in 0..10u64 {
            book.record_state(&state("cam1", i as i64, 1_700_000_000_000 + i));
        }
        let tail = book.state_history("cam1", Some(3));
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].data.person_count, 7);
    }

    #[test]
    fn test_all_latest_and_clear() {
        let book = RuleBook::new();
        book.record_state(&state("cam1", 1, 1));
        book.record_state(&state("cam2", 2, 2));
        assert_eq!(book.all_latest().len(), 2);

        book.clear_history(Some("cam1"));
        assert!(book.latest_state("cam1").is_none());
        assert!(book.latest_state("cam2").is_some());

        book.clear_history(None);
        assert!(book.all_latest().is_empty());
    }

    #[test]
    fn test_unknown_sensor_history_is_empty() {
        let book = RuleBook::new();
        assert!(book.state_history("nope", None).is_empty());
        assert!(book.latest_state("nope").is_none());
    }
}
