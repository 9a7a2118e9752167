//! Threshold+cooldown alerting over the audit stream (§4.5).
//!
//! The engine is pure: [`AlertEngine::evaluate`] takes one entry and
//! returns at most one [`AlertAction`]; it never does I/O itself. A
//! caller wires the returned action to whatever sink (log line, channel
//! message, pager) is appropriate.

use super::AuditEntry;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A `(category, action)` threshold rule: if `threshold` matching entries
/// land within `window`, fire an alert, then stay quiet for `cooldown`.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub category: String,
    pub action: String,
    pub threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

/// One alert firing, for a sink to deliver.
#[derive(Debug, Clone)]
pub struct AlertAction {
    pub category: String,
    pub action: String,
    pub count: u32,
    pub window: Duration,
}

#[derive(Default)]
struct RuleState {
    recent: VecDeque<Instant>,
    last_fired: Option<Instant>,
}

pub struct AlertEngine {
    rules: Vec<AlertRule>,
    state: Mutex<HashMap<(String, String), RuleState>>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self { rules, state: Mutex::new(HashMap::new()) }
    }

    /// Record `entry` against any matching rule and return an
    /// [`AlertAction`] if a threshold just tripped and the rule isn't in
    /// cooldown.
    pub fn evaluate(&self, entry: &AuditEntry) -> Option<AlertAction> {
        let rule = self
            .rules
            .iter()
            .find(|r| r.category == entry.category && r.action == entry.action)?;

        let key = (rule.category.clone(), rule.action.clone());
        let mut state = self.state.lock().expect("alert engine lock poisoned");
        let entry_state = state.entry(key).or_default();

        let now = Instant::now();
        entry_state.recent.push_back(now);
        while let Some(&oldest) = entry_state.recent.front() {
            if now.duration_since(oldest) > rule.window {
                entry_state.recent.pop_front();
            } else {
                break;
            }
        }

        if entry_state.recent.len() < rule.threshold as usize {
            return None;
        }
        if let Some(last_fired) = entry_state.last_fired {
            if now.duration_since(last_fired) < rule.cooldown {
                return None;
            }
        }

        entry_state.last_fired = Some(now);
        Some(AlertAction {
            category: rule.category.clone(),
            action: rule.action.clone(),
            count: entry_state.recent.len() as u32,
            window: rule.window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Severity;
    use chrono::Utc;

    fn entry(category: &str, action: &str) -> AuditEntry {
        AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            category: category.to_string(),
            action: action.to_string(),
            severity: Severity::Warning,
            metadata: serde_json::json!({}),
            prev_hash: None,
            entry_hash: None,
        }
    }

    #[test]
    fn fires_once_threshold_reached_then_cools_down() {
        let engine = AlertEngine::new(vec![AlertRule {
            category: "tool".into(),
            action: "tool_denied".into(),
            threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(3600),
        }]);

        assert!(engine.evaluate(&entry("tool", "tool_denied")).is_none());
        assert!(engine.evaluate(&entry("tool", "tool_denied")).is_none());
        let fired = engine.evaluate(&entry("tool", "tool_denied"));
        assert!(fired.is_some());
        assert_eq!(fired.unwrap().count, 3);

        // Cooldown suppresses a repeat even though the threshold is still met.
        assert!(engine.evaluate(&entry("tool", "tool_denied")).is_none());
    }

    #[test]
    fn unrelated_category_action_pairs_are_ignored() {
        let engine = AlertEngine::new(vec![AlertRule {
            category: "tool".into(),
            action: "tool_denied".into(),
            threshold: 1,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(1),
        }]);

        assert!(engine.evaluate(&entry("network", "blocked")).is_none());
    }

    #[test]
    fn independent_keys_track_separately() {
        let engine = AlertEngine::new(vec![
            AlertRule {
                category: "tool".into(),
                action: "tool_denied".into(),
                threshold: 1,
                window: Duration::from_secs(60),
                cooldown: Duration::from_secs(1),
            },
            AlertRule {
                category: "network".into(),
                action: "blocked".into(),
                threshold: 1,
                window: Duration::from_secs(60),
                cooldown: Duration::from_secs(1),
            },
        ]);

        assert!(engine.evaluate(&entry("tool", "tool_denied")).is_some());
        assert!(engine.evaluate(&entry("network", "blocked")).is_some());
    }
}
