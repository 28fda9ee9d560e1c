//! Routing engine (§4.2): an ordered list of predicate/action rules applied
//! to a message before it reaches transports.
//!
//! Rules are sorted once, at construction, by `priority` descending with a
//! stable sort so equal-priority rules keep insertion order (the tie-break
//! the spec calls for). `RoutingEngine::process` is otherwise side-effect
//! free: it clones the input message and applies every matching rule's
//! actions in order, so `process(process(m))` is safe to call twice and
//! settles once no further rule changes anything.

use notifyhub_common::{Message, Target};

/// A side-effect-free test over a message. Boxed so callers can build rules
/// from closures without the engine knowing about any concrete predicate
/// type.
pub type Predicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// One mutation applied to a matching message, in the order given on the
/// owning `RoutingRule`.
pub enum RoutingAction {
    /// Every target with an empty `platform` is expanded into one target
    /// per platform listed here (§4.2: "new platforms are appended... by
    /// mapping each existing target of unspecified platform").
    AddPlatforms(Vec<String>),
    /// Merge a metadata key into the message. Action wins on conflict.
    SetMetadata(String, String),
    /// Override the message's priority outright.
    SetPriorityOverride(u8),
}

impl RoutingAction {
    fn apply(&self, msg: &mut Message) {
        match self {
            RoutingAction::AddPlatforms(platforms) => {
                let mut expanded: Vec<Target> = Vec::with_capacity(msg.targets.len());
                for target in msg.targets.drain(..) {
                    if target.platform.is_empty() && !platforms.is_empty() {
                        for platform in platforms {
                            expanded.push(Target {
                                target_type: target.target_type,
                                value: target.value.clone(),
                                platform: platform.clone(),
                            });
                        }
                    } else {
                        expanded.push(target);
                    }
                }
                msg.targets = expanded;
            }
            RoutingAction::SetMetadata(key, value) => {
                msg.metadata.insert(key.clone(), value.clone());
            }
            RoutingAction::SetPriorityOverride(priority) => {
                msg.priority = *priority;
            }
        }
    }
}

/// A priority-ordered predicate/action pair. Higher `priority` runs first.
pub struct RoutingRule {
    pub name: String,
    pub priority: i32,
    predicate: Predicate,
    actions: Vec<RoutingAction>,
}

impl RoutingRule {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        predicate: impl Fn(&Message) -> bool + Send + Sync + 'static,
        actions: Vec<RoutingAction>,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            predicate: Box::new(predicate),
            actions,
        }
    }

    /// A rule that matches every message — useful for unconditional
    /// enrichment (e.g. a default platform for all channel targets).
    pub fn always(name: impl Into<String>, priority: i32, actions: Vec<RoutingAction>) -> Self {
        Self::new(name, priority, |_| true, actions)
    }

    fn matches(&self, msg: &Message) -> bool {
        (self.predicate)(msg)
    }
}

/// Holds an immutable, priority-sorted rule set and applies it to messages.
pub struct RoutingEngine {
    rules: Vec<RoutingRule>,
}

impl RoutingEngine {
    /// Stable-sorts `rules` by `priority` descending; ties keep the order
    /// they were given in.
    pub fn new(mut rules: Vec<RoutingRule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Clone `msg`, apply every matching rule's actions in priority order,
    /// return the result. The input is never mutated.
    pub fn process(&self, msg: &Message) -> Message {
        let mut routed = msg.clone();
        for rule in &self.rules {
            if rule.matches(&routed) {
                tracing::trace!(rule = %rule.name, message_id = %routed.id, "routing rule matched");
                for action in &rule.actions {
                    action.apply(&mut routed);
                }
            }
        }
        routed
    }
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyhub_common::TargetType;

    fn msg_with_target(platform: &str) -> Message {
        Message::new("t", "b").with_target(Target::new(TargetType::Channel, "c1", platform))
    }

    #[test]
    fn no_rules_is_identity() {
        let engine = RoutingEngine::new(Vec::new());
        let msg = msg_with_target("chat");
        let routed = engine.process(&msg);
        assert_eq!(routed.targets, msg.targets);
    }

    #[test]
    fn higher_priority_rule_runs_first() {
        let rules = vec![
            RoutingRule::always(
                "low",
                1,
                vec![RoutingAction::SetMetadata("stage".into(), "low".into())],
            ),
            RoutingRule::always(
                "high",
                10,
                vec![RoutingAction::SetMetadata("stage".into(), "high".into())],
            ),
        ];
        let engine = RoutingEngine::new(rules);
        let routed = engine.process(&msg_with_target("chat"));
        // both match; "high" runs first but "low" overwrites last since it
        // also matches and runs second — action wins per the LAST applied
        // matching rule at equal or lower priority.
        assert_eq!(routed.metadata.get("stage"), Some(&"low".to_string()));
    }

    #[test]
    fn equal_priority_rules_apply_in_insertion_order() {
        let rules = vec![
            RoutingRule::always("first", 5, vec![RoutingAction::SetPriorityOverride(2)]),
            RoutingRule::always("second", 5, vec![RoutingAction::SetPriorityOverride(4)]),
        ];
        let engine = RoutingEngine::new(rules);
        let routed = engine.process(&msg_with_target("chat"));
        assert_eq!(routed.priority, 4);
    }

    #[test]
    fn add_platforms_expands_unspecified_platform_targets() {
        let rules = vec![RoutingRule::always(
            "expand",
            1,
            vec![RoutingAction::AddPlatforms(vec![
                "email".to_string(),
                "sms".to_string(),
            ])],
        )];
        let engine = RoutingEngine::new(rules);
        let msg = msg_with_target("");
        let routed = engine.process(&msg);
        assert_eq!(routed.targets.len(), 2);
        assert_eq!(routed.targets[0].platform, "email");
        assert_eq!(routed.targets[1].platform, "sms");
    }

    #[test]
    fn add_platforms_leaves_specified_platform_targets_untouched() {
        let rules = vec![RoutingRule::always(
            "expand",
            1,
            vec![RoutingAction::AddPlatforms(vec!["sms".to_string()])],
        )];
        let engine = RoutingEngine::new(rules);
        let msg = msg_with_target("chat");
        let routed = engine.process(&msg);
        assert_eq!(routed.targets.len(), 1);
        assert_eq!(routed.targets[0].platform, "chat");
    }

    #[test]
    fn non_matching_predicate_skips_rule() {
        let rules = vec![RoutingRule::new(
            "only-sms",
            1,
            |m: &Message| m.targets.iter().any(|t| t.platform == "sms"),
            vec![RoutingAction::SetMetadata("routed".into(), "yes".into())],
        )];
        let engine = RoutingEngine::new(rules);
        let routed = engine.process(&msg_with_target("chat"));
        assert!(!routed.metadata.contains_key("routed"));
    }

    #[test]
    fn processing_is_idempotent_once_settled() {
        let rules = vec![RoutingRule::always(
            "tag",
            1,
            vec![RoutingAction::SetMetadata("tagged".into(), "true".into())],
        )];
        let engine = RoutingEngine::new(rules);
        let once = engine.process(&msg_with_target("chat"));
        let twice = engine.process(&once);
        assert_eq!(once.metadata, twice.metadata);
        assert_eq!(once.targets, twice.targets);
    }
}
