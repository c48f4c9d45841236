//! Actor definitions: the pure values a simulation is built from.

use std::fmt;
use std::sync::Arc;

use timewarp_types::Payload;

use crate::pattern::SendPattern;

/// Predicate form of a match rule.
pub type MatchPredicate = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// What a match rule tests: a literal (structural equality) or a predicate.
#[derive(Clone)]
pub enum MatchPattern {
    Literal(Payload),
    Predicate(MatchPredicate),
}

impl MatchPattern {
    pub fn matches(&self, message: &Payload) -> bool {
        match self {
            MatchPattern::Literal(expected) => expected == message,
            MatchPattern::Predicate(test) => test(message),
        }
    }
}

impl fmt::Debug for MatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPattern::Literal(payload) => f.debug_tuple("Literal").field(payload).finish(),
            MatchPattern::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// What to do when a rule matches.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchAction {
    /// Send this value back to the sender.
    Reply(Payload),
    /// Consume the message without reacting.
    Ignore,
}

/// One `(pattern, action)` rule; rules are scanned in declaration order
/// and the first match wins.
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub pattern: MatchPattern,
    pub action: MatchAction,
}

impl MatchRule {
    pub fn literal(expected: Payload, action: MatchAction) -> Self {
        Self {
            pattern: MatchPattern::Literal(expected),
            action,
        }
    }

    pub fn predicate<F>(test: F, action: MatchAction) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        Self {
            pattern: MatchPattern::Predicate(Arc::new(test)),
            action,
        }
    }
}

/// Outcome of an actor's receive callback. State is owned: the callback
/// consumes the previous state and hands back the next one.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    /// Keep (or replace) the state, emit nothing.
    Ok(Payload),
    /// Emit `(target name, message)` pairs immediately.
    Send {
        messages: Vec<(String, Payload)>,
        state: Payload,
    },
    /// Schedule `(target name, message)` pairs after a delay.
    SendAfter {
        delay_ms: u64,
        messages: Vec<(String, Payload)>,
        state: Payload,
    },
    /// Send a value back to whoever sent the message being handled.
    Reply { reply: Payload, state: Payload },
}

/// Receive callback: `(message, state) -> outcome`.
pub type ReceiveFn = Arc<dyn Fn(&Payload, Payload) -> ReceiveOutcome + Send + Sync>;

/// A pure, immutable description of one synthetic actor.
#[derive(Clone)]
pub struct Definition {
    pub name: String,
    pub pattern: SendPattern,
    pub targets: Vec<String>,
    pub initial_state: Payload,
    pub rules: Vec<MatchRule>,
    pub on_receive: Option<ReceiveFn>,
}

impl Definition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: SendPattern::None,
            targets: Vec::new(),
            initial_state: Payload::atom("idle"),
            rules: Vec::new(),
            on_receive: None,
        }
    }

    pub fn with_pattern(mut self, pattern: SendPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_initial_state(mut self, state: Payload) -> Self {
        self.initial_state = state;
        self
    }

    pub fn with_rule(mut self, rule: MatchRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_on_receive<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Payload, Payload) -> ReceiveOutcome + Send + Sync + 'static,
    {
        self.on_receive = Some(Arc::new(callback));
        self
    }

    /// First matching rule's action, scanning in declaration order.
    pub fn match_for(&self, message: &Payload) -> Option<&MatchAction> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(message))
            .map(|rule| &rule.action)
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("targets", &self.targets)
            .field("rules", &self.rules.len())
            .field("has_on_receive", &self.on_receive.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_rules_match_structurally() {
        let def = Definition::new("echo")
            .with_rule(MatchRule::literal(
                Payload::atom("ping"),
                MatchAction::Reply(Payload::atom("pong")),
            ))
            .with_rule(MatchRule::literal(
                Payload::atom("hush"),
                MatchAction::Ignore,
            ));

        assert_eq!(
            def.match_for(&Payload::atom("ping")),
            Some(&MatchAction::Reply(Payload::atom("pong")))
        );
        assert_eq!(def.match_for(&Payload::atom("hush")), Some(&MatchAction::Ignore));
        assert_eq!(def.match_for(&Payload::atom("other")), None);
    }

    #[test]
    fn first_matching_rule_wins() {
        let def = Definition::new("picky")
            .with_rule(MatchRule::predicate(
                |m| matches!(m, Payload::Int(_)),
                MatchAction::Reply(Payload::atom("number")),
            ))
            .with_rule(MatchRule::literal(
                Payload::Int(7),
                MatchAction::Reply(Payload::atom("seven")),
            ));

        // The predicate rule is declared first, so Int(7) never reaches
        // the literal rule.
        assert_eq!(
            def.match_for(&Payload::Int(7)),
            Some(&MatchAction::Reply(Payload::atom("number")))
        );
    }

    #[test]
    fn builder_collects_fields() {
        let def = Definition::new("producer")
            .with_pattern(SendPattern::Periodic {
                interval_ms: 100,
                message: Payload::atom("tick"),
            })
            .with_targets(["a", "b"])
            .with_initial_state(Payload::Int(0));

        assert_eq!(def.name, "producer");
        assert_eq!(def.targets, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(def.initial_state, Payload::Int(0));
    }
}
