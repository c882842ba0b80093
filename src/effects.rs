//! The effect ledger: structured records of what a migration did (or failed
//! to do), plus the context handed to user actions after each change.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::RelayError;
use crate::message::fill_template;
use crate::revision::LabelMap;

/// What kind of destination outcome an effect describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectKind {
    Created,
    Updated,
    Noop,
    NoopAgainstPendingChange,
    InsufficientApprovals,
    Error,
    TemporaryError,
    Started,
}

/// A reference to a change created in the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationRef {
    /// Destination-native identifier (a commit hash, a review number).
    pub id: String,
    /// What kind of identifier this is (`commit`, `review`, `folder`).
    pub kind: String,
    pub url: Option<String>,
}

/// One structured record in the per-change ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Effect {
    pub kind: EffectKind,
    pub summary: String,
    /// Canonical forms of the origin revisions this effect covers.
    pub origin_refs: Vec<String>,
    pub destination_ref: Option<DestinationRef>,
    pub errors: Vec<String>,
}

impl Effect {
    pub fn new(kind: EffectKind, summary: impl Into<String>) -> Effect {
        Effect {
            kind,
            summary: summary.into(),
            origin_refs: vec![],
            destination_ref: None,
            errors: vec![],
        }
    }

    pub fn with_origin_ref(mut self, origin_ref: impl Into<String>) -> Effect {
        self.origin_refs.push(origin_ref.into());
        self
    }

    pub fn with_destination_ref(mut self, dest: DestinationRef) -> Effect {
        self.destination_ref = Some(dest);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Effect {
        self.errors.push(error.into());
        self
    }
}

/// Result of a user action. Anything else a hook could produce is a bug in
/// the hook, surfaced as a validation error by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Success,
    Noop(String),
    Error(String),
}

/// A user-supplied hook run after each migrated change (or once after the
/// whole workflow). Implementations live outside the core.
pub trait Action: std::fmt::Debug {
    fn run(&self, ctx: &mut ActionContext) -> Result<ActionResult, RelayError>;

    /// Short human-readable name used in error messages.
    fn name(&self) -> String {
        format!("{self:?}")
    }
}

/// Everything an action can observe and do. Side-channel messages and new
/// effects are buffered here and forwarded by the runner once the action
/// returns, so actions never hold endpoint handles.
#[derive(Debug, Default)]
pub struct ActionContext {
    effects: Vec<Effect>,
    labels: LabelMap,
    cli_labels: BTreeMap<String, String>,
    pub(crate) recorded: Vec<Effect>,
    pub(crate) origin_messages: Vec<String>,
    pub(crate) destination_messages: Vec<String>,
}

impl ActionContext {
    pub fn new(effects: Vec<Effect>, labels: LabelMap, cli_labels: BTreeMap<String, String>) -> ActionContext {
        ActionContext {
            effects,
            labels,
            cli_labels,
            recorded: vec![],
            origin_messages: vec![],
            destination_messages: vec![],
        }
    }

    /// The effects accumulated so far for this change, oldest first.
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Values the user passed with `--labels`.
    pub fn cli_labels(&self) -> &BTreeMap<String, String> {
        &self.cli_labels
    }

    /// Record an additional effect (defaults to `Updated`).
    pub fn record_effect(
        &mut self,
        summary: impl Into<String>,
        origin_refs: Vec<String>,
        destination_ref: Option<DestinationRef>,
        kind: Option<EffectKind>,
    ) {
        self.recorded.push(Effect {
            kind: kind.unwrap_or(EffectKind::Updated),
            summary: summary.into(),
            origin_refs,
            destination_ref,
            errors: vec![],
        });
    }

    /// Send a side-channel note to the origin endpoint.
    pub fn origin_message(&mut self, msg: impl Into<String>) {
        self.origin_messages.push(msg.into());
    }

    /// Send a side-channel note to the destination endpoint.
    pub fn destination_message(&mut self, msg: impl Into<String>) {
        self.destination_messages.push(msg.into());
    }

    /// Expand `${LABEL}` placeholders using the change labels, falling back
    /// to the CLI labels.
    pub fn template_fill(&self, template: &str) -> Result<String, RelayError> {
        fill_template(template, |name| {
            self.labels
                .get(name)
                .and_then(|v| v.first())
                .cloned()
                .or_else(|| self.cli_labels.get(name).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_effect_defaults_to_updated() {
        let mut ctx = ActionContext::default();
        ctx.record_effect("posted a comment", vec!["abc".into()], None, None);
        assert_eq!(ctx.recorded.len(), 1);
        assert_eq!(ctx.recorded[0].kind, EffectKind::Updated);
        assert_eq!(ctx.recorded[0].origin_refs, vec!["abc".to_string()]);
    }

    #[test]
    fn template_fill_uses_change_then_cli_labels() {
        let mut labels = LabelMap::new();
        labels.insert("REV".to_string(), vec!["12f".to_string()]);
        let cli = BTreeMap::from([("TICKET".to_string(), "T-9".to_string())]);
        let ctx = ActionContext::new(vec![], labels, cli);
        assert_eq!(ctx.template_fill("${REV}/${TICKET}").unwrap(), "12f/T-9");
        assert!(matches!(
            ctx.template_fill("${NOPE}"),
            Err(RelayError::LabelNotFound(_))
        ));
    }
}
