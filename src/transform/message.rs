//! Transformations over the change message and its label block. Values may
//! contain `${NAME}` templates resolved against the labels visible to the
//! work context (message, hidden, revision, CLI).

use crate::errors::RelayError;
use crate::message::{Label, fill_template};
use crate::transform::{TransformStatus, Transformation};
use crate::work::TransformWork;

fn resolve_value(work: &TransformWork, template: &str) -> Result<String, RelayError> {
    fill_template(template, |name| work.label(name))
}

/// Append a label to the message's trailing group.
#[derive(Debug)]
pub struct AddLabel {
    name: String,
    value: String,
    colon_separator: bool,
}

impl AddLabel {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> AddLabel {
        AddLabel {
            name: name.into(),
            value: value.into(),
            colon_separator: false,
        }
    }

    pub fn with_colon(mut self) -> AddLabel {
        self.colon_separator = true;
        self
    }

    fn label(&self, work: &TransformWork) -> Result<Label, RelayError> {
        let value = resolve_value(work, &self.value)?;
        Ok(if self.colon_separator {
            Label::with_colon(&self.name, value)
        } else {
            Label::new(&self.name, value)
        })
    }
}

impl Transformation for AddLabel {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let label = self.label(work)?;
        work.message_mut().add_label(label);
        Ok(TransformStatus::Changed)
    }

    fn reverse(&self) -> Result<Box<dyn Transformation>, RelayError> {
        Ok(Box::new(RemoveLabel::new(&self.name, false)))
    }

    fn describe(&self) -> String {
        format!("add label {}", self.name)
    }
}

/// Replace the label wherever it appears in the trailing group, appending it
/// when absent.
#[derive(Debug)]
pub struct AddOrReplaceLabel {
    name: String,
    value: String,
}

impl AddOrReplaceLabel {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> AddOrReplaceLabel {
        AddOrReplaceLabel {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Transformation for AddOrReplaceLabel {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let value = resolve_value(work, &self.value)?;
        let before = work.message().to_string();
        work.message_mut()
            .add_or_replace_label(Label::new(&self.name, value));
        if work.message().to_string() == before {
            Ok(TransformStatus::noop(format!(
                "label {} already had this value",
                self.name
            )))
        } else {
            Ok(TransformStatus::Changed)
        }
    }

    fn describe(&self) -> String {
        format!("add or replace label {}", self.name)
    }
}

/// Replace the label only when it is already present.
#[derive(Debug)]
pub struct ReplaceLabel {
    name: String,
    value: String,
}

impl ReplaceLabel {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> ReplaceLabel {
        ReplaceLabel {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Transformation for ReplaceLabel {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let value = resolve_value(work, &self.value)?;
        let label = Label::new(&self.name, value);
        if work.message_mut().replace_label_if_present(&label) {
            Ok(TransformStatus::Changed)
        } else {
            Ok(TransformStatus::noop(format!(
                "label {} not present or unchanged",
                self.name
            )))
        }
    }

    fn describe(&self) -> String {
        format!("replace label {}", self.name)
    }
}

/// Remove a label from the trailing group, or from the whole message.
#[derive(Debug)]
pub struct RemoveLabel {
    name: String,
    whole_message: bool,
}

impl RemoveLabel {
    pub fn new(name: impl Into<String>, whole_message: bool) -> RemoveLabel {
        RemoveLabel {
            name: name.into(),
            whole_message,
        }
    }
}

impl Transformation for RemoveLabel {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        if work
            .message_mut()
            .remove_all_labels(&self.name, self.whole_message)
        {
            Ok(TransformStatus::Changed)
        } else {
            Ok(TransformStatus::noop(format!(
                "label {} not present",
                self.name
            )))
        }
    }

    fn describe(&self) -> String {
        format!("remove label {}", self.name)
    }
}

/// Insert a paragraph before the trailing label block.
#[derive(Debug)]
pub struct AddTextBeforeLabels {
    text: String,
}

impl AddTextBeforeLabels {
    pub fn new(text: impl Into<String>) -> AddTextBeforeLabels {
        AddTextBeforeLabels { text: text.into() }
    }
}

impl Transformation for AddTextBeforeLabels {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let text = resolve_value(work, &self.text)?;
        work.message_mut().add_text_before_labels(&text);
        Ok(TransformStatus::Changed)
    }

    fn describe(&self) -> String {
        "add text before labels".to_string()
    }
}

/// Replace the whole message. The empty string clears it.
#[derive(Debug)]
pub struct SetMessage {
    text: String,
}

impl SetMessage {
    pub fn new(text: impl Into<String>) -> SetMessage {
        SetMessage { text: text.into() }
    }
}

impl Transformation for SetMessage {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let text = resolve_value(work, &self.text)?;
        if work.message().to_string() == text {
            return Ok(TransformStatus::noop("message already has this text"));
        }
        work.set_message(&text);
        Ok(TransformStatus::Changed)
    }

    fn describe(&self) -> String {
        "set message".to_string()
    }
}

/// Take the message (and optionally the author) from the newest change in
/// the current batch.
#[derive(Debug)]
pub struct UseLastChange {
    use_message: bool,
    use_author: bool,
    default_message: Option<String>,
}

impl UseLastChange {
    pub fn new(use_message: bool, use_author: bool) -> UseLastChange {
        UseLastChange {
            use_message,
            use_author,
            default_message: None,
        }
    }

    pub fn with_default_message(mut self, msg: impl Into<String>) -> UseLastChange {
        self.default_message = Some(msg.into());
        self
    }
}

impl Transformation for UseLastChange {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let Some(last) = work.changes().current.last().cloned() else {
            return match &self.default_message {
                Some(msg) => {
                    work.set_message(msg);
                    Ok(TransformStatus::Changed)
                }
                None => Ok(TransformStatus::noop("no changes in the current batch")),
            };
        };
        if self.use_message {
            work.set_message(&last.message);
        }
        if self.use_author {
            work.set_author(last.author.clone());
        }
        Ok(TransformStatus::Changed)
    }

    fn describe(&self) -> String {
        "use last change".to_string()
    }
}

/// Render the canonical import summary listing every change in the batch.
#[derive(Debug)]
pub struct SquashNotes {
    prefix: String,
    max: usize,
    show_ref: bool,
    show_author: bool,
    show_description: bool,
    oldest_first: bool,
}

impl Default for SquashNotes {
    fn default() -> SquashNotes {
        SquashNotes {
            prefix: "repo-relay import of the project:\n\n".to_string(),
            max: 100,
            show_ref: true,
            show_author: true,
            show_description: true,
            oldest_first: false,
        }
    }
}

impl SquashNotes {
    pub fn new(prefix: impl Into<String>) -> SquashNotes {
        SquashNotes {
            prefix: prefix.into(),
            ..SquashNotes::default()
        }
    }

    pub fn oldest_first(mut self, oldest_first: bool) -> SquashNotes {
        self.oldest_first = oldest_first;
        self
    }
}

impl Transformation for SquashNotes {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let mut message = self.prefix.clone();
        let changes = &work.changes().current;
        let ordered: Vec<_> = if self.oldest_first {
            changes.iter().collect()
        } else {
            changes.iter().rev().collect()
        };
        for change in ordered.iter().take(self.max) {
            let mut line = String::from("  -");
            if self.show_ref {
                line.push_str(&format!(" {}", change.revision.canonical()));
            }
            if self.show_description {
                line.push_str(&format!(" {}", change.first_line()));
            }
            if self.show_author {
                line.push_str(&format!(" by {}", change.author));
            }
            message.push_str(&line);
            message.push('\n');
        }
        if ordered.len() > self.max {
            message.push_str(&format!("  (and {} more)\n", ordered.len() - self.max));
        }
        work.set_message(&message);
        Ok(TransformStatus::Changed)
    }

    fn describe(&self) -> String {
        "squash notes".to_string()
    }
}

/// Promote a hidden label (or a revision label) into the visible message.
#[derive(Debug)]
pub struct ExposeLabel {
    name: String,
    new_name: Option<String>,
    all: bool,
}

impl ExposeLabel {
    pub fn new(name: impl Into<String>) -> ExposeLabel {
        ExposeLabel {
            name: name.into(),
            new_name: None,
            all: false,
        }
    }

    pub fn renamed(mut self, new_name: impl Into<String>) -> ExposeLabel {
        self.new_name = Some(new_name.into());
        self
    }

    pub fn all_values(mut self, all: bool) -> ExposeLabel {
        self.all = all;
        self
    }
}

impl Transformation for ExposeLabel {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let target = self.new_name.clone().unwrap_or_else(|| self.name.clone());
        if !self.all {
            let Some(value) = work.label(&self.name) else {
                return Ok(TransformStatus::noop(format!(
                    "label {} has no value to expose",
                    self.name
                )));
            };
            work.message_mut()
                .add_or_replace_label(Label::new(&target, value));
            return Ok(TransformStatus::Changed);
        }

        // Every value of the label, wherever it appears: body lines, the
        // trailing group, and the hidden store, in that order.
        let mut values = work.message().get_all_labels(&self.name);
        values.extend(work.hidden_label_values(&self.name).iter().cloned());
        if values.is_empty() {
            return Ok(TransformStatus::noop(format!(
                "label {} has no value to expose",
                self.name
            )));
        }
        let mut changed = false;
        for value in values {
            let present = work
                .message()
                .labels()
                .iter()
                .any(|l| l.name == target && l.value == value);
            if !present {
                work.message_mut().add_label(Label::new(&target, value));
                changed = true;
            }
        }
        if changed {
            Ok(TransformStatus::Changed)
        } else {
            Ok(TransformStatus::noop(format!(
                "every value of {} is already exposed",
                self.name
            )))
        }
    }

    fn describe(&self) -> String {
        format!("expose label {}", self.name)
    }
}
