//! Commit message parsing: a message is free-form body text plus an ordered
//! label group at the tail. Labels are `NAME=VALUE` or `NAME: VALUE` lines;
//! the group is the last contiguous block of such lines, separated from the
//! body by a blank line. Parsing followed by rendering is the identity when
//! the message already ends in a labels paragraph.

use std::fmt::Display;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::RelayError;

/// A single label line. The separator is kept verbatim (`=`, `: ` or `:`)
/// so rendering round-trips byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub separator: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Label {
        Label {
            name: name.into(),
            separator: "=".to_string(),
            value: value.into(),
        }
    }

    pub fn with_colon(name: impl Into<String>, value: impl Into<String>) -> Label {
        Label {
            name: name.into(),
            separator: ": ".to_string(),
            value: value.into(),
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}{}{}", self.name, self.separator, self.value)
    }
}

static LABEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*)(=|: ?)(.*)$").unwrap()
});

fn parse_label_line(line: &str) -> Option<Label> {
    let caps = LABEL_LINE.captures(line)?;
    Some(Label {
        name: caps[1].to_string(),
        separator: caps[2].to_string(),
        value: caps[3].to_string(),
    })
}

/// A parsed commit message: body text plus the trailing label group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMessage {
    /// Body text, ending with a newline when non-empty. The blank separator
    /// line before the label group is not part of the body.
    body: String,
    labels: Vec<Label>,
}

impl ChangeMessage {
    /// Parse a message into body and trailing label group. The group is the
    /// last paragraph only when every one of its lines is a label line;
    /// otherwise the whole text is body.
    pub fn parse(text: &str) -> ChangeMessage {
        let lines: Vec<&str> = text.split('\n').collect();
        // `split` leaves a trailing empty element when the text ends in '\n'.
        let end = if lines.last() == Some(&"") {
            lines.len() - 1
        } else {
            lines.len()
        };

        // Walk backwards over the candidate label group.
        let mut start = end;
        while start > 0 {
            let line = lines[start - 1];
            if line.is_empty() || parse_label_line(line).is_none() {
                break;
            }
            start -= 1;
        }

        // The group must be a separate paragraph: preceded by a blank line,
        // or the message must consist of labels only.
        let group_ok = start < end && (start == 0 || lines[start - 1].is_empty());
        if !group_ok {
            return ChangeMessage {
                body: text.to_string(),
                labels: vec![],
            };
        }

        let labels = lines[start..end]
            .iter()
            .map(|l| parse_label_line(l).unwrap())
            .collect();
        // Drop exactly one blank separator line from the body.
        let body_end = if start > 0 { start - 1 } else { 0 };
        let mut body = lines[..body_end].join("\n");
        if body_end > 0 {
            body.push('\n');
        }
        ChangeMessage { body, labels }
    }

    /// Message with the given body and no labels.
    pub fn from_body(body: impl Into<String>) -> ChangeMessage {
        let mut body = body.into();
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        ChangeMessage { body, labels: vec![] }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// First line of the body.
    pub fn first_line(&self) -> &str {
        self.body.lines().next().unwrap_or("")
    }

    /// Replace the whole message, dropping the label group.
    pub fn set_text(&mut self, text: &str) {
        *self = ChangeMessage::parse(text);
    }

    /// Last value of `name`, looking at every line of the message (labels
    /// embedded in the body count), the trailing group last.
    pub fn get_label(&self, name: &str) -> Option<String> {
        let mut found = None;
        for line in self.body.lines() {
            if let Some(label) = parse_label_line(line)
                && label.name == name
            {
                found = Some(label.value);
            }
        }
        for label in &self.labels {
            if label.name == name {
                found = Some(label.value.clone());
            }
        }
        found
    }

    /// All values of `name` across the whole message, in order.
    pub fn get_all_labels(&self, name: &str) -> Vec<String> {
        let mut values = vec![];
        for line in self.body.lines() {
            if let Some(label) = parse_label_line(line)
                && label.name == name
            {
                values.push(label.value);
            }
        }
        values.extend(
            self.labels
                .iter()
                .filter(|l| l.name == name)
                .map(|l| l.value.clone()),
        );
        values
    }

    /// Append a label to the trailing group.
    pub fn add_label(&mut self, label: Label) {
        self.labels.push(label);
    }

    /// Replace every occurrence of the label in the trailing group, or append
    /// it when absent.
    pub fn add_or_replace_label(&mut self, label: Label) {
        let mut replaced = false;
        for existing in &mut self.labels {
            if existing.name == label.name {
                existing.value = label.value.clone();
                replaced = true;
            }
        }
        if !replaced {
            self.labels.push(label);
        }
    }

    /// Replace the label only when it is already present in the trailing
    /// group. Returns whether anything changed.
    pub fn replace_label_if_present(&mut self, label: &Label) -> bool {
        let mut replaced = false;
        for existing in &mut self.labels {
            if existing.name == label.name && existing.value != label.value {
                existing.value = label.value.clone();
                replaced = true;
            }
        }
        replaced
    }

    /// Remove the first matching label from the trailing group. Returns
    /// whether anything was removed.
    pub fn remove_first_label(&mut self, name: &str, value: Option<&str>) -> bool {
        let pos = self
            .labels
            .iter()
            .position(|l| l.name == name && value.is_none_or(|v| l.value == v));
        match pos {
            Some(i) => {
                self.labels.remove(i);
                true
            }
            None => false,
        }
    }

    /// Remove every matching label. With `whole_message` the body lines are
    /// scrubbed too, not only the trailing group.
    pub fn remove_all_labels(&mut self, name: &str, whole_message: bool) -> bool {
        let before = self.labels.len();
        self.labels.retain(|l| l.name != name);
        let mut changed = self.labels.len() != before;
        if whole_message {
            let had_trailing_newline = self.body.ends_with('\n');
            let kept: Vec<&str> = self
                .body
                .lines()
                .filter(|line| parse_label_line(line).is_none_or(|l| l.name != name))
                .collect();
            let mut new_body = kept.join("\n");
            if had_trailing_newline && !new_body.is_empty() {
                new_body.push('\n');
            }
            if new_body != self.body {
                self.body = new_body;
                changed = true;
            }
        }
        changed
    }

    /// Insert a paragraph of text at the end of the body, before the label
    /// group.
    pub fn add_text_before_labels(&mut self, text: &str) {
        if !self.body.is_empty() {
            if !self.body.ends_with('\n') {
                self.body.push('\n');
            }
            self.body.push('\n');
        }
        self.body.push_str(text);
        if !self.body.ends_with('\n') {
            self.body.push('\n');
        }
    }
}

impl Display for ChangeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.labels.is_empty() {
            return f.write_str(&self.body);
        }
        if !self.body.is_empty() {
            f.write_str(&self.body)?;
            if !self.body.ends_with('\n') {
                f.write_str("\n")?;
            }
            f.write_str("\n")?;
        }
        for label in &self.labels {
            writeln!(f, "{label}")?;
        }
        Ok(())
    }
}

/// Expand `${NAME}` placeholders in `template` using `lookup`. A missing
/// label fails with the name of the first unresolved placeholder.
pub fn fill_template<F>(template: &str, lookup: F) -> Result<String, RelayError>
where
    F: Fn(&str) -> Option<String>,
{
    static PLACEHOLDER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_-]*)\}").unwrap());

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];
        out.push_str(&template[last..whole.start()]);
        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => return Err(RelayError::LabelNotFound(name.to_string())),
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_body_and_label_group() {
        let m = ChangeMessage::parse("Fix the frobnicator\n\nMore detail.\n\nRev-Id=abc\nBug: 123\n");
        assert_eq!(m.body(), "Fix the frobnicator\n\nMore detail.\n");
        assert_eq!(m.labels().len(), 2);
        assert_eq!(m.get_label("Rev-Id").as_deref(), Some("abc"));
        assert_eq!(m.get_label("Bug").as_deref(), Some("123"));
    }

    #[test]
    fn parse_render_is_identity_with_trailing_labels() {
        let texts = [
            "Summary\n\nA=1\nB: two\n",
            "Summary\n\n\nA=1\n",
            "A=1\nB=2\n",
            "No labels here\n",
            "Body mentions A=1 inline\nand continues\n",
        ];
        for text in texts {
            let m = ChangeMessage::parse(text);
            assert_eq!(m.to_string(), *text, "round-trip failed for {text:?}");
        }
    }

    #[test]
    fn add_label_then_parse_finds_it() {
        let mut m = ChangeMessage::parse("Some summary\n");
        m.add_label(Label::new("IMPORT_REV", "12f"));
        let reparsed = ChangeMessage::parse(&m.to_string());
        assert_eq!(reparsed.get_label("IMPORT_REV").as_deref(), Some("12f"));
    }

    #[test]
    fn labels_inside_body_are_found_but_not_part_of_group() {
        // The label sits on the second line with no blank separator, so it is
        // body text, yet lookup still finds it.
        let m = ChangeMessage::parse("Base\nDEST_LABEL=42\n");
        assert!(m.labels().is_empty());
        assert_eq!(m.get_label("DEST_LABEL").as_deref(), Some("42"));
    }

    #[test]
    fn last_occurrence_wins() {
        let m = ChangeMessage::parse("Body A=1\nA=2\n\nA=3\n");
        assert_eq!(m.get_label("A").as_deref(), Some("3"));
        assert_eq!(m.get_all_labels("A"), vec!["1", "2", "3"]);
    }

    #[test]
    fn add_or_replace_replaces_in_place() {
        let mut m = ChangeMessage::parse("Summary\n\nA=1\nB=2\n");
        m.add_or_replace_label(Label::new("A", "9"));
        assert_eq!(m.to_string(), "Summary\n\nA=9\nB=2\n");
        m.add_or_replace_label(Label::new("C", "3"));
        assert_eq!(m.to_string(), "Summary\n\nA=9\nB=2\nC=3\n");
    }

    #[test]
    fn remove_labels_first_and_all() {
        let mut m = ChangeMessage::parse("Summary\n\nA=1\nA=2\nB=3\n");
        assert!(m.remove_first_label("A", None));
        assert_eq!(m.to_string(), "Summary\n\nA=2\nB=3\n");
        assert!(m.remove_all_labels("A", false));
        assert_eq!(m.to_string(), "Summary\n\nB=3\n");
        assert!(!m.remove_all_labels("A", false));
    }

    #[test]
    fn remove_whole_message_scrubs_body_lines() {
        let mut m = ChangeMessage::parse("Summary\nA=1\n\nB=2\n");
        assert!(m.remove_all_labels("A", true));
        assert_eq!(m.to_string(), "Summary\n\nB=2\n");
    }

    #[test]
    fn add_text_before_labels_keeps_group_at_tail() {
        let mut m = ChangeMessage::parse("Summary\n\nA=1\n");
        m.add_text_before_labels("Imported change.");
        assert_eq!(m.to_string(), "Summary\n\nImported change.\n\nA=1\n");
    }

    #[test]
    fn template_fill_resolves_and_fails() {
        let lookup = |name: &str| (name == "REV").then(|| "abc123".to_string());
        assert_eq!(
            fill_template("import of ${REV}!", lookup).unwrap(),
            "import of abc123!"
        );
        match fill_template("${MISSING}", lookup) {
            Err(RelayError::LabelNotFound(name)) => assert_eq!(name, "MISSING"),
            other => panic!("expected LabelNotFound, got {other:?}"),
        }
    }
}
