//! Regex text substitution over the checkout. `${NAME}` placeholders in the
//! pattern bind to named sub-regexes; a replace whose before/after share the
//! same group set is reversible by swapping them.

use indexmap::IndexMap;
use regex::Regex;

use crate::errors::RelayError;
use crate::glob::Glob;
use crate::transform::{TransformStatus, Transformation};
use crate::work::TransformWork;

/// Find/replace with named sub-regex groups.
#[derive(Debug)]
pub struct Replace {
    before: String,
    after: String,
    regex_groups: IndexMap<String, String>,
    paths: Glob,
    multiline: bool,
    first_only: bool,
    compiled: Regex,
    replacement: String,
}

impl Replace {
    pub fn new(
        before: impl Into<String>,
        after: impl Into<String>,
        regex_groups: IndexMap<String, String>,
        paths: Glob,
        multiline: bool,
        first_only: bool,
    ) -> Result<Replace, RelayError> {
        let before = before.into();
        let after = after.into();

        let before_groups = placeholder_names(&before);
        for group in &before_groups {
            if !regex_groups.contains_key(group) {
                return Err(RelayError::Config(format!(
                    "Replace uses ${{{group}}} in 'before' but does not define it in regex_groups"
                )));
            }
        }
        for group in placeholder_names(&after) {
            if !before_groups.contains(&group) {
                return Err(RelayError::Config(format!(
                    "Replace uses ${{{group}}} in 'after' but 'before' does not capture it"
                )));
            }
        }

        let compiled = compile_pattern(&before, &regex_groups, multiline)?;
        let replacement = to_replacement(&after);
        Ok(Replace {
            before,
            after,
            regex_groups,
            paths,
            multiline,
            first_only,
            compiled,
            replacement,
        })
    }

    /// Literal find/replace over all files.
    pub fn literal(
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> Result<Replace, RelayError> {
        Replace::new(before, after, IndexMap::new(), Glob::all(), false, false)
    }

    fn apply_to(&self, content: &str) -> String {
        if self.first_only {
            self.compiled
                .replacen(content, 1, self.replacement.as_str())
                .into_owned()
        } else {
            self.compiled
                .replace_all(content, self.replacement.as_str())
                .into_owned()
        }
    }
}

impl Transformation for Replace {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let mut changed_files = 0usize;
        for rel in work.list_files()? {
            if !self.paths.matches(&rel) {
                continue;
            }
            let full = work.full_path(&rel)?;
            let bytes = std::fs::read(&full)?;
            let Ok(content) = std::str::from_utf8(&bytes) else {
                // Binary files are not candidates for text substitution.
                continue;
            };
            let replaced = self.apply_to(content);
            if replaced != content {
                std::fs::write(&full, replaced)?;
                changed_files += 1;
            }
        }

        if changed_files == 0 {
            Ok(TransformStatus::noop(format!(
                "Couldn't find any matches of '{}'",
                self.compiled.as_str()
            )))
        } else {
            Ok(TransformStatus::Changed)
        }
    }

    fn reverse(&self) -> Result<Box<dyn Transformation>, RelayError> {
        let before_groups = placeholder_names(&self.before);
        let after_groups = placeholder_names(&self.after);
        if before_groups != after_groups {
            return Err(RelayError::validation(format!(
                "{} is not reversible: 'before' and 'after' do not capture the same groups",
                self.describe()
            )));
        }
        Ok(Box::new(Replace::new(
            self.after.clone(),
            self.before.clone(),
            self.regex_groups.clone(),
            self.paths.clone(),
            self.multiline,
            self.first_only,
        )?))
    }

    fn describe(&self) -> String {
        format!("replace '{}' -> '{}'", self.before, self.after)
    }
}

/// `${NAME}` placeholders referenced by a pattern, in order, deduplicated.
fn placeholder_names(pattern: &str) -> Vec<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut names: Vec<String> = vec![];
    for caps in re.captures_iter(pattern) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Build the match regex: literal text is escaped, each `${NAME}` becomes a
/// named capture of its bound sub-regex.
fn compile_pattern(
    before: &str,
    regex_groups: &IndexMap<String, String>,
    multiline: bool,
) -> Result<Regex, RelayError> {
    let token = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut pattern = String::new();
    if multiline {
        pattern.push_str("(?s)");
    }
    let mut last = 0;
    for caps in token.captures_iter(before) {
        let whole = caps.get(0).unwrap();
        pattern.push_str(&regex::escape(&before[last..whole.start()]));
        let name = &caps[1];
        let sub = regex_groups
            .get(name)
            .expect("placeholders were validated against regex_groups");
        pattern.push_str(&format!("(?P<{name}>{sub})"));
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&before[last..]));
    Regex::new(&pattern)
        .map_err(|e| RelayError::Config(format!("Invalid 'before' pattern '{before}': {e}")))
}

/// Turn the `after` text into regex replacement syntax: literal dollars are
/// doubled, `${NAME}` placeholders pass through as group references.
fn to_replacement(after: &str) -> String {
    let token = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut out = String::new();
    let mut last = 0;
    for caps in token.captures_iter(after) {
        let whole = caps.get(0).unwrap();
        out.push_str(&after[last..whole.start()].replace('$', "$$"));
        out.push_str(whole.as_str());
        last = whole.end();
    }
    out.push_str(&after[last..].replace('$', "$$"));
    out
}
