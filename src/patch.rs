//! Unified-diff parsing and application. The parser is count-driven (hunk
//! bodies are consumed by the lengths declared in the `@@` header) so content
//! lines beginning with `-` or `+` never confuse it. Application verifies
//! context exactly and searches nearby offsets before giving up; a hunk that
//! cannot be placed is a validation error, never a partial write.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::RelayError;
use crate::glob::Glob;

/// One line of a hunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// A contiguous run of edits with its header positions. A zero count names
/// the line after which content is inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    fn reversed(&self) -> Hunk {
        Hunk {
            old_start: self.new_start,
            old_count: self.new_count,
            new_start: self.old_start,
            new_count: self.old_count,
            lines: self
                .lines
                .iter()
                .map(|l| match l {
                    HunkLine::Context(s) => HunkLine::Context(s.clone()),
                    HunkLine::Add(s) => HunkLine::Remove(s.clone()),
                    HunkLine::Remove(s) => HunkLine::Add(s.clone()),
                })
                .collect(),
        }
    }

    /// The old-side lines (context + removals) this hunk must match.
    fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }
}

/// All hunks for one file, with presence markers for creation and deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Path on the old side; `None` for a created file.
    pub old_path: Option<PathBuf>,
    /// Path on the new side; `None` for a deleted file.
    pub new_path: Option<PathBuf>,
    pub hunks: Vec<Hunk>,
    /// The old side's last line has no trailing newline.
    pub no_newline_old: bool,
    /// The new side's last line has no trailing newline.
    pub no_newline_new: bool,
}

impl FilePatch {
    /// The path this patch addresses (new side, falling back to old).
    pub fn path(&self) -> &Path {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .expect("a file patch names at least one side")
    }

    /// The same edit in the opposite direction.
    pub fn reversed(&self) -> FilePatch {
        FilePatch {
            old_path: self.new_path.clone(),
            new_path: self.old_path.clone(),
            hunks: self.hunks.iter().map(Hunk::reversed).collect(),
            no_newline_old: self.no_newline_new,
            no_newline_new: self.no_newline_old,
        }
    }

    /// Apply this patch to the old content. `None` input means the file does
    /// not exist; `None` output means the file is deleted.
    pub fn apply(&self, old: Option<&str>) -> Result<Option<String>, RelayError> {
        if self.new_path.is_none() {
            // Deletion: verify the old side matches, then drop the file.
            self.rebuild(old)?;
            return Ok(None);
        }
        if self.old_path.is_none() && old.is_some() && !old.unwrap_or_default().is_empty() {
            return Err(RelayError::validation(format!(
                "Cannot create '{}': the file already exists",
                self.path().display()
            )));
        }
        Ok(Some(self.rebuild(old)?))
    }

    /// Run the hunks over the old text and return the new text.
    fn rebuild(&self, old: Option<&str>) -> Result<String, RelayError> {
        let old_text = old.unwrap_or("");
        let old_lines: Vec<&str> = if old_text.is_empty() {
            vec![]
        } else {
            old_text.trim_end_matches('\n').split('\n').collect()
        };

        let mut out: Vec<String> = vec![];
        let mut pos = 0usize; // next unconsumed old line (0-based)

        for hunk in &self.hunks {
            let wanted = hunk.old_lines();
            let expected = if hunk.old_count == 0 {
                hunk.old_start
            } else {
                hunk.old_start.saturating_sub(1)
            };
            let at = locate(&old_lines, &wanted, expected, pos).ok_or_else(|| {
                RelayError::validation(format!(
                    "Cannot apply patch to '{}': hunk @@ -{},{} +{},{} @@ does not match the file content",
                    self.path().display(),
                    hunk.old_start,
                    hunk.old_count,
                    hunk.new_start,
                    hunk.new_count,
                ))
            })?;

            // Copy untouched lines up to the hunk position.
            for line in &old_lines[pos..at] {
                out.push((*line).to_string());
            }
            pos = at;

            for line in &hunk.lines {
                match line {
                    HunkLine::Context(s) => {
                        out.push(s.clone());
                        pos += 1;
                    }
                    HunkLine::Remove(_) => {
                        pos += 1;
                    }
                    HunkLine::Add(s) => {
                        out.push(s.clone());
                    }
                }
            }
        }

        for line in &old_lines[pos..] {
            out.push((*line).to_string());
        }

        let mut text = out.join("\n");
        if !text.is_empty() && !self.no_newline_new {
            text.push('\n');
        }
        Ok(text)
    }
}

/// Find the hunk's old-side lines in the file. The expected position is
/// tried first, then offsets fanning out from it, never before `min_pos`.
fn locate(old_lines: &[&str], wanted: &[&str], expected: usize, min_pos: usize) -> Option<usize> {
    if wanted.is_empty() {
        // Pure insertion: the header position is authoritative.
        return (expected >= min_pos && expected <= old_lines.len()).then_some(expected);
    }
    let matches_at = |at: usize| {
        at + wanted.len() <= old_lines.len()
            && wanted.iter().zip(&old_lines[at..]).all(|(w, l)| w == l)
    };
    let expected = expected.max(min_pos);
    if matches_at(expected) {
        return Some(expected);
    }
    for offset in 1..=old_lines.len() {
        let fwd = expected + offset;
        if matches_at(fwd) {
            return Some(fwd);
        }
        if let Some(back) = expected.checked_sub(offset)
            && back >= min_pos
            && matches_at(back)
        {
            return Some(back);
        }
    }
    None
}

/// Parse a unified diff stream into per-file patches. Lines outside file
/// sections (git headers, mode lines, commentary) are skipped.
pub fn parse(text: &str) -> Result<Vec<FilePatch>, RelayError> {
    let mut files: Vec<FilePatch> = vec![];
    let lines: Vec<&str> = text.split('\n').collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if !line.starts_with("--- ") {
            i += 1;
            continue;
        }
        let old_path = parse_header_path(&lines[i][4..]);
        i += 1;
        if i >= lines.len() || !lines[i].starts_with("+++ ") {
            return Err(RelayError::validation(format!(
                "Malformed patch: '--- ' line without '+++ ' at line {i}"
            )));
        }
        let new_path = parse_header_path(&lines[i][4..]);
        if old_path.is_none() && new_path.is_none() {
            return Err(RelayError::validation(
                "Malformed patch: both sides are /dev/null".to_string(),
            ));
        }
        i += 1;

        let mut patch = FilePatch {
            old_path,
            new_path,
            hunks: vec![],
            no_newline_old: false,
            no_newline_new: false,
        };

        while i < lines.len() && lines[i].starts_with("@@") {
            let (hunk, consumed, no_nl_old, no_nl_new) = parse_hunk(&lines[i..])?;
            patch.no_newline_old |= no_nl_old;
            patch.no_newline_new |= no_nl_new;
            patch.hunks.push(hunk);
            i += consumed;
        }
        files.push(patch);
    }

    Ok(files)
}

fn parse_header_path(raw: &str) -> Option<PathBuf> {
    // Header paths may carry a trailing timestamp after a tab.
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    if raw == "/dev/null" {
        return None;
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(PathBuf::from(stripped))
}

/// Parse one `@@` header and its body. Returns the hunk, the number of input
/// lines consumed, and the no-trailing-newline flags seen on each side.
fn parse_hunk(lines: &[&str]) -> Result<(Hunk, usize, bool, bool), RelayError> {
    let header = lines[0];
    let (old_start, old_count, new_start, new_count) = parse_hunk_header(header)?;

    let mut hunk = Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: vec![],
    };
    let (mut old_seen, mut new_seen) = (0usize, 0usize);
    let (mut no_nl_old, mut no_nl_new) = (false, false);
    let mut i = 1;
    let mut last_tag = ' ';

    while (old_seen < old_count || new_seen < new_count) && i < lines.len() {
        let line = lines[i];
        i += 1;
        if let Some(rest) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(rest.to_string()));
            old_seen += 1;
            new_seen += 1;
            last_tag = ' ';
        } else if let Some(rest) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(rest.to_string()));
            new_seen += 1;
            last_tag = '+';
        } else if let Some(rest) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(rest.to_string()));
            old_seen += 1;
            last_tag = '-';
        } else if line.starts_with('\\') {
            match last_tag {
                '-' => no_nl_old = true,
                '+' => no_nl_new = true,
                _ => {
                    no_nl_old = true;
                    no_nl_new = true;
                }
            }
        } else if line.is_empty() {
            // Tolerate a bare empty line as empty context (some tools strip
            // the leading space).
            hunk.lines.push(HunkLine::Context(String::new()));
            old_seen += 1;
            new_seen += 1;
            last_tag = ' ';
        } else {
            return Err(RelayError::validation(format!(
                "Malformed patch: unexpected line '{line}' inside hunk {header}"
            )));
        }
    }

    if old_seen != old_count || new_seen != new_count {
        return Err(RelayError::validation(format!(
            "Malformed patch: hunk {header} declares {old_count}/{new_count} lines but carries {old_seen}/{new_seen}"
        )));
    }

    // A trailing newline marker can follow the final body line.
    if i < lines.len() && lines[i].starts_with('\\') {
        match last_tag {
            '-' => no_nl_old = true,
            '+' => no_nl_new = true,
            _ => {
                no_nl_old = true;
                no_nl_new = true;
            }
        }
        i += 1;
    }

    Ok((hunk, i, no_nl_old, no_nl_new))
}

fn parse_hunk_header(header: &str) -> Result<(usize, usize, usize, usize), RelayError> {
    let bad = || RelayError::validation(format!("Malformed hunk header: '{header}'"));
    let inner = header
        .strip_prefix("@@ -")
        .and_then(|s| s.split(" @@").next())
        .ok_or_else(bad)?;
    let mut sides = inner.split(" +");
    let old = sides.next().ok_or_else(bad)?;
    let new = sides.next().ok_or_else(bad)?;
    let parse_side = |side: &str| -> Result<(usize, usize), RelayError> {
        let mut parts = side.split(',');
        let start = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(bad)?;
        let count = match parts.next() {
            Some(c) => c.parse().map_err(|_| bad())?,
            None => 1,
        };
        Ok((start, count))
    };
    let (old_start, old_count) = parse_side(old)?;
    let (new_start, new_count) = parse_side(new)?;
    Ok((old_start, old_count, new_start, new_count))
}

/// Render a patch set back to unified-diff text.
pub fn render(patches: &[FilePatch]) -> String {
    let mut out = String::new();
    for patch in patches {
        let old = match &patch.old_path {
            Some(p) => format!("a/{}", p.display()),
            None => "/dev/null".to_string(),
        };
        let new = match &patch.new_path {
            Some(p) => format!("b/{}", p.display()),
            None => "/dev/null".to_string(),
        };
        let _ = writeln!(out, "--- {old}");
        let _ = writeln!(out, "+++ {new}");
        for hunk in &patch.hunks {
            let _ = writeln!(
                out,
                "@@ -{},{} +{},{} @@",
                hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
            );
            let total = hunk.lines.len();
            for (idx, line) in hunk.lines.iter().enumerate() {
                let last = idx + 1 == total;
                match line {
                    HunkLine::Context(s) => {
                        let _ = writeln!(out, " {s}");
                        if last && (patch.no_newline_old || patch.no_newline_new) {
                            let _ = writeln!(out, "\\ No newline at end of file");
                        }
                    }
                    HunkLine::Add(s) => {
                        let _ = writeln!(out, "+{s}");
                        if last && patch.no_newline_new {
                            let _ = writeln!(out, "\\ No newline at end of file");
                        }
                    }
                    HunkLine::Remove(s) => {
                        let _ = writeln!(out, "-{s}");
                        if last && patch.no_newline_old {
                            let _ = writeln!(out, "\\ No newline at end of file");
                        }
                    }
                }
            }
        }
    }
    out
}

/// Apply patches to files under `root`. Paths matching `excluded` are
/// skipped. With `reverse` the negated patches are applied. Files that end
/// up deleted also have their now-empty parent directories pruned.
pub fn apply_to_tree(
    patches: &[FilePatch],
    root: &Path,
    excluded: Option<&Glob>,
    reverse: bool,
) -> Result<usize, RelayError> {
    let mut applied = 0;
    for original in patches {
        let reversed_storage;
        let patch: &FilePatch = if reverse {
            reversed_storage = original.reversed();
            &reversed_storage
        } else {
            original
        };
        let rel = patch.path().to_path_buf();
        if let Some(glob) = excluded
            && glob.matches(&rel)
        {
            continue;
        }
        let full = crate::pathutil::resolve_within_root(root, &rel)?;
        let old = match fs::read(&full) {
            Ok(bytes) => Some(String::from_utf8(bytes).map_err(|_| {
                RelayError::validation(format!(
                    "Cannot apply patch to binary file '{}'",
                    rel.display()
                ))
            })?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        match patch.apply(old.as_deref())? {
            Some(new_text) => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&full, new_text)?;
            }
            None => {
                if full.exists() {
                    fs::remove_file(&full)?;
                    crate::pathutil::prune_empty_dirs(root, &full)?;
                }
            }
        }
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Diff;

    fn diff_and_parse(path: &str, old: Option<&str>, new: Option<&str>) -> FilePatch {
        let text = Diff::file(
            Path::new(path),
            old.map(|s| s.as_bytes()),
            new.map(|s| s.as_bytes()),
        );
        let mut parsed = parse(&text).unwrap();
        assert_eq!(parsed.len(), 1, "expected one file patch in {text}");
        parsed.remove(0)
    }

    #[test]
    fn apply_reproduces_the_new_side() {
        let old = "a\nb\nc\nd\ne\n";
        let new = "a\nB\nc\nd\nE\nf\n";
        let patch = diff_and_parse("f.txt", Some(old), Some(new));
        assert_eq!(patch.apply(Some(old)).unwrap().as_deref(), Some(new));
    }

    #[test]
    fn reverse_apply_reproduces_the_old_side() {
        let old = "one\ntwo\nthree\n";
        let new = "one\n2\nthree\nfour\n";
        let patch = diff_and_parse("f.txt", Some(old), Some(new));
        assert_eq!(
            patch.reversed().apply(Some(new)).unwrap().as_deref(),
            Some(old)
        );
    }

    #[test]
    fn creation_and_deletion_round_trip() {
        let content = "fresh\nfile\n";
        let create = diff_and_parse("f.txt", None, Some(content));
        assert_eq!(create.apply(None).unwrap().as_deref(), Some(content));
        // Reversing a creation deletes the file.
        assert_eq!(create.reversed().apply(Some(content)).unwrap(), None);

        let delete = diff_and_parse("f.txt", Some(content), None);
        assert_eq!(delete.apply(Some(content)).unwrap(), None);
    }

    #[test]
    fn missing_trailing_newline_round_trips() {
        let old = "a\nb";
        let new = "a\nc";
        let patch = diff_and_parse("f.txt", Some(old), Some(new));
        assert!(patch.no_newline_old && patch.no_newline_new);
        assert_eq!(patch.apply(Some(old)).unwrap().as_deref(), Some(new));
        assert_eq!(
            patch.reversed().apply(Some(new)).unwrap().as_deref(),
            Some(old)
        );
    }

    #[test]
    fn hunks_relocate_when_content_shifted() {
        let old = "x\ny\nz\na\nb\nc\n";
        let new = "x\ny\nz\na\nB\nc\n";
        let patch = diff_and_parse("f.txt", Some(old), Some(new));
        // The same edit applies when three lines were prepended.
        let shifted_old = "p\nq\nr\nx\ny\nz\na\nb\nc\n";
        let result = patch.apply(Some(shifted_old)).unwrap().unwrap();
        assert_eq!(result, "p\nq\nr\nx\ny\nz\na\nB\nc\n");
    }

    #[test]
    fn conflicting_content_is_an_error() {
        let patch = diff_and_parse("f.txt", Some("a\nb\nc\n"), Some("a\nX\nc\n"));
        let err = patch.apply(Some("entirely\ndifferent\n")).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn parse_rejects_malformed_hunks() {
        assert!(parse("--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n a\n").is_err());
        assert!(parse("--- a/f\n@@ -1 +1 @@\n").is_err());
    }

    #[test]
    fn render_round_trips_through_parse() {
        let old = "a\nb\nc\n";
        let new = "a\nB\nc\n";
        let patch = diff_and_parse("dir/f.txt", Some(old), Some(new));
        let rendered = render(std::slice::from_ref(&patch));
        let reparsed = parse(&rendered).unwrap();
        assert_eq!(reparsed, vec![patch]);
    }

    #[test]
    fn apply_to_tree_creates_modifies_and_deletes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("dir")).unwrap();
        std::fs::write(root.join("dir/mod.txt"), "a\nb\n").unwrap();
        std::fs::write(root.join("dir/del.txt"), "bye\n").unwrap();

        let mut patches = vec![];
        patches.push(diff_and_parse("dir/mod.txt", Some("a\nb\n"), Some("a\nB\n")));
        patches.push(diff_and_parse("dir/del.txt", Some("bye\n"), None));
        patches.push(diff_and_parse("dir/new.txt", None, Some("hello\n")));

        apply_to_tree(&patches, root, None, false).unwrap();
        assert_eq!(std::fs::read_to_string(root.join("dir/mod.txt")).unwrap(), "a\nB\n");
        assert!(!root.join("dir/del.txt").exists());
        assert_eq!(std::fs::read_to_string(root.join("dir/new.txt")).unwrap(), "hello\n");

        apply_to_tree(&patches, root, None, true).unwrap();
        assert_eq!(std::fs::read_to_string(root.join("dir/mod.txt")).unwrap(), "a\nb\n");
        assert_eq!(std::fs::read_to_string(root.join("dir/del.txt")).unwrap(), "bye\n");
        assert!(!root.join("dir/new.txt").exists());
    }
}
