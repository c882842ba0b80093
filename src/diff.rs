//! Unified diff generation: compares file trees and byte contents, assembles
//! Myers-based unified diffs with context hunks, and guards against
//! pathological inputs. The output is consumed by the patch engine, the
//! consistency file and the autopatch writer, so hunk headers follow the
//! standard convention (a zero count names the line after which content is
//! inserted).

use std::{
    collections::{BTreeSet, VecDeque},
    fmt::Write,
    fs,
    path::{Path, PathBuf},
};

use bstr::ByteSlice;
use similar::{Algorithm, ChangeTag, TextDiff};

use crate::errors::RelayError;
use crate::glob::Glob;

/// Result item for a single file diff:
/// - `path`: logical file path
/// - `data`: unified diff text or a large-file marker
#[derive(Debug, Clone)]
pub struct FileDiff {
    /// The file path being diffed.
    pub path: PathBuf,
    /// The complete unified diff output string for that file, or a
    /// large-file marker if the file is too large to diff.
    pub data: String,
}

/// Unified diff generator and helpers.
pub struct Diff;

/// Internal representation of diff lines used while assembling unified hunks.
/// Each variant carries enough position information to compute standard hunk
/// headers even for pure insertions and deletions.
#[derive(Debug, Clone, Copy)]
enum EditLine<'a> {
    // old_line, new_line, text
    Context(usize, usize, &'a str),
    // old_line, new lines before this point, text
    Delete(usize, usize, &'a str),
    // new_line, old lines before this point, text
    Insert(usize, usize, &'a str),
}

impl Diff {
    const MAX_DIFF_LINES: usize = 40_000; // safety cap for pathological inputs
    const LARGE_FILE_MARKER: &'static str = "<LargeFile>";
    const LARGE_FILE_END: &'static str = "</LargeFile>";
    pub const BINARY_MARKER: &'static str = "Binary files differ";
    pub const DEV_NULL: &'static str = "/dev/null";

    /// Paths whose contents differ between the two trees (added, deleted or
    /// modified), optionally narrowed by a glob, sorted.
    pub fn changed_paths(
        old_root: &Path,
        new_root: &Path,
        filter: Option<&Glob>,
    ) -> Result<Vec<PathBuf>, RelayError> {
        let union: BTreeSet<PathBuf> = crate::pathutil::list_files(old_root)?
            .into_iter()
            .chain(crate::pathutil::list_files(new_root)?)
            .collect();

        let mut changed = vec![];
        for rel in union {
            if let Some(glob) = filter
                && !glob.matches(&rel)
            {
                continue;
            }
            let old = read_opt(&old_root.join(&rel))?;
            let new = read_opt(&new_root.join(&rel))?;
            if old != new {
                changed.push(rel);
            }
        }
        Ok(changed)
    }

    /// Compute per-file unified diffs between two trees, honoring an optional
    /// filter. Only differing files are reported.
    pub fn tree(
        old_root: &Path,
        new_root: &Path,
        filter: Option<&Glob>,
    ) -> Result<Vec<FileDiff>, RelayError> {
        let mut results = vec![];
        for rel in Self::changed_paths(old_root, new_root, filter)? {
            let old = read_opt(&old_root.join(&rel))?;
            let new = read_opt(&new_root.join(&rel))?;
            let data = Self::file(&rel, old.as_deref(), new.as_deref());
            results.push(FileDiff { path: rel, data });
        }
        Ok(results)
    }

    /// Format a single file's unified diff, including `---`/`+++` headers.
    /// `None` means the file is absent on that side.
    pub fn file(path: &Path, old: Option<&[u8]>, new: Option<&[u8]>) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "diff --git a/{} b/{}", path.display(), path.display());
        if old.is_none() {
            let _ = writeln!(out, "new file mode 100644");
        } else if new.is_none() {
            let _ = writeln!(out, "deleted file mode 100644");
        }

        let old_bytes = old.unwrap_or_default();
        let new_bytes = new.unwrap_or_default();
        // NUL bytes mark binary content even when it happens to be UTF-8.
        if old_bytes.find_byte(0).is_some() || new_bytes.find_byte(0).is_some() {
            let _ = writeln!(out, "{}", Self::BINARY_MARKER);
            return out;
        }
        match (std::str::from_utf8(old_bytes), std::str::from_utf8(new_bytes)) {
            (Ok(old_text), Ok(new_text)) => {
                if let Some(marker) = Self::large_file_marker(path, old_text, new_text) {
                    out.push_str(&marker);
                    return out;
                }
                let old_pref = if old.is_none() {
                    Self::DEV_NULL.to_string()
                } else {
                    format!("a/{}", path.display())
                };
                let new_pref = if new.is_none() {
                    Self::DEV_NULL.to_string()
                } else {
                    format!("b/{}", path.display())
                };
                let _ = writeln!(out, "--- {old_pref}");
                let _ = writeln!(out, "+++ {new_pref}");
                out.push_str(&Self::unified(old_text, new_text, 3));
            }
            _ => {
                let _ = writeln!(out, "{}", Self::BINARY_MARKER);
            }
        }

        out
    }

    /// Large-file detection: counts lines without re-reading.
    fn large_file_marker(file: &Path, old_text: &str, new_text: &str) -> Option<String> {
        let total_lines = old_text.lines().count() + new_text.lines().count();
        if total_lines > Self::MAX_DIFF_LINES {
            Some(format!(
                "{}{}:{}:{}{}\n",
                Self::LARGE_FILE_MARKER,
                file.display(),
                total_lines,
                Self::MAX_DIFF_LINES,
                Self::LARGE_FILE_END
            ))
        } else {
            None
        }
    }

    /// Streaming unified diff of the hunks only (no file headers). Emits
    /// `\ No newline at end of file` markers so application round-trips
    /// byte-for-byte.
    pub fn unified(old_text: &str, new_text: &str, context: usize) -> String {
        // Myers line diff
        let diff = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .diff_lines(old_text, new_text);

        let mut out = String::with_capacity(((old_text.len() + new_text.len()) / 16).max(1024));

        let old_total = old_text.lines().count();
        let new_total = new_text.lines().count();
        let markers = NewlineMarkers {
            old_last: (!old_text.is_empty() && !old_text.ends_with('\n')).then_some(old_total),
            new_last: (!new_text.is_empty() && !new_text.ends_with('\n')).then_some(new_total),
        };

        // Rolling prefix context (last `context` equal lines when outside a hunk)
        let mut prefix_ctx: VecDeque<EditLine> = VecDeque::with_capacity(context);
        let mut cur_hunk: Vec<EditLine> = Vec::new();
        let mut eq_run: Vec<EditLine> = Vec::new(); // accumulating equal lines while in hunk
        let mut in_hunk = false;

        let mut old_line_no = 1usize;
        let mut new_line_no = 1usize;

        for change in diff.iter_all_changes() {
            let line = change.value().trim_end_matches(['\r', '\n']);
            match change.tag() {
                ChangeTag::Equal => {
                    let entry = EditLine::Context(old_line_no, new_line_no, line);
                    old_line_no += 1;
                    new_line_no += 1;
                    if in_hunk {
                        eq_run.push(entry);
                        // Flush once trailing equal lines exceed 2*context
                        if eq_run.len() > context * 2 {
                            Self::flush_hunk_to_out(
                                &mut out,
                                &mut cur_hunk,
                                &mut eq_run,
                                &mut prefix_ctx,
                                context,
                                &markers,
                            );
                            in_hunk = false;
                        }
                    } else {
                        if prefix_ctx.len() == context {
                            prefix_ctx.pop_front();
                        }
                        prefix_ctx.push_back(entry);
                    }
                }
                ChangeTag::Delete => {
                    let entry = EditLine::Delete(old_line_no, new_line_no - 1, line);
                    old_line_no += 1;
                    if !in_hunk {
                        cur_hunk.extend(prefix_ctx.iter().copied());
                        prefix_ctx.clear();
                        in_hunk = true;
                    }
                    if !eq_run.is_empty() {
                        cur_hunk.append(&mut eq_run);
                    }
                    cur_hunk.push(entry);
                }
                ChangeTag::Insert => {
                    let entry = EditLine::Insert(new_line_no, old_line_no - 1, line);
                    new_line_no += 1;
                    if !in_hunk {
                        cur_hunk.extend(prefix_ctx.iter().copied());
                        prefix_ctx.clear();
                        in_hunk = true;
                    }
                    if !eq_run.is_empty() {
                        cur_hunk.append(&mut eq_run);
                    }
                    cur_hunk.push(entry);
                }
            }
        }

        if in_hunk {
            Self::flush_hunk_to_out(
                &mut out,
                &mut cur_hunk,
                &mut eq_run,
                &mut prefix_ctx,
                context,
                &markers,
            );
        }

        out
    }

    // Flush the current hunk into the output; trailing context is in `eq_run`
    fn flush_hunk_to_out<'a>(
        out: &mut String,
        cur_hunk: &mut Vec<EditLine<'a>>,
        eq_run: &mut Vec<EditLine<'a>>,
        prefix_ctx: &mut VecDeque<EditLine<'a>>,
        context: usize,
        markers: &NewlineMarkers,
    ) {
        // 1. Append up to `context` trailing equal lines to the current hunk.
        let trail_to_take = eq_run.len().min(context);
        for entry in eq_run.iter().take(trail_to_take) {
            cur_hunk.push(*entry);
        }

        // 2. Compute header numbers (line ranges/counts) by scanning the hunk.
        let mut old_first: Option<usize> = None;
        let mut old_count: usize = 0;
        let mut new_first: Option<usize> = None;
        let mut new_count: usize = 0;
        let mut old_before = 0usize;
        let mut new_before = 0usize;

        for e in cur_hunk.iter() {
            match *e {
                EditLine::Context(o, n, _) => {
                    if old_first.is_none() {
                        old_first = Some(o);
                    }
                    old_count += 1;
                    if new_first.is_none() {
                        new_first = Some(n);
                    }
                    new_count += 1;
                }
                EditLine::Delete(o, n_before, _) => {
                    if old_first.is_none() {
                        old_first = Some(o);
                    }
                    old_count += 1;
                    new_before = n_before;
                }
                EditLine::Insert(n, o_before, _) => {
                    if new_first.is_none() {
                        new_first = Some(n);
                    }
                    new_count += 1;
                    old_before = o_before;
                }
            }
        }

        if old_count == 0 && new_count == 0 {
            cur_hunk.clear();
            eq_run.clear();
            return;
        }

        // A zero count names the line after which content is inserted, per
        // the standard unified format.
        let old_start = old_first.unwrap_or(old_before);
        let new_start = new_first.unwrap_or(new_before);

        let _ = writeln!(out, "@@ -{old_start},{old_count} +{new_start},{new_count} @@");

        // 3. Output the hunk according to Myers change order
        for &e in cur_hunk.iter() {
            match e {
                EditLine::Context(o, n, txt) => {
                    let _ = writeln!(out, " {txt}");
                    if markers.old_last == Some(o) || markers.new_last == Some(n) {
                        let _ = writeln!(out, "\\ No newline at end of file");
                    }
                }
                EditLine::Delete(o, _, txt) => {
                    let _ = writeln!(out, "-{txt}");
                    if markers.old_last == Some(o) {
                        let _ = writeln!(out, "\\ No newline at end of file");
                    }
                }
                EditLine::Insert(n, _, txt) => {
                    let _ = writeln!(out, "+{txt}");
                    if markers.new_last == Some(n) {
                        let _ = writeln!(out, "\\ No newline at end of file");
                    }
                }
            }
        }

        // 4. Preserve last `context` equal lines from eq_run for prefix of next hunk.
        prefix_ctx.clear();
        if context > 0 {
            let keep_start = eq_run.len().saturating_sub(context);
            for entry in eq_run.iter().skip(keep_start) {
                prefix_ctx.push_back(*entry);
            }
        }

        cur_hunk.clear();
        eq_run.clear();
    }
}

/// Which line numbers are the final, newline-less lines of each side.
struct NewlineMarkers {
    old_last: Option<usize>,
    new_last: Option<usize>,
}

fn read_opt(path: &Path) -> Result<Option<Vec<u8>>, RelayError> {
    match path.symlink_metadata() {
        Ok(meta) if meta.file_type().is_symlink() => {
            // Compare symlinks by their target path.
            let target = fs::read_link(path)?;
            Ok(Some(format!("symlink -> {}", target.display()).into_bytes()))
        }
        Ok(_) => Ok(Some(fs::read(path)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_produce_no_hunks() {
        assert_eq!(Diff::unified("a\nb\n", "a\nb\n", 3), "");
    }

    #[test]
    fn simple_replacement_hunk() {
        let out = Diff::unified("a\nb\nc\n", "a\nx\nc\n", 3);
        assert_eq!(out, "@@ -1,3 +1,3 @@\n a\n-b\n+x\n c\n");
    }

    #[test]
    fn insertion_into_empty_file_uses_zero_start() {
        let out = Diff::unified("", "a\nb\n", 3);
        assert_eq!(out, "@@ -0,0 +1,2 @@\n+a\n+b\n");
    }

    #[test]
    fn missing_trailing_newline_is_marked() {
        let out = Diff::unified("a\nb", "a\nc", 3);
        assert!(out.contains("-b\n\\ No newline at end of file\n"));
        assert!(out.contains("+c\n\\ No newline at end of file\n"));
    }

    #[test]
    fn distant_edits_produce_separate_hunks() {
        let old: String = (1..=30).map(|i| format!("line{i}\n")).collect();
        let new = old.replace("line2\n", "LINE2\n").replace("line29\n", "LINE29\n");
        let out = Diff::unified(&old, &new, 3);
        assert_eq!(out.matches("@@ -").count(), 2);
    }

    #[test]
    fn file_diff_marks_new_deleted_and_binary() {
        let p = Path::new("dir/f.txt");
        let created = Diff::file(p, None, Some(b"x\n"));
        assert!(created.contains("new file mode 100644"));
        assert!(created.contains("--- /dev/null"));

        let deleted = Diff::file(p, Some(b"x\n"), None);
        assert!(deleted.contains("deleted file mode 100644"));
        assert!(deleted.contains("+++ /dev/null"));

        let binary = Diff::file(p, Some(&[0u8, 159, 146]), Some(b"text\n"));
        assert!(binary.contains(Diff::BINARY_MARKER));
    }

    #[test]
    fn tree_diff_lists_only_changed_paths() {
        let old = tempfile::tempdir().unwrap();
        let new = tempfile::tempdir().unwrap();
        std::fs::write(old.path().join("same.txt"), "same\n").unwrap();
        std::fs::write(new.path().join("same.txt"), "same\n").unwrap();
        std::fs::write(old.path().join("gone.txt"), "bye\n").unwrap();
        std::fs::write(new.path().join("new.txt"), "hi\n").unwrap();

        let changed = Diff::changed_paths(old.path(), new.path(), None).unwrap();
        assert_eq!(changed, vec![PathBuf::from("gone.txt"), PathBuf::from("new.txt")]);
    }
}
