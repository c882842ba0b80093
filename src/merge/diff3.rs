//! Line-level three-way merge. Two Myers diffs against the base produce edit
//! chunks for each side; non-overlapping chunks interleave cleanly, while
//! overlapping regions with diverging text become git-style conflict blocks.

use similar::{Algorithm, DiffOp, TextDiff};

/// Outcome of merging one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merged {
    Clean(String),
    /// The merged text contains conflict markers.
    Conflicted(String),
}

impl Merged {
    pub fn text(&self) -> &str {
        match self {
            Merged::Clean(t) | Merged::Conflicted(t) => t,
        }
    }

    pub fn is_conflicted(&self) -> bool {
        matches!(self, Merged::Conflicted(_))
    }
}

/// One side's edit against the base: replace base lines
/// `[base_start, base_end)` with `lines`.
#[derive(Debug, Clone)]
struct Chunk {
    base_start: usize,
    base_end: usize,
    lines: Vec<String>,
}

fn chunks(base_lines: &[&str], other: &str) -> Vec<Chunk> {
    let other_lines: Vec<&str> = split_lines(other);
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(base_lines, &other_lines);

    let mut chunks = vec![];
    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index, old_len, ..
            } => chunks.push(Chunk {
                base_start: old_index,
                base_end: old_index + old_len,
                lines: vec![],
            }),
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => chunks.push(Chunk {
                base_start: old_index,
                base_end: old_index,
                lines: collect(&other_lines, new_index, new_len),
            }),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => chunks.push(Chunk {
                base_start: old_index,
                base_end: old_index + old_len,
                lines: collect(&other_lines, new_index, new_len),
            }),
        }
    }
    chunks
}

fn collect(lines: &[&str], start: usize, len: usize) -> Vec<String> {
    lines[start..start + len].iter().map(|s| s.to_string()).collect()
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        vec![]
    } else {
        text.trim_end_matches('\n').split('\n').collect()
    }
}

/// Whether two chunks must be reconciled together. Zero-length chunks are
/// insertion points; an insertion that lands inside or on the edge of the
/// other side's region conflicts with it.
fn overlaps(a: &Chunk, b: &Chunk) -> bool {
    let a_empty = a.base_start == a.base_end;
    let b_empty = b.base_start == b.base_end;
    match (a_empty, b_empty) {
        (true, true) => a.base_start == b.base_start,
        (true, false) => a.base_start >= b.base_start && a.base_start <= b.base_end,
        (false, true) => b.base_start >= a.base_start && b.base_start <= a.base_end,
        (false, false) => a.base_start < b.base_end && b.base_start < a.base_end,
    }
}

/// Three-way merge of `origin` and `destination` against their common
/// `base`. The conflict markers name the destination side first (the tree
/// being merged into).
pub fn merge(base: &str, origin: &str, destination: &str) -> Merged {
    let base_lines: Vec<&str> = split_lines(base);
    let origin_chunks = chunks(&base_lines, origin);
    let dest_chunks = chunks(&base_lines, destination);

    let mut out: Vec<String> = vec![];
    let mut conflicted = false;
    let mut pos = 0usize; // next base line not yet emitted
    let (mut oi, mut di) = (0usize, 0usize);

    while oi < origin_chunks.len() || di < dest_chunks.len() {
        // Take whichever side's next chunk starts earlier.
        let origin_first = match (origin_chunks.get(oi), dest_chunks.get(di)) {
            (Some(a), Some(b)) => a.base_start <= b.base_start,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => unreachable!(),
        };
        let primary = if origin_first {
            &origin_chunks[oi]
        } else {
            &dest_chunks[di]
        };
        let other_next = if origin_first {
            dest_chunks.get(di)
        } else {
            origin_chunks.get(oi)
        };

        let independent = other_next.is_none_or(|o| !overlaps(primary, o));
        if independent {
            // Copy untouched base lines, then the chunk's replacement.
            for line in &base_lines[pos..primary.base_start] {
                out.push((*line).to_string());
            }
            out.extend(primary.lines.iter().cloned());
            pos = primary.base_end;
            if origin_first {
                oi += 1;
            } else {
                di += 1;
            }
            continue;
        }

        // Overlapping edits: grow the region until both sides stabilize,
        // swallowing every chunk that intersects it.
        let mut region_start = primary.base_start;
        let mut region_end = primary.base_end;
        let (o_from, d_from) = (oi, di);
        loop {
            let mut grew = false;
            while let Some(c) = origin_chunks.get(oi) {
                if region_intersects(c, region_start, region_end) {
                    region_start = region_start.min(c.base_start);
                    region_end = region_end.max(c.base_end);
                    oi += 1;
                    grew = true;
                } else {
                    break;
                }
            }
            while let Some(c) = dest_chunks.get(di) {
                if region_intersects(c, region_start, region_end) {
                    region_start = region_start.min(c.base_start);
                    region_end = region_end.max(c.base_end);
                    di += 1;
                    grew = true;
                } else {
                    break;
                }
            }
            if !grew {
                break;
            }
        }

        for line in &base_lines[pos..region_start] {
            out.push((*line).to_string());
        }
        let origin_text = region_text(&base_lines, &origin_chunks[o_from..oi], region_start, region_end);
        let dest_text = region_text(&base_lines, &dest_chunks[d_from..di], region_start, region_end);

        if origin_text == dest_text {
            out.extend(origin_text);
        } else {
            conflicted = true;
            out.push("<<<<<<< destination".to_string());
            out.extend(dest_text);
            out.push("=======".to_string());
            out.extend(origin_text);
            out.push(">>>>>>> origin".to_string());
        }
        pos = region_end;
    }

    for line in &base_lines[pos..] {
        out.push((*line).to_string());
    }

    let mut text = out.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    if conflicted {
        Merged::Conflicted(text)
    } else {
        Merged::Clean(text)
    }
}

fn region_intersects(c: &Chunk, start: usize, end: usize) -> bool {
    let probe = Chunk {
        base_start: start,
        base_end: end,
        lines: vec![],
    };
    overlaps(c, &probe)
}

/// The region's text as one side sees it: base lines with that side's chunks
/// substituted in.
fn region_text(base_lines: &[&str], chunks: &[Chunk], start: usize, end: usize) -> Vec<String> {
    let mut out = vec![];
    let mut pos = start;
    for c in chunks {
        for line in &base_lines[pos..c.base_start] {
            out.push((*line).to_string());
        }
        out.extend(c.lines.iter().cloned());
        pos = c.base_end;
    }
    for line in &base_lines[pos..end.max(pos)] {
        out.push((*line).to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_sided_edits_propagate() {
        let base = "a\nb\nc\n";
        assert_eq!(
            merge(base, "a\nB\nc\n", base),
            Merged::Clean("a\nB\nc\n".to_string())
        );
        assert_eq!(
            merge(base, base, "a\nb\nC\n"),
            Merged::Clean("a\nb\nC\n".to_string())
        );
    }

    #[test]
    fn distant_edits_on_both_sides_interleave() {
        let base = "1\n2\n3\n4\n5\n6\n7\n8\n";
        let origin = base.replace("2\n", "two\n");
        let dest = base.replace("7\n", "seven\n");
        let merged = merge(base, &origin, &dest);
        assert_eq!(
            merged,
            Merged::Clean("1\ntwo\n3\n4\n5\n6\nseven\n8\n".to_string())
        );
    }

    #[test]
    fn identical_changes_do_not_conflict() {
        let base = "a\nb\nc\n";
        let both = "a\nX\nc\n";
        assert_eq!(merge(base, both, both), Merged::Clean(both.to_string()));
    }

    #[test]
    fn diverging_edits_to_the_same_line_conflict() {
        let base = "a\nb\nc\n";
        let merged = merge(base, "origin\nb\nc\n", "destination\nb\nc\n");
        assert!(merged.is_conflicted());
        let text = merged.text();
        assert!(text.contains("<<<<<<< destination"));
        assert!(text.contains("destination"));
        assert!(text.contains("======="));
        assert!(text.contains(">>>>>>> origin"));
        // The rest of the file survives outside the conflict block.
        assert!(text.ends_with("b\nc\n"));
    }

    #[test]
    fn insertions_at_the_same_point_conflict_unless_identical() {
        let base = "a\nb\n";
        let same = merge(base, "a\nnew\nb\n", "a\nnew\nb\n");
        assert_eq!(same, Merged::Clean("a\nnew\nb\n".to_string()));

        let diff = merge(base, "a\nfrom-origin\nb\n", "a\nfrom-dest\nb\n");
        assert!(diff.is_conflicted());
    }

    #[test]
    fn deletion_against_unchanged_side_applies() {
        let base = "a\nb\nc\n";
        assert_eq!(merge(base, "a\nc\n", base), Merged::Clean("a\nc\n".to_string()));
    }
}
