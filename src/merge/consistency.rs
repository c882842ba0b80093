//! The consistency file: a serialized record of content hashes plus reverse
//! patches that lets a later run recover the pristine origin state from a
//! hand-edited destination tree. Self-delimited: a header, a path→hash
//! table, and a unified-diff stream mapping pristine → destination.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::diff::Diff;
use crate::errors::RelayError;
use crate::glob::Glob;
use crate::hash::{ContentHash, HashKind};
use crate::patch;
use crate::pathutil;

const HEADER: &str = "# repo-relay consistency file";
const VERSION_LINE: &str = "version=1";

/// Hashes-plus-patches artifact persisted in the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyFile {
    pub hash_kind: HashKind,
    /// Hex content hash of every tracked destination file.
    pub entries: BTreeMap<PathBuf, String>,
    /// Unified-diff stream mapping the pristine origin tree to the
    /// destination tree. Reverse-applying it reconstructs the pristine tree.
    pub patches: String,
}

impl ConsistencyFile {
    /// Record the relationship between the pristine (transformed origin)
    /// tree and the destination tree. `exclude` names the consistency file
    /// itself so it never tracks its own bytes.
    pub fn generate(
        pristine_root: &Path,
        destination_root: &Path,
        hash_kind: HashKind,
        exclude: Option<&Path>,
    ) -> Result<ConsistencyFile, RelayError> {
        let filter = match exclude {
            Some(path) => {
                let pattern = path.display().to_string();
                Some(Glob::new(&["**"], &[pattern.as_str()])?)
            }
            None => None,
        };

        let files: Vec<PathBuf> = pathutil::list_files(destination_root)?
            .into_iter()
            .filter(|rel| filter.as_ref().is_none_or(|g| g.matches(rel)))
            .collect();

        // Hashing fans out; everything else in the migration stays serial.
        let hashed: Result<Vec<(PathBuf, String)>, RelayError> = files
            .par_iter()
            .map(|rel| {
                let bytes = fs::read(destination_root.join(rel))?;
                Ok((rel.clone(), ContentHash::of(hash_kind, &bytes).to_hex()))
            })
            .collect();
        let entries: BTreeMap<PathBuf, String> = hashed?.into_iter().collect();

        let mut patches = String::new();
        for file_diff in Diff::tree(pristine_root, destination_root, filter.as_ref())? {
            patches.push_str(&file_diff.data);
        }

        Ok(ConsistencyFile {
            hash_kind,
            entries,
            patches,
        })
    }

    /// Render the self-delimited on-disk form.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');
        out.push_str(VERSION_LINE);
        out.push('\n');
        out.push_str(&format!("hash={}\n", self.hash_kind));
        out.push('\n');
        out.push_str("[hashes]\n");
        for (path, hex) in &self.entries {
            out.push_str(&format!("{hex}\t{}\n", path.display()));
        }
        out.push('\n');
        out.push_str("[patches]\n");
        out.push_str(&self.patches);
        out
    }

    /// Parse the on-disk form back. Fails on unknown headers or a malformed
    /// hash table.
    pub fn parse(text: &str) -> Result<ConsistencyFile, RelayError> {
        let mut lines = text.split('\n');
        if lines.next() != Some(HEADER) {
            return Err(RelayError::validation(
                "Not a consistency file: missing header",
            ));
        }
        if lines.next() != Some(VERSION_LINE) {
            return Err(RelayError::validation(
                "Unsupported consistency file version",
            ));
        }
        let hash_line = lines.next().unwrap_or_default();
        let hash_kind: HashKind = hash_line
            .strip_prefix("hash=")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                RelayError::validation(format!("Bad hash header line: '{hash_line}'"))
            })?;

        // Skip the blank line and the [hashes] marker.
        let mut entries = BTreeMap::new();
        let mut in_hashes = false;
        let mut rest: Vec<&str> = vec![];
        let mut in_patches = false;
        for line in lines {
            if in_patches {
                rest.push(line);
                continue;
            }
            match line {
                "" => {}
                "[hashes]" => in_hashes = true,
                "[patches]" => {
                    in_hashes = false;
                    in_patches = true;
                }
                entry if in_hashes => {
                    let (hex, path) = entry.split_once('\t').ok_or_else(|| {
                        RelayError::validation(format!("Bad hash table entry: '{entry}'"))
                    })?;
                    if hex.len() != hash_kind.hex_len() {
                        return Err(RelayError::validation(format!(
                            "Hash '{hex}' has the wrong length for {hash_kind}"
                        )));
                    }
                    entries.insert(PathBuf::from(path), hex.to_string());
                }
                other => {
                    return Err(RelayError::validation(format!(
                        "Unexpected line in consistency file: '{other}'"
                    )));
                }
            }
        }

        Ok(ConsistencyFile {
            hash_kind,
            entries,
            patches: rest.join("\n"),
        })
    }

    /// Verify that every tracked path's bytes in `root` still hash to the
    /// recorded value.
    pub fn validate_hashes(&self, root: &Path) -> Result<(), RelayError> {
        for (rel, recorded) in &self.entries {
            let full = root.join(rel);
            let bytes = fs::read(&full).map_err(|_| {
                RelayError::validation(format!(
                    "'{}' is tracked by the ConsistencyFile but missing in the directory",
                    rel.display()
                ))
            })?;
            let actual = ContentHash::of(self.hash_kind, &bytes).to_hex();
            if &actual != recorded {
                return Err(RelayError::validation(format!(
                    "'{}' has hash value {recorded} in ConsistencyFile but {actual} in directory",
                    rel.display()
                )));
            }
        }
        Ok(())
    }

    /// Reverse-apply the recorded patches onto `root`, turning a destination
    /// tree whose hashes match the table back into the pristine origin tree.
    pub fn reverse_apply(&self, root: &Path) -> Result<(), RelayError> {
        let patches = patch::parse(&self.patches)?;
        patch::apply_to_tree(&patches, root, None, true)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(dir: &Path, rel: &str, content: &str) {
        let full = dir.join(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn tree_of(root: &Path) -> BTreeMap<PathBuf, String> {
        pathutil::list_files(root)
            .unwrap()
            .into_iter()
            .map(|rel| {
                let content = fs::read_to_string(root.join(&rel)).unwrap();
                (rel, content)
            })
            .collect()
    }

    #[test]
    fn serialize_parse_round_trip() {
        let pristine = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        put(pristine.path(), "dir/foo.txt", "a\nb\nc\n");
        put(dest.path(), "dir/foo.txt", "a\nb\nfoo\nc\n");
        put(dest.path(), "only-dest.txt", "kept\n");
        put(pristine.path(), "only-dest.txt", "kept\n");

        let cf = ConsistencyFile::generate(pristine.path(), dest.path(), HashKind::Sha256, None)
            .unwrap();
        let parsed = ConsistencyFile::parse(&cf.serialize()).unwrap();
        assert_eq!(parsed, cf);
    }

    #[test]
    fn reverse_apply_recovers_the_pristine_tree() {
        let pristine = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        put(pristine.path(), "dir/foo.txt", "a\nb\nc\n");
        put(pristine.path(), "dir/bar.txt", "Another file\n");
        put(dest.path(), "dir/foo.txt", "a\nb\nfoo\nc\n");
        put(dest.path(), "dir/bar.txt", "Another file\n");
        put(dest.path(), "dest-only.cfg", "local\n");

        let cf = ConsistencyFile::generate(pristine.path(), dest.path(), HashKind::Sha256, None)
            .unwrap();
        cf.validate_hashes(dest.path()).unwrap();

        // Copy the destination and reverse it back to pristine.
        let scratch = tempfile::tempdir().unwrap();
        pathutil::copy_tree(dest.path(), scratch.path(), &Glob::all()).unwrap();
        cf.reverse_apply(scratch.path()).unwrap();

        assert_eq!(tree_of(scratch.path()), tree_of(pristine.path()));
    }

    #[test]
    fn hash_mismatch_names_both_values() {
        let pristine = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        put(pristine.path(), "f.txt", "x\n");
        put(dest.path(), "f.txt", "x\n");

        let cf = ConsistencyFile::generate(pristine.path(), dest.path(), HashKind::Sha256, None)
            .unwrap();
        // Tamper after the hashes were recorded.
        put(dest.path(), "f.txt", "tampered\n");
        let err = cf.validate_hashes(dest.path()).unwrap_err().to_string();
        assert!(err.contains("has hash value"));
        assert!(err.contains("in ConsistencyFile but"));
        assert!(err.contains("in directory"));
    }

    #[test]
    fn the_consistency_file_itself_is_excluded() {
        let pristine = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        put(pristine.path(), "f.txt", "x\n");
        put(dest.path(), "f.txt", "x\n");
        put(dest.path(), ".relay/consistency", "old contents\n");

        let cf = ConsistencyFile::generate(
            pristine.path(),
            dest.path(),
            HashKind::Sha256,
            Some(Path::new(".relay/consistency")),
        )
        .unwrap();
        assert!(!cf.entries.contains_key(Path::new(".relay/consistency")));
        assert!(!cf.patches.contains(".relay/consistency"));
    }

    #[test]
    fn sha1_is_supported_as_an_alternative() {
        let pristine = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        put(pristine.path(), "f.txt", "x\n");
        put(dest.path(), "f.txt", "y\n");

        let cf =
            ConsistencyFile::generate(pristine.path(), dest.path(), HashKind::Sha1, None).unwrap();
        assert_eq!(cf.entries[Path::new("f.txt")].len(), HashKind::Sha1.hex_len());
        let parsed = ConsistencyFile::parse(&cf.serialize()).unwrap();
        assert_eq!(parsed.hash_kind, HashKind::Sha1);
    }
}
