//! Assertion transforms: verify file contents against a regex, or terminate
//! the migration as an intentional no-op.

use regex::Regex;

use crate::errors::RelayError;
use crate::glob::Glob;
use crate::transform::{TransformStatus, Transformation};
use crate::work::TransformWork;

/// Assert that every matching file does (or does not) contain a pattern.
/// Never modifies anything; a failed assertion aborts the change.
#[derive(Debug)]
pub struct VerifyMatch {
    regex: Regex,
    paths: Glob,
    verify_no_match: bool,
}

impl VerifyMatch {
    pub fn new(pattern: &str, paths: Glob, verify_no_match: bool) -> Result<VerifyMatch, RelayError> {
        let regex = Regex::new(pattern)
            .map_err(|e| RelayError::Config(format!("Invalid verify_match pattern '{pattern}': {e}")))?;
        Ok(VerifyMatch {
            regex,
            paths,
            verify_no_match,
        })
    }
}

impl Transformation for VerifyMatch {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let mut offenders: Vec<String> = vec![];
        for rel in work.list_files()? {
            if !self.paths.matches(&rel) {
                continue;
            }
            let full = work.full_path(&rel)?;
            let bytes = std::fs::read(&full)?;
            let Ok(content) = std::str::from_utf8(&bytes) else {
                continue;
            };
            let found = self.regex.is_match(content);
            if found == self.verify_no_match {
                offenders.push(rel.display().to_string());
            }
        }
        if offenders.is_empty() {
            Ok(TransformStatus::Changed)
        } else {
            Err(RelayError::validation(format!(
                "verify_match '{}' {} in the following files: [{}]",
                self.regex.as_str(),
                if self.verify_no_match {
                    "unexpectedly matched"
                } else {
                    "did not match"
                },
                offenders.join(", ")
            )))
        }
    }

    fn reverse(&self) -> Result<Box<dyn Transformation>, RelayError> {
        // Assertions hold in both directions.
        Ok(Box::new(VerifyMatch {
            regex: self.regex.clone(),
            paths: self.paths.clone(),
            verify_no_match: self.verify_no_match,
        }))
    }

    fn describe(&self) -> String {
        format!("verify_match '{}'", self.regex.as_str())
    }
}

/// Terminate the migration with an empty-change result carrying the given
/// message. Used by configurations to bail out early on known no-ops.
#[derive(Debug)]
pub struct FailWithNoop {
    message: String,
}

impl FailWithNoop {
    pub fn new(message: impl Into<String>) -> FailWithNoop {
        FailWithNoop {
            message: message.into(),
        }
    }
}

impl Transformation for FailWithNoop {
    fn transform(&self, _work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        Err(RelayError::EmptyChange(self.message.clone()))
    }

    fn describe(&self) -> String {
        "fail with noop".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::testsupport::work_in;

    #[test]
    fn verify_match_passes_and_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut work = work_in(tmp.path(), "msg\n");
        work.write_file("a.txt", "Licensed under X\ncode\n").unwrap();

        let ok = VerifyMatch::new("Licensed under", Glob::all(), false).unwrap();
        assert!(ok.transform(&mut work).is_ok());

        let missing = VerifyMatch::new("Copyright", Glob::all(), false).unwrap();
        let err = missing.transform(&mut work).unwrap_err();
        assert!(err.to_string().contains("a.txt"));
    }

    #[test]
    fn verify_no_match_inverts_the_assertion() {
        let tmp = tempfile::tempdir().unwrap();
        let mut work = work_in(tmp.path(), "msg\n");
        work.write_file("a.txt", "no secrets here\n").unwrap();

        let t = VerifyMatch::new("SECRET_KEY", Glob::all(), true).unwrap();
        assert!(t.transform(&mut work).is_ok());
        work.write_file("b.txt", "SECRET_KEY=oops\n").unwrap();
        assert!(t.transform(&mut work).is_err());
    }

    #[test]
    fn fail_with_noop_carries_the_message() {
        let tmp = tempfile::tempdir().unwrap();
        let mut work = work_in(tmp.path(), "msg\n");
        match FailWithNoop::new("nothing interesting").transform(&mut work) {
            Err(RelayError::EmptyChange(msg)) => assert_eq!(msg, "nothing interesting"),
            other => panic!("expected EmptyChange, got {other:?}"),
        }
    }
}
