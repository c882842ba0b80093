//! Declarative workflow configuration. A config file is a TOML document
//! declaring named workflows; loading validates it and building a workflow
//! wires up drivers and transformations. The embedded configuration language
//! of richer deployments stays outside this crate; this loader covers the
//! built-in drivers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::author::AuthoringPolicy;
use crate::drivers::folder::{FolderDestination, FolderOrigin};
use crate::errors::RelayError;
use crate::glob::Glob;
use crate::hash::HashKind;
use crate::merge::autopatch::AutoPatchConfig;
use crate::merge::{MergeImportConfig, MergeStrategy};
use crate::transform::{
    AddLabel, AddOrReplaceLabel, AddTextBeforeLabels, CopyFiles, CreateSymlink, ExposeLabel,
    FailWithNoop, MoveFiles, PatchApply, RemoveFiles, RemoveLabel, Replace, ReplaceLabel,
    Sequence, SetExecutable, SetMessage, SquashNotes, Transformation, UseLastChange, VerifyMatch,
};
use crate::workflow::{Workflow, WorkflowMode};

/// A whole configuration document.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowConfig>,
    /// Directory the config was loaded from; patch files resolve against it.
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    pub origin: DriverConfig,
    pub destination: DriverConfig,
    #[serde(default)]
    pub mode: WorkflowMode,
    #[serde(default)]
    pub origin_files: Option<GlobConfig>,
    #[serde(default)]
    pub destination_files: Option<GlobConfig>,
    #[serde(default)]
    pub authoring: Option<AuthoringPolicy>,
    #[serde(default)]
    pub transformations: Vec<TransformConfig>,
    #[serde(default)]
    pub after_merge_transformations: Vec<TransformConfig>,
    #[serde(default = "default_true")]
    pub set_rev_id: bool,
    #[serde(default)]
    pub custom_rev_id: Option<String>,
    #[serde(default)]
    pub smart_prune: bool,
    #[serde(default)]
    pub migrate_noop_changes: bool,
    #[serde(default)]
    pub merge_import: Option<MergeImportSection>,
    #[serde(default)]
    pub consistency_file_path: Option<PathBuf>,
    #[serde(default)]
    pub consistency_file_hash: HashKind,
    #[serde(default)]
    pub autopatch: Option<AutoPatchSection>,
    #[serde(default)]
    pub reversible_check: bool,
    #[serde(default)]
    pub reversible_check_ignore: Option<GlobConfig>,
    #[serde(default)]
    pub check_last_rev_state: bool,
    #[serde(default)]
    pub expected_fixed_ref: Option<String>,
    #[serde(default)]
    pub pinned_fixed_ref: Option<String>,
    #[serde(default)]
    pub diff_in_origin: bool,
    #[serde(default = "default_true")]
    pub checkout: bool,
}

fn default_true() -> bool {
    true
}

/// Driver declaration: a type tag plus its settings.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverConfig {
    Folder { root: PathBuf },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl GlobConfig {
    fn build(&self) -> Result<Glob, RelayError> {
        if self.include.is_empty() {
            return Glob::from_strings(&["**".to_string()], &self.exclude);
        }
        Glob::from_strings(&self.include, &self.exclude)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeImportSection {
    #[serde(default)]
    pub package_path: PathBuf,
    #[serde(default)]
    pub paths: Option<GlobConfig>,
    #[serde(default)]
    pub use_consistency_file: bool,
    #[serde(default)]
    pub strategy: MergeStrategy,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoPatchSection {
    #[serde(default)]
    pub directory_prefix: PathBuf,
    pub directory: PathBuf,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub strip_file_names_and_line_numbers: bool,
    #[serde(default)]
    pub paths: Option<GlobConfig>,
}

fn default_suffix() -> String {
    ".patch".to_string()
}

/// One transformation declaration.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransformConfig {
    Replace {
        before: String,
        after: String,
        #[serde(default)]
        regex_groups: IndexMap<String, String>,
        #[serde(default)]
        paths: Option<GlobConfig>,
        #[serde(default)]
        multiline: bool,
        #[serde(default)]
        first_only: bool,
    },
    Move {
        before: PathBuf,
        after: PathBuf,
        #[serde(default)]
        paths: Option<GlobConfig>,
        #[serde(default)]
        overwrite: bool,
    },
    Copy {
        before: PathBuf,
        after: PathBuf,
        #[serde(default)]
        paths: Option<GlobConfig>,
        #[serde(default)]
        overwrite: bool,
    },
    Remove {
        paths: GlobConfig,
    },
    Patch {
        /// Unified diff file, relative to the config file.
        file: PathBuf,
        #[serde(default)]
        excluded_paths: Option<GlobConfig>,
    },
    AddLabel {
        name: String,
        value: String,
    },
    AddOrReplaceLabel {
        name: String,
        value: String,
    },
    ReplaceLabel {
        name: String,
        value: String,
    },
    RemoveLabel {
        name: String,
        #[serde(default)]
        whole_message: bool,
    },
    AddTextBeforeLabels {
        text: String,
    },
    SetMessage {
        text: String,
    },
    SquashNotes {
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default)]
        oldest_first: bool,
    },
    UseLastChange {
        #[serde(default = "default_true")]
        message: bool,
        #[serde(default = "default_true")]
        author: bool,
    },
    ExposeLabel {
        name: String,
        #[serde(default)]
        new_name: Option<String>,
        #[serde(default)]
        all: bool,
    },
    VerifyMatch {
        pattern: String,
        #[serde(default)]
        paths: Option<GlobConfig>,
        #[serde(default)]
        verify_no_match: bool,
    },
    FailWithNoop {
        message: String,
    },
    CreateSymlink {
        link: PathBuf,
        target: PathBuf,
    },
    SetExecutable {
        paths: GlobConfig,
        #[serde(default = "default_true")]
        executable: bool,
    },
    Sequence {
        #[serde(default)]
        ignore_noop: bool,
        transformations: Vec<TransformConfig>,
    },
}

impl ConfigFile {
    /// Load and validate a configuration document.
    pub fn load(path: &Path) -> Result<ConfigFile, RelayError> {
        let text = fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Cannot read config '{}': {e}", path.display()))
        })?;
        let mut config: ConfigFile = toml::from_str(&text).map_err(|e| {
            RelayError::Config(format!("Cannot parse config '{}': {e}", path.display()))
        })?;
        if config.workflows.is_empty() {
            return Err(RelayError::Config(format!(
                "Config '{}' declares no workflows",
                path.display()
            )));
        }
        config.base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config)
    }

    /// Validate every workflow without running anything.
    pub fn validate(&self) -> Result<(), RelayError> {
        for name in self.workflows.keys() {
            self.build_workflow(name)?;
        }
        Ok(())
    }

    pub fn workflow_names(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    /// Assemble a runnable workflow by name.
    pub fn build_workflow(&self, name: &str) -> Result<Workflow, RelayError> {
        let cfg = self.workflows.get(name).ok_or_else(|| {
            RelayError::Config(format!(
                "Workflow '{name}' not found; available: [{}]",
                self.workflow_names().join(", ")
            ))
        })?;

        let origin: Box<dyn crate::origin::Origin> = match &cfg.origin {
            DriverConfig::Folder { root } => Box::new(FolderOrigin::new(root.clone())),
        };
        let destination: Box<dyn crate::destination::Destination> = match &cfg.destination {
            DriverConfig::Folder { root } => Box::new(FolderDestination::new(root.clone())),
        };

        let mut workflow = Workflow::new(name, origin, destination);
        workflow.mode = cfg.mode;
        if let Some(glob) = &cfg.origin_files {
            workflow.origin_files = glob.build()?;
        }
        if let Some(glob) = &cfg.destination_files {
            workflow.destination_files = glob.build()?;
        }
        if let Some(authoring) = &cfg.authoring {
            workflow.authoring = authoring.clone();
        }
        workflow.transformations = self.build_sequence(&cfg.transformations, None)?;
        workflow.after_merge_transformations =
            self.build_sequence(&cfg.after_merge_transformations, Some(true))?;
        workflow.set_rev_id = cfg.set_rev_id;
        workflow.custom_rev_id = cfg.custom_rev_id.clone();
        workflow.smart_prune = cfg.smart_prune;
        workflow.migrate_noop_changes = cfg.migrate_noop_changes;
        workflow.merge_import = cfg
            .merge_import
            .as_ref()
            .map(|section| {
                Ok::<_, RelayError>(MergeImportConfig {
                    package_path: section.package_path.clone(),
                    paths: section.paths.as_ref().map(|g| g.build()).transpose()?,
                    use_consistency_file: section.use_consistency_file,
                    strategy: section.strategy,
                })
            })
            .transpose()?;
        workflow.consistency_file_path = cfg.consistency_file_path.clone();
        workflow.consistency_file_hash = cfg.consistency_file_hash;
        workflow.autopatch = cfg
            .autopatch
            .as_ref()
            .map(|section| {
                Ok::<_, RelayError>(AutoPatchConfig {
                    directory_prefix: section.directory_prefix.clone(),
                    directory: section.directory.clone(),
                    suffix: section.suffix.clone(),
                    header: section.header.clone(),
                    strip_file_names_and_line_numbers: section.strip_file_names_and_line_numbers,
                    paths: section.paths.as_ref().map(|g| g.build()).transpose()?,
                })
            })
            .transpose()?;
        workflow.reversible_check = cfg.reversible_check;
        workflow.reversible_check_ignore = cfg
            .reversible_check_ignore
            .as_ref()
            .map(|g| g.build())
            .transpose()?;
        workflow.check_last_rev_state = cfg.check_last_rev_state;
        workflow.expected_fixed_ref = cfg.expected_fixed_ref.clone();
        workflow.pinned_fixed_ref = cfg.pinned_fixed_ref.clone();
        workflow.diff_in_origin = cfg.diff_in_origin;
        workflow.checkout = cfg.checkout;

        if cfg.merge_import.is_some()
            && cfg
                .merge_import
                .as_ref()
                .is_some_and(|m| m.use_consistency_file)
            && cfg.consistency_file_path.is_none()
        {
            return Err(RelayError::Config(format!(
                "Workflow '{name}': merge_import.use_consistency_file requires consistency_file_path"
            )));
        }

        Ok(workflow)
    }

    fn build_sequence(
        &self,
        configs: &[TransformConfig],
        ignore_noop: Option<bool>,
    ) -> Result<Sequence, RelayError> {
        let mut children: Vec<Box<dyn Transformation>> = vec![];
        for config in configs {
            children.push(self.build_transform(config)?);
        }
        let mut sequence = Sequence::new(children);
        if let Some(ignore) = ignore_noop {
            sequence = sequence.with_ignore_noop(ignore);
        }
        Ok(sequence)
    }

    fn build_transform(
        &self,
        config: &TransformConfig,
    ) -> Result<Box<dyn Transformation>, RelayError> {
        let optional_glob = |g: &Option<GlobConfig>| -> Result<Glob, RelayError> {
            match g {
                Some(g) => g.build(),
                None => Ok(Glob::all()),
            }
        };
        Ok(match config {
            TransformConfig::Replace {
                before,
                after,
                regex_groups,
                paths,
                multiline,
                first_only,
            } => Box::new(Replace::new(
                before.clone(),
                after.clone(),
                regex_groups.clone(),
                optional_glob(paths)?,
                *multiline,
                *first_only,
            )?),
            TransformConfig::Move {
                before,
                after,
                paths,
                overwrite,
            } => Box::new(MoveFiles::new(
                before.clone(),
                after.clone(),
                optional_glob(paths)?,
                *overwrite,
            )),
            TransformConfig::Copy {
                before,
                after,
                paths,
                overwrite,
            } => Box::new(CopyFiles::new(
                before.clone(),
                after.clone(),
                optional_glob(paths)?,
                *overwrite,
            )),
            TransformConfig::Remove { paths } => Box::new(RemoveFiles::new(paths.build()?)),
            TransformConfig::Patch {
                file,
                excluded_paths,
            } => {
                let full = self.base_dir.join(file);
                let text = fs::read_to_string(&full).map_err(|e| {
                    RelayError::Config(format!("Cannot read patch '{}': {e}", full.display()))
                })?;
                let excluded = excluded_paths.as_ref().map(|g| g.build()).transpose()?;
                Box::new(PatchApply::new(text, excluded)?)
            }
            TransformConfig::AddLabel { name, value } => {
                Box::new(AddLabel::new(name.clone(), value.clone()))
            }
            TransformConfig::AddOrReplaceLabel { name, value } => {
                Box::new(AddOrReplaceLabel::new(name.clone(), value.clone()))
            }
            TransformConfig::ReplaceLabel { name, value } => {
                Box::new(ReplaceLabel::new(name.clone(), value.clone()))
            }
            TransformConfig::RemoveLabel {
                name,
                whole_message,
            } => Box::new(RemoveLabel::new(name.clone(), *whole_message)),
            TransformConfig::AddTextBeforeLabels { text } => {
                Box::new(AddTextBeforeLabels::new(text.clone()))
            }
            TransformConfig::SetMessage { text } => Box::new(SetMessage::new(text.clone())),
            TransformConfig::SquashNotes {
                prefix,
                oldest_first,
            } => {
                let notes = match prefix {
                    Some(p) => SquashNotes::new(p.clone()),
                    None => SquashNotes::default(),
                };
                Box::new(notes.oldest_first(*oldest_first))
            }
            TransformConfig::UseLastChange { message, author } => {
                Box::new(UseLastChange::new(*message, *author))
            }
            TransformConfig::ExposeLabel {
                name,
                new_name,
                all,
            } => {
                let mut expose = ExposeLabel::new(name.clone()).all_values(*all);
                if let Some(new_name) = new_name {
                    expose = expose.renamed(new_name.clone());
                }
                Box::new(expose)
            }
            TransformConfig::VerifyMatch {
                pattern,
                paths,
                verify_no_match,
            } => Box::new(VerifyMatch::new(
                pattern,
                optional_glob(paths)?,
                *verify_no_match,
            )?),
            TransformConfig::FailWithNoop { message } => {
                Box::new(FailWithNoop::new(message.clone()))
            }
            TransformConfig::CreateSymlink { link, target } => {
                Box::new(CreateSymlink::new(link.clone(), target.clone()))
            }
            TransformConfig::SetExecutable { paths, executable } => {
                Box::new(SetExecutable::new(paths.build()?, *executable))
            }
            TransformConfig::Sequence {
                ignore_noop,
                transformations,
            } => Box::new(
                self.build_sequence(transformations, Some(*ignore_noop))?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("relay.toml");
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn loads_and_builds_a_folder_workflow() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[workflows.default]
mode = "SQUASH"
origin = { type = "folder", root = "/tmp/src" }
destination = { type = "folder", root = "/tmp/dst" }
origin_files = { include = ["**"], exclude = ["secret/**"] }

[[workflows.default.transformations]]
type = "replace"
before = "internal.example.com"
after = "example.io"

[[workflows.default.transformations]]
type = "add_label"
name = "Imported"
value = "yes"
"#,
        );
        let config = ConfigFile::load(&path).unwrap();
        config.validate().unwrap();
        let workflow = config.build_workflow("default").unwrap();
        assert_eq!(workflow.mode, WorkflowMode::Squash);
        assert!(!workflow.origin_files.matches("secret/key.pem"));
        assert_eq!(workflow.transformations.leaf_count(), 2);
    }

    #[test]
    fn unknown_workflow_and_bad_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[workflows.only]
origin = { type = "folder", root = "/a" }
destination = { type = "folder", root = "/b" }
"#,
        );
        let config = ConfigFile::load(&path).unwrap();
        assert!(config.build_workflow("missing").is_err());

        let bad = write_config(tmp.path(), "not = valid [ toml");
        assert!(matches!(
            ConfigFile::load(&bad),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn consistency_file_requirement_is_enforced() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[workflows.default]
origin = { type = "folder", root = "/a" }
destination = { type = "folder", root = "/b" }
merge_import = { use_consistency_file = true }
"#,
        );
        let config = ConfigFile::load(&path).unwrap();
        let err = config.build_workflow("default").unwrap_err().to_string();
        assert!(err.contains("requires consistency_file_path"));
    }

    #[test]
    fn nested_sequences_flatten_for_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[workflows.default]
origin = { type = "folder", root = "/a" }
destination = { type = "folder", root = "/b" }

[[workflows.default.transformations]]
type = "sequence"
ignore_noop = true
transformations = [
    { type = "replace", before = "a", after = "b" },
    { type = "replace", before = "c", after = "d" },
]

[[workflows.default.transformations]]
type = "remove_label"
name = "Internal-Bug"
"#,
        );
        let workflow = ConfigFile::load(&path)
            .unwrap()
            .build_workflow("default")
            .unwrap();
        assert_eq!(workflow.transformations.leaf_count(), 3);
    }
}
