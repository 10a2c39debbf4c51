//! Guarded patch application.
//!
//! [`patch_sets`] is a pure transformation over text. [`patch_file`] is the
//! thin shell around it that reads the target once and writes it back
//! atomically only when every step succeeded and something changed.
//!
//! Per step:
//! - guard present: already applied, nothing to do
//! - anchor found exactly once: rewrite it through an [`Edit`]
//! - anchor missing or repeated: abort the whole run

use crate::config::schema::{PatchSet, PatchStep};
use crate::edit::{atomic_write, Edit, EditError, EditResult};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What one step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Applied { bytes_changed: usize },
    AlreadyApplied,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepResult::Applied { bytes_changed } => write!(f, "applied ({bytes_changed} bytes)"),
            StepResult::AlreadyApplied => write!(f, "already applied"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Name of the patch set the step belongs to
    pub set: String,
    pub id: String,
    pub result: StepResult,
}

/// Result of running patch sets over a text.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOutcome holds the patched text"]
pub struct PatchOutcome {
    pub text: String,
    pub reports: Vec<StepReport>,
}

impl PatchOutcome {
    pub fn applied_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.result, StepResult::Applied { .. }))
            .count()
    }

    pub fn is_noop(&self) -> bool {
        self.applied_count() == 0
    }
}

/// Whether [`patch_file`] may touch the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write the patched text back if it changed
    Apply,
    /// Compute only; the file is never written
    Check,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub original: String,
    pub patched: String,
    pub reports: Vec<StepReport>,
    /// True only if the file on disk was rewritten
    pub written: bool,
}

impl FileOutcome {
    pub fn changed(&self) -> bool {
        self.original != self.patched
    }
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("step '{step_id}': {label} not found")]
    MissingAnchor {
        step_id: String,
        label: String,
        anchor: String,
    },

    #[error("step '{step_id}': {label} found {count} times (expected exactly 1)")]
    AmbiguousAnchor {
        step_id: String,
        label: String,
        count: usize,
    },

    #[error("step '{step_id}': edit rejected: {source}")]
    Edit {
        step_id: String,
        #[source]
        source: EditError,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    /// True for failures caused by the target no longer looking as expected.
    pub fn is_anchor_error(&self) -> bool {
        matches!(
            self,
            PatchError::MissingAnchor { .. } | PatchError::AmbiguousAnchor { .. }
        )
    }
}

/// Decide what a single step needs to do against `text`.
///
/// Returns `None` when the guard says the step is already applied.
pub fn plan_step(step: &PatchStep, text: &str) -> Result<Option<Edit>, PatchError> {
    if text.contains(&step.guard) {
        return Ok(None);
    }

    let anchor = &step.anchor.text;
    let mut occurrences = text.match_indices(anchor.as_str());

    let Some((byte_start, _)) = occurrences.next() else {
        return Err(PatchError::MissingAnchor {
            step_id: step.id.clone(),
            label: step.anchor.display_label(),
            anchor: anchor.clone(),
        });
    };

    if occurrences.next().is_some() {
        return Err(PatchError::AmbiguousAnchor {
            step_id: step.id.clone(),
            label: step.anchor.display_label(),
            count: text.matches(anchor.as_str()).count(),
        });
    }

    Ok(Some(Edit::new(
        byte_start,
        byte_start + anchor.len(),
        step.replacement(),
        anchor,
    )))
}

/// Apply one patch set to `text`.
pub fn patch(text: &str, set: &PatchSet) -> Result<PatchOutcome, PatchError> {
    patch_sets(text, &[set])
}

/// Apply patch sets in order, each step seeing the previous step's output.
///
/// Either every step succeeds or an error is returned and no text is
/// produced at all.
pub fn patch_sets(text: &str, sets: &[&PatchSet]) -> Result<PatchOutcome, PatchError> {
    let mut current = text.to_string();
    let mut reports = Vec::with_capacity(sets.iter().map(|s| s.steps.len()).sum());

    for set in sets {
        for step in &set.steps {
            let result = match plan_step(step, &current)? {
                None => StepResult::AlreadyApplied,
                Some(edit) => {
                    let (patched, result) =
                        edit.apply_to(&current)
                            .map_err(|source| PatchError::Edit {
                                step_id: step.id.clone(),
                                source,
                            })?;
                    current = patched;
                    match result {
                        EditResult::Applied { bytes_changed } => {
                            StepResult::Applied { bytes_changed }
                        }
                        EditResult::AlreadyApplied => StepResult::AlreadyApplied,
                    }
                }
            };

            reports.push(StepReport {
                set: set.meta.name.clone(),
                id: step.id.clone(),
                result,
            });
        }
    }

    Ok(PatchOutcome {
        text: current,
        reports,
    })
}

/// Read `path`, patch it in memory, and write it back if it changed.
///
/// Nothing is written unless all steps succeed.
pub fn patch_file(
    path: &Path,
    sets: &[&PatchSet],
    mode: WriteMode,
) -> Result<FileOutcome, PatchError> {
    let original = read_target(path)?;
    let outcome = patch_sets(&original, sets)?;

    let written = mode == WriteMode::Apply && outcome.text != original;
    if written {
        atomic_write(path, outcome.text.as_bytes()).map_err(|source| PatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }

    Ok(FileOutcome {
        path: path.to_path_buf(),
        original,
        patched: outcome.text,
        reports: outcome.reports,
        written,
    })
}

fn read_target(path: &Path) -> Result<String, PatchError> {
    fs::read_to_string(path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => PatchError::FileNotFound(path.to_path_buf()),
        _ => PatchError::Io {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Line of `text` that looks most like the first line of `anchor`.
///
/// Only used to point an operator at what probably changed after an anchor
/// went missing. Returns (1-based line number, line, similarity in 0..=1).
pub fn nearest_line<'a>(text: &'a str, anchor: &str) -> Option<(usize, &'a str, f64)> {
    let needle = anchor.lines().find(|l| !l.trim().is_empty())?.trim();

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let score = strsim::normalized_levenshtein(line.trim(), needle);
            (idx + 1, line, score)
        })
        .max_by(|a, b| a.2.total_cmp(&b.2))
}
