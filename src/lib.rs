//! Prompt Patcher: idempotent, anchor-guarded text patching
//!
//! Registers new website prompt types in a generator's `promptService.js`
//! by rewriting exact literal spans of the file. It never parses JavaScript.
//!
//! # Architecture
//!
//! A [`PatchSet`] is an ordered list of steps. Each step has a *guard*
//! (marker meaning "already applied"), an *anchor* (exact text that must
//! occur exactly once) and an operation. Steps compile down to a single
//! primitive, [`Edit`], a verified byte-span replacement.
//!
//! # Safety
//!
//! - Anchors match byte-for-byte or the run fails; nothing is guessed
//! - The whole file is patched in memory before anything is written
//! - Atomic file writes (tempfile + fsync + rename)
//! - Workspace boundary enforcement
//! - Idempotent operations
//!
//! # Example
//!
//! ```no_run
//! use prompt_patcher::{config, patch_file, WriteMode};
//! use std::path::Path;
//!
//! let set = config::builtin().expect("builtin patch set");
//! let path = Path::new("server/services/promptService.js");
//!
//! match patch_file(path, &[&set], WriteMode::Apply) {
//!     Ok(outcome) => println!("rewritten: {}", outcome.written),
//!     Err(e) => eprintln!("patch failed: {}", e),
//! }
//! ```

pub mod config;
pub mod edit;
pub mod patcher;
pub mod safety;

// Re-exports
pub use config::{
    builtin, load_all, load_from_path, load_from_str, Anchor, ConfigError, Operation, PatchSet,
    PatchStep,
};
pub use edit::{atomic_write, Edit, EditError, EditResult, EditVerification};
pub use patcher::{
    nearest_line, patch, patch_file, patch_sets, plan_step, FileOutcome, PatchError,
    PatchOutcome, StepReport, StepResult, WriteMode,
};
pub use safety::{SafetyError, WorkspaceGuard};
