pub mod loader;
pub mod schema;

pub use loader::{builtin, load_all, load_from_path, load_from_str, ConfigError};
pub use schema::{
    Anchor, Metadata, Operation, PatchSet, PatchStep, ValidationError, ValidationIssue,
};
