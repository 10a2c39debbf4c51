use crate::config::schema::{PatchSet, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Source of the patch set shipped with the binary.
const BUILTIN_ARTICLE_PROMPT: &str = include_str!("../../patches/article-prompt.toml");

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    NoPatchFiles {
        dir: PathBuf,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read patch set from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse patch set TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse patch set TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid patch set ({}): {}", path.display(), source),
                None => write!(f, "invalid patch set: {}", source),
            },
            ConfigError::NoPatchFiles { dir } => {
                write!(f, "no .toml patch sets found in {}", dir.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::NoPatchFiles { .. } => None,
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchSet, ConfigError> {
    let set: PatchSet = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    set.validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(set)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchSet, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Load one patch set file, or every `.toml` directly inside a directory.
///
/// Directory entries are loaded in file-name order so runs are reproducible.
pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<(PathBuf, PatchSet)>, ConfigError> {
    let path = path.as_ref();

    if !path.is_dir() {
        return Ok(vec![(path.to_path_buf(), load_from_path(path)?)]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).max_depth(1) {
        let entry = entry.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(ConfigError::NoPatchFiles {
            dir: path.to_path_buf(),
        });
    }

    files
        .into_iter()
        .map(|file| load_from_path(&file).map(|set| (file, set)))
        .collect()
}

/// The patch set that registers the `article` website type.
pub fn builtin() -> Result<PatchSet, ConfigError> {
    load_from_str(BUILTIN_ARTICLE_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Operation, ValidationIssue};

    const MINIMAL: &str = r#"
[meta]
name = "demo"
target = "src/app.js"

[[steps]]
id = "add-b"
guard = "const b"

[steps.anchor]
text = "const a = 1;"
label = "a declaration"

[steps.operation]
type = "insert-after"
text = "\nconst b = 2;"
"#;

    #[test]
    fn test_load_minimal() {
        let set = load_from_str(MINIMAL).unwrap();
        assert_eq!(set.meta.name, "demo");
        assert_eq!(set.meta.target.as_deref(), Some("src/app.js"));
        assert_eq!(set.steps.len(), 1);
        assert!(matches!(
            set.steps[0].operation,
            Operation::InsertAfter { .. }
        ));
        assert_eq!(set.steps[0].replacement(), "const a = 1;\nconst b = 2;");
    }

    #[test]
    fn test_builtin_parses_and_validates() {
        let set = builtin().unwrap();
        assert_eq!(set.meta.name, "article-prompt");
        assert_eq!(
            set.meta.target.as_deref(),
            Some("server/services/promptService.js")
        );
        let ids: Vec<_> = set.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            ["import-article-prompt", "article-type-entry", "article-prompt-dispatch"]
        );
    }

    #[test]
    fn test_rejects_unknown_operation() {
        let input = MINIMAL.replace("insert-after", "prepend");
        assert!(matches!(
            load_from_str(&input),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_set() {
        let err = load_from_str("[meta]\nname = \"empty\"\n").unwrap_err();
        match err {
            ConfigError::Validation { source, .. } => {
                assert!(matches!(source.issues[0], ValidationIssue::EmptyStepList));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_non_idempotent_step() {
        let input = MINIMAL.replace("guard = \"const b\"", "guard = \"const c\"");
        let err = load_from_str(&input).unwrap_err();
        assert!(err.to_string().contains("not idempotent"));
    }

    #[test]
    fn test_rejects_guard_inside_anchor() {
        let input = MINIMAL.replace("guard = \"const b\"", "guard = \"const a\"");
        let err = load_from_str(&input).unwrap_err();
        assert!(err.to_string().contains("can never run"));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let doubled = format!("{MINIMAL}{}", &MINIMAL[MINIMAL.find("[[steps]]").unwrap()..]);
        let err = load_from_str(&doubled).unwrap_err();
        assert!(err.to_string().contains("'add-b' is used more than once"));
    }

    #[test]
    fn test_load_from_path_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.toml");
        fs::write(&file, "[[steps]]\nid = \"x\"\n").unwrap();

        let err = load_from_path(&file).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_load_all_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.toml"), MINIMAL.replace("demo", "second")).unwrap();
        fs::write(dir.path().join("a.toml"), MINIMAL.replace("demo", "first")).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let sets = load_all(dir.path()).unwrap();
        let names: Vec<_> = sets.iter().map(|(_, s)| s.meta.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn test_load_all_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_all(dir.path()),
            Err(ConfigError::NoPatchFiles { .. })
        ));
    }
}
