use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The fundamental edit primitive: byte-span replacement with verification.
///
/// Every patch step compiles down to one of these. Steps decide *where* the
/// span is; the edit only checks that the span still holds what the step saw
/// and splices in the new text.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Edit does nothing until apply_to() is called"]
pub struct Edit {
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// New text to put at [byte_start, byte_end)
    pub new_text: String,
    /// What we expect to find at the span before applying
    pub expected_before: EditVerification,
}

/// Verification strategy for edit safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (used for large anchors)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Before-text verification failed at byte {byte_start}")]
    BeforeTextMismatch {
        byte_start: usize,
        byte_end: usize,
        expected: String,
        found: String,
    },

    #[error("Invalid byte range: [{byte_start}, {byte_end}) in text of length {text_len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        text_len: usize,
    },

    #[error("Byte offset {0} is not on a UTF-8 character boundary")]
    NotCharBoundary(usize),
}

/// Result of applying an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "EditResult should be checked for applied/already-applied"]
pub enum EditResult {
    /// The span was replaced
    Applied { bytes_changed: usize },
    /// The span already held `new_text`
    AlreadyApplied,
}

impl Edit {
    /// Create a new edit with automatic verification generation.
    pub fn new(
        byte_start: usize,
        byte_end: usize,
        new_text: impl Into<String>,
        expected_before: impl AsRef<str>,
    ) -> Self {
        Self {
            byte_start,
            byte_end,
            new_text: new_text.into(),
            expected_before: EditVerification::from_text(expected_before.as_ref()),
        }
    }

    /// Validate the edit against `text`.
    ///
    /// Returns the current text at [byte_start, byte_end) if validation succeeds.
    fn validate<'a>(&self, text: &'a str) -> Result<&'a str, EditError> {
        if self.byte_start > self.byte_end || self.byte_end > text.len() {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                text_len: text.len(),
            });
        }

        for offset in [self.byte_start, self.byte_end] {
            if !text.is_char_boundary(offset) {
                return Err(EditError::NotCharBoundary(offset));
            }
        }

        let current = &text[self.byte_start..self.byte_end];

        // Idempotency
        if current == self.new_text {
            return Ok(current);
        }

        if !self.expected_before.matches(current) {
            return Err(EditError::BeforeTextMismatch {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                expected: format!("{:?}", self.expected_before),
                found: current.to_string(),
            });
        }

        Ok(current)
    }

    /// Apply this edit to an in-memory copy of `text`.
    ///
    /// The input is never modified; on success the spliced text is returned
    /// together with what happened.
    pub fn apply_to(&self, text: &str) -> Result<(String, EditResult), EditError> {
        let current = self.validate(text)?;

        if current == self.new_text {
            return Ok((text.to_string(), EditResult::AlreadyApplied));
        }

        let mut patched = String::with_capacity(
            text.len() + self.new_text.len() - (self.byte_end - self.byte_start),
        );
        patched.push_str(&text[..self.byte_start]);
        patched.push_str(&self.new_text);
        patched.push_str(&text[self.byte_end..]);

        Ok((
            patched,
            EditResult::Applied {
                bytes_changed: self.new_text.len(),
            },
        ))
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full content lands at `path` or the file is left as it was.
/// Once the rename succeeds the write is reported as done; the renamed file
/// carries the fresh mtime of the tempfile.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Same directory keeps the rename on one filesystem
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            ))
        }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    // Keep the target's permissions; NamedTempFile creates 0600 files
    if let Ok(metadata) = fs::metadata(path) {
        temp.as_file().set_permissions(metadata.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
