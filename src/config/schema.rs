use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// An ordered, named sequence of guarded patch steps.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchSet {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub steps: Vec<PatchStep>,
}

impl PatchSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.steps.is_empty() {
            issues.push(ValidationIssue::EmptyStepList);
        }

        let mut seen_ids = HashSet::new();

        for step in &self.steps {
            let step_id = (!step.id.trim().is_empty()).then(|| step.id.clone());

            match &step_id {
                None => issues.push(ValidationIssue::MissingField {
                    step_id: None,
                    field: "id",
                }),
                Some(id) => {
                    if !seen_ids.insert(step.id.as_str()) {
                        issues.push(ValidationIssue::DuplicateId(id.clone()));
                    }
                }
            }

            if step.guard.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    step_id: step_id.clone(),
                    field: "guard",
                });
            }
            if step.anchor.text.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    step_id: step_id.clone(),
                    field: "anchor.text",
                });
            }
            if step.operation.text().trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    step_id: step_id.clone(),
                    field: "operation.text",
                });
            }

            // The remaining checks only make sense once the fields are there
            if step.guard.trim().is_empty() || step.anchor.text.trim().is_empty() {
                continue;
            }

            if step.anchor.text.contains(&step.guard) {
                issues.push(ValidationIssue::InvalidCombo {
                    step_id: step_id.clone(),
                    message: "guard occurs inside the anchor, so the step can never run"
                        .to_string(),
                });
            } else if !step.replacement().contains(&step.guard) {
                issues.push(ValidationIssue::InvalidCombo {
                    step_id: step_id.clone(),
                    message: "operation output does not contain the guard, so the step is not idempotent"
                        .to_string(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Workspace-relative path of the file this set patches
    #[serde(default)]
    pub target: Option<String>,
}

/// One guarded find-and-rewrite.
#[derive(Debug, Deserialize, Clone)]
pub struct PatchStep {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Marker whose presence means the step is already applied
    pub guard: String,
    pub anchor: Anchor,
    pub operation: Operation,
}

impl PatchStep {
    /// Text that takes the anchor's place when the step runs.
    pub fn replacement(&self) -> String {
        match &self.operation {
            Operation::InsertAfter { text } => format!("{}{}", self.anchor.text, text),
            Operation::Replace { text } => text.clone(),
        }
    }
}

/// Exact literal span a step must find before it may rewrite anything.
#[derive(Debug, Deserialize, Clone)]
pub struct Anchor {
    pub text: String,
    /// Human name used in failure messages, e.g. "news block"
    #[serde(default)]
    pub label: Option<String>,
}

impl Anchor {
    pub fn display_label(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => {
                let first_line = self.text.lines().find(|l| !l.trim().is_empty());
                format!("{:?}", first_line.unwrap_or(&self.text).trim())
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    /// Keep the anchor and put `text` right after it
    InsertAfter { text: String },
    /// Swap the anchor for `text`
    Replace { text: String },
}

impl Operation {
    pub fn text(&self) -> &str {
        match self {
            Operation::InsertAfter { text } | Operation::Replace { text } => text,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::InsertAfter { .. } => "insert-after",
            Operation::Replace { .. } => "replace",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyStepList,
    DuplicateId(String),
    MissingField {
        step_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        step_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyStepList => write!(f, "patch set contains no steps"),
            ValidationIssue::DuplicateId(id) => write!(f, "step id '{id}' is used more than once"),
            ValidationIssue::MissingField { step_id, field } => match step_id {
                Some(id) => write!(f, "step '{id}' missing required field '{field}'"),
                None => write!(f, "step missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { step_id, message } => match step_id {
                Some(id) => write!(f, "step '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid step configuration: {message}"),
            },
        }
    }
}
