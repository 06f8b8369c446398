//! Structured, source-location-carrying errors. A `CompilerError` holds an
//! ordered list of details so lowering can report every unsupported construct
//! in a function at once instead of bailing on the first. The category
//! distinguishes user-facing problems ("simplify your code") from internal
//! invariant violations ("file a compiler bug").

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Either a concrete span in the original source or a marker for code the
/// compiler synthesized itself (memo guards, cache loads). Diagnostic
/// renderers must handle both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceLocation {
    Known {
        start: Position,
        end: Position,
        #[serde(default)]
        filename: Option<String>,
    },
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn known(start: (u32, u32), end: (u32, u32)) -> Self {
        Self::Known {
            start: Position {
                line: start.0,
                column: start.1,
            },
            end: Position {
                line: end.0,
                column: end.1,
            },
            filename: None,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Generated)
    }
}

impl core::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SourceLocation::Known {
                start,
                end,
                filename,
            } => {
                if let Some(filename) = filename {
                    write!(f, "{filename}:")?;
                }
                write!(
                    f,
                    "{}:{}-{}:{}",
                    start.line, start.column, end.line, end.column
                )
            }
            SourceLocation::Generated => f.write_str("generated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorCategory {
    /// A construct the compiler cannot represent. The fix belongs to the
    /// user: simplify or restructure the input function.
    #[strum(serialize = "unsupported syntax")]
    UnsupportedSyntax,
    /// An internal consistency check failed. The input may be perfectly
    /// valid; the fix belongs to the compiler.
    #[strum(serialize = "invariant violation")]
    Invariant,
    /// Invalid options passed to `compile`. Fails before lowering begins.
    #[strum(serialize = "invalid configuration")]
    InvalidConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub reason: String,
    pub description: Option<String>,
    pub loc: Option<SourceLocation>,
    pub suggestions: Vec<String>,
}

impl core::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(loc) = &self.loc {
            write!(f, " ({loc})")?;
        }
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        for suggestion in &self.suggestions {
            write!(f, "\n  help: {suggestion}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CompilerError {
    pub category: ErrorCategory,
    pub details: Vec<ErrorDetail>,
}

impl core::fmt::Display for CompilerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.category)?;
        for detail in &self.details {
            write!(f, "\n- {detail}")?;
        }
        Ok(())
    }
}

impl CompilerError {
    pub fn new(category: ErrorCategory) -> Self {
        Self {
            category,
            details: Vec::new(),
        }
    }

    /// A user-input error: syntax lowering cannot represent.
    pub fn unsupported(reason: impl Into<String>, loc: Option<SourceLocation>) -> Self {
        let mut error = Self::new(ErrorCategory::UnsupportedSyntax);
        error.push_detail(reason, loc);
        error
    }

    /// A compiler-bug signal. Never produced by valid pipeline states.
    pub fn invariant(reason: impl Into<String>, loc: Option<SourceLocation>) -> Self {
        let mut error = Self::new(ErrorCategory::Invariant);
        error.push_detail(reason, loc);
        error
    }

    pub fn config(reason: impl Into<String>) -> Self {
        let mut error = Self::new(ErrorCategory::InvalidConfig);
        error.push_detail(reason, None);
        error
    }

    pub fn push_detail(&mut self, reason: impl Into<String>, loc: Option<SourceLocation>) {
        self.details.push(ErrorDetail {
            reason: reason.into(),
            description: None,
            loc,
            suggestions: Vec::new(),
        });
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        if let Some(detail) = self.details.last_mut() {
            detail.description = Some(description.into());
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        if let Some(detail) = self.details.last_mut() {
            detail.suggestions.push(suggestion.into());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Merges another error's details into this one, keeping this category.
    pub fn merge(&mut self, other: CompilerError) {
        self.details.extend(other.details);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_detail() {
        let mut error = CompilerError::unsupported(
            "with statements are not supported",
            Some(SourceLocation::known((1, 0), (1, 10))),
        );
        error.push_detail("labeled function declarations are not supported", None);

        let rendered = error.to_string();
        assert!(rendered.contains("unsupported syntax"));
        assert!(rendered.contains("with statements"));
        assert!(rendered.contains("labeled function declarations"));
        assert!(rendered.contains("1:0-1:10"));
    }

    #[test]
    fn generated_location_renders_sentinel() {
        assert_eq!(SourceLocation::Generated.to_string(), "generated");
        assert!(SourceLocation::Generated.is_generated());
    }

    #[test]
    fn invariant_and_unsupported_are_distinguishable() {
        let user = CompilerError::unsupported("bad syntax", None);
        let bug = CompilerError::invariant("missing terminal", None);
        assert_eq!(user.category, ErrorCategory::UnsupportedSyntax);
        assert_eq!(bug.category, ErrorCategory::Invariant);
        assert_ne!(user.category, bug.category);
    }

    #[test]
    fn suggestions_render_as_help_lines() {
        let error = CompilerError::unsupported("eval is not supported", None)
            .with_suggestion("remove the call to eval");
        assert!(error.to_string().contains("help: remove the call to eval"));
    }
}
