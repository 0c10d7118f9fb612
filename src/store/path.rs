//! Lens path syntax - minimal subset
//!
//! Supports:
//! - `a.b.c` (field access)
//! - `a[0].b`, `a[0][1]` (list index)
//! - `a.0.b` (numeric segment treated as index)
//! - optional `$.` prefix, `$` alone is the root
//!
//! Does NOT support wildcards, filters or slices.

use std::fmt;

use crate::error::{Result, TesseraError};

/// One step of a lens path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Record field: `.name`
    Field(String),
    /// List element: `[0]`
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Parse a path string into segments
///
/// - `"cities[0].population"` → `[Field("cities"), Index(0), Field("population")]`
/// - `"$"` → `[]`
pub fn parse(path: &str) -> Result<Vec<PathSegment>> {
    let invalid = || TesseraError::InvalidPath {
        path: path.to_string(),
    };

    let body = if path == "$" {
        return Ok(vec![]);
    } else if let Some(stripped) = path.strip_prefix("$.") {
        stripped
    } else {
        path
    };

    if body.is_empty() {
        return Ok(vec![]);
    }

    let mut segments = Vec::new();

    for part in body.split('.') {
        if part.is_empty() {
            return Err(invalid());
        }

        // field[0][1] or [0]
        if let Some(bracket_pos) = part.find('[') {
            let field = &part[..bracket_pos];
            if !field.is_empty() {
                segments.push(PathSegment::Field(field.to_string()));
            }

            let mut rest = &part[bracket_pos..];
            while !rest.is_empty() {
                let inner = rest.strip_prefix('[').ok_or_else(invalid)?;
                let close = inner.find(']').ok_or_else(invalid)?;
                let index: usize = inner[..close].parse().map_err(|_| invalid())?;
                segments.push(PathSegment::Index(index));
                rest = &inner[close + 1..];
            }
        } else if part.contains(']') {
            return Err(invalid());
        } else if let Ok(index) = part.parse::<usize>() {
            segments.push(PathSegment::Index(index));
        } else {
            segments.push(PathSegment::Field(part.to_string()));
        }
    }

    Ok(segments)
}

/// Render segments back to path syntax (`$` for the root)
pub fn format(segments: &[PathSegment]) -> String {
    if segments.is_empty() {
        return "$".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        match segment {
            PathSegment::Field(name) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(name);
            }
            PathSegment::Index(index) => {
                out.push_str(&format!("[{index}]"));
            }
        }
    }
    out
}

/// Append one rendered segment to an already rendered path
pub(crate) fn join(parent: &str, segment: &PathSegment) -> String {
    let parent = if parent == "$" { "" } else { parent };
    match segment {
        PathSegment::Field(name) if parent.is_empty() => name.clone(),
        PathSegment::Field(name) => format!("{parent}.{name}"),
        PathSegment::Index(index) => format!("{parent}[{index}]"),
    }
}
