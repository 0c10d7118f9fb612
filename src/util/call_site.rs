//! Call-site capture via `#[track_caller]`
//!
//! Public store methods are `#[track_caller]`, so `CallSite::here()` inside
//! them resolves to the user's code rather than to this crate.

use std::fmt;
use std::panic::Location;

/// Source location of a store access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    file: &'static str,
    line: u32,
    column: u32,
}

impl CallSite {
    pub const fn new(file: &'static str, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }

    /// Location of the nearest caller not marked `#[track_caller]`
    #[track_caller]
    pub fn here() -> Self {
        Self::from(Location::caller())
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn capture() -> CallSite {
        CallSite::here()
    }

    #[test]
    fn here_points_at_this_file() {
        let site = CallSite::here();
        assert!(site.file().ends_with("call_site.rs"));
        assert!(site.line() > 0);
    }

    #[test]
    fn track_caller_skips_helper() {
        let expected_line = line!() + 1;
        let site = capture();
        assert_eq!(site.line(), expected_line);
    }

    #[test]
    fn display_is_file_line_column() {
        let site = CallSite::new("app.rs", 3, 9);
        assert_eq!(site.to_string(), "app.rs:3:9");
    }
}
