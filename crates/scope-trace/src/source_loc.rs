//! Source locations attached to frames

use core::fmt;

/// Function, file and line of an instrumented scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceLoc {
    function: &'static str,
    file: &'static str,
    line: u32,
}

impl SourceLoc {
    /// Create a location from its parts
    pub const fn new(function: &'static str, file: &'static str, line: u32) -> Self {
        Self {
            function,
            file,
            line,
        }
    }

    /// Location of the caller, without a function name
    ///
    /// Use [`source_loc!`](crate::source_loc) when the function name matters.
    #[track_caller]
    pub fn caller() -> Self {
        let loc = core::panic::Location::caller();
        Self::new("", loc.file(), loc.line())
    }

    /// Enclosing function path, empty when unknown
    pub const fn function(&self) -> &'static str {
        self.function
    }

    /// Source file
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// Line number, 0 when unknown
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// Unqualified function name (last path segment)
    pub fn function_basename(&self) -> &'static str {
        match self.function.rsplit_once("::") {
            Some((_, base)) => base,
            None => self.function,
        }
    }

    /// True when any part of the location is known
    pub fn is_known(&self) -> bool {
        !self.function.is_empty() || !self.file.is_empty() || self.line != 0
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.function)
    }
}
