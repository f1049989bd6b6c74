//! Compiler settings consumed by the middle end.
//!
//! Settings are built once by the driver and threaded explicitly through
//! the walker and optimizer queries; there is no global state.

use indexmap::IndexMap;

/// The two optimizer switches the middle end consumes, plus the table of
/// compile-time program arguments used to fold `argv` lookups.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Elide assert-variant foreign calls entirely.
    pub disable_asserts: bool,
    /// Enable algebraic computed-value inference for integer plus/minus.
    pub algebra: bool,
    /// Program arguments known at compile time, keyed by flag name.
    pub compile_time_args: IndexMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a compile-time program argument, if fixed.
    pub fn compile_time_arg(&self, name: &str) -> Option<&str> {
        self.compile_time_args.get(name).map(String::as_str)
    }
}
