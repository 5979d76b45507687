//! Utility macros for error handling.

/// Creates a [`crate::error::ReplError`] from error kind and description.
///
/// An optional third argument attaches a dynamic detail string, and an
/// optional `source:` argument attaches an underlying error. Callers must
/// have [`crate::error::ReplError`] in scope.
#[macro_export]
macro_rules! repl_error {
    ($kind:expr, $desc:expr) => {
        ReplError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        ReplError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        ReplError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Creates and returns a [`crate::error::ReplError`] from the current function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::repl_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::repl_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return Err($crate::repl_error!($kind, $desc, $detail, source: $source))
    };
}
