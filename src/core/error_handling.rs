//! Error classification for operator-facing reporting
//!
//! Broker errors split into two audiences: problems the operator can fix
//! (a bad queue declaration, an unknown redrive target) and internal
//! failures that only make sense with debug detail attached.

/// Errors that know whether their message is actionable by the operator
///
/// When `is_user_actionable()` returns `true`, `user_message()` must return
/// `Some`. When it returns `false`, `user_message()` returns `None`.
pub trait ContextualError: std::error::Error {
    /// True when the error text tells the operator what to fix
    fn is_user_actionable(&self) -> bool;

    /// The operator-facing message for actionable errors
    fn user_message(&self) -> Option<&str>;
}

/// Log a fatal error at the detail level its audience needs
///
/// Actionable errors log their own message; system errors log the
/// operation context and push the details down to debug level.
pub fn log_error_with_context<E: ContextualError + std::fmt::Display + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => {
            log::error!("FATAL: {}: {}", operation_context, user_msg);
        }
        _ => {
            log::error!("FATAL: {}", operation_context);
        }
    }
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}
