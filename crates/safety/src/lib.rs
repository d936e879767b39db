//! Command safety: intent classification, risk grading, recovery hints,
//! sensitive-path checks and secret redaction.
//!
//! Everything here is pure string analysis.  Nothing runs a command.

mod argv;
pub mod classify;
mod commands;
pub mod hints;
pub mod paths;
pub mod redact;
pub mod risk;
pub mod shell;
pub mod sql;

pub use classify::{CommandIntent, IntentKind, classify, is_write_action, tags};
pub use hints::{NonInteractiveHint, non_interactive_hint};
pub use paths::{PathError, command_touches_sensitive_path, is_sensitive_path, validate_target_path};
pub use redact::{REDACTED, redact_sensitive_text};
pub use risk::{CommandRisk, classify_risk};
pub use shell::shell_escape;
