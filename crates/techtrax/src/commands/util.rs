//! Shared helpers for command handlers.

use std::io::IsTerminal;

use techtrax_core::{Session, SessionContext};

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

/// Parse a JSON argument, naming the offending flag on failure.
pub fn parse_json(raw: &str, field: &str) -> Result<serde_json::Value, CliError> {
    serde_json::from_str(raw).map_err(|e| CliError::Validation {
        field: field.into(),
        reason: format!("invalid JSON: {e}"),
    })
}

/// The stored session, or a login hint.
pub fn require_session(ctx: &SessionContext) -> Result<Session, CliError> {
    ctx.current_session().ok_or_else(|| CliError::NotLoggedIn {
        profile: "default".into(),
    })
}

/// Today's date in the backend's `YYYY-MM-DD` form.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Check a `YYYY-MM-DD` argument.
pub fn validate_date(date: &str) -> Result<(), CliError> {
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| CliError::Validation {
            field: "date".into(),
            reason: format!("expected YYYY-MM-DD, got '{date}'"),
        })
}

/// Check an `HH:MM` argument.
pub fn validate_clock(value: &str, field: &str) -> Result<(), CliError> {
    chrono::NaiveTime::parse_from_str(value, "%H:%M")
        .map(|_| ())
        .map_err(|_| CliError::Validation {
            field: field.into(),
            reason: format!("expected HH:MM, got '{value}'"),
        })
}
