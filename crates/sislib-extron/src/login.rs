//! Telnet login negotiation.
//!
//! A unit greets a new telnet connection with a few lines:
//!
//! ```text
//! (c) Copyright 2020, Extron Electronics, DTP CrossPoint 84, V1.04, 60-1234-01
//! Mon, 19 Oct 2026 10:12:44
//! Password:
//! Login Administrator
//! ```
//!
//! The banner (four commas) names the model, which is the only way to learn
//! it on units without a model-name query. When a password is configured the
//! unit prompts for it and confirms with a `Login ...` line.

use sislib_core::{Diagnostics, Error, HostLink, Result, SessionKey};
use tracing::{debug, info};

use crate::models::parse_banner;
use crate::protocol::encode_command;

/// Outcome of a completed negotiation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    /// Model name from the banner, if one was seen.
    pub model: Option<String>,
}

/// Walk the login dialogue until the unit accepts the session.
///
/// Reads at most `max_lines` lines. `known_model` suppresses banner parsing
/// when the session already has a model.
pub async fn negotiate(
    host: &dyn HostLink,
    diagnostics: &dyn Diagnostics,
    key: &SessionKey,
    max_lines: usize,
    known_model: bool,
) -> Result<LoginOutcome> {
    let password = key.password();
    let mut outcome = LoginOutcome::default();
    let mut model_found = known_model;

    debug!(session = %key, "starting login negotiation");

    for _ in 0..max_lines {
        let line = host.read_line(key).await?;

        if !model_found {
            if let Some(model) = parse_banner(&line) {
                info!(session = %key, model = %model, "model from banner");
                outcome.model = Some(model);
                model_found = true;
            } else {
                // Every line is reported until the model is known,
                // the date line included.
                diagnostics.record_error(
                    key,
                    &format!("does this line contain the model name? {line}"),
                );
            }
        }

        debug!(session = %key, line = %line, "login line");

        if password.is_empty() {
            diagnostics.record_error(
                key,
                "unauthenticated login not implemented, please set a password",
            );
            return Ok(outcome);
        }

        if line.contains("Password:") {
            host.write_line(key, &encode_command(password))
                .await
                .map_err(|e| Error::Login(format!("failed to send password: {e}")))?;
        }
        if line.starts_with("Login") {
            info!(session = %key, prompt = %line, "login successful");
            return Ok(outcome);
        }
    }

    let message = format!("no login confirmation after {max_lines} lines");
    diagnostics.record_error(key, &message);
    Err(Error::Login(message))
}
