//! Login, logout and identity handlers.

use std::io::{BufRead, IsTerminal};

use dialoguer::Input;
use secrecy::SecretString;
use tabled::Tabled;

use techtrax_core::{Session, SessionContext};

use crate::cli::{GlobalOpts, LoginArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn session_detail(session: &Session, expires: Option<String>) -> String {
    let mut rows = vec![
        FieldRow {
            field: "User",
            value: session.display_name.clone(),
        },
        FieldRow {
            field: "Id",
            value: session.user_id.clone(),
        },
        FieldRow {
            field: "Role",
            value: session.role.clone(),
        },
    ];
    if let Some(ref tenant) = session.tenant_id {
        rows.push(FieldRow {
            field: "Tenant",
            value: tenant.clone(),
        });
    }
    if let Some(ref email) = session.email {
        rows.push(FieldRow {
            field: "Email",
            value: email.clone(),
        });
    }
    if let Some(expires) = expires {
        rows.push(FieldRow {
            field: "Token expires",
            value: expires,
        });
    }
    output::render_table(&rows)
}

fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn read_password(from_stdin: bool) -> Result<SecretString, CliError> {
    let password = if from_stdin {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_owned()
    } else {
        rpassword::prompt_password("Password: ").map_err(prompt_err)?
    };
    if password.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "password cannot be empty".into(),
        });
    }
    Ok(SecretString::from(password))
}

pub async fn login(
    ctx: &SessionContext,
    resolved: &Resolved,
    args: LoginArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let email = match args.email.or_else(|| resolved.profile.email.clone()) {
        Some(email) => email,
        None if std::io::stdin().is_terminal() && !args.password_stdin => Input::new()
            .with_prompt("Email")
            .interact_text()
            .map_err(prompt_err)?,
        None => {
            return Err(CliError::Validation {
                field: "email".into(),
                reason: "pass --email or set one in the profile".into(),
            });
        }
    };

    let password = read_password(args.password_stdin)?;
    let session = ctx.login(&email, &password).await?;

    let out = output::render_single(
        &global.output,
        &session,
        |s| format!("Logged in as {} ({})", s.display_name, s.role),
        |s| s.user_id.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn logout(ctx: &SessionContext, global: &GlobalOpts) -> Result<(), CliError> {
    let was_authenticated = ctx.is_authenticated();
    ctx.logout().await?;
    let message = if was_authenticated {
        "Logged out"
    } else {
        "No stored session"
    };
    output::print_output(message, global.quiet);
    Ok(())
}

pub fn whoami(ctx: &SessionContext, global: &GlobalOpts) -> Result<(), CliError> {
    let session = util::require_session(ctx)?;
    let expires = ctx
        .tokens()
        .claims()
        .and_then(|c| c.expires_at())
        .map(|at| at.to_rfc3339());

    let out = output::render_single(
        &global.output,
        &session,
        |s| session_detail(s, expires.clone()),
        |s| s.user_id.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
