//! Config subcommand handlers.

use dialoguer::{Confirm, Input, Select};
use serde::Serialize;
use tabled::Tabled;

use techtrax_config::{CredentialBackend, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn save(cfg: &Config) -> Result<(), CliError> {
    let path = config::save_config(cfg)?;
    eprintln!("   ✓ Saved {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct ProfileSummary {
    name: String,
    url: String,
    credentials: String,
    default: bool,
}

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Profile")]
    name: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Credentials")]
    credentials: String,
}

fn summaries(cfg: &Config) -> Vec<ProfileSummary> {
    cfg.profile_names()
        .into_iter()
        .filter_map(|name| {
            cfg.profiles.get(name).map(|p| ProfileSummary {
                name: name.to_owned(),
                url: p.url.clone(),
                credentials: p.credentials.to_string(),
                default: cfg.default_profile.as_deref() == Some(name),
            })
        })
        .collect()
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = config::load_config_or_default();
    let config_path = config::config_path();
    eprintln!("TechTrax CLI configuration");
    eprintln!("   Config path: {}\n", config_path.display());

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default(global.profile.clone().unwrap_or_else(|| "default".into()))
        .interact_text()
        .map_err(prompt_err)?;

    let url: String = Input::new()
        .with_prompt("Server URL")
        .default(
            global
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:5000".into()),
        )
        .validate_with(|input: &String| {
            techtrax_config::parse_server_url(input)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .interact_text()
        .map_err(prompt_err)?;

    let email: String = Input::new()
        .with_prompt("Email (optional)")
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;

    let choices = &[
        "System keyring (recommended)",
        "File in the data directory",
    ];
    let credentials = match Select::new()
        .with_prompt("Where should tokens be stored?")
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?
    {
        0 => CredentialBackend::Keyring,
        _ => CredentialBackend::File,
    };

    if cfg.profiles.contains_key(&profile_name)
        && !Confirm::new()
            .with_prompt(format!("Profile '{profile_name}' exists. Overwrite?"))
            .default(false)
            .interact()
            .map_err(prompt_err)?
    {
        return Ok(());
    }

    cfg.profiles.insert(
        profile_name.clone(),
        Profile {
            url,
            email: (!email.is_empty()).then_some(email),
            credentials,
            ..Profile::default()
        },
    );
    if cfg.profiles.len() == 1 || cfg.default_profile.is_none() {
        cfg.default_profile = Some(profile_name.clone());
    }

    save(&cfg)?;
    eprintln!("   Next: techtrax login --profile {profile_name}");
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),

        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("# unrenderable: {e}")),
                |c| c.default_profile.clone().unwrap_or_default(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let out = output::render_list(
                &global.output,
                &summaries(&cfg),
                |s| ProfileRow {
                    marker: if s.default { "*" } else { "" },
                    name: s.name.clone(),
                    url: s.url.clone(),
                    credentials: s.credentials.clone(),
                },
                |s| s.name.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: cfg.profile_names().join(", "),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            save(&cfg)?;
            output::print_output(&format!("Default profile: {name}"), global.quiet);
            Ok(())
        }
    }
}
