//! Flag-aware profile resolution on top of `techtrax-config`.
//!
//! Core never sees these types -- it receives a pre-built `SessionConfig`
//! and a credential store.

use techtrax_config::{CredentialBackend, Profile};
use techtrax_core::{SessionConfig, SessionContext};

use crate::cli::{CredentialsArg, GlobalOpts};
use crate::error::CliError;

pub use techtrax_config::{Config, config_path, load_config_or_default, save_config};

/// A profile with every CLI override applied.
pub struct Resolved {
    pub name: String,
    pub profile: Profile,
    pub session: SessionConfig,
}

/// `--profile`, then the config's default, then `"default"`.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Resolve the active profile, falling back to flags alone when no
/// profile is configured.
pub fn resolve_profile(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = load_config_or_default();
    let name = active_profile_name(global, &cfg);

    let mut profile = if let Some(profile) = cfg.profiles.get(&name) {
        profile.clone()
    } else {
        let Some(url) = global.url.clone() else {
            if global.profile.is_some() {
                return Err(CliError::ProfileNotFound {
                    name,
                    available: cfg.profile_names().join(", "),
                });
            }
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        };
        Profile {
            url,
            ..Profile::default()
        }
    };

    apply_overrides(&mut profile, global);
    let session = techtrax_config::profile_to_session_config(&profile, &cfg.defaults)?;

    Ok(Resolved {
        name,
        profile,
        session,
    })
}

fn apply_overrides(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(ref url) = global.url {
        profile.url.clone_from(url);
    }
    if let Some(backend) = global.credentials {
        profile.credentials = match backend {
            CredentialsArg::Keyring => CredentialBackend::Keyring,
            CredentialsArg::File => CredentialBackend::File,
        };
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }
}

/// Build the session context for the resolved profile.
pub fn build_context(resolved: &Resolved) -> Result<SessionContext, CliError> {
    let store = techtrax_config::credential_store(&resolved.profile, &resolved.name);
    tracing::debug!(
        profile = %resolved.name,
        url = %resolved.session.url,
        credentials = %resolved.profile.credentials,
        "building session context"
    );
    Ok(SessionContext::new(resolved.session.clone(), store)?)
}
