use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use npmship_npmrc::{GITHUB_REGISTRY, nerf_dart, same_registry};
use npmship_types::{PluginError, Reporter, env_value};

use crate::strategy::{Attempt, AuthMethod, Outcome, VerificationStrategy};

pub const NPM_TOKEN_ENV: &str = "NPM_TOKEN";
pub const NPM_USERNAME_ENV: &str = "NPM_USERNAME";
pub const NPM_PASSWORD_ENV: &str = "NPM_PASSWORD";
pub const NPM_EMAIL_ENV: &str = "NPM_EMAIL";
pub const LEGACY_TOKEN_ENV: &str = "LEGACY_TOKEN";
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Credentials from the user's npmrc or the environment, materialized into
/// the session's registry-config file.
///
/// Secrets are written as `${VAR}` placeholders; the package manager expands
/// them from the environment it runs with.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredCredentials;

impl VerificationStrategy for ConfiguredCredentials {
    fn name(&self) -> &'static str {
        "configured credentials"
    }

    fn attempt(&self, attempt: &mut Attempt<'_>, reporter: &mut dyn Reporter) -> Result<Outcome> {
        let registry = attempt.registry;

        if let Some(found) = attempt.npmrc.credentials_for(registry, attempt.env) {
            // The seeded copy already carries the existing configuration.
            attempt.scoped_npmrc()?;
            reporter.info(&format!(
                "Using {} from existing npmrc for {registry}",
                found.kind()
            ));
            return Ok(Outcome::Established(AuthMethod::ExistingConfig));
        }

        let nerfed = nerf_dart(registry)?;

        if env_value(attempt.env, &[NPM_TOKEN_ENV]).is_some() {
            let path = write_entries(
                attempt,
                &[format!("{nerfed}:_authToken = ${{{NPM_TOKEN_ENV}}}")],
            )?;
            reporter.info(&format!("Wrote NPM_TOKEN to {path}"));
            return Ok(Outcome::Established(AuthMethod::NpmToken));
        }

        let username = env_value(attempt.env, &[NPM_USERNAME_ENV]).map(str::to_string);
        let password = env_value(attempt.env, &[NPM_PASSWORD_ENV]).map(str::to_string);
        let has_email = env_value(attempt.env, &[NPM_EMAIL_ENV]).is_some();
        if let (Some(username), Some(password), true) = (username, password, has_email) {
            let legacy = STANDARD.encode(format!("{username}:{password}"));
            attempt.env.insert(LEGACY_TOKEN_ENV.to_string(), legacy);
            let path = write_entries(
                attempt,
                &[
                    format!("_auth = ${{{LEGACY_TOKEN_ENV}}}"),
                    format!("email = ${{{NPM_EMAIL_ENV}}}"),
                ],
            )?;
            reporter.info(&format!(
                "Wrote NPM_USERNAME, NPM_PASSWORD and NPM_EMAIL to {path}"
            ));
            return Ok(Outcome::Established(AuthMethod::LegacyAuth));
        }

        if env_value(attempt.env, &[GITHUB_TOKEN_ENV]).is_some()
            && same_registry(registry, GITHUB_REGISTRY)
        {
            let path = write_entries(
                attempt,
                &[format!("{nerfed}:_authToken = ${{{GITHUB_TOKEN_ENV}}}")],
            )?;
            reporter.info(&format!("Wrote GITHUB_TOKEN to {path}"));
            return Ok(Outcome::Established(AuthMethod::GithubToken));
        }

        Err(PluginError::NoNpmToken {
            registry: registry.to_string(),
        }
        .into())
    }
}

fn write_entries(attempt: &mut Attempt<'_>, entries: &[String]) -> Result<String> {
    let scoped = attempt.scoped_npmrc()?;
    for entry in entries {
        scoped.append_once(entry)?;
    }
    Ok(scoped.path().display().to_string())
}
