use anyhow::Result;
use npmship_environment::{CiEnvironment, detect_environment};
use npmship_npmrc::same_registry;
use npmship_registry::{RegistryClient, oidc_audience};
use npmship_types::{EnvMap, Reporter, env_value};

use crate::strategy::{Attempt, AuthMethod, Outcome, VerificationStrategy};

pub const GITHUB_ID_TOKEN_URL_ENV: &str = "ACTIONS_ID_TOKEN_REQUEST_URL";
pub const GITHUB_ID_TOKEN_TOKEN_ENV: &str = "ACTIONS_ID_TOKEN_REQUEST_TOKEN";
pub const GITLAB_ID_TOKEN_ENV: &str = "NPM_ID_TOKEN";

/// OIDC token exchange with the official registry.
///
/// Applies only to the official registry and to CI providers that issue
/// identity tokens. Every failure along the way means "not established".
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedPublishing;

impl VerificationStrategy for TrustedPublishing {
    fn name(&self) -> &'static str {
        "trusted publishing"
    }

    fn attempt(&self, attempt: &mut Attempt<'_>, reporter: &mut dyn Reporter) -> Result<Outcome> {
        if !same_registry(attempt.registry, attempt.official_registry) {
            return Ok(Outcome::NotApplicable);
        }
        let ci = detect_environment(attempt.env);
        if !ci.supports_trusted_publishing() {
            return Ok(Outcome::NotApplicable);
        }

        let client =
            RegistryClient::new(attempt.official_registry).with_timeout(attempt.http_timeout);
        let Some(id_token) = identity_token(ci, attempt.env, &client, attempt.official_registry)
        else {
            reporter.info(&format!("No OIDC identity token available from {ci}"));
            return Ok(Outcome::NotApplicable);
        };

        let name = attempt.manifest.name();
        match client.exchange_oidc_token(name, &id_token) {
            Some(_) => {
                reporter.info(&format!("Trusted publishing established for {name} via {ci}"));
                Ok(Outcome::Established(AuthMethod::TrustedPublishing))
            }
            None => {
                reporter.info(&format!(
                    "Trusted publishing token exchange for {name} did not succeed; falling back to configured credentials"
                ));
                Ok(Outcome::NotApplicable)
            }
        }
    }
}

fn identity_token(
    ci: CiEnvironment,
    env: &EnvMap,
    client: &RegistryClient,
    registry: &str,
) -> Option<String> {
    match ci {
        CiEnvironment::GitHubActions => {
            let url = env_value(env, &[GITHUB_ID_TOKEN_URL_ENV])?;
            let token = env_value(env, &[GITHUB_ID_TOKEN_TOKEN_ENV])?;
            let audience = oidc_audience(registry)?;
            client
                .fetch_github_id_token(url, token, &audience)
                .ok()
                .flatten()
        }
        CiEnvironment::GitLabCI => env_value(env, &[GITLAB_ID_TOKEN_ENV]).map(str::to_string),
        _ => None,
    }
}
