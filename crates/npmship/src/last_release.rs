use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use npmship_auth::{NPM_PASSWORD_ENV, NPM_TOKEN_ENV, NPM_USERNAME_ENV};
use npmship_npmrc::{Credentials, Npmrc};
use npmship_registry::{RegistryAuth, RegistryClient};
use npmship_types::{EnvMap, LastRelease, Reporter, env_value};

use crate::git;

/// Authorization for metadata requests: `NPM_TOKEN`, then the legacy
/// username/password pair, then whatever npmrc holds for the registry.
pub fn registry_auth(registry: &str, npmrc: &Npmrc, env: &EnvMap) -> Option<RegistryAuth> {
    if let Some(token) = env_value(env, &[NPM_TOKEN_ENV]) {
        return Some(RegistryAuth::Bearer(token.to_string()));
    }
    if let (Some(username), Some(password)) = (
        env_value(env, &[NPM_USERNAME_ENV]),
        env_value(env, &[NPM_PASSWORD_ENV]),
    ) {
        return Some(RegistryAuth::Basic(
            STANDARD.encode(format!("{username}:{password}")),
        ));
    }
    match npmrc.credentials_for(registry, env)? {
        Credentials::Token(token) => Some(RegistryAuth::Bearer(token)),
        Credentials::LegacyAuth(encoded) => Some(RegistryAuth::Basic(encoded)),
        Credentials::Basic { username, password } => {
            let password = STANDARD.decode(password.trim()).ok()?;
            let password = String::from_utf8(password).ok()?;
            Some(RegistryAuth::Basic(
                STANDARD.encode(format!("{username}:{password}")),
            ))
        }
    }
}

/// Where to look for the last release of a package.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    pub name: &'a str,
    pub registry: &'a str,
    pub dist_tag: &'a str,
    pub cwd: &'a Path,
    pub http_timeout: Duration,
    pub command_timeout: Option<Duration>,
}

/// Version currently on `lookup.dist_tag` (or `latest`) and its commit.
pub fn find_last_release(
    lookup: &Lookup<'_>,
    auth: Option<&RegistryAuth>,
    env: &EnvMap,
    reporter: &mut dyn Reporter,
) -> Result<Option<LastRelease>> {
    let client = RegistryClient::new(lookup.registry).with_timeout(lookup.http_timeout);
    let Some(packument) = client.fetch_package(lookup.name, auth)? else {
        reporter.info(&format!(
            "No version of package {} found on {}",
            lookup.name, lookup.registry
        ));
        return Ok(None);
    };

    let Some(version) = packument.tagged_version(lookup.dist_tag) else {
        reporter.info(&format!(
            "No version of package {} found on {}",
            lookup.name, lookup.registry
        ));
        return Ok(None);
    };
    let version = version.to_string();

    let git_head = match packument.git_head(&version) {
        Some(head) => Some(head.to_string()),
        None => git::version_head(lookup.cwd, &version, env, lookup.command_timeout),
    };
    reporter.info(&format!(
        "Found version {version} of package {} with dist-tag @{}",
        lookup.name, lookup.dist_tag
    ));
    Ok(Some(LastRelease { version, git_head }))
}
