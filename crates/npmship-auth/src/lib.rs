//! Publish authorization checks for npmship.
//!
//! Before anything is released, [`AuthVerifier::verify`] decides whether the
//! execution context may publish to the package's registry:
//!
//! 1. skip entirely when publishing is disabled or the package is private
//! 2. resolve the registry the package manager will use
//! 3. try each [`VerificationStrategy`] in order (trusted publishing, then
//!    configured credentials)
//! 4. for the official registry, confirm the credentials with the package
//!    manager, once per `(config file, registry)`
//!
//! Typed failures leave as [`PluginError`] values inside the returned
//! [`anyhow::Error`].

mod credentials;
mod strategy;
mod trusted;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use npmship_npm::{PackageManagerCli, reports_not_logged_in};
use npmship_npmrc::{Npmrc, OFFICIAL_REGISTRY, ScopedNpmrc, resolve_registry, same_registry};
use npmship_types::{EnvMap, PackageManager, PackageManifest, PluginError, Reporter};
use serde::{Deserialize, Serialize};

pub use credentials::{
    ConfiguredCredentials, GITHUB_TOKEN_ENV, LEGACY_TOKEN_ENV, NPM_EMAIL_ENV, NPM_PASSWORD_ENV,
    NPM_TOKEN_ENV, NPM_USERNAME_ENV,
};
pub use strategy::{Attempt, AuthMethod, Outcome, VerificationStrategy};
pub use trusted::{
    GITHUB_ID_TOKEN_TOKEN_ENV, GITHUB_ID_TOKEN_URL_ENV, GITLAB_ID_TOKEN_ENV, TrustedPublishing,
};

/// Environment variable overriding the official registry.
pub const DEFAULT_REGISTRY_ENV: &str = "DEFAULT_NPM_REGISTRY";

/// Default timeout for registry HTTP calls
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How credentials are confirmed against the official registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthCheck {
    /// `whoami`; a non-zero exit is `EINVALIDNPMTOKEN`.
    #[default]
    Whoami,
    /// `publish --dry-run`; a "not logged in" diagnostic is `EINVALIDNPMAUTH`.
    DryRun,
}

impl AuthCheck {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "whoami" => Some(AuthCheck::Whoami),
            "dry-run" => Some(AuthCheck::DryRun),
            _ => None,
        }
    }
}

impl fmt::Display for AuthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthCheck::Whoami => write!(f, "whoami"),
            AuthCheck::DryRun => write!(f, "dry-run"),
        }
    }
}

/// Knobs shared by every verification in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierOptions {
    pub official_registry: String,
    pub auth_check: AuthCheck,
    pub http_timeout: Duration,
    pub command_timeout: Option<Duration>,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            official_registry: OFFICIAL_REGISTRY.to_string(),
            auth_check: AuthCheck::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            command_timeout: None,
        }
    }
}

/// Official registry for an environment: `DEFAULT_NPM_REGISTRY` if set.
pub fn official_registry(env: &EnvMap) -> String {
    npmship_types::env_value(env, &[DEFAULT_REGISTRY_ENV])
        .map(npmship_npmrc::normalize_registry)
        .unwrap_or_else(|| OFFICIAL_REGISTRY.to_string())
}

/// One package to verify.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub cwd: &'a Path,
    pub manifest: &'a PackageManifest,
    pub npm_publish: bool,
    /// Package directory argument for a dry-run publish.
    pub pkg_arg: &'a str,
    pub package_manager: PackageManager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NpmPublishDisabled,
    PrivatePackage,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NpmPublishDisabled => write!(f, "npmPublish is false"),
            SkipReason::PrivatePackage => write!(f, "package.json's private property is true"),
        }
    }
}

/// Successful verification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Skipped(SkipReason),
    Verified { registry: String, method: AuthMethod },
}

type LivenessKey = (PathBuf, String);

/// Runs verification strategies and memoizes liveness checks.
pub struct AuthVerifier {
    options: VerifierOptions,
    strategies: Vec<Box<dyn VerificationStrategy>>,
    liveness: BTreeMap<LivenessKey, Result<(), PluginError>>,
}

impl fmt::Debug for AuthVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthVerifier")
            .field("options", &self.options)
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("liveness", &self.liveness)
            .finish()
    }
}

impl AuthVerifier {
    /// Verifier with the default strategy order: trusted publishing, then
    /// configured credentials.
    pub fn new(options: VerifierOptions) -> Self {
        Self::with_strategies(
            options,
            vec![Box::new(TrustedPublishing), Box::new(ConfiguredCredentials)],
        )
    }

    pub fn with_strategies(
        options: VerifierOptions,
        strategies: Vec<Box<dyn VerificationStrategy>>,
    ) -> Self {
        Self {
            options,
            strategies,
            liveness: BTreeMap::new(),
        }
    }

    pub fn options(&self) -> &VerifierOptions {
        &self.options
    }

    /// Number of memoized liveness outcomes.
    pub fn cached_checks(&self) -> usize {
        self.liveness.len()
    }

    /// Verify that `request` may be published.
    ///
    /// `env` may gain derived variables (`LEGACY_TOKEN`). `scoped` is the
    /// session's registry-config file, created on first write.
    pub fn verify(
        &mut self,
        request: &AuthRequest<'_>,
        env: &mut EnvMap,
        scoped: &mut Option<ScopedNpmrc>,
        reporter: &mut dyn Reporter,
    ) -> Result<Verification> {
        if !request.npm_publish {
            return Ok(Verification::Skipped(SkipReason::NpmPublishDisabled));
        }
        if request.manifest.is_private() {
            return Ok(Verification::Skipped(SkipReason::PrivatePackage));
        }

        let npmrc = Npmrc::load(request.cwd, env)?;
        let registry = resolve_registry(
            request.manifest,
            &npmrc,
            env,
            &self.options.official_registry,
        );
        reporter.info(&format!("Verify authentication for registry {registry}"));

        let method = {
            let mut attempt = Attempt::new(
                request.cwd,
                request.manifest,
                &registry,
                &self.options.official_registry,
                self.options.http_timeout,
                env,
                &npmrc,
                scoped,
            );
            let mut established = None;
            for strategy in &self.strategies {
                if let Outcome::Established(method) = strategy.attempt(&mut attempt, reporter)? {
                    established = Some(method);
                    break;
                }
            }
            established.ok_or_else(|| PluginError::NoNpmToken {
                registry: registry.clone(),
            })?
        };

        if method != AuthMethod::TrustedPublishing
            && same_registry(&registry, &self.options.official_registry)
            && let Some(file) = scoped.as_ref()
        {
            self.check_liveness(request, &registry, file.path(), env, reporter)?;
        }

        Ok(Verification::Verified { registry, method })
    }

    fn check_liveness(
        &mut self,
        request: &AuthRequest<'_>,
        registry: &str,
        userconfig: &Path,
        env: &EnvMap,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let key = (userconfig.to_path_buf(), registry.to_string());
        if let Some(cached) = self.liveness.get(&key) {
            return cached.clone().map_err(Into::into);
        }

        let cli = PackageManagerCli::new(request.package_manager, env, self.options.command_timeout);
        // Timeouts and unexplained failures propagate uncached.
        let outcome = match self.options.auth_check {
            AuthCheck::Whoami => {
                let output = cli.whoami(request.cwd, userconfig, registry)?;
                if output.timed_out {
                    return Err(cli.failure("whoami", &output));
                }
                if output.success() {
                    if let Some(user) = output.last_stdout_line() {
                        reporter.info(&format!("Authenticated to {registry} as {user}"));
                    }
                    Ok(())
                } else {
                    Err(PluginError::InvalidNpmToken {
                        registry: registry.to_string(),
                    })
                }
            }
            AuthCheck::DryRun => {
                let output = cli.publish_dry_run(request.cwd, request.pkg_arg, userconfig, registry)?;
                if output.timed_out {
                    return Err(cli.failure("publish --dry-run", &output));
                }
                if reports_not_logged_in(&output) {
                    Err(PluginError::InvalidNpmAuth {
                        registry: registry.to_string(),
                    })
                } else if output.success() {
                    Ok(())
                } else {
                    return Err(cli.failure("publish --dry-run", &output));
                }
            }
        };

        self.liveness.insert(key, outcome.clone());
        outcome.map_err(Into::into)
    }
}
