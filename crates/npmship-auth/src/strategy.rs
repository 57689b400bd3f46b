use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use npmship_npmrc::{Npmrc, ScopedNpmrc};
use npmship_types::{EnvMap, PackageManifest, Reporter};

/// How publishing rights were established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// OIDC token exchange; nothing was written to disk.
    TrustedPublishing,
    /// Credentials already present in the user's npmrc.
    ExistingConfig,
    NpmToken,
    LegacyAuth,
    GithubToken,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::TrustedPublishing => write!(f, "trusted publishing"),
            AuthMethod::ExistingConfig => write!(f, "existing npmrc credentials"),
            AuthMethod::NpmToken => write!(f, "NPM_TOKEN"),
            AuthMethod::LegacyAuth => write!(f, "NPM_USERNAME, NPM_PASSWORD and NPM_EMAIL"),
            AuthMethod::GithubToken => write!(f, "GITHUB_TOKEN"),
        }
    }
}

/// Result of one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Established(AuthMethod),
    /// The strategy does not apply here; try the next one.
    NotApplicable,
}

/// Everything a strategy may look at or touch during one verification.
pub struct Attempt<'a> {
    pub cwd: &'a Path,
    pub manifest: &'a PackageManifest,
    pub registry: &'a str,
    pub official_registry: &'a str,
    pub http_timeout: Duration,
    pub env: &'a mut EnvMap,
    /// On-disk configuration, as loaded for this verification.
    pub npmrc: &'a Npmrc,
    scoped: &'a mut Option<ScopedNpmrc>,
}

impl<'a> Attempt<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cwd: &'a Path,
        manifest: &'a PackageManifest,
        registry: &'a str,
        official_registry: &'a str,
        http_timeout: Duration,
        env: &'a mut EnvMap,
        npmrc: &'a Npmrc,
        scoped: &'a mut Option<ScopedNpmrc>,
    ) -> Self {
        Self {
            cwd,
            manifest,
            registry,
            official_registry,
            http_timeout,
            env,
            npmrc,
            scoped,
        }
    }

    /// The session's registry-config file, created (and seeded with the
    /// on-disk configuration) on first use.
    pub fn scoped_npmrc(&mut self) -> Result<&mut ScopedNpmrc> {
        let scoped = match self.scoped.take() {
            Some(scoped) => scoped,
            None => ScopedNpmrc::seeded(&self.npmrc.concatenated())?,
        };
        Ok(self.scoped.insert(scoped))
    }
}

/// One way of establishing the right to publish.
///
/// Strategies run in order; the first [`Outcome::Established`] wins. A typed
/// failure is returned as an error wrapping a
/// [`PluginError`](npmship_types::PluginError).
pub trait VerificationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn attempt(&self, attempt: &mut Attempt<'_>, reporter: &mut dyn Reporter) -> Result<Outcome>;
}
