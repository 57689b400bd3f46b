use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use npmship_auth::{AuthCheck, DEFAULT_HTTP_TIMEOUT, VerifierOptions, official_registry};
use npmship_config::PluginStep;
use npmship_environment::process_env;
use npmship_npmrc::normalize_registry;
use npmship_types::{EnvMap, NextRelease};

/// What the host hands to every lifecycle phase.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub cwd: PathBuf,
    /// Environment for registry resolution and spawned processes. The plugin
    /// may add derived variables (`LEGACY_TOKEN`).
    pub env: EnvMap,
    /// Required by `prepare`, `publish` and `add_channel`.
    pub next_release: Option<NextRelease>,
    /// Steps of the host's publish pipeline, consulted for sibling defaults.
    pub publish_steps: Vec<PluginStep>,
}

impl ExecutionContext {
    pub fn new(cwd: impl Into<PathBuf>, env: EnvMap) -> Self {
        Self {
            cwd: cwd.into(),
            env,
            ..Self::default()
        }
    }

    /// Context over the current process environment.
    pub fn from_process(cwd: impl Into<PathBuf>) -> Self {
        Self::new(cwd, process_env())
    }

    pub fn with_next_release(mut self, next_release: NextRelease) -> Self {
        self.next_release = Some(next_release);
        self
    }

    pub fn with_publish_steps(mut self, steps: Vec<PluginStep>) -> Self {
        self.publish_steps = steps;
        self
    }

    pub(crate) fn require_next_release(&self) -> Result<&NextRelease> {
        self.next_release
            .as_ref()
            .context("no next release supplied; a version is required for this phase")
    }
}

/// Runtime knobs for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Limit for each package-manager or git invocation. `None` waits forever.
    pub command_timeout: Option<Duration>,
    /// Limit for each registry HTTP request.
    pub http_timeout: Duration,
    pub auth_check: AuthCheck,
    /// Official registry. `None` uses `DEFAULT_NPM_REGISTRY` from the
    /// execution environment, then `https://registry.npmjs.org/`.
    pub official_registry: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            auth_check: AuthCheck::default(),
            official_registry: None,
        }
    }
}

impl SessionOptions {
    pub fn official_registry(&self, env: &EnvMap) -> String {
        match &self.official_registry {
            Some(registry) => normalize_registry(registry),
            None => official_registry(env),
        }
    }

    pub(crate) fn verifier_options(&self, env: &EnvMap) -> VerifierOptions {
        VerifierOptions {
            official_registry: self.official_registry(env),
            auth_check: self.auth_check,
            http_timeout: self.http_timeout,
            command_timeout: self.command_timeout,
        }
    }
}
