//! CI environment detection for npmship.
//!
//! Detection reads an explicit environment mapping so the release lifecycle
//! sees the host-supplied environment rather than the process one.
//!
//! # Example
//!
//! ```
//! use npmship_environment::{CiEnvironment, detect_environment};
//! use npmship_types::EnvMap;
//!
//! let mut env = EnvMap::new();
//! env.insert("GITLAB_CI".into(), "true".into());
//! assert_eq!(detect_environment(&env), CiEnvironment::GitLabCI);
//! assert!(detect_environment(&env).supports_trusted_publishing());
//! ```

use std::env;

use npmship_types::{EnvMap, env_value};
use serde::{Deserialize, Serialize};

/// Detected CI environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CiEnvironment {
    GitHubActions,
    GitLabCI,
    CircleCI,
    TravisCI,
    AzurePipelines,
    Jenkins,
    BitbucketPipelines,
    /// No CI detected (local)
    #[default]
    Local,
}

impl std::fmt::Display for CiEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CiEnvironment::GitHubActions => write!(f, "GitHub Actions"),
            CiEnvironment::GitLabCI => write!(f, "GitLab CI/CD"),
            CiEnvironment::CircleCI => write!(f, "CircleCI"),
            CiEnvironment::TravisCI => write!(f, "Travis CI"),
            CiEnvironment::AzurePipelines => write!(f, "Azure Pipelines"),
            CiEnvironment::Jenkins => write!(f, "Jenkins"),
            CiEnvironment::BitbucketPipelines => write!(f, "Bitbucket Pipelines"),
            CiEnvironment::Local => write!(f, "Local"),
        }
    }
}

impl CiEnvironment {
    /// Whether the registry accepts OIDC identity tokens from this provider.
    pub fn supports_trusted_publishing(&self) -> bool {
        matches!(self, CiEnvironment::GitHubActions | CiEnvironment::GitLabCI)
    }
}

const MARKERS: [(&str, CiEnvironment); 7] = [
    ("GITHUB_ACTIONS", CiEnvironment::GitHubActions),
    ("GITLAB_CI", CiEnvironment::GitLabCI),
    ("CIRCLECI", CiEnvironment::CircleCI),
    ("TRAVIS", CiEnvironment::TravisCI),
    ("TF_BUILD", CiEnvironment::AzurePipelines),
    ("JENKINS_URL", CiEnvironment::Jenkins),
    ("BITBUCKET_BUILD_NUMBER", CiEnvironment::BitbucketPipelines),
];

/// Detect the CI environment described by `env`.
pub fn detect_environment(env: &EnvMap) -> CiEnvironment {
    MARKERS
        .iter()
        .find(|(var, _)| env_value(env, &[*var]).is_some())
        .map(|(_, ci)| *ci)
        .unwrap_or_default()
}

/// Check if `env` describes any CI environment
pub fn is_ci(env: &EnvMap) -> bool {
    detect_environment(env) != CiEnvironment::Local
}

/// Snapshot of the process environment, skipping non UTF-8 entries.
pub fn process_env() -> EnvMap {
    env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}
