//! Core domain types for npmship.
//!
//! This crate provides the types shared by every npmship crate: the package
//! manifest as far as publishing cares about it, release metadata returned to
//! the host, the typed error taxonomy and the [`Reporter`] logging seam.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier under which the plugin is registered in a release pipeline.
pub const PLUGIN_ID: &str = "npmship";

/// Default distribution tag.
pub const DEFAULT_DIST_TAG: &str = "latest";

/// Environment variables visible to the plugin and the processes it spawns.
pub type EnvMap = BTreeMap<String, String>;

/// First non-empty value among `names`.
pub fn env_value<'a>(env: &'a EnvMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| env.get(*name))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

/// Supported package-manager binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Npm,
    Pnpm,
}

impl PackageManager {
    /// Every supported package manager, in declaration order.
    pub const ALL: [PackageManager; 2] = [PackageManager::Npm, PackageManager::Pnpm];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Pnpm => "pnpm",
        }
    }

    /// Parse a configured package manager name. Matching is exact.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|pm| pm.as_str() == value)
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `publishConfig` section of a `package.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Remaining keys, including scoped overrides such as `@scope:registry`.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl PublishConfig {
    /// Registry override for a scope (`@scope:registry`), if configured.
    pub fn scoped_registry(&self, scope: &str) -> Option<&str> {
        self.other
            .get(&format!("{scope}:registry"))
            .and_then(Value::as_str)
    }
}

/// The subset of `package.json` the release lifecycle reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_config: Option<PublishConfig>,
}

impl PackageManifest {
    /// Only a literal `true` marks a package private.
    pub fn is_private(&self) -> bool {
        matches!(self.private, Some(Value::Bool(true)))
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// The `@scope` part of a scoped package name.
    pub fn scope(&self) -> Option<&str> {
        package_scope(self.name())
    }
}

/// The `@scope` part of a package name, if it is scoped.
pub fn package_scope(name: &str) -> Option<&str> {
    if !name.starts_with('@') {
        return None;
    }
    name.split_once('/').map(|(scope, _)| scope)
}

/// Escape a package name for use as a single registry URL path segment.
pub fn escape_package_name(name: &str) -> String {
    name.replace('/', "%2f")
}

/// The release being produced, as supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextRelease {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl NextRelease {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            channel: None,
        }
    }

    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

/// Release metadata handed back to the host after publish / add-channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Display name embedding the distribution tag.
    pub name: String,
    /// Public package page; only set for the official registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Distribution tag the version was published on.
    pub channel: String,
}

/// Last version found on the registry for a distribution tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRelease {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_head: Option<String>,
}

/// Typed plugin error. Hosts branch on [`PluginError::code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    #[error("invalid `npmPublish` option: expected a boolean, got {value}")]
    InvalidNpmPublish { value: String },

    #[error("invalid `tarballDir` option: expected a non-empty string, got {value}")]
    InvalidTarballDir { value: String },

    #[error("invalid `pkgRoot` option: expected a non-empty string, got {value}")]
    InvalidPkgRoot { value: String },

    #[error("invalid `packageManager` option: expected one of npm, pnpm, got {value}")]
    InvalidPackageManager { value: String },

    #[error(
        "invalid `packages` option: expected a list of package roots or package objects, got {value}"
    )]
    InvalidPackages { value: String },

    #[error("missing `package.json` file in {}", .dir.display())]
    MissingManifest { dir: PathBuf },

    #[error("no \"name\" found in {}", .path.display())]
    MissingPackageName { path: PathBuf },

    #[error("failed to parse {}: {message}", .path.display())]
    InvalidManifest { path: PathBuf, message: String },

    #[error(
        "no npm token specified for registry {registry}; set NPM_TOKEN, or NPM_USERNAME, NPM_PASSWORD and NPM_EMAIL"
    )]
    NoNpmToken { registry: String },

    #[error("invalid npm token for registry {registry}: the identity check was rejected")]
    InvalidNpmToken { registry: String },

    #[error("invalid npm authentication for registry {registry}: dry-run publish reports no login")]
    InvalidNpmAuth { registry: String },
}

impl PluginError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            PluginError::InvalidNpmPublish { .. } => "EINVALIDNPMPUBLISH",
            PluginError::InvalidTarballDir { .. } => "EINVALIDTARBALLDIR",
            PluginError::InvalidPkgRoot { .. } => "EINVALIDPKGROOT",
            PluginError::InvalidPackageManager { .. } => "EINVALIDPACKAGEMANAGER",
            PluginError::InvalidPackages { .. } => "EINVALIDPACKAGES",
            PluginError::MissingManifest { .. } => "ENOPKG",
            PluginError::MissingPackageName { .. } => "ENOPKGNAME",
            PluginError::InvalidManifest { .. } => "EINVALIDPKG",
            PluginError::NoNpmToken { .. } => "ENONPMTOKEN",
            PluginError::InvalidNpmToken { .. } => "EINVALIDNPMTOKEN",
            PluginError::InvalidNpmAuth { .. } => "EINVALIDNPMAUTH",
        }
    }
}

/// Every error raised during one lifecycle phase, in the order found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateError {
    errors: Vec<PluginError>,
}

impl AggregateError {
    pub fn new(errors: Vec<PluginError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[PluginError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<PluginError> {
        self.errors
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.errors.iter().map(PluginError::code).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, error: PluginError) {
        self.errors.push(error);
    }

    pub fn merge(&mut self, other: AggregateError) {
        self.errors.extend(other.errors);
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<PluginError> for AggregateError {
    fn from(error: PluginError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl From<Vec<PluginError>> for AggregateError {
    fn from(errors: Vec<PluginError>) -> Self {
        Self { errors }
    }
}

impl Extend<PluginError> for AggregateError {
    fn extend<I: IntoIterator<Item = PluginError>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "{}: {}", self.errors[0].code(), self.errors[0]),
            n => {
                write!(f, "{n} errors occurred:")?;
                for error in &self.errors {
                    write!(f, "\n  {}: {}", error.code(), error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AggregateError {}

/// Logging seam supplied by the host.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Reporter that records messages so they can be replayed later.
///
/// Used for work running off the host's thread, where the host reporter
/// cannot be shared.
#[derive(Debug, Clone, Default)]
pub struct BufferedReporter {
    entries: Vec<(Level, String)>,
}

impl BufferedReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[(Level, String)] {
        &self.entries
    }

    pub fn messages(&self, level: Level) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(l, _)| *l == level)
            .map(|(_, msg)| msg.as_str())
    }

    /// Forward every recorded message, in order.
    pub fn replay(self, into: &mut dyn Reporter) {
        for (level, msg) in self.entries {
            match level {
                Level::Info => into.info(&msg),
                Level::Warn => into.warn(&msg),
                Level::Error => into.error(&msg),
            }
        }
    }
}

impl Reporter for BufferedReporter {
    fn info(&mut self, msg: &str) {
        self.entries.push((Level::Info, msg.to_string()));
    }

    fn warn(&mut self, msg: &str) {
        self.entries.push((Level::Warn, msg.to_string()));
    }

    fn error(&mut self, msg: &str) {
        self.entries.push((Level::Error, msg.to_string()));
    }
}
