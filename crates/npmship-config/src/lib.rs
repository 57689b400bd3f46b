//! Plugin option handling for npmship.
//!
//! Options reach the plugin as a raw JSON object. This crate:
//! - validates them ([`validate`]), returning every problem in declaration order
//! - merges defaults from a sibling `publish` step ([`effective_options`])
//! - turns them into a typed [`PluginConfig`] with one [`PackageTarget`] per package
//! - loads the pipeline file (`.npmship.toml`) used by the CLI
//!
//! # Example
//!
//! ```
//! use npmship_config::{PluginConfig, RawOptions};
//!
//! let mut options = RawOptions::new();
//! options.insert("tarballDir".into(), "dist".into());
//!
//! let config = PluginConfig::from_options(&options).expect("valid options");
//! assert!(config.npm_publish);
//! assert_eq!(config.targets()[0].tarball_dir.as_deref(), Some("dist"));
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use npmship_types::{AggregateError, PLUGIN_ID, PackageManager, PluginError};

/// Raw plugin options as supplied by the host.
pub type RawOptions = Map<String, Value>;

/// Default pipeline configuration file name
pub const CONFIG_FILE: &str = ".npmship.toml";

const NPM_PUBLISH: &str = "npmPublish";
const TARBALL_DIR: &str = "tarballDir";
const PKG_ROOT: &str = "pkgRoot";
const PACKAGE_MANAGER: &str = "packageManager";
const PACKAGES: &str = "packages";

type Validator = fn(&Value) -> bool;
type ErrorFactory = fn(String) -> PluginError;

/// Checked options, in the order their errors are reported.
const VALIDATORS: [(&str, Validator, ErrorFactory); 5] = [
    (NPM_PUBLISH, Value::is_boolean, invalid_npm_publish),
    (TARBALL_DIR, is_non_empty_string, invalid_tarball_dir),
    (PKG_ROOT, is_non_empty_string, invalid_pkg_root),
    (PACKAGE_MANAGER, is_package_manager, invalid_package_manager),
    (PACKAGES, is_package_list, invalid_packages),
];

fn invalid_npm_publish(value: String) -> PluginError {
    PluginError::InvalidNpmPublish { value }
}

fn invalid_tarball_dir(value: String) -> PluginError {
    PluginError::InvalidTarballDir { value }
}

fn invalid_pkg_root(value: String) -> PluginError {
    PluginError::InvalidPkgRoot { value }
}

fn invalid_package_manager(value: String) -> PluginError {
    PluginError::InvalidPackageManager { value }
}

fn invalid_packages(value: String) -> PluginError {
    PluginError::InvalidPackages { value }
}

fn is_non_empty_string(value: &Value) -> bool {
    value.as_str().is_some_and(|s| !s.trim().is_empty())
}

fn is_package_manager(value: &Value) -> bool {
    value.as_str().and_then(PackageManager::parse).is_some()
}

fn is_package_list(value: &Value) -> bool {
    let Some(entries) = value.as_array() else {
        return false;
    };
    entries.iter().all(|entry| match entry {
        Value::String(root) => !root.trim().is_empty(),
        Value::Object(fields) => {
            field_ok(fields, NPM_PUBLISH, Value::is_boolean)
                && field_ok(fields, TARBALL_DIR, is_non_empty_string)
                && field_ok(fields, PKG_ROOT, is_non_empty_string)
        }
        _ => false,
    })
}

fn field_ok(fields: &RawOptions, key: &str, check: Validator) -> bool {
    present(fields, key).is_none_or(check)
}

/// A key counts as set only when it holds a non-null value.
fn present<'a>(options: &'a RawOptions, key: &str) -> Option<&'a Value> {
    options.get(key).filter(|v| !v.is_null())
}

/// Validate raw options. Absent and `null` options are not checked; unknown
/// options are ignored.
pub fn validate(options: &RawOptions) -> Vec<PluginError> {
    VALIDATORS
        .iter()
        .filter_map(|(key, is_valid, to_error)| {
            let value = present(options, key)?;
            (!is_valid(value)).then(|| to_error(value.to_string()))
        })
        .collect()
}

/// One plugin entry in the pipeline's `publish` step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StepEntry")]
pub struct PluginStep {
    pub path: String,
    #[serde(flatten)]
    pub options: RawOptions,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StepEntry {
    Path(String),
    Step {
        path: String,
        #[serde(flatten)]
        options: RawOptions,
    },
}

impl From<StepEntry> for PluginStep {
    fn from(entry: StepEntry) -> Self {
        match entry {
            StepEntry::Path(path) => PluginStep {
                path,
                options: RawOptions::new(),
            },
            StepEntry::Step { path, options } => PluginStep { path, options },
        }
    }
}

/// Resolve the options the plugin actually runs with.
///
/// Precedence per option: explicit (non-null) value, then the value on the
/// first sibling `publish` step registered as this plugin, then nothing
/// (typed defaults are applied by [`PluginConfig::from_options`]).
pub fn effective_options(explicit: &RawOptions, publish_steps: &[PluginStep]) -> RawOptions {
    let mut merged = explicit.clone();
    let Some(sibling) = publish_steps.iter().find(|step| step.path == PLUGIN_ID) else {
        return merged;
    };

    for (key, value) in &sibling.options {
        if key == "path" || value.is_null() || present(explicit, key).is_some() {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Per-package publishing target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTarget {
    pub npm_publish: bool,
    pub tarball_dir: Option<String>,
    pub pkg_root: Option<String>,
}

impl PackageTarget {
    /// Directory holding this package's `package.json`.
    pub fn base_path(&self, cwd: &Path) -> PathBuf {
        match &self.pkg_root {
            Some(root) => cwd.join(root),
            None => cwd.to_path_buf(),
        }
    }

    /// Package path argument handed to the package manager.
    pub fn pkg_arg(&self) -> String {
        match &self.pkg_root {
            Some(root) => format!("./{}", root.trim_start_matches("./")),
            None => ".".to_string(),
        }
    }

    pub fn label(&self) -> &str {
        self.pkg_root.as_deref().unwrap_or(".")
    }
}

/// Validated, typed plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub npm_publish: bool,
    pub tarball_dir: Option<String>,
    pub pkg_root: Option<String>,
    pub package_manager: PackageManager,
    targets: Vec<PackageTarget>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            npm_publish: true,
            tarball_dir: None,
            pkg_root: None,
            package_manager: PackageManager::Npm,
            targets: vec![PackageTarget {
                npm_publish: true,
                tarball_dir: None,
                pkg_root: None,
            }],
        }
    }
}

impl PluginConfig {
    /// Validate `options` and build the typed configuration.
    pub fn from_options(options: &RawOptions) -> Result<Self, AggregateError> {
        AggregateError::new(validate(options)).into_result()?;
        Ok(Self::from_valid(options))
    }

    /// Build the typed configuration, skipping any option that fails
    /// validation. Used when validation errors are reported separately.
    pub fn from_options_lenient(options: &RawOptions) -> Self {
        let mut sanitized = options.clone();
        for (key, is_valid, _) in VALIDATORS.iter() {
            if present(options, key).is_some_and(|v| !is_valid(v)) {
                sanitized.remove(*key);
            }
        }
        Self::from_valid(&sanitized)
    }

    fn from_valid(options: &RawOptions) -> Self {
        let npm_publish = present(options, NPM_PUBLISH)
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let tarball_dir = trimmed(present(options, TARBALL_DIR));
        let pkg_root = trimmed(present(options, PKG_ROOT));
        let package_manager = present(options, PACKAGE_MANAGER)
            .and_then(Value::as_str)
            .and_then(PackageManager::parse)
            .unwrap_or_default();

        let defaults = PackageTarget {
            npm_publish,
            tarball_dir: tarball_dir.clone(),
            pkg_root: pkg_root.clone(),
        };
        let targets = match present(options, PACKAGES).and_then(Value::as_array) {
            Some(entries) => expand_targets(entries, &defaults),
            None => vec![defaults],
        };

        Self {
            npm_publish,
            tarball_dir,
            pkg_root,
            package_manager,
            targets,
        }
    }

    /// Packages this configuration publishes, de-duplicated by `pkgRoot`.
    pub fn targets(&self) -> &[PackageTarget] {
        &self.targets
    }
}

fn trimmed(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn expand_targets(entries: &[Value], defaults: &PackageTarget) -> Vec<PackageTarget> {
    let mut targets: Vec<PackageTarget> = Vec::with_capacity(entries.len());
    for entry in entries {
        let target = match entry {
            Value::String(root) => PackageTarget {
                pkg_root: trimmed(Some(&Value::String(root.clone()))),
                ..defaults.clone()
            },
            Value::Object(fields) => PackageTarget {
                npm_publish: present(fields, NPM_PUBLISH)
                    .and_then(Value::as_bool)
                    .unwrap_or(defaults.npm_publish),
                tarball_dir: trimmed(present(fields, TARBALL_DIR))
                    .or_else(|| defaults.tarball_dir.clone()),
                pkg_root: trimmed(present(fields, PKG_ROOT)).or_else(|| defaults.pkg_root.clone()),
            },
            _ => continue,
        };
        if targets.iter().all(|t| t.pkg_root != target.pkg_root) {
            targets.push(target);
        }
    }
    if targets.is_empty() {
        targets.push(defaults.clone());
    }
    targets
}

/// Pipeline configuration read by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PipelineConfig {
    /// Options passed to the plugin.
    #[serde(default)]
    pub plugin: RawOptions,
    /// Publish step list, consulted for sibling defaults.
    #[serde(default)]
    pub publish: Vec<PluginStep>,
}

/// Get the pipeline config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Load a pipeline config file. A missing file yields the empty pipeline.
pub fn load_pipeline(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}
