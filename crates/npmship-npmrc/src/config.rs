use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use npmship_types::{EnvMap, env_value};

use crate::nerf::{nerf_dart, same_registry};
use crate::parser::{expand_env_vars, parse};
use crate::{NPMRC_FILE, OFFICIAL_REGISTRY, USERCONFIG_ENV};

/// Credentials found in npmrc for a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `:_authToken`
    Token(String),
    /// `:_auth`, already base64 encoded `user:pass`.
    LegacyAuth(String),
    /// `:username` + `:_password` (the password is base64 encoded).
    Basic { username: String, password: String },
}

impl Credentials {
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Token(_) => "token",
            Credentials::LegacyAuth(_) => "legacy auth",
            Credentials::Basic { .. } => "username/password",
        }
    }
}

/// Merged view of the npmrc files the package manager would read.
///
/// Later files override earlier keys. The raw text of every loaded file is
/// kept so it can seed a session-scoped copy.
#[derive(Debug, Clone, Default)]
pub struct Npmrc {
    values: BTreeMap<String, String>,
    files: Vec<(PathBuf, String)>,
}

impl Npmrc {
    /// Load `~/.npmrc` followed by the user-config file (or `<cwd>/.npmrc`).
    pub fn load(cwd: &Path, env: &EnvMap) -> Result<Self> {
        let mut npmrc = Self::default();
        for path in npmrc_paths(cwd, env) {
            if !path.is_file() {
                continue;
            }
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            npmrc.add_source(path, content);
        }
        Ok(npmrc)
    }

    /// Build from a single in-memory source.
    pub fn from_content(path: impl Into<PathBuf>, content: &str) -> Self {
        let mut npmrc = Self::default();
        npmrc.add_source(path.into(), content.to_string());
        npmrc
    }

    fn add_source(&mut self, path: PathBuf, content: String) {
        for (key, value) in parse(&content) {
            self.values.insert(key, value);
        }
        self.files.push((path, content));
    }

    /// Raw (unexpanded) value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(path, _)| path.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Text of every loaded file, in load order.
    pub fn concatenated(&self) -> String {
        let mut out = String::new();
        for (_, content) in &self.files {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(content);
        }
        out
    }

    /// Configured registry for a scope, falling back to the default `registry`.
    pub fn registry_for(&self, scope: Option<&str>, env: &EnvMap) -> Option<String> {
        scope
            .and_then(|scope| self.get(&format!("{scope}:registry")))
            .or_else(|| self.get("registry"))
            .map(|value| expand_env_vars(value, env))
            .filter(|value| !value.trim().is_empty())
    }

    /// Credentials that apply to `registry`.
    ///
    /// Nerf-darted keys are tried from the most specific path upwards. The
    /// top-level `_authToken` / `_auth` keys only count for the configured
    /// default registry.
    pub fn credentials_for(&self, registry: &str, env: &EnvMap) -> Option<Credentials> {
        if let Ok(nerfed) = nerf_dart(registry) {
            let mut prefix = nerfed.as_str();
            loop {
                if let Some(credentials) = self.credentials_at(prefix, env) {
                    return Some(credentials);
                }
                match prefix.trim_end_matches('/').rfind('/') {
                    Some(idx) if idx > 1 => prefix = &prefix[..=idx],
                    _ => break,
                }
            }
        }

        let default_registry = self
            .get("registry")
            .map(|value| expand_env_vars(value, env))
            .unwrap_or_else(|| OFFICIAL_REGISTRY.to_string());
        if same_registry(registry, &default_registry) {
            return self.credentials_with(|suffix| self.expanded(suffix, env));
        }
        None
    }

    fn credentials_at(&self, prefix: &str, env: &EnvMap) -> Option<Credentials> {
        self.credentials_with(|suffix| self.expanded(&format!("{prefix}:{suffix}"), env))
    }

    fn credentials_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<Credentials> {
        if let Some(token) = lookup("_authToken") {
            return Some(Credentials::Token(token));
        }
        if let Some(auth) = lookup("_auth") {
            return Some(Credentials::LegacyAuth(auth));
        }
        match (lookup("username"), lookup("_password")) {
            (Some(username), Some(password)) => Some(Credentials::Basic { username, password }),
            _ => None,
        }
    }

    fn expanded(&self, key: &str, env: &EnvMap) -> Option<String> {
        self.get(key)
            .map(|value| expand_env_vars(value, env))
            .filter(|value| !value.trim().is_empty())
    }
}

/// Home directory as seen by the execution environment.
pub fn home_dir(env: &EnvMap) -> Option<PathBuf> {
    env_value(env, &["HOME", "USERPROFILE"])
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
}

/// npmrc files in load order: `~/.npmrc`, then the user-config override or
/// the project's own `.npmrc`.
pub fn npmrc_paths(cwd: &Path, env: &EnvMap) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = home_dir(env) {
        paths.push(home.join(NPMRC_FILE));
    }
    let project = match env_value(env, &USERCONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            if path.is_absolute() { path } else { cwd.join(path) }
        }
        None => cwd.join(NPMRC_FILE),
    };
    if !paths.contains(&project) {
        paths.push(project);
    }
    paths
}
