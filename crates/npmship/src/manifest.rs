//! Reading and rewriting `package.json` and its lock files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use npmship_types::{PackageManifest, PluginError, Reporter};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};

pub const MANIFEST_FILE: &str = "package.json";

/// Files whose top-level `version` follows the release, in write order.
pub const VERSIONED_FILES: [&str; 3] = [MANIFEST_FILE, "npm-shrinkwrap.json", "package-lock.json"];

const DEFAULT_INDENT: &str = "  ";
const DEFAULT_NEWLINE: &str = "\n";

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

/// Read the manifest in `dir`.
///
/// Failures are typed: `ENOPKG` when the file is missing, `EINVALIDPKG` when
/// it is unreadable or malformed, `ENOPKGNAME` when it has no name.
pub fn read_manifest(dir: &Path) -> Result<PackageManifest, PluginError> {
    let path = manifest_path(dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(PluginError::MissingManifest {
                dir: dir.to_path_buf(),
            });
        }
        Err(err) => {
            return Err(PluginError::InvalidManifest {
                path,
                message: err.to_string(),
            });
        }
    };

    let manifest: PackageManifest =
        serde_json::from_str(&content).map_err(|err| PluginError::InvalidManifest {
            path: path.clone(),
            message: err.to_string(),
        })?;

    if manifest.name().trim().is_empty() {
        return Err(PluginError::MissingPackageName { path });
    }
    Ok(manifest)
}

/// Formatting observed in an existing JSON file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonStyle {
    pub indent: String,
    pub newline: String,
}

impl Default for JsonStyle {
    fn default() -> Self {
        Self {
            indent: DEFAULT_INDENT.to_string(),
            newline: DEFAULT_NEWLINE.to_string(),
        }
    }
}

impl JsonStyle {
    /// Indent of the first indented line and the first line ending found.
    pub fn detect(content: &str) -> Self {
        let indent = content
            .lines()
            .skip(1)
            .map(|line| {
                let width = line.len() - line.trim_start_matches([' ', '\t']).len();
                &line[..width]
            })
            .find(|indent| !indent.is_empty())
            .unwrap_or(DEFAULT_INDENT);
        let newline = if content.contains("\r\n") {
            "\r\n"
        } else {
            DEFAULT_NEWLINE
        };
        Self {
            indent: indent.to_string(),
            newline: newline.to_string(),
        }
    }

    pub fn render(&self, value: &Value) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(self.indent.as_bytes());
        let mut serializer = Serializer::with_formatter(&mut buf, formatter);
        value
            .serialize(&mut serializer)
            .context("failed to serialize JSON")?;
        let mut text = String::from_utf8(buf).context("serialized JSON is not UTF-8")?;
        if self.newline != DEFAULT_NEWLINE {
            text = text.replace(DEFAULT_NEWLINE, &self.newline);
        }
        text.push_str(&self.newline);
        Ok(text)
    }
}

/// Set the top-level `version` of every versioned file present in `dir`,
/// keeping each file's key order and formatting. Returns the files written.
pub fn write_version(
    dir: &Path,
    version: &str,
    reporter: &mut dyn Reporter,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for file in VERSIONED_FILES {
        let path = dir.join(file);
        if !path.is_file() {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut value: Value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let Some(object) = value.as_object_mut() else {
            anyhow::bail!("{} does not hold a JSON object", path.display());
        };
        object.insert("version".to_string(), Value::String(version.to_string()));

        let rendered = JsonStyle::detect(&content).render(&value)?;
        fs::write(&path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
        reporter.info(&format!("Wrote version {version} to {}", path.display()));
        written.push(path);
    }
    Ok(written)
}
