use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Session-scoped registry-config file handed to the package manager via
/// `--userconfig`.
///
/// The file lives in the system temp directory and is removed when the value
/// is dropped. It only ever holds `${VAR}` placeholders for secrets.
#[derive(Debug)]
pub struct ScopedNpmrc {
    file: NamedTempFile,
    ends_with_newline: bool,
    len: usize,
    appended: BTreeSet<String>,
}

impl ScopedNpmrc {
    /// Create an empty file.
    pub fn create() -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(".npmrc-npmship-")
            .tempfile()
            .context("failed to create session npmrc")?;
        Ok(Self {
            file,
            ends_with_newline: true,
            len: 0,
            appended: BTreeSet::new(),
        })
    }

    /// Create a file seeded with existing npmrc content.
    pub fn seeded(content: &str) -> Result<Self> {
        let mut scoped = Self::create()?;
        if !content.is_empty() {
            scoped.write_raw(content)?;
        }
        Ok(scoped)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append an entry on its own line.
    pub fn append(&mut self, entry: &str) -> Result<()> {
        let mut text = String::new();
        if !self.ends_with_newline {
            text.push('\n');
        }
        text.push_str(entry);
        if !entry.ends_with('\n') {
            text.push('\n');
        }
        self.write_raw(&text)
    }

    /// Append an entry unless this file already received it. Returns whether
    /// anything was written.
    pub fn append_once(&mut self, entry: &str) -> Result<bool> {
        if self.appended.contains(entry) {
            return Ok(false);
        }
        self.append(entry)?;
        self.appended.insert(entry.to_string());
        Ok(true)
    }

    pub fn contents(&self) -> Result<String> {
        fs::read_to_string(self.path())
            .with_context(|| format!("failed to read {}", self.path().display()))
    }

    fn write_raw(&mut self, text: &str) -> Result<()> {
        let file = self.file.as_file_mut();
        file.write_all(text.as_bytes())
            .and_then(|()| file.flush())
            .context("failed to write session npmrc")?;
        self.len += text.len();
        self.ends_with_newline = text.ends_with('\n');
        Ok(())
    }
}
