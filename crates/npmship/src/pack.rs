use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use npmship_npm::PackageManagerCli;
use npmship_types::Reporter;

/// Pack the package at `pkg_arg` and move the archive into `tarball_dir`.
///
/// Both directories are relative to `cwd`. Returns the archive's final path.
pub fn pack_into(
    cli: &PackageManagerCli,
    cwd: &Path,
    pkg_arg: &str,
    tarball_dir: &str,
    userconfig: &Path,
    reporter: &mut dyn Reporter,
) -> Result<PathBuf> {
    reporter.info(&format!("Creating npm package archive from {pkg_arg}"));
    let (_, archive) = cli.pack(cwd, Path::new(pkg_arg), userconfig)?;
    let file_name = archive
        .file_name()
        .with_context(|| format!("pack reported an invalid archive name: {}", archive.display()))?;

    let source = cwd.join(&archive);
    let dest_dir = cwd.join(tarball_dir.trim());
    let dest = dest_dir.join(file_name);

    fs::create_dir_all(&dest_dir)
        .with_context(|| format!("failed to create tarball directory {}", dest_dir.display()))?;
    if !same_file(&source, &dest) {
        move_file(&source, &dest)?;
    }
    reporter.info(&format!("Wrote package archive to {}", dest.display()));
    Ok(dest)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems.
    fs::copy(source, dest).with_context(|| {
        format!(
            "failed to move {} to {}",
            source.display(),
            dest.display()
        )
    })?;
    fs::remove_file(source).with_context(|| format!("failed to remove {}", source.display()))
}
