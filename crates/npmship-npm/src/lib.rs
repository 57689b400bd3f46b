//! Package-manager command wrappers for npmship.
//!
//! Every registry-mutating step goes through the package-manager binary
//! (`npm` or `pnpm`), pointed at the session's registry-config file with
//! `--userconfig`. The binary can be swapped with `NPMSHIP_NPM_BIN` /
//! `NPMSHIP_PNPM_BIN`.

mod redact;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use npmship_process::{CommandOutput, program_override, run_command_with_timeout};
use npmship_types::{EnvMap, PackageManager};

pub use redact::{redact_sensitive, tail_lines};

/// Lines of output kept in error messages.
pub const OUTPUT_TAIL_LINES: usize = 20;

/// Marker the package manager prints when a dry-run publish has no login.
pub const NOT_LOGGED_IN_MARKER: &str = "This command requires you to be logged in";

/// Override variable for a package manager's binary.
pub fn program_env_var(manager: PackageManager) -> &'static str {
    match manager {
        PackageManager::Npm => "NPMSHIP_NPM_BIN",
        PackageManager::Pnpm => "NPMSHIP_PNPM_BIN",
    }
}

/// A package-manager binary bound to an execution environment.
#[derive(Debug, Clone)]
pub struct PackageManagerCli {
    manager: PackageManager,
    program: String,
    env: EnvMap,
    timeout: Option<Duration>,
}

impl PackageManagerCli {
    pub fn new(manager: PackageManager, env: &EnvMap, timeout: Option<Duration>) -> Self {
        Self {
            manager,
            program: program_override(program_env_var(manager), manager.as_str(), env),
            env: env.clone(),
            timeout,
        }
    }

    pub fn manager(&self) -> PackageManager {
        self.manager
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `whoami` against `registry`. The caller interprets the exit code.
    pub fn whoami(&self, cwd: &Path, userconfig: &Path, registry: &str) -> Result<CommandOutput> {
        let userconfig = path_arg(userconfig)?;
        self.run(
            cwd,
            &["whoami", "--userconfig", userconfig, "--registry", registry],
        )
        .context("failed to run whoami")
    }

    /// `publish --dry-run`. The caller inspects stderr for a login failure.
    pub fn publish_dry_run(
        &self,
        cwd: &Path,
        pkg_root: &str,
        userconfig: &Path,
        registry: &str,
    ) -> Result<CommandOutput> {
        let userconfig = path_arg(userconfig)?;
        let mut args = vec![
            "publish",
            pkg_root,
            "--dry-run",
            "--userconfig",
            userconfig,
            "--registry",
            registry,
        ];
        if self.manager == PackageManager::Pnpm {
            args.push("--no-git-checks");
        }
        self.run(cwd, &args).context("failed to run dry-run publish")
    }

    /// Publish `pkg_root` under `tag`. A non-zero exit is an error.
    pub fn publish(
        &self,
        cwd: &Path,
        pkg_root: &str,
        userconfig: &Path,
        tag: &str,
        registry: &str,
    ) -> Result<CommandOutput> {
        let userconfig = path_arg(userconfig)?;
        let mut args = vec![
            "publish",
            pkg_root,
            "--userconfig",
            userconfig,
            "--tag",
            tag,
            "--registry",
            registry,
        ];
        if self.manager == PackageManager::Pnpm {
            args.push("--no-git-checks");
        }
        let output = self.run(cwd, &args).context("failed to run publish")?;
        self.ensure_success("publish", output)
    }

    /// Pack `pkg_root` into an archive and return the archive's file name,
    /// taken from the last stdout line.
    pub fn pack(&self, cwd: &Path, pkg_root: &Path, userconfig: &Path) -> Result<(CommandOutput, PathBuf)> {
        let pkg_root = path_arg(pkg_root)?;
        let userconfig = path_arg(userconfig)?;
        let output = self
            .run(cwd, &["pack", pkg_root, "--userconfig", userconfig])
            .context("failed to run pack")?;
        let output = self.ensure_success("pack", output)?;
        let Some(tarball) = output.last_stdout_line().map(PathBuf::from) else {
            bail!("{} pack did not report an archive name", self.program);
        };
        Ok((output, tarball))
    }

    /// Point `tag` at `name@version`. A non-zero exit is an error.
    pub fn dist_tag_add(
        &self,
        cwd: &Path,
        name: &str,
        version: &str,
        tag: &str,
        userconfig: &Path,
        registry: &str,
    ) -> Result<CommandOutput> {
        let package_version = format!("{name}@{version}");
        let userconfig = path_arg(userconfig)?;
        let output = self
            .run(
                cwd,
                &[
                    "dist-tag",
                    "add",
                    &package_version,
                    tag,
                    "--userconfig",
                    userconfig,
                    "--registry",
                    registry,
                ],
            )
            .context("failed to run dist-tag add")?;
        self.ensure_success("dist-tag add", output)
    }

    /// Reported version of the binary, if it runs at all.
    pub fn version(&self, cwd: &Path) -> Option<String> {
        self.run(cwd, &["--version"])
            .ok()
            .filter(CommandOutput::success)
            .and_then(|out| out.last_stdout_line().map(str::to_string))
    }

    fn run(&self, cwd: &Path, args: &[&str]) -> Result<CommandOutput> {
        run_command_with_timeout(&self.program, args, cwd, &self.env, self.timeout)
            .with_context(|| format!("is {} installed?", self.manager))
    }

    fn ensure_success(&self, what: &str, output: CommandOutput) -> Result<CommandOutput> {
        if output.success() {
            return Ok(output);
        }
        Err(self.failure(what, &output))
    }

    /// Error for a `what` run that timed out or exited non-zero, with the
    /// redacted stderr tail.
    pub fn failure(&self, what: &str, output: &CommandOutput) -> anyhow::Error {
        let reason = if output.timed_out {
            "timed out".to_string()
        } else {
            format!("exited with code {}", output.exit_code)
        };
        anyhow!(
            "{} {what} {reason}\n{}",
            self.program,
            tail_lines(&output.stderr, OUTPUT_TAIL_LINES)
        )
    }
}

/// Whether a dry-run publish reported a missing login.
pub fn reports_not_logged_in(output: &CommandOutput) -> bool {
    output.stderr.contains(NOT_LOGGED_IN_MARKER) || output.stdout.contains(NOT_LOGGED_IN_MARKER)
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path is not valid UTF-8: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    /// Fake binary: logs its args, prints a fixed stdout/stderr and exits
    /// with `FAKE_NPM_EXIT` (default 0).
    #[cfg(not(windows))]
    fn write_fake_npm(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("npm");
        fs::write(
            &path,
            "#!/usr/bin/env sh\nprintf '%s\\n' \"$*\" >>\"$FAKE_NPM_ARGS_LOG\"\necho npm notice\necho \"${FAKE_NPM_STDOUT:-done}\"\necho \"${FAKE_NPM_STDERR:-}\" >&2\nexit \"${FAKE_NPM_EXIT:-0}\"\n",
        )
        .expect("write fake npm");
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[cfg(not(windows))]
    fn cli(
        manager: PackageManager,
        dir: &Path,
        extra: &[(&str, &str)],
    ) -> (PackageManagerCli, PathBuf) {
        let fake = write_fake_npm(dir);
        let log = dir.join("args.log");
        let mut env = EnvMap::new();
        env.insert(program_env_var(manager).into(), fake.to_string_lossy().into());
        env.insert("FAKE_NPM_ARGS_LOG".into(), log.to_string_lossy().into());
        for (k, v) in extra {
            env.insert(k.to_string(), v.to_string());
        }
        (PackageManagerCli::new(manager, &env, None), log)
    }

    #[test]
    fn program_defaults_to_manager_name() {
        let env = EnvMap::new();
        let cli = PackageManagerCli::new(PackageManager::Pnpm, &env, None);
        if std::env::var(program_env_var(PackageManager::Pnpm)).is_err() {
            assert_eq!(cli.program(), "pnpm");
        }
        assert_eq!(cli.manager(), PackageManager::Pnpm);
    }

    #[cfg(not(windows))]
    #[test]
    fn publish_passes_userconfig_tag_and_registry() {
        let td = tempdir().expect("tempdir");
        let (cli, log) = cli(PackageManager::Npm, td.path(), &[]);
        let userconfig = td.path().join(".npmrc");

        cli.publish(td.path(), ".", &userconfig, "next", "https://registry.npmjs.org/")
            .expect("publish");

        let args = fs::read_to_string(log).expect("args");
        assert_eq!(
            args.trim(),
            format!(
                "publish . --userconfig {} --tag next --registry https://registry.npmjs.org/",
                userconfig.display()
            )
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn pnpm_publish_skips_git_checks() {
        let td = tempdir().expect("tempdir");
        let (cli, log) = cli(PackageManager::Pnpm, td.path(), &[]);
        cli.publish(
            td.path(),
            "./dist",
            &td.path().join(".npmrc"),
            "latest",
            "https://r/",
        )
        .expect("publish");
        let args = fs::read_to_string(log).expect("args");
        assert!(args.trim_end().ends_with("--no-git-checks"));
    }

    #[cfg(not(windows))]
    #[test]
    fn failed_publish_is_an_error_with_redacted_stderr() {
        let td = tempdir().expect("tempdir");
        let (cli, _) = cli(
            PackageManager::Npm,
            td.path(),
            &[
                ("FAKE_NPM_EXIT", "1"),
                ("FAKE_NPM_STDERR", "NPM_TOKEN=leaked-secret"),
            ],
        );
        let err = cli
            .publish(td.path(), ".", &td.path().join(".npmrc"), "latest", "https://r/")
            .expect_err("must fail");
        let msg = format!("{err:#}");
        assert!(msg.contains("publish exited with code 1"));
        assert!(msg.contains("NPM_TOKEN=[REDACTED]"));
        assert!(!msg.contains("leaked-secret"));
    }

    #[cfg(not(windows))]
    #[test]
    fn pack_returns_last_stdout_line() {
        let td = tempdir().expect("tempdir");
        let (cli, log) = cli(
            PackageManager::Npm,
            td.path(),
            &[("FAKE_NPM_STDOUT", "pkg-1.0.0.tgz")],
        );
        let (_, tarball) = cli
            .pack(td.path(), td.path(), &td.path().join(".npmrc"))
            .expect("pack");
        assert_eq!(tarball, PathBuf::from("pkg-1.0.0.tgz"));
        let args = fs::read_to_string(log).expect("args");
        assert!(args.starts_with(&format!("pack {}", td.path().display())));
    }

    #[cfg(not(windows))]
    #[test]
    fn whoami_failure_is_returned_not_raised() {
        let td = tempdir().expect("tempdir");
        let (cli, log) = cli(PackageManager::Npm, td.path(), &[("FAKE_NPM_EXIT", "1")]);
        let out = cli
            .whoami(td.path(), &td.path().join(".npmrc"), "https://registry.npmjs.org/")
            .expect("runs");
        assert!(!out.success());
        let args = fs::read_to_string(log).expect("args");
        assert!(args.starts_with("whoami --userconfig"));
    }

    #[cfg(not(windows))]
    #[test]
    fn dry_run_detects_missing_login() {
        let td = tempdir().expect("tempdir");
        let (cli, log) = cli(
            PackageManager::Npm,
            td.path(),
            &[(
                "FAKE_NPM_STDERR",
                "npm error code ENEEDAUTH\nnpm error This command requires you to be logged in to https://registry.npmjs.org/",
            )],
        );
        let out = cli
            .publish_dry_run(td.path(), ".", &td.path().join(".npmrc"), "https://registry.npmjs.org/")
            .expect("runs");
        assert!(reports_not_logged_in(&out));
        let args = fs::read_to_string(log).expect("args");
        assert!(args.starts_with("publish . --dry-run"));
    }

    #[cfg(not(windows))]
    #[test]
    fn dist_tag_add_passes_name_at_version() {
        let td = tempdir().expect("tempdir");
        let (cli, log) = cli(PackageManager::Npm, td.path(), &[]);
        cli.dist_tag_add(
            td.path(),
            "@scope/pkg",
            "1.0.0",
            "next",
            &td.path().join(".npmrc"),
            "https://r/",
        )
        .expect("dist-tag");
        let args = fs::read_to_string(log).expect("args");
        assert!(args.starts_with("dist-tag add @scope/pkg@1.0.0 next --userconfig"));
        assert!(args.trim_end().ends_with("--registry https://r/"));
    }

    #[cfg(not(windows))]
    #[test]
    fn version_reads_last_line() {
        let td = tempdir().expect("tempdir");
        let (cli, _) = cli(PackageManager::Npm, td.path(), &[("FAKE_NPM_STDOUT", "10.9.0")]);
        assert_eq!(cli.version(td.path()).as_deref(), Some("10.9.0"));
    }

    #[test]
    fn missing_binary_is_an_error() {
        let td = tempdir().expect("tempdir");
        let mut env = EnvMap::new();
        env.insert(
            program_env_var(PackageManager::Npm).into(),
            td.path().join("nope").to_string_lossy().into(),
        );
        let cli = PackageManagerCli::new(PackageManager::Npm, &env, None);
        let err = cli
            .publish(td.path(), ".", &td.path().join(".npmrc"), "latest", "https://r/")
            .expect_err("must fail");
        assert!(format!("{err:#}").contains("is npm installed?"));
        assert_eq!(cli.version(td.path()), None);
    }
}
