use std::path::Path;
use std::time::Duration;

use npmship_process::{program_override, run_command_with_timeout};
use npmship_types::EnvMap;

/// Override variable for the git binary.
pub const GIT_BIN_ENV: &str = "NPMSHIP_GIT_BIN";

pub fn git_program(env: &EnvMap) -> String {
    program_override(GIT_BIN_ENV, "git", env)
}

/// Commit a tag points at, if the tag exists locally.
pub fn tag_head(cwd: &Path, tag: &str, env: &EnvMap, timeout: Option<Duration>) -> Option<String> {
    let output =
        run_command_with_timeout(&git_program(env), &["rev-list", "-1", tag], cwd, env, timeout)
            .ok()?;
    if !output.success() {
        return None;
    }
    output
        .stdout
        .lines()
        .next()
        .map(str::trim)
        .filter(|sha| !sha.is_empty())
        .map(str::to_string)
}

/// Commit a released version was built from.
///
/// Looks for `v<version>`, then `<version>`. If neither tag is known the
/// history may be shallow: fetch the full history with tags and look again.
pub fn version_head(
    cwd: &Path,
    version: &str,
    env: &EnvMap,
    timeout: Option<Duration>,
) -> Option<String> {
    let tags = [format!("v{version}"), version.to_string()];
    let lookup = || tags.iter().find_map(|tag| tag_head(cwd, tag, env, timeout));

    lookup().or_else(|| {
        unshallow(cwd, env, timeout);
        lookup()
    })
}

fn unshallow(cwd: &Path, env: &EnvMap, timeout: Option<Duration>) {
    // Fails on complete clones; the retry covers both cases.
    let _ = run_command_with_timeout(
        &git_program(env),
        &["fetch", "--unshallow", "--tags"],
        cwd,
        env,
        timeout,
    );
}

#[cfg(all(test, not(windows)))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::*;

    // Resolves tags listed in $FAKE_GIT_TAGS ("tag=sha" per line); once
    // `fetch` has run, tags from $FAKE_GIT_FETCHED_TAGS resolve too.
    fn write_fake_git(dir: &Path) -> PathBuf {
        let path = dir.join("git");
        fs::write(
            &path,
            r#"#!/usr/bin/env sh
printf '%s\n' "$*" >>"$FAKE_GIT_LOG"
case "$1" in
  fetch)
    : >"$FAKE_GIT_LOG.fetched"
    exit 0
    ;;
  rev-list)
    tags="$FAKE_GIT_TAGS"
    if [ -f "$FAKE_GIT_LOG.fetched" ]; then
      tags="$tags
$FAKE_GIT_FETCHED_TAGS"
    fi
    sha=$(printf '%s\n' "$tags" | sed -n "s/^$3=//p" | head -n 1)
    if [ -n "$sha" ]; then
      echo "$sha"
      exit 0
    fi
    echo "fatal: ambiguous argument '$3'" >&2
    exit 128
    ;;
esac
exit 0
"#,
        )
        .expect("write fake git");
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    fn fake_env(dir: &Path, tags: &str, fetched: &str) -> (EnvMap, PathBuf) {
        let git = write_fake_git(dir);
        let log = dir.join("git.log");
        let mut env = EnvMap::new();
        env.insert(GIT_BIN_ENV.into(), git.display().to_string());
        env.insert("FAKE_GIT_LOG".into(), log.display().to_string());
        env.insert("FAKE_GIT_TAGS".into(), tags.into());
        env.insert("FAKE_GIT_FETCHED_TAGS".into(), fetched.into());
        (env, log)
    }

    #[test]
    fn prefers_v_prefixed_tag() {
        let td = tempdir().expect("tempdir");
        let (env, log) = fake_env(td.path(), "v1.0.0=aaa\n1.0.0=bbb", "");
        assert_eq!(
            version_head(td.path(), "1.0.0", &env, None).as_deref(),
            Some("aaa")
        );
        let calls = fs::read_to_string(log).expect("log");
        assert_eq!(calls.lines().collect::<Vec<_>>(), vec!["rev-list -1 v1.0.0"]);
    }

    #[test]
    fn falls_back_to_bare_version_tag() {
        let td = tempdir().expect("tempdir");
        let (env, _) = fake_env(td.path(), "1.0.0=bbb", "");
        assert_eq!(
            version_head(td.path(), "1.0.0", &env, None).as_deref(),
            Some("bbb")
        );
    }

    #[test]
    fn unshallows_before_giving_up() {
        let td = tempdir().expect("tempdir");
        let (env, log) = fake_env(td.path(), "", "v2.0.0=ccc");
        assert_eq!(
            version_head(td.path(), "2.0.0", &env, None).as_deref(),
            Some("ccc")
        );
        let calls = fs::read_to_string(log).expect("log");
        assert!(calls.contains("fetch --unshallow --tags"));
    }

    #[test]
    fn unknown_version_has_no_head() {
        let td = tempdir().expect("tempdir");
        let (env, _) = fake_env(td.path(), "", "");
        assert_eq!(version_head(td.path(), "9.9.9", &env, None), None);
    }

    #[test]
    fn missing_git_binary_has_no_head() {
        let td = tempdir().expect("tempdir");
        let mut env = EnvMap::new();
        env.insert(
            GIT_BIN_ENV.into(),
            td.path().join("no-such-git").display().to_string(),
        );
        assert_eq!(tag_head(td.path(), "v1.0.0", &env, None), None);
    }
}
