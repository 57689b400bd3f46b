#![cfg(not(windows))]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::{TempDir, tempdir};
use tiny_http::{Header, Response, Server, StatusCode};

const FAKE_NPM: &str = r#"#!/usr/bin/env sh
printf '%s\n' "$*" >>"$FAKE_NPM_ARGS_LOG"
case "$1" in
  --version) echo 10.9.0 ;;
  whoami) echo npmship-bot ;;
  pack)
    : >pkg-1.0.0.tgz
    echo pkg-1.0.0.tgz
    ;;
esac
exit 0
"#;

struct Project {
    td: TempDir,
    cwd: PathBuf,
    npm: PathBuf,
    log: PathBuf,
}

impl Project {
    fn new(manifest: &str) -> Self {
        let td = tempdir().expect("tempdir");
        let cwd = td.path().join("project");
        fs::create_dir_all(&cwd).expect("mkdir project");
        fs::create_dir_all(td.path().join("home")).expect("mkdir home");
        fs::write(cwd.join("package.json"), manifest).expect("write manifest");

        let npm = td.path().join("npm");
        fs::write(&npm, FAKE_NPM).expect("write fake npm");
        let mut perms = fs::metadata(&npm).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&npm, perms).expect("chmod");

        let log = td.path().join("npm-args.log");
        Self { td, cwd, npm, log }
    }

    fn config(&self, content: &str) {
        fs::write(self.cwd.join(".npmship.toml"), content).expect("write config");
    }

    /// `npmship` with a clean environment pointing at the fake npm.
    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("npmship"));
        cmd.env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", self.td.path().join("home"))
            .env("NPMSHIP_NPM_BIN", &self.npm)
            .env("FAKE_NPM_ARGS_LOG", &self.log)
            .arg("--cwd")
            .arg(&self.cwd);
        cmd
    }

    fn npm_calls(&self) -> String {
        fs::read_to_string(&self.log).unwrap_or_default()
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("read")
}

#[test]
fn invalid_option_prints_code_and_fails() {
    let project = Project::new(r#"{"name": "pkg"}"#);
    project.config("[plugin]\nnpmPublish = 42\n");

    project
        .cmd()
        .env("NPM_TOKEN", "secret-token")
        .arg("verify")
        .assert()
        .failure()
        .stderr(contains("[error] EINVALIDNPMPUBLISH: "));
}

#[test]
fn missing_token_fails_verification() {
    let project = Project::new(r#"{"name": "pkg"}"#);

    project
        .cmd()
        .arg("verify")
        .assert()
        .failure()
        .stderr(contains("[error] ENONPMTOKEN: "));
}

#[test]
fn release_publishes_and_prints_release_info() {
    let project = Project::new("{\n  \"name\": \"pkg\",\n  \"version\": \"0.0.0\"\n}\n");

    project
        .cmd()
        .env("NPM_TOKEN", "secret-token")
        .args(["release", "--version", "1.0.0"])
        .assert()
        .success()
        .stdout(contains(
            r#"{"name":"npm package (@latest dist-tag)","url":"https://www.npmjs.com/package/pkg/v/1.0.0","channel":"latest"}"#,
        ))
        .stderr(contains("[info] Published pkg@1.0.0 to dist-tag @latest"));

    assert!(read(&project.cwd.join("package.json")).contains("\"version\": \"1.0.0\""));
    let calls = project.npm_calls();
    assert_eq!(calls.matches("whoami").count(), 1);
    assert!(calls.contains("publish . --userconfig "));
    assert!(!calls.contains("secret-token"));
}

#[test]
fn pipeline_sibling_defaults_apply() {
    let project = Project::new(r#"{"name": "pkg", "version": "0.0.0"}"#);
    project.config(
        r#"
[[publish]]
path = "npmship"
npmPublish = false
tarballDir = "out"
"#,
    );

    project
        .cmd()
        .args(["publish", "--version", "1.0.0"])
        .assert()
        .success()
        .stdout(contains("skipped"));

    assert!(project.cwd.join("out/pkg-1.0.0.tgz").is_file());
    assert!(!project.npm_calls().contains("publish"));
}

#[test]
fn add_channel_uses_channel_dist_tag() {
    let project = Project::new(r#"{"name": "pkg"}"#);

    project
        .cmd()
        .env("NPM_TOKEN", "secret-token")
        .args(["add-channel", "--version", "1.0.0", "--channel", "next"])
        .assert()
        .success()
        .stdout(contains(r#""channel":"next""#));

    assert!(project.npm_calls().contains("dist-tag add pkg@1.0.0 next"));
}

#[test]
fn last_release_reads_registry() {
    let server = Server::http("127.0.0.1:0").expect("server");
    let registry = format!("http://{}/", server.server_addr());
    let mut routes = BTreeMap::new();
    routes.insert(
        "/pkg".to_string(),
        r#"{"name":"pkg","dist-tags":{"latest":"1.4.0"},"versions":{"1.4.0":{"version":"1.4.0","gitHead":"cafe"}}}"#
            .to_string(),
    );
    let handle = thread::spawn(move || {
        let req = server.recv().expect("request");
        let body = routes.get(req.url()).cloned().unwrap_or_else(|| "{}".into());
        let resp = Response::from_string(body)
            .with_status_code(StatusCode(200))
            .with_header(Header::from_bytes("Content-Type", "application/json").expect("header"));
        req.respond(resp).expect("respond");
    });

    let project = Project::new(&format!(
        r#"{{"name": "pkg", "publishConfig": {{"registry": "{registry}"}}}}"#
    ));
    project
        .cmd()
        .env("NPM_TOKEN", "secret-token")
        .arg("last-release")
        .assert()
        .success()
        .stdout(contains("version: 1.4.0\ngit_head: cafe"));
    handle.join().expect("join server");
}

#[test]
fn doctor_reports_registry_and_credentials() {
    let project = Project::new(r#"{"name": "@scope/pkg", "publishConfig": {"tag": "beta"}}"#);

    project
        .cmd()
        .env("NPM_TOKEN", "secret-token")
        .arg("doctor")
        .assert()
        .success()
        .stdout(contains("official_registry: https://registry.npmjs.org/"))
        .stdout(contains("package: @scope/pkg (.)"))
        .stdout(contains("  dist_tag: beta"))
        .stdout(contains("  credentials: NPM_TOKEN (environment)"))
        .stdout(contains("npm: 10.9.0"));
}

#[test]
fn rejects_unknown_auth_check() {
    let project = Project::new(r#"{"name": "pkg"}"#);
    project
        .cmd()
        .args(["--auth-check", "ping", "verify"])
        .assert()
        .failure()
        .stderr(contains("expected whoami or dry-run"));
}

#[test]
fn rejects_invalid_duration() {
    let project = Project::new(r#"{"name": "pkg"}"#);
    project
        .cmd()
        .args(["--http-timeout", "soon", "verify"])
        .assert()
        .failure()
        .stderr(contains("invalid duration: soon"));
}
