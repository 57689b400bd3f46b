use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use npmship::config::{PipelineConfig, config_path, load_pipeline};
use npmship::environment::detect_environment;
use npmship::manifest::read_manifest;
use npmship::npm::PackageManagerCli;
use npmship::npmrc::{Npmrc, dist_tag, resolve_registry};
use npmship::process::which;
use npmship::{
    AggregateError, AuthCheck, ExecutionContext, NextRelease, PluginConfig, ReleaseInfo, Reporter,
    Session, SessionOptions,
};

#[derive(Parser, Debug)]
#[command(name = "npmship", version)]
#[command(about = "Verify, prepare, publish and tag npm package releases")]
struct Cli {
    /// Project directory holding package.json
    #[arg(long, default_value = ".")]
    cwd: PathBuf,

    /// Pipeline config file (default: <cwd>/.npmship.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Limit for each package-manager and git invocation (e.g. 5m). Unlimited when omitted.
    #[arg(long)]
    command_timeout: Option<String>,

    /// Limit for each registry HTTP request.
    #[arg(long, default_value = "30s")]
    http_timeout: String,

    /// How credentials are confirmed against the official registry.
    #[arg(long, default_value = "whoami", value_parser = parse_auth_check)]
    auth_check: AuthCheck,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate options and check publish authorization.
    Verify,
    /// Write the release version and pack the archive if configured.
    Prepare {
        #[arg(long = "version")]
        release_version: String,
    },
    /// Publish the release.
    Publish {
        #[arg(long = "version")]
        release_version: String,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Point a channel's dist-tag at an already published version.
    AddChannel {
        #[arg(long = "version")]
        release_version: String,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Show the version currently on a channel's dist-tag.
    LastRelease {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Verify, prepare and publish in one session.
    Release {
        #[arg(long = "version")]
        release_version: String,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Print registry, credential and tool diagnostics.
    Doctor,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut reporter = CliReporter;
    match run(cli, &mut reporter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err, &mut reporter);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, reporter: &mut dyn Reporter) -> Result<()> {
    let cwd = cli
        .cwd
        .canonicalize()
        .with_context(|| format!("invalid --cwd: {}", cli.cwd.display()))?;
    let pipeline_path = cli.config.clone().unwrap_or_else(|| config_path(&cwd));
    let pipeline = load_pipeline(&pipeline_path)?;

    let options = SessionOptions {
        command_timeout: cli
            .command_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?,
        http_timeout: parse_duration(&cli.http_timeout)?,
        auth_check: cli.auth_check,
        official_registry: None,
    };
    let mut session = Session::new(options);
    let mut ctx = ExecutionContext::from_process(&cwd).with_publish_steps(pipeline.publish.clone());
    let raw = &pipeline.plugin;

    match cli.cmd {
        Commands::Verify => {
            session.verify_conditions(raw, &mut ctx, reporter)?;
            println!("verified: true");
        }
        Commands::Prepare { release_version } => {
            ctx.next_release = Some(NextRelease::new(release_version));
            session.prepare(raw, &mut ctx, reporter)?;
            println!("prepared: true");
        }
        Commands::Publish {
            release_version,
            channel,
        } => {
            ctx.next_release = Some(next_release(release_version, channel));
            let infos = session.publish_all(raw, &mut ctx, reporter)?;
            print_releases(&infos);
        }
        Commands::AddChannel {
            release_version,
            channel,
        } => {
            ctx.next_release = Some(next_release(release_version, channel));
            let infos = session.add_channel_all(raw, &mut ctx, reporter)?;
            print_releases(&infos);
        }
        Commands::LastRelease { channel } => {
            match session.last_release(raw, &mut ctx, channel.as_deref(), reporter)? {
                Some(last) => {
                    println!("version: {}", last.version);
                    println!("git_head: {}", last.git_head.as_deref().unwrap_or("-"));
                }
                None => println!("version: -"),
            }
        }
        Commands::Release {
            release_version,
            channel,
        } => {
            ctx.next_release = Some(next_release(release_version, channel));
            session.verify_conditions(raw, &mut ctx, reporter)?;
            session.prepare(raw, &mut ctx, reporter)?;
            let infos = session.publish_all(raw, &mut ctx, reporter)?;
            print_releases(&infos);
        }
        Commands::Doctor => {
            run_doctor(&session, &ctx, &pipeline, &pipeline_path, reporter)?;
        }
    }

    Ok(())
}

fn next_release(version: String, channel: Option<String>) -> NextRelease {
    match channel {
        Some(channel) => NextRelease::new(version).on_channel(channel),
        None => NextRelease::new(version),
    }
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn parse_auth_check(s: &str) -> Result<AuthCheck, String> {
    AuthCheck::parse(s).ok_or_else(|| format!("expected whoami or dry-run, got {s}"))
}

fn report_error(err: &anyhow::Error, reporter: &mut dyn Reporter) {
    match err.downcast_ref::<AggregateError>() {
        Some(aggregate) => {
            for error in aggregate.errors() {
                reporter.error(&format!("{}: {error}", error.code()));
            }
        }
        None => reporter.error(&format!("{err:#}")),
    }
}

fn print_releases(infos: &[Option<ReleaseInfo>]) {
    for info in infos {
        match info {
            Some(info) => {
                let line = serde_json::to_string(info).unwrap_or_else(|_| info.name.clone());
                println!("{line}");
            }
            None => println!("skipped"),
        }
    }
}

fn run_doctor(
    session: &Session,
    ctx: &ExecutionContext,
    pipeline: &PipelineConfig,
    pipeline_path: &Path,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    println!("cwd: {}", ctx.cwd.display());
    println!(
        "config: {}{}",
        pipeline_path.display(),
        if pipeline_path.exists() { "" } else { " (not found)" }
    );
    println!("ci: {}", detect_environment(&ctx.env));

    let official = session.options().official_registry(&ctx.env);
    println!("official_registry: {official}");

    let config = match PluginConfig::from_options(&pipeline.plugin) {
        Ok(config) => config,
        Err(err) => {
            for error in err.errors() {
                reporter.warn(&format!("{}: {error}", error.code()));
            }
            PluginConfig::from_options_lenient(&pipeline.plugin)
        }
    };

    let npmrc = Npmrc::load(&ctx.cwd, &ctx.env)?;
    let files: Vec<String> = npmrc.files().map(|p| p.display().to_string()).collect();
    println!(
        "npmrc: {}",
        if files.is_empty() {
            "-".to_string()
        } else {
            files.join(", ")
        }
    );

    for target in config.targets() {
        let dir = target.base_path(&ctx.cwd);
        match read_manifest(&dir) {
            Ok(manifest) => {
                let registry = resolve_registry(&manifest, &npmrc, &ctx.env, &official);
                let credentials = npmrc
                    .credentials_for(&registry, &ctx.env)
                    .map(|c| c.kind().to_string())
                    .or_else(|| detected_env_credentials(&ctx.env))
                    .unwrap_or_else(|| "none".to_string());
                println!("package: {} ({})", manifest.name(), target.label());
                println!("  registry: {registry}");
                println!("  dist_tag: {}", dist_tag(None, &manifest));
                println!("  credentials: {credentials}");
            }
            Err(err) => reporter.warn(&format!("{}: {err}", err.code())),
        }
    }

    let cli = PackageManagerCli::new(
        config.package_manager,
        &ctx.env,
        session.options().command_timeout,
    );
    let location = which(cli.program())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| cli.program().to_string());
    match cli.version(&ctx.cwd) {
        Some(version) => println!("{}: {version} ({location})", config.package_manager),
        None => reporter.warn(&format!(
            "unable to run {} --version ({location})",
            config.package_manager
        )),
    }

    Ok(())
}

fn detected_env_credentials(env: &npmship::types::EnvMap) -> Option<String> {
    use npmship::auth::{GITHUB_TOKEN_ENV, NPM_TOKEN_ENV, NPM_USERNAME_ENV};
    use npmship::types::env_value;

    [NPM_TOKEN_ENV, NPM_USERNAME_ENV, GITHUB_TOKEN_ENV]
        .into_iter()
        .find(|name| env_value(env, &[name]).is_some())
        .map(|name| format!("{name} (environment)"))
}
