//! Lifecycle driver.

use std::path::PathBuf;

use anyhow::Result;
use npmship_auth::{AuthRequest, AuthVerifier, SkipReason, Verification};
use npmship_config::{PackageTarget, PluginConfig, RawOptions, effective_options, validate};
use npmship_npm::{OUTPUT_TAIL_LINES, PackageManagerCli, tail_lines};
use npmship_process::CommandOutput;
use npmship_npmrc::{Npmrc, ScopedNpmrc, dist_tag, resolve_registry};
use npmship_types::{AggregateError, LastRelease, PackageManifest, PluginError, ReleaseInfo, Reporter};

use crate::context::{ExecutionContext, SessionOptions};
use crate::fanout::{combine_failures, fan_out};
use crate::last_release::{Lookup, find_last_release, registry_auth};
use crate::manifest::{read_manifest, write_version};
use crate::pack::pack_into;
use crate::release_info::release_info;

/// One package the session works on.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub target: PackageTarget,
    /// Directory holding `package.json`.
    pub dir: PathBuf,
    pub manifest: PackageManifest,
}

impl Package {
    /// Why this package is not published, if it is not.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        if !self.target.npm_publish {
            Some(SkipReason::NpmPublishDisabled)
        } else if self.manifest.is_private() {
            Some(SkipReason::PrivatePackage)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct Plan {
    config: PluginConfig,
    packages: Vec<Package>,
}

/// State of one release run.
///
/// A session verifies at most once: later phases skip verification once it
/// has succeeded, and `publish` prepares first if `prepare` never ran.
/// Independent sessions share nothing.
#[derive(Debug, Default)]
pub struct Session {
    options: SessionOptions,
    verifier: Option<AuthVerifier>,
    npmrc: Option<ScopedNpmrc>,
    verified: bool,
    prepared: bool,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Registry-config file handed to the package manager, once created.
    pub fn npmrc(&self) -> Option<&ScopedNpmrc> {
        self.npmrc.as_ref()
    }

    /// Number of memoized credential liveness checks.
    pub fn cached_liveness_checks(&self) -> usize {
        self.verifier.as_ref().map_or(0, AuthVerifier::cached_checks)
    }

    /// Validate options, read every manifest and verify publish authorization.
    ///
    /// All typed problems found are returned together as an
    /// [`AggregateError`].
    pub fn verify_conditions(
        &mut self,
        raw: &RawOptions,
        ctx: &mut ExecutionContext,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        self.verify(raw, ctx, reporter).map(|_| ())
    }

    /// Write the release version into the manifests and, where `tarballDir`
    /// is set, pack an archive into it.
    pub fn prepare(
        &mut self,
        raw: &RawOptions,
        ctx: &mut ExecutionContext,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let plan = self.plan(raw, ctx, reporter)?;
        self.prepare_plan(&plan, ctx, reporter)
    }

    /// Publish the first package. `None` when it is not published.
    pub fn publish(
        &mut self,
        raw: &RawOptions,
        ctx: &mut ExecutionContext,
        reporter: &mut dyn Reporter,
    ) -> Result<Option<ReleaseInfo>> {
        Ok(self.publish_all(raw, ctx, reporter)?.into_iter().next().flatten())
    }

    /// Publish every package, one result per package in declaration order.
    pub fn publish_all(
        &mut self,
        raw: &RawOptions,
        ctx: &mut ExecutionContext,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<Option<ReleaseInfo>>> {
        let plan = self.plan(raw, ctx, reporter)?;
        if !self.prepared {
            self.prepare_plan(&plan, ctx, reporter)?;
        }

        let next = ctx.require_next_release()?;
        let userconfig = self.userconfig(ctx)?;
        let official = self.options.official_registry(&ctx.env);
        let npmrc = Npmrc::load(&ctx.cwd, &ctx.env)?;
        let cli = PackageManagerCli::new(
            plan.config.package_manager,
            &ctx.env,
            self.options.command_timeout,
        );

        fan_out(&plan.packages, reporter, |package, reporter| {
            if let Some(reason) = package.skip_reason() {
                reporter.info(&format!("Skip publishing to npm registry as {reason}"));
                return Ok(None);
            }
            let manifest = &package.manifest;
            let registry = resolve_registry(manifest, &npmrc, &ctx.env, &official);
            let tag = dist_tag(next.channel.as_deref(), manifest);

            reporter.info(&format!(
                "Publishing version {} to npm registry on dist-tag {tag}",
                next.version
            ));
            let output = cli.publish(
                &ctx.cwd,
                &package.target.pkg_arg(),
                &userconfig,
                &tag,
                &registry,
            )?;
            forward_output(&output, reporter);
            reporter.info(&format!(
                "Published {}@{} to dist-tag @{tag} on {registry}",
                manifest.name(),
                next.version
            ));
            Ok(Some(release_info(
                manifest.name(),
                &next.version,
                &tag,
                &registry,
                &official,
            )))
        })
    }

    /// Point the release channel's dist-tag at the first package's version.
    pub fn add_channel(
        &mut self,
        raw: &RawOptions,
        ctx: &mut ExecutionContext,
        reporter: &mut dyn Reporter,
    ) -> Result<Option<ReleaseInfo>> {
        Ok(self
            .add_channel_all(raw, ctx, reporter)?
            .into_iter()
            .next()
            .flatten())
    }

    /// Point the release channel's dist-tag at the version of every package.
    pub fn add_channel_all(
        &mut self,
        raw: &RawOptions,
        ctx: &mut ExecutionContext,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<Option<ReleaseInfo>>> {
        let plan = self.plan(raw, ctx, reporter)?;
        let next = ctx.require_next_release()?;
        let userconfig = self.userconfig(ctx)?;
        let official = self.options.official_registry(&ctx.env);
        let npmrc = Npmrc::load(&ctx.cwd, &ctx.env)?;
        let cli = PackageManagerCli::new(
            plan.config.package_manager,
            &ctx.env,
            self.options.command_timeout,
        );

        fan_out(&plan.packages, reporter, |package, reporter| {
            if let Some(reason) = package.skip_reason() {
                reporter.info(&format!("Skip adding to npm channel as {reason}"));
                return Ok(None);
            }
            let manifest = &package.manifest;
            let registry = resolve_registry(manifest, &npmrc, &ctx.env, &official);
            let tag = dist_tag(next.channel.as_deref(), manifest);

            reporter.info(&format!(
                "Adding version {} to npm registry on dist-tag {tag}",
                next.version
            ));
            let output = cli.dist_tag_add(
                &ctx.cwd,
                manifest.name(),
                &next.version,
                &tag,
                &userconfig,
                &registry,
            )?;
            forward_output(&output, reporter);
            reporter.info(&format!(
                "Added {}@{} to dist-tag @{tag} on {registry}",
                manifest.name(),
                next.version
            ));
            Ok(Some(release_info(
                manifest.name(),
                &next.version,
                &tag,
                &registry,
                &official,
            )))
        })
    }

    /// Last release of the first package on `channel`'s dist-tag.
    ///
    /// `None` when the package was never published or has no such tag.
    pub fn last_release(
        &mut self,
        raw: &RawOptions,
        ctx: &mut ExecutionContext,
        channel: Option<&str>,
        reporter: &mut dyn Reporter,
    ) -> Result<Option<LastRelease>> {
        let plan = self.plan(raw, ctx, reporter)?;
        let Some(package) = plan.packages.first() else {
            return Ok(None);
        };

        let official = self.options.official_registry(&ctx.env);
        let npmrc = Npmrc::load(&ctx.cwd, &ctx.env)?;
        let manifest = &package.manifest;
        let registry = resolve_registry(manifest, &npmrc, &ctx.env, &official);
        let tag = dist_tag(channel, manifest);
        let auth = registry_auth(&registry, &npmrc, &ctx.env);

        let lookup = Lookup {
            name: manifest.name(),
            registry: &registry,
            dist_tag: &tag,
            cwd: &ctx.cwd,
            http_timeout: self.options.http_timeout,
            command_timeout: self.options.command_timeout,
        };
        find_last_release(&lookup, auth.as_ref(), &ctx.env, reporter)
    }

    fn verify(
        &mut self,
        raw: &RawOptions,
        ctx: &mut ExecutionContext,
        reporter: &mut dyn Reporter,
    ) -> Result<Plan> {
        let options = effective_options(raw, &ctx.publish_steps);
        let mut errors = AggregateError::new(validate(&options));
        let config = PluginConfig::from_options_lenient(&options);
        let packages = load_packages(&config, ctx, &mut errors);
        let mut untyped = Vec::new();

        let verifier = self
            .verifier
            .get_or_insert_with(|| AuthVerifier::new(self.options.verifier_options(&ctx.env)));
        for package in &packages {
            let pkg_arg = package.target.pkg_arg();
            let request = AuthRequest {
                cwd: &ctx.cwd,
                manifest: &package.manifest,
                npm_publish: package.target.npm_publish,
                pkg_arg: &pkg_arg,
                package_manager: config.package_manager,
            };
            match verifier.verify(&request, &mut ctx.env, &mut self.npmrc, reporter) {
                Ok(Verification::Skipped(reason)) => reporter.info(&format!(
                    "Skip npm authentication for {} as {reason}",
                    package.manifest.name()
                )),
                Ok(Verification::Verified { registry, method }) => reporter.info(&format!(
                    "Verified {} on {registry} using {method}",
                    package.manifest.name()
                )),
                Err(err) => match err.downcast::<PluginError>() {
                    Ok(plugin) if errors.errors().contains(&plugin) => {}
                    Ok(plugin) => errors.push(plugin),
                    Err(err) => untyped.push(err),
                },
            }
        }

        combine_failures(errors, untyped, "verification problems")?;
        self.verified = true;
        Ok(Plan { config, packages })
    }

    /// Configuration and manifests for a phase, verifying first if no phase
    /// has verified yet.
    fn plan(
        &mut self,
        raw: &RawOptions,
        ctx: &mut ExecutionContext,
        reporter: &mut dyn Reporter,
    ) -> Result<Plan> {
        if !self.verified {
            return self.verify(raw, ctx, reporter);
        }
        let options = effective_options(raw, &ctx.publish_steps);
        let config = PluginConfig::from_options_lenient(&options);
        let mut errors = AggregateError::default();
        let packages = load_packages(&config, ctx, &mut errors);
        errors.into_result()?;
        Ok(Plan { config, packages })
    }

    fn prepare_plan(
        &mut self,
        plan: &Plan,
        ctx: &ExecutionContext,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let next = ctx.require_next_release()?;
        let userconfig = self.userconfig(ctx)?;
        let cli = PackageManagerCli::new(
            plan.config.package_manager,
            &ctx.env,
            self.options.command_timeout,
        );

        fan_out(&plan.packages, reporter, |package, reporter| {
            write_version(&package.dir, &next.version, reporter)?;
            if let Some(tarball_dir) = &package.target.tarball_dir {
                pack_into(
                    &cli,
                    &ctx.cwd,
                    &package.target.pkg_arg(),
                    tarball_dir,
                    &userconfig,
                    reporter,
                )?;
            }
            Ok(())
        })?;
        self.prepared = true;
        Ok(())
    }

    /// Path of the session's registry-config file, seeding it from the
    /// loaded npmrc files if verification never created it.
    fn userconfig(&mut self, ctx: &ExecutionContext) -> Result<PathBuf> {
        if let Some(file) = &self.npmrc {
            return Ok(file.path().to_path_buf());
        }
        let npmrc = Npmrc::load(&ctx.cwd, &ctx.env)?;
        let file = ScopedNpmrc::seeded(&npmrc.concatenated())?;
        let path = file.path().to_path_buf();
        self.npmrc = Some(file);
        Ok(path)
    }
}

/// Package-manager stdout, redacted, as info lines.
fn forward_output(output: &CommandOutput, reporter: &mut dyn Reporter) {
    for line in tail_lines(&output.stdout, OUTPUT_TAIL_LINES).lines() {
        if !line.trim().is_empty() {
            reporter.info(line);
        }
    }
}

fn load_packages(
    config: &PluginConfig,
    ctx: &ExecutionContext,
    errors: &mut AggregateError,
) -> Vec<Package> {
    config
        .targets()
        .iter()
        .filter_map(|target| {
            let dir = target.base_path(&ctx.cwd);
            match read_manifest(&dir) {
                Ok(manifest) => Some(Package {
                    target: target.clone(),
                    dir,
                    manifest,
                }),
                Err(err) => {
                    errors.push(err);
                    None
                }
            }
        })
        .collect()
}
