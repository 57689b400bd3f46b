use npmship_types::{DEFAULT_DIST_TAG, EnvMap, PackageManifest, env_value};
use semver::VersionReq;

use crate::REGISTRY_ENV;
use crate::config::Npmrc;
use crate::nerf::normalize_registry;

/// Registry a package publishes to.
///
/// Precedence: `publishConfig` (scoped key first), the registry environment
/// variable, npmrc (scoped key first), then `default_registry`. The result
/// always ends with `/`.
pub fn resolve_registry(
    manifest: &PackageManifest,
    npmrc: &Npmrc,
    env: &EnvMap,
    default_registry: &str,
) -> String {
    let scope = manifest.scope();
    let from_manifest = manifest.publish_config.as_ref().and_then(|config| {
        scope
            .and_then(|scope| config.scoped_registry(scope))
            .or(config.registry.as_deref())
            .filter(|registry| !registry.trim().is_empty())
            .map(str::to_string)
    });

    let registry = from_manifest
        .or_else(|| env_value(env, &REGISTRY_ENV).map(str::to_string))
        .or_else(|| npmrc.registry_for(scope, env))
        .unwrap_or_else(|| default_registry.to_string());
    normalize_registry(&registry)
}

/// Distribution tag for a release channel.
///
/// A channel that parses as a semver range maps to `release-<channel>`, any
/// other channel is used as is. Without a channel the manifest's
/// `publishConfig.tag` applies, then `latest`.
pub fn dist_tag(channel: Option<&str>, manifest: &PackageManifest) -> String {
    match channel.map(str::trim).filter(|channel| !channel.is_empty()) {
        Some(channel) if VersionReq::parse(channel).is_ok() => format!("release-{channel}"),
        Some(channel) => channel.to_string(),
        None => manifest
            .publish_config
            .as_ref()
            .and_then(|config| config.tag.as_deref())
            .filter(|tag| !tag.trim().is_empty())
            .unwrap_or(DEFAULT_DIST_TAG)
            .to_string(),
    }
}
