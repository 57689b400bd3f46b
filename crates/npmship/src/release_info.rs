use npmship_npmrc::same_registry;
use npmship_types::ReleaseInfo;

/// Public package pages on the official registry's website.
pub const PACKAGE_PAGE_BASE: &str = "https://www.npmjs.com/package/";

/// Release metadata for `name@version` published on `dist_tag`.
///
/// Only the official registry has a public page to link.
pub fn release_info(
    name: &str,
    version: &str,
    dist_tag: &str,
    registry: &str,
    official_registry: &str,
) -> ReleaseInfo {
    let url = same_registry(registry, official_registry)
        .then(|| format!("{PACKAGE_PAGE_BASE}{name}/v/{version}"));
    ReleaseInfo {
        name: format!("npm package (@{dist_tag} dist-tag)"),
        url,
        channel: dist_tag.to_string(),
    }
}
