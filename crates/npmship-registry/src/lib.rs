//! Registry HTTP client for npmship.
//!
//! Covers the parts of the registry surface used without going through the
//! package-manager binary: package metadata (packument) fetches, the
//! trusted-publishing token exchange, and GitHub Actions identity tokens.
//!
//! # Example
//!
//! ```no_run
//! use npmship_registry::RegistryClient;
//!
//! let client = RegistryClient::new("https://registry.npmjs.org/");
//! let packument = client.fetch_package("left-pad", None).expect("fetch");
//! println!("{:?}", packument.and_then(|p| p.tagged_version("latest").map(str::to_string)));
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use npmship_types::escape_package_name;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use url::Url;

/// Default timeout for registry requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for registry requests
pub const USER_AGENT: &str = concat!("npmship/", env!("CARGO_PKG_VERSION"));

/// Path of the trusted-publishing exchange endpoint, relative to the registry.
pub const OIDC_EXCHANGE_PATH: &str = "-/npm/v1/oidc/token/exchange/package/";

/// Authorization sent with metadata requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryAuth {
    Bearer(String),
    /// Already base64 encoded `user:pass`.
    Basic(String),
}

impl RegistryAuth {
    fn header_value(&self) -> String {
        match self {
            RegistryAuth::Bearer(token) => format!("Bearer {token}"),
            RegistryAuth::Basic(encoded) => format!("Basic {encoded}"),
        }
    }
}

/// Package document returned by `GET <registry><name>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, PackumentVersion>,
}

/// Per-version metadata of a packument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackumentVersion {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "gitHead", default, skip_serializing_if = "Option::is_none")]
    pub git_head: Option<String>,
}

impl Packument {
    /// Version carried by `tag`, falling back to `latest`.
    pub fn tagged_version(&self, tag: &str) -> Option<&str> {
        self.dist_tags
            .get(tag)
            .or_else(|| self.dist_tags.get(npmship_types::DEFAULT_DIST_TAG))
            .map(String::as_str)
    }

    pub fn git_head(&self, version: &str) -> Option<&str> {
        self.versions
            .get(version)
            .and_then(|v| v.git_head.as_deref())
            .filter(|head| !head.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenResponse {
    value: Option<String>,
}

/// Registry API client
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl RegistryClient {
    /// Create a client for `base_url` (a trailing slash is added if missing).
    pub fn new(base_url: &str) -> Self {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Self {
            base_url: format!("{}/", base_url.trim_end_matches('/')),
            timeout,
            client: build_client(timeout),
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = build_client(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch package metadata. A 404 means the package was never published.
    pub fn fetch_package(
        &self,
        name: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<Option<Packument>> {
        let url = format!("{}{}", self.base_url, escape_package_name(name));
        let mut request = self.client.get(&url);
        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION, auth.header_value());
        }

        let response = request
            .send()
            .with_context(|| format!("failed to fetch package metadata from {url}"))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let packument: Packument = response
                    .json()
                    .context("failed to parse package metadata")?;
                Ok(Some(packument))
            }
            status => Err(anyhow!(
                "unexpected status while fetching package metadata for {name}: {status}"
            )),
        }
    }

    /// Exchange a CI identity token for a short-lived publish token scoped to
    /// `name`.
    ///
    /// Every failure (transport, status, body) yields `None`.
    pub fn exchange_oidc_token(&self, name: &str, id_token: &str) -> Option<String> {
        let url = format!(
            "{}{}{}",
            self.base_url,
            OIDC_EXCHANGE_PATH,
            escape_package_name(name)
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(id_token)
            .send()
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response
            .json::<ExchangeResponse>()
            .ok()?
            .token
            .filter(|token| !token.is_empty())
    }

    /// Request a GitHub Actions OIDC identity token for `audience`.
    pub fn fetch_github_id_token(
        &self,
        request_url: &str,
        request_token: &str,
        audience: &str,
    ) -> Result<Option<String>> {
        let mut url = Url::parse(request_url)
            .with_context(|| format!("invalid identity token request URL: {request_url}"))?;
        url.query_pairs_mut().append_pair("audience", audience);

        let response = self
            .client
            .get(url.as_str())
            .bearer_auth(request_token)
            .send()
            .context("failed to request identity token")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "identity token request failed: {}",
                response.status()
            ));
        }
        let body: IdTokenResponse = response
            .json()
            .context("failed to parse identity token response")?;
        Ok(body.value.filter(|value| !value.is_empty()))
    }
}

fn build_client(timeout: Duration) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

/// Audience the registry expects in identity tokens: `npm:<registry host>`.
pub fn oidc_audience(registry: &str) -> Option<String> {
    let url = Url::parse(registry).ok()?;
    url.host_str().map(|host| format!("npm:{host}"))
}
