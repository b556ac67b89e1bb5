//! Docker Registry HTTP API v2 client.
//!
//! Implements the pull side of the distribution protocol:
//!
//! - **Challenge-driven authentication**: requests go out unauthenticated
//!   first; a `401` is answered by parsing the `Www-Authenticate: Bearer`
//!   challenge, fetching a token from the advertised realm, and retrying
//!   once. A second `401` is fatal.
//! - **Credential-preserving redirects**: registries bounce blob requests to
//!   object storage on other hosts, and stock HTTP clients strip
//!   `Authorization` on cross-host redirects. Redirects are therefore
//!   followed manually, re-attaching every header on each hop.
//! - **Manifest resolution**: the tag endpoint is asked for both manifest and
//!   index media types; indexes are narrowed to one platform by the fixed
//!   preference `linux/arm64` then `linux/amd64`.
//! - **Streaming layers**: blob bodies flow straight into
//!   [`layer::apply_layer`], which tees them through a SHA-256 hasher. Only
//!   the config blob (small by construction) touches disk as-is.

use crate::constants::{
    CONFIG_BLOB_FILE, DOCKER_MANIFEST_LIST_MEDIA_TYPE, MANIFEST_ACCEPT, MANIFEST_IMAGE_ACCEPT,
    MAX_ERROR_BODY, MAX_REDIRECTS, OCI_IMAGE_INDEX_MEDIA_TYPE, PLATFORM_PREFERENCE, PULL_TIMEOUT,
    ROOTFS_DIR,
};
use crate::error::{Error, Result};
use crate::image::{Digest, ImageRef};
use crate::layer;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

// =============================================================================
// Wire Format
// =============================================================================

/// Content descriptor: media type, size, digest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: i64,
    pub digest: String,
}

/// Single-platform image manifest. Layer order is significant: layers are
/// applied bottom-up in the order listed.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageManifest {
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// Multi-arch manifest index (Docker manifest list / OCI image index).
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestIndex {
    pub manifests: Vec<IndexEntry>,
}

/// Platform-qualified manifest descriptor inside an index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub platform: Option<PlatformDescriptor>,
}

/// Target platform of an index entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformDescriptor {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
}

// =============================================================================
// Bearer Challenge
// =============================================================================

/// Parsed `Www-Authenticate: Bearer` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

/// Parses a bearer challenge header: comma-separated `key="value"` pairs,
/// case-insensitive keys, quotes optional.
pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.trim();
    let rest = if rest.len() >= 6 && rest[..6].eq_ignore_ascii_case("bearer") {
        &rest[6..]
    } else {
        return None;
    };

    let mut realm = None;
    let mut service = None;
    let mut scope = None;

    for part in rest.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            "scope" => scope = Some(value),
            _ => {}
        }
    }

    realm.map(|realm| BearerChallenge {
        realm,
        service,
        scope,
    })
}

// =============================================================================
// Platform Selection
// =============================================================================

/// Narrows a manifest index to one platform manifest digest, honouring the
/// fixed preference order.
pub fn select_platform(index: &ManifestIndex) -> Result<&IndexEntry> {
    for (os, arch) in PLATFORM_PREFERENCE {
        let found = index.manifests.iter().find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == os && p.architecture == arch)
        });
        if let Some(entry) = found {
            return Ok(entry);
        }
    }

    let available: Vec<String> = index
        .manifests
        .iter()
        .filter_map(|m| m.platform.as_ref())
        .map(|p| format!("{}/{}", p.os, p.architecture))
        .collect();

    Err(Error::NoSuitablePlatform {
        available: available.join(", "),
    })
}

// =============================================================================
// Registry Client
// =============================================================================

/// Pull-only client for one registry session.
///
/// Holds the HTTP client (automatic redirects disabled, see module docs)
/// and the bearer token cached after the first challenge.
pub struct RegistryClient {
    http: Client,
    token: Option<String>,
}

impl RegistryClient {
    /// Creates a client with redirect handling disabled so credentials can be
    /// re-attached manually on every hop.
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(PULL_TIMEOUT)
            .user_agent(concat!("ccrun/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(RegistryClient { http, token: None })
    }

    /// Pulls an image: config blob saved verbatim to `<dest>/config.json`,
    /// layers streamed and merged into `<dest>/rootfs/`.
    pub fn pull(&mut self, reference: &ImageRef, dest: &Path) -> Result<()> {
        info!("Pulling image: {}", reference);

        let manifest = self.resolve_manifest(reference)?;
        fs::create_dir_all(dest)?;

        // Config blob is persisted byte-for-byte, never re-serialised.
        let config_digest = Digest::parse(&manifest.config.digest)?;
        let mut response = self.fetch_blob(reference, &config_digest)?;
        let mut config_file = fs::File::create(dest.join(CONFIG_BLOB_FILE))?;
        io::copy(&mut response, &mut config_file).map_err(|e| Error::Transport {
            url: format!("blob {}", config_digest),
            reason: e.to_string(),
        })?;
        debug!("Saved config blob {}", config_digest);

        let rootfs = dest.join(ROOTFS_DIR);
        fs::create_dir_all(&rootfs)?;

        for descriptor in &manifest.layers {
            let digest = Digest::parse(&descriptor.digest)?;
            info!("Applying layer: {} ({} bytes)", digest, descriptor.size);
            let response = self.fetch_blob(reference, &digest)?;
            let consumed = layer::apply_layer(response, &rootfs, &digest)?;
            debug!("Layer {} verified ({} bytes)", digest, consumed);
        }

        Ok(())
    }

    /// Resolves the tag endpoint to a single-platform image manifest,
    /// dispatching on the response `Content-Type`.
    pub fn resolve_manifest(&mut self, reference: &ImageRef) -> Result<ImageManifest> {
        let url = format!(
            "https://{}/v2/{}/manifests/{}",
            reference.registry, reference.repository, reference.tag
        );
        let response = self.get(&reference.repository, &url, MANIFEST_ACCEPT)?;
        let response = require_ok(response, &url)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = read_body(response, &url)?;

        if content_type.starts_with(DOCKER_MANIFEST_LIST_MEDIA_TYPE)
            || content_type.starts_with(OCI_IMAGE_INDEX_MEDIA_TYPE)
        {
            let index: ManifestIndex =
                serde_json::from_str(&body).map_err(|e| Error::MalformedResponse {
                    url: url.clone(),
                    reason: format!("manifest index: {}", e),
                })?;
            let entry = select_platform(&index)?;
            let digest = Digest::parse(&entry.digest)?;
            debug!("Index resolved to platform manifest {}", digest);

            let manifest_url = format!(
                "https://{}/v2/{}/manifests/{}",
                reference.registry, reference.repository, digest
            );
            let response = self.get(&reference.repository, &manifest_url, MANIFEST_IMAGE_ACCEPT)?;
            let response = require_ok(response, &manifest_url)?;
            let body = read_body(response, &manifest_url)?;
            serde_json::from_str(&body).map_err(|e| Error::MalformedResponse {
                url: manifest_url,
                reason: format!("image manifest: {}", e),
            })
        } else {
            serde_json::from_str(&body).map_err(|e| Error::MalformedResponse {
                url,
                reason: format!("image manifest: {}", e),
            })
        }
    }

    /// Fetches a blob by digest, retrying with the bare hex form for registry
    /// proxies that reject the `sha256:` prefix.
    pub fn fetch_blob(&mut self, reference: &ImageRef, digest: &Digest) -> Result<Response> {
        let url = format!(
            "https://{}/v2/{}/blobs/{}",
            reference.registry, reference.repository, digest
        );
        debug!("Fetching blob: {}", url);
        let response = self.get(&reference.repository, &url, "application/octet-stream")?;
        if response.status() == StatusCode::OK {
            return Ok(response);
        }

        let bare_url = format!(
            "https://{}/v2/{}/blobs/{}",
            reference.registry,
            reference.repository,
            digest.hex()
        );
        debug!("Retrying blob without digest prefix: {}", bare_url);
        let response = self.get(&reference.repository, &bare_url, "application/octet-stream")?;
        if response.status() == StatusCode::OK {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Err(Error::UnexpectedStatus {
            url: bare_url,
            status,
            body: truncate(body),
        })
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Authenticated GET: tries the cached token (or nothing), answers one
    /// `401` with the challenge/token flow, and retries exactly once.
    fn get(&mut self, repository: &str, url: &str, accept: &str) -> Result<Response> {
        let response = self.execute(url, accept)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge)
            .ok_or_else(|| Error::TokenRejected {
                reason: format!("401 from {} without a usable bearer challenge", url),
            })?;

        self.token = Some(self.fetch_token(repository, &challenge)?);

        let response = self.execute(url, accept)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::UnexpectedStatus {
                url: url.to_string(),
                status: 401,
                body: truncate(response.text().unwrap_or_default()),
            });
        }
        Ok(response)
    }

    /// Issues a GET and follows redirects by hand, re-attaching `Accept` and
    /// `Authorization` on every hop.
    fn execute(&self, url: &str, accept: &str) -> Result<Response> {
        let mut current = url.to_string();
        for _ in 0..MAX_REDIRECTS {
            let mut request = self.http.get(&current).header(ACCEPT, accept);
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }
            let response = request.send().map_err(|e| Error::Transport {
                url: current.clone(),
                reason: e.to_string(),
            })?;

            if !response.status().is_redirection() {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::Transport {
                    url: current.clone(),
                    reason: "redirect without Location header".to_string(),
                })?;
            // Location may be relative; resolve against the response URL.
            current = response
                .url()
                .join(location)
                .map_err(|e| Error::Transport {
                    url: current.clone(),
                    reason: format!("bad redirect target '{}': {}", location, e),
                })?
                .to_string();
            debug!("Following redirect to {}", current);
        }

        Err(Error::Transport {
            url: url.to_string(),
            reason: format!("more than {} redirects", MAX_REDIRECTS),
        })
    }

    /// Exchanges a bearer challenge for a token at the advertised realm.
    fn fetch_token(&self, repository: &str, challenge: &BearerChallenge) -> Result<String> {
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", repository));

        let mut request = self.http.get(&challenge.realm).query(&[("scope", &scope)]);
        if let Some(service) = &challenge.service {
            request = request.query(&[("service", service)]);
        }

        debug!("Requesting token from {}", challenge.realm);
        let response = request.send().map_err(|e| Error::Transport {
            url: challenge.realm.clone(),
            reason: e.to_string(),
        })?;

        if response.status() != StatusCode::OK {
            return Err(Error::TokenRejected {
                reason: format!(
                    "token endpoint {} answered {}",
                    challenge.realm,
                    response.status()
                ),
            });
        }

        let granted: TokenResponse = response.json().map_err(|e| Error::MalformedResponse {
            url: challenge.realm.clone(),
            reason: e.to_string(),
        })?;
        if granted.token.is_empty() {
            return Err(Error::TokenRejected {
                reason: format!("token endpoint {} granted an empty token", challenge.realm),
            });
        }
        Ok(granted.token)
    }
}

// =============================================================================
// Response Helpers
// =============================================================================

fn require_ok(response: Response, url: &str) -> Result<Response> {
    if response.status() == StatusCode::OK {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    Err(Error::UnexpectedStatus {
        url: url.to_string(),
        status,
        body: truncate(body),
    })
}

fn read_body(response: Response, url: &str) -> Result<String> {
    response.text().map_err(|e| Error::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        // The bound is a byte offset; back up to a character boundary so a
        // multi-byte response byte straddling it cannot panic the error path.
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_parses_docker_hub_header() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#;
        let challenge = parse_bearer_challenge(header).unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:library/alpine:pull")
        );
    }

    #[test]
    fn challenge_keys_are_case_insensitive() {
        let header = r#"BEARER Realm="https://r.example/token",SERVICE="svc""#;
        let challenge = parse_bearer_challenge(header).unwrap();
        assert_eq!(challenge.realm, "https://r.example/token");
        assert_eq!(challenge.service.as_deref(), Some("svc"));
        assert_eq!(challenge.scope, None);
    }

    #[test]
    fn challenge_tolerates_unquoted_values() {
        let header = "Bearer realm=https://r.example/token,service=svc";
        let challenge = parse_bearer_challenge(header).unwrap();
        assert_eq!(challenge.realm, "https://r.example/token");
    }

    #[test]
    fn challenge_rejects_non_bearer() {
        assert!(parse_bearer_challenge(r#"Basic realm="registry""#).is_none());
        assert!(parse_bearer_challenge("").is_none());
    }

    #[test]
    fn challenge_requires_a_realm() {
        assert!(parse_bearer_challenge(r#"Bearer service="svc""#).is_none());
    }

    #[test]
    fn error_body_truncation_respects_character_boundaries() {
        // A four-byte character straddling the byte bound must not panic.
        let mut body = "x".repeat(MAX_ERROR_BODY - 2);
        body.push('\u{1F980}');
        body.push_str(&"y".repeat(50));

        let shortened = truncate(body);
        assert!(shortened.ends_with("..."));
        assert!(shortened.len() <= MAX_ERROR_BODY + 3);

        let short = truncate("small body".to_string());
        assert_eq!(short, "small body");
    }
}
