//! Support for downloading container images from a registry server

use crate::{
    errors::ImageError,
    image::{
        manifest::{media_types, Link, Manifest, ManifestList},
        name::ImageName,
    },
};
use regex::Regex;
use reqwest::{
    blocking::{Client as HttpClient, Response},
    header, StatusCode,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::{self, Read};

const ACCEPT_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Registry clients download manifests and layer blobs over the v2 protocol
///
/// One client holds at most one bearer token, scoped to the repository it was
/// acquired for. Pulling a second image from another repository triggers a
/// fresh token handshake.
pub struct RegistryClient {
    http: HttpClient,
    token: Option<String>,
}

impl RegistryClient {
    pub fn new() -> Result<Self, ImageError> {
        let http = HttpClient::builder()
            .user_agent(default_user_agent())
            .build()?;
        Ok(RegistryClient { http, token: None })
    }

    /// Fetch the image manifest, resolving multi-platform lists to the entry
    /// matching this host
    pub fn pull_manifest(&mut self, image: &ImageName) -> Result<Manifest, ImageError> {
        let url = format!("{}/manifests/{}", image.repository_url(), image.version_str());
        let body = self.get(image, &url, Some(ACCEPT_MANIFEST))?.text()?;
        log::trace!("raw json manifest, {}", body);

        let value: serde_json::Value = serde_json::from_str(&body)?;
        if value.get("manifests").is_some() {
            let list: ManifestList = serde_json::from_str(&body)?;
            let digest = select_platform(image, &list)?;
            log::debug!("{} resolved to platform manifest {}", image, digest);
            let url = format!("{}/manifests/{}", image.repository_url(), digest);
            let body = self.get(image, &url, Some(ACCEPT_MANIFEST))?.text()?;
            log::trace!("raw json platform manifest, {}", body);
            Ok(serde_json::from_str(&body)?)
        } else {
            Ok(serde_json::from_str(&body)?)
        }
    }

    /// Begin streaming one layer blob
    ///
    /// The returned stream hashes everything read through it; callers must
    /// finish with [LayerStream::verify] so truncated or corrupted downloads
    /// are detected after the content is consumed.
    pub fn open_layer(
        &mut self,
        image: &ImageName,
        link: &Link,
    ) -> Result<LayerStream, ImageError> {
        match link.media_type.as_str() {
            media_types::LAYER_TAR_GZIP | media_types::OCI_LAYER_TAR_GZIP => {}
            other => return Err(ImageError::UnsupportedLayerType(other.to_owned())),
        }
        let url = format!("{}/blobs/{}", image.repository_url(), link.digest);
        let response = self.get(image, &url, None)?;
        Ok(LayerStream {
            inner: response,
            hasher: Sha256::new(),
            expected: link.digest.clone(),
        })
    }

    fn get(
        &mut self,
        image: &ImageName,
        url: &str,
        accept: Option<&str>,
    ) -> Result<Response, ImageError> {
        let response = self.request(url, accept)?;
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            self.token = Some(self.fetch_token(image, &challenge)?);
            self.request(url, accept)?
        } else {
            response
        };
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ImageError::RegistryStatus {
                url: url.to_owned(),
                status: response.status(),
            })
        }
    }

    fn request(&self, url: &str, accept: Option<&str>) -> Result<Response, ImageError> {
        log::debug!("GET {}", url);
        let mut request = self.http.get(url);
        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request.send()?)
    }

    /// Anonymous pull-scope token handshake
    ///
    /// Reference: <https://docs.docker.com/registry/spec/auth/token/>
    fn fetch_token(&self, image: &ImageName, challenge: &str) -> Result<String, ImageError> {
        let challenge = BearerChallenge::parse(challenge)?;
        let scope = challenge
            .scope
            .unwrap_or_else(|| format!("repository:{}:pull", image.effective_repository()));
        log::debug!("requesting token from {} for {}", challenge.realm, scope);
        let response = self
            .http
            .get(&challenge.realm)
            .query(&[("service", challenge.service.as_str()), ("scope", scope.as_str())])
            .send()?;
        if !response.status().is_success() {
            return Err(ImageError::RegistryStatus {
                url: challenge.realm,
                status: response.status(),
            });
        }
        let token: TokenResponse = response.json()?;
        token
            .token
            .or(token.access_token)
            .ok_or(ImageError::UnsupportedAuthentication(
                "token server returned no token".to_owned(),
            ))
    }
}

fn default_user_agent() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

/// Map the rust architecture names onto registry platform names
fn platform_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    }
}

fn select_platform(image: &ImageName, list: &ManifestList) -> Result<String, ImageError> {
    let arch = platform_arch();
    list.manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map(|platform| platform.os == "linux" && platform.architecture == arch)
                .unwrap_or(false)
        })
        .map(|entry| entry.digest.clone())
        .ok_or_else(|| ImageError::NoMatchingPlatform {
            image: image.to_string(),
            arch: arch.to_owned(),
        })
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// A layer blob in transit, hashed as it is read
pub struct LayerStream {
    inner: Response,
    hasher: Sha256,
    expected: String,
}

impl Read for LayerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.inner.read(buf)?;
        self.hasher.update(&buf[..len]);
        Ok(len)
    }
}

impl LayerStream {
    /// Drain whatever the decompressor left unread and check the digest of
    /// the full compressed stream against the manifest link
    pub fn verify(mut self) -> Result<(), ImageError> {
        io::copy(&mut self, &mut io::sink())?;
        let LayerStream {
            hasher, expected, ..
        } = self;
        let found = format!("sha256:{:x}", hasher.finalize());
        if found == expected {
            Ok(())
        } else {
            Err(ImageError::ContentDigestMismatch { expected, found })
        }
    }
}

#[derive(Debug, Clone)]
struct BearerChallenge {
    realm: String,
    service: String,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(auth_header: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref BEARER: Regex = Regex::new(r"^\s*(?i:bearer)\s+").unwrap();
            static ref REALM: Regex = Regex::new(r#"realm="([^"]+)""#).unwrap();
            static ref SERVICE: Regex = Regex::new(r#"service="([^"]+)""#).unwrap();
            static ref SCOPE: Regex = Regex::new(r#"scope="([^"]+)""#).unwrap();
        }
        let err = || ImageError::UnsupportedAuthentication(auth_header.to_owned());
        if !BEARER.is_match(auth_header) {
            return Err(err());
        }
        let capture = |re: &Regex| {
            re.captures(auth_header)
                .map(|captures| captures[1].to_owned())
        };
        let realm = capture(&REALM).ok_or_else(err)?;
        if !realm.starts_with("https://") {
            // token endpoints must be https
            return Err(err());
        }
        Ok(BearerChallenge {
            realm,
            service: capture(&SERVICE).unwrap_or_default(),
            scope: capture(&SCOPE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_docker_hub_challenge() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/busybox:pull""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service, "registry.docker.io");
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:library/busybox:pull")
        );
    }

    #[test]
    fn challenge_without_scope() {
        let header = r#"Bearer realm="https://ghcr.io/token",service="ghcr.io""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.service, "ghcr.io");
        assert_eq!(challenge.scope, None);
    }

    #[test]
    fn rejects_non_bearer_and_http_realms() {
        assert!(BearerChallenge::parse(r#"Basic realm="https://x/token""#).is_err());
        assert!(BearerChallenge::parse(r#"Bearer realm="http://auth/token""#).is_err());
        assert!(BearerChallenge::parse("").is_err());
    }
}
