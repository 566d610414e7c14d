use crate::errors::ImageError;
use regex::Regex;
use std::{fmt, str, str::FromStr};

/// Default registry server, used when a reference carries no server of its own
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Additional name the default registry is known under
const DEFAULT_REGISTRY_ALIAS: &str = "docker.io";

/// Prefix applied to single-segment repositories on the default registry
const LIBRARY_PREFIX: &str = "library";

/// Parsed Docker-style image reference
///
/// An owned reference of the form `[registry/]repository[:tag][@digest]`.
/// Only the repository is mandatory. Whether the first path segment is a
/// registry is decided the way Docker decides it: a segment containing a dot
/// or a colon, or equal to `localhost`, names a server; anything else is the
/// first segment of the repository path. Single-segment repositories on the
/// default registry resolve under `library/`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageName {
    serialized: String,
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageName {
    /// Returns the existing string representation of this reference
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as an [ImageName]
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref REPOSITORY: Regex = Regex::new(
                "^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$"
            )
            .unwrap();
            static ref TAG: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").unwrap();
            static ref DIGEST: Regex = Regex::new(r"^[a-z0-9+._-]+:[0-9a-f]{32,}$").unwrap();
        }

        let err = || ImageError::InvalidReferenceFormat(s.to_owned());

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) if DIGEST.is_match(digest) => (rest, Some(digest.to_owned())),
            Some(_) => return Err(err()),
            None => (s, None),
        };

        // a colon after the last slash separates the tag; a colon before it
        // belongs to a registry port
        let tag_split = match rest.rfind(':') {
            Some(colon) if colon > rest.rfind('/').unwrap_or(0) => {
                let tag = &rest[colon + 1..];
                if !TAG.is_match(tag) {
                    return Err(err());
                }
                (&rest[..colon], Some(tag.to_owned()))
            }
            _ => (rest, None),
        };
        let (path, tag) = tag_split;

        let (registry, repository) = match path.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_owned()), remainder.to_owned())
            }
            _ => (None, path.to_owned()),
        };

        if repository.is_empty() || !REPOSITORY.is_match(&repository) {
            return Err(err());
        }

        Ok(ImageName {
            serialized: s.to_owned(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry server named by the reference, if any
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// Repository path exactly as written
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Most specific version available: digest, then tag, then `latest`
    pub fn version_str(&self) -> &str {
        if let Some(digest) = &self.digest {
            digest
        } else if let Some(tag) = &self.tag {
            tag
        } else {
            "latest"
        }
    }

    /// Network name of the registry to contact for this reference
    pub fn effective_registry(&self) -> &str {
        match self.registry.as_deref() {
            None | Some(DEFAULT_REGISTRY_ALIAS) => DEFAULT_REGISTRY,
            Some(registry) => registry,
        }
    }

    /// Repository path on the wire, after `library/` prefixing
    pub fn effective_repository(&self) -> String {
        if self.effective_registry() == DEFAULT_REGISTRY && !self.repository.contains('/') {
            format!("{}/{}", LIBRARY_PREFIX, self.repository)
        } else {
            self.repository.clone()
        }
    }

    /// Base URL of the registry API for this reference's repository
    ///
    /// Registries reachable only by a local name speak plain http; everything
    /// else is https.
    pub fn repository_url(&self) -> String {
        let registry = self.effective_registry();
        let host = registry.split(':').next().unwrap_or(registry);
        let scheme = if host == "localhost" || host == "127.0.0.1" {
            "http"
        } else {
            "https"
        };
        format!("{}://{}/v2/{}", scheme, registry, self.effective_repository())
    }
}

impl FromStr for ImageName {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageName::parse(s)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialized)
    }
}
