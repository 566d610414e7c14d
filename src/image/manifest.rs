use serde::Deserialize;

/// Partial implementation of the manifest v2 schema2 spec, shared with the
/// equivalent OCI image manifest document.
///
/// Reference: https://docs.docker.com/registry/spec/manifest-v2-2/
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub layers: Vec<Link>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Link {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    pub digest: String,
}

/// Manifest list / OCI index: one entry per platform build
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ManifestList {
    pub manifests: Vec<PlatformLink>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PlatformLink {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
}

pub mod media_types {
    pub const MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
    pub const OCI_LAYER_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_manifest() {
        let raw = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": 1457,
                "digest": "sha256:3f57d9401f8d42f986df300f0c69192fc41da28ccc8d797829467780db3dd741"
            },
            "layers": [
                {
                    "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                    "size": 2220094,
                    "digest": "sha256:9ad63333ebc97e32b987ae66aa3cff81300e4c2e6d2f2395cef8a3ae18b249fe"
                }
            ]
        }"#;
        let manifest: Manifest = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.media_type, media_types::MANIFEST);
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].size, 2220094);
        assert!(manifest.layers[0].digest.starts_with("sha256:"));
    }

    #[test]
    fn decode_manifest_list() {
        let raw = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
            "manifests": [
                {
                    "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                    "size": 528,
                    "digest": "sha256:aaaa567890123456789012345678901234567890123456789012345678901234",
                    "platform": { "architecture": "amd64", "os": "linux" }
                },
                {
                    "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                    "size": 528,
                    "digest": "sha256:bbbb567890123456789012345678901234567890123456789012345678901234",
                    "platform": { "architecture": "arm64", "os": "linux", "variant": "v8" }
                }
            ]
        }"#;
        let list: ManifestList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.manifests.len(), 2);
        let arm = &list.manifests[1];
        let platform = arm.platform.as_ref().unwrap();
        assert_eq!(platform.os, "linux");
        assert_eq!(platform.architecture, "arm64");
        assert_eq!(platform.variant.as_deref(), Some("v8"));
    }
}
