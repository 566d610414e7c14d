//! Error types you might see while preparing an image or running a sandbox

use std::path::PathBuf;
use thiserror::Error;

/// Errors during image download and rootfs extraction
#[derive(Error, Debug)]
pub enum ImageError {
    /// invalid image reference format
    #[error("invalid image reference format: {0:?}")]
    InvalidReferenceFormat(String),

    /// i/o error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// json error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// network request error
    #[error("network request error: {0}")]
    NetworkRequest(#[from] reqwest::Error),

    /// registry server answered with an unexpected status
    #[error("registry returned {status} for {url}")]
    RegistryStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// registry server requested an unsupported type of authentication
    #[error("registry server requested an unsupported type of authentication: {0:?}")]
    UnsupportedAuthentication(String),

    /// multi-platform image has no entry matching this host
    #[error("no linux/{arch} platform found in manifest list for {image}")]
    NoMatchingPlatform { image: String, arch: String },

    /// unsupported type for image layer
    #[error("unsupported type for image layer, {0:?}")]
    UnsupportedLayerType(String),

    /// calculated digest of downloaded content is not what we asked for
    #[error("content digest mismatch, expected {expected}, found {found}")]
    ContentDigestMismatch { expected: String, found: String },

    /// archive entry path would land outside the extraction root
    #[error("archive entry escapes extraction root: {0:?}")]
    TarPathEscape(PathBuf),

    /// link entry without a target path
    #[error("archive link entry has no target: {0:?}")]
    MissingLinkName(PathBuf),

    /// hardlink whose target never appeared in the archive
    #[error("hardlink target {target:?} missing for {link:?}")]
    HardlinkTarget { link: PathBuf, target: PathBuf },
}

/// Errors from host-side network plumbing
#[derive(Error, Debug)]
pub enum NetworkError {
    /// port mapping not in host:container form
    #[error("invalid port mapping {0:?}, expected host:container with ports in 1..=65535")]
    InvalidPortMapping(String),

    /// bridge network is not a usable IPv4 CIDR
    #[error("invalid bridge CIDR {0:?}")]
    InvalidCidr(String),

    /// a link with the bridge name exists but is not a bridge
    #[error("link {0:?} exists and is not a bridge")]
    BridgeConflict(String),

    /// external tool exited non-zero
    #[error("command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// external tool could not be spawned at all
    #[error("could not run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

/// Errors that occur while constructing or supervising a sandbox
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// i/o error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// container image error
    #[error("container image error: {0}")]
    Image(#[from] ImageError),

    /// network plumbing error
    #[error("network setup error: {0}")]
    Network(#[from] NetworkError),

    /// the kernel has no overlay filesystem support
    #[error("overlay filesystem not supported by this kernel")]
    OverlayUnsupported,

    /// overlay target is already a mount point
    #[error("overlay target is busy")]
    OverlayBusy,

    /// upper and work directories straddle filesystems
    #[error("overlay upper and work directories are not on the same filesystem")]
    OverlayFilesystemMismatch,

    /// any other overlay mount failure
    #[error("overlay mount failed: {0}")]
    OverlayMount(nix::Error),

    /// lower layer missing or empty before mount
    #[error("overlay lower layer missing or empty: {0:?}")]
    LowerLayerMissing(PathBuf),

    /// cgroup v2 unified hierarchy not present
    #[error("cgroup v2 hierarchy not available at {0:?}")]
    CgroupUnavailable(PathBuf),

    /// cgroup directory or limit file could not be written
    #[error("cgroup setup failed at {path:?}: {source}")]
    CgroupSetup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// clone(2) with the namespace flags set failed
    #[error("failed to clone init child with new namespaces: {0}")]
    CloneNamespaces(nix::Error),

    /// init contract variable missing from the child environment
    #[error("missing environment variable for container init: {0}")]
    MissingInitEnv(&'static str),

    /// chroot into the container rootfs failed
    #[error("chroot failed: {0}")]
    Chroot(nix::Error),

    /// chdir to the new root failed
    #[error("chdir failed: {0}")]
    Chdir(nix::Error),

    /// capability set could not be applied
    #[error("failed to apply capabilities: {0}")]
    CapabilityApply(#[from] caps::errors::CapsError),

    /// exec of the user command failed
    #[error("exec failed: {0}")]
    Exec(nix::Error),

    /// waiting for the sandbox child failed
    #[error("wait failed: {0}")]
    Wait(nix::Error),

    /// string contained an internal nul byte
    #[error("string contained internal nul byte")]
    NulString(#[from] std::ffi::NulError),
}
