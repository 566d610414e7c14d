//! Container images: reference parsing, registry download, rootfs export

pub mod extract;
pub mod manifest;
mod name;
mod registry;

pub use name::ImageName;
pub use registry::{LayerStream, RegistryClient};

use crate::errors::ImageError;
use flate2::read::GzDecoder;
use std::{fs, path::Path};

/// Materialise the flattened rootfs of `image` at `dest`
///
/// Any previous tree at `dest` is removed first. Layers are applied in
/// manifest order, so later layers overwrite and white-out earlier ones; the
/// result is the merged tree a container would see as its lower layer.
///
/// On error the partially extracted tree is left in place for the caller to
/// clean up.
pub fn export_rootfs(image: &ImageName, dest: &Path) -> Result<(), ImageError> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let mut client = RegistryClient::new()?;
    let manifest = client.pull_manifest(image)?;
    log::info!("{}: applying {} layers", image, manifest.layers.len());

    for link in &manifest.layers {
        log::debug!("layer {}, {} bytes compressed", link.digest, link.size);
        let blob = client.open_layer(image, link)?;
        let mut layer = GzDecoder::new(blob);
        extract::apply_layer(&mut layer, dest)?;
        layer.into_inner().verify()?;
    }
    Ok(())
}
