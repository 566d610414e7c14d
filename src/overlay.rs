//! Overlay rootfs assembly: read-only lower, writable upper, scratch work dir

use crate::errors::RuntimeError;
use nix::{
    errno::Errno,
    mount::{mount, umount2, MntFlags, MsFlags},
};
use std::{fs, path::PathBuf};

/// The three overlay directories plus the mount target
///
/// `lower` must already be populated. `upper`, `work` and `target` are
/// created fresh by [OverlayFs::mount]; upper and work have to live on the
/// same filesystem, which is guaranteed here by parenting all three next to
/// each other.
pub struct OverlayFs {
    lower: PathBuf,
    upper: PathBuf,
    work: PathBuf,
    target: PathBuf,
}

impl OverlayFs {
    pub fn new(lower: PathBuf, upper: PathBuf, work: PathBuf, target: PathBuf) -> Self {
        OverlayFs {
            lower,
            upper,
            work,
            target,
        }
    }

    /// Mount the overlay, presenting `lower` overlaid by `upper` at `target`
    pub fn mount(&self) -> Result<OverlayGuard, RuntimeError> {
        if fs::read_dir(&self.lower)
            .map(|mut dir| dir.next().is_none())
            .unwrap_or(true)
        {
            return Err(RuntimeError::LowerLayerMissing(self.lower.clone()));
        }

        let _ = fs::remove_dir_all(&self.target);
        fs::create_dir_all(&self.upper)?;
        fs::create_dir_all(&self.work)?;
        fs::create_dir_all(&self.target)?;

        let options = format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower.display(),
            self.upper.display(),
            self.work.display()
        );
        log::debug!("mount -t overlay overlay -o {} {:?}", options, self.target);
        mount(
            Some("overlay"),
            &self.target,
            Some("overlay"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .map_err(|errno| match errno {
            Errno::ENODEV => RuntimeError::OverlayUnsupported,
            Errno::EBUSY => RuntimeError::OverlayBusy,
            Errno::EXDEV => RuntimeError::OverlayFilesystemMismatch,
            other => RuntimeError::OverlayMount(other),
        })?;

        Ok(OverlayGuard {
            target: self.target.clone(),
        })
    }
}

/// Active overlay mount, lazily detached when dropped
///
/// Teardown is best-effort on every supervisor exit path; a failed unmount
/// is logged and swallowed.
pub struct OverlayGuard {
    target: PathBuf,
}

impl Drop for OverlayGuard {
    fn drop(&mut self) {
        if let Err(err) = umount2(&self.target, MntFlags::MNT_DETACH) {
            log::debug!("unmounting {:?} failed: {}", self.target, err);
        }
    }
}
