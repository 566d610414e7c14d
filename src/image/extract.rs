//! Application of image layer archives onto a host directory tree

use crate::errors::ImageError;
use nix::{
    sys::stat::{self, Mode, SFlag},
    sys::time::{TimeVal, TimeValLike},
    unistd::{self, Gid, Uid},
};
use std::{
    fs::{self, OpenOptions},
    io::{self, Read},
    os::unix::fs::{symlink, DirBuilderExt, OpenOptionsExt, PermissionsExt},
    path::{Component, Path, PathBuf},
};
use tar::{Archive, EntryType};

/// AUFS-style whiteout marker carried by docker and OCI layers
const WHITEOUT_PREFIX: &str = ".wh.";

/// Whiteout marker hiding everything below its directory
const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// Apply one layer archive to `dest`, resolving whiteouts against whatever
/// earlier layers already put there.
///
/// Entries are materialised in archive order, except hardlinks whose target
/// has not appeared yet; those are deferred to the end of the pass so link
/// ordering inside the archive does not matter.
pub fn apply_layer<R: Read>(reader: R, dest: &Path) -> Result<(), ImageError> {
    let mut archive = Archive::new(reader);
    let mut deferred_links: Vec<(PathBuf, PathBuf)> = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel_path = entry.path()?.into_owned();
        let path = safe_join(dest, &rel_path)?;

        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            if name == OPAQUE_MARKER {
                if let Some(parent) = path.parent() {
                    clear_directory(parent)?;
                }
                continue;
            }
            if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
                if let Some(parent) = path.parent() {
                    remove_existing(&parent.join(hidden));
                }
                continue;
            }
        }

        let header = entry.header();
        let kind = header.entry_type();
        let mode = header.mode()?;
        let uid = header.uid()?;
        let gid = header.gid()?;
        let mtime = header.mtime()?;
        let device = (header.device_major()?, header.device_minor()?);

        match kind {
            EntryType::Directory => {
                // a later layer may turn a file into a directory
                if fs::symlink_metadata(&path)
                    .map(|meta| !meta.is_dir())
                    .unwrap_or(false)
                {
                    remove_existing(&path);
                }
                fs::create_dir_all(&path)?;
                fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
            }
            EntryType::Regular => {
                prepare_parent(&path)?;
                remove_existing(&path);
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .mode(mode)
                    .open(&path)?;
                io::copy(&mut entry, &mut file)?;
                // the open mode is clipped by the umask, the archived mode
                // must win
                fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| ImageError::MissingLinkName(rel_path.clone()))?
                    .into_owned();
                prepare_parent(&path)?;
                remove_existing(&path);
                // the archived target is taken verbatim, never rewritten;
                // dangling and absolute targets are legal inside a rootfs
                symlink(&target, &path)?;
            }
            EntryType::Link => {
                let target_rel = entry
                    .link_name()?
                    .ok_or_else(|| ImageError::MissingLinkName(rel_path.clone()))?
                    .into_owned();
                let target = safe_join(dest, &target_rel)?;
                prepare_parent(&path)?;
                remove_existing(&path);
                if target.exists() {
                    fs::hard_link(&target, &path)?;
                } else {
                    deferred_links.push((target, path));
                }
                continue;
            }
            EntryType::Char | EntryType::Block => {
                let sflag = if kind == EntryType::Block {
                    SFlag::S_IFBLK
                } else {
                    SFlag::S_IFCHR
                };
                let (major, minor) = (device.0.unwrap_or(0), device.1.unwrap_or(0));
                prepare_parent(&path)?;
                if let Err(err) = stat::mknod(
                    &path,
                    sflag,
                    Mode::from_bits_truncate(mode),
                    stat::makedev(major as u64, minor as u64),
                ) {
                    log::warn!("could not create device {:?}: {}", path, err);
                    continue;
                }
            }
            EntryType::Fifo => {
                prepare_parent(&path)?;
                if let Err(err) = unistd::mkfifo(&path, Mode::from_bits_truncate(mode)) {
                    log::warn!("could not create fifo {:?}: {}", path, err);
                    continue;
                }
            }
            EntryType::XHeader | EntryType::XGlobalHeader => continue,
            other => {
                log::warn!(
                    "skipping unsupported tar entry {:?} (type {:?})",
                    rel_path,
                    other
                );
                continue;
            }
        }

        restore_metadata(&path, kind, uid, gid, mtime);
    }

    for (target, link) in deferred_links {
        if !target.exists() {
            return Err(ImageError::HardlinkTarget { link, target });
        }
        fs::hard_link(&target, &link)?;
    }

    Ok(())
}

/// Join an archive-relative path under `dest`, refusing any traversal that
/// would escape it
fn safe_join(dest: &Path, rel: &Path) -> Result<PathBuf, ImageError> {
    let mut clean = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(ImageError::TarPathEscape(rel.to_path_buf()));
                }
            }
            // leading slashes are anchored to dest, like every tar tool does
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(dest.join(clean))
}

/// Tar ordering does not guarantee parents before children
fn prepare_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.exists() => fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(parent),
        _ => Ok(()),
    }
}

/// Remove whatever an earlier layer left at `path`, following nothing
fn remove_existing(path: &Path) {
    if let Ok(meta) = fs::symlink_metadata(path) {
        let removed = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        if let Err(err) = removed {
            log::warn!("could not remove {:?}: {}", path, err);
        }
    }
}

fn clear_directory(dir: &Path) -> Result<(), ImageError> {
    if dir.is_dir() {
        for child in fs::read_dir(dir)? {
            remove_existing(&child?.path());
        }
    }
    Ok(())
}

/// Restore timestamps and ownership the way the archive recorded them.
/// Both are best-effort: unprivileged hosts cannot chown, and that must not
/// fail the extraction.
fn restore_metadata(path: &Path, kind: EntryType, uid: u64, gid: u64, mtime: u64) {
    if kind != EntryType::Symlink {
        let time = TimeVal::seconds(mtime as i64);
        if let Err(err) = stat::utimes(path, &time, &time) {
            log::warn!("could not restore times on {:?}: {}", path, err);
        }
    }
    if let Err(err) = unistd::fchownat(
        None,
        path,
        Some(Uid::from_raw(uid as u32)),
        Some(Gid::from_raw(gid as u32)),
        unistd::FchownatFlags::NoFollowSymlink,
    ) {
        log::warn!("could not chown {:?}: {}", path, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_stays_inside() {
        let dest = Path::new("/x");
        assert_eq!(safe_join(dest, Path::new("a/b")).unwrap(), Path::new("/x/a/b"));
        assert_eq!(
            safe_join(dest, Path::new("./a/./b")).unwrap(),
            Path::new("/x/a/b")
        );
        assert_eq!(
            safe_join(dest, Path::new("a/../b")).unwrap(),
            Path::new("/x/b")
        );
    }

    #[test]
    fn safe_join_rejects_escapes() {
        let dest = Path::new("/x");
        assert!(matches!(
            safe_join(dest, Path::new("../evil")),
            Err(ImageError::TarPathEscape(_))
        ));
        assert!(matches!(
            safe_join(dest, Path::new("a/../../evil")),
            Err(ImageError::TarPathEscape(_))
        ));
    }

    #[test]
    fn safe_join_anchors_absolute_entries() {
        assert_eq!(
            safe_join(Path::new("/x"), Path::new("/bin/sh")).unwrap(),
            Path::new("/x/bin/sh")
        );
    }
}
