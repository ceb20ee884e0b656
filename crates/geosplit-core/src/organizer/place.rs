//! Placing one artifact file into a sample directory.
//!
//! Writes go to a hidden sibling (`.<name>.partial`) and are renamed over the
//! destination, so a destination is either absent, the previous version, or
//! the complete new file. A destination that already matches is left alone.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::Placement;

/// What happened to a destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placed {
    Written,
    Unchanged,
}

/// Canonical file name for an artifact: `<name>.<ext>` with the source's
/// extension lower-cased, or just `<name>` if the source has none.
pub fn canonical_file_name(artifact: &str, source: &Path) -> String {
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{artifact}.{}", ext.to_ascii_lowercase()),
        _ => artifact.to_owned(),
    }
}

pub fn place(source: &Path, dest: &Path, mode: Placement) -> io::Result<Placed> {
    if already_placed(source, dest, mode)? {
        debug!("{} up to date", dest.display());
        return Ok(Placed::Unchanged);
    }

    let tmp = partial_path(dest);
    // Leftover from an interrupted run.
    remove_if_present(&tmp)?;

    let staged = match mode {
        Placement::Copy => fs::copy(source, &tmp).map(|_| ()),
        Placement::Hardlink => fs::hard_link(source, &tmp),
        Placement::Symlink => symlink(&fs::canonicalize(source)?, &tmp),
    };
    if let Err(e) = staged.and_then(|_| fs::rename(&tmp, dest)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    debug!("{} -> {} ({mode:?})", source.display(), dest.display());
    Ok(Placed::Written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    dest.with_file_name(format!(".{name}.partial"))
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn already_placed(source: &Path, dest: &Path, mode: Placement) -> io::Result<bool> {
    let Ok(meta) = fs::symlink_metadata(dest) else {
        return Ok(false);
    };
    match mode {
        Placement::Symlink => {
            if !meta.file_type().is_symlink() {
                return Ok(false);
            }
            Ok(fs::read_link(dest)? == fs::canonicalize(source)?)
        }
        Placement::Copy | Placement::Hardlink => {
            if !meta.is_file() {
                return Ok(false);
            }
            same_contents(source, dest)
        }
    }
}

/// Byte-for-byte comparison, short-circuiting on length.
pub fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let mut ba = [0u8; 8192];
    let mut bb = [0u8; 8192];
    loop {
        let n = ra.read(&mut ba)?;
        if n == 0 {
            return Ok(true);
        }
        rb.read_exact(&mut bb[..n])?;
        if ba[..n] != bb[..n] {
            return Ok(false);
        }
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlink placement requires a unix platform"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_file_name("pre", Path::new("/a/b/PRE_2019.PNG")), "pre.png");
        assert_eq!(canonical_file_name("label", Path::new("x.tif")), "label.tif");
        assert_eq!(canonical_file_name("label", Path::new("noext")), "label");
    }

    #[test]
    fn copy_then_unchanged_then_rewritten() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.png");
        let dst = tmp.path().join("pre.png");
        fs::write(&src, b"pixels").unwrap();

        assert_eq!(place(&src, &dst, Placement::Copy).unwrap(), Placed::Written);
        assert_eq!(fs::read(&dst).unwrap(), b"pixels");
        assert_eq!(place(&src, &dst, Placement::Copy).unwrap(), Placed::Unchanged);

        fs::write(&src, b"pixelz").unwrap();
        assert_eq!(place(&src, &dst, Placement::Copy).unwrap(), Placed::Written);
        assert_eq!(fs::read(&dst).unwrap(), b"pixelz");
        assert!(!partial_path(&dst).exists());
    }

    #[test]
    fn hardlink_shares_contents() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("label.tif");
        let dst = tmp.path().join("out.tif");
        fs::write(&src, b"mask").unwrap();
        assert_eq!(place(&src, &dst, Placement::Hardlink).unwrap(), Placed::Written);
        assert!(same_contents(&src, &dst).unwrap());
        assert_eq!(place(&src, &dst, Placement::Hardlink).unwrap(), Placed::Unchanged);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_points_at_canonical_source() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("post.png");
        let dst = tmp.path().join("link.png");
        fs::write(&src, b"img").unwrap();
        assert_eq!(place(&src, &dst, Placement::Symlink).unwrap(), Placed::Written);
        assert_eq!(fs::read_link(&dst).unwrap(), fs::canonicalize(&src).unwrap());
        assert_eq!(place(&src, &dst, Placement::Symlink).unwrap(), Placed::Unchanged);
    }

    #[test]
    fn missing_source_leaves_no_partial() {
        let tmp = TempDir::new().unwrap();
        let dst = tmp.path().join("pre.png");
        assert!(place(&tmp.path().join("absent.png"), &dst, Placement::Copy).is_err());
        assert!(!dst.exists());
        assert!(!partial_path(&dst).exists());
    }

    #[test]
    fn different_lengths_differ() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, b"abc").unwrap();
        fs::write(&b, b"abcd").unwrap();
        assert!(!same_contents(&a, &b).unwrap());
    }
}
