//! Streamed layer application.
//!
//! A layer blob is consumed exactly once: the byte stream is teed through a
//! SHA-256 hasher while the other fork is decompressed (gzip is sniffed from
//! the magic bytes, so uncompressed tars also work) and iterated as a tar
//! archive, with each entry applied to the destination root. The computed
//! digest is compared to the declared one only after the final byte has been
//! hashed; the tree is not rolled back on mismatch because layers may exceed
//! available memory.
//!
//! ## Security Model
//!
//! Layer extraction is a critical security boundary. Malicious images can
//! attempt to escape containment:
//!
//! - Entry names are lexically sanitised: leading `/` stripped, `..`
//!   resolved, escape above the root is fatal.
//! - The existing on-disk prefix of every destination is resolved against
//!   the canonical root, so a symlink planted by an earlier entry cannot
//!   redirect a later write outside the tree.
//! - Hardlink targets get the same treatment as entry names.
//!
//! ## Whiteouts (OCI/AUFS convention)
//!
//! - `.wh.FOO` deletes `FOO` in the containing directory (recursively).
//! - `.wh..wh..opq` purges the existing contents of the containing
//!   directory so the current layer defines it fully.
//!
//! Whiteout entries themselves are never materialised.

use crate::constants::{GZIP_MAGIC, OPAQUE_WHITEOUT, WHITEOUT_PREFIX};
use crate::error::{Error, Result};
use crate::image::Digest;
use flate2::read::GzDecoder;
use sha2::{Digest as _, Sha256};
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::debug;

// =============================================================================
// Digest Tee
// =============================================================================

/// Reader adapter hashing every byte that passes through it.
pub struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
    count: u64,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        DigestReader {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    /// Total bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    /// Finalises the hash over everything read.
    pub fn finalize(self) -> Digest {
        Digest::from_hex(hex::encode(self.hasher.finalize()))
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

// =============================================================================
// Layer Application
// =============================================================================

/// Applies one layer blob to `root`, verifying the declared digest.
///
/// The blob is streamed: it is never buffered whole. Returns the number of
/// compressed bytes consumed. Digest verification necessarily trails
/// application; a mismatch means the tree must be treated as corrupt.
pub fn apply_layer<R: Read>(blob: R, root: &Path, expected: &Digest) -> Result<u64> {
    let mut tee = DigestReader::new(blob);

    {
        let mut sniff = BufReader::new(&mut tee);
        let head = sniff.fill_buf()?;
        if head.starts_with(&GZIP_MAGIC) {
            apply_tar(GzDecoder::new(sniff), root, expected)?;
        } else {
            apply_tar(sniff, root, expected)?;
        }
    }

    // The decompressor stops at the end of the tar; drain the trailer so the
    // hash covers the complete blob.
    io::copy(&mut tee, &mut io::sink())?;

    let bytes = tee.bytes_read();
    let computed = tee.finalize();
    if computed != *expected {
        return Err(Error::DigestMismatch {
            expected: expected.to_string(),
            computed: computed.to_string(),
        });
    }

    Ok(bytes)
}

/// Iterates a tar stream and applies each entry under `root`.
fn apply_tar<R: Read>(reader: R, root: &Path, digest: &Digest) -> Result<()> {
    let tar_err = |e: io::Error| Error::LayerApplyFailed {
        digest: digest.to_string(),
        reason: e.to_string(),
    };

    let canonical_root = root.canonicalize()?;

    let mut archive = Archive::new(reader);
    for entry in archive.entries().map_err(tar_err)? {
        let mut entry = entry.map_err(tar_err)?;
        let raw_path = entry.path().map_err(tar_err)?.into_owned();

        let rel = sanitize_entry_path(&raw_path)?;
        if rel.as_os_str().is_empty() {
            // The archive root itself ("./"); nothing to create.
            continue;
        }
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent_rel = rel.parent().unwrap_or(Path::new("")).to_path_buf();

        // Whiteouts are deletions, consumed before anything is materialised
        // at that path.
        if name == OPAQUE_WHITEOUT {
            clear_directory(&secured_join(root, &canonical_root, &parent_rel)?)?;
            continue;
        }
        if let Some(target) = name.strip_prefix(WHITEOUT_PREFIX) {
            let victim = secured_join(root, &canonical_root, &parent_rel.join(target))?;
            remove_existing(&victim)?;
            continue;
        }

        let dest = secured_join(root, &canonical_root, &rel)?;
        let mode = entry.header().mode().map_err(tar_err)?;
        let entry_type = entry.header().entry_type();

        match entry_type {
            t if t.is_dir() => {
                fs::create_dir_all(&dest)?;
                fs::set_permissions(&dest, fs::Permissions::from_mode(mode & 0o7777))?;
            }
            // Old-style (pre-POSIX) regular entries also land here.
            t if t.is_file() => {
                ensure_parent(&dest)?;
                if dest.is_dir() {
                    fs::remove_dir_all(&dest)?;
                }
                let mut file = fs::File::create(&dest)?;
                io::copy(&mut entry, &mut file).map_err(tar_err)?;
                fs::set_permissions(&dest, fs::Permissions::from_mode(mode & 0o7777))?;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .map_err(tar_err)?
                    .ok_or_else(|| Error::LayerApplyFailed {
                        digest: digest.to_string(),
                        reason: format!("symlink entry {} has no target", rel.display()),
                    })?
                    .into_owned();
                ensure_parent(&dest)?;
                remove_existing(&dest)?;
                // The linkname is stored verbatim; dangling and absolute
                // targets are legal inside a rootfs.
                std::os::unix::fs::symlink(&target, &dest)?;
            }
            EntryType::Link => {
                let target = entry
                    .link_name()
                    .map_err(tar_err)?
                    .ok_or_else(|| Error::LayerApplyFailed {
                        digest: digest.to_string(),
                        reason: format!("hardlink entry {} has no target", rel.display()),
                    })?
                    .into_owned();
                let target_rel = sanitize_entry_path(&target)?;
                let source = secured_join(root, &canonical_root, &target_rel)?;
                ensure_parent(&dest)?;
                remove_existing(&dest)?;
                fs::hard_link(&source, &dest)?;
            }
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                debug!("Skipping device node {}", rel.display());
            }
            other => {
                debug!("Skipping unsupported entry {} ({:?})", rel.display(), other);
            }
        }
    }

    Ok(())
}

// =============================================================================
// Path Hardening
// =============================================================================

/// Lexically normalises a tar entry name relative to the extraction root.
///
/// Leading `/` and `.` components are dropped, `..` pops; popping past the
/// root is an escape attempt and fatal.
pub fn sanitize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) => {
                return Err(Error::PathTraversal {
                    path: path.display().to_string(),
                });
            }
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(Error::PathTraversal {
                        path: path.display().to_string(),
                    });
                }
            }
            Component::Normal(part) => clean.push(part),
        }
    }
    Ok(clean)
}

/// Joins a sanitised relative path onto the root, refusing destinations whose
/// existing ancestors resolve outside the root (symlink traversal).
fn secured_join(root: &Path, canonical_root: &Path, rel: &Path) -> Result<PathBuf> {
    // An empty rel addresses the root itself (a top-level opaque whiteout);
    // joining and taking .parent() would probe outside the root.
    if rel.as_os_str().is_empty() {
        return Ok(canonical_root.to_path_buf());
    }

    let full = root.join(rel);

    if let Some(parent) = full.parent() {
        let mut probe = parent.to_path_buf();
        while !probe.exists() {
            if !probe.pop() {
                break;
            }
        }
        let resolved = probe.canonicalize()?;
        if !resolved.starts_with(canonical_root) {
            return Err(Error::PathTraversal {
                path: rel.display().to_string(),
            });
        }
    }

    Ok(full)
}

// =============================================================================
// Filesystem Helpers
// =============================================================================

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Removes whatever currently occupies `path`, if anything. Files and
/// symlinks are unlinked; directories are removed recursively.
fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Purges the contents of `dir` (opaque whiteout). The directory itself is
/// kept; a missing directory is a no-op.
fn clear_directory(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        remove_existing(&entry.path())?;
    }
    Ok(())
}
