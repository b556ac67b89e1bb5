//! Tests for streamed layer application.
//!
//! Builds real tar (and gzip) fixtures in memory and applies them through
//! the public layer pipeline, validating path safety, whiteout semantics,
//! ordering, and digest verification.

use ccrun::Error;
use ccrun::image::Digest;
use ccrun::layer::apply_layer;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;

// =============================================================================
// Fixture Helpers
// =============================================================================

struct LayerBuilder {
    inner: Builder<Vec<u8>>,
}

/// Writes `path` into the header's name field without the path-traversal
/// validation `Header::set_path` performs.
fn set_raw_path(header: &mut Header, path: &str) {
    let bytes = path.as_bytes();
    let name = &mut header.as_old_mut().name;
    assert!(bytes.len() < name.len(), "test path too long for raw write");
    name[..bytes.len()].copy_from_slice(bytes);
}

impl LayerBuilder {
    fn new() -> Self {
        LayerBuilder {
            inner: Builder::new(Vec::new()),
        }
    }

    fn dir(mut self, path: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        self.inner.append_data(&mut header, path, &[][..]).unwrap();
        self
    }

    fn file(self, path: &str, content: &str) -> Self {
        self.file_with_mode(path, content, 0o644)
    }

    fn file_with_mode(mut self, path: &str, content: &str, mode: u32) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(mode);
        header.set_size(content.len() as u64);
        // `Builder::append_data` validates the path and rejects `..`
        // components; fixtures here intentionally construct archives with
        // traversal paths to exercise `apply_layer`'s own rejection of them,
        // so the raw name bytes are written directly, bypassing that
        // validation.
        set_raw_path(&mut header, path);
        header.set_cksum();
        self.inner.append(&header, content.as_bytes()).unwrap();
        self
    }

    fn symlink(mut self, path: &str, target: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_mode(0o777);
        header.set_size(0);
        self.inner.append_link(&mut header, path, target).unwrap();
        self
    }

    fn hardlink(mut self, path: &str, target: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Link);
        header.set_mode(0o644);
        header.set_size(0);
        self.inner.append_link(&mut header, path, target).unwrap();
        self
    }

    fn char_device(mut self, path: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Char);
        header.set_mode(0o666);
        header.set_size(0);
        header.set_device_major(1).unwrap();
        header.set_device_minor(3).unwrap();
        self.inner.append_data(&mut header, path, &[][..]).unwrap();
        self
    }

    fn build(self) -> Vec<u8> {
        self.inner.into_inner().unwrap()
    }

    fn build_gzip(self) -> Vec<u8> {
        let tar = self.build();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        encoder.finish().unwrap()
    }
}

/// Applies a blob with its true digest; the layer must verify.
fn apply(blob: &[u8], root: &Path) {
    let digest = Digest::from_content(blob);
    let consumed = apply_layer(&blob[..], root, &digest).unwrap();
    assert_eq!(consumed, blob.len() as u64);
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

// =============================================================================
// Basic Extraction
// =============================================================================

#[test]
fn extracts_directories_files_and_symlinks() {
    let root = TempDir::new().unwrap();
    let blob = LayerBuilder::new()
        .dir("etc")
        .file("etc/hostname", "box\n")
        .dir("bin")
        .file_with_mode("bin/sh", "#!/bin/true\n", 0o755)
        .symlink("bin/ash", "sh")
        .build();

    apply(&blob, root.path());

    assert_eq!(read(root.path(), "etc/hostname"), "box\n");
    let mode = fs::metadata(root.path().join("bin/sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);

    let link = fs::read_link(root.path().join("bin/ash")).unwrap();
    assert_eq!(link, Path::new("sh"));
}

#[test]
fn accepts_gzip_compressed_layers() {
    let root = TempDir::new().unwrap();
    let blob = LayerBuilder::new().file("hello.txt", "hi\n").build_gzip();

    apply(&blob, root.path());
    assert_eq!(read(root.path(), "hello.txt"), "hi\n");
}

#[test]
fn creates_missing_parent_directories() {
    let root = TempDir::new().unwrap();
    let blob = LayerBuilder::new()
        .file("deeply/nested/path/file", "x")
        .build();

    apply(&blob, root.path());
    assert_eq!(read(root.path(), "deeply/nested/path/file"), "x");
}

#[test]
fn hardlinks_share_content() {
    let root = TempDir::new().unwrap();
    let blob = LayerBuilder::new()
        .file("bin/busybox", "binary")
        .hardlink("bin/ls", "bin/busybox")
        .build();

    apply(&blob, root.path());
    assert_eq!(read(root.path(), "bin/ls"), "binary");
}

#[test]
fn device_nodes_are_skipped_silently() {
    let root = TempDir::new().unwrap();
    let blob = LayerBuilder::new()
        .dir("dev")
        .char_device("dev/null")
        .file("dev/after", "still applied")
        .build();

    apply(&blob, root.path());
    assert!(!root.path().join("dev/null").exists());
    assert_eq!(read(root.path(), "dev/after"), "still applied");
}

// =============================================================================
// Layer Stacking
// =============================================================================

#[test]
fn later_layers_overwrite_earlier_ones() {
    let root = TempDir::new().unwrap();
    let lower = LayerBuilder::new().file("etc/motd", "old").build();
    let upper = LayerBuilder::new().file("etc/motd", "new").build();

    apply(&lower, root.path());
    apply(&upper, root.path());

    assert_eq!(read(root.path(), "etc/motd"), "new");
}

#[test]
fn upper_layer_can_replace_file_with_symlink() {
    let root = TempDir::new().unwrap();
    let lower = LayerBuilder::new().file("sbin/init", "real init").build();
    let upper = LayerBuilder::new()
        .file("bin/busybox", "bb")
        .symlink("sbin/init", "/bin/busybox")
        .build();

    apply(&lower, root.path());
    apply(&upper, root.path());

    let link = fs::read_link(root.path().join("sbin/init")).unwrap();
    assert_eq!(link, Path::new("/bin/busybox"));
}

// =============================================================================
// Whiteouts
// =============================================================================

#[test]
fn whiteout_removes_lower_layer_file() {
    let root = TempDir::new().unwrap();
    let lower = LayerBuilder::new()
        .file("etc/secret", "gone soon")
        .file("etc/keep", "stays")
        .build();
    let upper = LayerBuilder::new().file("etc/.wh.secret", "").build();

    apply(&lower, root.path());
    apply(&upper, root.path());

    assert!(!root.path().join("etc/secret").exists());
    assert_eq!(read(root.path(), "etc/keep"), "stays");
    // The whiteout marker itself is never materialised.
    assert!(!root.path().join("etc/.wh.secret").exists());
}

#[test]
fn whiteout_removes_directories_recursively() {
    let root = TempDir::new().unwrap();
    let lower = LayerBuilder::new()
        .dir("var/cache")
        .file("var/cache/a", "1")
        .file("var/cache/b", "2")
        .build();
    let upper = LayerBuilder::new().file("var/.wh.cache", "").build();

    apply(&lower, root.path());
    apply(&upper, root.path());

    assert!(!root.path().join("var/cache").exists());
}

#[test]
fn whiteout_of_absent_path_is_harmless() {
    let root = TempDir::new().unwrap();
    let blob = LayerBuilder::new().file("etc/.wh.never-existed", "").build();

    apply(&blob, root.path());
    assert!(!root.path().join("etc/never-existed").exists());
}

#[test]
fn opaque_whiteout_purges_lower_directory_contents() {
    let root = TempDir::new().unwrap();
    let lower = LayerBuilder::new()
        .dir("opt/app")
        .file("opt/app/old-a", "1")
        .file("opt/app/old-b", "2")
        .build();
    let upper = LayerBuilder::new()
        .file("opt/app/.wh..wh..opq", "")
        .file("opt/app/fresh", "3")
        .build();

    apply(&lower, root.path());
    apply(&upper, root.path());

    // Only entries introduced by the same layer remain.
    assert!(!root.path().join("opt/app/old-a").exists());
    assert!(!root.path().join("opt/app/old-b").exists());
    assert_eq!(read(root.path(), "opt/app/fresh"), "3");
}

#[test]
fn root_level_opaque_whiteout_purges_the_rootfs_root() {
    let root = TempDir::new().unwrap();
    let lower = LayerBuilder::new()
        .file("stale-file", "1")
        .dir("stale-dir")
        .file("stale-dir/inner", "2")
        .build();
    let upper = LayerBuilder::new()
        .file(".wh..wh..opq", "")
        .file("fresh", "3")
        .build();

    apply(&lower, root.path());
    apply(&upper, root.path());

    assert!(!root.path().join("stale-file").exists());
    assert!(!root.path().join("stale-dir").exists());
    assert_eq!(read(root.path(), "fresh"), "3");
}

// =============================================================================
// Path Safety
// =============================================================================

#[test]
fn parent_traversal_is_fatal() {
    let outer = TempDir::new().unwrap();
    let root = outer.path().join("rootfs");
    fs::create_dir(&root).unwrap();

    let blob = LayerBuilder::new().file("a/../../evil", "nope").build();
    let digest = Digest::from_content(&blob);

    let err = apply_layer(&blob[..], &root, &digest).unwrap_err();
    assert!(matches!(err, Error::PathTraversal { .. }));
    assert!(!outer.path().join("evil").exists());
}

#[test]
fn symlinked_parent_cannot_redirect_writes_outside_root() {
    let outer = TempDir::new().unwrap();
    let root = outer.path().join("rootfs");
    fs::create_dir(&root).unwrap();
    let elsewhere = outer.path().join("elsewhere");
    fs::create_dir(&elsewhere).unwrap();

    // First layer plants a symlink pointing outside the root; the second
    // tries to write through it.
    let lower = LayerBuilder::new()
        .symlink("escape", elsewhere.to_str().unwrap())
        .build();
    apply(&lower, &root);

    let upper = LayerBuilder::new().file("escape/pwned", "nope").build();
    let digest = Digest::from_content(&upper);
    let err = apply_layer(&upper[..], &root, &digest).unwrap_err();

    assert!(matches!(err, Error::PathTraversal { .. }));
    assert!(!elsewhere.join("pwned").exists());
}

// =============================================================================
// Digest Verification
// =============================================================================

#[test]
fn digest_mismatch_is_fatal() {
    let root = TempDir::new().unwrap();
    let blob = LayerBuilder::new().file("etc/hosts", "localhost\n").build();
    let wrong = Digest::from_content(b"something else entirely");

    let err = apply_layer(&blob[..], root.path(), &wrong).unwrap_err();
    assert!(matches!(err, Error::DigestMismatch { .. }));
}

#[test]
fn corrupted_byte_changes_the_computed_digest() {
    let root = TempDir::new().unwrap();
    let blob = LayerBuilder::new().file("bin/tool", "payload").build_gzip();
    let digest = Digest::from_content(&blob);

    let mut corrupted = blob.clone();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xff;

    // Verification trails application, so only the error matters here; the
    // tree is deliberately not rolled back.
    let err = apply_layer(&corrupted[..], root.path(), &digest).unwrap_err();
    match err {
        Error::DigestMismatch { expected, .. } => assert_eq!(expected, digest.to_string()),
        Error::LayerApplyFailed { .. } => {} // gzip CRC may trip first
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn verification_covers_the_whole_blob_including_trailer() {
    let root = TempDir::new().unwrap();
    // Trailing garbage after the gzip stream must still be hashed.
    let mut blob = LayerBuilder::new().file("f", "x").build_gzip();
    blob.extend_from_slice(b"trailing-noise");
    let digest = Digest::from_content(&blob);

    let consumed = apply_layer(&blob[..], root.path(), &digest).unwrap();
    assert_eq!(consumed, blob.len() as u64);
    assert_eq!(read(root.path(), "f"), "x");
}
