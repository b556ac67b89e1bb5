//! Constants for the container runtime.
//!
//! All endpoints, media types, tuning values, and limits are defined here
//! to ensure consistency and prevent magic numbers throughout the codebase.

use std::time::Duration;

// =============================================================================
// Registry Defaults
// =============================================================================

/// Registry host used when an image reference does not name one.
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Tag used when an image reference does not carry one.
pub const DEFAULT_TAG: &str = "latest";

/// Namespace prefixed to single-segment repository names ("alpine" pulls
/// "library/alpine").
pub const OFFICIAL_REPOSITORY_NAMESPACE: &str = "library";

// =============================================================================
// Reference Validation
// =============================================================================

/// Maximum image reference length (bytes).
/// Prevents injection attacks via overly long image names.
pub const MAX_IMAGE_REF_LEN: usize = 512;

/// Valid characters for image references.
pub const IMAGE_REF_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_./:@";

// =============================================================================
// Media Types
// =============================================================================

/// Docker v2 image manifest media type.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker v2 manifest list media type.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// OCI image manifest media type.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index media type.
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// `Accept` header for the tag endpoint: both single-platform manifests and
/// multi-arch indexes, Docker and OCI flavours.
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// `Accept` header when re-requesting a platform manifest chosen from an index.
pub const MANIFEST_IMAGE_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.manifest.v1+json";

// =============================================================================
// Transport Tuning
// =============================================================================

/// Timeout for a single registry request, body included.
pub const PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum redirect hops followed per request. Registries commonly bounce
/// blob requests to object storage; anything deeper is a loop.
pub const MAX_REDIRECTS: usize = 10;

/// Truncation bound for response bodies quoted in error reports.
pub const MAX_ERROR_BODY: usize = 1024;

// =============================================================================
// Platform Selection
// =============================================================================

/// Platform preference order for resolving a manifest index, as
/// `(os, architecture)` pairs. First match wins.
pub const PLATFORM_PREFERENCE: [(&str, &str); 2] = [("linux", "arm64"), ("linux", "amd64")];

// =============================================================================
// Output Layout
// =============================================================================

/// Default output directory for `pull`.
pub const DEFAULT_OUT_DIR: &str = "images";

/// File name of the verbatim image-config blob under the destination.
pub const CONFIG_BLOB_FILE: &str = "config.json";

/// Directory name of the materialised layer tree under the destination.
pub const ROOTFS_DIR: &str = "rootfs";

// =============================================================================
// Layer Format
// =============================================================================

/// Basename prefix marking a whiteout (deletion of a lower-layer file).
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Basename marking an opaque directory (lower-layer contents purged).
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Leading bytes of a gzip stream, used to sniff layer compression.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// =============================================================================
// Cgroup v2
// =============================================================================

/// Mount point of the unified cgroup hierarchy.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Per-container group name prefix; the suffix is the joining PID.
pub const CGROUP_NAME_PREFIX: &str = "ccrun-";

/// `cpu.max` period in microseconds.
pub const CPU_PERIOD_USEC: u64 = 100_000;

/// Smallest quota the kernel accepts for `cpu.max`, microseconds.
pub const MIN_CPU_QUOTA_USEC: u64 = 1_000;

// =============================================================================
// Self Re-Exec
// =============================================================================

/// Sentinel argv[1] routing a self re-exec into the namespaced child phase.
pub const CHILD_SENTINEL: &str = "__ccrun_child__";

/// Stack size handed to `clone(2)` for the child phase.
pub const CHILD_STACK_SIZE: usize = 1024 * 1024;
