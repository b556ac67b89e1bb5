//! Error types for the container runtime.

use std::path::PathBuf;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to parse an image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// Malformed command line (reported before any side-effect; exit 2).
    #[error("{0}")]
    Usage(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Network I/O failure talking to the registry.
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// Non-2xx response where one was required.
    #[error("unexpected status {status} from {url}: {body:?}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// Response body did not parse as the expected wire format.
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    /// Token endpoint refused the challenge or granted nothing usable.
    #[error("token negotiation failed: {reason}")]
    TokenRejected { reason: String },

    // =========================================================================
    // Integrity Errors
    // =========================================================================
    /// Invalid content digest string.
    #[error("invalid digest '{digest}': {reason}")]
    InvalidDigest { digest: String, reason: String },

    /// Streamed layer bytes did not hash to the declared digest.
    /// The materialised tree is left on disk for inspection.
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    /// Manifest index carried no manifest for a supported platform.
    #[error("no suitable platform in manifest index (available: {available})")]
    NoSuitablePlatform { available: String },

    // =========================================================================
    // Layer Application Errors
    // =========================================================================
    /// Tar entry would resolve outside the extraction root.
    #[error("path escapes extraction root: {path}")]
    PathTraversal { path: String },

    /// Tar parsing or filesystem I/O failure while applying a layer.
    #[error("failed to apply layer {digest}: {reason}")]
    LayerApplyFailed { digest: String, reason: String },

    // =========================================================================
    // Kernel Errors
    // =========================================================================
    /// A namespace/mount/chroot syscall was refused.
    #[error("{syscall}: {source}")]
    Kernel {
        syscall: &'static str,
        #[source]
        source: nix::Error,
    },

    /// Cgroup hierarchy setup failure.
    #[error("cgroup setup at {path}: {reason}")]
    CgroupSetup { path: PathBuf, reason: String },

    // =========================================================================
    // Launch Errors
    // =========================================================================
    /// The user command could not be started (maps to exit 1).
    #[error("failed to start '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wraps a refused syscall with its name for operator-facing context.
    pub(crate) fn kernel(syscall: &'static str, source: nix::Error) -> Self {
        Error::Kernel { syscall, source }
    }
}
