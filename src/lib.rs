//! # ccrun
//!
//! **Minimal Linux Container Runtime**
//!
//! A single executable with two verbs: `pull` fetches an OCI/Docker image
//! from a registry and materialises its root filesystem on disk; `run`
//! launches a command inside Linux isolation primitives (namespaces, chroot,
//! cgroup-v2 limits).
//!
//! # Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                       ccrun pull                               │
//! │  ImageRef ─► RegistryClient                                    │
//! │              ├── bearer challenge / token / single retry       │
//! │              ├── manifest (or index ─► platform manifest)      │
//! │              ├── config blob (saved verbatim)                  │
//! │              └── layer blobs ─► layer::apply_layer             │
//! │                                 (stream ─► sha256 tee ─► tar)  │
//! ├────────────────────────────────────────────────────────────────┤
//! │                       ccrun run                                │
//! │  LaunchConfig ─► fast path (empty config: plain spawn)         │
//! │               └► clone(CLONE_NEW*) ─► exec self ─► sentinel    │
//! │                  hostname ─► chroot ─► workdir ─► private /    │
//! │                  ─► /proc ─► cgroup ─► user command            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Security Model
//!
//! - **Path traversal protection**: tar entry names are sanitised and the
//!   existing destination prefix is resolved against the canonical root
//!   before anything is written (see [`layer`]).
//! - **Digest verification**: every layer is hashed while it streams and the
//!   result is compared to the manifest's declared digest; a mismatch is
//!   fatal and the tree is left on disk for inspection.
//! - **Credential-preserving redirects**: blob redirects to object storage
//!   are followed manually so `Authorization` survives cross-host hops.
//! - **Rootless containers**: `--userns` maps in-namespace uid/gid 0 to the
//!   invoking user, with `setgroups` denied before the gid map is written.
//!
//! Both pipelines are protocol state machines with strict ordering
//! constraints: mounting `/proc` before privatising mounts leaks into the
//! host, and writing `gid_map` without denying `setgroups` is refused by the
//! kernel. The per-module docs spell out the orderings.

// =============================================================================
// Modules
// =============================================================================

pub mod cgroup;
pub mod constants;
pub mod error;
pub mod exec;
pub mod image;
pub mod launcher;
pub mod layer;
pub mod registry;
pub mod rootfs;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{Error, Result};
pub use image::{Digest, ImageRef};
pub use launcher::LaunchConfig;
pub use registry::RegistryClient;
