// src/lib.rs

//! apkg-build: source-to-binary package builder
//!
//! Given a recipe identifier (`category/name`), apkg-build fetches the
//! upstream source, applies patches, invokes the right build toolchain
//! (Autoconf, CMake, Meson, or a hooks-only pass-through), reorganizes
//! the installed tree into the canonical multi-output layout (core /
//! libs / dev / doc / fonts / mod), normalizes dynamic binaries, and
//! packs each output as an independent squashfs image.
//!
//! # Architecture
//!
//! - Recipe-driven: declarative `build.yaml` + hash pins in
//!   `metadata.yaml`, with a converter for legacy shell recipes
//! - One pipeline, two environments: every file and process operation is
//!   routed through a [`backend::Backend`], so the same build runs on
//!   the host or inside a disposable VM reached over SSH
//! - Fail-fast: the first error aborts the build; recovery is local and
//!   explicit (mirror fallback, optional extraction, missing patchelf)

pub mod backend;
pub mod build;
mod engine;
mod error;
pub mod hash;
pub mod recipe;
pub mod repo;
pub mod vars;

pub use backend::{Arch, Backend, LocalBackend, SshBackend};
pub use build::BuildEnv;
pub use error::{Error, Result};
pub use recipe::{ArtifactRecord, Engine, Instruction, Metadata, Recipe, Versions};
pub use repo::Package;
pub use vars::VarEnv;
