// src/engine/mod.rs

//! Engine adapters: Autoconf, CMake, Meson, and a hooks-only pass-through
//!
//! Every adapter runs the recipe's six hook lists around the three
//! canonical phases (configure, compile, install); each hook line is a
//! `bash -c` at the build directory and any non-zero exit aborts. The
//! build directory is `temp` unless the recipe opts into building inside
//! the source tree.

pub(crate) mod autoconf;
pub(crate) mod cmake;
pub(crate) mod meson;
pub(crate) mod none;

use std::path::PathBuf;

use crate::build::BuildEnv;
use crate::error::Result;

/// Out-of-tree by default; `build_in_tree` builds where configure lives
pub(crate) fn build_dir(e: &BuildEnv) -> Result<PathBuf> {
    if e.inst.has_option("build_in_tree") {
        e.src()
    } else {
        Ok(e.temp.clone())
    }
}

/// `make -j` parallelism
pub(crate) fn ncpu() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}
