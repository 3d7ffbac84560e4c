// src/backend/mod.rs

//! Execution backends
//!
//! A backend is a build environment: a uniform set of file and process
//! operations that the pipeline drives without knowing whether they land on
//! the host filesystem or inside a disposable VM reached over SSH. The
//! pipeline holds exactly one `Box<dyn Backend>` per build; every file
//! touched and every child process spawned during a build goes through it.

mod local;
mod ssh;
mod vm;

pub use local::LocalBackend;
pub use ssh::SshBackend;

use clap::ValueEnum;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;

/// Target architecture for a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Arch {
    #[value(name = "386")]
    X86,
    Amd64,
    Arm64,
}

impl Arch {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Arch::X86 => "386",
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    /// GNU triplet used as `--host`/`--build` and CHOST
    pub const fn chost(&self) -> &'static str {
        match self {
            Arch::X86 => "i686-pc-linux-gnu",
            Arch::Amd64 => "x86_64-pc-linux-gnu",
            Arch::Arm64 => "aarch64-unknown-linux-gnu",
        }
    }

    pub const fn bits(&self) -> u32 {
        match self {
            Arch::X86 => 32,
            Arch::Amd64 => 64,
            Arch::Arm64 => 64,
        }
    }

    /// Multilib library directory suffix ("64" on amd64, empty elsewhere)
    pub const fn libsuffix(&self) -> &'static str {
        match self {
            Arch::Amd64 => "64",
            _ => "",
        }
    }

    /// Well-known host-side SSH port for this arch's build VM
    pub const fn ssh_port(&self) -> u16 {
        match self {
            Arch::X86 => 2232,
            Arch::Amd64 => 2264,
            Arch::Arm64 => 2265,
        }
    }

    /// Arch of the machine we are running on
    pub fn host() -> Option<Arch> {
        match std::env::consts::ARCH {
            "x86" => Some(Arch::X86),
            "x86_64" => Some(Arch::Amd64),
            "aarch64" => Some(Arch::Arm64),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// File type reported by [`Backend::stat`]/[`Backend::lstat`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// Minimal file metadata shared by both backends
#[derive(Debug, Clone, Copy)]
pub struct FileMeta {
    pub size: u64,
    /// Permission bits (no file type bits)
    pub mode: u32,
    pub kind: FileKind,
}

impl FileMeta {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Derive kind and permissions from raw st_mode bits
    pub fn from_mode(size: u64, raw_mode: u32) -> Self {
        let kind = match raw_mode & 0o170000 {
            0o040000 => FileKind::Dir,
            0o120000 => FileKind::Symlink,
            0o100000 => FileKind::File,
            _ => FileKind::Other,
        };
        Self {
            size,
            mode: raw_mode & 0o7777,
            kind,
        }
    }
}

/// One entry of [`Backend::read_dir`]
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub meta: FileMeta,
}

/// Uniform file and process operations over a build environment.
///
/// Paths are absolute within the backend's view. Process environment is a
/// full replacement, not additive. `put_file`/`get_file` bridge the host
/// and the backend; on a local backend they degrade to a hardlink or copy.
pub trait Backend {
    /// Writable root for build directories
    fn base(&self) -> Result<PathBuf>;

    fn is_local(&self) -> bool;
    fn is_root(&self) -> bool;

    /// Execute `argv` with CWD `dir` and environment `env` (K=V entries).
    /// `None` sinks inherit the driver's stdio. Non-zero exit is an error.
    fn run_env(
        &self,
        dir: &Path,
        argv: &[String],
        env: &[String],
        stdout: Option<&mut dyn Write>,
        stderr: Option<&mut dyn Write>,
    ) -> Result<()>;

    fn mkdir(&self, dir: &Path, mode: u32) -> Result<()>;
    fn mkdir_all(&self, dir: &Path, mode: u32) -> Result<()>;
    fn stat(&self, path: &Path) -> Result<FileMeta>;
    fn lstat(&self, path: &Path) -> Result<FileMeta>;
    fn readlink(&self, path: &Path) -> Result<PathBuf>;
    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()>;
    fn create(&self, path: &Path) -> Result<Box<dyn Write>>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn remove(&self, path: &Path) -> Result<()>;
    fn remove_all(&self, path: &Path) -> Result<()>;
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Depth-first walk; the visitor sees every path with its stat info
    fn walk_dir(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(&Path, &FileMeta) -> Result<()>,
    ) -> Result<()>;

    /// Find regular files whose basename matches any pattern, returned
    /// relative to `dir`. Patterns apply to basenames only.
    fn find_files(&self, dir: &Path, patterns: &[&str]) -> Vec<PathBuf>;

    /// Copy a host file into the backend
    fn put_file(&self, local: &Path, remote: &Path) -> Result<()>;

    /// Copy a backend file back to the host
    fn get_file(&self, remote: &Path, local: &Path) -> Result<()>;

    /// Release resources (terminate VM, close SSH channels)
    fn close(&self) -> Result<()>;
}

/// Acquire a backend for the requested arch.
///
/// Probes the arch's well-known SSH port first and adopts a running remote;
/// otherwise boots a fresh VM. If neither works the build proceeds on the
/// local host with a warning.
pub fn acquire(arch: Arch) -> Box<dyn Backend> {
    match SshBackend::connect("127.0.0.1", arch.ssh_port()) {
        Ok(backend) => return Box::new(backend),
        Err(err) => {
            tracing::debug!("no running VM on port {}: {}", arch.ssh_port(), err);
        }
    }

    match vm::boot(arch) {
        Ok(backend) => Box::new(backend),
        Err(err) => {
            warn!("failed to init build VM: {} (will build locally)", err);
            Box::new(LocalBackend::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_identity() {
        assert_eq!(Arch::X86.chost(), "i686-pc-linux-gnu");
        assert_eq!(Arch::X86.bits(), 32);
        assert_eq!(Arch::X86.libsuffix(), "");

        assert_eq!(Arch::Amd64.chost(), "x86_64-pc-linux-gnu");
        assert_eq!(Arch::Amd64.bits(), 64);
        assert_eq!(Arch::Amd64.libsuffix(), "64");

        assert_eq!(Arch::Arm64.chost(), "aarch64-unknown-linux-gnu");
        assert_eq!(Arch::Arm64.bits(), 64);
        assert_eq!(Arch::Arm64.libsuffix(), "");
    }

    #[test]
    fn test_file_meta_from_mode() {
        let meta = FileMeta::from_mode(10, 0o100755);
        assert!(meta.is_file());
        assert_eq!(meta.mode, 0o755);

        let meta = FileMeta::from_mode(0, 0o040755);
        assert!(meta.is_dir());

        let meta = FileMeta::from_mode(0, 0o120777);
        assert!(meta.is_symlink());
    }
}
