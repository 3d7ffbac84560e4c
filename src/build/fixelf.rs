// src/build/fixelf.rs

//! ELF normalizer: retarget the dynamic loader path
//!
//! Installed binaries still point at the standard glibc interpreter
//! locations; on the target system glibc lives under its own package
//! prefix. Every executable regular file under `dist` is probed with
//! patchelf and known interpreters are rewritten to their relocated
//! paths. RPATH/RUNPATH is deliberately left alone.

use std::path::Path;
use tracing::{info, warn};

use super::{argv, BuildEnv};
use crate::error::Result;

/// patchelf from the target package set
pub const PATCHELF: &str = "/pkg/main/dev-util.patchelf.core/bin/patchelf";

/// What to do with a reported interpreter
#[derive(Debug, PartialEq, Eq)]
enum Interp {
    /// Standard location, rewrite to the relocated path
    Rewrite(&'static str),
    /// Already points at the relocated path
    Relocated,
    /// Not one of ours; warn and leave alone
    Unknown,
}

fn classify_interpreter(interp: &str) -> Interp {
    match interp {
        "/lib64/ld-linux-x86-64.so.2" => {
            Interp::Rewrite("/pkg/main/sys-libs.glibc.libs.linux.amd64/lib64/ld-linux-x86-64.so.2")
        }
        "/pkg/main/sys-libs.glibc.libs.linux.amd64/lib64/ld-linux-x86-64.so.2" => Interp::Relocated,
        "/lib/ld-linux.so.2" => {
            Interp::Rewrite("/pkg/main/sys-libs.glibc.libs.linux.386/lib/ld-linux.so.2")
        }
        "/pkg/main/sys-libs.glibc.libs.linux.386/lib/ld-linux.so.2" => Interp::Relocated,
        "/lib/ld-linux-aarch64.so.1" => {
            Interp::Rewrite("/pkg/main/sys-libs.glibc.libs.linux.arm64/lib/ld-linux-aarch64.so.1")
        }
        "/pkg/main/sys-libs.glibc.libs.linux.arm64/lib/ld-linux-aarch64.so.1" => Interp::Relocated,
        _ => Interp::Unknown,
    }
}

impl BuildEnv {
    /// Walk `dist` and normalize every dynamic executable's interpreter.
    /// Missing patchelf is a warning, not an error.
    pub(crate) fn fix_elf(&self) -> Result<()> {
        match self.backend.stat(Path::new(PATCHELF)) {
            Ok(meta) if meta.mode & 0o111 != 0 => {}
            _ => {
                warn!("WARNING: patchelf not available at {}, skipping", PATCHELF);
                return Ok(());
            }
        }

        info!("Running fixelf...");

        let dist = self.dist.clone();
        self.backend.walk_dir(&dist, &mut |path, meta| {
            if !meta.is_file() || meta.mode & 0o111 == 0 {
                return Ok(());
            }
            let path_str = path.display().to_string();

            // non-zero exit means not a dynamic executable
            let out = match self.run_capture_silent(&argv([
                PATCHELF,
                "--print-interpreter",
                &path_str,
            ])) {
                Ok(out) => out,
                Err(_) => return Ok(()),
            };

            let interp = String::from_utf8_lossy(&out).trim().to_string();
            if interp.is_empty() {
                // static binary
                return Ok(());
            }

            match classify_interpreter(&interp) {
                Interp::Rewrite(target) => {
                    self.run(&argv([PATCHELF, "--set-interpreter", target, &path_str]))
                }
                Interp::Relocated => Ok(()),
                Interp::Unknown => {
                    warn!("Unknown interpreter: {}", interp);
                    Ok(())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_standard_interpreters() {
        assert_eq!(
            classify_interpreter("/lib64/ld-linux-x86-64.so.2"),
            Interp::Rewrite(
                "/pkg/main/sys-libs.glibc.libs.linux.amd64/lib64/ld-linux-x86-64.so.2"
            )
        );
        assert_eq!(
            classify_interpreter("/lib/ld-linux.so.2"),
            Interp::Rewrite("/pkg/main/sys-libs.glibc.libs.linux.386/lib/ld-linux.so.2")
        );
        assert_eq!(
            classify_interpreter("/lib/ld-linux-aarch64.so.1"),
            Interp::Rewrite(
                "/pkg/main/sys-libs.glibc.libs.linux.arm64/lib/ld-linux-aarch64.so.1"
            )
        );
    }

    #[test]
    fn test_relocated_interpreters_left_alone() {
        assert_eq!(
            classify_interpreter(
                "/pkg/main/sys-libs.glibc.libs.linux.amd64/lib64/ld-linux-x86-64.so.2"
            ),
            Interp::Relocated
        );
        assert_eq!(
            classify_interpreter("/lib/ld-musl-x86_64.so.1"),
            Interp::Unknown
        );
    }
}
