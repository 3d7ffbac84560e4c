// src/build/patch.rs

//! Patch applier with strip-level fallback
//!
//! Patches resolve relative to the recipe's `files/` directory on the
//! host. For remote builds the file is first copied into the backend's
//! `/tmp`. Strip levels are tried in the order 1, 0, 2; the first clean
//! apply wins and exhausting all levels aborts the build.

use std::fs;
use std::path::PathBuf;
use tracing::info;

use super::{argv, BuildEnv};
use crate::error::Result;
use crate::repo;

const STRIP_LEVELS: [u32; 3] = [1, 0, 2];

impl BuildEnv {
    pub(crate) fn apply_patches(&mut self) -> Result<()> {
        for patch in self.inst.patches.clone() {
            let local = repo::repo_path()
                .join(&self.pkg.name)
                .join("files")
                .join(&patch);
            fs::metadata(&local)?;

            let target = if self.backend.is_local() {
                local.clone()
            } else {
                let name = local
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_default();
                let remote = PathBuf::from("/tmp").join(name);
                self.backend.put_file(&local, &remote)?;
                remote
            };

            info!("Applying patch {}", patch);

            let src = self.src()?;
            let mut last_err = None;
            for level in STRIP_LEVELS {
                let result = self.run_in(
                    &src,
                    &argv([
                        "patch",
                        &format!("-p{level}"),
                        "-Nt",
                        "-i",
                        &target.display().to_string(),
                    ]),
                );
                match result {
                    Ok(()) => {
                        last_err = None;
                        break;
                    }
                    Err(err) => last_err = Some(err),
                }
            }
            if let Some(err) = last_err {
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use std::io::Write as _;

    // -p1 strips `sub/` and finds nothing; only -p0 can apply
    const P0_PATCH: &str =
        "--- sub/hello.txt\n+++ sub/hello.txt\n@@ -1 +1 @@\n-hello\n+world\n";

    #[test]
    fn test_strip_level_fallback() {
        if std::process::Command::new("patch")
            .arg("--version")
            .output()
            .is_err()
        {
            return; // no patch(1) on this host
        }

        // drive the same patch invocation the applier uses, at each level,
        // against a tree where only -p0 can apply
        let dir = tempfile::tempdir().unwrap();
        let env = test_support::build_env(dir.path());

        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/hello.txt"), "hello\n").unwrap();

        let patch_file = dir.path().join("fix.patch");
        let mut f = fs::File::create(&patch_file).unwrap();
        f.write_all(P0_PATCH.as_bytes()).unwrap();
        drop(f);

        let mut succeeded_at = None;
        for level in STRIP_LEVELS {
            let result = env.run_in(
                &src,
                &argv([
                    "patch",
                    &format!("-p{level}"),
                    "-Nt",
                    "-i",
                    &patch_file.display().to_string(),
                ]),
            );
            if result.is_ok() {
                succeeded_at = Some(level);
                break;
            }
        }

        assert_eq!(succeeded_at, Some(0));
        assert_eq!(
            fs::read_to_string(src.join("sub/hello.txt")).unwrap(),
            "world\n"
        );
    }
}
