// src/build/archive.rs

//! Archiver: pack each output subtree as an independent squashfs image
//!
//! Optional package metadata (`azusa.yaml`) is copied into the core
//! output verbatim. If the libs output carries real library directories a
//! `.ld.so.conf`/`.ld.so.cache` pair is generated so consumers can mount
//! the image and resolve libraries immediately. Images land in
//! `/tmp/apkg` and are fetched back to the host after remote builds; a
//! root build on the host also stages them for signing.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{argv, BuildEnv};
use crate::error::Result;
use crate::repo;

/// Where finished images are written (on the backend)
pub const IMAGE_DIR: &str = "/tmp/apkg";

/// Host-side staging area for images awaiting signature
pub const UNSIGNED_DIR: &str = "/var/lib/apkg/unsigned";

impl BuildEnv {
    pub(crate) fn archive(&self) -> Result<()> {
        self.copy_package_info()?;

        if let Some(conf) = self.ld_so_conf()? {
            let libs = self.under_dist(&self.get_dir("libs"));
            self.backend
                .write_file(&libs.join(".ld.so.conf"), conf.as_bytes(), 0o644)?;
            self.run(&argv([
                "ldconfig",
                "--format=new",
                "-r",
                &self.dist.display().to_string(),
                "-C",
                &self.get_dir("libs").join(".ld.so.cache").display().to_string(),
                "-f",
                &self.get_dir("libs").join(".ld.so.conf").display().to_string(),
            ]))?;
        }

        let images = self.squash_outputs()?;

        if !self.backend.is_local() {
            fs::create_dir_all(IMAGE_DIR)?;
            for image in &images {
                self.backend.get_file(image, image)?;
            }
        } else if self.backend.is_root() {
            fs::create_dir_all(UNSIGNED_DIR)?;
            for image in &images {
                if let Some(name) = image.file_name() {
                    self.backend
                        .put_file(image, &Path::new(UNSIGNED_DIR).join(name))?;
                }
            }
        }

        Ok(())
    }

    /// Copy the recipe's optional `azusa.yaml` into the core output
    fn copy_package_info(&self) -> Result<()> {
        let infofile = repo::repo_path().join(&self.pkg.name).join("azusa.yaml");
        if fs::metadata(&infofile).is_err() {
            return Ok(());
        }

        let core = self.under_dist(&self.get_dir("core"));
        self.backend.mkdir_all(&core, 0o755)?;
        self.backend.put_file(&infofile, &core.join("azusa.yaml"))
    }

    /// One line per real library directory under the libs output, or None
    /// when nothing needs ldconfig
    fn ld_so_conf(&self) -> Result<Option<String>> {
        let prefix = self
            .get_dir("libs")
            .join(format!("lib{}", self.libsuffix()));
        let libdir = self.under_dist(&prefix);

        let mut conf = String::new();
        for sub in ["lib64", "lib32", "lib"] {
            match self.backend.lstat(&libdir.join(sub)) {
                Ok(meta) if meta.is_dir() => {
                    conf.push_str(&prefix.join(sub).display().to_string());
                    conf.push('\n');
                }
                _ => {}
            }
        }

        if conf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(conf))
        }
    }

    /// mksquashfs every subtree under `dist/pkg/main`
    fn squash_outputs(&self) -> Result<Vec<PathBuf>> {
        let installed = self.dist.join("pkg").join("main");
        let out_dir = Path::new(IMAGE_DIR);
        self.backend.mkdir_all(out_dir, 0o755)?;

        let mut images = Vec::new();
        for entry in self.backend.read_dir(&installed)? {
            let image = out_dir.join(format!("{}.squashfs", entry.name));
            info!("Packing {}", image.display());

            let mut cmd = argv([
                "mksquashfs",
                &installed.join(&entry.name).display().to_string(),
                &image.display().to_string(),
            ]);
            if !self.backend.is_root() {
                cmd.push("-all-root".to_string());
            }
            cmd.push("-nopad".to_string());
            cmd.push("-noappend".to_string());

            self.run(&cmd)?;
            images.push(image);
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use std::fs;

    #[test]
    fn test_ld_so_conf_lists_real_dirs_only() {
        let dir = tempfile::tempdir().unwrap();
        let env = test_support::build_env(dir.path());

        let libdir = env
            .under_dist(&env.get_dir("libs"))
            .join("lib64");
        fs::create_dir_all(libdir.join("lib64")).unwrap();
        fs::create_dir_all(libdir.join("lib32")).unwrap();
        std::os::unix::fs::symlink("lib64", libdir.join("lib")).unwrap();

        let conf = env.ld_so_conf().unwrap().unwrap();
        let lines: Vec<&str> = conf.lines().collect();
        assert_eq!(
            lines,
            vec![
                "/pkg/main/sys-libs.zlib.libs.1.3.linux.amd64/lib64/lib64",
                "/pkg/main/sys-libs.zlib.libs.1.3.linux.amd64/lib64/lib32",
            ]
        );
    }

    #[test]
    fn test_ld_so_conf_absent_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let env = test_support::build_env(dir.path());
        fs::create_dir_all(&env.dist).unwrap();

        assert!(env.ld_so_conf().unwrap().is_none());
    }
}
