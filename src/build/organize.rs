// src/build/organize.rs

//! Tree organizer: split the installed tree into canonical output subtrees
//!
//! Upstream install rules scatter files across conventional Unix locations
//! inside the `core` prefix. This stage rewrites the staged tree so every
//! file lives under the output prefix it belongs to (`core`, `libs`,
//! `dev`, `doc`, `fonts`, `mod`), leaving symlinks behind where consumers
//! expect the old paths. Every sub-step is a no-op when its precondition
//! is absent, and the move-and-link primitive checks for its final-state
//! symlink first, so running the whole pass twice changes nothing.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::BuildEnv;
use crate::error::Result;

impl BuildEnv {
    /// Apply every reorganization step, in order
    pub(crate) fn organize(&self) -> Result<()> {
        info!("Organizing installed tree...");
        self.strip_libtool_archives()?;
        self.collect_toplevel_libs()?;
        self.fix_multilib()?;
        self.move_stray_etc()?;
        self.relocate_dev_artifacts()?;
        self.relocate_docs()?;
        self.fix_udev_rules()?;
        self.collect_fonts()?;
        self.relocate_python_modules()?;
        Ok(())
    }

    /// Libtool archives serve no purpose in the packaged tree
    fn strip_libtool_archives(&self) -> Result<()> {
        for rel in self.backend.find_files(&self.dist, &["*.la"]) {
            let path = self.dist.join(rel);
            info!("remove: {}", path.display());
            self.backend.remove(&path)?;
        }
        Ok(())
    }

    /// Move real `lib`/`lib32`/`lib64` directories out of the core prefix
    /// into the libs prefix, leaving symlinks behind
    fn collect_toplevel_libs(&self) -> Result<()> {
        info!("Fixing libs...");
        for sub in ["lib", "lib32", "lib64"] {
            let src = self.under_dist(&self.get_dir("core")).join(sub);
            match self.backend.lstat(&src) {
                Ok(meta) if meta.is_dir() => {}
                _ => continue,
            }
            self.move_and_link_dir(
                &src,
                &self.under_dist(&self.get_dir("libs")).join(sub),
                &self.get_dir("libs").join(sub),
            )?;
        }
        Ok(())
    }

    /// On multilib arches a bare `lib` becomes `lib<suffix>` with a
    /// compatibility symlink back
    fn fix_multilib(&self) -> Result<()> {
        let suffix = self.libsuffix();
        if suffix.is_empty() {
            return Ok(());
        }

        for kind in ["core", "libs", "dev"] {
            let prefix = self.under_dist(&self.get_dir(kind));
            let lib = prefix.join("lib");
            let suffixed = prefix.join(format!("lib{suffix}"));

            match self.backend.lstat(&lib) {
                Ok(meta) if meta.is_dir() => {}
                _ => continue,
            }
            if self.backend.lstat(&suffixed).is_ok() {
                continue;
            }

            self.backend.rename(&lib, &suffixed)?;
            self.backend
                .symlink(Path::new(&format!("lib{suffix}")), &lib)?;
        }
        Ok(())
    }

    /// An install that wrote into `/etc` directly lands under the core
    /// prefix instead
    fn move_stray_etc(&self) -> Result<()> {
        let etc = self.dist.join("etc");
        self.move_dir_merge(&etc, &self.under_dist(&self.get_dir("core")).join("etc"))
    }

    /// pkgconfig/cmake metadata, headers and static archives belong to dev
    fn relocate_dev_artifacts(&self) -> Result<()> {
        let libdir = self
            .under_dist(&self.get_dir("libs"))
            .join(format!("lib{}", self.libsuffix()));
        let core_share = self.under_dist(&self.get_dir("core")).join("share");
        let dev = self.under_dist(&self.get_dir("dev"));

        for meta_dir in ["pkgconfig", "cmake"] {
            self.move_dir_merge(&libdir.join(meta_dir), &dev.join(meta_dir))?;
            self.move_dir_merge(&core_share.join(meta_dir), &dev.join(meta_dir))?;
        }

        self.move_and_link_dir(
            &self.under_dist(&self.get_dir("core")).join("include"),
            &dev.join("include"),
            &self.get_dir("dev").join("include"),
        )?;

        if self.backend.stat(&libdir).is_ok() {
            let dev_libdir = dev.join(format!("lib{}", self.libsuffix()));
            for rel in self.backend.find_files(&libdir, &["*.a"]) {
                let to = dev_libdir.join(&rel);
                if let Some(parent) = to.parent() {
                    self.backend.mkdir_all(parent, 0o755)?;
                }
                self.backend.rename(&libdir.join(&rel), &to)?;
            }
        }
        Ok(())
    }

    /// Manuals and info pages move into the doc prefix
    fn relocate_docs(&self) -> Result<()> {
        let core = self.under_dist(&self.get_dir("core"));
        let doc = self.under_dist(&self.get_dir("doc"));

        for sub in ["man", "info"] {
            self.move_dir_merge(&core.join(sub), &doc.join(sub))?;
            self.move_dir_merge(&core.join("share").join(sub), &doc.join(sub))?;
        }
        Ok(())
    }

    /// udev rules live under the core prefix, wherever the install put them
    fn fix_udev_rules(&self) -> Result<()> {
        let target = self.under_dist(&self.get_dir("core")).join("udev");
        self.move_dir_merge(&self.dist.join("lib").join("udev"), &target)?;
        let libs_udev = self
            .under_dist(&self.get_dir("libs"))
            .join(format!("lib{}", self.libsuffix()))
            .join("udev");
        self.move_dir_merge(&libs_udev, &target)
    }

    /// Fonts installed into font-util's shared directory belong to this
    /// build's fonts output. font-util itself keeps its own tree.
    fn collect_fonts(&self) -> Result<()> {
        if self.pkg.name == "media-fonts/font-util" {
            return Ok(());
        }

        let installed = self.dist.join("pkg").join("main");
        let entries = match self.backend.read_dir(&installed) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };

        for entry in entries {
            if !entry.name.starts_with("media-fonts.font-util.core") {
                continue;
            }
            let fonts_src = installed.join(&entry.name).join("share").join("fonts");
            match self.backend.lstat(&fonts_src) {
                Ok(meta) if meta.is_dir() => {}
                _ => continue,
            }

            let fonts_dst = self
                .under_dist(&self.get_dir("fonts"))
                .join("share")
                .join("fonts");
            self.backend.mkdir_all(&fonts_dst, 0o755)?;
            for child in self.backend.read_dir(&fonts_src)? {
                self.backend
                    .rename(&fonts_src.join(&child.name), &fonts_dst.join(&child.name))?;
            }

            // drop the emptied stray prefix, best effort
            let _ = self.backend.remove(&fonts_src);
            let _ = self.backend.remove(&installed.join(&entry.name).join("share"));
            let _ = self.backend.remove(&installed.join(&entry.name));
        }
        Ok(())
    }

    /// Python site-packages move into a versioned `mod` output so one
    /// build can serve several interpreter versions. Skipped when building
    /// the interpreter itself.
    fn relocate_python_modules(&self) -> Result<()> {
        if self.pkg.name == "dev-lang/python" {
            return Ok(());
        }

        let libdir = self
            .under_dist(&self.get_dir("libs"))
            .join(format!("lib{}", self.libsuffix()));
        let entries = match self.backend.read_dir(&libdir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };

        for entry in entries {
            if !entry.meta.is_dir() {
                continue;
            }
            let Some(short) = python_short_version(&entry.name) else {
                continue;
            };

            // the installed interpreter symlink resolves X.Y to the full
            // version this module tree was built against
            let link = PathBuf::from(format!("/pkg/main/dev-lang.python.core.{short}"));
            let resolved = match self.backend.readlink(&link) {
                Ok(target) => {
                    let name = target
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let trimmed = trim_os_arch(&name);
                    match trimmed.strip_prefix("dev-lang.python.core.") {
                        Some(version) => version.to_string(),
                        None => {
                            warn!("unexpected python resolution {}", name);
                            continue;
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "cannot resolve python {} ({}), leaving {} in place",
                        short,
                        err,
                        entry.name
                    );
                    continue;
                }
            };

            let target = self
                .under_dist(&self.get_dir(&format!("mod.py{resolved}")))
                .join("lib")
                .join(&entry.name);
            if let Some(parent) = target.parent() {
                self.backend.mkdir_all(parent, 0o755)?;
            }
            self.backend.rename(&libdir.join(&entry.name), &target)?;
        }
        Ok(())
    }

    /// Move every child of `src` into `dst`, remove `src`, and leave a
    /// symlink to `link_target` in its place. Early-returns when `src` is
    /// already the final-state symlink, which makes the organizer
    /// idempotent.
    fn move_and_link_dir(&self, src: &Path, dst: &Path, link_target: &Path) -> Result<()> {
        match self.backend.lstat(src) {
            Ok(meta) if meta.is_symlink() => return Ok(()),
            Ok(_) => {}
            Err(_) => return Ok(()),
        }

        if self.backend.stat(dst).is_err() {
            self.backend.mkdir_all(dst, 0o755)?;
        }
        for entry in self.backend.read_dir(src)? {
            self.backend
                .rename(&src.join(&entry.name), &dst.join(&entry.name))?;
        }
        self.backend.remove(src)?;
        self.backend.symlink(link_target, src)
    }

    /// Move a directory to `dst`, merging children when `dst` already
    /// exists. No-op when `src` is absent or not a real directory.
    fn move_dir_merge(&self, src: &Path, dst: &Path) -> Result<()> {
        match self.backend.lstat(src) {
            Ok(meta) if meta.is_dir() => {}
            _ => return Ok(()),
        }

        if self.backend.lstat(dst).is_err() {
            if let Some(parent) = dst.parent() {
                self.backend.mkdir_all(parent, 0o755)?;
            }
            return self.backend.rename(src, dst);
        }

        for entry in self.backend.read_dir(src)? {
            self.backend
                .rename(&src.join(&entry.name), &dst.join(&entry.name))?;
        }
        self.backend.remove(src)
    }
}

/// `python3.11` → `3.11`
fn python_short_version(name: &str) -> Option<&str> {
    let version = name.strip_prefix("python")?;
    let (major, minor) = version.split_once('.')?;
    if major.chars().all(|c| c.is_ascii_digit())
        && !major.is_empty()
        && minor.chars().all(|c| c.is_ascii_digit())
        && !minor.is_empty()
    {
        Some(version)
    } else {
        None
    }
}

/// Drop the trailing `.<os>.<arch>` qualifier from a package directory name
fn trim_os_arch(name: &str) -> &str {
    let mut end = name.len();
    for _ in 0..2 {
        if let Some(pos) = name[..end].rfind('.') {
            end = pos;
        }
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    const CORE: &str = "pkg/main/sys-libs.zlib.core.1.3.linux.amd64";
    const LIBS: &str = "pkg/main/sys-libs.zlib.libs.1.3.linux.amd64";
    const DEV: &str = "pkg/main/sys-libs.zlib.dev.1.3.linux.amd64";
    const DOC: &str = "pkg/main/sys-libs.zlib.doc.1.3.linux.amd64";
    const FONTS: &str = "pkg/main/sys-libs.zlib.fonts.1.3.linux.amd64";

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn populate(dist: &Path) {
        touch(&dist.join(CORE).join("lib/libz.so.1.3"));
        touch(&dist.join(CORE).join("lib/libz.la"));
        touch(&dist.join(CORE).join("lib/libz.a"));
        touch(&dist.join(CORE).join("lib/pkgconfig/zlib.pc"));
        touch(&dist.join(CORE).join("include/zlib.h"));
        touch(&dist.join(CORE).join("share/man/man3/zlib.3"));
        touch(&dist.join(CORE).join("bin/zpipe"));
        fs::set_permissions(
            dist.join(CORE).join("bin/zpipe"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        touch(&dist.join("etc/zlib.conf"));
        touch(
            &dist
                .join("pkg/main/media-fonts.font-util.core.1.0.linux.amd64")
                .join("share/fonts/fixed.pcf"),
        );
    }

    /// Walk the tree recording (relative path, is_symlink, link target)
    fn snapshot(root: &Path) -> Vec<(String, bool, Option<PathBuf>)> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .display()
                .to_string();
            let is_symlink = entry.path_is_symlink();
            let target = if is_symlink {
                fs::read_link(entry.path()).ok()
            } else {
                None
            };
            out.push((rel, is_symlink, target));
        }
        out
    }

    #[test]
    fn test_organize_layout_invariants() {
        let dir = tempfile::tempdir().unwrap();
        let env = test_support::build_env(dir.path());
        fs::create_dir_all(&env.dist).unwrap();
        populate(&env.dist);

        env.organize().unwrap();
        let dist = &env.dist;

        // no libtool archives survive
        assert!(env.backend.find_files(dist, &["*.la"]).is_empty());

        // core/lib is now a symlink into the libs prefix
        let core_lib = dist.join(CORE).join("lib");
        let meta = fs::symlink_metadata(&core_lib).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(
            fs::read_link(&core_lib).unwrap(),
            PathBuf::from("/").join(LIBS).join("lib")
        );

        // multilib fix: libs/lib64 is real, libs/lib points back at it
        assert!(dist.join(LIBS).join("lib64/libz.so.1.3").is_file());
        let libs_lib = dist.join(LIBS).join("lib");
        assert!(fs::symlink_metadata(&libs_lib)
            .unwrap()
            .file_type()
            .is_symlink());
        assert_eq!(fs::read_link(&libs_lib).unwrap(), PathBuf::from("lib64"));

        // headers, pkgconfig and static archives moved to dev
        assert!(dist.join(DEV).join("include/zlib.h").is_file());
        assert!(dist.join(DEV).join("pkgconfig/zlib.pc").is_file());
        assert!(dist.join(DEV).join("lib64/libz.a").is_file());
        let core_include = dist.join(CORE).join("include");
        assert!(fs::symlink_metadata(&core_include)
            .unwrap()
            .file_type()
            .is_symlink());

        // docs and stray /etc relocated
        assert!(dist.join(DOC).join("man/man3/zlib.3").is_file());
        assert!(dist.join(CORE).join("etc/zlib.conf").is_file());

        // fonts collected out of font-util's shared directory
        assert!(dist.join(FONTS).join("share/fonts/fixed.pcf").is_file());
        assert!(!dist
            .join("pkg/main/media-fonts.font-util.core.1.0.linux.amd64")
            .exists());
    }

    #[test]
    fn test_organize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let env = test_support::build_env(dir.path());
        fs::create_dir_all(&env.dist).unwrap();
        populate(&env.dist);

        env.organize().unwrap();
        let first = snapshot(&env.dist);
        env.organize().unwrap();
        let second = snapshot(&env.dist);

        assert_eq!(first, second);
    }

    #[test]
    fn test_multilib_noop_without_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = test_support::build_env(dir.path());
        env.arch = crate::backend::Arch::Arm64;
        fs::create_dir_all(&env.dist).unwrap();
        touch(&env.dist.join(CORE).join("lib/libz.so.1.3"));

        env.fix_multilib().unwrap();
        // no lib64 appears on an arch without a lib suffix
        assert!(!env.dist.join(CORE).join("lib64").exists());
    }

    #[test]
    fn test_python_short_version() {
        assert_eq!(python_short_version("python3.11"), Some("3.11"));
        assert_eq!(python_short_version("python2.7"), Some("2.7"));
        assert_eq!(python_short_version("python"), None);
        assert_eq!(python_short_version("pythonX.Y"), None);
        assert_eq!(python_short_version("site-packages"), None);
    }

    #[test]
    fn test_trim_os_arch() {
        assert_eq!(
            trim_os_arch("dev-lang.python.core.3.11.6.linux.amd64"),
            "dev-lang.python.core.3.11.6"
        );
        assert_eq!(trim_os_arch("a.b"), "a");
        assert_eq!(trim_os_arch("plain"), "plain");
    }
}
