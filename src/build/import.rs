// src/build/import.rs

//! Import resolver: library dependencies into compiler and linker flags
//!
//! Two shapes of import entry. `category/name[:version]` resolves the
//! sibling package's installed `dev` and `libs` prefixes and appends
//! whichever roots exist. A bare name is a pkg-config package; those are
//! batched into one pkg-config invocation whose `-I`/`-L` output feeds the
//! same accumulators.

use tracing::debug;

use super::{argv, BuildEnv};
use crate::error::Result;

impl BuildEnv {
    pub(crate) fn resolve_imports(&mut self) -> Result<()> {
        let mut pkgconfig = Vec::new();

        for entry in self.inst.import.clone() {
            if !entry.contains('/') {
                pkgconfig.push(entry);
                continue;
            }

            let (name, version) = match entry.split_once(':') {
                Some((name, version)) => (name, Some(version)),
                None => (entry.as_str(), None),
            };
            let qualifier = match version {
                Some(v) => format!(".{}.{}.{}", v, self.os, self.arch),
                None => format!(".{}.{}", self.os, self.arch),
            };
            let flat = name.replace('/', ".");

            let inc_dir = format!("/pkg/main/{flat}.dev{qualifier}/include");
            let lib_dir = format!(
                "/pkg/main/{flat}.libs{qualifier}/lib{}",
                self.libsuffix()
            );

            if self.backend.stat(std::path::Path::new(&inc_dir)).is_ok() {
                self.vars.append("CPPFLAGS", &format!("-I{inc_dir}"), " ");
                self.vars.append("CPATH", &inc_dir, ":");
                self.vars
                    .append("CMAKE_SYSTEM_INCLUDE_PATH", &inc_dir, ";");
            } else {
                debug!("import {}: no include root at {}", entry, inc_dir);
            }
            if self.backend.stat(std::path::Path::new(&lib_dir)).is_ok() {
                self.vars.append("LDFLAGS", &format!("-L{lib_dir}"), " ");
                self.vars
                    .append("CMAKE_SYSTEM_LIBRARY_PATH", &lib_dir, ";");
            }
        }

        if !pkgconfig.is_empty() {
            self.resolve_pkgconfig(&pkgconfig)?;
        }
        Ok(())
    }

    fn resolve_pkgconfig(&mut self, names: &[String]) -> Result<()> {
        let mut exists = argv(["pkg-config", "--exists", "--print-errors"]);
        exists.extend(names.iter().cloned());
        self.run(&exists)?;

        let mut cflags_cmd = argv(["pkg-config", "--cflags-only-I"]);
        cflags_cmd.extend(names.iter().cloned());
        let cflags = self.run_capture(&cflags_cmd)?;
        let cflags = String::from_utf8_lossy(&cflags).trim().to_string();
        if !cflags.is_empty() {
            self.vars.append("CPPFLAGS", &cflags, " ");
            for token in cflags.split_whitespace() {
                let path = token.strip_prefix("-I").unwrap_or(token);
                self.vars.append("CPATH", path, ":");
                self.vars.append("CMAKE_SYSTEM_INCLUDE_PATH", path, ";");
            }
        }

        let mut libs_cmd = argv(["pkg-config", "--libs-only-L"]);
        libs_cmd.extend(names.iter().cloned());
        let libs = self.run_capture(&libs_cmd)?;
        let libs = String::from_utf8_lossy(&libs).trim().to_string();
        if !libs.is_empty() {
            self.vars.append("LDFLAGS", &libs, " ");
            for token in libs.split_whitespace() {
                let path = token.strip_prefix("-L").unwrap_or(token);
                self.vars.append("CMAKE_SYSTEM_LIBRARY_PATH", path, ";");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;

    #[test]
    fn test_sibling_import_skips_missing_roots() {
        // only roots the backend can stat are appended; a package that is
        // not installed contributes nothing
        let dir = tempfile::tempdir().unwrap();
        let mut env = test_support::build_env(dir.path());
        env.inst.import = vec!["sys-libs/does-not-exist".to_string()];

        env.resolve_imports().unwrap();
        assert_eq!(env.vars.get("CPPFLAGS"), "");
        assert_eq!(env.vars.get("LDFLAGS"), "");
    }
}
