// src/build/mod.rs

//! Build driver: per-build state and the pipeline that sequences every
//! stage from download to archive
//!
//! A [`BuildEnv`] owns the build-directory layout (`work`, `dist`, `temp`
//! under one per-build `base`), the variable environment projected into
//! every child process, and the execution backend everything is routed
//! through. Stages live in the submodules; engines in [`crate::engine`].

mod archive;
mod download;
mod fixelf;
mod import;
mod organize;
mod patch;

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backend::{self, Arch, Backend};
use crate::engine;
use crate::error::{Error, Result};
use crate::recipe::{Engine, Instruction, Recipe};
use crate::repo::{self, Package};
use crate::vars::VarEnv;

/// Convenience for building owned argv vectors
pub(crate) fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Mutable per-build context
pub struct BuildEnv {
    pub(crate) pkg: Package,
    pub(crate) recipe: Recipe,
    /// Selected instruction block, resolved at pipeline start
    pub(crate) inst: Instruction,

    pub(crate) os: &'static str,
    pub(crate) arch: Arch,
    pub(crate) version: String,
    /// Version plus revision (revision handling pending a recipe field)
    pub(crate) pvr: String,
    /// Fully qualified `<pvr>.<os>.<arch>` used in output prefixes
    pub(crate) pvrf: String,
    pub(crate) category: String,
    pub(crate) name: String,

    pub(crate) vars: VarEnv,
    pub(crate) backend: Box<dyn Backend>,

    pub(crate) base: PathBuf,
    pub(crate) workdir: PathBuf,
    pub(crate) dist: PathBuf,
    pub(crate) temp: PathBuf,
    /// Detected or recipe-bound source root under `workdir`
    pub(crate) src: Option<PathBuf>,
}

impl BuildEnv {
    /// Acquire a backend for `arch` and set up the build context
    pub fn new(pkg: Package, recipe: Recipe, version: String, arch: Arch) -> Result<Self> {
        let backend = backend::acquire(arch);
        Self::with_backend(pkg, recipe, version, arch, backend)
    }

    /// Set up the build context on an explicit backend
    pub fn with_backend(
        pkg: Package,
        recipe: Recipe,
        version: String,
        arch: Arch,
        backend: Box<dyn Backend>,
    ) -> Result<Self> {
        let category = pkg.category().to_string();
        let name = pkg.short_name().to_string();

        let base = backend.base()?.join(format!("{name}-{version}"));
        let workdir = base.join("work");
        let dist = base.join("dist");
        let temp = base.join("temp");

        let pvr = version.clone();
        let pvrf = format!("{}.linux.{}", pvr, arch);

        let mut env = Self {
            pkg,
            recipe,
            inst: Instruction::auto(),
            os: "linux",
            arch,
            version,
            pvr,
            pvrf,
            category,
            name,
            vars: VarEnv::new(),
            backend,
            base,
            workdir,
            dist,
            temp,
            src: None,
        };
        env.init_vars();

        info!("Using {} as build directory", env.base.display());
        Ok(env)
    }

    /// Bind the authoritative build variables, in a stable order
    fn init_vars(&mut self) {
        let p = format!("{}-{}", self.name, self.version);
        let filesdir = repo::repo_path().join(&self.pkg.name).join("files");

        self.vars.set("P", p.clone());
        self.vars.set("PN", self.name.clone());
        self.vars.set("PF", p);
        self.vars.set("CATEGORY", self.category.clone());
        self.vars.set("PV", self.version.clone());
        self.vars.set("PVR", self.pvr.clone());
        self.vars.set("PVRF", self.pvrf.clone());
        self.vars
            .set("PKG", format!("{}.{}", self.category, self.name));
        self.vars
            .set("WORKDIR", self.workdir.display().to_string());
        self.vars.set("D", self.dist.display().to_string());
        self.vars.set("T", self.temp.display().to_string());
        self.vars.set("CHOST", self.arch.chost());
        self.vars.set("ARCH", self.arch.as_str());
        self.vars.set("OS", self.os);
        self.vars.set("BITS", self.arch.bits().to_string());
        self.vars.set("LIBSUFFIX", self.arch.libsuffix());
        self.vars
            .set("FILESDIR", filesdir.display().to_string());

        self.vars.set(
            "PKG_CONFIG_LIBDIR",
            "/pkg/main/azusa.symlinks.core/pkgconfig",
        );
        self.vars.set("XDG_DATA_DIRS", "/usr/share");
        self.vars
            .set("SOURCE_DATE_EPOCH", self.recipe.epoch.clone());
    }

    /// Run the whole pipeline, then tear the build directory down
    pub fn build(&mut self) -> Result<()> {
        let result = self.run_pipeline();
        if let Err(err) = self.cleanup() {
            warn!("cleanup failed: {}", err);
        }
        result
    }

    fn run_pipeline(&mut self) -> Result<()> {
        self.inst = self
            .recipe
            .instruction_for(&self.version)
            .cloned()
            .unwrap_or_else(Instruction::auto);

        info!(
            "building version {} of {} using {} engine",
            self.version, self.pkg.name, self.inst.engine
        );

        self.init_dirs()?;
        self.apply_env()?;
        self.download()?;
        self.apply_patches()?;
        self.resolve_imports()?;
        // env is applied twice: bindings may reference ${S}, which the
        // download step is the first to define
        self.apply_env()?;

        if self.inst.engine == Engine::Auto {
            let (engine, autoreconf) = self.detect_engine()?;
            self.inst.engine = engine;
            if autoreconf && !self.inst.has_option("autoreconf") {
                self.inst.options.push("autoreconf".to_string());
            }
        }

        match self.inst.engine {
            Engine::Autoconf => engine::autoconf::build(self)?,
            Engine::Cmake => engine::cmake::build(self)?,
            Engine::Meson => engine::meson::build(self)?,
            Engine::None => engine::none::build(self)?,
            Engine::Auto => {
                return Err(Error::Config("engine probe left auto unresolved".to_string()))
            }
        }

        self.fix_elf()?;
        self.organize()?;
        self.archive()?;
        Ok(())
    }

    /// Probe the source tree for a build system, in fixed order
    fn detect_engine(&self) -> Result<(Engine, bool)> {
        let src = self.src()?;
        let probes: [(&str, Engine, bool); 4] = [
            ("CMakeLists.txt", Engine::Cmake, false),
            ("meson_options.txt", Engine::Meson, false),
            ("configure", Engine::Autoconf, false),
            ("configure.ac", Engine::Autoconf, true),
        ];
        for (file, engine, autoreconf) in probes {
            if self.backend.stat(&src.join(file)).is_ok() {
                return Ok((engine, autoreconf));
            }
        }
        Err(Error::UnknownBuildType)
    }

    fn init_dirs(&mut self) -> Result<()> {
        self.backend.remove_all(&self.base)?;
        self.backend.mkdir_all(&self.base, 0o755)?;
        for sub in ["work", "dist", "temp"] {
            self.backend.mkdir(&self.base.join(sub), 0o755)?;
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.backend.is_local() {
            self.backend.remove_all(&self.base)?;
        }
        self.backend.close()
    }

    /// Apply the instruction's env list in declared order. Each value is
    /// expanded against the environment built so far, so later entries can
    /// reference earlier ones. Binding `S` also moves the source root.
    pub(crate) fn apply_env(&mut self) -> Result<()> {
        for entry in self.inst.env.clone() {
            let Some((key, raw)) = entry.split_once('=') else {
                warn!("ignoring malformed env entry {:?}", entry);
                continue;
            };
            let value = self.vars.expand(raw);
            if key == "S" {
                self.src = Some(PathBuf::from(&value));
            }
            self.vars.set(key, value);
        }
        Ok(())
    }

    /// Source root; an error before download has bound it
    pub(crate) fn src(&self) -> Result<PathBuf> {
        self.src
            .clone()
            .ok_or_else(|| Error::Config("source directory not detected; bind S".to_string()))
    }

    /// Record the detected source root and bind `S`
    pub(crate) fn set_src(&mut self, src: PathBuf) {
        self.vars.set("S", src.display().to_string());
        self.src = Some(src);
    }

    /// Full environment projected into child processes: fixed identity
    /// entries first, then the build variables in binding order.
    pub(crate) fn full_env(&self) -> Vec<String> {
        let mut env = vec![
            "HOSTNAME=localhost".to_string(),
            format!("HOME={}", self.base.display()),
            "PATH=/build/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
        ];
        env.extend(self.vars.iter().map(|(k, v)| format!("{k}={v}")));
        env
    }

    /// Output prefix for one kind: `/pkg/main/<category>.<name>.<kind>.<pvrf>`
    pub(crate) fn get_dir(&self, kind: &str) -> PathBuf {
        PathBuf::from(format!(
            "/pkg/main/{}.{}.{}.{}",
            self.category, self.name, kind, self.pvrf
        ))
    }

    /// Rebase an absolute prefix under the staging `dist` tree
    pub(crate) fn under_dist(&self, abs: &Path) -> PathBuf {
        match abs.strip_prefix("/") {
            Ok(rel) => self.dist.join(rel),
            Err(_) => self.dist.join(abs),
        }
    }

    pub(crate) fn libsuffix(&self) -> &'static str {
        self.arch.libsuffix()
    }

    pub(crate) fn run(&self, argv: &[String]) -> Result<()> {
        info!("build: running {}", argv.join(" "));
        self.backend
            .run_env(Path::new("/"), argv, &self.full_env(), None, None)
    }

    pub(crate) fn run_in(&self, dir: &Path, argv: &[String]) -> Result<()> {
        info!("build: running {}", argv.join(" "));
        self.backend
            .run_env(dir, argv, &self.full_env(), None, None)
    }

    /// Run and capture stdout; stderr stays attached to the driver
    pub(crate) fn run_capture(&self, argv: &[String]) -> Result<Vec<u8>> {
        info!("build: running {}", argv.join(" "));
        let mut out = Vec::new();
        self.backend
            .run_env(Path::new("/"), argv, &self.full_env(), Some(&mut out), None)?;
        Ok(out)
    }

    /// Run and capture stdout, discarding stderr (for probes whose
    /// failures are expected)
    pub(crate) fn run_capture_silent(&self, argv: &[String]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut discard = std::io::sink();
        self.backend.run_env(
            Path::new("/"),
            argv,
            &self.full_env(),
            Some(&mut out),
            Some(&mut discard),
        )?;
        Ok(out)
    }

    /// Run each hook line as `bash -c <line>` at `dir`; non-zero aborts
    pub(crate) fn run_many_in(&self, dir: &Path, cmds: &[String]) -> Result<()> {
        for cmd in cmds {
            self.run_in(
                dir,
                &argv(["/bin/bash", "-c", cmd.as_str()]),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::recipe::Versions;

    /// A build context rooted in a caller-owned directory, on the local
    /// backend, for exercising pipeline stages in isolation.
    pub(crate) fn build_env(root: &Path) -> BuildEnv {
        let recipe = Recipe {
            versions: Versions {
                list: vec!["1.3".to_string()],
                stable: "1.3".to_string(),
            },
            build: Vec::new(),
            files: None,
            pkgname: "sys-libs/zlib".to_string(),
            epoch: "1700000000".to_string(),
            meta: Default::default(),
        };

        let base = root.join("zlib-1.3");
        let workdir = base.join("work");
        let dist = base.join("dist");
        let temp = base.join("temp");

        let mut env = BuildEnv {
            pkg: Package {
                name: "sys-libs/zlib".to_string(),
            },
            recipe,
            inst: Instruction::auto(),
            os: "linux",
            arch: Arch::Amd64,
            version: "1.3".to_string(),
            pvr: "1.3".to_string(),
            pvrf: "1.3.linux.amd64".to_string(),
            category: "sys-libs".to_string(),
            name: "zlib".to_string(),
            vars: VarEnv::new(),
            backend: Box::new(LocalBackend::new()),
            base,
            workdir,
            dist,
            temp,
            src: None,
        };
        env.init_vars();
        env
    }
}
