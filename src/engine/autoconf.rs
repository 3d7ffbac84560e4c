// src/engine/autoconf.rs

//! Autoconf adapter
//!
//! Runs the classic configure/make/make-install sequence with the prefix
//! family pointed at the per-output package directories. `config.sub` and
//! `config.guess` copies in the source tree are upgraded from the known
//! good donor set first; ancient scripts routinely mis-detect modern
//! triplets. `LDCONFIG=/bin/true` keeps install rules from touching the
//! host's linker cache.

use std::path::Path;
use tracing::{info, warn};

use super::{build_dir, ncpu};
use crate::build::{argv, BuildEnv};
use crate::error::{Error, Result};
use crate::recipe::Instruction;

/// Known-good config.sub/config.guess donors
pub(crate) const GNUCONFIG_DIR: &str = "/pkg/main/sys-devel.gnuconfig.core/share/gnuconfig";

/// aclocal macros handed to autoreconf
pub(crate) const ACLOCAL_DIR: &str = "/pkg/main/sys-devel.automake.core/share/aclocal";

pub(crate) fn build(e: &mut BuildEnv) -> Result<()> {
    let inst = e.inst.clone();

    upgrade_gnuconfig(e);

    if inst.has_option("autoreconf") {
        run_autoreconf(e)?;
    }

    let src = e.src()?;
    let configure = src.join("configure");
    match e.backend.stat(&configure) {
        Ok(meta) if meta.mode & 0o111 != 0 => {}
        _ => {
            return Err(Error::Config(format!(
                "no executable configure in {}",
                src.display()
            )))
        }
    }

    let dir = build_dir(e)?;
    let args = configure_args(e, &inst, &configure);

    e.run_many_in(&dir, &inst.configure_pre)?;
    e.run_in(&dir, &args)?;
    e.run_many_in(&dir, &inst.configure_post)?;

    e.run_many_in(&dir, &inst.compile_pre)?;
    e.run_in(&dir, &argv(["make", &format!("-j{}", ncpu())]))?;
    e.run_many_in(&dir, &inst.compile_post)?;

    e.run_many_in(&dir, &inst.install_pre)?;
    e.run_in(
        &dir,
        &argv([
            "make",
            "install",
            &format!("DESTDIR={}", e.dist.display()),
            "LDCONFIG=/bin/true",
        ]),
    )?;
    e.run_many_in(&dir, &inst.install_post)?;

    Ok(())
}

/// The configure argv is a pure function of the options, arguments, chost
/// and output prefixes.
pub(crate) fn configure_args(e: &BuildEnv, inst: &Instruction, configure: &Path) -> Vec<String> {
    let core = e.get_dir("core");
    let mut args = vec![
        configure.display().to_string(),
        format!("--prefix={}", core.display()),
    ];

    if !inst.has_option("light") {
        let chost = e.arch.chost();
        args.push("--sysconfdir=/etc".to_string());
        args.push(format!("--host={chost}"));
        args.push(format!("--build={chost}"));
        args.push(format!("--includedir={}/include", e.get_dir("dev").display()));
        args.push(format!(
            "--libdir={}/lib{}",
            e.get_dir("libs").display(),
            e.libsuffix()
        ));
        args.push(format!("--datarootdir={}/share", core.display()));
        args.push(format!("--mandir={}/man", e.get_dir("doc").display()));
        // autoconf 2.13 predates --docdir
        if !inst.has_option("213") {
            args.push(format!("--docdir={}/doc", e.get_dir("doc").display()));
        }
    }

    for arg in &inst.arguments {
        args.push(e.vars.expand(arg));
    }
    args
}

/// Replace every config.sub/config.guess under the work tree with the
/// donor copies. Failures only warn; the stale script might still work.
fn upgrade_gnuconfig(e: &BuildEnv) {
    for rel in e.backend.find_files(&e.workdir, &["config.sub", "config.guess"]) {
        let Some(name) = rel.file_name().map(|n| n.to_os_string()) else {
            continue;
        };
        info!("upgrading {}", rel.display());
        let donor = Path::new(GNUCONFIG_DIR).join(&name);
        match e.backend.read_file(&donor) {
            Ok(data) => {
                if let Err(err) = e.backend.write_file(&e.workdir.join(&rel), &data, 0o755) {
                    warn!("failed to upgrade {}: {}", rel.display(), err);
                }
            }
            Err(err) => warn!("no gnuconfig donor for {}: {}", rel.display(), err),
        }
    }
}

/// `libtoolize` then `autoreconf -fi`, with the source's own m4 macros
/// when it ships any
fn run_autoreconf(e: &BuildEnv) -> Result<()> {
    let src = e.src()?;
    e.run_in(&src, &argv(["libtoolize", "--force", "--install"]))?;

    let mut cmd = argv(["autoreconf", "-fi", "-I", ACLOCAL_DIR]);
    let m4 = src.join("m4");
    if e.backend.stat(&m4).is_ok() {
        cmd.push("-I".to_string());
        cmd.push(m4.display().to_string());
    }
    e.run_in(&src, &cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::test_support;
    use crate::recipe::Instruction;

    fn args_with(options: &[&str], arguments: &[&str]) -> Vec<String> {
        let dir = tempfile::tempdir().unwrap();
        let env = test_support::build_env(dir.path());
        let inst = Instruction {
            version: "*".to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
            arguments: arguments.iter().map(|s| s.to_string()).collect(),
            ..Instruction::default()
        };
        configure_args(&env, &inst, Path::new("/build/work/zlib-1.3/configure"))
    }

    #[test]
    fn test_full_configure_args() {
        let args = args_with(&[], &[]);
        assert_eq!(args[0], "/build/work/zlib-1.3/configure");
        assert_eq!(
            args[1],
            "--prefix=/pkg/main/sys-libs.zlib.core.1.3.linux.amd64"
        );
        assert!(args.contains(&"--sysconfdir=/etc".to_string()));
        assert!(args.contains(&"--host=x86_64-pc-linux-gnu".to_string()));
        assert!(args.contains(&"--build=x86_64-pc-linux-gnu".to_string()));
        assert!(args.contains(
            &"--includedir=/pkg/main/sys-libs.zlib.dev.1.3.linux.amd64/include".to_string()
        ));
        assert!(args.contains(
            &"--libdir=/pkg/main/sys-libs.zlib.libs.1.3.linux.amd64/lib64".to_string()
        ));
        assert!(args
            .contains(&"--docdir=/pkg/main/sys-libs.zlib.doc.1.3.linux.amd64/doc".to_string()));
    }

    #[test]
    fn test_light_omits_everything_but_prefix() {
        let args = args_with(&["light"], &[]);
        assert_eq!(args.len(), 2);
        assert!(args[1].starts_with("--prefix="));
    }

    #[test]
    fn test_213_omits_docdir() {
        let args = args_with(&["213"], &[]);
        assert!(!args.iter().any(|a| a.starts_with("--docdir=")));
        assert!(args.iter().any(|a| a.starts_with("--mandir=")));
    }

    #[test]
    fn test_arguments_are_expanded_and_appended_last() {
        let args = args_with(&["light"], &["--with-pic", "--includedir=${T}/inc"]);
        assert_eq!(args[args.len() - 2], "--with-pic");
        let last = args.last().unwrap();
        assert!(last.starts_with("--includedir="));
        assert!(last.ends_with("/temp/inc"));
    }
}
