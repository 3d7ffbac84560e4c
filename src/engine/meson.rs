// src/engine/meson.rs

//! Meson adapter

use super::build_dir;
use crate::build::{argv, BuildEnv};
use crate::error::Result;

pub(crate) fn build(e: &mut BuildEnv) -> Result<()> {
    let inst = e.inst.clone();

    let root = match e.vars.get("MESON_ROOT") {
        "" => e.src()?,
        custom => std::path::PathBuf::from(custom),
    };

    let dir = build_dir(e)?;

    let mut cmd = argv([
        "meson",
        &root.display().to_string(),
        &format!("--prefix={}", e.get_dir("core").display()),
        &format!(
            "--libdir={}/lib{}",
            e.get_dir("libs").display(),
            e.libsuffix()
        ),
        &format!("--includedir={}/include", e.get_dir("dev").display()),
        &format!("--mandir={}/man", e.get_dir("doc").display()),
        "-Dbuildtype=release",
    ]);
    for arg in &inst.arguments {
        cmd.push(e.vars.expand(arg));
    }

    e.run_many_in(&dir, &inst.configure_pre)?;
    e.run_in(&dir, &cmd)?;
    e.run_many_in(&dir, &inst.configure_post)?;

    e.run_many_in(&dir, &inst.compile_pre)?;
    e.run_in(&dir, &argv(["ninja"]))?;
    e.run_many_in(&dir, &inst.compile_post)?;

    // ninja install reads DESTDIR from the environment
    e.vars.set("DESTDIR", e.dist.display().to_string());

    e.run_many_in(&dir, &inst.install_pre)?;
    e.run_in(&dir, &argv(["ninja", "install"]))?;
    e.run_many_in(&dir, &inst.install_post)?;

    Ok(())
}
