// src/engine/cmake.rs

//! CMake adapter
//!
//! Two cache-priming files are written under the build base before
//! configuring: a rules override that injects CPPFLAGS into every
//! compile-object pattern (CMake otherwise ignores CPPFLAGS entirely),
//! and a common config that pins LIB_SUFFIX and the full
//! CMAKE_INSTALL_* family to the per-output prefixes. Generation always
//! goes through Ninja.

use std::path::Path;

use super::build_dir;
use crate::build::{argv, BuildEnv};
use crate::error::Result;

/// KDE's extra-cmake-modules, for packages that expect ECM on disk
pub(crate) const ECM_DIR: &str = "/pkg/main/kde-frameworks.extra-cmake-modules.core/share/ECM/cmake";

pub(crate) fn build(e: &mut BuildEnv) -> Result<()> {
    let inst = e.inst.clone();

    let rules = e.base.join("azusa_rules.cmake");
    e.backend
        .write_file(&rules, rules_file(e).as_bytes(), 0o644)?;

    let config = e.base.join("azusa_common_config.cmake");
    e.backend
        .write_file(&config, config_file(e, &rules).as_bytes(), 0o644)?;

    e.vars.set("ECM_DIR", ECM_DIR);

    // the recipe may point configuration at a subdirectory
    let root = match e.vars.get("CMAKE_ROOT") {
        "" => e.src()?,
        custom => std::path::PathBuf::from(custom),
    };

    let dir = build_dir(e)?;
    let cppflags = e.vars.get("CPPFLAGS").to_string();

    let mut cmd = argv([
        "cmake",
        &root.display().to_string(),
        "-C",
        &config.display().to_string(),
        "-G",
        "Ninja",
        "-Wno-dev",
        &format!("-DCMAKE_INSTALL_PREFIX={}", e.get_dir("core").display()),
        "-DCMAKE_BUILD_TYPE=Release",
        "-DBUILD_SHARED_LIBS=ON",
        &format!(
            "-DCMAKE_SYSTEM_INCLUDE_PATH={}",
            e.vars.get("CMAKE_SYSTEM_INCLUDE_PATH")
        ),
        &format!(
            "-DCMAKE_SYSTEM_LIBRARY_PATH={}",
            e.vars.get("CMAKE_SYSTEM_LIBRARY_PATH")
        ),
        &format!("-DCMAKE_C_FLAGS={cppflags}"),
        &format!("-DCMAKE_CXX_FLAGS={cppflags}"),
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

/// Compile-object overrides prefixing CPPFLAGS into every language
fn rules_file(e: &BuildEnv) -> String {
    let cpp = e.vars.get("CPPFLAGS");
    let fc = e.vars.get("FCFLAGS");
    let mut out = String::new();
    out.push_str(&format!(
        "set(CMAKE_ASM_COMPILE_OBJECT \"<CMAKE_ASM_COMPILER> <DEFINES> <INCLUDES> {cpp} <FLAGS> -o <OBJECT> -c <SOURCE>\" CACHE STRING \"ASM compile command\" FORCE)\n"
    ));
    out.push_str(&format!(
        "set(CMAKE_ASM-ATT_COMPILE_OBJECT \"<CMAKE_ASM-ATT_COMPILER> <DEFINES> <INCLUDES> {cpp} <FLAGS> -o <OBJECT> -c -x assembler <SOURCE>\" CACHE STRING \"ASM-ATT compile command\" FORCE)\n"
    ));
    out.push_str(
        "set(CMAKE_ASM-ATT_LINK_FLAGS \"-nostdlib\" CACHE STRING \"ASM-ATT link flags\" FORCE)\n",
    );
    out.push_str(&format!(
        "set(CMAKE_C_COMPILE_OBJECT \"<CMAKE_C_COMPILER> <DEFINES> <INCLUDES> {cpp} <FLAGS> -o <OBJECT> -c <SOURCE>\" CACHE STRING \"C compile command\" FORCE)\n"
    ));
    out.push_str(&format!(
        "set(CMAKE_CXX_COMPILE_OBJECT \"<CMAKE_CXX_COMPILER> <DEFINES> <INCLUDES> {cpp} <FLAGS> -o <OBJECT> -c <SOURCE>\" CACHE STRING \"C++ compile command\" FORCE)\n"
    ));
    out.push_str(&format!(
        "set(CMAKE_Fortran_COMPILE_OBJECT \"<CMAKE_Fortran_COMPILER> <DEFINES> <INCLUDES> {fc} <FLAGS> -o <OBJECT> -c <SOURCE>\" CACHE STRING \"Fortran compile command\" FORCE)\n"
    ));
    out
}

/// Install destinations pinned to the per-output prefixes
fn config_file(e: &BuildEnv, rules: &Path) -> String {
    let core = e.get_dir("core");
    let libs = e.get_dir("libs");
    let doc = e.get_dir("doc");
    let suffix = e.libsuffix();

    let mut out = String::new();
    out.push_str(&format!(
        "set(LIB_SUFFIX \"{suffix}\" CACHE STRING \"library path suffix\" FORCE)\n"
    ));
    out.push_str(&format!(
        "set(CMAKE_INSTALL_BINDIR \"{}/bin\" CACHE PATH \"\")\n",
        core.display()
    ));
    out.push_str(&format!(
        "set(CMAKE_INSTALL_DATADIR \"{}/share\" CACHE PATH \"\")\n",
        core.display()
    ));
    out.push_str(&format!(
        "set(CMAKE_INSTALL_LIBDIR \"{}/lib{suffix}\" CACHE PATH \"Output directory for libraries\")\n",
        libs.display()
    ));
    out.push_str(&format!(
        "set(CMAKE_INSTALL_DOCDIR \"{}\" CACHE PATH \"\")\n",
        doc.display()
    ));
    out.push_str(&format!(
        "set(CMAKE_INSTALL_INFODIR \"{}/info\" CACHE PATH \"\")\n",
        doc.display()
    ));
    out.push_str(&format!(
        "set(CMAKE_INSTALL_MANDIR \"{}/man\" CACHE PATH \"\")\n",
        doc.display()
    ));
    out.push_str(&format!(
        "set(CMAKE_USER_MAKE_RULES_OVERRIDE \"{}\" CACHE FILEPATH \"override rules\")\n",
        rules.display()
    ));
    out.push_str("set(BUILD_SHARED_LIBS ON CACHE BOOL \"\")\n");
    out
}
