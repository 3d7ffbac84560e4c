// src/engine/none.rs

//! Hooks-only adapter: no configure, compile or install of its own.
//! Recipes that drive everything from hook commands run them at the
//! source root.

use crate::build::BuildEnv;
use crate::error::Result;

pub(crate) fn build(e: &mut BuildEnv) -> Result<()> {
    let inst = e.inst.clone();
    let dir = e.src()?;

    e.run_many_in(&dir, &inst.configure_pre)?;
    e.run_many_in(&dir, &inst.configure_post)?;
    e.run_many_in(&dir, &inst.compile_pre)?;
    e.run_many_in(&dir, &inst.compile_post)?;
    e.run_many_in(&dir, &inst.install_pre)?;
    e.run_many_in(&dir, &inst.install_post)?;

    Ok(())
}
