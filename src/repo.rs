// src/repo.rs

//! Recipe repository access
//!
//! Recipes live in a git checkout under the user cache directory, one
//! directory per `<category>/<name>`. The checkout is cloned on first use
//! and refreshed with `git pull` by the `update` command. This module only
//! shells out to git; everything else reads the checkout as plain files.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::recipe::{convert, Metadata, Recipe};

/// Upstream recipe repository
pub const RECIPES_GIT_URL: &str = "https://github.com/AzusaOS/azusa-opensource-recipes.git";

/// Location of the recipe checkout: user cache directory, `/tmp` fallback
pub fn repo_path() -> PathBuf {
    let cache = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    cache.join("apkg-recipes")
}

/// Clone the recipe repository if it is not checked out yet
pub fn check_repo() -> Result<()> {
    let path = repo_path();
    if path.exists() {
        return Ok(());
    }

    info!("Repository not found, checking out...");
    let status = Command::new("git")
        .args(["clone", RECIPES_GIT_URL])
        .arg(&path)
        .status()?;
    if !status.success() {
        return Err(Error::tool("git clone", status.code()));
    }
    Ok(())
}

/// Pull the latest recipes
pub fn update_repo() -> Result<()> {
    let status = Command::new("git")
        .arg("pull")
        .current_dir(repo_path())
        .status()?;
    if !status.success() {
        return Err(Error::tool("git pull", status.code()));
    }
    Ok(())
}

/// A located package directory in the recipe repository
#[derive(Debug, Clone)]
pub struct Package {
    /// Full name, e.g. `sys-libs/zlib`
    pub name: String,
}

impl Package {
    /// Resolve a package argument: either `category/name` or a bare `name`
    /// searched across categories (ambiguity is an error).
    pub fn find(name: &str) -> Result<Package> {
        let repo = repo_path();
        info!("Using repository found in {}", repo.display());

        if name.contains('/') {
            if repo.join(name).is_dir() {
                return Ok(Package {
                    name: name.to_string(),
                });
            }
            return Err(Error::NotFound(name.to_string()));
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&repo)? {
            let entry = entry?;
            let category = entry.file_name().to_string_lossy().to_string();
            if category.starts_with('.') {
                continue;
            }
            if repo.join(&category).join(name).is_dir() {
                found.push(format!("{category}/{name}"));
            }
        }

        match found.len() {
            0 => Err(Error::NotFound(name.to_string())),
            1 => Ok(Package {
                name: found.remove(0),
            }),
            _ => Err(Error::Ambiguous {
                name: name.to_string(),
                candidates: found,
            }),
        }
    }

    /// `category` half of the name
    pub fn category(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    /// `name` half of the name
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Package directory inside the repository checkout
    pub fn dir(&self) -> PathBuf {
        repo_path().join(&self.name)
    }

    /// Load this package's recipe.
    ///
    /// Prefers `build.yaml` + `metadata.yaml`. When only legacy shell
    /// recipes exist, instructions are synthesized from them. A `files:`
    /// mapping still living in `build.yaml` is migrated to metadata and
    /// both files are rewritten.
    pub fn load_recipe(&self) -> Result<Recipe> {
        let dir = self.dir();
        let build_path = dir.join("build.yaml");

        let mut recipe = if build_path.exists() {
            let text = fs::read_to_string(&build_path)?;
            let mut recipe: Recipe = serde_yaml::from_str(&text)?;
            recipe.pkgname = self.name.clone();

            let meta_path = dir.join("metadata.yaml");
            if meta_path.exists() {
                recipe.meta = serde_yaml::from_str(&fs::read_to_string(&meta_path)?)?;
                recipe.files = None;
            } else if let Some(files) = recipe.files.take() {
                recipe.meta = Metadata { files };
            }

            // write-through normalizes both files on disk
            recipe.save_to(&dir)?;
            recipe.epoch = recipe_epoch(&dir, "build.yaml");
            recipe
        } else {
            let mut recipe = convert::synthesize_recipe(&dir, self.short_name())?;
            recipe.pkgname = self.name.clone();
            let latest = recipe
                .versions
                .latest()
                .ok_or_else(|| Error::Config(format!("no versions defined for {}", self.name)))?
                .to_string();
            recipe.epoch = recipe_epoch(&dir, &format!("{}-{}.sh", self.short_name(), latest));
            recipe
        };

        if recipe.versions.list.is_empty() {
            return Err(Error::Config(format!(
                "no versions defined for {}",
                self.name
            )));
        }

        recipe.pkgname = self.name.clone();
        Ok(recipe)
    }
}

/// Commit time of the recipe file, reproduced as SOURCE_DATE_EPOCH.
///
/// Falls back to "0" (with a warning) outside a git checkout.
fn recipe_epoch(dir: &std::path::Path, file: &str) -> String {
    let output = Command::new("git")
        .args(["log", "-1", "--pretty=%ct"])
        .arg(file)
        .current_dir(dir)
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let epoch = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if epoch.is_empty() {
                warn!("no commit found for {}, using epoch 0", file);
                "0".to_string()
            } else {
                epoch
            }
        }
        _ => {
            warn!("failed to read commit date for {}, using epoch 0", file);
            "0".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_name_parts() {
        let pkg = Package {
            name: "sys-libs/zlib".to_string(),
        };
        assert_eq!(pkg.category(), "sys-libs");
        assert_eq!(pkg.short_name(), "zlib");
    }

    #[test]
    fn test_epoch_fallback_outside_git() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(recipe_epoch(dir.path(), "build.yaml"), "0");
    }
}
