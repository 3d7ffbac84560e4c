// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are YAML files that describe how to build a package from source.
//! `build.yaml` holds the version list and the version-gated instruction
//! blocks; `metadata.yaml` holds the artifact records that pin every source
//! file by size and hash. Unknown fields are rejected at load time so recipe
//! typos surface before any download happens.

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::error::{Error, Result};

/// Build engine selecting the configure/compile/install toolchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Probe the source tree and pick an engine at build time
    #[default]
    Auto,
    Autoconf,
    Cmake,
    Meson,
    /// Run only the hook lists, no configure/compile/install
    None,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Engine::Auto => "auto",
            Engine::Autoconf => "autoconf",
            Engine::Cmake => "cmake",
            Engine::Meson => "meson",
            Engine::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// Version list for a package; order is significant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Versions {
    pub list: Vec<String>,
    /// Version marked stable for downstream consumers
    #[serde(default)]
    pub stable: String,
}

impl Versions {
    /// The default version to build: the last element of the list
    pub fn latest(&self) -> Option<&str> {
        self.list.last().map(|s| s.as_str())
    }
}

/// One version-gated block of build instructions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Instruction {
    /// Glob pattern matched against the requested version
    pub version: String,

    /// K=V assignments, in order; later entries may reference earlier ones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Library dependencies: `category/name[:version]` or pkg-config names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub import: Vec<String>,

    /// Source URLs; an entry may carry ` -> alias` to rename on disk
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<String>,

    /// Patch files relative to the recipe's `files/` directory
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<String>,

    #[serde(default, skip_serializing_if = "is_default_engine")]
    pub engine: Engine,

    /// Option tokens: `light`, `213`, `autoreconf`, `build_in_tree`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    /// Extra engine arguments, shell-expanded before use
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configure_pre: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configure_post: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compile_pre: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compile_post: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_pre: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_post: Vec<String>,
}

fn is_default_engine(engine: &Engine) -> bool {
    *engine == Engine::Auto
}

impl Instruction {
    /// Fallback instruction when no block matches the requested version
    pub fn auto() -> Self {
        Self {
            version: "*".to_string(),
            engine: Engine::Auto,
            ..Self::default()
        }
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// Pinned record for one source artifact
///
/// Once present, `size` and every recorded hash are immutable; a download
/// that disagrees aborts the build. New hash algorithms computed on a
/// matching artifact are appended, so the pin only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactRecord {
    pub size: u64,
    /// First successful capture; never rewritten afterwards
    pub added: DateTime<Utc>,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

/// Contents of `metadata.yaml`: the per-file artifact pins
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, ArtifactRecord>,
}

impl Metadata {
    /// Reconcile a freshly hashed artifact against its pinned record.
    ///
    /// First sighting creates the record. An existing record must agree on
    /// size and every already-pinned hash; hashes not yet recorded are
    /// appended. Returns whether the recipe must be rewritten.
    pub fn reconcile(
        &mut self,
        file: &str,
        size: u64,
        hashes: &BTreeMap<String, String>,
    ) -> Result<bool> {
        use std::collections::btree_map::Entry;

        let mut dirty = false;

        let record = match self.files.entry(file.to_string()) {
            Entry::Occupied(entry) => {
                let record = entry.into_mut();
                if record.size != size {
                    return Err(Error::SizeMismatch(file.to_string()));
                }
                record
            }
            Entry::Vacant(entry) => {
                dirty = true;
                entry.insert(ArtifactRecord {
                    size,
                    added: Utc::now(),
                    hashes: BTreeMap::new(),
                })
            }
        };

        for (algo, value) in hashes {
            match record.hashes.get(algo) {
                Some(pinned) if pinned != value => {
                    return Err(Error::HashMismatch {
                        file: file.to_string(),
                        algo: algo.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    record.hashes.insert(algo.clone(), value.clone());
                    dirty = true;
                }
            }
        }

        Ok(dirty)
    }
}

/// A package recipe: `build.yaml` plus its `metadata.yaml` sibling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    pub versions: Versions,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build: Vec<Instruction>,

    /// Legacy artifact records embedded in `build.yaml`; migrated into
    /// `metadata.yaml` on load and cleared here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, ArtifactRecord>>,

    /// `category/name`, bound at load time
    #[serde(skip)]
    pub pkgname: String,

    /// Unix timestamp of the recipe's last modification (SOURCE_DATE_EPOCH)
    #[serde(skip)]
    pub epoch: String,

    #[serde(skip)]
    pub meta: Metadata,
}

impl Recipe {
    /// Select the instruction block for a version: first glob match wins.
    ///
    /// A malformed pattern is skipped with a warning rather than aborting,
    /// so one bad block does not brick the whole recipe.
    pub fn instruction_for(&self, version: &str) -> Option<&Instruction> {
        for inst in &self.build {
            match Pattern::new(&inst.version) {
                Ok(pattern) if pattern.matches(version) => return Some(inst),
                Ok(_) => {}
                Err(err) => {
                    warn!("skipping instructions for version {}: {}", inst.version, err);
                }
            }
        }
        None
    }

    /// Serialize `build.yaml` and `metadata.yaml` contents
    pub fn export(&self) -> Result<(String, String)> {
        let build = serde_yaml::to_string(self)?;
        let meta = serde_yaml::to_string(&self.meta)?;
        Ok((build, meta))
    }

    /// Persist both recipe files into `dir`, sibling-then-rename so a
    /// crashed write never leaves a truncated recipe behind.
    pub fn save_to(&self, dir: &std::path::Path) -> Result<()> {
        let (build, meta) = self.export()?;
        for (name, data) in [("build.yaml", build), ("metadata.yaml", meta)] {
            let tmp = dir.join(format!("{name}~"));
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, dir.join(name))?;
        }
        Ok(())
    }

    /// Persist into the recipe repository under this package's directory
    pub fn save(&self) -> Result<()> {
        self.save_to(&crate::repo::repo_path().join(&self.pkgname))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RECIPE: &str = r#"
versions:
  list: ["1.2.13", "1.3"]
  stable: "1.2.13"
build:
  - version: "1.2.*"
    engine: autoconf
    source:
      - "https://zlib.net/zlib-${PV}.tar.gz"
    options: [light]
  - version: "*"
    source:
      - "https://zlib.net/zlib-${PV}.tar.gz"
"#;

    #[test]
    fn test_parse_recipe() {
        let recipe: Recipe = serde_yaml::from_str(SAMPLE_RECIPE).unwrap();
        assert_eq!(recipe.versions.list.len(), 2);
        assert_eq!(recipe.versions.latest(), Some("1.3"));
        assert_eq!(recipe.versions.stable, "1.2.13");
        assert_eq!(recipe.build.len(), 2);
        assert_eq!(recipe.build[0].engine, Engine::Autoconf);
        assert!(recipe.build[0].has_option("light"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let bad = r#"
versions:
  list: ["1.0"]
buidl:
  - version: "*"
"#;
        let parsed: std::result::Result<Recipe, _> = serde_yaml::from_str(bad);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_instruction_first_match_wins() {
        let recipe: Recipe = serde_yaml::from_str(SAMPLE_RECIPE).unwrap();

        let inst = recipe.instruction_for("1.2.13").unwrap();
        assert_eq!(inst.version, "1.2.*");
        assert_eq!(inst.engine, Engine::Autoconf);

        let inst = recipe.instruction_for("1.3").unwrap();
        assert_eq!(inst.version, "*");
        assert_eq!(inst.engine, Engine::Auto);
    }

    #[test]
    fn test_instruction_no_match() {
        let yaml = r#"
versions:
  list: ["2.0"]
build:
  - version: "1.*"
"#;
        let recipe: Recipe = serde_yaml::from_str(yaml).unwrap();
        assert!(recipe.instruction_for("2.0").is_none());
    }

    #[test]
    fn test_reconcile_first_sighting() {
        let mut meta = Metadata::default();
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), "abc".to_string());

        let dirty = meta.reconcile("zlib-1.3.tar.gz", 1500, &hashes).unwrap();
        assert!(dirty);

        let record = &meta.files["zlib-1.3.tar.gz"];
        assert_eq!(record.size, 1500);
        assert_eq!(record.hashes["sha256"], "abc");
    }

    #[test]
    fn test_reconcile_size_mismatch() {
        let mut meta = Metadata::default();
        let hashes = BTreeMap::new();
        meta.reconcile("f.tar.gz", 1500, &hashes).unwrap();

        let err = meta.reconcile("f.tar.gz", 1501, &hashes).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch(_)));
    }

    #[test]
    fn test_reconcile_hash_mismatch() {
        let mut meta = Metadata::default();
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), "abc".to_string());
        meta.reconcile("f.tar.gz", 1500, &hashes).unwrap();

        hashes.insert("sha256".to_string(), "def".to_string());
        let err = meta.reconcile("f.tar.gz", 1500, &hashes).unwrap_err();
        match err {
            Error::HashMismatch { file, algo } => {
                assert_eq!(file, "f.tar.gz");
                assert_eq!(algo, "sha256");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reconcile_pin_grows() {
        let mut meta = Metadata::default();
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), "abc".to_string());
        meta.reconcile("f.tar.gz", 1500, &hashes).unwrap();
        let added = meta.files["f.tar.gz"].added;

        // a new algorithm on a matching artifact is appended
        hashes.insert("sha3-256".to_string(), "fff".to_string());
        let dirty = meta.reconcile("f.tar.gz", 1500, &hashes).unwrap();
        assert!(dirty);
        assert_eq!(meta.files["f.tar.gz"].hashes.len(), 2);
        // first-seen timestamp is never rewritten
        assert_eq!(meta.files["f.tar.gz"].added, added);

        // unchanged pins are not dirty
        let dirty = meta.reconcile("f.tar.gz", 1500, &hashes).unwrap();
        assert!(!dirty);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut recipe: Recipe = serde_yaml::from_str(SAMPLE_RECIPE).unwrap();
        recipe.meta.files.insert(
            "zlib-1.3.tar.gz".to_string(),
            ArtifactRecord {
                size: 1500,
                added: Utc::now(),
                hashes: BTreeMap::new(),
            },
        );

        let (build, meta) = recipe.export().unwrap();
        let reloaded: Recipe = serde_yaml::from_str(&build).unwrap();
        let reloaded_meta: Metadata = serde_yaml::from_str(&meta).unwrap();

        assert_eq!(reloaded.versions.list, recipe.versions.list);
        assert_eq!(reloaded.build.len(), recipe.build.len());
        assert_eq!(reloaded_meta, recipe.meta);
    }
}
