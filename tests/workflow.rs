// tests/workflow.rs

//! End-to-end recipe workflow over a temporary repository checkout:
//! lookup, legacy conversion, YAML loading, pin migration and instruction
//! selection, all through the public API.

use std::fs;

use apkg_build::recipe::convert;
use apkg_build::repo::{self, Package};
use apkg_build::{Engine, Error};

const SHELL_RECIPE: &str = r#"#!/bin/bash
source ../../common/init.sh

get https://zlib.net/zlib-1.3.tar.gz
acheck

doconf --enable-shared

make -j4
make install
"#;

const BUILD_YAML_WITH_LEGACY_FILES: &str = r#"
versions:
  list: ["1.2.13", "1.3"]
  stable: "1.3"
build:
  - version: "1.2.*"
    engine: autoconf
    options: ["light"]
    source: ["https://zlib.net/zlib-${PV}.tar.gz"]
  - version: "*"
    engine: autoconf
    source: ["https://zlib.net/zlib-${PV}.tar.gz"]
files:
  zlib-1.3.tar.gz:
    size: 1500
    added: 2024-01-15T10:00:00Z
    hashes:
      sha256: abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789
"#;

#[test]
fn test_repository_workflow() {
    let cache = tempfile::tempdir().unwrap();
    std::env::set_var("XDG_CACHE_HOME", cache.path());

    let repo_dir = repo::repo_path();
    assert!(repo_dir.starts_with(cache.path()));

    // --- legacy shell recipe: found, synthesized, converted ---

    let zlib_dir = repo_dir.join("app-arch/zlib");
    fs::create_dir_all(&zlib_dir).unwrap();
    fs::write(zlib_dir.join("zlib-1.3.sh"), SHELL_RECIPE).unwrap();

    let pkg = Package::find("zlib").unwrap();
    assert_eq!(pkg.name, "app-arch/zlib");
    assert_eq!(pkg.category(), "app-arch");
    assert_eq!(pkg.short_name(), "zlib");

    let recipe = pkg.load_recipe().unwrap();
    assert_eq!(recipe.versions.list, vec!["1.3"]);
    let inst = recipe.instruction_for("1.3").unwrap();
    assert_eq!(inst.engine, Engine::Autoconf);
    assert_eq!(inst.source, vec!["https://zlib.net/zlib-1.3.tar.gz"]);
    assert_eq!(inst.arguments, vec!["--enable-shared"]);

    // the converter writes a build.yaml the loader then prefers
    convert::convert_package(&zlib_dir).unwrap();
    assert!(zlib_dir.join("build.yaml").exists());
    let converted = pkg.load_recipe().unwrap();
    assert_eq!(converted.build.len(), 1);
    assert_eq!(converted.build[0].version, "*");

    // --- YAML recipe with an embedded legacy files: mapping ---

    let bzip_dir = repo_dir.join("app-arch/bzip2");
    fs::create_dir_all(&bzip_dir).unwrap();
    fs::write(bzip_dir.join("build.yaml"), BUILD_YAML_WITH_LEGACY_FILES).unwrap();

    let pkg = Package::find("app-arch/bzip2").unwrap();
    let recipe = pkg.load_recipe().unwrap();

    // the pin migrated into metadata
    let record = &recipe.meta.files["zlib-1.3.tar.gz"];
    assert_eq!(record.size, 1500);
    assert_eq!(record.hashes["sha256"].len(), 64);

    // and the rewritten build.yaml no longer embeds it
    assert!(bzip_dir.join("metadata.yaml").exists());
    let rewritten = fs::read_to_string(bzip_dir.join("build.yaml")).unwrap();
    assert!(!rewritten.contains("files:"));

    // instruction selection is first-match over declared order
    assert_eq!(
        recipe.instruction_for("1.2.13").unwrap().options,
        vec!["light"]
    );
    assert!(recipe.instruction_for("1.3").unwrap().options.is_empty());

    // --- ambiguity: the same bare name in two categories ---

    let other = repo_dir.join("sys-libs/zlib");
    fs::create_dir_all(&other).unwrap();
    match Package::find("zlib") {
        Err(Error::Ambiguous { candidates, .. }) => {
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }

    // a qualified name still resolves
    assert!(Package::find("app-arch/zlib").is_ok());
    assert!(matches!(
        Package::find("app-arch/nope"),
        Err(Error::NotFound(_))
    ));
}
