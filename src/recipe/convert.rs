// src/recipe/convert.rs

//! Legacy shell recipe converter
//!
//! Older packages ship one `<name>-<version>.sh` build script per version
//! instead of `build.yaml`. This module extracts the declarative parts of
//! those scripts line by line: source URL, imports, patches, engine choice,
//! environment exports and hook commands. The result either feeds a build
//! directly (synthesized instructions) or is written out as `build.yaml`
//! by the `convert` command.

use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::recipe::{Engine, Instruction, Recipe, Versions};

/// Declarative content extracted from one shell build script
#[derive(Debug, Clone, Default)]
pub struct ShellScript {
    pub version: String,
    pub source_url: String,
    pub engine: Option<Engine>,
    pub options: Vec<String>,
    pub arguments: Vec<String>,
    pub import: Vec<String>,
    pub patches: Vec<String>,
    pub env: Vec<String>,
    pub configure_pre: Vec<String>,
    pub compile_pre: Vec<String>,
    pub install_post: Vec<String>,
}

impl ShellScript {
    fn into_instruction(self) -> Instruction {
        Instruction {
            version: self.version,
            engine: self.engine.unwrap_or(Engine::Auto),
            options: self.options,
            arguments: self.arguments,
            import: self.import,
            patches: self.patches,
            env: self.env,
            source: if self.source_url.is_empty() {
                Vec::new()
            } else {
                vec![self.source_url]
            },
            configure_pre: self.configure_pre,
            compile_pre: self.compile_pre,
            install_post: self.install_post,
            ..Instruction::default()
        }
    }
}

/// Parse one `<name>-<version>.sh` script
pub fn parse_shell_script(path: &Path, pkg_name: &str) -> Result<ShellScript> {
    let text = fs::read_to_string(path)?;
    let mut script = ShellScript::default();

    // version comes from the filename
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if let Some(rest) = base.strip_prefix(&format!("{pkg_name}-")) {
        if let Some(version) = rest.strip_suffix(".sh") {
            script.version = version.to_string();
        }
    }

    let quoted_filesdir = Regex::new(r#""\$\{?FILESDIR\}?/([^"]+)""#).expect("valid regex");
    let bare_filesdir = Regex::new(r#"<\s*"?\$\{?FILESDIR\}?/([^"\s]+)"?"#).expect("valid regex");
    let cmake_root = Regex::new(r#"CMAKE_ROOT=["']?([^"'\s]+)["']?"#).expect("valid regex");

    let lines: Vec<&str> = text.lines().collect();
    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("source ") || line == "acheck" {
            continue;
        }

        if let Some(rest) = line
            .strip_prefix("get ")
            .or_else(|| line.strip_prefix("download "))
        {
            if let Some(url) = rest.split_whitespace().next() {
                script.source_url = url.to_string();
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("importpkg ") {
            script.import.extend(rest.split_whitespace().map(String::from));
            continue;
        }

        if line.starts_with("apatch ") {
            for cap in quoted_filesdir.captures_iter(line) {
                script.patches.push(cap[1].to_string());
            }
            continue;
        }

        if line.starts_with("patch ") && line.contains('<') {
            if let Some(cap) = bare_filesdir.captures(line) {
                script.patches.push(cap[1].to_string());
            }
            continue;
        }

        // the specific doconf variants must win over the plain prefix
        if line.starts_with("doconflight") {
            script.engine = Some(Engine::Autoconf);
            script.options.push("light".to_string());
            script
                .arguments
                .extend(extract_arguments(line, "doconflight"));
            continue;
        }
        if line.starts_with("doconf213") {
            script.engine = Some(Engine::Autoconf);
            script.options.push("213".to_string());
            script.arguments.extend(extract_arguments(line, "doconf213"));
            continue;
        }
        if line.starts_with("doconf") {
            script.engine = Some(Engine::Autoconf);
            script.arguments.extend(extract_arguments(line, "doconf"));
            continue;
        }

        if line.contains("docmake") {
            script.engine = Some(Engine::Cmake);
            if let Some(cap) = cmake_root.captures(line) {
                script.env.push(format!("CMAKE_ROOT={}", &cap[1]));
            }
            script.arguments.extend(extract_arguments(line, "docmake"));
            continue;
        }

        if line.starts_with("domeson") {
            script.engine = Some(Engine::Meson);
            script.arguments.extend(extract_arguments(line, "domeson"));
            continue;
        }

        if line == "aautoreconf" || line.starts_with("aautoreconf ") {
            script.options.push("autoreconf".to_string());
            continue;
        }

        if let Some(rest) = line.strip_prefix("export ") {
            script.env.push(rest.to_string());
            continue;
        }

        if line.starts_with("sed ") {
            script.configure_pre.push(line.to_string());
            continue;
        }

        // symlinks set up before the build prepare the source tree; the
        // same command after the midpoint is post-install fixup instead
        if line.starts_with("ln ") && i <= lines.len() / 2 {
            // make sure the link target's parent exists first
            let parts: Vec<&str> = line.split_whitespace().collect();
            if let Some(target) = parts.last() {
                let dir = Path::new(target)
                    .parent()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !dir.is_empty() && dir != "." {
                    script.configure_pre.push(format!("mkdir -p {dir}"));
                }
            }
            script.configure_pre.push(line.to_string());
            continue;
        }

        if line.starts_with("make ") && !line.contains("install") {
            if line != "make" && !line.starts_with("make -j") {
                script.compile_pre.push(line.to_string());
            }
            continue;
        }

        if line == "finalize"
            || line.starts_with("cd ")
            || line == "make"
            || line.starts_with("make install")
            || line.starts_with("make -j")
        {
            continue;
        }

        // trailing file shuffling after the script midpoint is usually
        // post-install fixup
        if i > lines.len() / 2
            && !line.starts_with("if ")
            && !line.starts_with("fi")
            && !line.starts_with("for ")
            && !line.starts_with("done")
            && !line.starts_with("else")
            && (line.starts_with("ln ")
                || line.starts_with("mkdir ")
                || line.starts_with("cp ")
                || line.starts_with("mv ")
                || line.starts_with("install "))
        {
            script.install_post.push(line.to_string());
        }
    }

    Ok(script)
}

/// Split arguments after `cmd`, honoring quotes
fn extract_arguments(line: &str, cmd: &str) -> Vec<String> {
    let rest = match line.find(cmd) {
        Some(pos) => line[pos + cmd.len()..].trim(),
        None => line,
    };
    if rest.is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in rest.chars() {
        if c == '"' || c == '\'' {
            in_quote = !in_quote;
        } else if c == ' ' && !in_quote {
            if !current.is_empty() {
                args.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Collect and parse every `<name>-*.sh` script in a package directory,
/// sorted by filename.
fn collect_scripts(pkg_dir: &Path, pkg_name: &str) -> Result<Vec<ShellScript>> {
    let mut names: Vec<String> = fs::read_dir(pkg_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".sh") && n.starts_with(&format!("{pkg_name}-")))
        .collect();
    names.sort();

    let mut scripts = Vec::new();
    for name in names {
        let path = pkg_dir.join(&name);
        match parse_shell_script(&path, pkg_name) {
            Ok(script) => scripts.push(script),
            Err(err) => warn!("failed to parse {}: {}", path.display(), err),
        }
    }
    Ok(scripts)
}

/// Synthesize a full recipe from legacy shell scripts, one instruction per
/// version, for building without a `build.yaml`.
pub fn synthesize_recipe(pkg_dir: &Path, pkg_name: &str) -> Result<Recipe> {
    let scripts = collect_scripts(pkg_dir, pkg_name)?;
    if scripts.is_empty() {
        return Err(Error::NotFound(format!(
            "no build.yaml or shell recipes in {}",
            pkg_dir.display()
        )));
    }

    let versions: Vec<String> = scripts.iter().map(|s| s.version.clone()).collect();
    let stable = versions.last().cloned().unwrap_or_default();

    info!(
        "Converted {} shell build scripts for {}",
        scripts.len(),
        pkg_name
    );

    Ok(Recipe {
        versions: Versions {
            list: versions,
            stable,
        },
        build: scripts.into_iter().map(|s| s.into_instruction()).collect(),
        files: None,
        pkgname: String::new(),
        epoch: "0".to_string(),
        meta: Default::default(),
    })
}

/// Convert a package directory's shell scripts into a `build.yaml`.
///
/// The latest script templates the single instruction block, gated on `*`.
pub fn convert_package(pkg_dir: &Path) -> Result<()> {
    let pkg_name = pkg_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::Config(format!("bad package path {}", pkg_dir.display())))?;

    let mut scripts = collect_scripts(pkg_dir, &pkg_name)?;
    if scripts.is_empty() {
        return Err(Error::NotFound(format!(
            "no shell scripts found in {}",
            pkg_dir.display()
        )));
    }
    scripts.sort_by(|a, b| a.version.cmp(&b.version));

    let versions: Vec<String> = scripts.iter().map(|s| s.version.clone()).collect();
    let stable = versions.last().cloned().unwrap_or_default();

    let latest = scripts.pop().expect("scripts checked non-empty");
    let mut instruction = latest.into_instruction();
    instruction.version = "*".to_string();

    let recipe = Recipe {
        versions: Versions {
            list: versions,
            stable,
        },
        build: vec![instruction],
        files: None,
        pkgname: String::new(),
        epoch: "0".to_string(),
        meta: Default::default(),
    };

    let data = serde_yaml::to_string(&recipe)?;
    let tmp = pkg_dir.join("build.yaml~");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, pkg_dir.join("build.yaml"))?;

    info!("Created {}", pkg_dir.join("build.yaml").display());
    Ok(())
}

/// Walk the repository and convert every package that has shell scripts
/// but no `build.yaml` yet. `limit` of 0 means no limit.
pub fn convert_all(repo: &Path, limit: usize) -> Result<usize> {
    let mut converted = 0;

    'outer: for category in sorted_dirs(repo)? {
        if category
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true)
        {
            continue;
        }
        for pkg_dir in sorted_dirs(&category)? {
            if pkg_dir.join("build.yaml").exists() {
                continue;
            }
            let pkg_name = match pkg_dir.file_name() {
                Some(name) => name.to_string_lossy().to_string(),
                None => continue,
            };
            let has_scripts = fs::read_dir(&pkg_dir)?
                .filter_map(|e| e.ok())
                .any(|e| {
                    let name = e.file_name().to_string_lossy().to_string();
                    name.starts_with(&format!("{pkg_name}-")) && name.ends_with(".sh")
                });
            if !has_scripts {
                continue;
            }

            info!(
                "Converting {}...",
                pkg_dir.strip_prefix(repo).unwrap_or(&pkg_dir).display()
            );
            match convert_package(&pkg_dir) {
                Ok(()) => converted += 1,
                Err(err) => warn!("conversion failed: {}", err),
            }

            if limit > 0 && converted >= limit {
                break 'outer;
            }
        }
    }

    info!("Converted {} packages", converted);
    Ok(converted)
}

fn sorted_dirs(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut dirs: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}
