// src/build/download.rs

//! Source cache, mirror fallback and hash pinning
//!
//! Sources are fetched into a process-wide cache, preferring the project
//! mirror over the declared upstream. Every artifact is hashed under all
//! pinned algorithms in one pass and reconciled against the recipe's
//! metadata: a changed upstream can never slip past an existing pin.

use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{argv, BuildEnv};
use crate::error::{Error, Result};
use crate::hash;

/// Process-wide source artifact cache
pub const CACHE_DIR: &str = "/tmp/apkg-data";

/// Project mirror tried before the upstream URL
pub const MIRROR_BASE: &str = "https://pkg.azusa.jp";

/// Mirror-upload channel for artifacts the mirror did not have
const MIRROR_BUCKET: &str = "s3://azusa-pkg";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

impl BuildEnv {
    /// Fetch, pin and unpack every declared source
    pub(crate) fn download(&mut self) -> Result<()> {
        let cache_dir = Path::new(CACHE_DIR);

        for entry in self.inst.source.clone() {
            let expanded = self.vars.expand(&entry);
            let (url, file_name) = split_alias(&expanded);

            let target = cache_dir.join(&file_name);
            let mirror_url = format!(
                "{MIRROR_BASE}/src/main/{}/{}/{}",
                self.category, self.name, file_name
            );

            let mut needs_upload = false;
            if fs::metadata(&target).is_err() {
                fs::create_dir_all(cache_dir)?;
                if let Err(err) = fetch(&mirror_url, &target) {
                    debug!("mirror miss for {}: {}", file_name, err);
                    needs_upload = true;
                    fetch(&url, &target)?;
                }
            }

            info!("Checking {}", file_name);
            let size = fs::metadata(&target)?.len();
            let hashes = hash::hash_file(&target)?;

            if self.recipe.meta.reconcile(&file_name, size, &hashes)? {
                self.recipe.save()?;
            }

            if needs_upload {
                upload_to_mirror(&target, &self.category, &self.name, &file_name);
            }

            self.backend
                .put_file(&target, &self.workdir.join(&file_name))?;
            self.extract(&file_name)?;
        }

        Ok(())
    }

    /// Try to unpack an artifact by suffix. Extraction failure is logged
    /// and the pipeline continues; the recipe may use the raw file.
    fn extract(&mut self, file_name: &str) -> Result<()> {
        let Some(cmd) = extract_command(file_name) else {
            return Ok(());
        };

        info!("attempting to extract file...");
        let workdir = self.workdir.clone();
        if let Err(err) = self.run_in(&workdir, &cmd) {
            warn!("Failed: {}", err);
        }

        // adopt the first directory under work as the source root; with
        // several archives that is listing-order dependent, so such
        // recipes should bind S explicitly
        if self.src.is_none() {
            if let Ok(entries) = self.backend.read_dir(&self.workdir) {
                for entry in entries {
                    if entry.meta.is_dir() {
                        let src = self.workdir.join(&entry.name);
                        self.set_src(src);
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Split an optional ` -> alias` rename off a source entry
fn split_alias(entry: &str) -> (String, String) {
    if let Some((url, alias)) = entry.split_once(" -> ") {
        return (url.to_string(), alias.to_string());
    }
    let name = entry.rsplit('/').next().unwrap_or(entry);
    (entry.to_string(), name.to_string())
}

fn quick_match(pattern: &str, name: &str) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches(name))
        .unwrap_or(false)
}

/// Extraction command for a cached artifact, by filename suffix
fn extract_command(file_name: &str) -> Option<Vec<String>> {
    if quick_match("*.zip", file_name) {
        Some(argv(["unzip", "-q", file_name]))
    } else if quick_match("*.tar.*", file_name)
        || quick_match("*.tgz", file_name)
        || quick_match("*.tbz2", file_name)
    {
        Some(argv(["tar", "xf", file_name]))
    } else if quick_match("*.gz", file_name) {
        Some(argv(["gunzip", file_name]))
    } else if quick_match("*.xz", file_name) {
        Some(argv(["xz", "-d", file_name]))
    } else {
        None
    }
}

/// Download `url` to `target`, writing a `~` sibling first so the cache
/// never holds a partial artifact.
fn fetch(url: &str, target: &Path) -> Result<()> {
    info!("Attempting to download: {}", url);

    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    let mut response = client.get(url).send()?;
    if !response.status().is_success() {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let partial = PathBuf::from(format!("{}~", target.display()));
    let mut out = fs::File::create(&partial)?;
    io::copy(&mut response, &mut out)?;
    drop(out);
    fs::rename(&partial, target)?;
    Ok(())
}

/// Push an artifact the mirror was missing. Best effort: failure is
/// logged, never fatal.
fn upload_to_mirror(target: &Path, category: &str, name: &str, file_name: &str) {
    let dest = format!("{MIRROR_BUCKET}/src/main/{category}/{name}/{file_name}");
    match Command::new("aws")
        .args(["s3", "cp"])
        .arg(target)
        .arg(&dest)
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("mirror upload of {} exited with {}", file_name, status),
        Err(err) => warn!("mirror upload of {} failed: {}", file_name, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_alias() {
        let (url, name) = split_alias("https://zlib.net/zlib-1.3.tar.gz");
        assert_eq!(url, "https://zlib.net/zlib-1.3.tar.gz");
        assert_eq!(name, "zlib-1.3.tar.gz");

        let (url, name) = split_alias("https://example.com/v1.3 -> zlib-1.3.tar.gz");
        assert_eq!(url, "https://example.com/v1.3");
        assert_eq!(name, "zlib-1.3.tar.gz");
    }

    #[test]
    fn test_extract_command_by_suffix() {
        assert_eq!(
            extract_command("a.zip"),
            Some(argv(["unzip", "-q", "a.zip"]))
        );
        assert_eq!(
            extract_command("a.tar.gz"),
            Some(argv(["tar", "xf", "a.tar.gz"]))
        );
        assert_eq!(
            extract_command("a.tar.xz"),
            Some(argv(["tar", "xf", "a.tar.xz"]))
        );
        assert_eq!(
            extract_command("a.tgz"),
            Some(argv(["tar", "xf", "a.tgz"]))
        );
        assert_eq!(extract_command("a.gz"), Some(argv(["gunzip", "a.gz"])));
        assert_eq!(extract_command("a.xz"), Some(argv(["xz", "-d", "a.xz"])));
        assert_eq!(extract_command("a.patch"), None);
    }
}
