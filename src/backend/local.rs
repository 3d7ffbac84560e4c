// src/backend/local.rs

//! Local backend: direct OS calls on the host filesystem

use glob::Pattern;
use nix::unistd::{access, AccessFlags, Uid};
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use walkdir::WalkDir;

use super::{Backend, DirEntry, FileMeta};
use crate::error::{Error, Result};

/// Build environment backed by the host
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn meta_from(meta: &fs::Metadata) -> FileMeta {
    FileMeta::from_mode(meta.len(), meta.mode())
}

/// Hardlink when possible, else copy preserving mode
pub(crate) fn clone_file(src: &Path, dst: &Path) -> io::Result<()> {
    if fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }

    let mut input = File::open(src)?;
    let mut output = File::create(dst)?;
    io::copy(&mut input, &mut output)?;

    let meta = input.metadata()?;
    fs::set_permissions(dst, meta.permissions())?;
    Ok(())
}

impl Backend for LocalBackend {
    fn base(&self) -> Result<PathBuf> {
        if access(Path::new("/build"), AccessFlags::W_OK).is_ok() {
            return Ok(PathBuf::from("/build"));
        }
        // can't use /build
        match std::env::var_os("HOME") {
            Some(home) => Ok(PathBuf::from(home).join("tmp").join("build")),
            None => Ok(PathBuf::from(format!(
                "/tmp/build-{}",
                Uid::current().as_raw()
            ))),
        }
    }

    fn is_local(&self) -> bool {
        true
    }

    fn is_root(&self) -> bool {
        Uid::effective().is_root()
    }

    fn run_env(
        &self,
        dir: &Path,
        argv: &[String],
        env: &[String],
        stdout: Option<&mut dyn Write>,
        stderr: Option<&mut dyn Write>,
    ) -> Result<()> {
        let program = argv
            .first()
            .ok_or_else(|| Error::Config("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(&argv[1..]).current_dir(dir).env_clear();
        for entry in env {
            if let Some((key, value)) = entry.split_once('=') {
                cmd.env(key, value);
            }
        }

        cmd.stdout(if stdout.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        cmd.stderr(if stderr.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });

        let child = cmd.spawn()?;
        let output = child.wait_with_output()?;

        if let Some(sink) = stdout {
            sink.write_all(&output.stdout)?;
        }
        if let Some(sink) = stderr {
            sink.write_all(&output.stderr)?;
        }

        if !output.status.success() {
            return Err(Error::tool(program.clone(), output.status.code()));
        }
        Ok(())
    }

    fn mkdir(&self, dir: &Path, mode: u32) -> Result<()> {
        DirBuilder::new().mode(mode).create(dir)?;
        Ok(())
    }

    fn mkdir_all(&self, dir: &Path, mode: u32) -> Result<()> {
        DirBuilder::new().recursive(true).mode(mode).create(dir)?;
        Ok(())
    }

    fn stat(&self, path: &Path) -> Result<FileMeta> {
        Ok(meta_from(&fs::metadata(path)?))
    }

    fn lstat(&self, path: &Path) -> Result<FileMeta> {
        Ok(meta_from(&fs::symlink_metadata(path)?))
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf> {
        Ok(fs::read_link(path)?)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                meta: meta_from(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)?;
        file.write_all(data)?;
        // the mode in open() only applies to newly created files
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write>> {
        Ok(Box::new(File::create(path)?))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Ok(fs::rename(from, to)?)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        Ok(std::os::unix::fs::symlink(target, link)?)
    }

    fn walk_dir(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(&Path, &FileMeta) -> Result<()>,
    ) -> Result<()> {
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|err| Error::Io(err.into()))?;
            let meta = entry
                .metadata()
                .map_err(|err| Error::Io(err.into()))?;
            visit(entry.path(), &meta_from(&meta))?;
        }
        Ok(())
    }

    fn find_files(&self, dir: &Path, patterns: &[&str]) -> Vec<PathBuf> {
        let compiled: Vec<Pattern> = patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();

        let mut found = Vec::new();
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let base = entry.file_name().to_string_lossy();
            if compiled.iter().any(|p| p.matches(&base)) {
                let path = entry
                    .path()
                    .strip_prefix(dir)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| entry.path().to_path_buf());
                found.push(path);
            }
        }
        found
    }

    fn put_file(&self, local: &Path, remote: &Path) -> Result<()> {
        if local == remote {
            return Ok(());
        }
        clone_file(local, remote)?;
        Ok(())
    }

    fn get_file(&self, remote: &Path, local: &Path) -> Result<()> {
        if remote == local {
            return Ok(());
        }
        clone_file(remote, local)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_files_matches_basenames_only() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("lib64");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("libz.la"), b"").unwrap();
        fs::write(sub.join("libz.so"), b"").unwrap();
        fs::write(dir.path().join("config.sub"), b"").unwrap();

        let backend = LocalBackend::new();
        let mut found = backend.find_files(dir.path(), &["*.la", "config.sub"]);
        found.sort();

        assert_eq!(
            found,
            vec![PathBuf::from("config.sub"), PathBuf::from("lib64/libz.la")]
        );

        // patterns with path separators match nothing
        let found = backend.find_files(dir.path(), &["lib64/*.la"]);
        assert!(found.is_empty());
    }

    #[test]
    fn test_run_env_captures_stdout() {
        let backend = LocalBackend::new();
        let mut out = Vec::new();
        backend
            .run_env(
                Path::new("/"),
                &["/bin/sh".to_string(), "-c".to_string(), "echo hi".to_string()],
                &["PATH=/usr/bin:/bin".to_string()],
                Some(&mut out),
                None,
            )
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hi");
    }

    #[test]
    fn test_run_env_env_is_replacement() {
        let backend = LocalBackend::new();
        let mut out = Vec::new();
        backend
            .run_env(
                Path::new("/"),
                &[
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    "echo \"$FOO:$HOME\"".to_string(),
                ],
                &["PATH=/usr/bin:/bin".to_string(), "FOO=bar".to_string()],
                Some(&mut out),
                None,
            )
            .unwrap();
        // HOME is not inherited from the driver process
        assert_eq!(String::from_utf8_lossy(&out).trim(), "bar:");
    }

    #[test]
    fn test_run_env_nonzero_exit_is_error() {
        let backend = LocalBackend::new();
        let err = backend
            .run_env(
                Path::new("/"),
                &["/bin/sh".to_string(), "-c".to_string(), "exit 3".to_string()],
                &[],
                None,
                None,
            )
            .unwrap_err();
        match err {
            Error::Tool { code, .. } => assert_eq!(code, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_put_file_preserves_mode() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tool");
        fs::write(&src, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o755)).unwrap();

        let dst = dir.path().join("tool-copy");
        let backend = LocalBackend::new();
        backend.put_file(&src, &dst).unwrap();

        let meta = backend.stat(&dst).unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.mode & 0o111, 0o111);
    }
}
