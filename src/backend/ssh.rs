// src/backend/ssh.rs

//! Remote backend over a single multiplexed SSH connection
//!
//! One SSH session carries everything: an SFTP subchannel for file
//! operations and one exec channel per command. Environment propagation
//! does not use SSH Setenv (unreliable against the embedded dropbear
//! server); instead, commands go through the in-VM execproxy helper with a
//! length-prefixed argv/envp frame on stdin, falling back to a quoted
//! shell command when the helper is absent.

use ssh2::{Channel, OpenFlags, OpenType, Session};
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::Duration;
use tracing::{info, warn};

use super::{Backend, DirEntry, FileMeta};
use crate::error::{Error, Result};

/// Trusted helper that re-execs argv/envp frames read from stdin
pub const EXECPROXY_PATH: &str = "/pkg/main/sys-process.execproxy.core/libexec/execproxy";

/// Static shell used to power the VM off
const BUSYBOX_PATH: &str = "/pkg/main/sys-apps.busybox.core/bin/busybox";

/// Per-attempt SSH dial timeout
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// A shell fallback command longer than this is likely to be truncated by
/// the remote shell; the execproxy path has no such limit.
const SHELL_FALLBACK_WARN_LEN: usize = 64 * 1024;

/// Build environment reached over SSH, usually a disposable VM
pub struct SshBackend {
    session: Session,
    sftp: ssh2::Sftp,
    use_proxy: bool,
    uid: i64,
    /// VM process owned by this backend, powered off on close
    vm: RefCell<Option<Child>>,
}

impl SshBackend {
    /// Dial an already-running SSH endpoint and set up the SFTP subchannel
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| Error::Remote(format!("bad address {host}:{port}")))?;
        let tcp = TcpStream::connect_timeout(&addr, DIAL_TIMEOUT)?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        // the VM's root account has no password
        session.userauth_password("root", "")?;

        let sftp = session.sftp()?;
        let use_proxy = sftp.stat(Path::new(EXECPROXY_PATH)).is_ok();

        let mut backend = Self {
            session,
            sftp,
            use_proxy,
            uid: -1,
            vm: RefCell::new(None),
        };

        if let Ok(uname) = backend.capture(&["uname", "-a"]) {
            info!("ssh: ready, running {}", String::from_utf8_lossy(&uname).trim());
        }

        match backend.capture(&["/usr/bin/id", "-u"]) {
            Ok(out) => match String::from_utf8_lossy(&out).trim().parse::<i64>() {
                Ok(uid) => backend.uid = uid,
                Err(err) => {
                    warn!("ssh: failed to parse uid: {}", err);
                }
            },
            Err(err) => warn!("ssh: failed to get connected id: {}", err),
        }
        info!("ssh: running with uid={}", backend.uid);

        Ok(backend)
    }

    /// Adopt a VM process; it will be powered off when the backend closes
    pub(crate) fn attach_vm(&mut self, child: Child) {
        *self.vm.borrow_mut() = Some(child);
    }

    fn capture(&self, argv: &[&str]) -> Result<Vec<u8>> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        self.run_env(Path::new("/"), &argv, &[], Some(&mut out), None)?;
        Ok(out)
    }

    /// Drain stdout/stderr from the exec channel into the sinks. The
    /// session is switched to non-blocking so neither stream can stall the
    /// other while its window fills.
    fn drain(
        &self,
        channel: &mut Channel,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<()> {
        self.session.set_blocking(false);
        let result = (|| {
            let mut buf = [0u8; 8192];
            let mut out_done = false;
            let mut err_done = false;

            while !(out_done && err_done) {
                let mut progressed = false;

                if !out_done {
                    match channel.read(&mut buf) {
                        Ok(0) => out_done = true,
                        Ok(n) => {
                            out.write_all(&buf[..n])?;
                            progressed = true;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => return Err(Error::Io(e)),
                    }
                }

                if !err_done {
                    match channel.stderr().read(&mut buf) {
                        Ok(0) => err_done = true,
                        Ok(n) => {
                            err.write_all(&buf[..n])?;
                            progressed = true;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => return Err(Error::Io(e)),
                    }
                }

                if !progressed && !(out_done && err_done) {
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
            Ok(())
        })();
        self.session.set_blocking(true);
        result
    }
}

/// Quote one word for the remote shell, surviving embedded single quotes
fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn shell_quote_cmd(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compose the shell fallback: `cd '<dir>'; K='v' … 'argv'…`
fn compose_shell_command(dir: &Path, argv: &[String], env: &[String]) -> String {
    let mut cmd = shell_quote_cmd(&["cd".to_string(), dir.display().to_string()]);
    cmd.push(';');
    for entry in env {
        if let Some((key, value)) = entry.split_once('=') {
            cmd.push_str(key);
            cmd.push('=');
            cmd.push_str(&shell_quote(value));
            cmd.push(' ');
        }
    }
    cmd.push_str(&shell_quote_cmd(argv));
    cmd
}

/// Build the execproxy stdin frame:
/// `u32 BE body length | u8 argc | u8 envc | u8 resolve-full-path |
///  argv NUL-terminated | envp NUL-terminated`.
/// The CWD rides along as an extra `PWD=` env entry.
fn proxy_frame(dir: &Path, argv: &[String], env: &[String]) -> Vec<u8> {
    let mut envp: Vec<String> = env.to_vec();
    envp.push(format!("PWD={}", dir.display()));

    let mut body = Vec::new();
    body.push(argv.len() as u8);
    body.push(envp.len() as u8);
    body.push(0); // let execproxy resolve the program path itself
    for s in argv.iter().chain(envp.iter()) {
        body.extend_from_slice(s.as_bytes());
        body.push(0);
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

fn stat_to_meta(stat: &ssh2::FileStat) -> FileMeta {
    FileMeta::from_mode(stat.size.unwrap_or(0), stat.perm.unwrap_or(0))
}

impl Backend for SshBackend {
    fn base(&self) -> Result<PathBuf> {
        if self.uid == 0 {
            return Ok(PathBuf::from("/build"));
        }
        Ok(PathBuf::from(format!("/tmp/build-{}", self.uid)))
    }

    fn is_local(&self) -> bool {
        false
    }

    fn is_root(&self) -> bool {
        self.uid == 0
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
            .ok_or_else(|| Error::Config("empty command".to_string()))?
            .clone();

        let env_owned: Vec<String> = if env.is_empty() {
            vec!["HOME=/".to_string(), "PATH=/build/bin:/sbin:/bin".to_string()]
        } else {
            env.to_vec()
        };

        let mut channel = self.session.channel_session()?;

        if self.use_proxy {
            let frame = proxy_frame(dir, argv, &env_owned);
            channel.exec(EXECPROXY_PATH)?;
            channel.write_all(&frame)?;
            channel.send_eof()?;
        } else {
            let cmd = compose_shell_command(dir, argv, &env_owned);
            if cmd.len() > SHELL_FALLBACK_WARN_LEN {
                warn!(
                    "shell fallback command is {} bytes; environment may be truncated",
                    cmd.len()
                );
            }
            channel.exec(&cmd)?;
        }

        let mut stdout_fallback = io::stdout();
        let mut stderr_fallback = io::stderr();
        let out: &mut dyn Write = match stdout {
            Some(sink) => sink,
            None => &mut stdout_fallback,
        };
        let err: &mut dyn Write = match stderr {
            Some(sink) => sink,
            None => &mut stderr_fallback,
        };

        self.drain(&mut channel, out, err)?;

        channel.wait_close()?;
        let status = channel.exit_status()?;
        if status != 0 {
            return Err(Error::tool(program, Some(status)));
        }
        Ok(())
    }

    fn mkdir(&self, dir: &Path, mode: u32) -> Result<()> {
        self.sftp.mkdir(dir, mode as i32)?;
        Ok(())
    }

    fn mkdir_all(&self, dir: &Path, mode: u32) -> Result<()> {
        let mut current = PathBuf::from("/");
        for component in dir.components() {
            current.push(component);
            if current.as_os_str() == "/" {
                continue;
            }
            if self.sftp.stat(&current).is_err() {
                self.sftp.mkdir(&current, mode as i32)?;
            }
        }
        Ok(())
    }

    fn stat(&self, path: &Path) -> Result<FileMeta> {
        Ok(stat_to_meta(&self.sftp.stat(path)?))
    }

    fn lstat(&self, path: &Path) -> Result<FileMeta> {
        Ok(stat_to_meta(&self.sftp.lstat(path)?))
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.sftp.readlink(path)?)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut entries: Vec<DirEntry> = self
            .sftp
            .readdir(path)?
            .into_iter()
            .filter_map(|(child, stat)| {
                child.file_name().map(|name| DirEntry {
                    name: name.to_string_lossy().to_string(),
                    meta: stat_to_meta(&stat),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let mut file = self.sftp.open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        let mut file = self.sftp.open_mode(
            path,
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            mode as i32,
            OpenType::File,
        )?;
        file.write_all(data)?;
        Ok(())
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write>> {
        Ok(Box::new(self.sftp.create(path)?))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.sftp.rename(from, to, None)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let stat = self.sftp.lstat(path)?;
        if stat_to_meta(&stat).is_dir() {
            self.sftp.rmdir(path)?;
        } else {
            self.sftp.unlink(path)?;
        }
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        self.run_env(
            Path::new("/"),
            &[
                "rm".to_string(),
                "-fr".to_string(),
                path.display().to_string(),
            ],
            &[],
            None,
            None,
        )
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        self.sftp.symlink(target, link)?;
        Ok(())
    }

    fn walk_dir(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(&Path, &FileMeta) -> Result<()>,
    ) -> Result<()> {
        // every visited path is stat'ed (following links); traversal
        // itself descends only real directories
        let meta = self.stat(root)?;
        visit(root, &meta)?;
        if !meta.is_dir() {
            return Ok(());
        }

        let mut entries = self.sftp.readdir(root)?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (child, stat) in entries {
            if stat_to_meta(&stat).is_dir() {
                self.walk_dir(&child, visit)?;
            } else {
                let meta = self.stat(&child)?;
                visit(&child, &meta)?;
            }
        }
        Ok(())
    }

    fn find_files(&self, dir: &Path, patterns: &[&str]) -> Vec<PathBuf> {
        let mut argv = vec![
            "find".to_string(),
            dir.display().to_string(),
            "-type".to_string(),
            "f".to_string(),
            "(".to_string(),
        ];
        for (i, pattern) in patterns.iter().enumerate() {
            if i > 0 {
                argv.push("-o".to_string());
            }
            argv.push("-name".to_string());
            argv.push(pattern.to_string());
        }
        argv.push(")".to_string());
        argv.push("-print0".to_string());

        let mut out = Vec::new();
        if self
            .run_env(Path::new("/"), &argv, &[], Some(&mut out), None)
            .is_err()
        {
            return Vec::new();
        }

        let mut parts: Vec<&[u8]> = out.split(|b| *b == 0).collect();
        if parts.last().map(|p| p.is_empty()).unwrap_or(false) {
            parts.pop();
        }
        parts
            .into_iter()
            .map(|raw| {
                let path = PathBuf::from(String::from_utf8_lossy(raw).to_string());
                path.strip_prefix(dir)
                    .map(Path::to_path_buf)
                    .unwrap_or(path)
            })
            .collect()
    }

    fn put_file(&self, local: &Path, remote: &Path) -> Result<()> {
        info!(
            "Copying local file {} to {}",
            local.display(),
            remote.display()
        );
        let mut input = std::fs::File::open(local)?;
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            input.metadata()?.permissions().mode()
        };
        let mut output = self.sftp.open_mode(
            remote,
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            (mode & 0o7777) as i32,
            OpenType::File,
        )?;
        io::copy(&mut input, &mut output)?;
        Ok(())
    }

    fn get_file(&self, remote: &Path, local: &Path) -> Result<()> {
        info!(
            "Copying remote file {} to {}",
            remote.display(),
            local.display()
        );
        let mut input = self.sftp.open(remote)?;
        let mut output = std::fs::File::create(local)?;
        io::copy(&mut input, &mut output)?;

        if let Ok(stat) = self.sftp.stat(remote) {
            if let Some(perm) = stat.perm {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(
                    local,
                    std::fs::Permissions::from_mode(perm & 0o7777),
                );
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(mut child) = self.vm.borrow_mut().take() {
            // best effort; the VM also powers itself off after idling
            let _ = self.run_env(
                Path::new("/"),
                &[
                    BUSYBOX_PATH.to_string(),
                    "poweroff".to_string(),
                    "-f".to_string(),
                ],
                &[],
                None,
                None,
            );
            let _ = child.try_wait();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_compose_shell_command() {
        let cmd = compose_shell_command(
            Path::new("/build/work"),
            &["make".to_string(), "-j4".to_string()],
            &["CFLAGS=-O2 -g".to_string(), "PN=zlib".to_string()],
        );
        assert_eq!(
            cmd,
            "'cd' '/build/work';CFLAGS='-O2 -g' PN='zlib' 'make' '-j4'"
        );
    }

    #[test]
    fn test_proxy_frame_layout() {
        let frame = proxy_frame(
            Path::new("/tmp"),
            &["ls".to_string(), "-l".to_string()],
            &["PATH=/bin".to_string()],
        );

        // body: argc envc flag + "ls\0-l\0" + "PATH=/bin\0PWD=/tmp\0"
        let body_len = 3 + 3 + 3 + 10 + 9;
        assert_eq!(&frame[..4], &(body_len as u32).to_be_bytes());
        assert_eq!(frame.len(), 4 + body_len);
        assert_eq!(frame[4], 2); // argc
        assert_eq!(frame[5], 2); // envc: PATH + smuggled PWD
        assert_eq!(frame[6], 0); // resolve-full-path off

        let body = &frame[7..];
        let strings: Vec<&str> = body
            .split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| std::str::from_utf8(s).unwrap())
            .collect();
        assert_eq!(strings, vec!["ls", "-l", "PATH=/bin", "PWD=/tmp"]);
    }
}
