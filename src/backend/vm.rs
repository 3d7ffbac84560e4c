// src/backend/vm.rs

//! Disposable build VM bring-up
//!
//! The VM boots a known kernel with an initramfs derived deterministically
//! from the kernel's modules directory plus four injected files: the `init`
//! script (arch substituted in) and the static shell, DHCP helper and
//! in-VM package agent. Once the guest's SSH server answers on the
//! host-forwarded port, the remote backend adopts it. The guest powers
//! itself off after an idle interval, so a leaked VM is not fatal.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::info;

use super::local::clone_file;
use super::ssh::SshBackend;
use super::Arch;
use crate::error::{Error, Result};

/// SSH dial attempts during bring-up (2s apart, 10s timeout each)
const DIAL_ATTEMPTS: u32 = 60;
const DIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Compose the initramfs (if not cached) and boot a VM for `arch`,
/// returning a connected remote backend that owns the VM process.
pub fn boot(arch: Arch) -> Result<SshBackend> {
    let kver = fs::read_to_string("/pkg/main/sys-kernel.linux.core/version.txt")?
        .trim()
        .to_string();
    info!("vm: running with kernel {}", kver);

    let initrd = PathBuf::from(format!("/tmp/initrd-apkg-build.kernel.{kver}.img"));
    if !initrd.exists() {
        compose_initramfs(arch, &kver, &initrd)?;
    }

    let (qemu_exe, machine) = match arch {
        Arch::X86 | Arch::Amd64 => ("qemu-system-x86_64", "q35"),
        Arch::Arm64 => ("qemu-system-aarch64", "virt"),
    };

    let port = arch.ssh_port();
    info!("vm: using {} port {} for SSH", qemu_exe, port);

    let ncpu = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4);

    let child = Command::new(format!(
        "/pkg/main/app-emulation.qemu.core/bin/{qemu_exe}"
    ))
    .arg("-kernel")
    .arg(format!(
        "/pkg/main/sys-kernel.linux.core.{kver}/linux-{kver}.img"
    ))
    .arg("-initrd")
    .arg(&initrd)
    .args(["-M", machine, "-m", "8192", "-cpu", "host"])
    .args(["-smp", &ncpu.to_string()])
    .arg("--enable-kvm")
    .args([
        "-netdev",
        &format!("user,id=hostnet0,hostfwd=tcp:127.0.0.1:{port}-:22"),
        "-device",
        "e1000,netdev=hostnet0",
    ])
    .spawn()?;

    info!("Waiting for the VM to finish loading...");

    let mut vm_process = Some(child);
    let mut last_err = Error::Remote("ssh dial not attempted".to_string());
    for _ in 0..DIAL_ATTEMPTS {
        match SshBackend::connect("127.0.0.1", port) {
            Ok(mut backend) => {
                if let Some(child) = vm_process.take() {
                    backend.attach_vm(child);
                }
                return Ok(backend);
            }
            Err(err) => {
                last_err = err;
                std::thread::sleep(DIAL_BACKOFF);
            }
        }
    }

    Err(Error::Remote(format!(
        "VM did not answer SSH after {DIAL_ATTEMPTS} attempts: {last_err}"
    )))
}

/// Build the initramfs: CPIO of the kernel modules directory, append the
/// injected files, then XZ-compress into `initrd`.
fn compose_initramfs(arch: Arch, kver: &str, initrd: &Path) -> Result<()> {
    info!("Creating {} ...", initrd.display());
    let cpio = PathBuf::from(format!("/tmp/initrd-apkg-build.kernel.{kver}.cpio"));

    let status = Command::new("/bin/bash")
        .args([
            "-c",
            &format!(
                "find . | cpio -H newc -o -R +0:+0 -V --file {}",
                cpio.display()
            ),
        ])
        .current_dir(format!("/pkg/main/sys-kernel.linux.modules.{kver}"))
        .status()?;
    if !status.success() {
        return Err(Error::tool("cpio", status.code()));
    }

    // stage the injected files under /tmp so the archive paths match
    fs::create_dir_all("/tmp/usr/azusa")?;
    clone_file(
        Path::new("/pkg/main/sys-apps.busybox.core/bin/busybox"),
        Path::new("/tmp/usr/azusa/busybox"),
    )?;
    clone_file(
        Path::new("/pkg/main/sys-apps.busybox.doc/examples/udhcp/simple.script"),
        Path::new("/tmp/usr/azusa/simple.script"),
    )?;
    clone_file(
        Path::new("/pkg/main/azusa.apkg.core/apkg"),
        Path::new("/tmp/usr/azusa/apkg"),
    )?;

    let init = INIT_TEMPLATE.replace("__ARCH__", arch.as_str());
    fs::write("/tmp/init", init)?;
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions("/tmp/init", fs::Permissions::from_mode(0o755))?;
    }

    let mut append = Command::new("cpio")
        .args([
            "-H", "newc", "-o", "-R", "+0:+0", "-V", "--append", "--file",
        ])
        .arg(&cpio)
        .current_dir("/tmp")
        .stdin(Stdio::piped())
        .spawn()?;
    if let Some(stdin) = append.stdin.as_mut() {
        stdin.write_all(
            b"usr\nusr/azusa\nusr/azusa/busybox\nusr/azusa/simple.script\nusr/azusa/apkg\ninit\n",
        )?;
    }
    let status = append.wait()?;
    if !status.success() {
        return Err(Error::tool("cpio --append", status.code()));
    }

    fs::remove_file("/tmp/init")?;
    fs::remove_dir_all("/tmp/usr")?;

    let out = fs::File::create(initrd)?;
    let status = Command::new("xz")
        .args(["-v", "--check=crc32", "--x86", "--lzma2", "--stdout"])
        .arg(&cpio)
        .stdout(Stdio::from(out))
        .status()?;
    if !status.success() {
        return Err(Error::tool("xz", status.code()));
    }

    fs::remove_file(&cpio)?;
    Ok(())
}

/// Guest PID 1. The only substitution is the arch literal; everything else
/// is byte-identical across builds so the initramfs stays deterministic.
const INIT_TEMPLATE: &str = r#"#!/usr/azusa/busybox ash

mkdir /bin /sbin
/usr/azusa/busybox --install

mkdir /proc
mount -t proc proc /proc

mkdir -p /etc
ln -snf /proc/self/mounts /etc/mtab

mkdir -p /sys
mount -t sysfs sys /sys
mkdir -p /tmp /var/log

# init /dev (on ramfs)
mkdir -p /dev
if [ ! -e /dev/console ]; then
	mknod /dev/console c 5 1
fi
mknod /dev/full c 1 7
mknod /dev/kmem c 1 2
mknod /dev/mem c 1 1
mknod /dev/null c 1 3
mknod /dev/port c 1 4
mknod /dev/random c 1 8
mknod /dev/urandom c 1 9
mknod /dev/zero c 1 5
mount -t devtmpfs dev /dev
mkdir /dev/pts
mount -t devpts devpts /dev/pts

find /sys -name modalias -print0 | xargs -0 sort -u | xargs /sbin/modprobe -a

ip link set lo up
ip link set eth0 up
udhcpc -n -i eth0 -s /usr/azusa/simple.script

modprobe fuse
/usr/azusa/apkg >/var/log/apkg.log 2>&1 &

# wait for /pkg/main to be ready
echo "Waiting..."
while true; do
	sleep 1
	if [ -d /pkg/main/azusa.symlinks.core.linux.__ARCH__/ ]; then
		break
	fi
done

# rely on busybox for the next lines...
rm -fr /bin /sbin
ln -snf /pkg/main/azusa.symlinks.core.linux.__ARCH__/bin /bin
ln -snf /pkg/main/azusa.symlinks.core.linux.__ARCH__/sbin /sbin
ln -snf /pkg/main/azusa.symlinks.core.linux.__ARCH__/lib /lib
ln -snf /pkg/main/azusa.symlinks.core.linux.__ARCH__/lib32 /lib32
ln -snf /pkg/main/azusa.symlinks.core.linux.__ARCH__/lib64 /lib64


hash -r
export PATH=/sbin:/bin

mkdir -p /usr/libexec
ln -snf /pkg/main/net-misc.openssh.core.linux.__ARCH__/libexec/sftp-server /usr/libexec

/bin/find /pkg/main/azusa.baselayout.core.linux.__ARCH__/ '(' -type f -o -type l ')' -printf '%P\n' | while read foo; do
	if [ ! -f "$foo" ]; then
		foo_dir="$(dirname "$foo")"
		if [ ! -d "$foo_dir" ]; then
			# make dir if missing
			mkdir -p "$BASE/$foo_dir"
		fi
		cp -a "/pkg/main/azusa.baselayout.core.linux.__ARCH__/$foo" "$BASE/$foo"
	fi
done

dbus-uuidgen --ensure=/etc/machine-id

# set root password to empty
sed -i 's/root:\*:/root::/' /etc/shadow

echo "Running dropbear..."
mkdir /etc/dropbear
dropbear -E -B -R

/bin/bash -i
poweroff -f
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_template_substitution() {
        let init = INIT_TEMPLATE.replace("__ARCH__", Arch::Amd64.as_str());
        assert!(init.contains("azusa.symlinks.core.linux.amd64"));
        assert!(!init.contains("__ARCH__"));
    }
}
