//! Acquiring a raw, writable handle to a device node.
//!
//! Writing to a block device needs rights the front-end usually does not
//! hold. [`HelperAccess`] runs a small helper through an elevation tool such as
//! `pkexec`; the helper opens the device and passes the open descriptor back
//! over a Unix socket pair with `SCM_RIGHTS`. A random pairing token travels
//! to the helper on stdin and back with the descriptor, so a descriptor from
//! anything other than the helper we started is refused.
use crate::error::{FlashError, Result};
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Length of the pairing token exchanged with the helper.
pub const TOKEN_LEN: usize = 32;

/// The subcommand the `burnr` binary answers as the privileged helper.
pub const HELPER_SUBCOMMAND: &str = "open-helper";

/// Something that can hand out a raw read-write handle to a device node.
pub trait RawAccess: Send + Sync {
    fn acquire_raw_handle(&self, device: &Path) -> Result<File>;
}

/// Opens a device node for writing, optionally bypassing the page cache.
pub fn open_device(device: &Path, direct_io: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if direct_io {
        options.custom_flags(libc::O_DIRECT);
    }
    options.open(device)
}

/// Opens the device in-process. Only useful when the caller already has the
/// rights, e.g. when running as root.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectAccess {
    pub direct_io: bool,
}

impl RawAccess for DirectAccess {
    fn acquire_raw_handle(&self, device: &Path) -> Result<File> {
        open_device(device, self.direct_io).map_err(|e| {
            FlashError::AuthorizationFailed(format!("cannot open {}: {e}", device.display()))
        })
    }
}

/// Opens the device through an external helper process.
///
/// The helper is started as `program args.. <device> [--direct]` with the
/// pairing token on stdin and one end of a socket pair as stdout.
#[derive(Clone, Debug)]
pub struct HelperAccess {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub direct_io: bool,
}

impl HelperAccess {
    /// Runs this executable's helper subcommand under `pkexec`.
    pub fn pkexec(direct_io: bool) -> Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self {
            program: "pkexec".into(),
            args: vec![exe.into_os_string(), HELPER_SUBCOMMAND.into()],
            direct_io,
        })
    }

    /// Runs `program` directly, with `args` before the device path.
    pub fn with_program(program: impl Into<PathBuf>, args: Vec<OsString>, direct_io: bool) -> Self {
        Self {
            program: program.into().into_os_string(),
            args,
            direct_io,
        }
    }
}

impl RawAccess for HelperAccess {
    fn acquire_raw_handle(&self, device: &Path) -> Result<File> {
        let auth_failed = |what: String| FlashError::AuthorizationFailed(what);

        let (parent, child_end) = UnixStream::pair()?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(device)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(OwnedFd::from(child_end)));
        if self.direct_io {
            command.arg("--direct");
        }

        tracing::debug!(program = ?self.program, device = %device.display(), "starting helper");
        let mut child = command
            .spawn()
            .map_err(|e| auth_failed(format!("cannot start {:?}: {e}", self.program)))?;
        // Our copy of the helper's end must close, or the receive below would
        // never see end-of-stream if the helper dies.
        drop(command);

        let token: [u8; TOKEN_LEN] = rand::random();
        if let Some(mut stdin) = child.stdin.take() {
            // A helper that exits before reading is reported below.
            let _ = stdin.write_all(&token);
        }

        let received = accept_handle(&parent, &token);
        let status = child.wait()?;
        if !status.success() {
            return Err(auth_failed(format!("helper exited with {status}")));
        }
        let file = received?;
        tracing::info!(device = %device.display(), "raw access granted");
        Ok(file)
    }
}

/// Receives a descriptor and the echoed pairing token from `sock`.
///
/// Fails with [`FlashError::AuthorizationFailed`] unless exactly the expected
/// token arrives together with a descriptor.
pub fn accept_handle(sock: &UnixStream, token: &[u8; TOKEN_LEN]) -> Result<File> {
    let (echoed, fds) = receive_handle(sock)?;
    let mut fds = fds.into_iter();
    let Some(fd) = fds.next() else {
        return Err(FlashError::AuthorizationFailed(
            "helper did not return a device handle".into(),
        ));
    };
    if echoed.as_slice() != token.as_slice() {
        return Err(FlashError::AuthorizationFailed(
            "helper returned a mismatched pairing token".into(),
        ));
    }
    Ok(File::from(fd))
}

fn receive_handle(sock: &UnixStream) -> io::Result<(Vec<u8>, Vec<OwnedFd>)> {
    let mut buf = [0u8; TOKEN_LEN];
    let mut cmsg_buf = nix::cmsg_space!(RawFd);
    let mut fds = Vec::new();

    let bytes = {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = recvmsg::<()>(
            sock.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::MSG_CMSG_CLOEXEC,
        )?;
        for cmsg in msg.cmsgs()? {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                // SAFETY: the kernel just installed these descriptors for us
                // and nothing else owns them.
                fds.extend(received.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
            }
        }
        msg.bytes
    };

    Ok((buf[..bytes].to_vec(), fds))
}

/// The helper side of [`HelperAccess`].
///
/// Reads the pairing token from `input`, opens `device` and sends the
/// descriptor with the token over `sock`. The helper runs with elevated
/// rights, so it does nothing else.
pub fn serve_raw_handle(
    device: &Path,
    direct_io: bool,
    mut input: impl Read,
    sock: BorrowedFd<'_>,
) -> Result<()> {
    let mut token = [0u8; TOKEN_LEN];
    input.read_exact(&mut token)?;

    let file = open_device(device, direct_io).map_err(|e| {
        FlashError::AuthorizationFailed(format!("cannot open {}: {e}", device.display()))
    })?;

    let fds = [file.as_raw_fd()];
    let cmsgs = [ControlMessage::ScmRights(&fds)];
    let iov = [IoSlice::new(&token)];
    sendmsg::<()>(sock.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None).map_err(io::Error::from)?;
    Ok(())
}
