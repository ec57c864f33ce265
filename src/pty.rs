/*! Pseudo-terminal for the KISS client.

Client applications talk to the node the way they would talk to a
serial TNC: a pty slave carrying KISS framed AX.25. The master end
stays with us; a symlink at `/tmp/kisstnc` points at whatever pts
name the system handed out, so clients don't have to guess.
 */
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::Path;

use log::{info, warn};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::pty::{PtyMaster, grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::termios::{SetArg, cfmakeraw, tcgetattr, tcsetattr};

use crate::{Error, Result};

/// Well known place clients look for the pty.
pub const KISSTNC_SYMLINK: &str = "/tmp/kisstnc";

/// An open pseudo-terminal with a KISS client on the far side.
pub struct KissPty {
    master: PtyMaster,
    // Held open so the master doesn't see EIO while no client is
    // attached.
    _slave: OwnedFd,
    slave_name: String,
}

impl KissPty {
    /// Create the pty pair, raw and nonblocking, and plant the
    /// discovery symlink.
    pub fn open() -> Result<Self> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)
            .map_err(|e| Error::Io(e.into(), "creating pseudo terminal master".into()))?;
        grantpt(&master).map_err(|e| Error::Io(e.into(), "grantpt".into()))?;
        unlockpt(&master).map_err(|e| Error::Io(e.into(), "unlockpt".into()))?;
        let slave_name =
            ptsname_r(&master).map_err(|e| Error::Io(e.into(), "ptsname".into()))?;

        let mut ts = tcgetattr(&master)
            .map_err(|e| Error::Io(e.into(), "pty tcgetattr".into()))?;
        cfmakeraw(&mut ts);
        // Wait for at least one character, no fancy timing.
        ts.control_chars[nix::sys::termios::SpecialCharacterIndices::VMIN as usize] = 1;
        ts.control_chars[nix::sys::termios::SpecialCharacterIndices::VTIME as usize] = 0;
        tcsetattr(&master, SetArg::TCSANOW, &ts)
            .map_err(|e| Error::Io(e.into(), "pty tcsetattr".into()))?;

        let flags = fcntl(&master, FcntlArg::F_GETFL)
            .map_err(|e| Error::Io(e.into(), "pty F_GETFL".into()))?;
        fcntl(
            &master,
            FcntlArg::F_SETFL(OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK),
        )
        .map_err(|e| Error::Io(e.into(), "pty F_SETFL".into()))?;

        let slave = nix::fcntl::open(
            Path::new(&slave_name),
            OFlag::O_RDWR | OFlag::O_NOCTTY,
            nix::sys::stat::Mode::empty(),
        )
        .map_err(|e| Error::Io(e.into(), format!("opening pty slave {slave_name}")))?;

        let _ = std::fs::remove_file(KISSTNC_SYMLINK);
        match std::os::unix::fs::symlink(&slave_name, KISSTNC_SYMLINK) {
            Ok(()) => info!("created symlink {KISSTNC_SYMLINK} -> {slave_name}"),
            Err(e) => warn!("failed to create symlink {KISSTNC_SYMLINK}: {e}"),
        }
        info!("virtual KISS TNC is available on {slave_name}");

        Ok(Self {
            master,
            _slave: slave,
            slave_name,
        })
    }

    /// The pts device path clients should open.
    pub fn slave_name(&self) -> &str {
        &self.slave_name
    }

    /// Wait up to `timeout_ms` for client bytes and read them.
    ///
    /// Returns an empty slice-length on timeout.
    pub fn read_timeout(&self, buf: &mut [u8], timeout_ms: u16) -> Result<usize> {
        let mut fds = [PollFd::new(self.master.as_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::from(timeout_ms))
            .map_err(|e| Error::Io(e.into(), "pty poll".into()))?;
        if n == 0 {
            return Ok(0);
        }
        match nix::unistd::read(&self.master, buf) {
            Ok(n) => Ok(n),
            Err(nix::errno::Errno::EAGAIN) => Ok(0),
            Err(e) => Err(Error::Io(e.into(), "pty read".into())),
        }
    }

    /// Send bytes to the client. If nobody is listening and the
    /// buffer is full, the message is quietly dropped.
    pub fn send(&self, bytes: &[u8]) {
        match nix::unistd::write(&self.master, bytes) {
            Ok(n) if n != bytes.len() => {
                warn!("pty short write: {n} of {}", bytes.len());
            }
            Ok(_) => {}
            Err(nix::errno::Errno::EAGAIN) => {
                warn!("discarding KISS message because no listener");
            }
            Err(e) => {
                warn!("pty write error on fd {}: {e}", self.master.as_raw_fd());
            }
        }
    }
}

impl Drop for KissPty {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(KISSTNC_SYMLINK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn loopback_through_slave() {
        let pty = KissPty::open().unwrap();
        assert!(pty.slave_name().starts_with("/dev/"));

        let mut client = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(pty.slave_name())
            .unwrap();

        // Client to node.
        client.write_all(b"from client").unwrap();
        client.flush().unwrap();
        let mut buf = [0u8; 64];
        let n = pty.read_timeout(&mut buf, 2000).unwrap();
        assert_eq!(&buf[..n], b"from client");

        // Node to client.
        pty.send(b"to client");
        let mut back = [0u8; 9];
        client.read_exact(&mut back).unwrap();
        assert_eq!(&back, b"to client");
    }
}
