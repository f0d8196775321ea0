//! Single-key input from stdin without waiting for Enter.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Stdin switched to non-canonical, no-echo mode for the guard's lifetime.
///
/// When stdin is not a terminal nothing is changed and keys are still read
/// from whatever stdin is connected to.
pub struct RawTerminal {
    fd: RawFd,
    saved: Option<libc::termios>,
}

impl RawTerminal {
    pub fn stdin() -> io::Result<Self> {
        let fd = libc::STDIN_FILENO;

        // SAFETY: isatty only inspects the descriptor.
        if unsafe { libc::isatty(fd) } != 1 {
            tracing::debug!("stdin is not a terminal; quit key read as plain input");
            return Ok(Self { fd, saved: None });
        }

        // SAFETY: termios is plain old data; tcgetattr fully initializes it.
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: fd is stdin and `saved` is a valid termios.
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut raw = saved;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO);
        raw.c_cc[libc::VMIN] = 0;
        raw.c_cc[libc::VTIME] = 0;
        // SAFETY: as above.
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd,
            saved: Some(saved),
        })
    }

    /// Wait up to `timeout` for one byte of input.
    ///
    /// Returns `Ok(None)` on timeout, end of input, or an interrupted wait.
    pub fn poll_key(&self, timeout: Duration) -> io::Result<Option<u8>> {
        poll_byte(self.fd, timeout)
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if let Some(saved) = &self.saved {
            // SAFETY: restores the attributes read in `stdin()` on the same fd.
            if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, saved) } != 0 {
                tracing::warn!(error = %io::Error::last_os_error(), "failed to restore terminal mode");
            }
        }
    }
}

fn poll_byte(fd: RawFd, timeout: Duration) -> io::Result<Option<u8>> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    // SAFETY: `pfd` is a valid pollfd array of length 1.
    let ready = unsafe { libc::poll(&mut pfd, 1, ms) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        return if err.kind() == io::ErrorKind::Interrupted {
            Ok(None)
        } else {
            Err(err)
        };
    }
    if ready == 0 || pfd.revents & libc::POLLIN == 0 {
        return Ok(None);
    }

    let mut byte = 0u8;
    // SAFETY: reads at most one byte into a valid one-byte buffer.
    let n = unsafe { libc::read(fd, (&mut byte as *mut u8).cast(), 1) };
    match n {
        1 => Ok(Some(byte)),
        0 => Ok(None),
        _ => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_poll_byte_reads_pending_input() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        tx.write_all(b"qx").unwrap();
        assert_eq!(poll_byte(rx.as_raw_fd(), Duration::from_millis(10)).unwrap(), Some(b'q'));
        assert_eq!(poll_byte(rx.as_raw_fd(), Duration::from_millis(10)).unwrap(), Some(b'x'));
    }

    #[test]
    fn test_poll_byte_times_out() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        assert_eq!(poll_byte(rx.as_raw_fd(), Duration::from_millis(1)).unwrap(), None);
    }

    #[test]
    fn test_poll_byte_end_of_input() {
        let (tx, rx) = UnixStream::pair().unwrap();
        drop(tx);
        assert_eq!(poll_byte(rx.as_raw_fd(), Duration::from_millis(10)).unwrap(), None);
    }
}
