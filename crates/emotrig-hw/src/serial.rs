//! Serial TTY output for the microcontroller link.
//!
//! Opens the port in raw 8N1 mode at a fixed baud rate through termios.
//! Writes block until the kernel accepts the bytes; nothing is ever read.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("serial port not found: {0}")]
    NotFound(String),
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to configure serial port {path}: {source}")]
    Configure {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Map a numeric baud rate to its termios speed constant.
pub fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => return None,
    };
    Some(speed)
}

/// Open serial port. Closed when dropped.
pub struct SerialPort {
    file: File,
    path: String,
    baud: u32,
}

impl SerialPort {
    pub fn open(path: &str, baud: u32) -> Result<Self, SerialError> {
        let speed = baud_constant(baud).ok_or(SerialError::UnsupportedBaud(baud))?;
        if !Path::new(path).exists() {
            return Err(SerialError::NotFound(path.to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| SerialError::Open {
                path: path.to_string(),
                source,
            })?;

        // Opened non-blocking so a port without CLOCAL does not wait for
        // carrier; writes block again once the line is configured.
        configure_raw(file.as_raw_fd(), speed)
            .and_then(|()| clear_nonblocking(file.as_raw_fd()))
            .map_err(|source| SerialError::Configure {
                path: path.to_string(),
                source,
            })?;

        tracing::info!(port = path, baud, "serial port opened");
        Ok(Self {
            file,
            path: path.to_string(),
            baud,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        tracing::info!(port = %self.path, "serial port closed");
    }
}

/// Put the TTY in raw mode: 8 data bits, no parity, one stop bit, no flow
/// control, receiver enabled, modem lines ignored.
fn configure_raw(fd: RawFd, speed: libc::speed_t) -> io::Result<()> {
    // SAFETY: termios is plain old data; tcgetattr fully initializes it.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open descriptor owned by the caller and `tio` is a
    // valid, exclusively borrowed termios for every call below.
    unsafe {
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
    tio.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;

    // SAFETY: as above.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn clear_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFL/F_SETFL only read and write the descriptor's flags.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
