//! Pseudo-terminal hosting for interactive shells.
//!
//! A shell started on a pty becomes a session leader with the pty as its controlling
//! terminal. It therefore leaves any process group it was placed in at spawn time, which
//! is the escape the descendant sweep exists for.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread;

use crate::prelude::*;
use nix::pty::{Winsize, openpty};
use nix::sys::termios::Termios;
use nix::unistd::setsid;

pub struct Pty {
    master: File,
    slave: Option<OwnedFd>,
}

impl Pty {
    pub fn open() -> Result<Self> {
        let pty = openpty(None::<&Winsize>, None::<&Termios>)
            .context("Failed to open a pseudo-terminal")?;
        Ok(Self {
            master: File::from(pty.master),
            slave: Some(pty.slave),
        })
    }

    /// Wire `command` to the terminal side of the pty. Can only be done once.
    pub fn attach(&mut self, command: &mut Command) -> Result<()> {
        let slave = self
            .slave
            .take()
            .context("The pseudo-terminal is already attached")?;

        command
            .stdin(Stdio::from(slave.try_clone()?))
            .stdout(Stdio::from(slave.try_clone()?))
            .stderr(Stdio::from(slave));

        // SAFETY: only async-signal-safe calls between fork and exec
        unsafe {
            command.pre_exec(|| {
                setsid().map_err(io::Error::from)?;
                if libc::ioctl(0, libc::TIOCSCTTY, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        Ok(())
    }

    /// Type a line into the terminal
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.master.write_all(line.as_bytes())?;
        self.master.write_all(b"\n")?;
        self.master.flush()?;
        Ok(())
    }

    /// Drain terminal output on a background thread so the shell never blocks on a full
    /// pty buffer. The thread ends once every terminal-side descriptor is closed.
    pub fn drain(&self) -> Result<()> {
        let mut master = self.master.try_clone()?;
        thread::Builder::new()
            .name("pty-drain".into())
            .spawn(move || {
                let mut buffer = [0u8; 4096];
                loop {
                    match master.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(n) => {
                            trace!("pty: {}", String::from_utf8_lossy(&buffer[..n]).trim_end())
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        // EIO once the last process holding the terminal side is gone
                        Err(_) => break,
                    }
                }
            })?;
        Ok(())
    }
}
