//! Linux TUN device
//!
//! Opens `/dev/net/tun`, attaches a named interface in IFF_TUN | IFF_NO_PI
//! mode and registers the descriptor with the tokio reactor.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::unix::AsyncFd;

use crate::config::InterfaceConfig;
use crate::error::{Error, Result};
use crate::relay::{FrameRead, FrameWrite, VirtualInterface};

// TUNSETIFF = _IOW('T', 202, c_int)
// PowerPC encodes ioctl direction bits differently from x86/ARM:
//   x86/ARM: _IOC_WRITE = 1  → TUNSETIFF = 0x400454ca
//   PowerPC: _IOC_WRITE = 4  → TUNSETIFF = 0x800454ca
#[cfg(any(target_arch = "powerpc", target_arch = "powerpc64"))]
const TUNSETIFF: libc::c_ulong = 0x800454ca;
#[cfg(not(any(target_arch = "powerpc", target_arch = "powerpc64")))]
const TUNSETIFF: libc::c_ulong = 0x400454ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;

#[repr(C)]
struct Ifreq {
    ifr_name: [u8; 16],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

/// A Linux TUN device driven by the tokio reactor
pub struct TunDevice {
    fd: AsyncFd<OwnedFd>,
    name: String,
}

impl TunDevice {
    /// Create a TUN device with the given name.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(name: &str) -> Result<Self> {
        let raw = unsafe { libc::open(b"/dev/net/tun\0".as_ptr() as *const _, libc::O_RDWR) };
        if raw < 0 {
            return Err(Error::Interface(format!(
                "failed to open /dev/net/tun: {}",
                io::Error::last_os_error()
            )));
        }
        // Closed on drop from here on
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut req = Ifreq {
            ifr_name: [0u8; 16],
            ifr_flags: IFF_TUN | IFF_NO_PI,
            _pad: [0u8; 22],
        };
        let name_bytes = name.as_bytes();
        let copy_len = name_bytes.len().min(15);
        req.ifr_name[..copy_len].copy_from_slice(&name_bytes[..copy_len]);

        let ret = unsafe { libc::ioctl(fd.as_raw_fd(), TUNSETIFF as _, &mut req as *mut _) };
        if ret < 0 {
            return Err(Error::Interface(format!(
                "ioctl TUNSETIFF failed for {}: {}",
                name,
                io::Error::last_os_error()
            )));
        }

        let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
        if flags < 0
            || unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0
        {
            return Err(Error::Interface(format!(
                "failed to make {} non-blocking: {}",
                name,
                io::Error::last_os_error()
            )));
        }

        let actual_name = std::str::from_utf8(&req.ifr_name)
            .unwrap_or(name)
            .trim_end_matches('\0')
            .to_string();

        let fd = AsyncFd::new(fd)?;
        tracing::info!("TUN device {} created", actual_name);

        Ok(Self {
            fd,
            name: actual_name,
        })
    }

    /// Assign the address, set the MTU and bring the interface up.
    ///
    /// Without an address the tunnel is unusable, so that step is fatal;
    /// MTU and link failures are only logged.
    pub async fn configure(&self, address: &str, iface: &InterfaceConfig) -> Result<()> {
        let cidr = format!("{}/{}", address, iface.prefix_len);
        if !crate::netconf::run("ip", &["addr", "add", &cidr, "dev", &self.name]).await {
            return Err(Error::Interface(format!(
                "failed to assign {} to {}",
                cidr, self.name
            )));
        }

        let mtu = iface.mtu.to_string();
        crate::netconf::run("ip", &["link", "set", "dev", &self.name, "mtu", &mtu]).await;
        crate::netconf::run("ip", &["link", "set", "dev", &self.name, "up"]).await;

        tracing::info!("TUN interface {} up: {} (MTU {})", self.name, cidr, iface.mtu);
        Ok(())
    }

    /// Read one packet
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|fd| {
                let n = unsafe {
                    libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut _, buf.len())
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write one packet
    pub async fn write(&self, packet: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|fd| {
                let n = unsafe {
                    libc::write(fd.as_raw_fd(), packet.as_ptr() as *const _, packet.len())
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Get the interface name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Read side of a shared TUN device
pub struct TunReader(Arc<TunDevice>);

/// Write side of a shared TUN device
pub struct TunWriter(Arc<TunDevice>);

impl VirtualInterface for Arc<TunDevice> {
    type Reader = TunReader;
    type Writer = TunWriter;

    fn into_split(self) -> (TunReader, TunWriter) {
        (TunReader(Arc::clone(&self)), TunWriter(self))
    }
}

#[async_trait]
impl FrameRead for TunReader {
    async fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).await
    }
}

#[async_trait]
impl FrameWrite for TunWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let written = self.0.write(frame).await?;
        if written < frame.len() {
            tracing::debug!(
                "Short write on {}: {} of {} bytes",
                self.0.name(),
                written,
                frame.len()
            );
        }
        Ok(())
    }
}
