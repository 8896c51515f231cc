//! Virtual network interface
//!
//! - [`TunDevice`]: the Linux TUN device itself, used directly by the client
//! - [`InterfaceHub`]: serializes the server's single device across sessions

mod device;
mod hub;

pub use device::{TunDevice, TunReader, TunWriter};
pub use hub::{InterfaceHub, InterfacePort, PortReader, PortWriter};
