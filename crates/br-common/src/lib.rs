pub mod config;
pub mod error;
pub mod iface;
pub mod mac;

pub use error::AppError;
pub use iface::{ifname, InterfaceError, NetworkInterfaceHandle};
pub use mac::MacAddr;
