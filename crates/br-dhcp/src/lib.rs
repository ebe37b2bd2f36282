pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod frame;
pub mod messages;
pub mod options;
pub mod packet;
pub mod script;
pub mod state_machine;
pub mod transport;

pub use client::{run_dhcp_client, spawn_dhcp_client, DhcpClientHandle, Lease, LeaseClient};
pub use config::DhcpClientConfig;
pub use control::Control;
pub use error::ClientError;
pub use packet::DhcpPacket;
pub use script::{CommandScript, HookScript, LeaseScript, LogScript};
pub use state_machine::{ClientExit, LeaseSession, LeaseState};
