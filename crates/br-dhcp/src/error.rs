use thiserror::Error;

use br_common::InterfaceError;

use crate::config::RawOptionError;
use crate::options::OptionError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot build packet: {0}")]
    Build(#[from] OptionError),

    #[error("bad configured option: {0}")]
    Config(#[from] RawOptionError),

    #[error("{0}")]
    Interface(#[from] InterfaceError),

    #[error("cannot open {what} socket: {source}")]
    Socket {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("client stopped before a lease was bound")]
    Stopped,

    #[error("client task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
