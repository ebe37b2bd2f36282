use serde::{Deserialize, Serialize};
use std::fmt;

/// External requests delivered to a running lease client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Control {
    /// Renew the lease now
    Renew,
    /// Release the lease and go idle
    Release,
    /// Release and exit
    Terminate,
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Control::Renew => "renew",
            Control::Release => "release",
            Control::Terminate => "terminate",
        })
    }
}
