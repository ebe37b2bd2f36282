use serde::{Deserialize, Serialize};

use crate::options::{DhcpOption, OptionError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpClientConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub vendor_class: Option<String>,
    #[serde(default)]
    pub fqdn: Option<String>,
    /// Explicit client identifier, hex encoded. Implies `send_client_id`.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Send `[htype=1, mac..]` as client identifier when no explicit one is set.
    #[serde(default)]
    pub send_client_id: bool,
    /// Extra option codes for the parameter-request list.
    #[serde(default)]
    pub request_options: Vec<u8>,
    /// Request only `request_options`, not the built-in defaults.
    #[serde(default)]
    pub no_default_options: bool,
    #[serde(default)]
    pub extra_options: Vec<RawOption>,
    #[serde(default = "default_retries")]
    pub discover_retries: u32,
    #[serde(default = "default_timeout")]
    pub discover_timeout_secs: u32,
    #[serde(default = "default_timeout")]
    pub nak_cooldown_secs: u32,
    /// Program run on lease events; lease events are only logged when unset.
    #[serde(default)]
    pub script: Option<String>,
}

/// An option sent verbatim in every client message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOption {
    pub code: u8,
    #[serde(default)]
    pub hex: String,
}

impl RawOption {
    pub fn to_option(&self) -> Result<DhcpOption, RawOptionError> {
        let data = hex::decode(self.hex.trim()).map_err(|e| RawOptionError::Hex {
            code: self.code,
            source: e,
        })?;
        if data.len() > 255 {
            return Err(RawOptionError::Option(OptionError::TooLong {
                code: self.code,
                len: data.len(),
            }));
        }
        Ok(DhcpOption::new(self.code, data))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RawOptionError {
    #[error("option {code}: invalid hex payload: {source}")]
    Hex {
        code: u8,
        #[source]
        source: hex::FromHexError,
    },
    #[error(transparent)]
    Option(#[from] OptionError),
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_timeout() -> u32 {
    3
}

impl Default for DhcpClientConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}
