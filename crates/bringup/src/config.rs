use serde::Deserialize;
use std::path::Path;

use br_common::config::load_json_or_default;
use br_common::AppError;
use br_dhcp::DhcpClientConfig;
use br_wscan::ScanConfig;

/// Combined config file: one section per engine.
#[derive(Debug, Default, Deserialize)]
pub struct BringupConfig {
    #[serde(default)]
    pub dhcp: DhcpClientConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

impl BringupConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        load_json_or_default(path)
    }
}
