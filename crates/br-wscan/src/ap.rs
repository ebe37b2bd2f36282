//! Access point records assembled from the scan event stream.

use serde::Serialize;
use tracing::{debug, warn};

use br_common::MacAddr;

use crate::descriptor::{
    IWEVCUSTOM, IWEVGENIE, IWEVQUAL, SIOCGIWAP, SIOCGIWENCODE, SIOCGIWESSID, SIOCGIWFREQ,
    SIOCGIWMODE, SIOCGIWRATE,
};
use crate::ie::{self, IeSummary};
use crate::range::RangeInfo;
use crate::stream::{EventStream, EventValue, Extracted, Freq, WirelessEvent};

/// `IW_ENCODE_DISABLED`
pub const ENCODE_DISABLED: u16 = 0x8000;
/// `IW_ENCODE_NOKEY`
pub const ENCODE_NOKEY: u16 = 0x0800;

const SSID_MAX: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    Open,
    WepAuto,
    WpaPsk,
    Wpa2Psk,
    WpaEap,
    Wpa2Eap,
}

/// Ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    #[default]
    None,
    Wep,
    Tkip,
    Aes,
}

/// One access point seen in a scan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ApRecord {
    pub hwaddr: MacAddr,
    pub ssid: String,
    /// `IW_MODE_*` as reported by the driver
    pub mode: u32,
    /// Channel number, or the raw frequency when no range table matched.
    pub channel: i64,
    pub link_quality: u8,
    pub signal: u8,
    pub noise: u8,
    pub auth: AuthKind,
    pub encryption: Encryption,
    pub wps: bool,
}

impl ApRecord {
    fn new(hwaddr: MacAddr) -> Self {
        Self {
            hwaddr,
            ..Default::default()
        }
    }

    fn set_ssid(&mut self, bytes: &[u8]) {
        let bytes = &bytes[..bytes.len().min(SSID_MAX)];
        let bytes = bytes.split(|b| *b == 0).next().unwrap_or_default();
        self.ssid = String::from_utf8_lossy(bytes).into_owned();
    }
}

/// Folds events into records. A `SIOCGIWAP` event starts a new record.
pub struct ApAssembler<'r> {
    range: Option<&'r RangeInfo>,
    current: ApRecord,
    populated: bool,
    had_rsn: bool,
    records: Vec<ApRecord>,
}

impl<'r> ApAssembler<'r> {
    pub fn new(range: Option<&'r RangeInfo>) -> Self {
        Self {
            range,
            current: ApRecord::default(),
            populated: false,
            had_rsn: false,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, event: &WirelessEvent<'_>) {
        match (event.cmd, event.value) {
            (SIOCGIWAP, EventValue::Addr(hwaddr)) => {
                self.flush();
                self.current = ApRecord::new(hwaddr);
                self.had_rsn = false;
                return;
            }
            (IWEVQUAL, EventValue::Quality(q)) => {
                self.current.link_quality = q.qual;
                self.current.signal = q.level;
                self.current.noise = q.noise;
            }
            (SIOCGIWESSID, EventValue::Point { length, data, .. }) => {
                if let Some(data) = data.filter(|_| length > 0) {
                    self.current.set_ssid(data);
                }
            }
            (SIOCGIWFREQ, EventValue::Freq(freq)) => self.apply_freq(freq),
            (SIOCGIWENCODE, EventValue::Point { flags, data, .. }) => {
                let flags = if data.is_none() { flags | ENCODE_NOKEY } else { flags };
                self.apply_encode(flags);
            }
            (IWEVGENIE, EventValue::Point { data, .. }) => {
                if let Some(data) = data {
                    self.apply_ies(ie::parse_ies(data));
                }
            }
            (SIOCGIWMODE, EventValue::Uint(mode)) => self.current.mode = mode,
            (SIOCGIWRATE, _) | (IWEVCUSTOM, _) => {}
            (cmd, _) => debug!("Unrecognized command: {:#06x}", cmd),
        }
        self.populated = true;
    }

    fn apply_freq(&mut self, freq: Freq) {
        let value = freq.value();
        if value < 1000 {
            self.current.channel = value;
            return;
        }
        match self.range {
            Some(range) => {
                if let Some(channel) = range.channel_for(value) {
                    self.current.channel = i64::from(channel);
                }
            }
            None => self.current.channel = value,
        }
    }

    fn apply_encode(&mut self, flags: u16) {
        let ap = &mut self.current;
        if flags & ENCODE_DISABLED != 0 {
            ap.auth = AuthKind::Open;
            ap.encryption = Encryption::None;
        } else if ap.auth == AuthKind::Open && ap.encryption == Encryption::None {
            // Provisional; a later GENIE refines it
            ap.auth = AuthKind::WepAuto;
            ap.encryption = Encryption::Wep;
        }
    }

    fn apply_ies(&mut self, summary: IeSummary) {
        if let Some(ssid) = &summary.ssid {
            self.current.set_ssid(ssid);
        }
        self.current.wps |= summary.wps;

        // a WPA-v1 element never downgrades an AP already seen with RSN
        let downgrade = summary.rsn.is_none() && self.had_rsn;
        self.had_rsn |= summary.rsn.is_some();
        if let Some(security) = summary.security().filter(|_| !downgrade) {
            self.current.auth = security.auth;
            self.current.encryption = security.encryption;
        }
    }

    fn flush(&mut self) {
        if self.populated {
            self.records.push(std::mem::take(&mut self.current));
            self.populated = false;
        }
    }

    /// Hand back every record. The one in progress is kept only if some
    /// event after its `SIOCGIWAP` boundary filled it in.
    pub fn finish(mut self) -> Vec<ApRecord> {
        self.flush();
        self.records
    }
}

/// Decode a complete `SIOCGIWSCAN` result buffer.
pub fn decode_scan_buffer(buf: &[u8], range: Option<&RangeInfo>) -> Vec<ApRecord> {
    let mut assembler = ApAssembler::new(range);
    for outcome in EventStream::new(buf) {
        match outcome {
            Extracted::Event(event) => assembler.push(&event),
            Extracted::Skipped { .. } => {}
            Extracted::Malformed { cmd, len } => {
                debug!(cmd, len, "skipping malformed scan event");
            }
            Extracted::Invalid { cmd, len } => {
                debug!(cmd, len, "skipping scan event with no payload room");
            }
            Extracted::Truncated { cmd, len } => {
                warn!(cmd, len, "scan buffer ends with a bad event, stopping decode");
            }
        }
    }
    assembler.finish()
}
