//! 802.11 information elements carried in `IWEVGENIE` events.
//!
//! Only the elements that matter for picking a network are decoded: the
//! SSID, the RSN element (WPA2) and the vendor element carrying WPA-v1 or
//! WPS. Suite selectors are `OUI(3) + type(1)`, integers little-endian.

use tracing::debug;

use crate::ap::{AuthKind, Encryption};

pub const ELEMID_SSID: u8 = 0;
pub const ELEMID_RSN: u8 = 48;
pub const ELEMID_VENDOR: u8 = 221;

pub const RSN_OUI: [u8; 3] = [0x00, 0x0F, 0xAC];
pub const WPA_OUI: [u8; 3] = [0x00, 0x50, 0xF2];
pub const WPA_OUI_TYPE: u8 = 0x01;
pub const WPS_OUI_TYPE: u8 = 0x04;
const RSN_VERSION: u16 = 1;
const WPA_VERSION: u16 = 1;

/// Security parameters advertised by one RSN or WPA element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Security {
    pub auth: AuthKind,
    pub encryption: Encryption,
}

/// Everything of interest found in one IE blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IeSummary {
    pub ssid: Option<Vec<u8>>,
    pub rsn: Option<Security>,
    pub wpa: Option<Security>,
    pub wps: bool,
}

impl IeSummary {
    /// RSN wins over WPA-v1 when both are advertised.
    pub fn security(&self) -> Option<Security> {
        self.rsn.or(self.wpa)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Rsn,
    Wpa,
}

impl Family {
    fn oui(self) -> [u8; 3] {
        match self {
            Family::Rsn => RSN_OUI,
            Family::Wpa => WPA_OUI,
        }
    }

    fn psk(self) -> AuthKind {
        match self {
            Family::Rsn => AuthKind::Wpa2Psk,
            Family::Wpa => AuthKind::WpaPsk,
        }
    }

    fn eap(self) -> AuthKind {
        match self {
            Family::Rsn => AuthKind::Wpa2Eap,
            Family::Wpa => AuthKind::WpaEap,
        }
    }
}

/// Walk an IE blob. A length running past the blob ends the walk.
pub fn parse_ies(mut data: &[u8]) -> IeSummary {
    let mut summary = IeSummary::default();

    while data.len() > 1 {
        let id = data[0];
        let len = usize::from(data[1]);
        let Some(body) = data.get(2..2 + len) else {
            debug!(id, len, remaining = data.len(), "information element overruns buffer");
            break;
        };

        match id {
            ELEMID_SSID if !body.is_empty() => {
                let ssid = &body[..body.len().min(32)];
                summary.ssid = Some(ssid.to_vec());
            }
            ELEMID_RSN => summary.rsn = Some(parse_rsn(body)),
            ELEMID_VENDOR if summary.rsn.is_none() => parse_vendor(body, &mut summary),
            _ => {}
        }

        data = &data[2 + len..];
    }

    summary
}

fn parse_rsn(body: &[u8]) -> Security {
    let mut security = Security {
        auth: AuthKind::Wpa2Psk,
        encryption: Encryption::Aes,
    };
    let mut reader = Reader(body);
    match reader.u16() {
        Some(RSN_VERSION) => parse_suites(&mut reader, Family::Rsn, &mut security),
        Some(version) => debug!(version, "unsupported RSN version"),
        None => {}
    }
    security
}

fn parse_vendor(body: &[u8], summary: &mut IeSummary) {
    if body.len() < 4 || body[..3] != WPA_OUI {
        return;
    }
    match body[3] {
        WPA_OUI_TYPE => {
            let mut reader = Reader(&body[4..]);
            if reader.u16() != Some(WPA_VERSION) {
                return;
            }
            let mut security = Security {
                auth: AuthKind::WpaPsk,
                encryption: Encryption::Tkip,
            };
            parse_suites(&mut reader, Family::Wpa, &mut security);
            summary.wpa = Some(security);
        }
        WPS_OUI_TYPE => summary.wps = true,
        _ => {}
    }
}

/// Group cipher, pairwise cipher list, AKM list. Each part is optional but
/// a partial part ends the walk.
fn parse_suites(reader: &mut Reader<'_>, family: Family, security: &mut Security) {
    if reader.is_empty() {
        return;
    }
    let Some(group) = reader.selector() else {
        return;
    };
    if let Some(cipher) = cipher(family, group) {
        security.encryption = cipher;
    }

    if reader.is_empty() {
        return;
    }
    let Some(count) = reader.u16() else {
        return;
    };
    let mut strongest = None;
    for _ in 0..count {
        let Some(selector) = reader.selector() else {
            break;
        };
        if let Some(cipher) = cipher(family, selector) {
            strongest = strongest.max(Some(cipher));
        }
    }
    if let Some(cipher) = strongest {
        security.encryption = cipher;
    }

    if reader.is_empty() {
        return;
    }
    let Some(count) = reader.u16() else {
        return;
    };
    let mut psk = false;
    let mut eap = false;
    for _ in 0..count {
        let Some(selector) = reader.selector() else {
            break;
        };
        match key_management(family, selector) {
            Some(KeyManagement::Psk) => psk = true,
            Some(KeyManagement::Eap) => eap = true,
            None => {}
        }
    }
    if psk {
        security.auth = family.psk();
    } else if eap {
        security.auth = family.eap();
    }
}

fn cipher(family: Family, selector: [u8; 4]) -> Option<Encryption> {
    if selector[..3] != family.oui() {
        debug!(selector = ?selector, "vendor cipher suite ignored");
        return None;
    }
    match selector[3] {
        0 => Some(Encryption::None),
        1 | 5 => Some(Encryption::Wep),
        2 => Some(Encryption::Tkip),
        // WRAP and CCMP are both AES based
        3 | 4 => Some(Encryption::Aes),
        other => {
            debug!(suite = other, "unknown cipher suite ignored");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyManagement {
    Eap,
    Psk,
}

fn key_management(family: Family, selector: [u8; 4]) -> Option<KeyManagement> {
    if selector[..3] != family.oui() {
        debug!(selector = ?selector, "vendor key management suite ignored");
        return None;
    }
    match (family, selector[3]) {
        (_, 1) => Some(KeyManagement::Eap),
        (_, 2) => Some(KeyManagement::Psk),
        // FT and SHA-256 variants
        (Family::Rsn, 3) | (Family::Rsn, 5) => Some(KeyManagement::Eap),
        (Family::Rsn, 4) | (Family::Rsn, 6) => Some(KeyManagement::Psk),
        (_, other) => {
            debug!(suite = other, "unknown key management suite ignored");
            None
        }
    }
}

struct Reader<'a>(&'a [u8]);

impl Reader<'_> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes: [u8; 2] = self.0.get(..2)?.try_into().ok()?;
        self.0 = &self.0[2..];
        Some(u16::from_le_bytes(bytes))
    }

    fn selector(&mut self) -> Option<[u8; 4]> {
        let bytes: [u8; 4] = self.0.get(..4)?.try_into().ok()?;
        self.0 = &self.0[4..];
        Some(bytes)
    }
}
