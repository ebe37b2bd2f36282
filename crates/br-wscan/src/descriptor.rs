//! Payload shape of every wireless-extension request and event code.

/// First request code (`SIOCIWFIRST`).
pub const SIOCIWFIRST: u16 = 0x8B00;
/// Last code in the request range, private ioctls included.
pub const SIOCIWLAST: u16 = 0x8BFF;
/// First asynchronous event code (`IWEVFIRST`).
pub const IWEVFIRST: u16 = 0x8C00;

pub const SIOCSIWCOMMIT: u16 = 0x8B00;
pub const SIOCGIWNAME: u16 = 0x8B01;
pub const SIOCSIWNWID: u16 = 0x8B02;
pub const SIOCGIWNWID: u16 = 0x8B03;
pub const SIOCSIWFREQ: u16 = 0x8B04;
pub const SIOCGIWFREQ: u16 = 0x8B05;
pub const SIOCSIWMODE: u16 = 0x8B06;
pub const SIOCGIWMODE: u16 = 0x8B07;
pub const SIOCSIWSENS: u16 = 0x8B08;
pub const SIOCGIWSENS: u16 = 0x8B09;
pub const SIOCSIWRANGE: u16 = 0x8B0A;
pub const SIOCGIWRANGE: u16 = 0x8B0B;
pub const SIOCSIWPRIV: u16 = 0x8B0C;
pub const SIOCGIWPRIV: u16 = 0x8B0D;
pub const SIOCSIWSTATS: u16 = 0x8B0E;
pub const SIOCGIWSTATS: u16 = 0x8B0F;
pub const SIOCSIWSPY: u16 = 0x8B10;
pub const SIOCGIWSPY: u16 = 0x8B11;
pub const SIOCSIWTHRSPY: u16 = 0x8B12;
pub const SIOCGIWTHRSPY: u16 = 0x8B13;
pub const SIOCSIWAP: u16 = 0x8B14;
pub const SIOCGIWAP: u16 = 0x8B15;
pub const SIOCSIWMLME: u16 = 0x8B16;
pub const SIOCGIWAPLIST: u16 = 0x8B17;
pub const SIOCSIWSCAN: u16 = 0x8B18;
pub const SIOCGIWSCAN: u16 = 0x8B19;
pub const SIOCSIWESSID: u16 = 0x8B1A;
pub const SIOCGIWESSID: u16 = 0x8B1B;
pub const SIOCSIWNICKN: u16 = 0x8B1C;
pub const SIOCGIWNICKN: u16 = 0x8B1D;
pub const SIOCSIWRATE: u16 = 0x8B20;
pub const SIOCGIWRATE: u16 = 0x8B21;
pub const SIOCSIWRTS: u16 = 0x8B22;
pub const SIOCGIWRTS: u16 = 0x8B23;
pub const SIOCSIWFRAG: u16 = 0x8B24;
pub const SIOCGIWFRAG: u16 = 0x8B25;
pub const SIOCSIWTXPOW: u16 = 0x8B26;
pub const SIOCGIWTXPOW: u16 = 0x8B27;
pub const SIOCSIWRETRY: u16 = 0x8B28;
pub const SIOCGIWRETRY: u16 = 0x8B29;
pub const SIOCSIWENCODE: u16 = 0x8B2A;
pub const SIOCGIWENCODE: u16 = 0x8B2B;
pub const SIOCSIWPOWER: u16 = 0x8B2C;
pub const SIOCGIWPOWER: u16 = 0x8B2D;
pub const SIOCSIWMODUL: u16 = 0x8B2E;
pub const SIOCGIWMODUL: u16 = 0x8B2F;
pub const SIOCSIWGENIE: u16 = 0x8B30;
pub const SIOCGIWGENIE: u16 = 0x8B31;
pub const SIOCSIWAUTH: u16 = 0x8B32;
pub const SIOCGIWAUTH: u16 = 0x8B33;
pub const SIOCSIWENCODEEXT: u16 = 0x8B34;
pub const SIOCGIWENCODEEXT: u16 = 0x8B35;
pub const SIOCSIWPMKSA: u16 = 0x8B36;

pub const IWEVTXDROP: u16 = 0x8C00;
pub const IWEVQUAL: u16 = 0x8C01;
pub const IWEVCUSTOM: u16 = 0x8C02;
pub const IWEVREGISTERED: u16 = 0x8C03;
pub const IWEVEXPIRED: u16 = 0x8C04;
pub const IWEVGENIE: u16 = 0x8C05;
pub const IWEVMICHAELMICFAILURE: u16 = 0x8C06;
pub const IWEVASSOCREQIE: u16 = 0x8C07;
pub const IWEVASSOCRESPIE: u16 = 0x8C08;
pub const IWEVPMKIDCAND: u16 = 0x8C09;

pub const IW_ESSID_MAX_SIZE: u16 = 32;
pub const IW_ENCODING_TOKEN_MAX: u16 = 64;
pub const IW_GENERIC_IE_MAX: u16 = 1024;
pub const IW_CUSTOM_MAX: u16 = 256;
pub const IW_SCAN_MAX_DATA: u16 = 4096;
pub const IW_MAX_SPY: u16 = 8;
pub const IW_MAX_AP: u16 = 64;

const SOCKADDR_SIZE: u16 = 16;
const IW_QUALITY_SIZE: u16 = 4;
const IW_THRSPY_SIZE: u16 = 24;
const IW_MLME_SIZE: u16 = 20;
const IW_SCAN_REQ_SIZE: u16 = 316;
const IW_ENCODE_EXT_SIZE: u16 = 40;
const IW_PMKSA_SIZE: u16 = 36;
const IW_MICHAELMICFAILURE_SIZE: u16 = 28;
const IW_PMKID_CAND_SIZE: u16 = 24;
pub const IW_RANGE_SIZE: u16 = 568;

/// Size of the `(cmd, len)` header in front of every event.
pub const EVENT_HEADER_LEN: usize = 4;

/// What follows the event header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Header only
    Null,
    /// 16-byte name
    Char,
    /// 32-bit value
    Uint,
    /// `iw_freq`
    Freq,
    /// `sockaddr`
    Addr,
    /// `(length, flags)` followed by a variable payload
    Point,
    /// `iw_param`
    Param,
    /// `iw_quality`
    Qual,
}

impl PayloadKind {
    /// Fixed payload bytes after the event header, as packed in the stream.
    pub fn fixed_len(self) -> usize {
        match self {
            PayloadKind::Null => 0,
            PayloadKind::Char => 16,
            PayloadKind::Uint => 4,
            PayloadKind::Freq => 8,
            PayloadKind::Addr => SOCKADDR_SIZE as usize,
            PayloadKind::Point => 4,
            PayloadKind::Param => 8,
            PayloadKind::Qual => IW_QUALITY_SIZE as usize,
        }
    }
}

/// The token count of this command is not bounded by `max_tokens`.
pub const FLAG_NOMAX: u32 = 0x0008;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDescriptor {
    pub kind: PayloadKind,
    pub token_size: u16,
    pub min_tokens: u16,
    pub max_tokens: u16,
    pub flags: u32,
}

impl EventDescriptor {
    pub const HEADER_ONLY: EventDescriptor = EventDescriptor::fixed(PayloadKind::Null);

    const fn fixed(kind: PayloadKind) -> Self {
        Self {
            kind,
            token_size: 0,
            min_tokens: 0,
            max_tokens: 0,
            flags: 0,
        }
    }

    const fn point(token_size: u16, min_tokens: u16, max_tokens: u16, flags: u32) -> Self {
        Self {
            kind: PayloadKind::Point,
            token_size,
            min_tokens,
            max_tokens,
            flags,
        }
    }

    pub fn unbounded(&self) -> bool {
        self.flags & FLAG_NOMAX != 0
    }
}

/// Descriptor for `cmd`. Codes outside both known ranges are header-only.
pub fn descriptor(cmd: u16) -> EventDescriptor {
    use PayloadKind::*;
    let bytes = |max| EventDescriptor::point(1, 0, max, 0);
    match cmd {
        SIOCSIWCOMMIT => EventDescriptor::HEADER_ONLY,
        SIOCGIWNAME => EventDescriptor::fixed(Char),
        SIOCSIWNWID | SIOCGIWNWID | SIOCSIWSENS | SIOCGIWSENS => EventDescriptor::fixed(Param),
        SIOCSIWFREQ | SIOCGIWFREQ => EventDescriptor::fixed(Freq),
        SIOCSIWMODE | SIOCGIWMODE => EventDescriptor::fixed(Uint),
        SIOCSIWRANGE | SIOCSIWPRIV | SIOCGIWPRIV | SIOCSIWSTATS | SIOCGIWSTATS => {
            EventDescriptor::HEADER_ONLY
        }
        SIOCGIWRANGE => bytes(IW_RANGE_SIZE),
        SIOCSIWSPY => EventDescriptor::point(SOCKADDR_SIZE, 0, IW_MAX_SPY, 0),
        SIOCGIWSPY => EventDescriptor::point(SOCKADDR_SIZE + IW_QUALITY_SIZE, 0, IW_MAX_SPY, 0),
        SIOCSIWTHRSPY | SIOCGIWTHRSPY => EventDescriptor::point(IW_THRSPY_SIZE, 1, 1, 0),
        SIOCSIWAP | SIOCGIWAP => EventDescriptor::fixed(Addr),
        SIOCSIWMLME => EventDescriptor::point(1, IW_MLME_SIZE, IW_MLME_SIZE, 0),
        SIOCGIWAPLIST => {
            EventDescriptor::point(SOCKADDR_SIZE + IW_QUALITY_SIZE, 0, IW_MAX_AP, FLAG_NOMAX)
        }
        SIOCSIWSCAN => bytes(IW_SCAN_REQ_SIZE),
        SIOCGIWSCAN => EventDescriptor::point(1, 0, IW_SCAN_MAX_DATA, FLAG_NOMAX),
        SIOCSIWESSID | SIOCGIWESSID | SIOCSIWNICKN | SIOCGIWNICKN => bytes(IW_ESSID_MAX_SIZE + 1),
        SIOCSIWRATE | SIOCGIWRATE | SIOCSIWRTS | SIOCGIWRTS | SIOCSIWFRAG | SIOCGIWFRAG
        | SIOCSIWTXPOW | SIOCGIWTXPOW | SIOCSIWRETRY | SIOCGIWRETRY | SIOCSIWPOWER
        | SIOCGIWPOWER | SIOCSIWMODUL | SIOCGIWMODUL | SIOCSIWAUTH | SIOCGIWAUTH => {
            EventDescriptor::fixed(Param)
        }
        SIOCSIWENCODE | SIOCGIWENCODE => bytes(IW_ENCODING_TOKEN_MAX),
        SIOCSIWGENIE | SIOCGIWGENIE => bytes(IW_GENERIC_IE_MAX),
        SIOCSIWENCODEEXT | SIOCGIWENCODEEXT => EventDescriptor::point(
            1,
            IW_ENCODE_EXT_SIZE,
            IW_ENCODE_EXT_SIZE + IW_ENCODING_TOKEN_MAX,
            0,
        ),
        SIOCSIWPMKSA => EventDescriptor::point(1, IW_PMKSA_SIZE, IW_PMKSA_SIZE, 0),

        IWEVTXDROP | IWEVREGISTERED | IWEVEXPIRED => EventDescriptor::fixed(Addr),
        IWEVQUAL => EventDescriptor::fixed(Qual),
        IWEVCUSTOM => bytes(IW_CUSTOM_MAX),
        IWEVGENIE | IWEVASSOCREQIE | IWEVASSOCRESPIE => bytes(IW_GENERIC_IE_MAX),
        IWEVMICHAELMICFAILURE => bytes(IW_MICHAELMICFAILURE_SIZE),
        IWEVPMKIDCAND => bytes(IW_PMKID_CAND_SIZE),

        _ => EventDescriptor::HEADER_ONLY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_relevant_codes() {
        assert_eq!(descriptor(SIOCGIWAP).kind, PayloadKind::Addr);
        assert_eq!(descriptor(SIOCGIWFREQ).kind, PayloadKind::Freq);
        assert_eq!(descriptor(SIOCGIWMODE).kind, PayloadKind::Uint);
        assert_eq!(descriptor(IWEVQUAL).kind, PayloadKind::Qual);

        let essid = descriptor(SIOCGIWESSID);
        assert_eq!((essid.kind, essid.token_size, essid.max_tokens), (PayloadKind::Point, 1, 33));

        let genie = descriptor(IWEVGENIE);
        assert_eq!(genie.max_tokens, 1024);
        assert!(!genie.unbounded());
        assert!(descriptor(SIOCGIWSCAN).unbounded());
    }

    #[test]
    fn test_min_tokens() {
        assert_eq!(descriptor(SIOCGIWTHRSPY).min_tokens, 1);
        assert_eq!(descriptor(SIOCGIWENCODEEXT).min_tokens, 40);
        assert_eq!(descriptor(SIOCGIWENCODEEXT).max_tokens, 104);
    }

    #[test]
    fn test_unknown_codes_are_header_only() {
        for cmd in [0x8B1E, 0x8B1F, 0x8B37, 0x8BE0, 0x8C0A, 0x1234, 0xFFFF] {
            assert_eq!(descriptor(cmd), EventDescriptor::HEADER_ONLY, "cmd {cmd:#x}");
        }
        assert_eq!(descriptor(SIOCSIWCOMMIT).kind.fixed_len(), 0);
    }

    #[test]
    fn test_fixed_lengths() {
        assert_eq!(PayloadKind::Char.fixed_len(), 16);
        assert_eq!(PayloadKind::Freq.fixed_len(), 8);
        assert_eq!(PayloadKind::Addr.fixed_len(), 16);
        assert_eq!(PayloadKind::Point.fixed_len(), 4);
    }
}
