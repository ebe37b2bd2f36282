use std::net::Ipv4Addr;
use thiserror::Error;

/// DHCP option codes (RFC 2132)
pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_TIME_OFFSET: u8 = 2;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_LPR_SERVER: u8 = 9;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_BOOT_SIZE: u8 = 13;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_SWAP_SERVER: u8 = 16;
pub const OPT_ROOT_PATH: u8 = 17;
pub const OPT_IP_TTL: u8 = 23;
pub const OPT_MTU: u8 = 26;
pub const OPT_BROADCAST_ADDR: u8 = 28;
pub const OPT_ROUTES: u8 = 33;
pub const OPT_NIS_DOMAIN: u8 = 40;
pub const OPT_NIS_SERVER: u8 = 41;
pub const OPT_NTP_SERVER: u8 = 42;
pub const OPT_WINS_SERVER: u8 = 44;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_OVERLOAD: u8 = 52;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAM_REQUEST: u8 = 55;
pub const OPT_ERR_MESSAGE: u8 = 56;
pub const OPT_MAX_SIZE: u8 = 57;
pub const OPT_VENDOR_CLASS: u8 = 60;
pub const OPT_CLIENT_ID: u8 = 61;
pub const OPT_TFTP_SERVER_NAME: u8 = 66;
pub const OPT_BOOT_FILE: u8 = 67;
pub const OPT_FQDN: u8 = 81;
pub const OPT_STATIC_ROUTES: u8 = 121;
pub const OPT_MS_STATIC_ROUTES: u8 = 249;
pub const OPT_WPAD: u8 = 252;
pub const OPT_END: u8 = 255;

/// Overload (option 52) flag values
pub const OVERLOAD_FILE: u8 = 1;
pub const OVERLOAD_SNAME: u8 = 2;

/// DHCP message types
pub const DHCPDISCOVER: u8 = 1;
pub const DHCPOFFER: u8 = 2;
pub const DHCPREQUEST: u8 = 3;
pub const DHCPACK: u8 = 5;
pub const DHCPNAK: u8 = 6;
pub const DHCPRELEASE: u8 = 7;

/// Size of the fixed options area in a standard BOOTP/DHCP frame.
pub const DHCP_OPTIONS_BUFSIZE: usize = 308;

/// Largest IP+UDP+DHCP datagram every server must accept.
pub const IP_UDP_DHCP_SIZE: u16 = 576;

/// Options the client knows about, in the order they appear in a
/// parameter-request list. `true` marks the ones requested by default.
pub const PARAM_REQUEST_TABLE: &[(u8, bool)] = &[
    (OPT_SUBNET_MASK, true),
    (OPT_TIME_OFFSET, false),
    (OPT_ROUTER, true),
    (OPT_DNS_SERVER, true),
    (OPT_LPR_SERVER, false),
    (OPT_HOSTNAME, true),
    (OPT_BOOT_SIZE, false),
    (OPT_DOMAIN_NAME, true),
    (OPT_SWAP_SERVER, false),
    (OPT_ROOT_PATH, false),
    (OPT_IP_TTL, false),
    (OPT_MTU, false),
    (OPT_BROADCAST_ADDR, true),
    (OPT_ROUTES, false),
    (OPT_NIS_DOMAIN, false),
    (OPT_NIS_SERVER, false),
    (OPT_NTP_SERVER, true),
    (OPT_WINS_SERVER, false),
    (OPT_LEASE_TIME, false),
    (OPT_SERVER_ID, false),
    (OPT_ERR_MESSAGE, false),
    (OPT_TFTP_SERVER_NAME, false),
    (OPT_BOOT_FILE, false),
    (OPT_STATIC_ROUTES, false),
    (OPT_MS_STATIC_ROUTES, false),
    (OPT_WPAD, false),
    (OPT_REQUESTED_IP, false),
    (OPT_MSG_TYPE, false),
    (OPT_MAX_SIZE, false),
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionError {
    #[error("option {code:#04x} did not fit into the packet")]
    Overflow { code: u8 },
    #[error("option {code:#04x} payload is {len} bytes (maximum 255)")]
    TooLong { code: u8, len: usize },
    #[error("malformed options area")]
    Malformed,
}

/// A parsed DHCP option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl DhcpOption {
    pub fn new(code: u8, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    pub fn msg_type(t: u8) -> Self {
        Self::new(OPT_MSG_TYPE, vec![t])
    }

    pub fn server_id(ip: Ipv4Addr) -> Self {
        Self::new(OPT_SERVER_ID, ip.octets().to_vec())
    }

    pub fn requested_ip(ip: Ipv4Addr) -> Self {
        Self::new(OPT_REQUESTED_IP, ip.octets().to_vec())
    }

    pub fn max_size(size: u16) -> Self {
        Self::new(OPT_MAX_SIZE, size.to_be_bytes().to_vec())
    }

    pub fn lease_time(secs: u32) -> Self {
        Self::new(OPT_LEASE_TIME, secs.to_be_bytes().to_vec())
    }

    pub fn hostname(name: &str) -> Self {
        Self::new(OPT_HOSTNAME, truncated(name.as_bytes()).to_vec())
    }

    pub fn vendor_class(class: &str) -> Self {
        Self::new(OPT_VENDOR_CLASS, truncated(class.as_bytes()).to_vec())
    }

    /// Client FQDN (RFC 4702): flags byte with the S bit set, two zero RCODEs, then the name.
    pub fn fqdn(name: &str) -> Self {
        let mut data = vec![0x01, 0, 0];
        data.extend_from_slice(&name.as_bytes()[..name.len().min(252)]);
        Self::new(OPT_FQDN, data)
    }
}

fn truncated(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len().min(255)]
}

pub(crate) fn ipv4_from(data: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

pub(crate) fn u32_from(data: &[u8]) -> Option<u32> {
    let octets: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(octets))
}

/// Parse DHCP options from bytes (after magic cookie).
pub fn parse_options(data: &[u8]) -> Vec<DhcpOption> {
    let mut options = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        if code == OPT_END {
            break;
        }
        if code == OPT_PAD {
            i += 1;
            continue;
        }

        i += 1;
        if i >= data.len() {
            break;
        }

        let len = data[i] as usize;
        i += 1;

        if i + len > data.len() {
            break;
        }

        options.push(DhcpOption::new(code, data[i..i + len].to_vec()));
        i += len;
    }

    options
}

/// Encode DHCP options to bytes.
pub fn encode_options(options: &[DhcpOption]) -> Result<Vec<u8>, OptionError> {
    let mut buf = Vec::new();
    for opt in options {
        if opt.data.len() > 255 {
            return Err(OptionError::TooLong {
                code: opt.code,
                len: opt.data.len(),
            });
        }
        buf.push(opt.code);
        buf.push(opt.data.len() as u8);
        buf.extend_from_slice(&opt.data);
    }
    buf.push(OPT_END);
    Ok(buf)
}

/// The options area of one packet: `[code][len][data..]` triples closed by End.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSet {
    area: Vec<u8>,
    capacity: usize,
}

impl Default for OptionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionSet {
    pub fn new() -> Self {
        Self::with_capacity(DHCP_OPTIONS_BUFSIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            area: vec![OPT_END],
            capacity,
        }
    }

    /// Wrap an options area as received on the wire. The bytes are kept
    /// verbatim, padding and anything after End included.
    pub fn from_wire(area: &[u8]) -> Self {
        Self {
            area: area.to_vec(),
            capacity: area.len().max(DHCP_OPTIONS_BUFSIZE),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.area
    }

    /// Offset of the End marker, skipping padding and option bodies.
    pub fn end_offset(&self) -> Option<usize> {
        let mut i = 0;
        loop {
            match *self.area.get(i)? {
                OPT_END => return Some(i),
                OPT_PAD => i += 1,
                _ => i += 2 + *self.area.get(i + 1)? as usize,
            }
        }
    }

    /// Append an option before End. Running out of room is an error, never a silent truncation.
    pub fn push(&mut self, option: &DhcpOption) -> Result<(), OptionError> {
        if option.data.len() > 255 {
            return Err(OptionError::TooLong {
                code: option.code,
                len: option.data.len(),
            });
        }
        let end = self.end_offset().ok_or(OptionError::Malformed)?;
        let len = 2 + option.data.len();
        if end + len + 1 >= self.capacity {
            return Err(OptionError::Overflow { code: option.code });
        }
        self.area.truncate(end);
        self.area.push(option.code);
        self.area.push(option.data.len() as u8);
        self.area.extend_from_slice(&option.data);
        self.area.push(OPT_END);
        Ok(())
    }

    /// Bytes to put on the wire: everything up to and including End.
    pub fn to_wire(&self) -> &[u8] {
        match self.end_offset() {
            Some(end) => &self.area[..=end],
            None => &self.area,
        }
    }

    /// The well-formed options before End, in order.
    pub fn options(&self) -> Vec<DhcpOption> {
        parse_options(&self.area)
    }
}
