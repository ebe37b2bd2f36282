//! DHCPv4 packet parser/serializer (RFC 2131)

use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::debug;

use br_common::MacAddr;

use crate::options::{
    self, DhcpOption, OptionError, OptionSet, DHCPACK, DHCPNAK, DHCPOFFER, OPT_END,
    OPT_LEASE_TIME, OPT_MSG_TYPE, OPT_OVERLOAD, OPT_PAD, OPT_SERVER_ID, OVERLOAD_FILE,
    OVERLOAD_SNAME,
};

/// DHCP magic cookie
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed header plus cookie, i.e. the offset of the options area.
pub const DHCP_HEADER_LEN: usize = 240;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

pub const BROADCAST_FLAG: u16 = 0x8000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DhcpParseError {
    #[error("Packet too short: {0} bytes (minimum 240)")]
    TooShort(usize),
    #[error("Invalid magic cookie")]
    InvalidMagic,
}

/// DHCPv4 packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: OptionSet,
}

impl DhcpPacket {
    /// Zeroed template for `msg_type`, carrying the message-type option.
    pub fn new(msg_type: u8, xid: u32, mac: MacAddr) -> Result<Self, OptionError> {
        let op = match msg_type {
            DHCPOFFER | DHCPACK | DHCPNAK => BOOTREPLY,
            _ => BOOTREQUEST,
        };
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac.octets());
        let mut packet = DhcpPacket {
            op,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: OptionSet::new(),
        };
        packet.add_option(&DhcpOption::msg_type(msg_type))?;
        Ok(packet)
    }

    /// Parse a DHCP packet from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, DhcpParseError> {
        if data.len() < DHCP_HEADER_LEN {
            return Err(DhcpParseError::TooShort(data.len()));
        }

        // Verify magic cookie at offset 236
        if data[236..240] != MAGIC_COOKIE {
            return Err(DhcpParseError::InvalidMagic);
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        Ok(DhcpPacket {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            sname,
            file,
            options: OptionSet::from_wire(&data[DHCP_HEADER_LEN..]),
        })
    }

    /// Serialize to bytes. The frame ends right after the End option:
    /// some servers drop anything larger than 576 bytes of IP.
    pub fn to_bytes(&self) -> Vec<u8> {
        let opts = self.options.to_wire();
        let mut buf = Vec::with_capacity(DHCP_HEADER_LEN + opts.len());

        buf.push(self.op);
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(self.hops);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());
        buf.extend_from_slice(&self.chaddr);
        buf.extend_from_slice(&self.sname);
        buf.extend_from_slice(&self.file);
        buf.extend_from_slice(&MAGIC_COOKIE);
        buf.extend_from_slice(opts);

        buf
    }

    pub fn add_option(&mut self, option: &DhcpOption) -> Result<(), OptionError> {
        self.options.push(option)
    }

    /// True when the packet is addressed to the 6-byte hardware address `mac`.
    pub fn is_for(&self, mac: MacAddr) -> bool {
        self.hlen == 6 && self.chaddr[..6] == mac.octets()
    }

    /// Find the payload of option `code`.
    ///
    /// The options area is scanned first. When an Overload option announced
    /// it, the `file` field and then the `sname` field are scanned too, each
    /// at most once. A length running past the end of a field, or a field
    /// that ends without an End marker, stops the scan with `None`.
    pub fn get_option(&self, code: u8) -> Option<&[u8]> {
        let mut overload = 0u8;
        let mut seen_file = false;
        let mut seen_sname = false;
        let mut area: &[u8] = self.options.as_bytes();
        let mut i = 0usize;

        loop {
            let Some(&c) = area.get(i) else {
                debug!("bad packet, malformed option field");
                return None;
            };
            match c {
                OPT_PAD => i += 1,
                OPT_END => {
                    if overload & OVERLOAD_FILE != 0 && !seen_file {
                        seen_file = true;
                        area = &self.file;
                        i = 0;
                    } else if overload & OVERLOAD_SNAME != 0 && !seen_sname {
                        seen_sname = true;
                        area = &self.sname;
                        i = 0;
                    } else {
                        return None;
                    }
                }
                _ => {
                    let Some(data) = area
                        .get(i + 1)
                        .and_then(|len| area.get(i + 2..i + 2 + *len as usize))
                    else {
                        debug!("bad packet, option {:#04x} overruns its field", c);
                        return None;
                    };
                    if c == code {
                        return Some(data);
                    }
                    if c == OPT_OVERLOAD {
                        overload |= data.first().copied().unwrap_or(0);
                    }
                    i += 2 + data.len();
                }
            }
        }
    }

    /// Get DHCP message type
    pub fn msg_type(&self) -> Option<u8> {
        self.get_option(OPT_MSG_TYPE)?.first().copied()
    }

    /// Get server identifier
    pub fn server_id(&self) -> Option<Ipv4Addr> {
        options::ipv4_from(self.get_option(OPT_SERVER_ID)?)
    }

    /// Raw lease time option, host order
    pub fn lease_time(&self) -> Option<u32> {
        options::u32_from(self.get_option(OPT_LEASE_TIME)?)
    }

    pub fn option_ipv4(&self, code: u8) -> Option<Ipv4Addr> {
        options::ipv4_from(self.get_option(code)?)
    }

    /// Every IPv4 address in a list-valued option (routers, DNS, NTP).
    pub fn option_ipv4_list(&self, code: u8) -> Vec<Ipv4Addr> {
        self.get_option(code)
            .map(|data| data.chunks_exact(4).filter_map(options::ipv4_from).collect())
            .unwrap_or_default()
    }

    pub fn option_str(&self, code: u8) -> Option<String> {
        self.get_option(code)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    /// Check if broadcast flag is set
    pub fn is_broadcast(&self) -> bool {
        self.flags & BROADCAST_FLAG != 0
    }
}

#[cfg(test)]
pub(crate) fn area_with(opts: &[DhcpOption]) -> Vec<u8> {
    options::encode_options(opts).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::*;

    fn make_offer() -> Vec<u8> {
        let mut pkt = vec![0u8; 300];
        pkt[0] = 2; // BOOTREPLY
        pkt[1] = 1; // Ethernet
        pkt[2] = 6; // MAC length
        pkt[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        pkt[16..20].copy_from_slice(&[192, 168, 1, 50]);
        pkt[28..34].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        pkt[236..240].copy_from_slice(&MAGIC_COOKIE);
        let opts = area_with(&[
            DhcpOption::msg_type(DHCPOFFER),
            DhcpOption::server_id(Ipv4Addr::new(192, 168, 1, 1)),
            DhcpOption::lease_time(7200),
        ]);
        pkt[240..240 + opts.len()].copy_from_slice(&opts);
        pkt
    }

    #[test]
    fn test_parse_offer() {
        let pkt = DhcpPacket::parse(&make_offer()).unwrap();
        assert_eq!(pkt.op, BOOTREPLY);
        assert_eq!(pkt.xid, 0x12345678);
        assert_eq!(pkt.yiaddr, Ipv4Addr::new(192, 168, 1, 50));
        assert!(pkt.is_for(MacAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])));
        assert_eq!(pkt.msg_type(), Some(DHCPOFFER));
        assert_eq!(pkt.server_id(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(pkt.lease_time(), Some(7200));
    }

    #[test]
    fn test_parse_rejects_short_and_bad_cookie() {
        assert_eq!(DhcpPacket::parse(&[0u8; 100]), Err(DhcpParseError::TooShort(100)));
        let mut data = make_offer();
        data[236] = 0;
        assert_eq!(DhcpPacket::parse(&data), Err(DhcpParseError::InvalidMagic));
    }

    #[test]
    fn test_serialization_stops_after_end() {
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        let pkt = DhcpPacket::new(DHCPDISCOVER, 7, mac).unwrap();
        let bytes = pkt.to_bytes();
        assert_eq!(bytes.len(), DHCP_HEADER_LEN + 4);
        assert_eq!(&bytes[240..], &[OPT_MSG_TYPE, 1, DHCPDISCOVER, OPT_END]);

        let back = DhcpPacket::parse(&bytes).unwrap();
        assert_eq!(back.op, BOOTREQUEST);
        assert_eq!(back.xid, 7);
        assert!(back.is_for(mac));
    }

    #[test]
    fn test_reply_types_use_bootreply() {
        let mac = MacAddr::default();
        assert_eq!(DhcpPacket::new(DHCPACK, 1, mac).unwrap().op, BOOTREPLY);
        assert_eq!(DhcpPacket::new(DHCPRELEASE, 1, mac).unwrap().op, BOOTREQUEST);
    }

    #[test]
    fn test_overload_reaches_file_then_sname() {
        let mut data = make_offer();
        let opts = area_with(&[
            DhcpOption::msg_type(DHCPACK),
            DhcpOption::new(OPT_OVERLOAD, vec![OVERLOAD_FILE | OVERLOAD_SNAME]),
        ]);
        data[240..300].fill(0);
        data[240..240 + opts.len()].copy_from_slice(&opts);
        // file field (offset 108) carries the router
        let in_file = area_with(&[DhcpOption::new(OPT_ROUTER, vec![10, 0, 0, 1])]);
        data[108..108 + in_file.len()].copy_from_slice(&in_file);
        // sname field (offset 44) carries the domain
        let in_sname = area_with(&[DhcpOption::new(OPT_DOMAIN_NAME, b"lan".to_vec())]);
        data[44..44 + in_sname.len()].copy_from_slice(&in_sname);

        let pkt = DhcpPacket::parse(&data).unwrap();
        assert_eq!(pkt.option_ipv4(OPT_ROUTER), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(pkt.option_str(OPT_DOMAIN_NAME).as_deref(), Some("lan"));
        assert_eq!(pkt.get_option(OPT_NTP_SERVER), None);
    }

    #[test]
    fn test_without_overload_file_is_ignored() {
        let mut data = make_offer();
        let in_file = area_with(&[DhcpOption::new(OPT_ROUTER, vec![10, 0, 0, 1])]);
        data[108..108 + in_file.len()].copy_from_slice(&in_file);
        let pkt = DhcpPacket::parse(&data).unwrap();
        assert_eq!(pkt.get_option(OPT_ROUTER), None);
    }

    #[test]
    fn test_overrunning_option_is_not_found() {
        let mut data = make_offer();
        data.truncate(240);
        data.extend_from_slice(&[OPT_MSG_TYPE, 1, DHCPACK, OPT_LEASE_TIME, 4, 0, 0]);
        let pkt = DhcpPacket::parse(&data).unwrap();
        assert_eq!(pkt.msg_type(), Some(DHCPACK));
        assert_eq!(pkt.lease_time(), None);
    }

    #[test]
    fn test_missing_end_is_not_found() {
        let mut data = make_offer();
        data.truncate(240);
        data.extend_from_slice(&[OPT_PAD, OPT_MSG_TYPE, 1, DHCPACK]);
        let pkt = DhcpPacket::parse(&data).unwrap();
        assert_eq!(pkt.msg_type(), Some(DHCPACK));
        assert_eq!(pkt.server_id(), None);
    }

    #[test]
    fn test_ipv4_list() {
        let mut data = make_offer();
        let opts = area_with(&[
            DhcpOption::msg_type(DHCPACK),
            DhcpOption::new(OPT_DNS_SERVER, vec![1, 1, 1, 1, 8, 8, 8, 8]),
        ]);
        data[240..300].fill(0);
        data[240..240 + opts.len()].copy_from_slice(&opts);
        let pkt = DhcpPacket::parse(&data).unwrap();
        assert_eq!(
            pkt.option_ipv4_list(OPT_DNS_SERVER),
            vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)]
        );
    }
}
