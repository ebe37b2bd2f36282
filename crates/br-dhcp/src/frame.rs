//! IPv4/UDP encapsulation for the link-layer send and receive paths.

use std::net::Ipv4Addr;
use thiserror::Error;

use crate::packet::{DhcpPacket, DhcpParseError};

pub const IP_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const IPPROTO_UDP: u8 = 17;
pub const CLIENT_PORT: u16 = 68;
pub const SERVER_PORT: u16 = 67;
const IP_DEFAULT_TTL: u8 = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("packet is too short ({0} bytes)")]
    TooShort(usize),
    #[error("oversized packet: IP length {declared}, read {read}")]
    Oversized { declared: usize, read: usize },
    #[error("not an IPv4/UDP datagram without options")]
    NotUdp,
    #[error("wrong destination port {0}")]
    WrongPort(u16),
    #[error("UDP length {udp} does not match IP length {ip}")]
    LengthMismatch { udp: usize, ip: usize },
    #[error("bad IP header checksum")]
    IpChecksum,
    #[error("bad UDP checksum")]
    UdpChecksum,
    #[error(transparent)]
    Dhcp(#[from] DhcpParseError),
}

/// RFC 1071 Internet checksum.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn udp_checksum(src: Ipv4Addr, dst: Ipv4Addr, udp: &[u8]) -> u16 {
    let mut buf = Vec::with_capacity(12 + udp.len());
    buf.extend_from_slice(&src.octets());
    buf.extend_from_slice(&dst.octets());
    buf.push(0);
    buf.push(IPPROTO_UDP);
    buf.extend_from_slice(&(udp.len() as u16).to_be_bytes());
    buf.extend_from_slice(udp);
    match internet_checksum(&buf) {
        0 => 0xffff,
        sum => sum,
    }
}

/// Wrap a DHCP payload in IPv4 and UDP headers with both checksums filled in.
pub fn build_ip_udp(
    payload: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    sport: u16,
    dport: u16,
) -> Vec<u8> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let total_len = IP_HEADER_LEN + udp_len;

    let mut udp = Vec::with_capacity(udp_len);
    udp.extend_from_slice(&sport.to_be_bytes());
    udp.extend_from_slice(&dport.to_be_bytes());
    udp.extend_from_slice(&(udp_len as u16).to_be_bytes());
    udp.extend_from_slice(&[0, 0]);
    udp.extend_from_slice(payload);
    let check = udp_checksum(src, dst, &udp);
    udp[6..8].copy_from_slice(&check.to_be_bytes());

    let mut frame = Vec::with_capacity(total_len);
    frame.push(0x45); // version 4, IHL 5
    frame.push(0); // TOS
    frame.extend_from_slice(&(total_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0]); // id, flags/fragment
    frame.push(IP_DEFAULT_TTL);
    frame.push(IPPROTO_UDP);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&dst.octets());
    let check = internet_checksum(&frame[..IP_HEADER_LEN]);
    frame[10..12].copy_from_slice(&check.to_be_bytes());

    frame.extend_from_slice(&udp);
    frame
}

/// Validate an IPv4/UDP datagram read from the link-layer socket and
/// return its UDP payload. Bytes beyond the IP total length are ignored.
pub fn parse_ip_udp(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.len() < IP_HEADER_LEN + UDP_HEADER_LEN {
        return Err(FrameError::TooShort(frame.len()));
    }
    let total_len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    if total_len > frame.len() {
        return Err(FrameError::Oversized {
            declared: total_len,
            read: frame.len(),
        });
    }
    let frame = &frame[..total_len];
    if total_len < IP_HEADER_LEN + UDP_HEADER_LEN {
        return Err(FrameError::TooShort(total_len));
    }

    let (ip, udp) = frame.split_at(IP_HEADER_LEN);
    if ip[9] != IPPROTO_UDP || ip[0] >> 4 != 4 || ip[0] & 0x0f != 5 {
        return Err(FrameError::NotUdp);
    }
    let dport = u16::from_be_bytes([udp[2], udp[3]]);
    if dport != CLIENT_PORT {
        return Err(FrameError::WrongPort(dport));
    }
    let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if udp_len != total_len - IP_HEADER_LEN {
        return Err(FrameError::LengthMismatch {
            udp: udp_len,
            ip: total_len,
        });
    }

    if internet_checksum(ip) != 0 {
        return Err(FrameError::IpChecksum);
    }

    let received = u16::from_be_bytes([udp[6], udp[7]]);
    if received != 0 {
        let src = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
        let dst = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);
        let mut zeroed = udp.to_vec();
        zeroed[6] = 0;
        zeroed[7] = 0;
        if udp_checksum(src, dst, &zeroed) != received {
            return Err(FrameError::UdpChecksum);
        }
    }

    Ok(&udp[UDP_HEADER_LEN..])
}

/// Full receive validation for the link-layer path.
pub fn decode_raw_packet(frame: &[u8]) -> Result<DhcpPacket, FrameError> {
    let payload = parse_ip_udp(frame)?;
    Ok(DhcpPacket::parse(payload)?)
}
