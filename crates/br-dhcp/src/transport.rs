//! Sockets: link-layer broadcast send, kernel UDP unicast send, and the
//! two listeners (raw with a BPF filter, kernel UDP bound to the device).

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsRawFd;
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

use br_common::{MacAddr, NetworkInterfaceHandle};

use crate::error::ClientError;
use crate::frame::{self, CLIENT_PORT, SERVER_PORT};
use crate::options::OPT_VENDOR_CLASS;
use crate::packet::{BOOTREQUEST, BROADCAST_FLAG, DhcpPacket};
use crate::state_machine::{ListenMode, Outbound, Route};

/// Vendor class of a client known to need broadcast replies.
const BROKEN_VENDOR: &[u8] = b"MSFT 98";

const RECV_BUF_LEN: usize = 1500;

// Classic BPF opcodes
const BPF_LD_B_ABS: u16 = 0x30;
const BPF_LD_W_ABS: u16 = 0x20;
const BPF_LDX_B_MSH: u16 = 0xb1;
const BPF_LD_W_IND: u16 = 0x40;
const BPF_JEQ_K: u16 = 0x15;
const BPF_RET_K: u16 = 0x06;

/// Accept UDP 67 -> 68 (ARP also passes and is rejected in userspace).
fn dhcp_filter() -> [libc::sock_filter; 9] {
    let op = |code: u16, jt: u8, jf: u8, k: u32| libc::sock_filter { code, jt, jf, k };
    [
        op(BPF_LD_B_ABS, 0, 0, 9),                         // A = IP protocol
        op(BPF_JEQ_K, 2, 0, u32::from(frame::IPPROTO_UDP)), // UDP?
        op(BPF_LD_W_ABS, 0, 0, 2),                         // ARP: A = htype/ptype/hlen/plen
        op(BPF_JEQ_K, 3, 4, 0x0800_0604),                  // Ethernet/IPv4
        op(BPF_LDX_B_MSH, 0, 0, 0),                        // X = IP header length
        op(BPF_LD_W_IND, 0, 0, 0),                         // A = src port << 16 | dst port
        op(BPF_JEQ_K, 0, 1, u32::from(SERVER_PORT) << 16 | u32::from(CLIENT_PORT)),
        op(BPF_RET_K, 0, 0, 0x0fff_ffff),                  // accept
        op(BPF_RET_K, 0, 0, 0),                            // drop
    ]
}

fn packet_protocol() -> u16 {
    (libc::ETH_P_IP as u16).to_be()
}

fn link_addr(ifindex: i32, dest: MacAddr) -> libc::sockaddr_ll {
    let mut addr = [0u8; 8];
    addr[..6].copy_from_slice(&dest.octets());
    libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as u16,
        sll_protocol: packet_protocol(),
        sll_ifindex: ifindex,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: 6,
        sll_addr: addr,
    }
}

fn packet_socket() -> io::Result<Socket> {
    Socket::new(
        Domain::PACKET,
        Type::DGRAM,
        Some(Protocol::from(i32::from(packet_protocol()))),
    )
}

/// Build IP+UDP around the packet and broadcast it on the link.
pub fn send_raw(packet: &DhcpPacket, iface: &NetworkInterfaceHandle) -> io::Result<()> {
    let frame = frame::build_ip_udp(
        &packet.to_bytes(),
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::BROADCAST,
        CLIENT_PORT,
        SERVER_PORT,
    );
    let socket = packet_socket()?;
    let dest = link_addr(iface.index, MacAddr::BROADCAST);
    // SAFETY: frame and dest outlive the call; the length matches sockaddr_ll.
    let sent = unsafe {
        libc::sendto(
            socket.as_raw_fd(),
            frame.as_ptr() as *const libc::c_void,
            frame.len(),
            0,
            &dest as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Unicast through the kernel stack, which does IP/UDP and checksums.
pub fn send_kernel(packet: &DhcpPacket, source: Ipv4Addr, server: Ipv4Addr) -> io::Result<()> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(source, CLIENT_PORT)))?;
    socket.connect(&SockAddr::from(SocketAddrV4::new(server, SERVER_PORT)))?;
    socket.send(&packet.to_bytes())?;
    Ok(())
}

pub fn send(outbound: &Outbound, iface: &NetworkInterfaceHandle) -> io::Result<()> {
    match outbound.route {
        Route::Broadcast => send_raw(&outbound.packet, iface),
        Route::Unicast { source, server } => send_kernel(&outbound.packet, source, server),
    }
}

fn open_raw(iface: &NetworkInterfaceHandle) -> io::Result<Socket> {
    let socket = packet_socket()?;

    let filter = dhcp_filter();
    let prog = libc::sock_fprog {
        len: filter.len() as u16,
        filter: filter.as_ptr() as *mut libc::sock_filter,
    };
    // SAFETY: prog points at `filter`, which lives until setsockopt returns.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &prog as *const libc::sock_fprog as *const libc::c_void,
            mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        warn!("Cannot attach packet filter: {}", io::Error::last_os_error());
    }

    let sll = link_addr(iface.index, MacAddr::default());
    // SAFETY: sll is a valid sockaddr_ll for the duration of the call.
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(socket)
}

fn open_kernel(iface: &NetworkInterfaceHandle) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind_device(Some(iface.name.as_bytes()))?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(
        Ipv4Addr::UNSPECIFIED,
        CLIENT_PORT,
    )))?;
    Ok(socket)
}

/// Apply the broken-vendor fix-up to packets read from the kernel socket.
fn kernel_fixup(packet: &mut DhcpPacket) {
    if packet.op == BOOTREQUEST && packet.get_option(OPT_VENDOR_CLASS) == Some(BROKEN_VENDOR) {
        debug!("Broken client (MSFT 98), forcing broadcast replies");
        packet.flags |= BROADCAST_FLAG;
    }
}

/// Decode bytes read from a listener of the given mode.
pub fn decode(mode: ListenMode, bytes: &[u8]) -> Option<DhcpPacket> {
    let result = match mode {
        ListenMode::Raw => frame::decode_raw_packet(bytes).map_err(|e| e.to_string()),
        ListenMode::Kernel => DhcpPacket::parse(bytes)
            .map(|mut p| {
                kernel_fixup(&mut p);
                p
            })
            .map_err(|e| e.to_string()),
        ListenMode::None => return None,
    };
    match result {
        Ok(packet) => Some(packet),
        Err(e) => {
            debug!("Dropping packet: {}", e);
            None
        }
    }
}

/// The socket the client currently waits on.
pub struct Listener {
    mode: ListenMode,
    socket: AsyncFd<Socket>,
}

impl Listener {
    /// Open a listener for `mode`; `ListenMode::None` yields no socket.
    pub fn open(mode: ListenMode, iface: &NetworkInterfaceHandle) -> Result<Option<Self>, ClientError> {
        let (what, opened) = match mode {
            ListenMode::None => return Ok(None),
            ListenMode::Raw => ("raw", open_raw(iface)),
            ListenMode::Kernel => ("kernel UDP", open_kernel(iface)),
        };
        let socket = opened
            .and_then(|s| {
                s.set_nonblocking(true)?;
                AsyncFd::new(s)
            })
            .map_err(|source| ClientError::Socket { what, source })?;
        debug!("Opened {} listener on {}", what, iface.name);
        Ok(Some(Self { mode, socket }))
    }

    /// Wait for the next datagram. `Ok(None)` means it was read and rejected.
    pub async fn recv(&self) -> io::Result<Option<DhcpPacket>> {
        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            let mut guard = self.socket.readable().await?;
            match guard.try_io(|inner| {
                let mut sock: &Socket = inner.get_ref();
                sock.read(&mut buf)
            }) {
                Ok(Ok(n)) => return Ok(decode(self.mode, &buf[..n])),
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DhcpOption, DHCPDISCOVER, DHCPOFFER};

    #[test]
    fn test_filter_program() {
        let f = dhcp_filter();
        assert_eq!(f.len(), 9);
        assert_eq!(f[6].k, 0x0043_0044);
        assert_eq!((f[3].jt, f[3].jf), (3, 4));
        assert_eq!(f[7].code, BPF_RET_K);
    }

    #[test]
    fn test_kernel_decode_forces_broadcast_for_broken_vendor() {
        let mut pkt = DhcpPacket::new(DHCPDISCOVER, 1, MacAddr::default()).unwrap();
        pkt.add_option(&DhcpOption::vendor_class("MSFT 98")).unwrap();
        let decoded = decode(ListenMode::Kernel, &pkt.to_bytes()).unwrap();
        assert!(decoded.is_broadcast());

        let mut pkt = DhcpPacket::new(DHCPDISCOVER, 1, MacAddr::default()).unwrap();
        pkt.add_option(&DhcpOption::vendor_class("MSFT 5.0")).unwrap();
        assert!(!decode(ListenMode::Kernel, &pkt.to_bytes()).unwrap().is_broadcast());
    }

    #[test]
    fn test_kernel_decode_checks_cookie_only() {
        let pkt = DhcpPacket::new(DHCPOFFER, 9, MacAddr::default()).unwrap();
        let mut bytes = pkt.to_bytes();
        assert!(decode(ListenMode::Kernel, &bytes).is_some());
        bytes[237] = 0;
        assert!(decode(ListenMode::Kernel, &bytes).is_none());
    }

    #[test]
    fn test_raw_decode_rejects_bad_ip_checksum() {
        let pkt = DhcpPacket::new(DHCPOFFER, 9, MacAddr::default()).unwrap();
        let mut bytes = frame::build_ip_udp(
            &pkt.to_bytes(),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::BROADCAST,
            SERVER_PORT,
            CLIENT_PORT,
        );
        assert!(decode(ListenMode::Raw, &bytes).is_some());
        bytes[11] ^= 0x5a;
        assert!(decode(ListenMode::Raw, &bytes).is_none());
    }
}
