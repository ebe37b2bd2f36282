//! Interface lookup through the classic `SIOCGIF*` ioctls.

use socket2::{Domain, Socket, Type};
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use thiserror::Error;

use crate::mac::MacAddr;

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("invalid interface name {0:?}")]
    InvalidName(String),

    #[error("cannot open control socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("interface {name}: {op} failed: {source}")]
    Ioctl {
        name: String,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Everything the lease client needs to know about the local link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterfaceHandle {
    pub name: String,
    pub index: i32,
    pub mac: MacAddr,
    /// Current IPv4 address, if one is configured.
    pub address: Option<Ipv4Addr>,
}

#[repr(C)]
#[derive(Clone, Copy)]
union IfrData {
    addr: libc::sockaddr,
    ifindex: libc::c_int,
    _pad: [u8; 24],
}

#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    data: IfrData,
}

/// NUL-padded `ifr_name` field for ioctl requests on `name`.
pub fn ifname(name: &str) -> Result<[libc::c_char; libc::IFNAMSIZ], InterfaceError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= libc::IFNAMSIZ || bytes.contains(&0) {
        return Err(InterfaceError::InvalidName(name.to_string()));
    }
    let mut out = [0 as libc::c_char; libc::IFNAMSIZ];
    for (dst, src) in out.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(out)
}

impl IfReq {
    fn new(name: &str) -> Result<Self, InterfaceError> {
        Ok(IfReq {
            name: ifname(name)?,
            data: IfrData { _pad: [0; 24] },
        })
    }
}

fn ifreq_ioctl(
    sock: &Socket,
    name: &str,
    request: libc::c_ulong,
    op: &'static str,
) -> Result<IfReq, InterfaceError> {
    let mut req = IfReq::new(name)?;
    // SAFETY: req is a properly sized ifreq living for the duration of the call.
    let rc = unsafe { libc::ioctl(sock.as_raw_fd(), request as _, &mut req as *mut IfReq) };
    if rc < 0 {
        return Err(InterfaceError::Ioctl {
            name: name.to_string(),
            op,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(req)
}

impl NetworkInterfaceHandle {
    /// Resolve index, hardware address and (optionally) IPv4 address of `name`.
    pub fn resolve(name: &str) -> Result<Self, InterfaceError> {
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(InterfaceError::Socket)?;

        let req = ifreq_ioctl(&sock, name, libc::SIOCGIFINDEX as libc::c_ulong, "SIOCGIFINDEX")?;
        // SAFETY: the kernel filled the ifindex member.
        let index = unsafe { req.data.ifindex };

        let req = ifreq_ioctl(&sock, name, libc::SIOCGIFHWADDR as libc::c_ulong, "SIOCGIFHWADDR")?;
        // SAFETY: the kernel filled the hwaddr sockaddr.
        let sa_data = unsafe { req.data.addr.sa_data };
        let raw: Vec<u8> = sa_data.iter().map(|b| *b as u8).collect();
        let mac = MacAddr::from_slice(&raw).unwrap_or_default();

        // An unconfigured interface answers EADDRNOTAVAIL here.
        let address = ifreq_ioctl(&sock, name, libc::SIOCGIFADDR as libc::c_ulong, "SIOCGIFADDR")
            .ok()
            .map(|req| {
                // SAFETY: SIOCGIFADDR returns an AF_INET sockaddr_in in the addr member.
                let sin: libc::sockaddr_in =
                    unsafe { std::mem::transmute::<libc::sockaddr, libc::sockaddr_in>(req.data.addr) };
                Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))
            });

        Ok(Self {
            name: name.to_string(),
            index,
            mac,
            address,
        })
    }
}
