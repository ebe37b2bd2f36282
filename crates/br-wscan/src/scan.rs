//! Scan acquisition: range query, scan trigger, polled result read.

use socket2::{Domain, Socket, Type};
use std::io;
use std::os::fd::AsRawFd;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use br_common::InterfaceError;

use crate::ap::{decode_scan_buffer, ApRecord};
use crate::config::ScanConfig;
use crate::descriptor::{IW_RANGE_SIZE, SIOCGIWRANGE, SIOCGIWSCAN, SIOCSIWSCAN};
use crate::range::RangeInfo;

/// `iw_point.length` is 16 bits wide.
pub const MAX_SCAN_BUFFER: usize = u16::MAX as usize;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("{0}")]
    Interface(#[from] InterfaceError),

    #[error("cannot open control socket: {0}")]
    Socket(#[source] io::Error),

    #[error("{interface}: interface doesn't support scanning: {source}")]
    Unsupported {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("{interface}: scan request failed: {source}")]
    Trigger {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("{interface}: failed to read scan data: {source}")]
    Read {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("{interface}: no scan results after {waited:?}")]
    Timeout { interface: String, waited: Duration },
}

/// Outcome of one `SIOCGIWSCAN` read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRead {
    /// Bytes of event data written to the buffer.
    Data(usize),
    /// `EAGAIN`: the scan is still running.
    NotReady,
    /// `E2BIG`: the buffer was too small; `hint` is the driver's suggestion.
    TooSmall { hint: usize },
}

/// The wireless-extension ioctls a scan needs.
pub trait WirelessExtensions {
    fn interface(&self) -> &str;

    /// Raw `struct iw_range` (`SIOCGIWRANGE`).
    fn range(&self) -> io::Result<Vec<u8>>;

    /// Start a scan (`SIOCSIWSCAN`).
    fn trigger(&self) -> io::Result<()>;

    /// Read results into `buf` (`SIOCGIWSCAN`).
    fn read_scan(&self, buf: &mut [u8]) -> io::Result<ScanRead>;
}

#[repr(C)]
#[derive(Clone, Copy)]
struct IwPoint {
    pointer: *mut libc::c_void,
    length: u16,
    flags: u16,
}

#[repr(C)]
union IwReqData {
    data: IwPoint,
    _pad: [u8; 16],
}

#[repr(C)]
struct IwReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    u: IwReqData,
}

/// Wireless extensions through ioctls on a datagram socket.
pub struct KernelWext {
    interface: String,
    name: [libc::c_char; libc::IFNAMSIZ],
    socket: Socket,
}

impl KernelWext {
    pub fn open(interface: &str) -> Result<Self, ScanError> {
        let name = br_common::ifname(interface)?;
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(ScanError::Socket)?;
        Ok(Self {
            interface: interface.to_string(),
            name,
            socket,
        })
    }

    /// Issue a point-carrying request; returns the length the kernel wrote back.
    fn point_ioctl(&self, request: u16, buf: Option<&mut [u8]>) -> io::Result<usize> {
        let (pointer, length) = match buf {
            Some(buf) => (
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len().min(MAX_SCAN_BUFFER) as u16,
            ),
            None => (std::ptr::null_mut(), 0),
        };
        let mut req = IwReq {
            name: self.name,
            u: IwReqData {
                data: IwPoint {
                    pointer,
                    length,
                    flags: 0,
                },
            },
        };
        // SAFETY: req is a complete iwreq; pointer/length describe a live
        // buffer (or null/0) for the duration of the call.
        let rc = unsafe {
            libc::ioctl(
                self.socket.as_raw_fd(),
                libc::c_ulong::from(request) as _,
                &mut req as *mut IwReq,
            )
        };
        // SAFETY: the data member is the one we initialized and the kernel updates.
        let written = usize::from(unsafe { req.u.data.length });
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::E2BIG) {
                return Err(io::Error::other(TooSmall(written)));
            }
            return Err(err);
        }
        Ok(written)
    }
}

/// Carries the driver's size hint out of a failed `E2BIG` read.
#[derive(Debug, Error)]
#[error("scan buffer too small, driver wants {0} bytes")]
struct TooSmall(usize);

impl WirelessExtensions for KernelWext {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn range(&self) -> io::Result<Vec<u8>> {
        // headroom for drivers built against a larger iw_range
        let mut buf = vec![0u8; 2 * usize::from(IW_RANGE_SIZE)];
        let written = self.point_ioctl(SIOCGIWRANGE, Some(&mut buf))?;
        buf.truncate(written.max(usize::from(IW_RANGE_SIZE)));
        Ok(buf)
    }

    fn trigger(&self) -> io::Result<()> {
        self.point_ioctl(SIOCSIWSCAN, None).map(|_| ())
    }

    fn read_scan(&self, buf: &mut [u8]) -> io::Result<ScanRead> {
        match self.point_ioctl(SIOCGIWSCAN, Some(buf)) {
            Ok(written) => Ok(ScanRead::Data(written)),
            Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => Ok(ScanRead::NotReady),
            Err(err) => match err.get_ref().and_then(|inner| inner.downcast_ref::<TooSmall>()) {
                Some(TooSmall(hint)) => Ok(ScanRead::TooSmall { hint: *hint }),
                None => Err(err),
            },
        }
    }
}

pub struct Scanner<W> {
    wext: W,
    config: ScanConfig,
}

impl<W: WirelessExtensions> Scanner<W> {
    pub fn new(wext: W, config: ScanConfig) -> Self {
        Self { wext, config }
    }

    /// Scan, retrying when a scan completes without finding anything.
    pub fn scan(&self) -> Result<Vec<ApRecord>, ScanError> {
        let attempts = self.config.attempts.max(1);
        let mut records = Vec::new();
        for attempt in 1..=attempts {
            records = self.scan_once()?;
            if !records.is_empty() {
                break;
            }
            debug!(attempt, "scan found no access points");
        }
        info!(
            interface = self.wext.interface(),
            count = records.len(),
            "scan complete"
        );
        Ok(records)
    }

    fn scan_once(&self) -> Result<Vec<ApRecord>, ScanError> {
        let interface = self.wext.interface().to_string();
        let range = self
            .wext
            .range()
            .map(|reply| RangeInfo::from_reply(&reply))
            .map_err(|source| ScanError::Unsupported {
                interface: interface.clone(),
                source,
            })?;

        let mut wait = self.config.initial_delay();
        if self.config.cached_only {
            wait = Duration::ZERO;
        } else if let Err(source) = self.wext.trigger() {
            if source.raw_os_error() != Some(libc::EPERM) {
                return Err(ScanError::Trigger { interface, source });
            }
            // Without permission to scan, leftover results may still be readable.
            warn!(interface = %interface, "not permitted to trigger a scan, reading cached results");
            wait = Duration::ZERO;
        }

        let overall = self.config.overall_timeout();
        let mut budget = overall.saturating_sub(wait);
        let mut buffer = vec![0u8; self.config.initial_buffer.clamp(1, MAX_SCAN_BUFFER)];

        loop {
            thread::sleep(wait);
            if let Some(len) = self.read_growing(&mut buffer, &range)? {
                let records = decode_scan_buffer(&buffer[..len.min(buffer.len())], Some(&range));
                debug!(bytes = len, aps = records.len(), "decoded scan results");
                return Ok(records);
            }

            wait = self.config.retry_delay();
            budget = budget.saturating_sub(wait);
            if budget.is_zero() {
                return Err(ScanError::Timeout {
                    interface,
                    waited: overall,
                });
            }
        }
    }

    /// Read results, growing `buffer` while the driver reports it too small.
    /// `None` means the results are not ready yet.
    fn read_growing(&self, buffer: &mut Vec<u8>, range: &RangeInfo) -> Result<Option<usize>, ScanError> {
        let read_error = |source| ScanError::Read {
            interface: self.wext.interface().to_string(),
            source,
        };
        loop {
            match self.wext.read_scan(buffer).map_err(read_error)? {
                ScanRead::Data(len) => return Ok(Some(len)),
                ScanRead::NotReady => return Ok(None),
                ScanRead::TooSmall { hint }
                    if range.supports_large_results() && buffer.len() < MAX_SCAN_BUFFER =>
                {
                    let len = if hint > buffer.len() { hint } else { buffer.len() * 2 };
                    let len = len.min(MAX_SCAN_BUFFER);
                    debug!(from = buffer.len(), to = len, "growing scan buffer");
                    buffer.resize(len, 0);
                }
                ScanRead::TooSmall { .. } => {
                    return Err(read_error(io::Error::from_raw_os_error(libc::E2BIG)));
                }
            }
        }
    }
}

/// Scan `interface` with default settings.
pub fn scan(interface: &str) -> Result<Vec<ApRecord>, ScanError> {
    let config = ScanConfig {
        interface: interface.to_string(),
        ..ScanConfig::default()
    };
    scan_with(&config)
}

pub fn scan_with(config: &ScanConfig) -> Result<Vec<ApRecord>, ScanError> {
    let wext = KernelWext::open(&config.interface)?;
    Scanner::new(wext, config.clone()).scan()
}
