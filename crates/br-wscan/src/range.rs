//! The parts of `struct iw_range` the scanner needs.

use crate::descriptor::IW_RANGE_SIZE;
use crate::stream::Freq;

const WE_VERSION_COMPILED_OFFSET: usize = 280;
const NUM_FREQUENCY_OFFSET: usize = 306;
const FREQ_TABLE_OFFSET: usize = 308;
const IW_FREQ_SIZE: usize = 8;
pub const IW_MAX_FREQUENCIES: usize = 32;

/// Driver capabilities returned by `SIOCGIWRANGE`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeInfo {
    /// Wireless-extension version the driver was built against.
    pub we_version: u8,
    /// `(channel, frequency)` pairs.
    pub frequencies: Vec<(u8, Freq)>,
}

impl RangeInfo {
    /// Parse a `SIOCGIWRANGE` buffer. Returns `None` if the buffer does not
    /// reach the frequency count.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let we_version = *buf.get(WE_VERSION_COMPILED_OFFSET)?;
        let count = usize::from(*buf.get(NUM_FREQUENCY_OFFSET)?).min(IW_MAX_FREQUENCIES);

        let frequencies = buf
            .get(FREQ_TABLE_OFFSET..)
            .unwrap_or_default()
            .chunks_exact(IW_FREQ_SIZE)
            .take(count)
            .filter_map(Freq::read)
            .map(|freq| (freq.i, freq))
            .collect();

        Some(Self {
            we_version,
            frequencies,
        })
    }

    /// Parse a driver reply. Drivers built against an older, shorter
    /// `iw_range` leave the tail out; it reads as zeros.
    pub fn from_reply(reply: &[u8]) -> Self {
        let mut buf = vec![0u8; reply.len().max(usize::from(IW_RANGE_SIZE))];
        buf[..reply.len()].copy_from_slice(reply);
        Self::parse(&buf).unwrap_or_default()
    }

    /// Channel whose table frequency equals `value` exactly.
    pub fn channel_for(&self, value: i64) -> Option<u8> {
        self.frequencies
            .iter()
            .find(|(_, freq)| freq.value() == value)
            .map(|(channel, _)| *channel)
    }

    /// Drivers built against WE-17 or later report `E2BIG` with a size hint.
    pub fn supports_large_results(&self) -> bool {
        self.we_version > 16
    }
}
