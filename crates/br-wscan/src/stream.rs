//! Cursor over the packed `iw_event` stream returned by `SIOCGIWSCAN`.
//!
//! Every event is a `(cmd: u16, len: u16)` header followed by the fixed
//! payload of its descriptor kind. Point payloads carry `(length, flags)`
//! and then `length * token_size` bytes of data. Values are host-endian.
//! Some drivers pack several fixed values into one event, and 64-bit
//! kernels talking to older userland insert 4 bytes of padding; the
//! cursor tracks both through `pending`.

use br_common::MacAddr;
use tracing::debug;

use crate::descriptor::{descriptor, EventDescriptor, PayloadKind, EVENT_HEADER_LEN};

/// `iw_freq`: `m * 10^e`, with `i` the channel index when a driver fills it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Freq {
    pub m: i32,
    pub e: i16,
    pub i: u8,
    pub flags: u8,
}

impl Freq {
    pub(crate) fn read(bytes: &[u8]) -> Option<Self> {
        Some(Freq {
            m: read_i32(bytes, 0)?,
            e: read_u16(bytes, 4)? as i16,
            i: *bytes.get(6)?,
            flags: *bytes.get(7)?,
        })
    }

    /// Integer value of `m * 10^e`, saturating on absurd exponents.
    pub fn value(&self) -> i64 {
        let m = i64::from(self.m);
        if self.e >= 0 {
            10i64
                .checked_pow(self.e as u32)
                .and_then(|scale| m.checked_mul(scale))
                .unwrap_or(if m < 0 { i64::MIN } else { i64::MAX })
        } else {
            10i64
                .checked_pow(self.e.unsigned_abs() as u32)
                .map_or(0, |scale| m / scale)
        }
    }
}

/// `iw_quality`, reported as the driver gives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality {
    pub qual: u8,
    pub level: u8,
    pub noise: u8,
    pub updated: u8,
}

/// `iw_param`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Param {
    pub value: i32,
    pub fixed: u8,
    pub disabled: u8,
    pub flags: u16,
}

/// Decoded payload of one event value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventValue<'a> {
    Name([u8; 16]),
    Uint(u32),
    Freq(Freq),
    Addr(MacAddr),
    Param(Param),
    Quality(Quality),
    /// `data` is `None` when the payload failed validation or was empty.
    Point {
        length: u16,
        flags: u16,
        data: Option<&'a [u8]>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirelessEvent<'a> {
    pub cmd: u16,
    pub value: EventValue<'a>,
}

/// Result of one extraction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extracted<'a> {
    Event(WirelessEvent<'a>),
    /// Header-only or unknown command, stepped over.
    Skipped { cmd: u16 },
    /// Event shorter than its fixed payload, stepped over.
    Malformed { cmd: u16, len: u16 },
    /// Declared length not larger than the header. The header is stepped
    /// over and decoding carries on.
    Invalid { cmd: u16, len: u16 },
    /// Declared length runs past the buffer. Decoding stops.
    Truncated { cmd: u16, len: u16 },
}

impl Extracted<'_> {
    /// Whether decoding can continue after this outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Extracted::Truncated { .. })
    }
}

/// Position inside an event buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCursor {
    position: usize,
    end: usize,
    /// Offset of the next packed value inside the current event.
    pending: Option<usize>,
}

impl EventCursor {
    pub fn new(buf: &[u8]) -> Self {
        Self {
            position: 0,
            end: buf.len(),
            pending: None,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn pending(&self) -> Option<usize> {
        self.pending
    }

    pub fn is_done(&self) -> bool {
        self.position + EVENT_HEADER_LEN > self.end
    }

    fn finished(self) -> Self {
        Self {
            position: self.end,
            end: self.end,
            pending: None,
        }
    }

    fn next_event(self, len: usize) -> Self {
        Self {
            position: self.position + len,
            end: self.end,
            pending: None,
        }
    }

    /// Decode the value at the cursor and return it with the advanced
    /// cursor, or `None` once fewer than a header's worth of bytes remain.
    pub fn extract(self, buf: &[u8]) -> Option<(Extracted<'_>, EventCursor)> {
        let end = self.end.min(buf.len());
        let pos = self.position;
        if pos + EVENT_HEADER_LEN > end {
            return None;
        }

        let cmd = read_u16(buf, pos)?;
        let len = read_u16(buf, pos + 2)?;
        let event_len = usize::from(len);

        if event_len <= EVENT_HEADER_LEN {
            return Some((Extracted::Invalid { cmd, len }, self.next_event(EVENT_HEADER_LEN)));
        }
        let event_end = pos + event_len;
        if event_end > end {
            return Some((Extracted::Truncated { cmd, len }, self.finished()));
        }

        let descr = descriptor(cmd);
        let fixed = descr.kind.fixed_len();
        if fixed == 0 {
            return Some((Extracted::Skipped { cmd }, self.next_event(event_len)));
        }

        let value_off = self.pending.unwrap_or(pos + EVENT_HEADER_LEN);
        if value_off + fixed > event_end {
            debug!(cmd, len, "event shorter than its fixed payload");
            return Some((Extracted::Malformed { cmd, len }, self.next_event(event_len)));
        }

        if descr.kind == PayloadKind::Point {
            let value = read_point(buf, &descr, value_off, event_len)?;
            let event = WirelessEvent { cmd, value };
            return Some((Extracted::Event(event), self.next_event(event_len)));
        }

        let payload = event_len - EVENT_HEADER_LEN;
        let padded = self.pending.is_none()
            && (payload % fixed == 4
                || (event_len == 12 && matches!(descr.kind, PayloadKind::Uint | PayloadKind::Qual)));
        let read_off = if padded { value_off + 4 } else { value_off };
        if read_off + fixed > event_end {
            return Some((Extracted::Malformed { cmd, len }, self.next_event(event_len)));
        }

        let value = read_fixed(descr.kind, &buf[read_off..read_off + fixed])?;
        let next_value = read_off + fixed;
        let cursor = if next_value + fixed <= event_end {
            Self {
                pending: Some(next_value),
                ..self
            }
        } else {
            self.next_event(event_len)
        };
        Some((Extracted::Event(WirelessEvent { cmd, value }), cursor))
    }
}

fn read_point<'a>(
    buf: &'a [u8],
    descr: &EventDescriptor,
    value_off: usize,
    event_len: usize,
) -> Option<EventValue<'a>> {
    let mut length = read_u16(buf, value_off)?;
    let mut flags = read_u16(buf, value_off + 2)?;
    let extra = event_len - EVENT_HEADER_LEN - PayloadKind::Point.fixed_len();
    if extra == 0 {
        return Some(EventValue::Point {
            length,
            flags,
            data: None,
        });
    }

    let token_size = usize::from(descr.token_size);
    let mut data_off = value_off + 4;
    let mut token_len = usize::from(length) * token_size;

    // 64-bit kernel layout seen by 32-bit userland: the real (length, flags)
    // sit one word further in and the data starts 8 bytes later.
    if token_len != extra && extra >= 4 {
        let alt = read_u16(buf, value_off + 4)?;
        let alt_len = usize::from(alt) * token_size;
        if alt_len + 8 == extra {
            length = alt;
            flags = read_u16(buf, value_off + 6)?;
            data_off = value_off + 12;
            token_len = alt_len;
        }
    }

    let too_many = length > descr.max_tokens && !descr.unbounded();
    let too_few = length < descr.min_tokens;
    let data = if token_len > extra || too_many || too_few {
        debug!(length, extra, "discarding point payload");
        None
    } else {
        buf.get(data_off..data_off + token_len)
    };
    Some(EventValue::Point {
        length,
        flags,
        data,
    })
}

fn read_fixed(kind: PayloadKind, bytes: &[u8]) -> Option<EventValue<'static>> {
    let value = match kind {
        PayloadKind::Char => EventValue::Name(bytes.get(..16)?.try_into().ok()?),
        PayloadKind::Uint => EventValue::Uint(read_u32(bytes, 0)?),
        PayloadKind::Freq => EventValue::Freq(Freq::read(bytes)?),
        // sockaddr: family, then the hardware address in sa_data
        PayloadKind::Addr => EventValue::Addr(MacAddr::from_slice(bytes.get(2..8)?)?),
        PayloadKind::Param => EventValue::Param(Param {
            value: read_i32(bytes, 0)?,
            fixed: *bytes.get(4)?,
            disabled: *bytes.get(5)?,
            flags: read_u16(bytes, 6)?,
        }),
        PayloadKind::Qual => EventValue::Quality(Quality {
            qual: *bytes.first()?,
            level: *bytes.get(1)?,
            noise: *bytes.get(2)?,
            updated: *bytes.get(3)?,
        }),
        PayloadKind::Null | PayloadKind::Point => return None,
    };
    Some(value)
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_ne_bytes(buf.get(at..at + 2)?.try_into().ok()?))
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_ne_bytes(buf.get(at..at + 4)?.try_into().ok()?))
}

pub(crate) fn read_i32(buf: &[u8], at: usize) -> Option<i32> {
    read_u32(buf, at).map(|v| v as i32)
}

/// Iterator over every extraction outcome in a buffer.
///
/// Stops after a `Truncated` outcome.
pub struct EventStream<'a> {
    buf: &'a [u8],
    cursor: EventCursor,
}

impl<'a> EventStream<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            cursor: EventCursor::new(buf),
        }
    }

    /// Only the successfully decoded events.
    pub fn events(self) -> impl Iterator<Item = WirelessEvent<'a>> {
        self.filter_map(|outcome| match outcome {
            Extracted::Event(event) => Some(event),
            _ => None,
        })
    }
}

impl<'a> Iterator for EventStream<'a> {
    type Item = Extracted<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (outcome, cursor) = self.cursor.extract(self.buf)?;
        self.cursor = cursor;
        Some(outcome)
    }
}

/// Builders for hand-made event buffers, shared by the unit tests.
#[cfg(test)]
pub(crate) mod testing {
    pub fn header(cmd: u16, len: u16) -> Vec<u8> {
        let mut out = cmd.to_ne_bytes().to_vec();
        out.extend_from_slice(&len.to_ne_bytes());
        out
    }

    pub fn point(cmd: u16, flags: u16, data: &[u8]) -> Vec<u8> {
        let mut out = header(cmd, (8 + data.len()) as u16);
        out.extend_from_slice(&(data.len() as u16).to_ne_bytes());
        out.extend_from_slice(&flags.to_ne_bytes());
        out.extend_from_slice(data);
        out
    }

    pub fn addr(cmd: u16, mac: [u8; 6]) -> Vec<u8> {
        let mut out = header(cmd, 20);
        out.extend_from_slice(&1u16.to_ne_bytes());
        out.extend_from_slice(&mac);
        out.extend_from_slice(&[0u8; 8]);
        out
    }

    pub fn uint(cmd: u16, value: u32) -> Vec<u8> {
        let mut out = header(cmd, 8);
        out.extend_from_slice(&value.to_ne_bytes());
        out
    }

    pub fn freq(cmd: u16, m: i32, e: i16) -> Vec<u8> {
        let mut out = header(cmd, 12);
        out.extend_from_slice(&m.to_ne_bytes());
        out.extend_from_slice(&e.to_ne_bytes());
        out.extend_from_slice(&[0, 0]);
        out
    }

    pub fn qual(cmd: u16, qual: u8, level: u8, noise: u8) -> Vec<u8> {
        let mut out = header(cmd, 8);
        out.extend_from_slice(&[qual, level, noise, 0x0f]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::descriptor::*;

    fn collect(buf: &[u8]) -> Vec<Extracted<'_>> {
        EventStream::new(buf).collect()
    }

    #[test]
    fn test_fixed_events() {
        let mut buf = addr(SIOCGIWAP, [0, 1, 2, 3, 4, 5]);
        buf.extend(uint(SIOCGIWMODE, 3));
        buf.extend(freq(SIOCGIWFREQ, 2412, 6));
        buf.extend(qual(IWEVQUAL, 60, 200, 160));

        let events: Vec<_> = EventStream::new(&buf).events().collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].value, EventValue::Addr(MacAddr([0, 1, 2, 3, 4, 5])));
        assert_eq!(events[1].value, EventValue::Uint(3));
        match events[2].value {
            EventValue::Freq(f) => assert_eq!(f.value(), 2_412_000_000),
            other => panic!("unexpected {:?}", other),
        }
        match events[3].value {
            EventValue::Quality(q) => assert_eq!((q.qual, q.level, q.noise), (60, 200, 160)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_point_payload() {
        let buf = point(SIOCGIWESSID, 1, b"Net1");
        let out = collect(&buf);
        assert_eq!(
            out,
            vec![Extracted::Event(WirelessEvent {
                cmd: SIOCGIWESSID,
                value: EventValue::Point {
                    length: 4,
                    flags: 1,
                    data: Some(&b"Net1"[..]),
                },
            })]
        );
    }

    #[test]
    fn test_point_without_payload() {
        let buf = point(SIOCGIWENCODE, 0x8000, &[]);
        match collect(&buf)[0] {
            Extracted::Event(WirelessEvent {
                value: EventValue::Point { flags, data, .. },
                ..
            }) => {
                assert_eq!(flags, 0x8000);
                assert!(data.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_point_over_max_is_discarded_but_decoding_continues() {
        let mut buf = point(SIOCGIWESSID, 0, &[b'x'; 40]);
        buf.extend(uint(SIOCGIWMODE, 2));
        let out = collect(&buf);
        assert_eq!(out.len(), 2);
        match out[0] {
            Extracted::Event(WirelessEvent {
                value: EventValue::Point { length, data, .. },
                ..
            }) => {
                assert_eq!(length, 40);
                assert!(data.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            out[1],
            Extracted::Event(WirelessEvent { value: EventValue::Uint(2), .. })
        ));
    }

    #[test]
    fn test_point_length_disagreeing_with_event_is_discarded() {
        // Advertises 10 tokens but only 4 bytes follow.
        let mut buf = header(IWEVGENIE, 12);
        buf.extend_from_slice(&10u16.to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(b"abcd");
        match collect(&buf)[0] {
            Extracted::Event(WirelessEvent {
                value: EventValue::Point { data, .. },
                ..
            }) => assert!(data.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_point_below_min_is_discarded() {
        let mut buf = header(SIOCGIWTHRSPY, 8);
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        // zero extra bytes: no data regardless of min
        match collect(&buf)[0] {
            Extracted::Event(WirelessEvent {
                value: EventValue::Point { data, .. },
                ..
            }) => assert!(data.is_none()),
            other => panic!("unexpected {:?}", other),
        }

        let buf = point(SIOCGIWENCODEEXT, 0, &[0u8; 8]);
        match collect(&buf)[0] {
            Extracted::Event(WirelessEvent {
                value: EventValue::Point { length, data, .. },
                ..
            }) => {
                assert_eq!(length, 8);
                assert!(data.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_point_with_64bit_padding() {
        // header, 4 bytes of pointer padding, length/flags, 4 more bytes, data
        let data = b"Padded";
        let mut buf = header(SIOCGIWESSID, (16 + data.len()) as u16);
        buf.extend_from_slice(&[0xAA; 4]);
        buf.extend_from_slice(&(data.len() as u16).to_ne_bytes());
        buf.extend_from_slice(&1u16.to_ne_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(data);

        match collect(&buf)[0] {
            Extracted::Event(WirelessEvent {
                value: EventValue::Point { length, flags, data },
                ..
            }) => {
                assert_eq!(length, 6);
                assert_eq!(flags, 1);
                assert_eq!(data, Some(&b"Padded"[..]));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_padded_fixed_value() {
        // 64-bit layout: 4 bytes of padding ahead of the mode value
        let mut buf = header(SIOCGIWMODE, 12);
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&2u32.to_ne_bytes());
        buf.extend(uint(SIOCGIWMODE, 1));
        let events: Vec<_> = EventStream::new(&buf).events().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].value, EventValue::Uint(2));
        assert_eq!(events[1].value, EventValue::Uint(1));
    }

    #[test]
    fn test_multiple_values_in_one_event() {
        // Two bitrate params packed into one event
        let mut buf = header(SIOCGIWRATE, 20);
        for rate in [1_000_000i32, 2_000_000] {
            buf.extend_from_slice(&rate.to_ne_bytes());
            buf.extend_from_slice(&[0, 0, 0, 0]);
        }
        buf.extend(uint(SIOCGIWMODE, 2));

        let mut cursor = EventCursor::new(&buf);
        let (first, next) = cursor.extract(&buf).unwrap();
        assert!(matches!(
            first,
            Extracted::Event(WirelessEvent { value: EventValue::Param(Param { value: 1_000_000, .. }), .. })
        ));
        assert_eq!(next.position(), 0);
        assert_eq!(next.pending(), Some(12));
        cursor = next;

        let (second, next) = cursor.extract(&buf).unwrap();
        assert!(matches!(
            second,
            Extracted::Event(WirelessEvent { value: EventValue::Param(Param { value: 2_000_000, .. }), .. })
        ));
        assert_eq!(next.position(), 20);
        assert_eq!(next.pending(), None);

        let (third, next) = next.extract(&buf).unwrap();
        assert!(matches!(third, Extracted::Event(WirelessEvent { cmd: SIOCGIWMODE, .. })));
        assert!(next.is_done());
        assert!(next.extract(&buf).is_none());
    }

    #[test]
    fn test_header_only_and_unknown_are_skipped() {
        let mut buf = header(SIOCSIWCOMMIT, 8);
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend(header(0x8B1E, 8));
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend(uint(SIOCGIWMODE, 1));
        let out = collect(&buf);
        assert_eq!(out[0], Extracted::Skipped { cmd: SIOCSIWCOMMIT });
        assert_eq!(out[1], Extracted::Skipped { cmd: 0x8B1E });
        assert!(matches!(out[2], Extracted::Event(_)));
    }

    #[test]
    fn test_short_event_is_malformed() {
        // FREQ needs 8 bytes of payload, only 4 are declared
        let mut buf = header(SIOCGIWFREQ, 8);
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend(uint(SIOCGIWMODE, 1));
        let out = collect(&buf);
        assert_eq!(out[0], Extracted::Malformed { cmd: SIOCGIWFREQ, len: 8 });
        assert!(matches!(out[1], Extracted::Event(_)));
    }

    #[test]
    fn test_invalid_length_skips_header() {
        let mut buf = header(SIOCGIWMODE, 4);
        buf.extend(uint(SIOCGIWMODE, 1));
        let out = collect(&buf);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Extracted::Invalid { cmd: SIOCGIWMODE, len: 4 });
        assert!(!out[0].is_terminal());
        assert!(matches!(out[1], Extracted::Event(_)));

        // zero length still makes progress
        let mut zero = header(SIOCGIWMODE, 0);
        zero.extend(header(SIOCGIWMODE, 2));
        let out = collect(&zero);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| matches!(o, Extracted::Invalid { .. })));
    }

    #[test]
    fn test_truncated_stops_inside_buffer() {
        let mut buf = uint(SIOCGIWMODE, 1);
        let mut tail = point(SIOCGIWESSID, 1, b"LongNetworkName");
        tail.truncate(12);
        buf.extend(tail);

        let out = collect(&buf);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], Extracted::Truncated { cmd: SIOCGIWESSID, len: 23 });
    }

    #[test]
    fn test_trailing_partial_header_ends_stream() {
        let mut buf = uint(SIOCGIWMODE, 1);
        buf.extend_from_slice(&[0x01, 0x8B]);
        assert_eq!(collect(&buf).len(), 1);
        assert!(collect(&[]).is_empty());
    }

    #[test]
    fn test_freq_value() {
        let f = |m, e| Freq { m, e, i: 0, flags: 0 };
        assert_eq!(f(2412, 6).value(), 2_412_000_000);
        assert_eq!(f(241_200_000, 1).value(), 2_412_000_000);
        assert_eq!(f(11, 0).value(), 11);
        assert_eq!(f(24120, -1).value(), 2412);
        assert_eq!(f(1, 30).value(), i64::MAX);
    }
}
