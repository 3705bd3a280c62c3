//! Record filename codec
//!
//! Record files are named by a short run of decimal fields joined with `-`,
//! so that enumeration, the length pre-filter and quota accounting can work
//! from directory listings alone:
//!
//! ```text
//! subscriptions, retained topics:  <len>-<qos>-<shard>-<sec>-<usec>
//! queued messages:                 <packet_id>-<size>-<qos>-<sec>-<usec>
//! ```
//!
//! Decoding never fails hard: a truncated or malformed name decodes to
//! `None` and the caller skips the file.

use chrono::Utc;
use mqsession_core::{PacketId, Qos};
use std::fmt;

/// Field separator inside a record name
pub const DELIMITER: char = '-';

/// Decode one decimal field starting at byte `offset`.
///
/// Returns the value and the offset of the first byte after the digits.
/// `None` if there is no digit at `offset` or the value overflows `u64`.
pub fn decode_field(name: &str, offset: usize) -> Option<(u64, usize)> {
    let bytes = name.as_bytes().get(offset..)?;
    let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let mut value: u64 = 0;
    for b in &bytes[..digits] {
        value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some((value, offset + digits))
}

/// Decode exactly `N` delimited fields covering the whole name.
pub fn decode_fields<const N: usize>(name: &str) -> Option<[u64; N]> {
    let mut fields = [0u64; N];
    let mut offset = 0;
    for (i, slot) in fields.iter_mut().enumerate() {
        if i > 0 {
            if name.as_bytes().get(offset) != Some(&(DELIMITER as u8)) {
                return None;
            }
            offset += 1;
        }
        let (value, end) = decode_field(name, offset)?;
        *slot = value;
        offset = end;
    }
    (offset == name.len()).then_some(fields)
}

/// Join fields into a record name
pub fn encode_fields(fields: &[u64]) -> String {
    let mut name = String::with_capacity(fields.len() * 8);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            name.push(DELIMITER);
        }
        name.push_str(&field.to_string());
    }
    name
}

/// Creation time carried in record names.
///
/// Only used to make names unique; never for ordering guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    /// Seconds since the Unix epoch
    pub secs: u64,
    /// Microseconds within the second
    pub micros: u32,
}

impl Stamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        let now = Utc::now();
        Stamp {
            secs: u64::try_from(now.timestamp()).unwrap_or(0),
            micros: now.timestamp_subsec_micros().min(999_999),
        }
    }

    /// The next microsecond, used to step past a name collision
    pub fn bump(self) -> Self {
        if self.micros >= 999_999 {
            Stamp {
                secs: self.secs + 1,
                micros: 0,
            }
        } else {
            Stamp {
                secs: self.secs,
                micros: self.micros + 1,
            }
        }
    }

    /// Microseconds since the Unix epoch
    pub fn as_micros(self) -> u64 {
        self.secs
            .saturating_mul(1_000_000)
            .saturating_add(u64::from(self.micros))
    }

    fn from_fields(secs: u64, micros: u64) -> Option<Self> {
        let micros = u32::try_from(micros).ok().filter(|m| *m < 1_000_000)?;
        Some(Stamp { secs, micros })
    }
}

/// Name of a content-keyed record (subscription or retained topic).
///
/// `len` is the byte length of the stored topic string and lets lookups skip
/// files that cannot match without opening them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyedName {
    /// Byte length of the topic filter or topic name
    pub len: u64,
    /// Requested or retained QoS
    pub qos: Qos,
    /// Shard the key hashes to
    pub shard: u32,
    /// Creation time
    pub stamp: Stamp,
}

impl KeyedName {
    /// Encode as `len-qos-shard-sec-usec`
    pub fn encode(&self) -> String {
        encode_fields(&[
            self.len,
            u64::from(self.qos.as_u8()),
            u64::from(self.shard),
            self.stamp.secs,
            u64::from(self.stamp.micros),
        ])
    }

    /// Decode a name; `None` for anything malformed
    pub fn decode(name: &str) -> Option<Self> {
        let [len, qos, shard, secs, micros] = decode_fields::<5>(name)?;
        Some(KeyedName {
            len,
            qos: Qos::try_from(qos).ok()?,
            shard: u32::try_from(shard).ok()?,
            stamp: Stamp::from_fields(secs, micros)?,
        })
    }
}

impl fmt::Display for KeyedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Name of a queued message record.
///
/// `size` is the declared payload size; quota accounting sums it without
/// opening the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageName {
    /// Packet id (may exceed the 16-bit protocol range)
    pub packet_id: PacketId,
    /// Payload size in bytes
    pub size: u64,
    /// Delivery QoS
    pub qos: Qos,
    /// Creation time
    pub stamp: Stamp,
}

impl MessageName {
    /// Encode as `packet_id-size-qos-sec-usec`
    pub fn encode(&self) -> String {
        encode_fields(&[
            self.packet_id,
            self.size,
            u64::from(self.qos.as_u8()),
            self.stamp.secs,
            u64::from(self.stamp.micros),
        ])
    }

    /// Decode a name; `None` for anything malformed
    pub fn decode(name: &str) -> Option<Self> {
        let [packet_id, size, qos, secs, micros] = decode_fields::<5>(name)?;
        Some(MessageName {
            packet_id,
            size,
            qos: Qos::try_from(qos).ok()?,
            stamp: Stamp::from_fields(secs, micros)?,
        })
    }
}

impl fmt::Display for MessageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
