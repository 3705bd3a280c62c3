//! Record file format
//!
//! Every record file is a fixed header followed by the body (topic string or
//! payload bytes). The header repeats the metadata carried in the filename
//! and is validated on every read, so a renamed or truncated file is detected
//! instead of trusted.
//!
//! # Binary Format (36-byte header)
//!
//! ```text
//! magic("MQSR", 4) + version(2) + kind(1) + qos(1) + packet_id(8)
//! + body_len(8) + created_micros(8) + crc32(4) = 36 bytes
//! ```
//!
//! Integers are little-endian; the CRC covers the first 32 bytes.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use mqsession_core::limits::READ_CHUNK_SIZE;
use mqsession_core::{Error, PacketId, Qos, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use crate::codec::Stamp;
use crate::fs::create_private_file;

/// Magic bytes at the start of every record file
pub const RECORD_MAGIC: &[u8; 4] = b"MQSR";

/// Current record format version
pub const RECORD_VERSION: u16 = 1;

/// Size of a serialized [`RecordHeader`]
pub const RECORD_HEADER_SIZE: usize = 36;

const CRC_OFFSET: usize = RECORD_HEADER_SIZE - 4;

/// What a record file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Subscription: body is the topic filter
    Subscription = 1,
    /// Queued message: body is the payload
    Message = 2,
    /// Retained topic: body is the topic name
    RetainedTopic = 3,
    /// Retained payload side file
    RetainedPayload = 4,
}

impl RecordKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordKind::Subscription),
            2 => Some(RecordKind::Message),
            3 => Some(RecordKind::RetainedTopic),
            4 => Some(RecordKind::RetainedPayload),
            _ => None,
        }
    }
}

/// Fixed header preceding every record body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record kind
    pub kind: RecordKind,
    /// QoS of the subscription or message
    pub qos: Qos,
    /// Packet id (0 for records that have none)
    pub packet_id: PacketId,
    /// Length of the body following the header
    pub body_len: u64,
    /// Creation time, microseconds since the Unix epoch
    pub created_micros: u64,
}

impl RecordHeader {
    /// Serialize with trailing CRC
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(RECORD_MAGIC);
        LittleEndian::write_u16(&mut buf[4..6], RECORD_VERSION);
        buf[6] = self.kind as u8;
        buf[7] = self.qos.as_u8();
        LittleEndian::write_u64(&mut buf[8..16], self.packet_id);
        LittleEndian::write_u64(&mut buf[16..24], self.body_len);
        LittleEndian::write_u64(&mut buf[24..32], self.created_micros);
        let crc = crc32fast::hash(&buf[..CRC_OFFSET]);
        LittleEndian::write_u32(&mut buf[CRC_OFFSET..], crc);
        buf
    }

    /// Deserialize, validating magic, version, kind, QoS and CRC.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(Error::corruption(format!(
                "record header too short: {} bytes",
                data.len()
            )));
        }
        if &data[0..4] != RECORD_MAGIC {
            return Err(Error::corruption("invalid record magic"));
        }
        let stored_crc = LittleEndian::read_u32(&data[CRC_OFFSET..RECORD_HEADER_SIZE]);
        let computed_crc = crc32fast::hash(&data[..CRC_OFFSET]);
        if stored_crc != computed_crc {
            return Err(Error::corruption(format!(
                "record header checksum mismatch: stored {:08x}, computed {:08x}",
                stored_crc, computed_crc
            )));
        }

        let mut cursor = &data[4..CRC_OFFSET];
        let version = read_field(cursor.read_u16::<LittleEndian>())?;
        if version != RECORD_VERSION {
            return Err(Error::corruption(format!(
                "unsupported record version {}",
                version
            )));
        }
        let kind = read_field(cursor.read_u8())?;
        let kind = RecordKind::from_u8(kind)
            .ok_or_else(|| Error::corruption(format!("unknown record kind {}", kind)))?;
        let qos = Qos::try_from(read_field(cursor.read_u8())?)
            .map_err(|_| Error::corruption("invalid QoS in record header"))?;

        Ok(RecordHeader {
            kind,
            qos,
            packet_id: read_field(cursor.read_u64::<LittleEndian>())?,
            body_len: read_field(cursor.read_u64::<LittleEndian>())?,
            created_micros: read_field(cursor.read_u64::<LittleEndian>())?,
        })
    }
}

fn read_field<T>(value: io::Result<T>) -> Result<T> {
    value.map_err(|e| Error::corruption(format!("record header truncated: {}", e)))
}

/// Exclusively create `path` and write `header` + `body`.
///
/// Any failure after creation, including a short write, removes the file.
/// An `AlreadyExists` error is returned untouched so callers can pick
/// another name.
pub fn write_record(path: &Path, header: &RecordHeader, body: &[u8]) -> io::Result<()> {
    write_record_through(path, header, body, |file| file)
}

/// [`write_record`] with the created file wrapped by `wrap` before writing.
fn write_record_through<W, F>(
    path: &Path,
    header: &RecordHeader,
    body: &[u8],
    wrap: F,
) -> io::Result<()>
where
    W: Write,
    F: FnOnce(File) -> W,
{
    let mut writer = wrap(create_private_file(path)?);
    let expected = (RECORD_HEADER_SIZE + body.len()) as u64;
    let written = write_all_counted(&mut writer, header, body);
    drop(writer);

    match written {
        Ok(n) if n == expected => Ok(()),
        Ok(n) => {
            discard(path);
            Err(io::Error::new(
                io::ErrorKind::WriteZero,
                ShortWrite {
                    expected,
                    written: n,
                },
            ))
        }
        Err(e) => {
            discard(path);
            Err(e)
        }
    }
}

fn write_all_counted<W: Write>(
    file: &mut W,
    header: &RecordHeader,
    body: &[u8],
) -> io::Result<u64> {
    let header_bytes = header.to_bytes();
    let mut written = 0u64;
    for chunk in [&header_bytes[..], body] {
        let mut remaining = chunk;
        while !remaining.is_empty() {
            match file.write(remaining) {
                Ok(0) => return Ok(written),
                Ok(n) => {
                    written += n as u64;
                    remaining = &remaining[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
    file.flush()?;
    Ok(written)
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(
            target: "mqsession::storage",
            path = %path.display(),
            error = %e,
            "Failed to remove partially written record"
        );
    }
}

/// Attempts at finding a free name before giving up
pub const MAX_NAME_ATTEMPTS: usize = 1024;

/// Write a record under the first free name in `dir`.
///
/// `name_for` derives the filename from the creation stamp; on a collision
/// the stamp is advanced one microsecond and the write retried. Returns the
/// name used and its stamp.
pub fn write_unique<F>(
    dir: &Path,
    header: RecordHeader,
    body: &[u8],
    name_for: F,
) -> Result<(String, Stamp)>
where
    F: Fn(Stamp) -> String,
{
    write_unique_from(dir, Stamp::now(), header, body, name_for)
}

fn write_unique_from<F>(
    dir: &Path,
    mut stamp: Stamp,
    mut header: RecordHeader,
    body: &[u8],
    name_for: F,
) -> Result<(String, Stamp)>
where
    F: Fn(Stamp) -> String,
{
    for _ in 0..MAX_NAME_ATTEMPTS {
        let name = name_for(stamp);
        let path = dir.join(&name);
        header.created_micros = stamp.as_micros();
        match write_record(&path, &header, body) {
            Ok(()) => return Ok((name, stamp)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => stamp = stamp.bump(),
            Err(e) => return Err(write_error(&path, e)),
        }
    }
    Err(Error::storage(
        format!("no free record name in {}", dir.display()),
        io::Error::from(io::ErrorKind::AlreadyExists),
    ))
}

/// Byte counts of a short write, carried inside the `io::Error`
#[derive(Debug)]
pub struct ShortWrite {
    /// Bytes requested
    pub expected: u64,
    /// Bytes written before the device stopped accepting data
    pub written: u64,
}

impl std::fmt::Display for ShortWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wrote {} of {} bytes", self.written, self.expected)
    }
}

impl std::error::Error for ShortWrite {}

/// Convert a [`write_record`] failure into the crate error
pub fn write_error(path: &Path, e: io::Error) -> Error {
    if let Some(short) = e.get_ref().and_then(|inner| inner.downcast_ref::<ShortWrite>()) {
        tracing::error!(
            target: "mqsession::storage",
            path = %path.display(),
            expected = short.expected,
            written = short.written,
            "Short write, record removed"
        );
        return Error::ShortWrite {
            path: path.to_path_buf(),
            expected: short.expected,
            written: short.written,
        };
    }
    Error::storage(format!("writing {}", path.display()), e)
}

/// Open a record and validate its header.
///
/// `Ok(None)` if the file no longer exists.
pub fn open_record(path: &Path) -> Result<Option<(RecordHeader, File)>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::storage(format!("opening {}", path.display()), e)),
    };
    let mut buf = [0u8; RECORD_HEADER_SIZE];
    match file.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(Error::corruption(format!(
                "{}: file shorter than record header",
                path.display()
            )))
        }
        Err(e) => return Err(Error::storage(format!("reading {}", path.display()), e)),
    }
    let header = RecordHeader::from_bytes(&buf)
        .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e)))?;
    Ok(Some((header, file)))
}

/// Read a whole record.
///
/// A body shorter or longer than the header declares is corruption.
pub fn read_record(path: &Path) -> Result<Option<(RecordHeader, Vec<u8>)>> {
    let Some((header, file)) = open_record(path)? else {
        return Ok(None);
    };
    let mut body = Vec::with_capacity(header.body_len.min(1 << 20) as usize);
    file.take(header.body_len.saturating_add(1))
        .read_to_end(&mut body)
        .map_err(|e| Error::storage(format!("reading {}", path.display()), e))?;
    if body.len() as u64 != header.body_len {
        return Err(Error::corruption(format!(
            "{}: body is {} bytes, header declares {}",
            path.display(),
            body.len(),
            header.body_len
        )));
    }
    Ok(Some((header, body)))
}

/// Compare a record's body with `expected`, reading in bounded chunks.
///
/// A missing file compares unequal.
pub fn body_equals(path: &Path, expected: &[u8]) -> Result<bool> {
    let Some((header, mut file)) = open_record(path)? else {
        return Ok(false);
    };
    if header.body_len != expected.len() as u64 {
        return Ok(false);
    }
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut offset = 0;
    while offset < expected.len() {
        let want = (expected.len() - offset).min(READ_CHUNK_SIZE);
        match file.read_exact(&mut chunk[..want]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(Error::storage(format!("reading {}", path.display()), e)),
        }
        if chunk[..want] != expected[offset..offset + want] {
            return Ok(false);
        }
        offset += want;
    }
    Ok(true)
}
