//! Binary envelope framing
//!
//! Layout (big-endian lengths):
//!
//! ```text
//! [2: "#~"]["DF02"][2: "DI"][4: meta length][4: data length][4: "~#\r\n"]<meta JSON><payload>
//! ```
//!
//! Payloads of [`MAX_SIZE`] bytes or more are kept in a memory-mapped
//! temporary file instead of a heap buffer, on both the read and write paths.

use std::fmt;
use std::io::{Read, Write};
use std::ops::Deref;

use memmap2::{Mmap, MmapMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::EnvelopeError;
use crate::meta::Meta;

/// Payload size at which data is memory-mapped (128 MiB)
pub const MAX_SIZE: usize = 128 * 1024 * 1024;

/// Size of the fixed header
pub const HEADER_LEN: usize = 20;

const MARKER: &[u8; 2] = b"#~";
const FORMAT_TAG: &[u8; 4] = b"DF02";
const META_TYPE: &[u8; 2] = b"DI";
const TERMINATOR: &[u8; 4] = b"~#\r\n";

type Result<T> = std::result::Result<T, EnvelopeError>;

/// Envelope payload bytes
pub enum Payload {
    Buffer(Vec<u8>),
    Mapped(Mmap),
}

impl Payload {
    /// Wrap bytes, moving them to a memory map at or above [`MAX_SIZE`]
    pub fn new(data: Vec<u8>) -> Result<Self> {
        Self::with_threshold(data, MAX_SIZE)
    }

    fn with_threshold(data: Vec<u8>, threshold: usize) -> Result<Self> {
        if data.len() >= threshold {
            let mut map = anonymous_map(data.len())?;
            map.copy_from_slice(&data);
            Ok(Payload::Mapped(map.make_read_only()?))
        } else {
            Ok(Payload::Buffer(data))
        }
    }

    pub fn empty() -> Self {
        Payload::Buffer(Vec::new())
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Payload::Mapped(_))
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Payload::Buffer(buf) => buf,
            Payload::Mapped(map) => map,
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self[..] == other[..]
    }
}

/// Writable map over a private, unlinked temporary file
fn anonymous_map(len: usize) -> Result<MmapMut> {
    let file = tempfile::tempfile()?;
    file.set_len(len as u64)?;
    // SAFETY: the file is unlinked and owned only by this handle, so nothing
    // else can resize or modify it while the map is alive.
    let map = unsafe { MmapMut::map_mut(&file)? };
    Ok(map)
}

/// One protocol message: a meta block and a binary payload
#[derive(Debug, PartialEq)]
pub struct Envelope {
    pub meta: Meta,
    pub data: Payload,
}

struct Header {
    meta_len: usize,
    data_len: usize,
}

impl Envelope {
    /// An envelope with an empty payload
    pub fn new(meta: Meta) -> Self {
        Self {
            meta,
            data: Payload::empty(),
        }
    }

    pub fn with_data(meta: Meta, data: Vec<u8>) -> Result<Self> {
        Ok(Self {
            meta,
            data: Payload::new(data)?,
        })
    }

    /// A `success` response carrying the given meta keys
    pub fn success(meta: Meta) -> Self {
        Self::new(meta.with("status", "success"))
    }

    /// A `failed` response with a human-readable error
    pub fn failure(error: impl Into<String>) -> Self {
        Self::new(
            Meta::new()
                .with("status", "failed")
                .with("error", error.into()),
        )
    }

    pub fn is_success(&self) -> bool {
        self.meta.get("status") == Some(&Value::from("success"))
    }

    /// The `error` text of a failed response
    pub fn error(&self) -> Option<&str> {
        self.meta.get("error").and_then(Value::as_str)
    }

    fn header(&self, meta_len: usize) -> Result<[u8; HEADER_LEN]> {
        let meta_len = u32::try_from(meta_len).map_err(|_| EnvelopeError::TooLarge(meta_len))?;
        let data_len =
            u32::try_from(self.data.len()).map_err(|_| EnvelopeError::TooLarge(self.data.len()))?;

        let mut header = [0u8; HEADER_LEN];
        header[0..2].copy_from_slice(MARKER);
        header[2..6].copy_from_slice(FORMAT_TAG);
        header[6..8].copy_from_slice(META_TYPE);
        header[8..12].copy_from_slice(&meta_len.to_be_bytes());
        header[12..16].copy_from_slice(&data_len.to_be_bytes());
        header[16..20].copy_from_slice(TERMINATOR);
        Ok(header)
    }

    fn parse_header(header: &[u8; HEADER_LEN]) -> Result<Header> {
        if &header[0..2] != MARKER {
            return Err(EnvelopeError::Malformed("bad marker".to_string()));
        }
        if &header[2..6] != FORMAT_TAG {
            return Err(EnvelopeError::Malformed(format!(
                "unknown format tag {:?}",
                String::from_utf8_lossy(&header[2..6])
            )));
        }
        if &header[16..20] != TERMINATOR {
            return Err(EnvelopeError::Malformed("bad header terminator".to_string()));
        }

        let meta_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let data_len = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
        // Meta is always buffered, so its length is checked before allocating
        if meta_len > MAX_SIZE {
            return Err(EnvelopeError::TooLarge(meta_len));
        }
        Ok(Header {
            meta_len,
            data_len: data_len as usize,
        })
    }

    /// Serialize header, meta and payload into one buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let meta = serde_json::to_vec(&self.meta)?;
        let header = self.header(meta.len())?;

        let mut buffer = Vec::with_capacity(HEADER_LEN + meta.len() + self.data.len());
        buffer.extend_from_slice(&header);
        buffer.extend_from_slice(&meta);
        buffer.extend_from_slice(&self.data);
        Ok(buffer)
    }

    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        let mut cursor = buffer;
        Self::read(&mut cursor)
    }

    /// Write to a blocking stream
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let meta = serde_json::to_vec(&self.meta)?;
        writer.write_all(&self.header(meta.len())?)?;
        writer.write_all(&meta)?;
        writer.write_all(&self.data)?;
        writer.flush()?;
        trace!(meta_len = meta.len(), data_len = self.data.len(), "envelope written");
        Ok(())
    }

    /// Read one envelope from a blocking stream
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Self::read_with_threshold(reader, MAX_SIZE)
    }

    fn read_with_threshold<R: Read>(reader: &mut R, threshold: usize) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;
        let Header { meta_len, data_len } = Self::parse_header(&header)?;

        let mut meta = vec![0u8; meta_len];
        reader.read_exact(&mut meta)?;
        let meta: Meta = serde_json::from_slice(&meta)?;

        let data = if data_len >= threshold {
            let mut map = anonymous_map(data_len)?;
            reader.read_exact(&mut map[..])?;
            Payload::Mapped(map.make_read_only()?)
        } else {
            let mut buf = vec![0u8; data_len];
            reader.read_exact(&mut buf)?;
            Payload::Buffer(buf)
        };

        trace!(meta_len, data_len, "envelope read");
        Ok(Self { meta, data })
    }

    /// Write to a non-blocking stream
    pub async fn write_to_async<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let meta = serde_json::to_vec(&self.meta)?;
        writer.write_all(&self.header(meta.len())?).await?;
        writer.write_all(&meta).await?;
        writer.write_all(&self.data).await?;
        writer.flush().await?;
        trace!(meta_len = meta.len(), data_len = self.data.len(), "envelope written");
        Ok(())
    }

    /// Read one envelope from a non-blocking stream
    pub async fn read_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        Self::read_async_with_threshold(reader, MAX_SIZE).await
    }

    async fn read_async_with_threshold<R: AsyncRead + Unpin>(
        reader: &mut R,
        threshold: usize,
    ) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let Header { meta_len, data_len } = Self::parse_header(&header)?;

        let mut meta = vec![0u8; meta_len];
        reader.read_exact(&mut meta).await?;
        let meta: Meta = serde_json::from_slice(&meta)?;

        let data = if data_len >= threshold {
            let mut map = anonymous_map(data_len)?;
            reader.read_exact(&mut map[..]).await?;
            Payload::Mapped(map.make_read_only()?)
        } else {
            let mut buf = vec![0u8; data_len];
            reader.read_exact(&mut buf).await?;
            Payload::Buffer(buf)
        };

        trace!(meta_len, data_len, "envelope read");
        Ok(Self { meta, data })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> Meta {
        Meta::try_from(json!({"command": "run", "task_path": "demo.square", "n": 3})).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let envelope = Envelope::with_data(Meta::new(), vec![1, 2, 3]).unwrap();
        let bytes = envelope.to_bytes().unwrap();

        assert_eq!(&bytes[0..2], b"#~");
        assert_eq!(&bytes[2..6], b"DF02");
        assert_eq!(&bytes[6..8], b"DI");
        assert_eq!(&bytes[8..12], &2u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &3u32.to_be_bytes());
        assert_eq!(&bytes[16..20], b"~#\r\n");
        assert_eq!(&bytes[20..22], b"{}");
        assert_eq!(&bytes[22..], &[1, 2, 3]);
    }

    #[test]
    fn test_round_trip_empty_payload() {
        let envelope = Envelope::new(meta());
        let parsed = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_round_trip_small_payload() {
        let data: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        let envelope = Envelope::with_data(meta(), data.clone()).unwrap();
        let parsed = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(parsed.meta, meta());
        assert_eq!(&parsed.data[..], &data[..]);
        assert!(!parsed.data.is_mapped());
    }

    #[test]
    fn test_mapped_payload_below_default_threshold() {
        let data = vec![9u8; 64];
        let payload = Payload::with_threshold(data.clone(), 64).unwrap();
        assert!(payload.is_mapped());

        let envelope = Envelope {
            meta: meta(),
            data: payload,
        };
        let bytes = envelope.to_bytes().unwrap();
        let parsed = Envelope::read_with_threshold(&mut &bytes[..], 64).unwrap();
        assert!(parsed.data.is_mapped());
        assert_eq!(&parsed.data[..], &data[..]);
    }

    #[test]
    fn test_round_trip_at_threshold() {
        let data = vec![0xA5u8; MAX_SIZE];
        let envelope = Envelope::with_data(meta(), data).unwrap();
        assert!(envelope.data.is_mapped());

        let mut bytes = Vec::new();
        envelope.write_to(&mut bytes).unwrap();
        let parsed = Envelope::read(&mut &bytes[..]).unwrap();

        assert!(parsed.data.is_mapped());
        assert_eq!(parsed.data.len(), MAX_SIZE);
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_bad_marker_is_malformed() {
        let mut bytes = Envelope::new(meta()).to_bytes().unwrap();
        bytes[0] = b'x';
        assert!(matches!(
            Envelope::from_bytes(&bytes),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_format_tag_is_malformed() {
        let mut bytes = Envelope::new(meta()).to_bytes().unwrap();
        bytes[5] = b'3';
        let err = Envelope::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("DF03"));
    }

    #[test]
    fn test_truncated_input_is_io_error() {
        let bytes = Envelope::with_data(meta(), vec![1; 10]).unwrap().to_bytes().unwrap();
        assert!(matches!(
            Envelope::from_bytes(&bytes[..bytes.len() - 1]),
            Err(EnvelopeError::Io(_))
        ));
        assert!(matches!(
            Envelope::from_bytes(b"hello"),
            Err(EnvelopeError::Io(_))
        ));
    }

    #[test]
    fn test_oversized_meta_length_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"#~DF02DI");
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(b"~#\r\n");

        assert!(matches!(
            Envelope::from_bytes(&bytes),
            Err(EnvelopeError::TooLarge(n)) if n == u32::MAX as usize
        ));
    }

    #[test]
    fn test_non_object_meta_is_rejected() {
        let meta = b"[1,2]";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"#~DF02DI");
        bytes.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(b"~#\r\n");
        bytes.extend_from_slice(meta);

        assert!(matches!(
            Envelope::from_bytes(&bytes),
            Err(EnvelopeError::Meta(_))
        ));
    }

    #[test]
    fn test_status_helpers() {
        let ok = Envelope::success(Meta::new().with("powerfullity", 5));
        assert!(ok.is_success());
        assert_eq!(ok.meta.get("powerfullity"), Some(&json!(5)));

        let failed = Envelope::failure("KeyError: command");
        assert!(!failed.is_success());
        assert_eq!(failed.error(), Some("KeyError: command"));
    }

    #[tokio::test]
    async fn test_async_round_trip_matches_blocking_framing() {
        let envelope = Envelope::with_data(meta(), b"payload".to_vec()).unwrap();
        let (mut client, mut server) = tokio::io::duplex(1024);

        envelope.write_to_async(&mut client).await.unwrap();
        let parsed = Envelope::read_async(&mut server).await.unwrap();
        assert_eq!(parsed, envelope);

        let blocking = envelope.to_bytes().unwrap();
        let parsed = Envelope::read_async(&mut &blocking[..]).await.unwrap();
        assert_eq!(parsed, envelope);
    }

    #[tokio::test]
    async fn test_async_mapped_read() {
        let envelope = Envelope::with_data(meta(), vec![3u8; 32]).unwrap();
        let bytes = envelope.to_bytes().unwrap();
        let parsed = Envelope::read_async_with_threshold(&mut &bytes[..], 16)
            .await
            .unwrap();
        assert!(parsed.data.is_mapped());
        assert_eq!(parsed, envelope);
    }
}
