//! Record framing for tablet segment files.
//!
//! # Frame Format
//!
//! ```text
//! [0..4)     magic "VLRC"
//! [4..8)     payload length (u32, little-endian)
//! [8..12)    CRC32C of the payload (u32, little-endian)
//! [12..)     payload: the postcard-encoded Record
//! ```
//!
//! Frames are written back to back. A reader that hits a frame with a bad
//! checksum can still skip to the next frame because the length is intact;
//! a bad magic or a truncated header means the framing itself is lost.

use thiserror::Error;

use crate::error::{Result, StorageError};
use crate::record::Record;

/// Magic bytes at the start of every frame.
const FRAME_MAGIC: [u8; 4] = *b"VLRC";

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 12;

/// Why a frame could not be decoded.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The buffer ends before the frame does.
    #[error("frame truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to complete the frame.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// The frame does not start with the magic bytes.
    #[error("invalid frame magic {found:?}")]
    BadMagic {
        /// The bytes found instead.
        found: [u8; 4],
    },

    /// The payload does not match its checksum.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the header.
        stored: u32,
        /// Checksum of the payload as read.
        computed: u32,
    },

    /// The payload passed its checksum but is not a valid record.
    #[error("payload decoding failed: {0}")]
    Decode(#[from] postcard::Error),
}

/// Result of decoding one frame.
#[derive(Debug)]
pub struct DecodedFrame {
    /// The decoded record or the reason it is unreadable.
    pub record: std::result::Result<Record, FrameError>,
    /// Total frame length, if the header was intact enough to know where the
    /// next frame starts.
    pub frame_len: Option<usize>,
}

/// Appends the framed encoding of `record` to `out`.
///
/// # Errors
///
/// Returns [`StorageError::RecordEncode`] if the record cannot be serialized
/// or its encoding exceeds 4 GiB.
pub fn encode_frame(tag: &str, record: &Record, out: &mut Vec<u8>) -> Result<()> {
    let payload = postcard::to_allocvec(record).map_err(|e| StorageError::RecordEncode {
        tag: tag.to_string(),
        source: e,
    })?;
    let len = u32::try_from(payload.len()).map_err(|_| StorageError::RecordEncode {
        tag: tag.to_string(),
        source: postcard::Error::SerializeBufferFull,
    })?;

    out.reserve(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&crc32c::crc32c(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

/// Decodes the frame at the start of `buf`.
pub fn decode_frame(buf: &[u8]) -> DecodedFrame {
    if buf.len() < FRAME_HEADER_SIZE {
        return DecodedFrame {
            record: Err(FrameError::Truncated {
                needed: FRAME_HEADER_SIZE,
                available: buf.len(),
            }),
            frame_len: None,
        };
    }

    let found = [buf[0], buf[1], buf[2], buf[3]];
    if found != FRAME_MAGIC {
        return DecodedFrame {
            record: Err(FrameError::BadMagic { found }),
            frame_len: None,
        };
    }

    let len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let stored = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let frame_len = FRAME_HEADER_SIZE + len;

    let Some(payload) = buf.get(FRAME_HEADER_SIZE..frame_len) else {
        return DecodedFrame {
            record: Err(FrameError::Truncated {
                needed: frame_len,
                available: buf.len(),
            }),
            frame_len: None,
        };
    };

    let computed = crc32c::crc32c(payload);
    let record = if computed == stored {
        postcard::from_bytes(payload).map_err(FrameError::from)
    } else {
        Err(FrameError::ChecksumMismatch { stored, computed })
    };

    DecodedFrame {
        record,
        frame_len: Some(frame_len),
    }
}
