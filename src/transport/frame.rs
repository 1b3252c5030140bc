//! Length-delimited framing (u32 little-endian length prefix) with bincode
//! payloads.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::TransportError;

pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024; // 64 MiB guardrail

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), TransportError> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| TransportError::FrameTooLarge {
            len: u32::MAX,
            max: MAX_FRAME_LEN,
        })?;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut len_bytes = [0u8; 4];
    read_exact_or_eof(r, &mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len as usize];
    read_exact_or_eof(r, &mut payload)?;
    Ok(payload)
}

fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    let mut off = 0usize;
    while off < buf.len() {
        match r.read(&mut buf[off..])? {
            0 => return Err(TransportError::UnexpectedEof),
            n => off += n,
        }
    }
    Ok(())
}

/// Encode `message` with bincode and write it as one frame.
pub fn send_message<W: Write, T: Serialize>(w: &mut W, message: &T) -> Result<(), TransportError> {
    let bytes = bincode::serialize(message)?;
    write_frame(w, &bytes)
}

/// Read one frame and decode it with bincode.
pub fn recv_message<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T, TransportError> {
    let bytes = read_frame(r)?;
    Ok(bincode::deserialize(&bytes)?)
}
