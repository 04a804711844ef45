//! svndiff stream format: magic, variable-length integers, window headers
//! and the per-version section packing.
//!
//! Outgoing file contents are always full texts, so the encoder emits one
//! `new` instruction per window. Decoding lives in [`crate::textdelta`].

use std::io::{Read, Write};

use flate2::Compression;
use flate2::write::ZlibEncoder;

use crate::SvnError;

/// Sections shorter than this are stored even when zlib is enabled.
const ZLIB_MIN_COMPRESS_SIZE: usize = 512;

/// Largest target view a window may describe.
pub(crate) const MAX_WINDOW: usize = 64 * 1024;

/// Longest varint that fits a `u64`.
pub(crate) const MAX_VARINT_LEN: usize = 10;

/// Largest instruction section for a [`MAX_WINDOW`] window.
pub(crate) const MAX_INSTRUCTIONS_LEN: usize = MAX_WINDOW * (2 * MAX_VARINT_LEN + 1);

/// Instruction opcodes (the top two bits of the selector byte).
pub(crate) const OP_SOURCE: u8 = 0;
pub(crate) const OP_TARGET: u8 = 1;
pub(crate) const OP_NEW: u8 = 2;

/// svndiff format version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SvndiffVersion {
    /// Uncompressed windows.
    V0 = 0,
    /// zlib-compressed sections.
    V1 = 1,
    /// lz4-compressed sections.
    V2 = 2,
}

impl SvndiffVersion {
    pub(crate) fn magic(self) -> [u8; 4] {
        [b'S', b'V', b'N', self as u8]
    }

    pub(crate) fn from_magic(magic: &[u8]) -> Option<Self> {
        match magic {
            [b'S', b'V', b'N', 0] => Some(Self::V0),
            [b'S', b'V', b'N', 1] => Some(Self::V1),
            [b'S', b'V', b'N', 2] => Some(Self::V2),
            _ => None,
        }
    }

    /// Compresses one section for the wire.
    fn pack(self, data: &[u8], zlib_level: u32) -> Result<Vec<u8>, SvnError> {
        if self == Self::V0 {
            return Ok(data.to_vec());
        }
        let mut out = Vec::with_capacity(data.len() + MAX_VARINT_LEN);
        put_varint(data.len() as u64, &mut out);
        let packed = match self {
            Self::V1 if data.len() >= ZLIB_MIN_COMPRESS_SIZE && zlib_level > 0 => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(zlib_level));
                encoder.write_all(data)?;
                Some(encoder.finish()?)
            }
            Self::V2 => Some(lz4_flex::compress(data)),
            _ => None,
        };
        match packed {
            Some(packed) if packed.len() < data.len() => out.extend_from_slice(&packed),
            _ => out.extend_from_slice(data),
        }
        Ok(out)
    }

    /// Expands one wire section, refusing anything larger than `limit`.
    pub(crate) fn unpack(self, wire: &[u8], limit: usize) -> Result<Vec<u8>, SvnError> {
        if self == Self::V0 {
            return Ok(wire.to_vec());
        }
        let (len, used) = take_varint(wire)?
            .ok_or_else(|| corrupt("compressed section has no length prefix"))?;
        let len = usize::try_from(len).map_err(|_| corrupt("section length overflows usize"))?;
        if len > limit {
            return Err(corrupt("section is larger than a window allows"));
        }
        let body = &wire[used..];
        if body.len() == len {
            return Ok(body.to_vec());
        }
        let out = match self {
            Self::V1 => {
                let mut out = Vec::with_capacity(len);
                flate2::read::ZlibDecoder::new(body)
                    .take(limit as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(|err| corrupt(&format!("zlib section: {err}")))?;
                out
            }
            _ => lz4_flex::decompress(body, len)
                .map_err(|err| corrupt(&format!("lz4 section: {err}")))?,
        };
        if out.len() != len {
            return Err(corrupt("section length does not match its prefix"));
        }
        Ok(out)
    }
}

pub(crate) fn corrupt(what: &str) -> SvnError {
    SvnError::Protocol(format!("corrupt svndiff: {what}"))
}

/// Appends `value` as a big-endian base-128 varint.
pub(crate) fn put_varint(value: u64, out: &mut Vec<u8>) {
    let mut groups = [0u8; MAX_VARINT_LEN];
    let mut n = 0;
    let mut rest = value;
    loop {
        groups[n] = (rest & 0x7f) as u8;
        n += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for idx in (1..n).rev() {
        out.push(groups[idx] | 0x80);
    }
    out.push(groups[0]);
}

/// Reads a varint from the front of `input`; `None` if it is incomplete.
pub(crate) fn take_varint(input: &[u8]) -> Result<Option<(u64, usize)>, SvnError> {
    let mut value = 0u64;
    for (idx, &byte) in input.iter().enumerate().take(MAX_VARINT_LEN) {
        value = value
            .checked_mul(128)
            .map(|v| v | u64::from(byte & 0x7f))
            .ok_or_else(|| corrupt("integer overflow"))?;
        if byte & 0x80 == 0 {
            return Ok(Some((value, idx + 1)));
        }
    }
    if input.len() >= MAX_VARINT_LEN {
        return Err(corrupt("integer overflow"));
    }
    Ok(None)
}

/// The five integers that open every window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct WindowHeader {
    pub(crate) source_offset: u64,
    pub(crate) source_len: usize,
    pub(crate) target_len: usize,
    pub(crate) instructions_len: usize,
    pub(crate) new_data_len: usize,
}

impl WindowHeader {
    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        put_varint(self.source_offset, out);
        for len in [
            self.source_len,
            self.target_len,
            self.instructions_len,
            self.new_data_len,
        ] {
            put_varint(len as u64, out);
        }
    }

    /// Parses a header from the front of `input`, returning it and its
    /// encoded length; `None` until all five integers are present.
    pub(crate) fn parse(input: &[u8]) -> Result<Option<(Self, usize)>, SvnError> {
        let mut fields = [0u64; 5];
        let mut pos = 0;
        for field in &mut fields {
            let Some((value, used)) = take_varint(&input[pos..])? else {
                return Ok(None);
            };
            *field = value;
            pos += used;
        }
        let [source_offset, source_len, target_len, instructions_len, new_data_len] =
            fields.map(usize::try_from);
        let header = Self {
            source_offset: fields[0],
            source_len: source_len.map_err(|_| corrupt("source view too large"))?,
            target_len: target_len.map_err(|_| corrupt("target view too large"))?,
            instructions_len: instructions_len
                .map_err(|_| corrupt("instruction section too large"))?,
            new_data_len: new_data_len.map_err(|_| corrupt("new data section too large"))?,
        };
        source_offset.map_err(|_| corrupt("source view offset too large"))?;
        header.validate()?;
        Ok(Some((header, pos)))
    }

    fn validate(&self) -> Result<(), SvnError> {
        if self.source_len > MAX_WINDOW
            || self.target_len > MAX_WINDOW
            || self.new_data_len > MAX_WINDOW + MAX_VARINT_LEN
            || self.instructions_len > MAX_INSTRUCTIONS_LEN
        {
            return Err(corrupt("window exceeds the size limits"));
        }
        if self
            .source_offset
            .checked_add(self.source_len as u64)
            .is_none()
        {
            return Err(corrupt("source view end overflows"));
        }
        Ok(())
    }

    /// Bytes that follow the header.
    pub(crate) fn body_len(&self) -> usize {
        self.instructions_len + self.new_data_len
    }
}

/// Encodes `contents` as svndiff chunks: the magic first, then one chunk per
/// window of at most `window_size` bytes. Empty contents still get one
/// (empty) window.
pub(crate) fn encode_fulltext_chunks(
    version: SvndiffVersion,
    contents: &[u8],
    zlib_level: u32,
    window_size: usize,
) -> Result<Vec<Vec<u8>>, SvnError> {
    let window_size = window_size.clamp(1, MAX_WINDOW);
    let mut chunks = Vec::with_capacity(2 + contents.len() / window_size);
    chunks.push(version.magic().to_vec());
    if contents.is_empty() {
        chunks.push(insertion_window(version, &[], zlib_level)?);
    }
    for piece in contents.chunks(window_size) {
        chunks.push(insertion_window(version, piece, zlib_level)?);
    }
    Ok(chunks)
}

#[cfg(test)]
pub(crate) fn encode_fulltext_with_options(
    version: SvndiffVersion,
    contents: &[u8],
    zlib_level: u32,
    window_size: usize,
) -> Result<Vec<u8>, SvnError> {
    Ok(encode_fulltext_chunks(version, contents, zlib_level, window_size)?.concat())
}

/// One window whose target is `data`, built from a single `new` instruction.
fn insertion_window(
    version: SvndiffVersion,
    data: &[u8],
    zlib_level: u32,
) -> Result<Vec<u8>, SvnError> {
    let mut instruction = Vec::with_capacity(1 + MAX_VARINT_LEN);
    if data.len() < 0x40 {
        instruction.push((OP_NEW << 6) | data.len() as u8);
    } else {
        instruction.push(OP_NEW << 6);
        put_varint(data.len() as u64, &mut instruction);
    }
    let instructions = version.pack(&instruction, zlib_level)?;
    let new_data = version.pack(data, zlib_level)?;

    let header = WindowHeader {
        source_offset: 0,
        source_len: 0,
        target_len: data.len(),
        instructions_len: instructions.len(),
        new_data_len: new_data.len(),
    };
    let mut out = Vec::with_capacity(5 * MAX_VARINT_LEN + header.body_len());
    header.write(&mut out);
    out.extend_from_slice(&instructions);
    out.extend_from_slice(&new_data);
    Ok(out)
}
