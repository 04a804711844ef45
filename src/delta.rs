//! The delta codec seam.
//!
//! File contents travel as opaque delta chunks. The protocol engine only
//! needs to turn a full text into chunks, turn chunks back into bytes, and
//! checksum the result; [`SvndiffCodec`] does that with svndiff.

use std::io::Write;

use md5::{Digest, Md5};

use crate::svndiff::{SvndiffVersion, encode_fulltext_chunks};
use crate::textdelta::TextDeltaApplier;
use crate::{Capability, CapabilitySet, ErrorCode, ServerError};

/// Produces and consumes delta chunks.
pub trait DeltaCodec: Send + Sync {
    /// Encodes `contents` against an empty source, in a format the peer
    /// announced support for.
    fn encode_fulltext(
        &self,
        contents: &[u8],
        peer: &CapabilitySet,
    ) -> Result<Vec<Vec<u8>>, ServerError>;

    /// Starts decoding a delta against `base`.
    fn decoder(&self, base: Vec<u8>) -> Box<dyn DeltaDecoder>;
}

/// Incremental delta decoder created by [`DeltaCodec::decoder`].
pub trait DeltaDecoder: Send {
    /// Consumes one chunk, writing any completed output to `out`.
    fn push(&mut self, chunk: &[u8], out: &mut dyn Write) -> Result<(), ServerError>;

    /// Flushes the remaining output; fails if the stream was truncated.
    fn finish(self: Box<Self>, out: &mut dyn Write) -> Result<(), ServerError>;
}

/// svndiff codec: svndiff2 for peers that accept it, then svndiff1, then svndiff0.
#[derive(Clone, Copy, Debug)]
pub struct SvndiffCodec {
    zlib_level: u32,
    window_size: usize,
}

impl Default for SvndiffCodec {
    fn default() -> Self {
        Self {
            zlib_level: 5,
            window_size: 64 * 1024,
        }
    }
}

impl SvndiffCodec {
    /// Sets the zlib level used for svndiff1 (0 stores uncompressed).
    #[must_use]
    pub fn with_zlib_level(mut self, level: u32) -> Self {
        self.zlib_level = level.min(9);
        self
    }

    /// Sets the target window size in bytes.
    #[must_use]
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size.clamp(1, 64 * 1024);
        self
    }

    pub(crate) fn version_for(peer: &CapabilitySet) -> SvndiffVersion {
        if peer.has(Capability::AcceptsSvndiff2) {
            SvndiffVersion::V2
        } else if peer.has(Capability::Svndiff1) {
            SvndiffVersion::V1
        } else {
            SvndiffVersion::V0
        }
    }
}

impl DeltaCodec for SvndiffCodec {
    fn encode_fulltext(
        &self,
        contents: &[u8],
        peer: &CapabilitySet,
    ) -> Result<Vec<Vec<u8>>, ServerError> {
        encode_fulltext_chunks(
            Self::version_for(peer),
            contents,
            self.zlib_level,
            self.window_size,
        )
        .map_err(|err| ServerError::new(ErrorCode::Unknown, err.to_string()))
    }

    fn decoder(&self, base: Vec<u8>) -> Box<dyn DeltaDecoder> {
        Box::new(SvndiffDecoder(TextDeltaApplier::new(base)))
    }
}

struct SvndiffDecoder(TextDeltaApplier);

impl DeltaDecoder for SvndiffDecoder {
    fn push(&mut self, chunk: &[u8], mut out: &mut dyn Write) -> Result<(), ServerError> {
        self.0.push(chunk, &mut out).map_err(corrupt_delta)
    }

    fn finish(self: Box<Self>, mut out: &mut dyn Write) -> Result<(), ServerError> {
        self.0.finish(&mut out).map_err(corrupt_delta)
    }
}

#[track_caller]
fn corrupt_delta(err: crate::SvnError) -> ServerError {
    ServerError::new(ErrorCode::SvndiffCorrupt, err.to_string())
}

/// Hex MD5 of `bytes`.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Passes bytes through to `inner` while computing their MD5.
pub(crate) struct ChecksumWriter<W> {
    inner: W,
    digest: Md5,
    len: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner,
            digest: Md5::new(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Returns the inner writer and the hex digest of everything written.
    pub(crate) fn finish(self) -> (W, String) {
        (self.inner, hex::encode(self.digest.finalize()))
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
