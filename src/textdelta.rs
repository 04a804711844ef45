//! Streaming svndiff decoder.
//!
//! Text deltas arrive as `textdelta-chunk` payloads cut at arbitrary byte
//! boundaries. [`TextDeltaApplier`] buffers until a whole window is present,
//! applies it to the base text and writes the target bytes out.

use std::io::Write;

use crate::SvnError;
use crate::svndiff::{
    MAX_INSTRUCTIONS_LEN, MAX_VARINT_LEN, MAX_WINDOW, OP_NEW, OP_SOURCE, OP_TARGET,
    SvndiffVersion, WindowHeader, corrupt, take_varint,
};

const MAGIC_LEN: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    /// Copy from the source view.
    Source { offset: usize, len: usize },
    /// Copy from the target produced so far; may overlap itself.
    Target { offset: usize, len: usize },
    /// Take the next bytes of the new-data section.
    New { len: usize },
}

/// Walks an instruction section.
struct Ops<'a> {
    rest: &'a [u8],
}

impl Ops<'_> {
    fn operand(&mut self, what: &str) -> Result<usize, SvnError> {
        let (value, used) = take_varint(self.rest)?
            .ok_or_else(|| corrupt(&format!("instruction is missing its {what}")))?;
        self.rest = &self.rest[used..];
        usize::try_from(value).map_err(|_| corrupt("instruction operand overflows usize"))
    }

    fn decode(&mut self, selector: u8) -> Result<Op, SvnError> {
        let mut len = usize::from(selector & 0x3f);
        if len == 0 {
            len = self.operand("length")?;
        }
        if len == 0 {
            return Err(corrupt("instruction has length zero"));
        }
        match selector >> 6 {
            OP_SOURCE => Ok(Op::Source {
                offset: self.operand("offset")?,
                len,
            }),
            OP_TARGET => Ok(Op::Target {
                offset: self.operand("offset")?,
                len,
            }),
            OP_NEW => Ok(Op::New { len }),
            _ => Err(corrupt("invalid instruction opcode")),
        }
    }
}

impl Iterator for Ops<'_> {
    type Item = Result<Op, SvnError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&selector, rest) = self.rest.split_first()?;
        self.rest = rest;
        Some(self.decode(selector))
    }
}

fn apply_window(
    source: &[u8],
    target_len: usize,
    instructions: &[u8],
    new_data: &[u8],
) -> Result<Vec<u8>, SvnError> {
    let mut target = Vec::with_capacity(target_len);
    let mut new_pos = 0usize;

    for op in (Ops { rest: instructions }) {
        let op = op?;
        let (Op::Source { len, .. } | Op::Target { len, .. } | Op::New { len }) = op;
        if target
            .len()
            .checked_add(len)
            .is_none_or(|end| end > target_len)
        {
            return Err(corrupt("instruction writes past the target view"));
        }
        match op {
            Op::Source { offset, len } => {
                let bytes = offset
                    .checked_add(len)
                    .and_then(|end| source.get(offset..end))
                    .ok_or_else(|| corrupt("source copy runs past the source view"))?;
                target.extend_from_slice(bytes);
            }
            Op::Target { offset, len } => {
                if offset >= target.len() {
                    return Err(corrupt("target copy starts past the bytes written so far"));
                }
                for idx in offset..offset + len {
                    let byte = target[idx];
                    target.push(byte);
                }
            }
            Op::New { len } => {
                let bytes = new_pos
                    .checked_add(len)
                    .and_then(|end| new_data.get(new_pos..end))
                    .ok_or_else(|| corrupt("new-data copy runs past the section"))?;
                target.extend_from_slice(bytes);
                new_pos += len;
            }
        }
    }

    if target.len() != target_len {
        return Err(corrupt("window does not fill its target view"));
    }
    if new_pos != new_data.len() {
        return Err(corrupt("window leaves new data unused"));
    }
    Ok(target)
}

/// Incrementally applies an svndiff delta (any version) to a base text.
///
/// [`push`](Self::push) accepts raw svndiff bytes in slices of any size. A
/// delta that never received a byte is the identity: [`finish`](Self::finish)
/// then writes `base` unchanged.
pub struct TextDeltaApplier {
    base: Vec<u8>,
    magic: Vec<u8>,
    version: Option<SvndiffVersion>,
    pending: Vec<u8>,
    consumed: usize,
    /// `(offset, end)` of the last non-empty source view.
    last_view: (u64, u64),
    touched: bool,
}

impl TextDeltaApplier {
    /// Creates an applier for `base`.
    pub fn new(base: Vec<u8>) -> Self {
        Self {
            base,
            magic: Vec::with_capacity(MAGIC_LEN),
            version: None,
            pending: Vec::new(),
            consumed: 0,
            last_view: (0, 0),
            touched: false,
        }
    }

    /// Feeds one chunk and writes every window it completes to `out`.
    pub fn push<W: Write>(&mut self, chunk: &[u8], out: &mut W) -> Result<(), SvnError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.touched = true;

        let mut chunk = chunk;
        if self.version.is_none() {
            let take = (MAGIC_LEN - self.magic.len()).min(chunk.len());
            self.magic.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];
            if self.magic.len() < MAGIC_LEN {
                return Ok(());
            }
            self.version = Some(
                SvndiffVersion::from_magic(&self.magic)
                    .ok_or_else(|| corrupt("stream does not start with an svndiff header"))?,
            );
        }

        self.pending.extend_from_slice(chunk);
        while self.apply_next(out)? {}
        self.pending.drain(..self.consumed);
        self.consumed = 0;
        Ok(())
    }

    /// Applies the next window if it is complete.
    fn apply_next<W: Write>(&mut self, out: &mut W) -> Result<bool, SvnError> {
        let Some(version) = self.version else {
            return Ok(false);
        };
        let buffered = &self.pending[self.consumed..];
        let Some((header, header_len)) = WindowHeader::parse(buffered)? else {
            if buffered.len() > 5 * MAX_VARINT_LEN {
                return Err(corrupt("window header is too long"));
            }
            return Ok(false);
        };
        let start = self.consumed + header_len;
        let end = start + header.body_len();
        if self.pending.len() < end {
            return Ok(false);
        }
        self.slide_view(&header)?;

        let (instructions, new_data) =
            self.pending[start..end].split_at(header.instructions_len);
        let instructions = version.unpack(instructions, MAX_INSTRUCTIONS_LEN)?;
        let new_data = version.unpack(new_data, MAX_WINDOW)?;
        let target = apply_window(
            self.source_view(&header)?,
            header.target_len,
            &instructions,
            &new_data,
        )?;
        out.write_all(&target)?;
        self.consumed = end;
        Ok(true)
    }

    /// Source views may only move forward through the base text.
    fn slide_view(&mut self, header: &WindowHeader) -> Result<(), SvnError> {
        if header.source_len == 0 {
            return Ok(());
        }
        let view = (
            header.source_offset,
            header.source_offset + header.source_len as u64,
        );
        if view.0 < self.last_view.0 || view.1 < self.last_view.1 {
            return Err(corrupt("source views slide backwards"));
        }
        self.last_view = view;
        Ok(())
    }

    fn source_view(&self, header: &WindowHeader) -> Result<&[u8], SvnError> {
        usize::try_from(header.source_offset)
            .ok()
            .and_then(|offset| self.base.get(offset..offset.checked_add(header.source_len)?))
            .ok_or_else(|| corrupt("source view lies outside the base text"))
    }

    /// Ends the stream, failing if a window was left incomplete.
    pub fn finish<W: Write>(self, out: &mut W) -> Result<(), SvnError> {
        if !self.touched {
            out.write_all(&self.base)?;
            return Ok(());
        }
        if self.version.is_none() {
            return Err(corrupt("stream ended inside the header"));
        }
        if self.consumed < self.pending.len() {
            return Err(corrupt("stream ended on a truncated window"));
        }
        Ok(())
    }
}

/// Applies an svndiff delta (svndiff0/1/2) to `base`, writing the result to
/// `out`.
pub fn apply_textdelta<W, I, B>(base: &[u8], chunks: I, out: &mut W) -> Result<(), SvnError>
where
    W: Write,
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut applier = TextDeltaApplier::new(base.to_vec());
    for chunk in chunks {
        applier.push(chunk.as_ref(), out)?;
    }
    applier.finish(out)
}
