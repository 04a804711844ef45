use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{ServerError, SvnError};

use super::SvnItem;
use super::encode_item;
use super::parse::{failure_item, parse_failure_chain};
use super::sasl::SecurityLayer;

const READ_CHUNK: usize = 16 * 1024;
/// Upper bound for the initial allocation of a wire string; the declared
/// length is untrusted.
const MAX_STRING_PREALLOC: usize = 64 * 1024;

pub(crate) type DynRead = Box<dyn AsyncRead + Unpin + Send>;
pub(crate) type DynWrite = Box<dyn AsyncWrite + Unpin + Send>;

#[derive(Clone, Copy, Debug)]
pub(crate) struct ConnectionConfig {
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
}

/// Buffered element reader/writer for one client connection.
///
/// After authentication a [`SecurityLayer`] may be installed exactly once with
/// [`RaSvnConnection::install_security_layer`]; from then on every byte read
/// is decoded and every byte written is encoded by it.
pub(crate) struct RaSvnConnection {
    read: DynRead,
    write: DynWrite,
    buf: Vec<u8>,
    pos: usize,
    write_buf: Vec<u8>,
    read_timeout: Duration,
    write_timeout: Duration,
    layer: Option<Box<dyn SecurityLayer>>,
}

impl RaSvnConnection {
    pub(crate) fn new(read: DynRead, write: DynWrite, config: ConnectionConfig) -> Self {
        Self {
            read,
            write,
            buf: Vec::new(),
            pos: 0,
            write_buf: Vec::new(),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            layer: None,
        }
    }

    /// Wraps both directions with `layer`.
    ///
    /// Input that was already buffered arrived after the peer switched to the
    /// wrapped framing, so it is decoded here before any further parsing.
    pub(crate) fn install_security_layer(
        &mut self,
        mut layer: Box<dyn SecurityLayer>,
    ) -> Result<(), SvnError> {
        if self.layer.is_some() {
            return Err(SvnError::Protocol("security layer already installed".into()));
        }
        let pending = self.buf.split_off(self.pos);
        self.buf.clear();
        self.pos = 0;
        if !pending.is_empty() {
            let decoded = layer.decode(&pending)?;
            self.buf.extend_from_slice(&decoded);
        }
        debug!(max_outbuf = layer.max_outbuf(), "security layer installed");
        self.layer = Some(layer);
        Ok(())
    }

    pub(crate) async fn write_success(&mut self, params: Vec<SvnItem>) -> Result<(), SvnError> {
        self.write_item(&SvnItem::List(vec![
            SvnItem::word("success"),
            SvnItem::List(params),
        ]))
        .await
    }

    pub(crate) async fn write_failure(&mut self, err: &ServerError) -> Result<(), SvnError> {
        debug!(error = %err, "writing failure response");
        self.write_item(&failure_item(err)).await
    }

    /// Writes `( success ( ) )` or the failure, whichever `result` holds.
    pub(crate) async fn write_response(
        &mut self,
        result: Result<Vec<SvnItem>, ServerError>,
    ) -> Result<(), SvnError> {
        match result {
            Ok(params) => self.write_success(params).await,
            Err(err) => self.write_failure(&err).await,
        }
    }

    /// The empty auth request sent ahead of command responses.
    pub(crate) async fn write_auth_marker(&mut self) -> Result<(), SvnError> {
        self.write_success(vec![SvnItem::List(Vec::new()), SvnItem::string("")])
            .await
    }

    pub(crate) async fn write_word(&mut self, word: &str) -> Result<(), SvnError> {
        self.write_item(&SvnItem::word(word)).await
    }

    pub(crate) async fn write_item(&mut self, item: &SvnItem) -> Result<(), SvnError> {
        self.queue_item(item);
        self.flush().await
    }

    /// Appends `item` to the outgoing buffer without writing it.
    pub(crate) fn queue_item(&mut self, item: &SvnItem) {
        encode_item(item, &mut self.write_buf);
        self.write_buf.push(b'\n');
    }

    /// Lets `encode` append already-framed bytes to the outgoing buffer.
    pub(crate) fn queue_encoded(&mut self, encode: impl FnOnce(&mut Vec<u8>)) {
        encode(&mut self.write_buf);
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.write_buf.len()
    }

    /// Sends everything queued. With a security layer installed the bytes
    /// go out as encoded frames of at most `max_outbuf` cleartext bytes
    /// (0 means unbounded).
    pub(crate) async fn flush(&mut self) -> Result<(), SvnError> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let frames = match self.layer.as_mut() {
            None => vec![std::mem::take(&mut self.write_buf)],
            Some(layer) => {
                let frame_len = match layer.max_outbuf() as usize {
                    0 => self.write_buf.len(),
                    n => n,
                };
                let frames = self
                    .write_buf
                    .chunks(frame_len)
                    .map(|cleartext| layer.encode(cleartext))
                    .collect::<Result<Vec<_>, _>>()?;
                self.write_buf.clear();
                frames
            }
        };

        let write = &mut self.write;
        let send = async move {
            for frame in &frames {
                write.write_all(frame).await?;
            }
            write.flush().await
        };
        tokio::time::timeout(self.write_timeout, send)
            .await
            .map_err(|_| SvnError::timed_out("write"))??;
        Ok(())
    }

    /// Reads the peer's `( success ( ... ) )` or `( failure ( ... ) )`.
    ///
    /// The outer result is the fatal channel; the inner one carries the
    /// peer's verdict.
    pub(crate) async fn read_command_response(
        &mut self,
    ) -> Result<Result<Vec<SvnItem>, ServerError>, SvnError> {
        let item = self.read_item().await?;
        let SvnItem::List(mut parts) = item else {
            return Err(SvnError::Protocol("command response not a list".into()));
        };
        if parts.is_empty() {
            return Err(SvnError::Protocol("empty command response".into()));
        }
        let params = match parts.get_mut(1) {
            Some(SvnItem::List(items)) => std::mem::take(items),
            _ => Vec::new(),
        };
        match parts[0].as_word() {
            Some("success") => Ok(Ok(params)),
            Some("failure") => Ok(Err(parse_failure_chain(&params))),
            Some(other) => Err(SvnError::Protocol(format!(
                "unexpected command response kind: {other}"
            ))),
            None => Err(SvnError::Protocol(
                "command response kind not a word".into(),
            )),
        }
    }

    pub(crate) async fn read_item(&mut self) -> Result<SvnItem, SvnError> {
        tokio::time::timeout(self.read_timeout, self.read_item_inner())
            .await
            .map_err(|_| SvnError::timed_out("read"))?
    }

    /// Reads the next top-level item, or `None` if the peer closed the
    /// connection cleanly between items.
    pub(crate) async fn read_command(&mut self) -> Result<Option<SvnItem>, SvnError> {
        let pending = tokio::time::timeout(self.read_timeout, self.wait_for_item())
            .await
            .map_err(|_| SvnError::timed_out("read"))??;
        if !pending {
            return Ok(None);
        }
        self.read_item().await.map(Some)
    }

    async fn wait_for_item(&mut self) -> Result<bool, SvnError> {
        while !self.skip_buffered_ws() {
            match self.fill().await {
                Ok(()) => {}
                Err(SvnError::UnexpectedEof) => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Drops buffered whitespace; `true` if a non-space byte is buffered.
    fn skip_buffered_ws(&mut self) -> bool {
        let rest = &self.buf[self.pos..];
        let blanks = rest
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.pos += blanks;
        self.pos < self.buf.len()
    }

    /// Returns `true` if the peer has sent something we have not read yet.
    pub(crate) async fn data_available(&mut self) -> Result<bool, SvnError> {
        if self.skip_buffered_ws() {
            return Ok(true);
        }
        self.compact();

        let mut temp = [0u8; READ_CHUNK];
        match tokio::time::timeout(Duration::ZERO, self.read.read(&mut temp)).await {
            Err(_) => Ok(false),
            Ok(Err(err)) => Err(SvnError::Io(err)),
            Ok(Ok(0)) => Err(SvnError::UnexpectedEof),
            Ok(Ok(n)) => {
                self.push_input(&temp[..n])?;
                Ok(self.skip_buffered_ws())
            }
        }
    }

    async fn read_item_inner(&mut self) -> Result<SvnItem, SvnError> {
        let mut open: Vec<Vec<SvnItem>> = Vec::new();
        loop {
            let item = match self.next_token().await? {
                Token::Open => {
                    open.push(Vec::new());
                    continue;
                }
                Token::Close => SvnItem::List(
                    open.pop()
                        .ok_or_else(|| SvnError::Protocol("unbalanced ')'".into()))?,
                ),
                Token::Atom(item) => item,
            };
            match open.last_mut() {
                Some(parent) => parent.push(item),
                None => return Ok(item),
            }
        }
    }

    /// Scans one token together with the whitespace that must follow it.
    async fn next_token(&mut self) -> Result<Token, SvnError> {
        let mut first = self.next_byte().await?;
        while first.is_ascii_whitespace() {
            first = self.next_byte().await?;
        }
        let token = match first {
            b'(' => Token::Open,
            b')' => Token::Close,
            b'0'..=b'9' => Token::Atom(self.number_or_string(first).await?),
            _ => Token::Atom(self.word(first).await?),
        };
        if !self.next_byte().await?.is_ascii_whitespace() {
            return Err(SvnError::Protocol("expected whitespace".into()));
        }
        Ok(token)
    }

    async fn number_or_string(&mut self, first: u8) -> Result<SvnItem, SvnError> {
        let mut value = u64::from(first - b'0');
        loop {
            let b = self.peek_byte().await?;
            if !b.is_ascii_digit() {
                break;
            }
            self.pos += 1;
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(b - b'0')))
                .ok_or_else(|| SvnError::Protocol("number overflow".into()))?;
        }
        if self.peek_byte().await? != b':' {
            return Ok(SvnItem::Number(value));
        }
        self.pos += 1;
        let len = usize::try_from(value)
            .map_err(|_| SvnError::Protocol("string length overflows usize".into()))?;
        Ok(SvnItem::String(self.take_bytes(len).await?))
    }

    async fn word(&mut self, first: u8) -> Result<SvnItem, SvnError> {
        let mut bytes = vec![first];
        loop {
            let b = self.peek_byte().await?;
            match b {
                b'(' | b')' | b':' => {
                    return Err(SvnError::Protocol("invalid word token".into()));
                }
                _ if b.is_ascii_whitespace() => break,
                _ => {
                    bytes.push(b);
                    self.pos += 1;
                }
            }
        }
        if !first.is_ascii_alphabetic() {
            return Err(SvnError::Protocol("invalid word token".into()));
        }
        let word = String::from_utf8(bytes)
            .map_err(|_| SvnError::Protocol("non-utf8 word".into()))?;
        Ok(SvnItem::word(&word))
    }

    async fn take_bytes(&mut self, len: usize) -> Result<Vec<u8>, SvnError> {
        let mut out = Vec::with_capacity(len.min(MAX_STRING_PREALLOC));
        while out.len() < len {
            if self.pos == self.buf.len() {
                self.fill().await?;
                continue;
            }
            let end = self.buf.len().min(self.pos + (len - out.len()));
            out.extend_from_slice(&self.buf[self.pos..end]);
            self.pos = end;
        }
        Ok(out)
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    fn push_input(&mut self, raw: &[u8]) -> Result<(), SvnError> {
        match self.layer.as_mut() {
            Some(layer) => {
                let decoded = layer.decode(raw)?;
                self.buf.extend_from_slice(&decoded);
            }
            None => self.buf.extend_from_slice(raw),
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<(), SvnError> {
        self.compact();
        let mut temp = [0u8; READ_CHUNK];
        let before = self.buf.len();
        // A security layer may need more than one frame to yield output.
        while self.buf.len() == before {
            let n = self.read.read(&mut temp).await?;
            if n == 0 {
                return Err(SvnError::UnexpectedEof);
            }
            self.push_input(&temp[..n])?;
        }
        Ok(())
    }

    async fn peek_byte(&mut self) -> Result<u8, SvnError> {
        if self.pos == self.buf.len() {
            self.fill().await?;
        }
        Ok(self.buf[self.pos])
    }

    async fn next_byte(&mut self) -> Result<u8, SvnError> {
        let b = self.peek_byte().await?;
        self.pos += 1;
        Ok(b)
    }
}

enum Token {
    Open,
    Close,
    Atom(SvnItem),
}
