//! SSE — decode a `text/event-stream` body into events.
//!
//! Line handling follows the EventSource processing model: `data:` lines
//! accumulate (joined with `\n`), a blank line dispatches, lines starting
//! with `:` are comments, and an event still buffered at end of stream is
//! discarded.

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::ViewerError;

/// Longest line accepted from the server.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `None` means the default "message" type
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental line-to-event decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: String,
    has_data: bool,
    last_id: Option<String>,
    retry_ms: Option<u64>,
    /// Current event lost a line; drop it at dispatch
    discarded: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnection delay most recently advertised by the server.
    pub fn retry_ms(&self) -> Option<u64> {
        self.retry_ms
    }

    /// Feed one line (without its terminator). Returns an event when the line
    /// completes one.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry_ms = Some(ms);
                }
            }
            _ => {}
        }
        None
    }

    /// Drop the event being assembled; it is not delivered when its blank
    /// line arrives.
    pub fn discard_event(&mut self) {
        self.discarded = true;
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if std::mem::take(&mut self.discarded) {
            self.data.clear();
            self.has_data = false;
            return None;
        }
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data),
            id: self.last_id.clone(),
        })
    }
}

/// One line as framed from the body.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    /// Line text without its `\n`; invalid UTF-8 is replaced, not rejected
    Text(String),
    /// A line longer than the limit, already skipped
    TooLong,
}

/// Splits a byte stream on `\n` without ever failing on content.
///
/// Over-long lines are skipped as they arrive, so memory stays bounded by
/// the limit even if the terminator never comes.
#[derive(Debug)]
struct LineCodec {
    max_length: usize,
    /// Bytes already searched for a newline
    scanned: usize,
    discarding: bool,
}

impl LineCodec {
    fn new(max_length: usize) -> Self {
        Self {
            max_length,
            scanned: 0,
            discarding: false,
        }
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        loop {
            let newline = src[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);

            match (self.discarding, newline) {
                (true, Some(pos)) => {
                    src.advance(pos + 1);
                    self.scanned = 0;
                    self.discarding = false;
                    return Ok(Some(Line::TooLong));
                }
                (true, None) => {
                    src.clear();
                    self.scanned = 0;
                    return Ok(None);
                }
                (false, Some(pos)) => {
                    let line = src.split_to(pos + 1);
                    self.scanned = 0;
                    if pos > self.max_length {
                        return Ok(Some(Line::TooLong));
                    }
                    return Ok(Some(Line::Text(String::from_utf8_lossy(&line[..pos]).into_owned())));
                }
                (false, None) if src.len() > self.max_length => {
                    self.discarding = true;
                }
                (false, None) => {
                    self.scanned = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        // An unterminated last line can't complete an event; drop it
        let line = self.decode(src)?;
        if line.is_none() {
            src.clear();
            self.scanned = 0;
        }
        Ok(line)
    }
}

/// Turn a response body into a stream of events.
///
/// Only the transport can fail the stream. A line that is not valid UTF-8
/// is decoded lossily, and an event containing an over-long line is dropped.
pub fn decode_stream<S, E>(body: S) -> impl Stream<Item = Result<SseEvent, ViewerError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display,
{
    decode_stream_with_limit(body, MAX_LINE_LENGTH)
}

fn decode_stream_with_limit<S, E>(body: S, max_line_length: usize) -> impl Stream<Item = Result<SseEvent, ViewerError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display,
{
    let reader = StreamReader::new(body.map_err(|e| std::io::Error::other(e.to_string())));
    let lines = FramedRead::new(reader, LineCodec::new(max_line_length));

    futures::stream::unfold(
        (lines, SseDecoder::new()),
        move |(mut lines, mut decoder)| async move {
            loop {
                match lines.next().await? {
                    Ok(Line::Text(line)) => {
                        if let Some(event) = decoder.push_line(&line) {
                            return Some((Ok(event), (lines, decoder)));
                        }
                    }
                    Ok(Line::TooLong) => {
                        debug!(limit = max_line_length, "Skipping over-long event line");
                        decoder.discard_event();
                    }
                    Err(e) => {
                        return Some((Err(ViewerError::Transport(e.to_string())), (lines, decoder)));
                    }
                }
            }
        },
    )
}
