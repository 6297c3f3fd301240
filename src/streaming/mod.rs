use futures::stream::{Stream, StreamExt};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::models::openai::ChatCompletionChunk;

/// Prefix of every event line in an SSE body
pub const DATA_PREFIX: &str = "data: ";

/// Payload that terminates an OpenAI-style stream
pub const DONE_SENTINEL: &str = "[DONE]";

// ==================================================================================================
// Data Structures
// ==================================================================================================

/// Classification of one line of an SSE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// No `data: ` prefix (blank keep-alive, `event:`, comments)
    Ignored,
    /// The `[DONE]` sentinel; no more content follows
    Done,
    /// A decoded event whose `choices[0].delta.content` is non-empty
    Content(String),
    /// A decoded event without content (role delta, finish chunk, usage chunk)
    Empty,
    /// Payload that failed to decode; skipped by callers
    Malformed(String),
}

/// One generated text fragment and when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    /// Time since the request was issued
    pub elapsed: Duration,
}

/// Running per-request view of a consumed stream.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Elapsed time of the first non-empty fragment
    pub first_fragment_at: Option<Duration>,
    /// Content-bearing events seen; approximates completion tokens
    pub fragment_count: u64,
    /// Concatenated text, only kept when capture is enabled
    pub text: Option<String>,
}

impl StreamStats {
    pub fn new(capture_text: bool) -> Self {
        Self {
            first_fragment_at: None,
            fragment_count: 0,
            text: capture_text.then(String::new),
        }
    }

    pub fn observe(&mut self, fragment: &Fragment) {
        if self.first_fragment_at.is_none() {
            self.first_fragment_at = Some(fragment.elapsed);
        }
        self.fragment_count += 1;
        if let Some(text) = self.text.as_mut() {
            text.push_str(&fragment.text);
        }
    }
}

// ==================================================================================================
// Line Framing
// ==================================================================================================

/// Splits a chunked byte body into complete lines.
///
/// Chunk boundaries are arbitrary: a line (or a multi-byte UTF-8 sequence)
/// may be split across several chunks, so bytes are buffered until a `\n`
/// arrives. Lines are decoded lossily once complete.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every line completed by them, without the
    /// trailing `\n` / `\r\n`.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + pos;
            lines.push(decode_line(&self.buffer[consumed..end]));
            consumed = end + 1;
        }
        self.buffer.drain(..consumed);

        lines
    }

    /// Return the unterminated tail, if any, once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = decode_line(&self.buffer);
        self.buffer.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

// ==================================================================================================
// Event Parsing
// ==================================================================================================

/// Classify a single SSE line.
pub fn parse_line(line: &str) -> SseLine {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return SseLine::Ignored;
    };

    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return SseLine::Done;
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => match chunk.first_content() {
            Some(content) if !content.is_empty() => SseLine::Content(content.to_string()),
            _ => SseLine::Empty,
        },
        Err(e) => SseLine::Malformed(e.to_string()),
    }
}

/// Outcome of feeding one line to the fragment stream
enum Step {
    Emit(Fragment),
    Skip,
    Stop,
}

fn step_for(line: &str, start: Instant) -> Step {
    match parse_line(line) {
        SseLine::Content(text) => Step::Emit(Fragment {
            text,
            elapsed: start.elapsed(),
        }),
        SseLine::Done => Step::Stop,
        SseLine::Malformed(reason) => {
            let preview: String = line.chars().take(100).collect();
            debug!(reason = %reason, line = %preview, "Skipping malformed stream event");
            Step::Skip
        }
        SseLine::Ignored | SseLine::Empty => Step::Skip,
    }
}

// ==================================================================================================
// Fragment Stream
// ==================================================================================================

/// Turn a response body into a lazy stream of content fragments.
///
/// Ends after `[DONE]` or when the body ends. Malformed events are skipped.
/// An error from the body is yielded once and ends the stream. `start` is
/// the instant the request was issued; fragment timestamps are relative to it.
pub fn content_fragments<S, B, E>(body: S, start: Instant) -> impl Stream<Item = Result<Fragment, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        futures::pin_mut!(body);
        let mut lines = LineBuffer::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for line in lines.feed(chunk.as_ref()) {
                match step_for(&line, start) {
                    Step::Emit(fragment) => yield Ok(fragment),
                    Step::Skip => {}
                    Step::Stop => return,
                }
            }
        }

        // Body closed without a trailing newline
        if let Some(line) = lines.finish() {
            if let Step::Emit(fragment) = step_for(&line, start) {
                yield Ok(fragment);
            }
        }
    }
}
