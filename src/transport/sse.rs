//! Incremental `text/event-stream` decoding

use super::TransportError;

/// Largest event block held while waiting for its terminating blank line
pub(crate) const MAX_PENDING_BYTES: usize = 1 << 20;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Buffers raw body chunks and yields complete frames.
///
/// Works on bytes so a multi-byte character split across two chunks is only
/// decoded once the whole block has arrived.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a block terminator
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completed.
    ///
    /// Fails once an unterminated block grows past [`MAX_PENDING_BYTES`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, TransportError> {
        // CR only ever appears as part of a line terminator
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        loop {
            // A terminator may straddle the previous scan boundary
            let start = self.scanned.saturating_sub(1);
            let Some(offset) = self.buffer[start..].windows(2).position(|w| w == b"\n\n") else {
                self.scanned = self.buffer.len();
                break;
            };
            let block: Vec<u8> = self.buffer.drain(..start + offset + 2).collect();
            self.scanned = 0;
            if let Some(frame) = parse_block(&String::from_utf8_lossy(&block)) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_PENDING_BYTES {
            return Err(TransportError::malformed(format!(
                "Event stream block exceeds {MAX_PENDING_BYTES} bytes"
            )));
        }
        Ok(frames)
    }

    /// Flush a trailing block the server did not terminate with a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        parse_block(&String::from_utf8_lossy(&rest))
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line
            .split_once(':')
            .map_or((line, ""), |(f, v)| (f, v.strip_prefix(' ').unwrap_or(v)));
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }

    Some(SseFrame {
        event,
        data: data.join("\n"),
    })
}
