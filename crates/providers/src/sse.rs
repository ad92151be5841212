//! Incremental SSE framing for streaming completion responses.
//!
//! SSE format: frames separated by a blank line, each containing `data:` lines
//! and possibly other fields (`event:`, `id:`, `retry:`, comments) that the
//! relay does not use.

/// Marker that starts a payload line.
pub const DATA_PREFIX: &str = "data:";

/// Payload value that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// The parsed form of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Payload texts in line order, prefix and leading whitespace stripped.
    pub payloads: Vec<String>,
    /// Set when a payload equal to [`DONE_SENTINEL`] was seen. Payload lines
    /// after it are not collected.
    pub terminal: bool,
}

/// Buffers raw bytes across chunk boundaries and hands back complete frames.
///
/// Bytes are kept undecoded until a frame is complete, so a multi-byte UTF-8
/// character split across two reads survives intact.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the HTTP response. Returns any complete frames, in
    /// arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some((end, delimiter_len)) = find_boundary(&self.buffer[start..]) {
            let frame = &self.buffer[start..start + end];
            frames.push(String::from_utf8_lossy(frame).into_owned());
            start += end + delimiter_len;
        }
        self.buffer.drain(..start);

        frames
    }

    /// Bytes received but not yet emitted as part of a frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take whatever is left as a final, possibly incomplete frame.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Position and length of the first blank-line delimiter (`\n\n` or `\n\r\n`).
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    buf.iter().enumerate().find_map(|(i, &b)| {
        if b != b'\n' {
            return None;
        }
        match (buf.get(i + 1), buf.get(i + 2)) {
            (Some(b'\n'), _) => Some((i, 2)),
            (Some(b'\r'), Some(b'\n')) => Some((i, 3)),
            _ => None,
        }
    })
}

/// Parse one frame into its payloads.
pub fn parse_frame(frame: &str) -> SseEvent {
    let mut event = SseEvent::default();

    for line in frame.lines().map(str::trim).filter(|l| !l.is_empty()) {
        // Ignore other fields (event:, id:, retry:, comments starting with :)
        let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
            continue;
        };
        let payload = rest.trim_start();
        if payload == DONE_SENTINEL {
            event.terminal = true;
            break;
        }
        event.payloads.push(payload.to_string());
    }

    event
}
