// Text-sentinel wire format: frame markers, the bounded per-connection
// buffer, and the scan logic that pulls complete frames out of it.
use bytes::BytesMut;

// Frame markers are literal text, case-sensitive, with no escaping. A
// payload containing a marker string is outside the protocol's contract.
pub const SUBSCRIBE_START: &str = "__SUBSCRIBE__";
pub const SUBSCRIBE_END: &str = "__ENDSUBSCRIBE__";
pub const JSON_START: &str = "__JSON__START__";
pub const JSON_END: &str = "__JSON__END__";

// Greeting written to a client once its subscribe frame is accepted.
pub const GREETING: &str = "Hello. Noobhub online. \r\n";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("buffer capacity must be non-zero")]
    ZeroCapacity,
}

/// Outcome of appending a chunk to a [`FrameBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Stored,
    Overflow,
}

/// Bounded per-connection byte accumulator.
///
/// Inbound chunks are appended until a complete frame can be extracted; the
/// consumed prefix is then dropped and the remainder stays buffered for the
/// next read. A chunk that does not fit resets the whole buffer: there is
/// no way to resynchronize on a marker mid-stream, so partially buffered
/// bytes are unrecoverable after overflow.
///
/// ```
/// use hub_wire::{Append, FrameBuffer};
///
/// let mut buffer = FrameBuffer::new(8).expect("capacity");
/// assert_eq!(buffer.append(b"abc"), Append::Stored);
/// assert_eq!(buffer.append(b"toolarge"), Append::Overflow);
/// assert!(buffer.is_empty());
/// ```
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        Ok(Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append a chunk, or reset the buffer when the chunk does not fit.
    ///
    /// On overflow the chunk itself is dropped along with everything still
    /// buffered; the next append starts from an empty buffer.
    pub fn append(&mut self, chunk: &[u8]) -> Append {
        if chunk.len() > self.capacity - self.buf.len() {
            self.buf.clear();
            return Append::Overflow;
        }
        self.buf.extend_from_slice(chunk);
        Append::Stored
    }

    /// UTF-8 view of the buffered bytes.
    ///
    /// Returns `None` while the bytes are not valid UTF-8 (including a
    /// multi-byte character split across reads), which callers treat as
    /// "no complete frame yet", never as an error.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.buf).ok()
    }

    /// Drop the first `n` bytes; the remainder is kept for the next scan.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        let _ = self.buf.split_to(n);
    }
}

/// A complete subscribe frame located in buffered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFrame {
    pub channel: String,
    // Byte length through the end marker, including anything before the
    // start marker; the whole prefix is consumed with the frame.
    pub consumed: usize,
}

/// A complete JSON frame located in buffered text.
///
/// The payload is the raw text between the markers; whether it parses as
/// JSON is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFrame {
    pub payload: String,
    pub consumed: usize,
}

/// Locate the first complete subscribe frame: the first start marker
/// followed by an end marker after it.
///
/// ```
/// use hub_wire::subscribe_frame;
///
/// let frame = subscribe_frame("__SUBSCRIBE__room1__ENDSUBSCRIBE__").expect("frame");
/// assert_eq!(frame.channel, "room1");
/// assert!(subscribe_frame("__SUBSCRIBE__room1").is_none());
/// ```
pub fn subscribe_frame(text: &str) -> Option<SubscribeFrame> {
    let start = text.find(SUBSCRIBE_START)?;
    let name_at = start + SUBSCRIBE_START.len();
    let end = text[name_at..].find(SUBSCRIBE_END)? + name_at;
    Some(SubscribeFrame {
        channel: text[name_at..end].to_string(),
        consumed: end + SUBSCRIBE_END.len(),
    })
}

/// Locate the first complete JSON frame; callers re-scan the remainder
/// until this returns `None`.
pub fn json_frame(text: &str) -> Option<JsonFrame> {
    let start = text.find(JSON_START)?;
    let payload_at = start + JSON_START.len();
    let end = text[payload_at..].find(JSON_END)? + payload_at;
    Some(JsonFrame {
        payload: text[payload_at..end].to_string(),
        consumed: end + JSON_END.len(),
    })
}

/// Wrap a payload in the JSON markers for the wire.
pub fn wrap_json(payload: &str) -> String {
    format!("{JSON_START}{payload}{JSON_END}")
}
