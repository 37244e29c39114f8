use bytes::Bytes;
use bytes::BytesMut;
use memchr::memchr;

/// What `LineBuffer::pop_line` found.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    Complete(Bytes),
    /// The client sent more than `max_line_len` bytes without a newline.
    /// The partial data is discarded up to the next newline.
    Overlong,
}

/// Incremental CR/LF line splitter for data that arrives in arbitrary chunks
/// (after telnet IAC stripping, so it can't sit directly on the socket).
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_line_len: usize,
    discarding: bool,
}

impl LineBuffer {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            max_line_len: max_line_len.max(1),
            discarding: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next line with its trailing `\n` / `\r\n` removed.
    pub fn pop_line(&mut self) -> Option<Line> {
        loop {
            match memchr(b'\n', &self.buf) {
                Some(i) => {
                    let raw = self.buf.split_to(i + 1).freeze();
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if raw.len() - 1 > self.max_line_len {
                        return Some(Line::Overlong);
                    }
                    return Some(Line::Complete(trim_eol(raw)));
                }
                None => {
                    if self.buf.len() > self.max_line_len {
                        self.buf.clear();
                        if self.discarding {
                            return None;
                        }
                        self.discarding = true;
                        return Some(Line::Overlong);
                    }
                    return None;
                }
            }
        }
    }
}

fn trim_eol(mut b: Bytes) -> Bytes {
    let mut end = b.len();
    while end > 0 && matches!(b[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    b.truncate(end);
    b
}
