//! Rendering outputcommands for a particular client protocol.
//!
//! An outputcommand named `foo` goes to the transport's `send_foo` when it
//! has one and to `send_default` otherwise.

use std::borrow::Cow;

use mudproto::msg::Msg;

pub trait Transport {
    /// One unit of output for the wire (bytes for telnet, a message for websockets).
    type Frame;

    fn send_text(&mut self, msg: &Msg) -> Option<Self::Frame>;

    fn send_prompt(&mut self, msg: &Msg) -> Option<Self::Frame> {
        self.send_text(msg)
    }

    /// Outputcommands this transport has no specific handler for.
    fn send_default(&mut self, msg: &Msg) -> Option<Self::Frame>;
}

pub fn render<T: Transport>(t: &mut T, msg: &Msg) -> Option<T::Frame> {
    match msg.name.as_str() {
        "text" => t.send_text(msg),
        "prompt" => t.send_prompt(msg),
        _ => t.send_default(msg),
    }
}

/// Drop ANSI escape sequences (CSI `ESC [ ... final` and two-byte `ESC x`).
pub fn strip_ansi(s: &str) -> Cow<'_, str> {
    if !s.contains('\x1b') {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('[') => {
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            Some(_) | None => {}
        }
    }
    Cow::Owned(out)
}
