//! Telnet IAC parsing and option negotiation.
//!
//! The parser strips IAC sequences from the byte stream and answers option
//! negotiation. Only two options are accepted from the client:
//! - NAWS (31): the client reports its window size,
//! - TTYPE (24): the client reports its terminal type on request.
//!
//! Everything else is refused (`DO` => `WONT`, `WILL` => `DONT`).
//! Subnegotiation payloads for accepted options are decoded into
//! [`TelnetEvent`]s; the portal turns those into session capabilities.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const GA: u8 = 249;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_TTYPE: u8 = 24;
pub const OPT_NAWS: u8 = 31;

const TTYPE_IS: u8 = 0;
const TTYPE_SEND: u8 = 1;

/// Subnegotiation payloads longer than this are dropped.
const MAX_SUBNEG_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    WindowSize { width: u16, height: u16 },
    TerminalType(String),
    /// The client refused an option we asked for.
    Refused(u8),
}

/// What one call to [`IacParser::parse`] produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Parsed {
    /// Application data with IAC sequences removed.
    pub data: Vec<u8>,
    /// Bytes to write back to the client.
    pub replies: Vec<u8>,
    pub events: Vec<TelnetEvent>,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate {
        cmd: u8,
    },
    Subneg {
        opt: Option<u8>,
        iac_seen: bool,
        buf: Vec<u8>,
    },
}

#[derive(Debug, Default)]
pub struct IacParser {
    state: State,
    /// Options we already sent `DO` for; a `WILL` answer to those needs no reply.
    asked: Vec<u8>,
}

impl IacParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// The opening negotiation the portal sends on connect.
    pub fn greeting(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6);
        for opt in [OPT_NAWS, OPT_TTYPE] {
            out.extend_from_slice(&[IAC, DO, opt]);
            self.asked.push(opt);
        }
        out
    }

    pub fn parse(&mut self, chunk: &[u8]) -> Parsed {
        let mut p = Parsed {
            data: Vec::with_capacity(chunk.len()),
            ..Parsed::default()
        };

        for &b in chunk {
            match &mut self.state {
                State::Data => {
                    if b == IAC {
                        self.state = State::Iac;
                    } else {
                        p.data.push(b);
                    }
                }
                State::Iac => match b {
                    IAC => {
                        p.data.push(IAC);
                        self.state = State::Data;
                    }
                    DO | DONT | WILL | WONT => self.state = State::Negotiate { cmd: b },
                    SB => {
                        self.state = State::Subneg {
                            opt: None,
                            iac_seen: false,
                            buf: Vec::new(),
                        }
                    }
                    // NOP, GA, AYT and friends carry no payload.
                    _ => self.state = State::Data,
                },
                State::Negotiate { cmd } => {
                    let cmd = *cmd;
                    self.state = State::Data;
                    self.negotiate(cmd, b, &mut p);
                }
                State::Subneg { opt, iac_seen, buf } => {
                    let Some(o) = *opt else {
                        *opt = Some(b);
                        continue;
                    };
                    if *iac_seen {
                        *iac_seen = false;
                        match b {
                            SE => {
                                let payload = std::mem::take(buf);
                                self.state = State::Data;
                                self.subnegotiation(o, &payload, &mut p);
                            }
                            IAC => buf.push(IAC),
                            _ => {}
                        }
                        continue;
                    }
                    if b == IAC {
                        *iac_seen = true;
                    } else if buf.len() < MAX_SUBNEG_LEN {
                        buf.push(b);
                    }
                }
            }
        }
        p
    }

    fn negotiate(&mut self, cmd: u8, opt: u8, p: &mut Parsed) {
        let accepted = matches!(opt, OPT_NAWS | OPT_TTYPE);
        match cmd {
            WILL if accepted => {
                let asked = self.asked.contains(&opt);
                if !asked {
                    p.replies.extend_from_slice(&[IAC, DO, opt]);
                    self.asked.push(opt);
                }
                if opt == OPT_TTYPE {
                    p.replies
                        .extend_from_slice(&[IAC, SB, OPT_TTYPE, TTYPE_SEND, IAC, SE]);
                }
            }
            WILL => p.replies.extend_from_slice(&[IAC, DONT, opt]),
            WONT if accepted => {
                self.asked.retain(|o| *o != opt);
                p.events.push(TelnetEvent::Refused(opt));
            }
            DO => p.replies.extend_from_slice(&[IAC, WONT, opt]),
            _ => {}
        }
    }

    fn subnegotiation(&mut self, opt: u8, payload: &[u8], p: &mut Parsed) {
        match opt {
            OPT_NAWS if payload.len() == 4 => {
                let width = u16::from_be_bytes([payload[0], payload[1]]);
                let height = u16::from_be_bytes([payload[2], payload[3]]);
                p.events.push(TelnetEvent::WindowSize { width, height });
            }
            OPT_TTYPE if payload.first() == Some(&TTYPE_IS) => {
                let name = String::from_utf8_lossy(&payload[1..]).trim().to_string();
                if !name.is_empty() {
                    p.events.push(TelnetEvent::TerminalType(name));
                }
            }
            _ => {}
        }
    }
}

/// `IAC GA` after a prompt lets line-mode clients render it without a newline.
pub fn go_ahead() -> [u8; 2] {
    [IAC, GA]
}

/// Escape literal 0xff bytes in outgoing application data.
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}
