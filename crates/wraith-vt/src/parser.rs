//! Streaming parser for mixed text and ANSI/VT control sequences.
//!
//! The parser is a byte-at-a-time state machine. It can be fed arbitrarily
//! sized chunks; a sequence (or multi-byte UTF-8 character) split across
//! chunk boundaries is carried over and completed by the next call.
//!
//! Malformed input never fails: a byte that does not fit the current state
//! aborts the sequence in progress and emits everything consumed so far as a
//! [`Token::Unknown`], then parsing resumes in ground state. Syntactically
//! valid sequences with operations the grid does not implement still come out
//! as ordinary `Csi`/`Osc`/`Dcs` tokens; ignoring them is the grid's call.

use crate::token::{CsiParams, DcsPayload, OscString, Token};

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    /// Right after `ESC [`, before any parameter byte.
    CsiEntry,
    /// Accumulating digit/`;` parameters.
    CsiParam,
    /// Saw the intermediate byte; only a final byte may follow.
    CsiIntermediate,
    OscString,
    /// Saw ESC inside an OSC string (possible `ESC \` terminator).
    OscEsc,
    DcsPassthrough,
    /// Saw ESC inside a DCS payload.
    DcsEsc,
    /// Collecting continuation bytes of a multi-byte UTF-8 character.
    Utf8 { remaining: u8 },
}

/// Streaming token parser.
///
/// Call [`Parser::feed`] with each chunk of output. At end-of-stream,
/// [`Parser::flush`] surfaces any incomplete carry as an `Unknown` token so
/// no byte is ever dropped.
#[derive(Debug)]
pub struct Parser {
    state: State,
    /// Raw bytes of the escape sequence in progress, ESC included.
    pending: Vec<u8>,
    /// Printable run accumulated in ground state.
    text: String,
    params: Vec<Option<u16>>,
    cur_param: Option<u16>,
    private: Option<u8>,
    intermediate: Option<u8>,
    osc_accum: Vec<u8>,
    dcs_accum: Vec<u8>,
    utf8_buf: [u8; 4],
    utf8_len: u8,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            pending: Vec::new(),
            text: String::new(),
            params: Vec::new(),
            cur_param: None,
            private: None,
            intermediate: None,
            osc_accum: Vec::new(),
            dcs_accum: Vec::new(),
            utf8_buf: [0; 4],
            utf8_len: 0,
        }
    }

    /// Feed a chunk of bytes and return the tokens completed by it.
    ///
    /// A trailing printable run is emitted as `Text` at the end of the chunk;
    /// an unfinished escape sequence or partial UTF-8 character is carried
    /// into the next call instead.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Token> {
        let mut out = Vec::new();
        for &b in bytes {
            self.advance(b, &mut out);
        }
        self.flush_text(&mut out);
        out
    }

    /// Drain an incomplete carry (partial sequence or partial UTF-8
    /// character) as an `Unknown` token. Call at end-of-stream.
    pub fn flush(&mut self) -> Option<Token> {
        if self.utf8_len > 0 {
            let bytes = self.utf8_buf[..self.utf8_len as usize].to_vec();
            self.utf8_len = 0;
            self.state = State::Ground;
            return Some(Token::Unknown(bytes));
        }
        if !self.pending.is_empty() {
            self.state = State::Ground;
            return Some(Token::Unknown(std::mem::take(&mut self.pending)));
        }
        None
    }

    fn advance(&mut self, b: u8, out: &mut Vec<Token>) {
        match self.state {
            State::Ground => self.advance_ground(b, out),
            State::Escape => self.advance_escape(b, out),
            State::CsiEntry | State::CsiParam => self.advance_csi(b, out),
            State::CsiIntermediate => self.advance_csi_intermediate(b, out),
            State::OscString => self.advance_osc(b, out),
            State::OscEsc => self.advance_osc_esc(b, out),
            State::DcsPassthrough => self.advance_dcs(b, out),
            State::DcsEsc => self.advance_dcs_esc(b, out),
            State::Utf8 { remaining } => self.advance_utf8(b, remaining, out),
        }
    }

    fn advance_ground(&mut self, b: u8, out: &mut Vec<Token>) {
        match b {
            ESC => {
                self.flush_text(out);
                self.pending.push(ESC);
                self.state = State::Escape;
            }
            0x00..=0x1F | 0x7F => {
                self.flush_text(out);
                out.push(Token::Control(b));
            }
            0x20..=0x7E => self.text.push(b as char),
            // UTF-8 leading bytes. 0xC0/0xC1 (overlong) and 0xF5..=0xFF are
            // not valid leads and fall through to Unknown below.
            0xC2..=0xDF => self.start_utf8(b, 1),
            0xE0..=0xEF => self.start_utf8(b, 2),
            0xF0..=0xF4 => self.start_utf8(b, 3),
            _ => {
                self.flush_text(out);
                out.push(Token::Unknown(vec![b]));
            }
        }
    }

    fn start_utf8(&mut self, b: u8, remaining: u8) {
        self.utf8_buf[0] = b;
        self.utf8_len = 1;
        self.state = State::Utf8 { remaining };
    }

    fn advance_utf8(&mut self, b: u8, remaining: u8, out: &mut Vec<Token>) {
        if (0x80..=0xBF).contains(&b) {
            let idx = self.utf8_len as usize;
            self.utf8_buf[idx] = b;
            self.utf8_len += 1;
            if remaining == 1 {
                let len = self.utf8_len as usize;
                self.utf8_len = 0;
                self.state = State::Ground;
                match std::str::from_utf8(&self.utf8_buf[..len]) {
                    Ok(s) => self.text.push_str(s),
                    Err(_) => {
                        // Well-ranged lead but overlong/surrogate encoding.
                        self.flush_text(out);
                        out.push(Token::Unknown(self.utf8_buf[..len].to_vec()));
                    }
                }
            } else {
                self.state = State::Utf8 {
                    remaining: remaining - 1,
                };
            }
        } else {
            // Invalid continuation byte: surface the partial character and
            // reprocess this byte from ground state.
            let partial = self.utf8_buf[..self.utf8_len as usize].to_vec();
            self.utf8_len = 0;
            self.state = State::Ground;
            self.flush_text(out);
            out.push(Token::Unknown(partial));
            self.advance(b, out);
        }
    }

    fn advance_escape(&mut self, b: u8, out: &mut Vec<Token>) {
        match b {
            b'[' => {
                self.pending.push(b);
                self.params.clear();
                self.cur_param = None;
                self.private = None;
                self.intermediate = None;
                self.state = State::CsiEntry;
            }
            b']' => {
                self.pending.push(b);
                self.osc_accum.clear();
                self.state = State::OscString;
            }
            b'P' => {
                self.pending.push(b);
                self.dcs_accum.clear();
                self.state = State::DcsPassthrough;
            }
            ESC => {
                // A bare ESC aborted by another ESC: flush the first, keep
                // the second as the start of a new sequence.
                out.push(Token::Unknown(std::mem::take(&mut self.pending)));
                self.pending.push(ESC);
            }
            _ => {
                self.pending.push(b);
                self.abort(out);
            }
        }
    }

    fn advance_csi(&mut self, b: u8, out: &mut Vec<Token>) {
        match b {
            b'0'..=b'9' => {
                self.pending.push(b);
                let digit = u16::from(b - b'0');
                let value = self.cur_param.unwrap_or(0);
                self.cur_param = Some(value.saturating_mul(10).saturating_add(digit));
                self.state = State::CsiParam;
            }
            b';' => {
                self.pending.push(b);
                self.params.push(self.cur_param.take());
                self.state = State::CsiParam;
            }
            0x3C..=0x3F if self.state == State::CsiEntry => {
                self.pending.push(b);
                self.private = Some(b);
                self.state = State::CsiParam;
            }
            0x20..=0x2F => {
                self.pending.push(b);
                self.intermediate = Some(b);
                self.state = State::CsiIntermediate;
            }
            0x40..=0x7E => {
                self.pending.push(b);
                self.finish_csi(b, out);
            }
            ESC => self.restart_escape(out),
            _ => {
                self.pending.push(b);
                self.abort(out);
            }
        }
    }

    fn advance_csi_intermediate(&mut self, b: u8, out: &mut Vec<Token>) {
        match b {
            0x40..=0x7E => {
                self.pending.push(b);
                self.finish_csi(b, out);
            }
            ESC => self.restart_escape(out),
            _ => {
                self.pending.push(b);
                self.abort(out);
            }
        }
    }

    fn finish_csi(&mut self, final_byte: u8, out: &mut Vec<Token>) {
        if self.cur_param.is_some() || !self.params.is_empty() {
            self.params.push(self.cur_param.take());
        }
        out.push(Token::Csi(CsiParams {
            params: std::mem::take(&mut self.params),
            private: self.private.take(),
            intermediate: self.intermediate.take(),
            final_byte,
            raw: std::mem::take(&mut self.pending),
        }));
        self.state = State::Ground;
    }

    fn advance_osc(&mut self, b: u8, out: &mut Vec<Token>) {
        match b {
            BEL => {
                self.pending.push(b);
                self.finish_osc(out);
            }
            ESC => {
                self.pending.push(b);
                self.state = State::OscEsc;
            }
            0x20..=0x7E | 0x80..=0xFF => {
                self.pending.push(b);
                self.osc_accum.push(b);
            }
            _ => {
                self.pending.push(b);
                self.abort(out);
            }
        }
    }

    fn advance_osc_esc(&mut self, b: u8, out: &mut Vec<Token>) {
        if b == b'\\' {
            self.pending.push(b);
            self.finish_osc(out);
        } else {
            // The ESC did not start an ST terminator; it aborts the OSC and
            // may begin a fresh sequence of its own.
            self.pending.pop();
            self.restart_escape(out);
            self.advance(b, out);
        }
    }

    fn finish_osc(&mut self, out: &mut Vec<Token>) {
        out.push(Token::Osc(OscString {
            command: String::from_utf8_lossy(&self.osc_accum).into_owned(),
            raw: std::mem::take(&mut self.pending),
        }));
        self.osc_accum.clear();
        self.state = State::Ground;
    }

    fn advance_dcs(&mut self, b: u8, _out: &mut Vec<Token>) {
        self.pending.push(b);
        if b == ESC {
            self.state = State::DcsEsc;
        } else {
            self.dcs_accum.push(b);
        }
    }

    fn advance_dcs_esc(&mut self, b: u8, out: &mut Vec<Token>) {
        if b == b'\\' {
            self.pending.push(b);
            out.push(Token::Dcs(DcsPayload {
                payload: std::mem::take(&mut self.dcs_accum),
                raw: std::mem::take(&mut self.pending),
            }));
            self.state = State::Ground;
        } else {
            self.pending.pop();
            self.dcs_accum.clear();
            self.restart_escape(out);
            self.advance(b, out);
        }
    }

    /// Abort the sequence in progress: everything consumed becomes Unknown.
    fn abort(&mut self, out: &mut Vec<Token>) {
        self.osc_accum.clear();
        self.dcs_accum.clear();
        out.push(Token::Unknown(std::mem::take(&mut self.pending)));
        self.state = State::Ground;
    }

    /// An ESC aborted the sequence in progress. The consumed bytes flush as
    /// Unknown, and the ESC opens a new sequence so that a well-formed one
    /// following a truncated one still parses.
    fn restart_escape(&mut self, out: &mut Vec<Token>) {
        self.osc_accum.clear();
        self.dcs_accum.clear();
        out.push(Token::Unknown(std::mem::take(&mut self.pending)));
        self.pending.push(ESC);
        self.state = State::Escape;
    }

    fn flush_text(&mut self, out: &mut Vec<Token>) {
        if !self.text.is_empty() {
            out.push(Token::Text(std::mem::take(&mut self.text)));
        }
    }
}
