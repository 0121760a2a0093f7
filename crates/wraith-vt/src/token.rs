//! Typed tokens produced by the output-stream parser.
//!
//! Every token remembers the exact bytes it was decoded from, so a token
//! stream can always be re-serialized into the original byte stream. This is
//! what lets the pipeline forward output to the presentation side without
//! loss, no matter how the stream was chunked or how malformed it was.

/// A decoded unit of terminal output.
///
/// The concatenation of [`Token::append_raw`] over a parse run reproduces the
/// consumed input byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A run of printable text (one or more grapheme clusters).
    Text(String),
    /// A single C0 control byte (or DEL).
    Control(u8),
    /// A parameterized control sequence (`ESC [`).
    Csi(CsiParams),
    /// An operating-system command string (`ESC ]`).
    Osc(OscString),
    /// A device control string (`ESC P`), carried as an opaque payload.
    Dcs(DcsPayload),
    /// Bytes that did not form a recognizable sequence, preserved verbatim.
    Unknown(Vec<u8>),
}

impl Token {
    /// Append the raw bytes this token was decoded from.
    pub fn append_raw(&self, out: &mut Vec<u8>) {
        match self {
            Token::Text(s) => out.extend_from_slice(s.as_bytes()),
            Token::Control(b) => out.push(*b),
            Token::Csi(csi) => out.extend_from_slice(&csi.raw),
            Token::Osc(osc) => out.extend_from_slice(&osc.raw),
            Token::Dcs(dcs) => out.extend_from_slice(&dcs.raw),
            Token::Unknown(bytes) => out.extend_from_slice(bytes),
        }
    }

    /// Raw bytes of this token as an owned buffer.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.append_raw(&mut out);
        out
    }
}

/// A complete CSI sequence: `ESC [ <private?> <params> <intermediate?> <final>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiParams {
    /// `;`-separated numeric parameters. `None` marks an omitted parameter
    /// (e.g. `ESC [ ; 5 H` yields `[None, Some(5)]`).
    pub params: Vec<Option<u16>>,
    /// Private-use marker directly after `[` (`?`, `>`, `<`, or `=`).
    pub private: Option<u8>,
    /// Intermediate byte (0x20..=0x2F), if present.
    pub intermediate: Option<u8>,
    /// Final byte (0x40..=0x7E) selecting the operation.
    pub final_byte: u8,
    pub(crate) raw: Vec<u8>,
}

impl CsiParams {
    /// Numeric parameter at `index`, or `default` when omitted.
    pub fn param(&self, index: usize, default: u16) -> u16 {
        self.params.get(index).copied().flatten().unwrap_or(default)
    }

    /// The exact bytes of the sequence, including `ESC [` and the final byte.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// An OSC command string (`ESC ] ... BEL` or `ESC ] ... ESC \`).
///
/// The grid does not interpret these; they are forwarded downstream as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OscString {
    /// The command payload between the introducer and the terminator.
    pub command: String,
    pub(crate) raw: Vec<u8>,
}

impl OscString {
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// A DCS payload (`ESC P ... ESC \`), e.g. sixel graphics data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcsPayload {
    /// Payload bytes between the introducer and the terminator.
    pub payload: Vec<u8>,
    pub(crate) raw: Vec<u8>,
}

impl DcsPayload {
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_raw_roundtrip() {
        let token = Token::Text("héllo".to_string());
        assert_eq!(token.to_raw(), "héllo".as_bytes());
    }

    #[test]
    fn test_control_raw() {
        assert_eq!(Token::Control(0x0D).to_raw(), vec![0x0D]);
    }

    #[test]
    fn test_csi_param_defaults() {
        let csi = CsiParams {
            params: vec![Some(3), None],
            private: None,
            intermediate: None,
            final_byte: b'H',
            raw: b"\x1b[3;H".to_vec(),
        };
        assert_eq!(csi.param(0, 1), 3);
        assert_eq!(csi.param(1, 1), 1);
        assert_eq!(csi.param(2, 7), 7);
    }

    #[test]
    fn test_unknown_preserves_bytes() {
        let bytes = vec![0x1b, 0xFF, 0x00];
        assert_eq!(Token::Unknown(bytes.clone()).to_raw(), bytes);
    }
}
