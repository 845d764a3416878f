//! Output builder: accumulates emitted instructions and their listing.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::program::Instr;

/// Lines allowed between two `# line N` markers.
const LINE_MARKER_INTERVAL: usize = 10;

/// What an [`Emitter`] hands back on [`Emitter::take`].
#[derive(Debug, Default)]
pub struct Assembly {
    pub code: Vec<Instr>,
    pub text: Bytes,
}

/// Growable buffer for one compilation.
#[derive(Debug)]
pub struct Emitter {
    code: Vec<Instr>,
    text: BytesMut,
    lines: usize,
    marked: usize,
    line_markers: bool,
}

impl Emitter {
    pub fn new(line_markers: bool) -> Self {
        Self {
            code: Vec::new(),
            text: BytesMut::with_capacity(4096),
            lines: 0,
            marked: 0,
            line_markers,
        }
    }

    /// Append an instruction and its rendering.
    pub fn emit(&mut self, instr: Instr) {
        self.line(&instr.to_string());
        self.code.push(instr);
    }

    /// Append a line to the listing only.
    pub fn comment(&mut self, text: &str) {
        self.line(text);
    }

    /// Emit a `# line N` marker if more than ten lines were written since
    /// the previous one.
    pub fn mark_lines(&mut self) {
        if self.line_markers && self.lines > self.marked + LINE_MARKER_INTERVAL {
            let marker = format!("# line {}", self.lines);
            self.marked = self.lines;
            self.line(&marker);
        }
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Hand out everything emitted so far and reset for reuse.
    pub fn take(&mut self) -> Assembly {
        self.lines = 0;
        self.marked = 0;
        Assembly {
            code: std::mem::take(&mut self.code),
            text: self.text.split().freeze(),
        }
    }

    fn line(&mut self, text: &str) {
        self.text.put_slice(text.as_bytes());
        self.text.put_u8(b'\n');
        self.lines += 1;
    }
}

/// Quote `bytes` as a string constant of the listing.
pub fn escape_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0 => out.push_str("\\0"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::program::Label;

    #[test]
    fn escapes_special_bytes() {
        assert_eq!(escape_literal(b"ab"), "\"ab\"");
        assert_eq!(escape_literal(b"a\\b\"c"), "\"a\\\\b\\\"c\"");
        assert_eq!(escape_literal(b"\n\r\t\0"), "\"\\n\\r\\t\\0\"");
        assert_eq!(escape_literal(&[0xff, 0x01]), "\"\\xff\\x01\"");
    }

    #[test]
    fn marks_every_eleven_lines() {
        let mut emitter = Emitter::new(true);
        for _ in 0..11 {
            emitter.emit(Instr::Ret);
            emitter.mark_lines();
        }
        assert_eq!(emitter.lines(), 12);
        let text = String::from_utf8(emitter.take().text.to_vec()).unwrap();
        assert!(text.ends_with("    ret\n# line 11\n"));
        assert_eq!(text.matches("# line").count(), 1);
    }

    #[test]
    fn markers_can_be_disabled() {
        let mut emitter = Emitter::new(false);
        for _ in 0..30 {
            emitter.emit(Instr::Ret);
            emitter.mark_lines();
        }
        let text = emitter.take().text;
        assert!(!String::from_utf8_lossy(&text).contains("# line"));
    }

    #[test]
    fn take_resets_state() {
        let mut emitter = Emitter::new(true);
        emitter.emit(Instr::Goto(Label::Fail));
        let first = emitter.take();
        assert_eq!(first.code, vec![Instr::Goto(Label::Fail)]);
        assert_eq!(&first.text[..], b"    goto fail\n");

        let second = emitter.take();
        assert!(second.code.is_empty());
        assert!(second.text.is_empty());
        assert_eq!(emitter.lines(), 0);
    }
}
