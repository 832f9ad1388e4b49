//! Byte-stream scanner collaborator (spec.md §4.1).
//!
//! The scanner is deliberately dumb about the language: it hands the
//! parser bytes, identifiers, and numeric literals, and tracks line/column
//! for diagnostics. It knows about exactly two lexical special cases that
//! aren't delegated to the parser: `#!` line comments and `#Q` end-of-input.

use crate::diagnostics::DiagnosticSink;
use crate::symtab::{Sym, SymTab};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitespaceMode {
    /// Skip runs of spaces/tabs/newlines transparently (top-level parsing).
    Skip,
    /// Don't auto-skip; the caller advances explicitly (inside literals).
    None,
}

pub struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    /// One-byte pushback buffer, as `ungetc` only needs to undo the last `getc`.
    ungot: Option<(u8, usize, u32, u32)>,
    line: u32,
    col: u32,
    ws_mode: WhitespaceMode,
    /// Set once a top-level `#Q` is seen; the parser checks this to stop.
    quit: bool,
    /// Bumped every time a `\n` byte is physically consumed. The parser
    /// compares this before/after a `skip_ws()` to detect a line break
    /// crossing — `Skip` mode otherwise swallows `\n` as ordinary
    /// whitespace, giving the TOP scope no way to tell lines apart.
    newlines_seen: u32,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            ungot: None,
            line: 1,
            col: 1,
            ws_mode: WhitespaceMode::Skip,
            quit: false,
            newlines_seen: 0,
        }
    }

    pub fn set_whitespace_mode(&mut self, mode: WhitespaceMode) {
        self.ws_mode = mode;
    }

    /// Count of `\n` bytes consumed so far. Monotonic; used only via
    /// before/after comparison, so `ungetc`'s bookkeeping doesn't need to
    /// undo it.
    pub fn newlines_seen(&self) -> u32 {
        self.newlines_seen
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn col(&self) -> u32 {
        self.col
    }

    pub fn at_quit(&self) -> bool {
        self.quit
    }

    pub fn at_eof(&self) -> bool {
        self.quit || self.pos >= self.src.len()
    }

    fn raw_next(&mut self) -> Option<u8> {
        if self.pos >= self.src.len() {
            return None;
        }
        let c = self.src[self.pos];
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
            self.newlines_seen += 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    /// Read the next byte, transparently consuming `#!` comments, `#Q`
    /// end-of-input, and (in `Skip` mode) runs of whitespace.
    pub fn getc(&mut self) -> Option<u8> {
        if self.quit {
            return None;
        }
        if let Some((c, pos, line, col)) = self.ungot.take() {
            // Re-deliver the byte exactly as it was unread; position
            // bookkeeping already reflects having consumed it.
            self.pos = pos;
            self.line = line;
            self.col = col;
            return Some(c);
        }
        loop {
            let save = (self.pos, self.line, self.col);
            let c = self.raw_next()?;
            if c == b'#' {
                let next = self.peek_raw();
                match next {
                    Some(b'!') => {
                        self.raw_next();
                        self.skip_line();
                        continue;
                    }
                    Some(b'Q') => {
                        self.raw_next();
                        self.quit = true;
                        return None;
                    }
                    _ => return Some(c),
                }
            }
            if self.ws_mode == WhitespaceMode::Skip && c.is_ascii_whitespace() {
                continue;
            }
            let _ = save;
            return Some(c);
        }
    }

    fn peek_raw(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.raw_next() {
            if c == b'\n' {
                break;
            }
        }
    }

    /// Push back the last byte returned by `getc`. Only one level of
    /// pushback is supported, matching the reference scanner contract.
    pub fn ungetc(&mut self) {
        if self.pos == 0 {
            return;
        }
        // Reconstruct the byte and position just before the last getc().
        let prev_pos = self.pos - 1;
        let c = self.src[prev_pos];
        let (line, col) = if c == b'\n' {
            (self.line - 1, self.col)
        } else {
            (self.line, self.col - 1)
        };
        self.ungot = Some((c, self.pos, line, col));
        self.pos = prev_pos;
        self.line = line;
        self.col = col;
    }

    /// Consume the next byte iff it equals `c`.
    pub fn tryc(&mut self, c: u8) -> bool {
        match self.getc() {
            Some(got) if got == c => true,
            Some(_) => {
                self.ungetc();
                false
            }
            None => false,
        }
    }

    pub fn peekc(&mut self) -> Option<u8> {
        match self.getc() {
            Some(c) => {
                self.ungetc();
                Some(c)
            }
            None => None,
        }
    }

    /// Peek the very next raw byte without skipping whitespace, comments,
    /// or `#Q`. Used inside `get_symstr`/`getd` so a run of whitespace
    /// correctly ends a token instead of being transparently skipped and
    /// fusing it with whatever follows.
    pub fn peek_immediate(&self) -> Option<u8> {
        if let Some((c, ..)) = self.ungot {
            return Some(c);
        }
        self.src.get(self.pos).copied()
    }

    /// Read `[A-Za-z_][A-Za-z0-9_]*` and intern it.
    pub fn get_symstr(&mut self, syms: &mut SymTab) -> Option<Sym> {
        let first = self.peekc()?;
        if !(first.is_ascii_alphabetic() || first == b'_') {
            return None;
        }
        let mut buf = String::new();
        while let Some(c) = self.peek_immediate() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                buf.push(c as char);
                self.getc();
            } else {
                break;
            }
        }
        Some(syms.intern(&buf))
    }

    /// Read a raw numeric literal: `[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?`.
    /// Returns `None` (not-set) if the next byte isn't a digit or `.`.
    pub fn getd(&mut self) -> Option<f64> {
        let mut buf = String::new();
        let mut saw_digit = false;
        while let Some(c) = self.peek_immediate() {
            if c.is_ascii_digit() {
                saw_digit = true;
                buf.push(c as char);
                self.getc();
            } else {
                break;
            }
        }
        if self.peek_immediate() == Some(b'.') {
            buf.push('.');
            self.getc();
            while let Some(c) = self.peek_immediate() {
                if c.is_ascii_digit() {
                    saw_digit = true;
                    buf.push(c as char);
                    self.getc();
                } else {
                    break;
                }
            }
        }
        if !saw_digit {
            return None;
        }
        if matches!(self.peek_immediate(), Some(b'e') | Some(b'E')) {
            let mut exp = String::new();
            exp.push(self.getc().unwrap() as char);
            if matches!(self.peek_immediate(), Some(b'+') | Some(b'-')) {
                exp.push(self.getc().unwrap() as char);
            }
            let mut has_exp_digit = false;
            while let Some(c) = self.peek_immediate() {
                if c.is_ascii_digit() {
                    has_exp_digit = true;
                    exp.push(c as char);
                    self.getc();
                } else {
                    break;
                }
            }
            if has_exp_digit {
                buf.push_str(&exp);
            }
        }
        buf.parse::<f64>().ok()
    }

    pub fn warning(&self, sink: &mut DiagnosticSink, message: impl Into<String>) {
        sink.warn(self.line, self.col, message);
    }

    pub fn error(&self, sink: &mut DiagnosticSink, message: impl Into<String>) {
        sink.error(self.line, self.col, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_line_comments() {
        let mut sc = Scanner::new("a #! comment\nb");
        assert_eq!(sc.getc(), Some(b'a'));
        assert_eq!(sc.getc(), Some(b'b'));
    }

    #[test]
    fn hash_q_terminates_input() {
        let mut sc = Scanner::new("a #Q b");
        assert_eq!(sc.getc(), Some(b'a'));
        assert_eq!(sc.getc(), None);
        assert!(sc.at_quit());
    }

    #[test]
    fn ungetc_replays_last_byte() {
        let mut sc = Scanner::new("xy");
        assert_eq!(sc.getc(), Some(b'x'));
        sc.ungetc();
        assert_eq!(sc.getc(), Some(b'x'));
        assert_eq!(sc.getc(), Some(b'y'));
    }

    #[test]
    fn tryc_consumes_iff_match() {
        let mut sc = Scanner::new("[x");
        assert!(sc.tryc(b'['));
        assert!(!sc.tryc(b']'));
        assert_eq!(sc.getc(), Some(b'x'));
    }

    #[test]
    fn get_symstr_reads_identifier() {
        let mut sc = Scanner::new("kick2 rest");
        let mut syms = SymTab::new();
        let s = sc.get_symstr(&mut syms).unwrap();
        assert_eq!(syms.resolve(s), "kick2");
    }

    #[test]
    fn getd_reads_float_literal() {
        let mut sc = Scanner::new("3.25e1x");
        assert_eq!(sc.getd(), Some(32.5));
        assert_eq!(sc.getc(), Some(b'x'));
    }

    #[test]
    fn getd_not_set_when_no_digit() {
        let mut sc = Scanner::new("abc");
        assert_eq!(sc.getd(), None);
    }
}
