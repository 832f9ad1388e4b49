//! Recursive-descent parser (spec.md §4.2).
//!
//! Builds a [`ParseGraph`] from source text. Syntax errors are reported
//! as warnings and the offending construct is skipped — the parser never
//! aborts on bad input; only [`ScriptLowering`](crate::lower) can fail a
//! build. Scopes nest as TOP/BLOCK/BIND/NEST per spec.md's "Scope model";
//! BLOCK is modeled as transparent grouping (document in DESIGN.md): its
//! operators and waits extend the same flat event timeline as top level,
//! since sequencing — not nested timelines — is what the grammar's
//! `event_seq` recursion is actually encoding.

use std::collections::HashMap;

use crate::ast::{ModKind, ParseEventId, ParseGraph, ParseOpId};
use crate::config::{ChannelMix, Defaults};
use crate::diagnostics::DiagnosticSink;
use crate::notes::{parse_note_syntax, resolve_note_freq};
use crate::ramp::{Ramp, RampShape};
use crate::scanner::Scanner;
use crate::symtab::{Sym, SymTab};
use crate::wave::Wave;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Top,
    Block,
    Bind,
    Nest,
}

struct ScopeFrame {
    kind: ScopeKind,
    /// For `Nest` scopes: which modulation list newly defined operators
    /// join, and which operator they modulate.
    list_kind: Option<ModKind>,
    parent_op: Option<ParseOpId>,
    collected: Vec<ParseOpId>,
    group_from: ParseEventId,
}

pub struct Parser<'a> {
    sc: Scanner<'a>,
    syms: &'a mut SymTab,
    diags: &'a mut DiagnosticSink,
    graph: ParseGraph,
    defaults: Defaults,
    /// Label -> operator bound by `'name` (for subsequent `@name` lookups).
    labels: HashMap<Sym, ParseOpId>,
    /// Label -> most recent update/definition, for temporal chaining.
    newest: HashMap<Sym, ParseOpId>,
    current_event: ParseEventId,
    pending_label: Option<Sym>,
    scopes: Vec<ScopeFrame>,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, syms: &'a mut SymTab, diags: &'a mut DiagnosticSink) -> Self {
        let mut graph = ParseGraph::new();
        let first = graph.push_event();
        Parser {
            sc: Scanner::new(src),
            syms,
            diags,
            graph,
            defaults: Defaults::default(),
            labels: HashMap::new(),
            newest: HashMap::new(),
            current_event: first,
            pending_label: None,
            scopes: vec![ScopeFrame {
                kind: ScopeKind::Top,
                list_kind: None,
                parent_op: None,
                collected: Vec::new(),
                group_from: first,
            }],
        }
    }

    pub fn defaults(&self) -> Defaults {
        self.defaults
    }

    /// Parse the whole script, returning the built graph. Never fails —
    /// syntax errors become warnings in the diagnostic sink.
    pub fn parse(mut self) -> (ParseGraph, Defaults) {
        loop {
            let newlines_before = self.sc.newlines_seen();
            self.skip_ws();
            if self.sc.at_eof() {
                break;
            }
            if self.sc.newlines_seen() != newlines_before
                && !self.graph.event(self.current_event).ops.is_empty()
            {
                // A line break at TOP scope starts a new statement: don't
                // let the next operator attach to the event the previous
                // line built (spec.md's `event_seq` is line-delimited at
                // top level, unlike the transparent grouping inside `[...]`).
                self.start_new_event(0.0, false);
            }
            let Some(c) = self.sc.peekc() else { break };
            if c == b'S' {
                self.sc.getc();
                self.parse_settings();
                continue;
            }
            if !self.parse_event_item() {
                // Unknown construct: consume one byte so we make progress
                // and warn (spec.md: unknown-character is a non-fatal
                // warning).
                let c = self.sc.getc();
                if let Some(c) = c {
                    self.sc.warning(
                        self.diags,
                        format!("unexpected character '{}', ignoring", c as char),
                    );
                } else {
                    break;
                }
            }
        }
        self.finalize_current_event();
        (self.graph, self.defaults)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.sc.peekc() {
            if c.is_ascii_whitespace() {
                self.sc.getc();
            } else {
                break;
            }
        }
    }

    // ---- settings ----------------------------------------------------

    fn parse_settings(&mut self) {
        loop {
            self.skip_ws();
            match self.sc.peekc() {
                Some(b'a') => {
                    self.sc.getc();
                    if let Some(v) = self.parse_num_expr() {
                        self.defaults.amp_mul = v;
                    }
                }
                Some(b'c') => {
                    self.sc.getc();
                    if let Some(cm) = self.parse_chanmix_letter() {
                        self.defaults.chanmix = cm;
                    }
                }
                Some(b'f') => {
                    self.sc.getc();
                    if let Some(v) = self.parse_freq_value() {
                        self.defaults.freq = v;
                    }
                }
                Some(b'n') => {
                    self.sc.getc();
                    if let Some(v) = self.parse_num_expr() {
                        self.defaults.tuning.a4_freq = v;
                    }
                }
                Some(b'r') => {
                    self.sc.getc();
                    if let Some(v) = self.parse_num_expr() {
                        self.defaults.rel_freq = v;
                    }
                }
                Some(b't') => {
                    self.sc.getc();
                    if let Some(v) = self.parse_time_seconds() {
                        self.defaults.time_ms = v * 1000.0;
                    }
                }
                _ => break,
            }
        }
    }

    fn parse_chanmix_letter(&mut self) -> Option<ChannelMix> {
        match self.sc.getc() {
            Some(b'l') => Some(ChannelMix::Left),
            Some(b'c') => Some(ChannelMix::Center),
            Some(b'r') => Some(ChannelMix::Right),
            Some(_) => {
                self.sc.ungetc();
                self.sc.warning(self.diags, "expected l/c/r after 'c'");
                None
            }
            None => None,
        }
    }

    // ---- event_seq items ----------------------------------------------

    /// Parse one `event_seq` item (wait, label def/ref, operator, block,
    /// bind, group terminator). Returns `false` if the next token doesn't
    /// start any of those (caller treats it as an unrecognized byte).
    fn parse_event_item(&mut self) -> bool {
        self.skip_ws();
        let Some(c) = self.sc.peekc() else { return false };
        match c {
            b'\\' => {
                self.sc.getc();
                self.parse_wait();
                true
            }
            b'|' => {
                self.sc.getc();
                self.close_group();
                true
            }
            b'\'' => {
                self.sc.getc();
                self.parse_label_def();
                true
            }
            b'@' => {
                self.sc.getc();
                if self.sc.tryc(b'[') {
                    self.parse_bind_scope();
                } else {
                    self.parse_label_ref();
                }
                true
            }
            b'O' => {
                self.sc.getc();
                self.parse_operator_def();
                true
            }
            b'[' => {
                self.sc.getc();
                self.parse_block_scope();
                true
            }
            _ => false,
        }
    }

    fn parse_wait(&mut self) {
        if self.sc.tryc(b't') {
            self.start_new_event(0.0, true);
            return;
        }
        let secs = self.parse_time_seconds().unwrap_or(0.0);
        self.start_new_event(secs * 1000.0, false);
    }

    fn start_new_event(&mut self, wait_ms: f64, add_wait_duration: bool) {
        if self.graph.event(self.current_event).ops.is_empty()
            && !self.graph.event(self.current_event).add_wait_duration
        {
            let ev = self.graph.event_mut(self.current_event);
            ev.wait_ms += wait_ms;
            ev.add_wait_duration = ev.add_wait_duration || add_wait_duration;
            return;
        }
        let id = self.graph.push_event();
        {
            let ev = self.graph.event_mut(id);
            ev.wait_ms = wait_ms;
            ev.add_wait_duration = add_wait_duration;
        }
        self.current_event = id;
    }

    fn finalize_current_event(&mut self) {
        // No-op placeholder: the event is always live in the graph once
        // pushed; this exists so future passes have one hook to flush
        // any end-of-script bookkeeping.
    }

    fn close_group(&mut self) {
        let frame = self.scopes.last().unwrap();
        let group_from = frame.group_from;
        {
            let ev = self.graph.event_mut(self.current_event);
            ev.group_end = true;
            ev.group_from = Some(group_from);
        }
        let id = self.graph.push_event();
        self.current_event = id;
        self.scopes.last_mut().unwrap().group_from = id;
    }

    fn parse_label_def(&mut self) {
        let Some(sym) = self.sc.get_symstr(self.syms) else {
            self.sc.warning(self.diags, "expected a name after '\''");
            return;
        };
        self.pending_label = Some(sym);
    }

    fn parse_label_ref(&mut self) {
        let Some(sym) = self.sc.get_symstr(self.syms) else {
            self.sc.warning(self.diags, "expected a name after '@'");
            return;
        };
        let Some(&target) = self.labels.get(&sym) else {
            self.sc.warning(
                self.diags,
                format!("reference to undefined label '{}'", self.syms.resolve(sym)),
            );
            // Parse (and discard) any following steps so the grammar
            // stays in sync, attached to a throwaway node.
            let wave = Wave::Sin;
            let dummy = self.graph.alloc_op(wave, false);
            self.parse_op_steps(dummy);
            return;
        };
        let wave = self.graph.op(target).wave;
        let target_nested = self.graph.op(target).nested;
        let op_id = self.graph.alloc_op(wave, false);
        let op_prev = self.newest.get(&sym).copied();
        {
            let op = self.graph.op_mut(op_id);
            op.ref_label = Some(sym);
            op.nested = target_nested;
            op.op_prev = op_prev;
            op.default_time_ms = self.defaults.time_ms;
        }
        self.newest.insert(sym, op_id);
        if let Some(prev) = self.graph.op(op_id).op_prev {
            self.graph.op_mut(prev).later_used = true;
        }
        self.attach_op_to_scope(op_id);
        self.parse_op_steps(op_id);
    }

    fn parse_bind_scope(&mut self) {
        let group_from = self.scopes.last().unwrap().group_from;
        self.scopes.push(ScopeFrame {
            kind: ScopeKind::Bind,
            list_kind: None,
            parent_op: None,
            collected: Vec::new(),
            group_from,
        });
        self.parse_scope_body();
        let frame = self.scopes.pop().unwrap();
        if !frame.collected.is_empty() {
            self.sc.warning(
                self.diags,
                "operators bound with @[...] are excluded from playback",
            );
        }
        for op in frame.collected {
            let op = self.graph.op_mut(op);
            op.multiple = true;
            op.ignored = true;
        }
    }

    fn parse_block_scope(&mut self) {
        let group_from = self.scopes.last().unwrap().group_from;
        self.scopes.push(ScopeFrame {
            kind: ScopeKind::Block,
            list_kind: None,
            parent_op: None,
            collected: Vec::new(),
            group_from,
        });
        self.parse_scope_body();
        self.scopes.pop();
    }

    fn parse_scope_body(&mut self) {
        loop {
            self.skip_ws();
            match self.sc.peekc() {
                Some(b']') => {
                    self.sc.getc();
                    return;
                }
                None => {
                    self.sc.warning(self.diags, "unclosed '['");
                    return;
                }
                _ => {
                    if !self.parse_event_item() {
                        let c = self.sc.getc();
                        if let Some(c) = c {
                            self.sc.warning(
                                self.diags,
                                format!("unexpected character '{}' in scope", c as char),
                            );
                        } else {
                            self.sc.warning(self.diags, "unclosed '['");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn attach_op_to_scope(&mut self, op_id: ParseOpId) {
        let frame = self.scopes.last_mut().unwrap();
        match frame.kind {
            ScopeKind::Nest => {
                frame.collected.push(op_id);
                self.graph.op_mut(op_id).nested = true;
            }
            ScopeKind::Bind => {
                frame.collected.push(op_id);
                self.graph.event_mut(self.current_event).ops.push(op_id);
            }
            ScopeKind::Top | ScopeKind::Block => {
                self.graph.event_mut(self.current_event).ops.push(op_id);
            }
        }
    }

    // ---- operators -----------------------------------------------------

    fn parse_operator_def(&mut self) {
        let Some(wave_sym) = self.sc.get_symstr(self.syms) else {
            self.sc.warning(self.diags, "expected a wave name after 'O'");
            return;
        };
        let name = self.syms.resolve(wave_sym).to_string();
        let Some(wave) = Wave::from_name(&name) else {
            self.sc.warning(self.diags, format!("unknown wave type '{name}'"));
            return;
        };
        let op_id = self.graph.alloc_op(wave, true);
        {
            let op = self.graph.op_mut(op_id);
            op.freq = Ramp::constant(self.defaults.freq);
            op.amp = Ramp::constant(self.defaults.amp_mul);
            op.channel_mix = Some(self.defaults.chanmix);
            op.default_time_ms = self.defaults.time_ms;
        }
        if let Some(label) = self.pending_label.take() {
            self.graph.op_mut(op_id).label = Some(label);
            self.labels.insert(label, op_id);
            self.newest.insert(label, op_id);
        }
        self.attach_op_to_scope(op_id);
        self.parse_op_steps(op_id);
    }

    /// Parse the `step*` tail following an operator definition or update,
    /// including `;`-chained composites.
    fn parse_op_steps(&mut self, op_id: ParseOpId) {
        let mut cur = op_id;
        loop {
            self.skip_ws();
            let Some(c) = self.sc.peekc() else { return };
            match c {
                b'a' => {
                    self.sc.getc();
                    self.parse_amp_step(cur);
                }
                b'f' => {
                    self.sc.getc();
                    self.parse_freq_step(cur, false);
                }
                b'r' => {
                    self.sc.getc();
                    self.parse_freq_step(cur, true);
                }
                b'p' => {
                    self.sc.getc();
                    self.parse_phase_step(cur);
                }
                b's' => {
                    self.sc.getc();
                    if let Some(v) = self.parse_time_seconds() {
                        self.graph.op_mut(cur).silence_ms = v * 1000.0;
                    }
                }
                b't' => {
                    self.sc.getc();
                    self.parse_time_step(cur);
                }
                b'w' => {
                    self.sc.getc();
                    if let Some(sym) = self.sc.get_symstr(self.syms) {
                        let name = self.syms.resolve(sym).to_string();
                        match Wave::from_name(&name) {
                            Some(w) => self.graph.op_mut(cur).wave = w,
                            None => self
                                .sc
                                .warning(self.diags, format!("unknown wave type '{name}'")),
                        }
                    }
                }
                b'c' => {
                    self.sc.getc();
                    if let Some(cm) = self.parse_chanmix_letter() {
                        self.graph.op_mut(cur).channel_mix = Some(cm);
                    }
                }
                b';' => {
                    self.sc.getc();
                    let wave = self.graph.op(cur).wave;
                    let next = self.graph.alloc_op(wave, false);
                    self.graph.op_mut(cur).composite_next = Some(next);
                    cur = next;
                }
                _ => return,
            }
        }
    }

    fn parse_amp_step(&mut self, op_id: ParseOpId) {
        let Some(ramp) = self.parse_ramp(false, false) else { return };
        self.graph.op_mut(op_id).amp = ramp;
        if self.sc.tryc(b',') {
            if let Some(r2) = self.parse_ramp(false, false) {
                self.graph.op_mut(op_id).amp2 = Some(r2);
            }
        }
        self.maybe_parse_modulators(op_id, ModKind::Amp, b'~');
    }

    fn parse_freq_step(&mut self, op_id: ParseOpId, is_ratio: bool) {
        let Some(ramp) = self.parse_ramp(is_ratio, !is_ratio) else { return };
        {
            let op = self.graph.op_mut(op_id);
            op.freq = ramp;
            op.freq_is_ratio = is_ratio;
        }
        if self.sc.tryc(b',') {
            if let Some(r2) = self.parse_ramp(is_ratio, !is_ratio) {
                self.graph.op_mut(op_id).freq2 = Some(r2);
            }
        }
        self.maybe_parse_modulators(op_id, ModKind::Freq, b'~');
    }

    fn parse_phase_step(&mut self, op_id: ParseOpId) {
        if let Some(v) = self.parse_num_expr() {
            self.graph.op_mut(op_id).phase = v.rem_euclid(1.0);
        }
        self.maybe_parse_modulators(op_id, ModKind::Phase, b'+');
    }

    fn parse_time_step(&mut self, op_id: ParseOpId) {
        if self.sc.tryc(b'*') {
            let op = self.graph.op_mut(op_id);
            op.time_explicit = false;
            op.time_ms = None;
            return;
        }
        if self.sc.tryc(b'i') {
            let nested = self.graph.op(op_id).nested;
            if !nested {
                self.sc
                    .warning(self.diags, "'ti' on a non-nested operator is ignored");
                return;
            }
            let op = self.graph.op_mut(op_id);
            op.time_explicit = true;
            op.linked = true;
            return;
        }
        let Some(v) = self.parse_time_seconds() else {
            return;
        };
        if v < 0.0 {
            self.sc
                .warning(self.diags, "negative time value discarded");
            return;
        }
        let op = self.graph.op_mut(op_id);
        op.time_ms = Some(v * 1000.0);
        op.time_explicit = true;
    }

    /// `~[ ... ]` (after a/f/r) or `+[ ... ]` (after p): a NEST scope
    /// adding modulators to `op_id`'s fmod/amod/pmod list.
    fn maybe_parse_modulators(&mut self, op_id: ParseOpId, kind: ModKind, opener: u8) {
        self.skip_ws();
        if self.sc.peekc() != Some(opener) {
            return;
        }
        self.sc.getc();
        if !self.sc.tryc(b'[') {
            self.sc.warning(self.diags, "expected '[' to open modulator list");
            return;
        }
        self.scopes.push(ScopeFrame {
            kind: ScopeKind::Nest,
            list_kind: Some(kind),
            parent_op: Some(op_id),
            collected: Vec::new(),
            group_from: self.current_event,
        });
        self.parse_scope_body();
        let frame = self.scopes.pop().unwrap();
        let list = self.graph.op_mut(op_id).mod_list_mut(kind);
        list.extend(frame.collected);
    }

    // ---- ramps and numeric expressions ---------------------------------

    fn parse_ramp(&mut self, is_ratio: bool, allow_note: bool) -> Option<Ramp> {
        self.skip_ws();
        if self.sc.tryc(b'{') {
            let mut ramp = Ramp::constant(0.0);
            let mut has_v0 = false;
            loop {
                self.skip_ws();
                match self.sc.getc() {
                    Some(b'}') => break,
                    Some(b'v') => {
                        if let Some(v) = self.parse_scalar(allow_note) {
                            if has_v0 {
                                ramp.vt = Some(v);
                            } else {
                                ramp.v0 = v;
                                has_v0 = true;
                            }
                        }
                    }
                    Some(b't') => {
                        if let Some(v) = self.parse_time_seconds() {
                            ramp.time_ms = Some(v * 1000.0);
                            ramp.time_explicit = true;
                        }
                    }
                    Some(b'c') => {
                        ramp.shape = match self.sc.getc() {
                            Some(b'l') => RampShape::Linear,
                            Some(b'e') => RampShape::Exponential,
                            Some(b'g') => RampShape::Logarithmic,
                            Some(b's') => RampShape::State,
                            _ => RampShape::Linear,
                        };
                    }
                    Some(_) => {}
                    None => {
                        self.sc.warning(self.diags, "unclosed '{' in ramp");
                        break;
                    }
                }
            }
            ramp.v0_ratio = is_ratio;
            ramp.vt_ratio = is_ratio;
            return Some(ramp);
        }
        let v = self.parse_scalar(allow_note)?;
        let mut ramp = Ramp::constant(v);
        ramp.v0_ratio = is_ratio;
        Some(ramp)
    }

    fn parse_time_seconds(&mut self) -> Option<f64> {
        self.parse_num_expr()
    }

    /// `f` step value: either a bare number (Hz) or a note literal.
    fn parse_freq_value(&mut self) -> Option<f64> {
        self.parse_scalar(true)
    }

    /// A ramp endpoint value: a numeric expression, or (when `allow_note`)
    /// a note literal resolved against the current tuning.
    fn parse_scalar(&mut self, allow_note: bool) -> Option<f64> {
        self.skip_ws();
        if let Some(v) = self.peek_num_expr() {
            return Some(v);
        }
        if allow_note {
            return self.parse_note_value();
        }
        None
    }

    fn parse_note_value(&mut self) -> Option<f64> {
        // Leading whitespace is skipped once via peekc(); the continuation
        // check must use peek_immediate() so an adjacent step's leading
        // letter isn't swallowed into this token across a space.
        self.sc.peekc();
        let mut buf = String::new();
        while let Some(c) = self.sc.peek_immediate() {
            if c.is_ascii_alphanumeric() {
                buf.push(c as char);
                self.sc.getc();
            } else {
                break;
            }
        }
        let note = parse_note_syntax(&buf)?;
        Some(resolve_note_freq(
            &note,
            &self.defaults.tuning,
            self.diags,
            self.sc.line(),
            self.sc.col(),
        ))
    }

    fn peek_num_expr(&mut self) -> Option<f64> {
        match self.sc.peekc() {
            Some(c) if c.is_ascii_digit() || c == b'.' || c == b'-' || c == b'+' || c == b'(' => {
                self.parse_num_expr()
            }
            _ => None,
        }
    }

    /// Precedence-climbing numeric expression: SUB < ADT < MLT < POW < NUM.
    /// Infinite results are discarded with a warning; NaN yields `None`
    /// ("not set"), matching spec.md exactly.
    fn parse_num_expr(&mut self) -> Option<f64> {
        let v = self.parse_add()?;
        if v.is_infinite() {
            self.sc
                .warning(self.diags, "discarding expression with infinite number");
            return None;
        }
        if v.is_nan() {
            return None;
        }
        Some(v)
    }

    fn parse_add(&mut self) -> Option<f64> {
        let mut v = self.parse_mul()?;
        loop {
            self.skip_ws();
            match self.sc.peekc() {
                Some(b'+') => {
                    self.sc.getc();
                    v += self.parse_mul()?;
                }
                Some(b'-') => {
                    self.sc.getc();
                    v -= self.parse_mul()?;
                }
                _ => break,
            }
        }
        Some(v)
    }

    fn parse_mul(&mut self) -> Option<f64> {
        let mut v = self.parse_pow()?;
        loop {
            self.skip_ws();
            match self.sc.peekc() {
                Some(b'*') => {
                    self.sc.getc();
                    v *= self.parse_pow()?;
                }
                Some(b'/') => {
                    self.sc.getc();
                    v /= self.parse_pow()?;
                }
                _ => break,
            }
        }
        Some(v)
    }

    fn parse_pow(&mut self) -> Option<f64> {
        let base = self.parse_atom()?;
        self.skip_ws();
        if self.sc.tryc(b'^') {
            let exp = self.parse_pow()?;
            return Some(base.powf(exp));
        }
        Some(base)
    }

    fn parse_atom(&mut self) -> Option<f64> {
        self.skip_ws();
        let mut sign = 1.0;
        while let Some(c) = self.sc.peekc() {
            match c {
                b'-' => {
                    sign = -sign;
                    self.sc.getc();
                    self.skip_ws();
                }
                b'+' => {
                    self.sc.getc();
                    self.skip_ws();
                }
                _ => break,
            }
        }
        if self.sc.tryc(b'(') {
            let v = self.parse_add()?;
            self.skip_ws();
            if !self.sc.tryc(b')') {
                self.sc.warning(self.diags, "unclosed '(' in expression");
            }
            return Some(sign * v);
        }
        let v = self.sc.getd()?;
        Some(sign * v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (ParseGraph, DiagnosticSink) {
        let mut syms = SymTab::new();
        let mut diags = DiagnosticSink::new();
        let graph = {
            let p = Parser::new(src, &mut syms, &mut diags);
            p.parse().0
        };
        (graph, diags)
    }

    #[test]
    fn parses_single_sine_operator() {
        let (graph, _diags) = parse("Osin t0.5 f440");
        assert_eq!(graph.op_count(), 1);
        let op = graph.op(graph.event(graph.head().unwrap()).ops[0]);
        assert_eq!(op.wave, Wave::Sin);
        assert_eq!(op.time_ms, Some(500.0));
        assert_eq!(op.freq.v0, 440.0);
    }

    #[test]
    fn composite_chain_links_via_semicolon() {
        let (graph, _diags) = parse("Osin f440 t0.1; t0.1 f880; t0.1 f1320");
        let main = graph.op(graph.event(graph.head().unwrap()).ops[0]);
        let second = main.composite_next.expect("composite chain");
        let second_op = graph.op(second);
        assert_eq!(second_op.freq.v0, 880.0);
        let third = second_op.composite_next.expect("composite chain 2");
        assert_eq!(graph.op(third).freq.v0, 1320.0);
    }

    #[test]
    fn wait_splits_events() {
        let (graph, _diags) = parse("Osin f200 t0.5 \\0.5 Osin f400 t0.5");
        let events = graph.events_in_order();
        assert_eq!(events.len(), 2);
        assert_eq!(graph.event(events[1]).wait_ms, 500.0);
    }

    #[test]
    fn line_break_at_top_scope_starts_a_new_event() {
        let (graph, _diags) = parse("Osin f440 t0.5\nOsin f880 t0.5");
        let events = graph.events_in_order();
        assert_eq!(events.len(), 2);
        assert_eq!(graph.event(events[0]).ops.len(), 1);
        assert_eq!(graph.event(events[1]).ops.len(), 1);
        assert_eq!(graph.event(events[1]).wait_ms, 0.0);
    }

    #[test]
    fn blank_lines_between_statements_dont_create_empty_events() {
        let (graph, _diags) = parse("Osin f440 t0.5\n\n\nOsin f880 t0.5");
        let events = graph.events_in_order();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn wait_for_previous_sets_deferred_flag() {
        let (graph, _diags) = parse("Osin f200 t0.5 \\t Osin f400 t0.5");
        let events = graph.events_in_order();
        assert_eq!(events.len(), 2);
        assert!(graph.event(events[1]).add_wait_duration);
    }

    #[test]
    fn fm_nest_builds_modulator_list() {
        let (graph, _diags) = parse("Osin f137 t1 p+[Osin f32 p+[Osin f42]]");
        let carrier = graph.op(graph.event(graph.head().unwrap()).ops[0]);
        assert_eq!(carrier.pmod.len(), 1);
        let modulator = graph.op(carrier.pmod[0]);
        assert!(modulator.nested);
        assert_eq!(modulator.pmod.len(), 1);
    }

    #[test]
    fn undefined_label_reference_warns() {
        let (_graph, diags) = parse("@missing f440");
        assert!(diags.iter().any(|d| d.message.contains("undefined label")));
    }

    #[test]
    fn label_binds_to_next_operator() {
        let (graph, _diags) = parse("'lead Osin f440 @lead f880");
        let events = graph.events_in_order();
        assert_eq!(events.len(), 1);
        assert_eq!(graph.event(events[0]).ops.len(), 2);
        let update = graph.op(graph.event(events[0]).ops[1]);
        assert_eq!(update.freq.v0, 880.0);
    }

    #[test]
    fn group_terminator_marks_group_end() {
        let (graph, _diags) = parse("Osin t1 | Osin t0.5 |");
        let events = graph.events_in_order();
        assert!(graph.event(events[0]).group_end);
        assert!(graph.event(events[1]).group_end);
    }

    #[test]
    fn note_literal_resolves_to_frequency() {
        let (graph, _diags) = parse("Osin fA4");
        let op = graph.op(graph.event(graph.head().unwrap()).ops[0]);
        assert!((op.freq.v0 - 440.0).abs() < 1e-6);
    }

    #[test]
    fn infinite_expression_is_discarded_with_warning() {
        let (graph, diags) = parse("Osin f(1/0)");
        let op = graph.op(graph.event(graph.head().unwrap()).ops[0]);
        // Discarded: freq keeps the default value (not overwritten).
        assert_eq!(op.freq.v0, 440.0);
        assert!(diags.iter().any(|d| d.message.contains("infinite")));
    }
}
