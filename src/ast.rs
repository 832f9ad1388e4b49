//! ParseGraph: the parser's output arena (spec.md §3.2 "ParseGraph").
//!
//! All nodes live in two flat arenas (`Vec<ParseOp>`, `Vec<ParseEvent>`)
//! scoped to one parse; stable indices stand in for the reference
//! implementation's hand-rolled pointer arena (spec.md §9 "Parse-tree
//! ownership"). Events form a doubly-linked list via `prev`/`next` index
//! fields; operators form two orthogonal structures per spec.md §9: the
//! static per-event modulation lists (`fmod`/`pmod`/`amod`) and the
//! temporal `op_prev` chain across events.

use crate::config::ChannelMix;
use crate::ramp::Ramp;
use crate::symtab::Sym;
use crate::wave::Wave;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParseOpId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParseEventId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModKind {
    Freq,
    Phase,
    Amp,
}

/// One operator reference: either the definition of a new operator
/// (`new_op = true`, created by `O <wave>`) or an update step applied to
/// a previously labeled operator (`@name ...`).
#[derive(Debug, Clone)]
pub struct ParseOp {
    pub id: ParseOpId,
    pub new_op: bool,
    pub wave: Wave,
    pub label: Option<Sym>,
    pub ref_label: Option<Sym>,

    pub time_ms: Option<f64>,
    pub time_explicit: bool,
    pub linked: bool,
    pub silence_ms: f64,
    pub silence_added: bool,
    /// Snapshot of the running default time (ms) at the moment this
    /// operator reference was created, used by the lowering time pass when
    /// `time_ms` is unset (spec.md §4.3 "propagate the operator's time_ms
    /// as the default duration"). Mirrors how `freq`/`amp` already capture
    /// the running defaults at creation time.
    pub default_time_ms: f64,

    pub freq: Ramp,
    pub freq_is_ratio: bool,
    pub freq2: Option<Ramp>,
    pub amp: Ramp,
    pub amp2: Option<Ramp>,
    pub phase: f64,
    pub channel_mix: Option<ChannelMix>,

    pub nested: bool,
    pub multiple: bool,
    pub ignored: bool,
    pub later_used: bool,
    pub new_carrier: bool,

    pub fmod: Vec<ParseOpId>,
    pub pmod: Vec<ParseOpId>,
    pub amod: Vec<ParseOpId>,

    /// Next step in this operator's `;`-chained composite, if any.
    pub composite_next: Option<ParseOpId>,
    /// Set on a composite chain's root once the chain has been walked:
    /// the sum of every member's own `time_ms` (spec.md §4.3 "main
    /// operator's total time is the sum of composite durations"). Kept
    /// separate from `time_ms` so `time_ms` always stays each member's
    /// own per-segment duration — the value the splice-offset math in
    /// lower.rs needs — while this field feeds the root's own `OpUpdate`.
    pub chain_total_ms: Option<f64>,
    /// Previous update that touched the same logical operator (temporal
    /// chain, spec.md invariant 2).
    pub op_prev: Option<ParseOpId>,
}

impl ParseOp {
    pub fn new(id: ParseOpId, wave: Wave, new_op: bool) -> Self {
        Self {
            id,
            new_op,
            wave,
            label: None,
            ref_label: None,
            time_ms: None,
            time_explicit: false,
            linked: false,
            silence_ms: 0.0,
            silence_added: false,
            default_time_ms: 1000.0,
            freq: Ramp::constant(440.0),
            freq_is_ratio: false,
            freq2: None,
            amp: Ramp::constant(1.0),
            amp2: None,
            phase: 0.0,
            channel_mix: None,
            nested: false,
            multiple: false,
            ignored: false,
            later_used: false,
            new_carrier: false,
            fmod: Vec::new(),
            pmod: Vec::new(),
            amod: Vec::new(),
            composite_next: None,
            chain_total_ms: None,
            op_prev: None,
        }
    }

    pub fn mod_list(&self, kind: ModKind) -> &[ParseOpId] {
        match kind {
            ModKind::Freq => &self.fmod,
            ModKind::Phase => &self.pmod,
            ModKind::Amp => &self.amod,
        }
    }

    pub fn mod_list_mut(&mut self, kind: ModKind) -> &mut Vec<ParseOpId> {
        match kind {
            ModKind::Freq => &mut self.fmod,
            ModKind::Phase => &mut self.pmod,
            ModKind::Amp => &mut self.amod,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParseEvent {
    pub id: ParseEventId,
    pub wait_ms: f64,
    /// Set by `\t`: add the previous operator's duration to this wait
    /// once timing is resolved (spec.md §4.3, `ADD_WAIT_DURATION`).
    pub add_wait_duration: bool,
    pub pan: Option<Ramp>,
    /// Operators created or updated at this event, in source order.
    pub ops: Vec<ParseOpId>,
    /// Subset of `ops` that are new, non-nested carriers.
    pub carriers: Vec<ParseOpId>,
    pub group_from: Option<ParseEventId>,
    pub group_end: bool,
    pub prev: Option<ParseEventId>,
    pub next: Option<ParseEventId>,
    /// Monotonic insertion sequence, used to break ties when composite
    /// flattening must order two events at the same absolute time
    /// (spec.md §9 "Open questions", tie-break rule; see lower.rs).
    pub seq: u32,
}

impl ParseEvent {
    fn new(id: ParseEventId, seq: u32) -> Self {
        Self {
            id,
            wait_ms: 0.0,
            add_wait_duration: false,
            pan: None,
            ops: Vec::new(),
            carriers: Vec::new(),
            group_from: None,
            group_end: false,
            prev: None,
            next: None,
            seq,
        }
    }
}

#[derive(Debug, Default)]
pub struct ParseGraph {
    ops: Vec<ParseOp>,
    events: Vec<ParseEvent>,
    head: Option<ParseEventId>,
    tail: Option<ParseEventId>,
}

impl ParseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_op(&mut self, wave: Wave, new_op: bool) -> ParseOpId {
        let id = ParseOpId(self.ops.len() as u32);
        self.ops.push(ParseOp::new(id, wave, new_op));
        id
    }

    pub fn op(&self, id: ParseOpId) -> &ParseOp {
        &self.ops[id.0 as usize]
    }

    pub fn op_mut(&mut self, id: ParseOpId) -> &mut ParseOp {
        &mut self.ops[id.0 as usize]
    }

    /// Append a new event at the end of the timeline, linking it to the
    /// previous tail.
    pub fn push_event(&mut self) -> ParseEventId {
        let id = ParseEventId(self.events.len() as u32);
        let mut ev = ParseEvent::new(id, self.events.len() as u32);
        ev.prev = self.tail;
        self.events.push(ev);
        if let Some(tail) = self.tail {
            self.events[tail.0 as usize].next = Some(id);
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        id
    }

    pub fn event(&self, id: ParseEventId) -> &ParseEvent {
        &self.events[id.0 as usize]
    }

    pub fn event_mut(&mut self, id: ParseEventId) -> &mut ParseEvent {
        &mut self.events[id.0 as usize]
    }

    pub fn head(&self) -> Option<ParseEventId> {
        self.head
    }

    pub fn tail(&self) -> Option<ParseEventId> {
        self.tail
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Walk events from first to last in timeline order.
    pub fn events_in_order(&self) -> Vec<ParseEventId> {
        let mut out = Vec::with_capacity(self.events.len());
        let mut cur = self.head;
        while let Some(id) = cur {
            out.push(id);
            cur = self.events[id.0 as usize].next;
        }
        out
    }
}
