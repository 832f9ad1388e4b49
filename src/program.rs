//! Linear Program form (spec.md §4.4).
//!
//! The Program is the immutable, time-ordered artifact `ScriptLowering`
//! hands to the `Generator`. Events carry absolute-relative waits plus
//! zero or more operator updates and an optional voice update; stable
//! `OpId`/`VoiceId` handles let the Generator build flat per-id arrays
//! instead of walking graphs at render time.
//!
//! Every mutable field on an `OpUpdate`/`VoiceUpdate` is `Option`: `None`
//! means "this event doesn't touch that parameter", matching spec.md
//! §4.4's "new values for any subset of {...}" rather than re-stating the
//! operator's whole state at every touch.

use crate::config::Defaults;
use crate::ramp::Ramp;
use crate::wave::Wave;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u32);

/// One operator's state delta at an event (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct OpUpdate {
    pub op_id: OpId,
    /// True the first time this operator is defined; the Generator uses
    /// this to allocate fresh run state rather than patching existing
    /// state (spec.md invariant 6, "Carrier discovery").
    pub is_new: bool,
    /// True iff this update makes `op_id` a top-level carrier that starts
    /// a new voice (spec.md invariant 6).
    pub new_carrier: bool,
    pub wave: Option<Wave>,
    /// `Some` pins an explicit duration; the generator treats a *new*
    /// operator with `time_ms: None` and `linked: false` as running for
    /// an unbounded nominal duration (only ever true for unreachable
    /// orphan operators, since every timed pass in `lower.rs` stamps a
    /// concrete time or `linked`).
    pub time_ms: Option<f64>,
    /// Whether this operator's duration mirrors its enclosing carrier's
    /// remaining duration (spec.md invariant 5). Always meaningful (not
    /// optional) once lowering has run: it is recomputed at every touch.
    pub linked: bool,
    pub silence_ms: Option<f64>,
    pub freq: Option<Ramp>,
    pub freq_is_ratio: Option<bool>,
    pub freq2: Option<Ramp>,
    pub phase: Option<f64>,
    pub amp: Option<Ramp>,
    pub amp2: Option<Ramp>,
    pub fmod: Option<Vec<OpId>>,
    pub pmod: Option<Vec<OpId>>,
    pub amod: Option<Vec<OpId>>,
}

impl OpUpdate {
    pub fn bare(op_id: OpId) -> Self {
        Self {
            op_id,
            is_new: false,
            new_carrier: false,
            wave: None,
            time_ms: None,
            linked: false,
            silence_ms: None,
            freq: None,
            freq_is_ratio: None,
            freq2: None,
            phase: None,
            amp: None,
            amp2: None,
            fmod: None,
            pmod: None,
            amod: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceUpdate {
    pub voice_id: VoiceId,
    pub is_new: bool,
    pub pan: Option<Ramp>,
}

/// One point in the program timeline. `wait_ms` is the relative delay
/// from the previous event (spec.md invariant 1: non-negative after
/// flattening).
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub wait_ms: f64,
    pub voice: Option<VoiceUpdate>,
    pub ops: Vec<OpUpdate>,
}

/// Immutable program: a name, the resolved default options the script
/// ran under, and the flattened event timeline (spec.md §3.2 "Program").
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub defaults: Defaults,
    pub events: Vec<Event>,
    pub op_count: u32,
    pub voice_count: u32,
}

impl Program {
    /// Total nominal duration in milliseconds: sum of waits plus the
    /// longest-running operator's own duration past the last event. Used
    /// by `-p` program-info printing and by tests asserting end-to-end
    /// durations (spec.md §8 end-to-end scenarios).
    pub fn total_wait_ms(&self) -> f64 {
        self.events.iter().map(|e| e.wait_ms).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.events.iter().all(|e| e.ops.is_empty() && e.voice.is_none())
    }
}
