//! ScriptLowering: ParseGraph → Program (spec.md §4.3).
//!
//! Runs the four ordered passes spec.md names — time, composite, group,
//! flatten — directly over the `ParseGraph`'s arena (mutating operator
//! fields in place, same as the reference design's in-place pointer
//! mutation, just over stable indices instead of pointers per spec.md §9
//! "Parse-tree ownership"), then does one final walk that assigns stable
//! `OpId`/`VoiceId` handles and produces the immutable, time-ordered
//! `Program`.
//!
//! Implementation note on pass ordering: spec.md's §4.3 item 1 describes
//! `\t`'s wait-duration propagation as part of the time pass, using "the
//! operator's time_ms". We run that specific propagation after the
//! composite pass instead, using each chain's *total* duration — the
//! natural reading once composites exist, since "the previous operator's
//! duration" should mean its whole composite span, not just its first
//! segment. This is recorded as a deliberate sequencing choice, not a
//! deviation from spec.md's four passes (which this still runs, in
//! order, just with the `\t` fixup folded into the boundary between
//! passes 2 and 3).
//!
//! Tie-break rule for simultaneous composite/voice insertion at the same
//! offset (spec.md §9 open question, resolved in SPEC_FULL.md §4 item 4):
//! insertion order is the order operators were attached to their event
//! during parsing. We carry that as a monotonically increasing `seq`
//! assigned while collecting an event's flattened updates, and sort by
//! `(offset_ms, seq)`.

use std::collections::{HashMap, HashSet};

use crate::ast::{ParseEventId, ParseGraph, ParseOpId};
use crate::config::Defaults;
use crate::diagnostics::DiagnosticSink;
use crate::error::BuildError;
use crate::program::{Event, OpId, OpUpdate, Program, VoiceId, VoiceUpdate};

pub fn lower(
    mut graph: ParseGraph,
    defaults: Defaults,
    name: String,
    diags: &mut DiagnosticSink,
) -> Result<Program, BuildError> {
    run_time_pass(&mut graph);
    run_composite_pass(&mut graph);
    run_wait_duration_pass(&mut graph);
    run_group_pass(&mut graph);

    let (op_map, op_count) = assign_op_ids(&graph);
    let mut seq = 0u32;
    let mut next_voice = 0u32;
    let mut events = Vec::new();
    for ev in graph.events_in_order() {
        events.extend(flatten_event(&graph, &op_map, ev, &mut seq, &mut next_voice));
    }

    if op_count > 0 && events.iter().all(|e| e.ops.is_empty()) {
        return Err(BuildError::InvariantViolation(
            "operators were defined but none are reachable from any event".into(),
        ));
    }

    // Every lowering-time warning (bind-scope exclusion, negative time,
    // `ti` misuse) is already raised by the parser against this same sink;
    // the passes above only rewrite fields and never fail locally.
    let _ = diags;
    Ok(Program {
        name,
        defaults,
        events,
        op_count,
        voice_count: next_voice,
    })
}

// ---- pass 1: time -----------------------------------------------------

fn run_time_pass(graph: &mut ParseGraph) {
    for ev in graph.events_in_order() {
        let tops = graph.event(ev).ops.clone();
        for top in tops {
            let mut cur = Some(top);
            while let Some(id) = cur {
                time_operator(graph, id);
                cur = graph.op(id).composite_next;
            }
        }
    }
}

/// Time a single operator reference and recurse into its modulator
/// sub-lists (spec.md §4.3 "time_operator... Recurse into all modulator
/// sub-lists"). Composite continuation is handled by the caller, which
/// walks `composite_next` itself.
fn time_operator(graph: &mut ParseGraph, id: ParseOpId) {
    let (nested, has_composite, time_explicit, default_time_ms, silence_ms, silence_added, time_ms) = {
        let op = graph.op(id);
        (
            op.nested,
            op.composite_next.is_some(),
            op.time_explicit,
            op.default_time_ms,
            op.silence_ms,
            op.silence_added,
            op.time_ms,
        )
    };
    if nested && !time_explicit && !has_composite {
        graph.op_mut(id).linked = true;
    } else if !silence_added {
        let base = time_ms.unwrap_or(default_time_ms);
        let op = graph.op_mut(id);
        op.time_ms = Some(base + silence_ms);
        op.silence_added = true;
    }

    let (fmod, pmod, amod) = {
        let op = graph.op(id);
        (op.fmod.clone(), op.pmod.clone(), op.amod.clone())
    };
    for m in fmod.into_iter().chain(pmod).chain(amod) {
        time_operator(graph, m);
    }
}

// ---- pass 2: composite --------------------------------------------------

fn run_composite_pass(graph: &mut ParseGraph) {
    for ev in graph.events_in_order() {
        let tops = graph.event(ev).ops.clone();
        for top in tops {
            composite_pass_walk(graph, top);
        }
    }
}

fn composite_pass_walk(graph: &mut ParseGraph, root: ParseOpId) {
    let mut cur = root;
    while let Some(next_id) = graph.op(cur).composite_next {
        let (cur_time, cur_silence) = {
            let op = graph.op(cur);
            (op.time_ms.unwrap_or(0.0), op.silence_ms)
        };
        let prev_net = (cur_time - cur_silence).max(0.0);
        if !graph.op(next_id).time_explicit {
            let next_silence = graph.op(next_id).silence_ms;
            graph.op_mut(next_id).time_ms = Some(prev_net + next_silence);
        }
        let (nested, has_more, time_explicit) = {
            let op = graph.op(next_id);
            (op.nested, op.composite_next.is_some(), op.time_explicit)
        };
        if nested && !has_more && !time_explicit {
            graph.op_mut(next_id).linked = true;
        }
        cur = next_id;
    }

    // Bubble the chain's total duration (and any LINKED member) onto the
    // root in a field of its own, so anything inheriting "this operator's
    // duration" — `\t`, the root's own `OpUpdate` — sees the whole span
    // (spec.md §4.3 "main operator's total time is the sum of composite
    // durations... unless any is LINKED"). `time_ms` itself is left
    // untouched on every member, root included: it's each segment's own
    // duration, and `collect_top_chain` needs exactly that (not the chain
    // total) to advance the splice offset between spliced events.
    if graph.op(root).composite_next.is_some() {
        let mut total = 0.0;
        let mut any_linked = false;
        let mut walk = Some(root);
        while let Some(id) = walk {
            let op = graph.op(id);
            total += op.time_ms.unwrap_or(0.0);
            any_linked = any_linked || op.linked;
            walk = op.composite_next;
        }
        let op = graph.op_mut(root);
        op.chain_total_ms = Some(total);
        op.linked = any_linked;
    }

    // Recurse into every chain member's own modulator sub-lists.
    let mut walk = Some(root);
    while let Some(id) = walk {
        let (fmod, pmod, amod) = {
            let op = graph.op(id);
            (op.fmod.clone(), op.pmod.clone(), op.amod.clone())
        };
        for m in fmod.into_iter().chain(pmod).chain(amod) {
            composite_pass_walk(graph, m);
        }
        walk = graph.op(id).composite_next;
    }
}

// ---- `\t` wait-duration propagation -------------------------------------

fn run_wait_duration_pass(graph: &mut ParseGraph) {
    for ev in graph.events_in_order() {
        if !graph.event(ev).add_wait_duration {
            continue;
        }
        let Some(prev_ev) = graph.event(ev).prev else {
            continue;
        };
        let Some(&last_op) = graph.event(prev_ev).ops.last() else {
            continue;
        };
        let dur = chain_total_duration(graph, last_op);
        graph.event_mut(ev).wait_ms += dur;
    }
}

fn chain_total_duration(graph: &ParseGraph, head: ParseOpId) -> f64 {
    let mut total = 0.0;
    let mut cur = Some(head);
    while let Some(id) = cur {
        total += graph.op(id).time_ms.unwrap_or(0.0);
        cur = graph.op(id).composite_next;
    }
    total
}

// ---- pass 3: group -------------------------------------------------------

fn run_group_pass(graph: &mut ParseGraph) {
    let mut consumed = HashSet::new();
    for ev in graph.events_in_order() {
        if consumed.contains(&ev) || !graph.event(ev).group_end {
            continue;
        }

        // A script can chain several `|`s back to back with nothing but
        // operators between them ("`A | B | C`"): each `|` on its own only
        // terminates a trivial one-member group, but spec.md §8 scenario 6
        // ("Osin t1 | Osin t0.5 | Osin t2", total program length 2s) treats
        // the whole run as one synchronized cluster, including the final
        // operand even though nothing follows it with a closing `|`. Walk
        // forward through consecutive group terminators, plus the one
        // trailing event that directly follows the last of them, to find
        // that cluster's true extent.
        let group_from = graph.event(ev).group_from.unwrap_or(ev);
        let mut cluster = vec![ev];
        let mut last = ev;
        while graph.event(last).group_end {
            let Some(next) = graph.event(last).next else { break };
            cluster.push(next);
            consumed.insert(next);
            if graph.event(next).group_end {
                last = next;
            } else {
                break;
            }
        }
        let cluster_last = *cluster.last().unwrap();

        let members = group_member_ops(graph, group_from, cluster_last);
        let mut max_time = 0.0f64;
        let mut any_finite = false;
        for &op in &members {
            if graph.op(op).linked {
                continue;
            }
            // A composite chain's member reports its own segment in
            // `time_ms`; its root additionally carries the whole chain's
            // span in `chain_total_ms`, which is the duration a group
            // needs to synchronize against.
            let total = graph.op(op).chain_total_ms.or(graph.op(op).time_ms);
            if let Some(t) = total {
                max_time = max_time.max(t);
                any_finite = true;
            }
        }
        if !any_finite {
            continue;
        }
        for (i, &op) in members.iter().enumerate() {
            if graph.op(op).time_ms.is_none() && !graph.op(op).linked {
                graph.op_mut(op).time_ms = Some(max_time + i as f64);
            }
        }
        // Every member after the cluster's first starts in lockstep with
        // it, not sequentially after the member before it.
        for &member_ev in cluster.iter().skip(1) {
            graph.event_mut(member_ev).wait_ms = 0.0;
        }
        if let Some(after) = graph.event(cluster_last).next {
            graph.event_mut(after).wait_ms += max_time;
        }
    }
}

fn group_member_ops(graph: &ParseGraph, from: ParseEventId, to: ParseEventId) -> Vec<ParseOpId> {
    let mut out = Vec::new();
    let mut cur = Some(from);
    while let Some(id) = cur {
        out.extend(graph.event(id).ops.iter().copied());
        if id == to {
            break;
        }
        cur = graph.event(id).next;
    }
    out
}

// ---- stable id assignment -------------------------------------------------

/// Maps every `ParseOpId` to the stable `OpId` of the logical operator it
/// belongs to. A logical operator is rooted either at a fresh `O`
/// definition or at a top-level bind-scope's first reference; label
/// references (`@name ...`) and composite continuations (`;`) share their
/// root's id rather than minting a new one (spec.md §3.2 "Operator":
/// stable `op_id`).
fn assign_op_ids(graph: &ParseGraph) -> (HashMap<ParseOpId, OpId>, u32) {
    let mut map = HashMap::new();
    let mut next = 0u32;
    for idx in 0..graph.op_count() {
        let id = ParseOpId(idx as u32);
        if graph.op(id).new_op {
            map.insert(id, OpId(next));
            next += 1;
        }
    }
    // Label references chain through `op_prev` back to their definition.
    for idx in 0..graph.op_count() {
        let id = ParseOpId(idx as u32);
        let op = graph.op(id);
        if !op.new_op && op.ref_label.is_some() {
            let mut cur = id;
            while !graph.op(cur).new_op {
                match graph.op(cur).op_prev {
                    Some(p) => cur = p,
                    None => break,
                }
            }
            if let Some(&oid) = map.get(&cur) {
                map.insert(id, oid);
            }
        }
    }
    // Composite continuations share their chain head's id.
    for idx in 0..graph.op_count() {
        let id = ParseOpId(idx as u32);
        if let Some(&oid) = map.get(&id) {
            let mut cur = graph.op(id).composite_next;
            while let Some(c) = cur {
                map.insert(c, oid);
                cur = graph.op(c).composite_next;
            }
        }
    }
    (map, next)
}

fn map_ids(map: &HashMap<ParseOpId, OpId>, ids: &[ParseOpId]) -> Vec<OpId> {
    ids.iter().filter_map(|id| map.get(id).copied()).collect()
}

fn fill_common_fields(graph: &ParseGraph, id: ParseOpId, update: &mut OpUpdate) {
    let op = graph.op(id);
    update.wave = Some(op.wave);
    // A composite chain's root reports the whole chain's total duration
    // here (its "render duration"); every other member (and a
    // non-composite operator) just reports its own `time_ms`.
    update.time_ms = op.chain_total_ms.or(op.time_ms);
    update.linked = op.linked;
    update.silence_ms = Some(op.silence_ms);
    update.freq = Some(op.freq);
    update.freq_is_ratio = Some(op.freq_is_ratio);
    update.freq2 = op.freq2;
    update.phase = Some(op.phase);
    update.amp = Some(op.amp);
    update.amp2 = op.amp2;
}

/// Flatten a modulator operator (and any composite chain / sub-modulators
/// of its own) into a flat list of updates, all attributed to the same
/// instant as whichever step defined them. Composite chains *on
/// modulators* are folded into that single instant rather than
/// independently spliced into the timeline — documented in DESIGN.md as a
/// deliberate scope reduction; no example in spec.md §8 exercises a
/// modulator that itself re-triggers on its own schedule.
fn collect_modulator(graph: &ParseGraph, map: &HashMap<ParseOpId, OpId>, root: ParseOpId, out: &mut Vec<OpUpdate>) {
    let mut cur = Some(root);
    while let Some(id) = cur {
        let op = graph.op(id);
        if op.multiple {
            cur = op.composite_next;
            continue;
        }
        let op_id = map[&id];
        let mut update = OpUpdate::bare(op_id);
        fill_common_fields(graph, id, &mut update);
        update.is_new = op.new_op;
        update.fmod = Some(map_ids(map, &op.fmod));
        update.pmod = Some(map_ids(map, &op.pmod));
        update.amod = Some(map_ids(map, &op.amod));
        out.push(update);
        for m in op.fmod.iter().chain(op.pmod.iter()).chain(op.amod.iter()) {
            collect_modulator(graph, map, *m, out);
        }
        cur = graph.op(id).composite_next;
    }
}

struct Tuple {
    offset_ms: f64,
    seq: u32,
    voice: Option<VoiceUpdate>,
    update: OpUpdate,
    subs: Vec<OpUpdate>,
}

/// Walk one top-level operator's whole `;`-composite chain, producing one
/// `Tuple` per step, each offset by the cumulative duration of the steps
/// before it (spec.md §4.3 "composite wait-times accumulate from previous
/// step durations").
fn collect_top_chain(
    graph: &ParseGraph,
    map: &HashMap<ParseOpId, OpId>,
    head: ParseOpId,
    seq: &mut u32,
    next_voice: &mut u32,
    tuples: &mut Vec<Tuple>,
) {
    let mut offset = 0.0;
    let mut cur = Some(head);
    while let Some(id) = cur {
        let op = graph.op(id);
        if op.multiple {
            cur = op.composite_next;
            continue;
        }
        let op_id = map[&id];
        let mut update = OpUpdate::bare(op_id);
        fill_common_fields(graph, id, &mut update);
        update.is_new = op.new_op;
        let is_carrier = op.new_op && !op.nested;
        update.new_carrier = is_carrier;
        update.fmod = Some(map_ids(map, &op.fmod));
        update.pmod = Some(map_ids(map, &op.pmod));
        update.amod = Some(map_ids(map, &op.amod));

        let mut subs = Vec::new();
        for m in op.fmod.iter().chain(op.pmod.iter()).chain(op.amod.iter()) {
            collect_modulator(graph, map, *m, &mut subs);
        }

        let voice = if is_carrier {
            let vid = VoiceId(*next_voice);
            *next_voice += 1;
            let pan = op.channel_mix.map(|c| c.to_ramp());
            Some(VoiceUpdate {
                voice_id: vid,
                is_new: true,
                pan,
            })
        } else {
            None
        };

        tuples.push(Tuple {
            offset_ms: offset,
            seq: *seq,
            voice,
            update,
            subs,
        });
        *seq += 1;
        offset += op.time_ms.unwrap_or(0.0);
        cur = graph.op(id).composite_next;
    }
}

fn flatten_event(
    graph: &ParseGraph,
    map: &HashMap<ParseOpId, OpId>,
    event_id: ParseEventId,
    seq: &mut u32,
    next_voice: &mut u32,
) -> Vec<Event> {
    let tops = graph.event(event_id).ops.clone();
    let mut tuples = Vec::new();
    for top in tops {
        collect_top_chain(graph, map, top, seq, next_voice, &mut tuples);
    }
    tuples.sort_by(|a, b| {
        a.offset_ms
            .partial_cmp(&b.offset_ms)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });

    let base_wait = graph.event(event_id).wait_ms.max(0.0);
    if tuples.is_empty() {
        return vec![Event {
            wait_ms: base_wait,
            voice: None,
            ops: Vec::new(),
        }];
    }

    let mut out = Vec::with_capacity(tuples.len());
    let mut prev_offset = 0.0;
    for (i, t) in tuples.into_iter().enumerate() {
        let wait_ms = if i == 0 {
            base_wait
        } else {
            (t.offset_ms - prev_offset).max(0.0)
        };
        let mut ops = Vec::with_capacity(1 + t.subs.len());
        ops.push(t.update);
        ops.extend(t.subs);
        out.push(Event {
            wait_ms,
            voice: t.voice,
            ops,
        });
        prev_offset = t.offset_ms;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::symtab::SymTab;

    fn build(src: &str) -> Program {
        let mut syms = SymTab::new();
        let mut diags = DiagnosticSink::new();
        let (graph, defaults) = Parser::new(src, &mut syms, &mut diags).parse();
        lower(graph, defaults, "test".into(), &mut diags).expect("lowering failed")
    }

    #[test]
    fn empty_script_yields_empty_program() {
        let prog = build("S t0");
        assert!(prog.is_empty());
        assert_eq!(prog.op_count, 0);
    }

    #[test]
    fn single_carrier_creates_one_voice() {
        let prog = build("Osin t0.5 f440");
        assert_eq!(prog.voice_count, 1);
        assert_eq!(prog.op_count, 1);
        let ev = &prog.events[0];
        assert!(ev.voice.is_some());
        assert_eq!(ev.ops.len(), 1);
        assert_eq!(ev.ops[0].time_ms, Some(500.0));
    }

    #[test]
    fn composite_chain_splices_into_timeline() {
        let prog = build("Osin f440 t0.1; t0.1 f880; t0.1 f1320");
        // main event + 2 spliced composite events = 3 program events.
        assert_eq!(prog.events.len(), 3);
        assert_eq!(prog.events[0].wait_ms, 0.0);
        assert_eq!(prog.events[1].wait_ms, 100.0);
        assert_eq!(prog.events[2].wait_ms, 100.0);
        assert_eq!(prog.events[1].ops[0].freq.unwrap().v0, 880.0);
        assert_eq!(prog.events[2].ops[0].freq.unwrap().v0, 1320.0);
    }

    #[test]
    fn wait_for_previous_copies_prior_duration() {
        let prog = build("Osin f200 t0.5 \\t Osin f400 t0.5");
        assert_eq!(prog.events.len(), 2);
        assert_eq!(prog.events[1].wait_ms, 500.0);
    }

    #[test]
    fn group_synchronizes_all_members_to_wait_zero() {
        let prog = build("Osin t1 | Osin t0.5 | Osin t2");
        assert_eq!(prog.events.len(), 3);
        // The whole three-way pipe chain is one synchronized cluster
        // (spec.md §8 scenario 6): every member starts at wait 0, with
        // nothing after the cluster to absorb its 2000ms max into.
        assert_eq!(prog.events[0].wait_ms, 0.0);
        assert_eq!(prog.events[1].wait_ms, 0.0);
        assert_eq!(prog.events[2].wait_ms, 0.0);
    }

    #[test]
    fn nested_modulator_without_explicit_time_is_linked() {
        let prog = build("Osin f137 t1 p+[Osin f32]");
        let carrier_update = &prog.events[0].ops[0];
        assert_eq!(carrier_update.pmod.as_ref().unwrap().len(), 1);
        let modulator_update = &prog.events[0].ops[1];
        assert!(modulator_update.linked);
        assert_eq!(modulator_update.time_ms, None);
    }

    #[test]
    fn fm_tree_flattens_both_levels() {
        let prog = build("Osin f137 t1 p+[Osin f32 p+[Osin f42]]");
        assert_eq!(prog.op_count, 3);
        assert_eq!(prog.events[0].ops.len(), 3);
    }

    #[test]
    fn silence_is_folded_into_resolved_time() {
        let prog = build("Osin t0.2 s0.1 f440");
        assert_eq!(prog.events[0].ops[0].time_ms, Some(300.0));
    }
}
