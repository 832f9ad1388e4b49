//! End-to-end render scenarios (spec.md §8 "End-to-end scenarios"):
//! compile a script all the way through the Generator and inspect the
//! PCM it produces. Spectral checks follow the teacher's FFT-based
//! verification style (`tests/test_sine_oscillator.rs`).

use std::f32::consts::PI;

use sau::diagnostics::DiagnosticSink;
use sau::generator::Generator;
use sau::lower::lower;
use sau::parser::Parser;
use sau::program::Program;
use sau::symtab::SymTab;

fn build(src: &str) -> Program {
    let mut syms = SymTab::new();
    let mut diags = DiagnosticSink::new();
    let (graph, defaults) = Parser::new(src, &mut syms, &mut diags).parse();
    lower(graph, defaults, "e2e".into(), &mut diags).expect("lowering failed")
}

fn render_all(prog: &Program, sample_rate: u32) -> Vec<i16> {
    let mut gen = Generator::new(prog, sample_rate);
    let mut out = Vec::new();
    let mut buf = [0i16; 1024];
    loop {
        let (written, eof) = gen.run(&mut buf);
        out.extend_from_slice(&buf[..written * 2]);
        if eof {
            break;
        }
    }
    out
}

/// Dominant frequency bin of the left channel via windowed FFT, mirroring
/// the teacher's `analyze_spectrum` helper.
fn dominant_frequency(stereo: &[i16], sample_rate: f32) -> f32 {
    use rustfft::{num_complex::Complex, FftPlanner};

    let left: Vec<f32> = stereo.chunks(2).map(|c| c[0] as f32 / i16::MAX as f32).collect();
    let fft_size = 8192.min(left.len());
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);

    let mut input: Vec<Complex<f32>> = left[..fft_size]
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let window = 0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos());
            Complex::new(s * window, 0.0)
        })
        .collect();
    fft.process(&mut input);

    let (bin, _) = input[..fft_size / 2]
        .iter()
        .map(|c| c.re * c.re + c.im * c.im)
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .unwrap();
    bin as f32 * sample_rate / fft_size as f32
}

fn band_energy(stereo: &[i16], sample_rate: f32, lo: f32, hi: f32) -> f32 {
    use rustfft::{num_complex::Complex, FftPlanner};

    let left: Vec<f32> = stereo.chunks(2).map(|c| c[0] as f32 / i16::MAX as f32).collect();
    let fft_size = 8192.min(left.len());
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    let mut input: Vec<Complex<f32>> = left[..fft_size].iter().map(|&s| Complex::new(s, 0.0)).collect();
    fft.process(&mut input);

    input[..fft_size / 2]
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let f = *i as f32 * sample_rate / fft_size as f32;
            f >= lo && f <= hi
        })
        .map(|(_, c)| c.re * c.re + c.im * c.im)
        .sum()
}

#[test]
fn silence_only_settings_produces_zero_frames() {
    let prog = build("S t0");
    let mut gen = Generator::new(&prog, 44100);
    let mut buf = [0i16; 256 * 2];
    let (written, eof) = gen.run(&mut buf);
    assert_eq!(written, 0);
    assert!(eof);
}

#[test]
fn half_second_sine_at_48k_hits_dominant_440hz() {
    let prog = build("Osin t0.5 f440");
    let pcm = render_all(&prog, 48000);
    let frames = pcm.len() / 2;
    // 500ms @ 48kHz = 24000 frames exactly; 440Hz over 500ms is a whole
    // number of cycles (220) from phase 0, so the click-reduction snap
    // is a no-op here and duration expiry is sample-exact.
    assert!((23998..=24002).contains(&frames), "got {frames} frames");
    for chunk in pcm.chunks(2) {
        assert_eq!(chunk[0], chunk[1], "centered pan should match both channels");
        assert!(chunk[0].unsigned_abs() <= i16::MAX as u16);
    }
    let dom = dominant_frequency(&pcm, 48000.0);
    assert!((dom - 440.0).abs() < 48000.0 / 8192.0 + 1.0, "dominant bin {dom}");
}

#[test]
fn fm_rumble_has_energy_in_modulation_band_without_clipping() {
    let prog = build("Osin f137 t1 p+[Osin f32 p+[Osin f42]]");
    let pcm = render_all(&prog, 44100);
    let frames = pcm.len() / 2;
    // Carrier freq 137Hz over 1s is a whole number of cycles, so the
    // snap leaves the nominal 44100-frame duration untouched.
    assert!((44098..=44102).contains(&frames), "got {frames} frames");
    for chunk in pcm.chunks(2) {
        assert!(chunk[0].unsigned_abs() < i16::MAX as u16);
    }
    let energy = band_energy(&pcm, 44100.0, 100.0, 200.0);
    assert!(energy > 0.0, "expected non-zero energy in 100-200Hz band");
}

#[test]
fn composite_chain_produces_three_distinct_frequency_segments() {
    let prog = build("Osin f440 t0.1; t0.1 f880; t0.1 f1320");
    assert_eq!(prog.events.len(), 3);
    let total_ms: f64 = prog.events.iter().map(|e| e.wait_ms).sum();
    assert!((total_ms - 200.0).abs() < 1e-6, "first-event-relative wait total {total_ms}");

    let pcm = render_all(&prog, 44100);
    let frames = pcm.len() / 2;
    // main duration 0.3s -> 13230 frames exactly; each 100ms segment's
    // frequency (440/880/1320Hz) is a whole number of cycles, so no
    // segment is shortened by the click-reduction snap.
    assert!((13228..=13232).contains(&frames), "got {frames} frames");
}

#[test]
fn wait_for_previous_starts_second_operator_after_first_duration() {
    let prog = build("Osin f200 t0.5 \\t Osin f400 t0.5");
    assert_eq!(prog.events.len(), 2);
    assert!((prog.events[1].wait_ms - 500.0).abs() < 1e-6);
}

#[test]
fn group_synchronizes_operator_durations_to_group_max() {
    let prog = build("Osin t1 | Osin t0.5 | Osin t2");
    assert_eq!(prog.events.len(), 3);
    // All three operators are one synchronized group (spec.md §8
    // scenario 6): they share wait 0 and each runs its own duration, so
    // the program ends at the group's max (2000ms), not their sum.
    assert_eq!(prog.events[1].wait_ms, 0.0);
    assert_eq!(prog.events[2].wait_ms, 0.0);

    let pcm = render_all(&prog, 44100);
    let frames = pcm.len() / 2;
    // Default carrier freq 440Hz divides evenly into each of 1000/500/
    // 2000ms, so the snap is a no-op and the total is sample-exact:
    // 2000ms @ 44.1kHz == 88200 frames.
    assert!((88198..=88202).contains(&frames), "got {frames} frames");
}

#[test]
fn building_the_same_script_twice_is_deterministic() {
    let src = "Osin f440 t0.2 p+[Osin f7 a0.3]";
    let prog1 = build(src);
    let prog2 = build(src);
    let pcm1 = render_all(&prog1, 44100);
    let pcm2 = render_all(&prog2, 44100);
    assert_eq!(pcm1, pcm2);
}
