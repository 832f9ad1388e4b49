//! Default/tuning options set by the `S` top-level statement (spec.md
//! §3.1) and carried as the parser's running defaults.

use crate::notes::Tuning;
use crate::ramp::Ramp;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelMix {
    Left,
    Center,
    Right,
}

impl ChannelMix {
    pub fn pan_value(self) -> f64 {
        match self {
            ChannelMix::Left => -1.0,
            ChannelMix::Center => 0.0,
            ChannelMix::Right => 1.0,
        }
    }

    pub fn to_ramp(self) -> Ramp {
        Ramp::constant(self.pan_value())
    }
}

/// Running default values, updated by `S` statements and consulted
/// whenever a step or operator omits an explicit value.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    pub amp_mul: f64,
    pub freq: f64,
    pub tuning: Tuning,
    pub rel_freq: f64,
    pub time_ms: f64,
    pub chanmix: ChannelMix,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            amp_mul: 1.0,
            freq: 440.0,
            tuning: Tuning::default(),
            rel_freq: 1.0,
            time_ms: 1000.0,
            chanmix: ChannelMix::Center,
        }
    }
}

/// Requested playback/render targets, resolved from CLI flags (spec.md
/// §6.1). Kept separate from `Defaults`, which is purely a script-level
/// concept — this is render-session configuration.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub sample_rate: u32,
    pub wav_path: Option<std::path::PathBuf>,
    pub play_device: bool,
    pub check_only: bool,
    pub print_info: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            wav_path: None,
            play_device: true,
            check_only: false,
            print_info: false,
        }
    }
}
