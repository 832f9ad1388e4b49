//! Wave-table jump table (spec.md §9 "Dynamic dispatch" / "Global mutable
//! state").
//!
//! Wave evaluation differs per wave type but the set is closed and known
//! at compile time, so it's dispatched through a small enum rather than a
//! trait object. Tables are built once and owned by the `Generator` that
//! uses them (spec.md's design note: "build them once into an immutable,
//! shareable table bound at generator construction"), not as a process
//! global.

use std::f32::consts::TAU;

pub const TABLE_LEN: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wave {
    Sin,
    Tri,
    Sqr,
    Saw,
    /// Inverse sawtooth (ramps down instead of up).
    Rsaw,
    /// Half-wave rectified sine, common as a softer sub-bass carrier.
    Ahsin,
}

impl Wave {
    pub const ALL: [Wave; 6] = [
        Wave::Sin,
        Wave::Tri,
        Wave::Sqr,
        Wave::Saw,
        Wave::Rsaw,
        Wave::Ahsin,
    ];

    pub fn from_name(name: &str) -> Option<Wave> {
        match name {
            "sin" => Some(Wave::Sin),
            "tri" => Some(Wave::Tri),
            "sqr" => Some(Wave::Sqr),
            "saw" => Some(Wave::Saw),
            "rsaw" => Some(Wave::Rsaw),
            "ahsin" => Some(Wave::Ahsin),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Wave::Sin => 0,
            Wave::Tri => 1,
            Wave::Sqr => 2,
            Wave::Saw => 3,
            Wave::Rsaw => 4,
            Wave::Ahsin => 5,
        }
    }

    /// Exact-math evaluation at phase fraction `p` in `[0,1)`, used to
    /// build the lookup table and by tests that want sub-sample accuracy.
    fn eval_exact(self, p: f32) -> f32 {
        match self {
            Wave::Sin => (p * TAU).sin(),
            Wave::Tri => {
                if p < 0.25 {
                    4.0 * p
                } else if p < 0.75 {
                    2.0 - 4.0 * p
                } else {
                    4.0 * p - 4.0
                }
            }
            Wave::Sqr => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Wave::Saw => 2.0 * p - 1.0,
            Wave::Rsaw => 1.0 - 2.0 * p,
            Wave::Ahsin => (p * TAU).sin().abs() * 2.0 - 1.0,
        }
    }
}

/// Immutable, precomputed lookup tables for every wave type, bound to one
/// `Generator` instance and shared (read-only) by every operator it
/// renders.
pub struct WaveTables {
    tables: Vec<[f32; TABLE_LEN]>,
}

impl WaveTables {
    pub fn build() -> Self {
        let mut tables = Vec::with_capacity(Wave::ALL.len());
        for wave in Wave::ALL {
            let mut table = [0.0f32; TABLE_LEN];
            for (i, slot) in table.iter_mut().enumerate() {
                let p = i as f32 / TABLE_LEN as f32;
                *slot = wave.eval_exact(p);
            }
            tables.push(table);
        }
        Self { tables }
    }

    /// Look up `wave`'s value at fixed-point phase `phase_q32`, where the
    /// full `u32` range maps to one cycle (`0` = phase 0.0, `u32::MAX+1`
    /// wraps to a new cycle).
    #[inline]
    pub fn lookup(&self, wave: Wave, phase_q32: u32) -> f32 {
        let table = &self.tables[wave.index()];
        let idx = (phase_q32 as u64 * TABLE_LEN as u64 >> 32) as usize;
        table[idx.min(TABLE_LEN - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sin_table_starts_at_zero_and_peaks_at_quarter() {
        let tables = WaveTables::build();
        let zero = tables.lookup(Wave::Sin, 0);
        assert!(zero.abs() < 1e-2, "expected ~0, got {zero}");
        let quarter = tables.lookup(Wave::Sin, u32::MAX / 4);
        assert!(quarter > 0.95, "expected ~1, got {quarter}");
    }

    #[test]
    fn square_flips_sign_at_half_cycle() {
        let tables = WaveTables::build();
        assert!(tables.lookup(Wave::Sqr, 0) > 0.0);
        assert!(tables.lookup(Wave::Sqr, u32::MAX / 2 + 1) < 0.0);
    }

    #[test]
    fn from_name_round_trips_all_known_waves() {
        for w in Wave::ALL {
            let name = match w {
                Wave::Sin => "sin",
                Wave::Tri => "tri",
                Wave::Sqr => "sqr",
                Wave::Saw => "saw",
                Wave::Rsaw => "rsaw",
                Wave::Ahsin => "ahsin",
            };
            assert_eq!(Wave::from_name(name), Some(w));
        }
        assert_eq!(Wave::from_name("bogus"), None);
    }
}
