// Curvature: a stereo dynamics processor with a freely drawn transfer curve
// Copyright (C) 2026 the Curvature authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use atomic_float::AtomicF32;
use std::sync::atomic::Ordering;

/// The level reported before anything has been processed, in decibels.
pub const INITIAL_LEVEL_DB: f32 = -500.0;

/// Meter values published by the audio thread at the end of every block, for an editor to poll.
/// These are only for display, so they're stored with relaxed ordering.
#[derive(Debug)]
pub struct VuMeters {
    /// The smoothed detected level per channel, in decibels.
    level_db: [AtomicF32; 2],
    /// The smoothed gain correction per channel, in decibels. Negative values mean the signal is
    /// being attenuated.
    gain_db: [AtomicF32; 2],
}

impl Default for VuMeters {
    fn default() -> Self {
        Self {
            level_db: [
                AtomicF32::new(INITIAL_LEVEL_DB),
                AtomicF32::new(INITIAL_LEVEL_DB),
            ],
            gain_db: [AtomicF32::new(0.0), AtomicF32::new(0.0)],
        }
    }
}

impl VuMeters {
    pub fn publish(&self, level_db: [f64; 2], gain_db: [f64; 2]) {
        for (meter, value) in self.level_db.iter().zip(level_db) {
            meter.store(value as f32, Ordering::Relaxed);
        }
        for (meter, value) in self.gain_db.iter().zip(gain_db) {
            meter.store(value as f32, Ordering::Relaxed);
        }
    }

    pub fn level_db(&self) -> [f32; 2] {
        [
            self.level_db[0].load(Ordering::Relaxed),
            self.level_db[1].load(Ordering::Relaxed),
        ]
    }

    pub fn gain_db(&self) -> [f32; 2] {
        [
            self.gain_db[0].load(Ordering::Relaxed),
            self.gain_db[1].load(Ordering::Relaxed),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_values() {
        let meters = VuMeters::default();
        assert_eq!(meters.level_db(), [INITIAL_LEVEL_DB; 2]);
        assert_eq!(meters.gain_db(), [0.0; 2]);
    }

    #[test]
    fn publish() {
        let meters = VuMeters::default();
        meters.publish([-12.0, -24.0], [-3.0, 0.0]);

        assert_eq!(meters.level_db(), [-12.0, -24.0]);
        assert_eq!(meters.gain_db(), [-3.0, 0.0]);
    }
}
