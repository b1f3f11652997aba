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

//! The level detector. This follows the input's level in decibels with separate attack and release
//! time constants, optionally delaying the attack and release paths so a transient can pass before
//! the detector reacts to it.

use serde::{Deserialize, Serialize};

use crate::simd::F64x2;
use crate::util;

/// The longest attack or release time, in milliseconds.
pub const MAX_TIME_CONSTANT_MS: f64 = 2000.0;
/// The largest attack or release delay, as a fraction of the corresponding time constant.
pub const MAX_DELAY_FRACTION: f64 = 0.25;

/// How the input's magnitude is measured before it's converted to decibels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// The absolute value of every sample.
    #[default]
    Peak,
    /// The square root of a one-pole smoothed squared signal.
    Rms,
}

/// The plain, per-channel values used to compute [`EnvelopeSettings`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeParams {
    pub attack_ms: f64,
    pub release_ms: f64,
    /// A fraction of `attack_ms` in `[0, MAX_DELAY_FRACTION]`.
    pub attack_delay: f64,
    /// A fraction of `release_ms` in `[0, MAX_DELAY_FRACTION]`.
    pub release_delay: f64,
    /// The averaging time for [`Metric::Rms`]. Zero means no averaging.
    pub rms_time_ms: f64,
    pub metric: Metric,
}

/// The envelope follower's coefficients for both channels. These are recomputed every block from
/// the parameters at the oversampled rate, and the processing loop only reads them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeSettings {
    pub attack_alpha: F64x2,
    pub release_alpha: F64x2,
    pub rms_alpha: F64x2,
    /// The attack delay in samples for each channel.
    pub attack_delay: [usize; 2],
    /// The release delay in samples for each channel.
    pub release_delay: [usize; 2],
    pub metric: [Metric; 2],
}

/// The per-channel detector state.
#[derive(Debug)]
pub struct EnvelopeFollower {
    settings: EnvelopeSettings,

    /// The detected level in decibels. This is the envelope follower's output.
    level: F64x2,
    /// The smoothed squared input, only used for [`Metric::Rms`] but always updated so switching
    /// metrics does not start from a stale value.
    mean_square: F64x2,

    attack_delay_lines: [DelayLine; 2],
    release_delay_lines: [DelayLine; 2],
}

/// A ring buffer holding the most recent input levels in decibels. These are stored as single
/// precision floats since the delay lines can get quite long at high oversampling rates.
#[derive(Debug)]
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            attack_alpha: F64x2::splat(0.0),
            release_alpha: F64x2::splat(0.0),
            rms_alpha: F64x2::splat(0.0),
            attack_delay: [0; 2],
            release_delay: [0; 2],
            metric: [Metric::Peak; 2],
        }
    }
}

impl EnvelopeSettings {
    /// Compute the coefficients for both channels at `sample_rate`, which should be the oversampled
    /// rate the follower runs at.
    pub fn from_params(sample_rate: f64, params: [EnvelopeParams; 2]) -> Self {
        let angular_coef = util::angular_frequency_coef(sample_rate);
        let delay_samples = |time_ms: f64, fraction: f64| -> usize {
            let fraction = fraction.clamp(0.0, MAX_DELAY_FRACTION);
            (fraction * time_ms.max(0.0) * sample_rate / 1000.0).round() as usize
        };

        Self {
            attack_alpha: F64x2::new(
                util::time_constant_alpha(angular_coef, params[0].attack_ms),
                util::time_constant_alpha(angular_coef, params[1].attack_ms),
            ),
            release_alpha: F64x2::new(
                util::time_constant_alpha(angular_coef, params[0].release_ms),
                util::time_constant_alpha(angular_coef, params[1].release_ms),
            ),
            rms_alpha: F64x2::new(
                util::time_constant_alpha(angular_coef, params[0].rms_time_ms),
                util::time_constant_alpha(angular_coef, params[1].rms_time_ms),
            ),
            attack_delay: [
                delay_samples(params[0].attack_ms, params[0].attack_delay),
                delay_samples(params[1].attack_ms, params[1].attack_delay),
            ],
            release_delay: [
                delay_samples(params[0].release_ms, params[0].release_delay),
                delay_samples(params[1].release_ms, params[1].release_delay),
            ],
            metric: [params[0].metric, params[1].metric],
        }
    }
}

/// The number of samples needed for the longest possible delay at `sample_rate`.
pub fn max_delay_samples(sample_rate: f64) -> usize {
    (MAX_DELAY_FRACTION * MAX_TIME_CONSTANT_MS * sample_rate / 1000.0).ceil() as usize
}

impl EnvelopeFollower {
    /// Create an envelope follower whose delay lines can hold up to `max_delay_samples` samples.
    /// See [`max_delay_samples()`].
    pub fn new(max_delay_samples: usize) -> Self {
        Self {
            settings: EnvelopeSettings::default(),

            level: F64x2::splat(util::LEVEL_FLOOR_DB),
            mean_square: F64x2::splat(0.0),

            attack_delay_lines: [
                DelayLine::new(max_delay_samples),
                DelayLine::new(max_delay_samples),
            ],
            release_delay_lines: [
                DelayLine::new(max_delay_samples),
                DelayLine::new(max_delay_samples),
            ],
        }
    }

    /// Clear the detector's state. The settings are kept.
    pub fn reset(&mut self) {
        self.level = F64x2::splat(util::LEVEL_FLOOR_DB);
        self.mean_square = F64x2::splat(0.0);
        for delay_line in self
            .attack_delay_lines
            .iter_mut()
            .chain(self.release_delay_lines.iter_mut())
        {
            delay_line.reset();
        }
    }

    pub fn set_settings(&mut self, settings: EnvelopeSettings) {
        curv_debug_assert!(
            settings.attack_delay[0].max(settings.attack_delay[1]) < self.delay_capacity().max(1)
                && settings.release_delay[0].max(settings.release_delay[1])
                    < self.delay_capacity().max(1),
            "The delay lines are too short for the requested delay, the delay will be clamped"
        );

        self.settings = settings;
    }

    pub fn settings(&self) -> &EnvelopeSettings {
        &self.settings
    }

    /// The most recently detected level in decibels.
    pub fn level(&self) -> F64x2 {
        self.level
    }

    /// Process a single sample for both channels, returning the detected level in decibels. The
    /// result is never lower than [`LEVEL_FLOOR_DB`][util::LEVEL_FLOOR_DB].
    #[inline]
    pub fn process_db(&mut self, input: F64x2) -> F64x2 {
        let settings = &self.settings;

        let squared = input * input;
        self.mean_square = squared + settings.rms_alpha * (self.mean_square - squared);

        for channel in 0..2 {
            let magnitude = match settings.metric[channel] {
                Metric::Peak => input[channel].abs(),
                Metric::Rms => self.mean_square[channel].sqrt(),
            };
            let input_db = util::gain_to_db(magnitude);

            let attack_input =
                self.attack_delay_lines[channel].process(input_db, settings.attack_delay[channel]);
            let release_input = self.release_delay_lines[channel]
                .process(input_db, settings.release_delay[channel]);

            // The attack path only moves the level up and the release path only moves it down. With
            // different delays for the two paths neither of them may apply, and the level is held.
            let level = self.level[channel];
            self.level[channel] = if attack_input > level {
                attack_input + settings.attack_alpha[channel] * (level - attack_input)
            } else if release_input < level {
                release_input + settings.release_alpha[channel] * (level - release_input)
            } else {
                level
            };
        }

        self.level
    }

    fn delay_capacity(&self) -> usize {
        self.attack_delay_lines[0].buffer.len()
    }
}

impl DelayLine {
    fn new(capacity: usize) -> Self {
        Self {
            // One extra slot so a delay of `capacity` samples can still be read back
            buffer: vec![util::LEVEL_FLOOR_DB as f32; capacity + 1],
            write_pos: 0,
        }
    }

    fn reset(&mut self) {
        self.buffer.fill(util::LEVEL_FLOOR_DB as f32);
        self.write_pos = 0;
    }

    /// Write `sample` to the delay line and return the sample from `delay` samples ago. The delay
    /// is clamped to the delay line's capacity.
    #[inline]
    fn process(&mut self, sample: f64, delay: usize) -> f64 {
        let len = self.buffer.len();
        self.buffer[self.write_pos] = sample as f32;

        let output = if delay == 0 {
            sample
        } else {
            let delay = delay.min(len - 1);
            self.buffer[(self.write_pos + len - delay) % len] as f64
        };

        self.write_pos += 1;
        if self.write_pos == len {
            self.write_pos = 0;
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 48_000.0;

    fn params(attack_ms: f64, release_ms: f64, metric: Metric) -> EnvelopeParams {
        EnvelopeParams {
            attack_ms,
            release_ms,
            attack_delay: 0.0,
            release_delay: 0.0,
            rms_time_ms: 50.0,
            metric,
        }
    }

    fn follower(params: EnvelopeParams) -> EnvelopeFollower {
        let mut follower = EnvelopeFollower::new(max_delay_samples(SAMPLE_RATE));
        follower.set_settings(EnvelopeSettings::from_params(SAMPLE_RATE, [params; 2]));
        follower
    }

    #[test]
    fn peak_converges_to_input_level() {
        let mut follower = follower(params(1.0, 10.0, Metric::Peak));

        let mut level = F64x2::default();
        for _ in 0..48_000 {
            level = follower.process_db(F64x2::new(0.1, -0.5));
        }

        approx::assert_relative_eq!(level[0], -20.0, epsilon = 1e-6);
        approx::assert_relative_eq!(level[1], util::gain_to_db(0.5), epsilon = 1e-6);
    }

    #[test]
    fn rms_of_sine() {
        let mut follower = follower(params(1.0, 10.0, Metric::Rms));

        let mut level = F64x2::default();
        for i in 0..96_000 {
            let sample = (i as f64 * std::f64::consts::TAU * 1000.0 / SAMPLE_RATE).sin();
            level = follower.process_db(F64x2::splat(sample));
        }

        // A full scale sine has an RMS level of -3.01 dB
        approx::assert_relative_eq!(level[0], -3.0103, epsilon = 0.1);
    }

    #[test]
    fn attack_is_faster_than_release() {
        let mut follower = follower(params(5.0, 500.0, Metric::Peak));

        // Rising from silence to 0 dB with a 5 ms attack should take roughly 5 ms
        let attack_samples = (0.005 * SAMPLE_RATE) as usize;
        for _ in 0..attack_samples * 10 {
            follower.process_db(F64x2::splat(1.0));
        }
        assert!(follower.level()[0] > -0.01);

        // Falling back to silence with a 500 ms release should still be close to 0 dB after the
        // same amount of time
        for _ in 0..attack_samples {
            follower.process_db(F64x2::splat(0.0));
        }
        let released = follower.level()[0];
        assert!(released < 0.0);
        assert!(released > -20.0, "Released too quickly: {released} dB");
    }

    #[test]
    fn channels_are_independent() {
        let mut follower = follower(params(1.0, 10.0, Metric::Peak));

        let mut level = F64x2::default();
        for _ in 0..4800 {
            level = follower.process_db(F64x2::new(1.0, 0.0));
        }

        assert!(level[0] > -0.01);
        approx::assert_relative_eq!(level[1], util::LEVEL_FLOOR_DB, epsilon = 1e-6);
    }

    #[test]
    fn attack_delay_postpones_the_reaction() {
        let mut params = params(20.0, 200.0, Metric::Peak);
        params.attack_delay = 0.25;
        let mut follower = follower(params);

        // 25% of 20 ms at 48 kHz
        let delay = follower.settings().attack_delay[0];
        assert_eq!(delay, 240);

        for _ in 0..delay {
            let level = follower.process_db(F64x2::splat(1.0));
            approx::assert_relative_eq!(level[0], util::LEVEL_FLOOR_DB, epsilon = 1e-3);
        }

        for _ in 0..10 {
            follower.process_db(F64x2::splat(1.0));
        }
        assert!(follower.level()[0] > util::LEVEL_FLOOR_DB + 1.0);
    }

    #[test]
    fn silence_stays_finite() {
        let mut follower = follower(params(0.1, 1.0, Metric::Rms));

        for _ in 0..1000 {
            let level = follower.process_db(F64x2::splat(0.0));
            assert!(level.is_finite());
            assert!(level[0] >= util::LEVEL_FLOOR_DB - 1e-9);
        }
    }

    #[test]
    fn reset_clears_state() {
        let mut follower = follower(params(1.0, 10.0, Metric::Peak));
        for _ in 0..1000 {
            follower.process_db(F64x2::splat(1.0));
        }

        follower.reset();
        assert_eq!(follower.level(), F64x2::splat(util::LEVEL_FLOOR_DB));
    }
}
