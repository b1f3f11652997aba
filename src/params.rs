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

//! The engine's parameters. The engine reads a [`ParamSnapshot`] from a [`ParameterSource`] once at
//! the start of every block. [`SharedParams`] is a lock-free implementation that can be written to
//! from any thread.

use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::envelope::{EnvelopeParams, Metric};
use crate::filter::MAX_HIGH_PASS_ORDER;
use crate::topology::Topology;

/// The range and default value for a numeric parameter. Both ends of the range are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

pub const SMOOTHING_TIME_MS: ParamRange = ParamRange::new(0.0, 500.0, 50.0);
pub const STEREO_LINK_PERCENT: ParamRange = ParamRange::new(0.0, 100.0, 50.0);
pub const HIGH_PASS_CUTOFF_HZ: ParamRange = ParamRange::new(5.0, 500.0, 20.0);
pub const GAIN_DB: ParamRange = ParamRange::new(-48.0, 48.0, 0.0);
pub const WET_PERCENT: ParamRange = ParamRange::new(0.0, 100.0, 100.0);
pub const FEEDBACK_PERCENT: ParamRange = ParamRange::new(0.0, 100.0, 100.0);
pub const ATTACK_MS: ParamRange = ParamRange::new(0.1, 2000.0, 20.0);
pub const RELEASE_MS: ParamRange = ParamRange::new(1.0, 2000.0, 200.0);
pub const DELAY_PERCENT: ParamRange = ParamRange::new(0.0, 25.0, 0.0);
pub const RMS_TIME_MS: ParamRange = ParamRange::new(0.0, 2000.0, 10.0);

/// A per-channel parameter. When `linked` is set both channels use the first channel's value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Linked<T> {
    pub linked: bool,
    pub values: [T; 2],
}

const NUM_CHANNEL_PARAMS: usize = 10;

/// The per-channel numeric parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelParam {
    InputGain,
    OutputGain,
    Wet,
    Feedback,
    Attack,
    Release,
    AttackDelay,
    ReleaseDelay,
    RmsTime,
    HighPassCutoff,
}

/// The values of all parameters at one point in time. Percentages are stored as percentages and
/// gains in decibels, the engine converts them when it reads the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSnapshot {
    pub topology: Topology,
    /// Process the mid and side channels instead of left and right.
    pub mid_side: bool,
    /// The time constant used to smooth knot edits, the stereo link, and the gain changes.
    pub smoothing_time_ms: f64,
    pub stereo_link: f64,
    /// The number of one-pole high-pass sections in front of the envelope follower.
    pub high_pass_order: usize,
    pub high_pass_cutoff_hz: Linked<f64>,

    pub input_gain_db: Linked<f64>,
    pub output_gain_db: Linked<f64>,
    pub wet: Linked<f64>,
    pub feedback: Linked<f64>,

    pub attack_ms: Linked<f64>,
    pub release_ms: Linked<f64>,
    /// A percentage of the attack time.
    pub attack_delay: Linked<f64>,
    /// A percentage of the release time.
    pub release_delay: Linked<f64>,
    pub rms_time_ms: Linked<f64>,
    pub metric: Linked<Metric>,
}

/// Provides the parameter values to the engine.
pub trait ParameterSource: Send + Sync {
    fn snapshot(&self) -> ParamSnapshot;
}

/// A [`ParameterSource`] storing every parameter in an atomic so it can be modified while the
/// engine is running. Values are clamped to their ranges when they're set.
#[derive(Debug)]
pub struct SharedParams {
    topology: AtomicU32,
    mid_side: AtomicBool,
    smoothing_time_ms: AtomicF32,
    stereo_link: AtomicF32,
    high_pass_order: AtomicU32,

    /// Indexed by [`ChannelParam`].
    channel_params: [AtomicLinked; NUM_CHANNEL_PARAMS],
    metric_linked: AtomicBool,
    /// Whether each channel uses [`Metric::Rms`].
    metric_rms: [AtomicBool; 2],
}

#[derive(Debug)]
struct AtomicLinked {
    linked: AtomicBool,
    values: [AtomicF32; 2],
}

impl ParamRange {
    pub const fn new(min: f64, max: f64, default: f64) -> Self {
        Self { min, max, default }
    }

    /// Clamp `value` to the range. Values that aren't finite are replaced by the default.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_finite() {
            value.clamp(self.min, self.max)
        } else {
            self.default
        }
    }

    /// Map a plain value to `[0, 1]`.
    pub fn normalize(&self, plain: f64) -> f64 {
        (self.clamp(plain) - self.min) / (self.max - self.min)
    }

    /// The inverse of [`normalize()`][Self::normalize()].
    pub fn unnormalize(&self, normalized: f64) -> f64 {
        self.clamp(self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min))
    }
}

impl<T: Copy> Linked<T> {
    /// Both channels set to `value`, linked.
    pub const fn linked(value: T) -> Self {
        Self {
            linked: true,
            values: [value, value],
        }
    }

    /// The value for `channel`, taking the link into account.
    pub fn get(&self, channel: usize) -> T {
        if self.linked {
            self.values[0]
        } else {
            self.values[channel]
        }
    }

    /// The effective values for both channels.
    pub fn resolved(&self) -> [T; 2] {
        [self.get(0), self.get(1)]
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> [U; 2] {
        self.resolved().map(f)
    }
}

impl ChannelParam {
    pub const ALL: [ChannelParam; NUM_CHANNEL_PARAMS] = [
        ChannelParam::InputGain,
        ChannelParam::OutputGain,
        ChannelParam::Wet,
        ChannelParam::Feedback,
        ChannelParam::Attack,
        ChannelParam::Release,
        ChannelParam::AttackDelay,
        ChannelParam::ReleaseDelay,
        ChannelParam::RmsTime,
        ChannelParam::HighPassCutoff,
    ];

    pub fn range(&self) -> ParamRange {
        match self {
            ChannelParam::InputGain | ChannelParam::OutputGain => GAIN_DB,
            ChannelParam::Wet => WET_PERCENT,
            ChannelParam::Feedback => FEEDBACK_PERCENT,
            ChannelParam::Attack => ATTACK_MS,
            ChannelParam::Release => RELEASE_MS,
            ChannelParam::AttackDelay | ChannelParam::ReleaseDelay => DELAY_PERCENT,
            ChannelParam::RmsTime => RMS_TIME_MS,
            ChannelParam::HighPassCutoff => HIGH_PASS_CUTOFF_HZ,
        }
    }
}

impl Default for ParamSnapshot {
    fn default() -> Self {
        Self {
            topology: Topology::Forward,
            mid_side: false,
            smoothing_time_ms: SMOOTHING_TIME_MS.default,
            stereo_link: STEREO_LINK_PERCENT.default,
            high_pass_order: 0,
            high_pass_cutoff_hz: Linked::linked(HIGH_PASS_CUTOFF_HZ.default),

            input_gain_db: Linked::linked(GAIN_DB.default),
            output_gain_db: Linked::linked(GAIN_DB.default),
            wet: Linked::linked(WET_PERCENT.default),
            feedback: Linked::linked(FEEDBACK_PERCENT.default),

            attack_ms: Linked::linked(ATTACK_MS.default),
            release_ms: Linked::linked(RELEASE_MS.default),
            attack_delay: Linked::linked(DELAY_PERCENT.default),
            release_delay: Linked::linked(DELAY_PERCENT.default),
            rms_time_ms: Linked::linked(RMS_TIME_MS.default),
            metric: Linked::linked(Metric::Peak),
        }
    }
}

impl ParamSnapshot {
    pub fn channel(&self, param: ChannelParam) -> &Linked<f64> {
        match param {
            ChannelParam::InputGain => &self.input_gain_db,
            ChannelParam::OutputGain => &self.output_gain_db,
            ChannelParam::Wet => &self.wet,
            ChannelParam::Feedback => &self.feedback,
            ChannelParam::Attack => &self.attack_ms,
            ChannelParam::Release => &self.release_ms,
            ChannelParam::AttackDelay => &self.attack_delay,
            ChannelParam::ReleaseDelay => &self.release_delay,
            ChannelParam::RmsTime => &self.rms_time_ms,
            ChannelParam::HighPassCutoff => &self.high_pass_cutoff_hz,
        }
    }

    pub fn channel_mut(&mut self, param: ChannelParam) -> &mut Linked<f64> {
        match param {
            ChannelParam::InputGain => &mut self.input_gain_db,
            ChannelParam::OutputGain => &mut self.output_gain_db,
            ChannelParam::Wet => &mut self.wet,
            ChannelParam::Feedback => &mut self.feedback,
            ChannelParam::Attack => &mut self.attack_ms,
            ChannelParam::Release => &mut self.release_ms,
            ChannelParam::AttackDelay => &mut self.attack_delay,
            ChannelParam::ReleaseDelay => &mut self.release_delay,
            ChannelParam::RmsTime => &mut self.rms_time_ms,
            ChannelParam::HighPassCutoff => &mut self.high_pass_cutoff_hz,
        }
    }

    /// This snapshot with every value clamped to its range. Snapshots from a [`ParameterSource`]
    /// that isn't a [`SharedParams`] may contain anything.
    pub fn sanitized(mut self) -> Self {
        self.smoothing_time_ms = SMOOTHING_TIME_MS.clamp(self.smoothing_time_ms);
        self.stereo_link = STEREO_LINK_PERCENT.clamp(self.stereo_link);
        self.high_pass_order = self.high_pass_order.min(MAX_HIGH_PASS_ORDER);
        for param in ChannelParam::ALL {
            let range = param.range();
            let linked = self.channel_mut(param);
            linked.values = linked.values.map(|value| range.clamp(value));
        }

        self
    }

    /// The envelope follower parameters for both channels. The delays are converted to fractions
    /// of the time constants.
    pub fn envelope_params(&self) -> [EnvelopeParams; 2] {
        [0, 1].map(|channel| EnvelopeParams {
            attack_ms: self.attack_ms.get(channel),
            release_ms: self.release_ms.get(channel),
            attack_delay: self.attack_delay.get(channel) / 100.0,
            release_delay: self.release_delay.get(channel) / 100.0,
            rms_time_ms: self.rms_time_ms.get(channel),
            metric: self.metric.get(channel),
        })
    }
}

impl Default for SharedParams {
    fn default() -> Self {
        Self::new(&ParamSnapshot::default())
    }
}

impl SharedParams {
    pub fn new(snapshot: &ParamSnapshot) -> Self {
        let params = Self {
            topology: AtomicU32::new(0),
            mid_side: AtomicBool::new(false),
            smoothing_time_ms: AtomicF32::new(0.0),
            stereo_link: AtomicF32::new(0.0),
            high_pass_order: AtomicU32::new(0),

            channel_params: std::array::from_fn(|_| AtomicLinked {
                linked: AtomicBool::new(true),
                values: [AtomicF32::new(0.0), AtomicF32::new(0.0)],
            }),
            metric_linked: AtomicBool::new(true),
            metric_rms: [AtomicBool::new(false), AtomicBool::new(false)],
        };
        params.restore(snapshot);

        params
    }

    /// Overwrite every parameter with the values from `snapshot`, for instance when loading state.
    pub fn restore(&self, snapshot: &ParamSnapshot) {
        self.set_topology(snapshot.topology);
        self.set_mid_side(snapshot.mid_side);
        self.set_smoothing_time_ms(snapshot.smoothing_time_ms);
        self.set_stereo_link(snapshot.stereo_link);
        self.set_high_pass_order(snapshot.high_pass_order);

        for param in ChannelParam::ALL {
            let linked = snapshot.channel(param);
            self.set_linked(param, linked.linked);
            self.set_channel(param, 0, linked.values[0]);
            self.set_channel(param, 1, linked.values[1]);
        }

        self.set_metric_linked(snapshot.metric.linked);
        self.set_metric(0, snapshot.metric.values[0]);
        self.set_metric(1, snapshot.metric.values[1]);
    }

    pub fn set_topology(&self, topology: Topology) {
        let index = match topology {
            Topology::Forward => 0,
            Topology::Feedback => 1,
            Topology::SideChain => 2,
        };
        self.topology.store(index, Ordering::Relaxed);
    }

    pub fn set_mid_side(&self, mid_side: bool) {
        self.mid_side.store(mid_side, Ordering::Relaxed);
    }

    pub fn set_smoothing_time_ms(&self, time_ms: f64) {
        self.smoothing_time_ms
            .store(SMOOTHING_TIME_MS.clamp(time_ms) as f32, Ordering::Relaxed);
    }

    /// The stereo link as a percentage.
    pub fn set_stereo_link(&self, percent: f64) {
        self.stereo_link
            .store(STEREO_LINK_PERCENT.clamp(percent) as f32, Ordering::Relaxed);
    }

    pub fn set_high_pass_order(&self, order: usize) {
        self.high_pass_order
            .store(order.min(MAX_HIGH_PASS_ORDER) as u32, Ordering::Relaxed);
    }

    /// Set a channel's value for a per-channel parameter.
    ///
    /// # Panics
    ///
    /// Panics if `channel` is not 0 or 1.
    pub fn set_channel(&self, param: ChannelParam, channel: usize, value: f64) {
        self.channel_params[param as usize].values[channel]
            .store(param.range().clamp(value) as f32, Ordering::Relaxed);
    }

    pub fn set_linked(&self, param: ChannelParam, linked: bool) {
        self.channel_params[param as usize]
            .linked
            .store(linked, Ordering::Relaxed);
    }

    /// # Panics
    ///
    /// Panics if `channel` is not 0 or 1.
    pub fn set_metric(&self, channel: usize, metric: Metric) {
        self.metric_rms[channel].store(metric == Metric::Rms, Ordering::Relaxed);
    }

    pub fn set_metric_linked(&self, linked: bool) {
        self.metric_linked.store(linked, Ordering::Relaxed);
    }
}

impl ParameterSource for SharedParams {
    fn snapshot(&self) -> ParamSnapshot {
        let mut snapshot = ParamSnapshot {
            topology: match self.topology.load(Ordering::Relaxed) {
                1 => Topology::Feedback,
                2 => Topology::SideChain,
                _ => Topology::Forward,
            },
            mid_side: self.mid_side.load(Ordering::Relaxed),
            smoothing_time_ms: self.smoothing_time_ms.load(Ordering::Relaxed) as f64,
            stereo_link: self.stereo_link.load(Ordering::Relaxed) as f64,
            high_pass_order: self.high_pass_order.load(Ordering::Relaxed) as usize,
            metric: Linked {
                linked: self.metric_linked.load(Ordering::Relaxed),
                values: [0, 1].map(|channel| {
                    if self.metric_rms[channel].load(Ordering::Relaxed) {
                        Metric::Rms
                    } else {
                        Metric::Peak
                    }
                }),
            },
            ..ParamSnapshot::default()
        };

        for param in ChannelParam::ALL {
            let atomic = &self.channel_params[param as usize];
            *snapshot.channel_mut(param) = Linked {
                linked: atomic.linked.load(Ordering::Relaxed),
                values: [
                    atomic.values[0].load(Ordering::Relaxed) as f64,
                    atomic.values[1].load(Ordering::Relaxed) as f64,
                ],
            };
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linked_values() {
        let mut linked = Linked {
            linked: false,
            values: [1.0, 2.0],
        };
        assert_eq!(linked.resolved(), [1.0, 2.0]);

        linked.linked = true;
        assert_eq!(linked.get(1), 1.0);
        assert_eq!(linked.map(|value| value * 2.0), [2.0, 2.0]);
    }

    #[test]
    fn ranges() {
        assert_eq!(GAIN_DB.clamp(100.0), 48.0);
        assert_eq!(GAIN_DB.clamp(f64::NAN), 0.0);
        assert_eq!(WET_PERCENT.normalize(50.0), 0.5);
        assert_eq!(WET_PERCENT.unnormalize(0.25), 25.0);
        assert_eq!(ATTACK_MS.unnormalize(0.0), 0.1);
    }

    #[test]
    fn shared_params_round_trip() {
        let mut snapshot = ParamSnapshot {
            topology: Topology::SideChain,
            mid_side: true,
            smoothing_time_ms: 125.0,
            stereo_link: 25.0,
            high_pass_order: 2,
            ..ParamSnapshot::default()
        };
        snapshot.input_gain_db = Linked {
            linked: false,
            values: [-6.0, 3.5],
        };
        snapshot.metric = Linked {
            linked: false,
            values: [Metric::Rms, Metric::Peak],
        };

        let params = SharedParams::new(&snapshot);
        assert_eq!(params.snapshot(), snapshot);
    }

    #[test]
    fn shared_params_clamp() {
        let params = SharedParams::default();
        params.set_channel(ChannelParam::Attack, 1, 0.0);
        params.set_channel(ChannelParam::Wet, 0, 250.0);
        params.set_high_pass_order(12);

        let snapshot = params.snapshot();
        assert_eq!(snapshot.attack_ms.values[1] as f32, 0.1);
        assert_eq!(snapshot.wet.values[0], 100.0);
        assert_eq!(snapshot.high_pass_order, MAX_HIGH_PASS_ORDER);
    }

    #[test]
    fn sanitize_snapshot() {
        let mut snapshot = ParamSnapshot {
            stereo_link: -20.0,
            high_pass_order: 7,
            ..ParamSnapshot::default()
        };
        snapshot.release_ms.values[0] = f64::INFINITY;

        let snapshot = snapshot.sanitized();
        assert_eq!(snapshot.stereo_link, 0.0);
        assert_eq!(snapshot.high_pass_order, MAX_HIGH_PASS_ORDER);
        assert_eq!(snapshot.release_ms.values[0], RELEASE_MS.default);
    }

    #[test]
    fn envelope_params_follow_links() {
        let mut snapshot = ParamSnapshot::default();
        snapshot.attack_ms = Linked {
            linked: true,
            values: [5.0, 50.0],
        };
        snapshot.attack_delay = Linked {
            linked: false,
            values: [10.0, 20.0],
        };

        let params = snapshot.envelope_params();
        assert_eq!(params[1].attack_ms, 5.0);
        assert_eq!(params[0].attack_delay, 0.1);
        assert_eq!(params[1].attack_delay, 0.2);
    }
}
