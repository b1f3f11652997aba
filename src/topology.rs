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

//! The per-sample gain computation at the oversampled rate. The three topologies only differ in
//! what the envelope follower listens to: the input signal, the previous output sample, or an
//! external side-chain input.

use serde::{Deserialize, Serialize};

use crate::envelope::{EnvelopeFollower, EnvelopeSettings};
use crate::filter::HighPassCascade;
use crate::simd::F64x2;
use crate::spline::{AutoSpline, KnotSet};
use crate::util;

/// Where the envelope follower gets its input from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// The detector listens to the (input gain adjusted) input.
    #[default]
    Forward,
    /// The detector listens to the processor's own output from the previous sample.
    Feedback,
    /// The detector listens to the side-chain input.
    SideChain,
}

/// The topology that's actually used for a block. This is [`Topology`] with an additional state
/// for when the side-chain topology is selected but the host doesn't provide a side-chain input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    Forward,
    Feedback,
    SideChain,
    /// The signal passes through without any gain being applied.
    EmptySideChain,
}

/// The state for the per-sample processing that persists between blocks.
#[derive(Debug)]
pub struct TopologyProcessor {
    envelope: EnvelopeFollower,
    high_pass: HighPassCascade,
    spline: AutoSpline,

    /// The one-pole coefficient used for the stereo link, the feedback amount, the meters, and the
    /// spline automation.
    automation_alpha: f64,

    /// How much both channels' levels are pulled towards their mean, in `[0, 1]`.
    stereo_link: f64,
    stereo_link_target: f64,

    /// How much of the previous output is blended into the detector's input in the feedback
    /// topology, in `[0, 1]`.
    feedback_amount: F64x2,
    feedback_amount_target: F64x2,
    /// The last output sample, used by the feedback topology.
    feedback_sample: F64x2,

    level_meter: F64x2,
    gain_meter: F64x2,
}

/// Provides the envelope follower's input for every sample. Each topology implements this
/// differently, the rest of the processing is shared.
trait DetectorInput {
    /// The detector's input for the sample at `sample_idx` in the current block. `input` is the
    /// main input for that sample.
    fn next(&mut self, sample_idx: usize, input: F64x2) -> F64x2;

    /// Called with the output for every sample after the gain has been applied.
    #[inline]
    fn output(&mut self, _output: F64x2) {}
}

struct ForwardInput;

struct FeedbackInput {
    alpha: F64x2,
    amount: F64x2,
    amount_target: F64x2,
    previous_output: F64x2,
}

struct SideChainInput<'a> {
    left: &'a [f64],
    right: &'a [f64],
}

impl ProcessingMode {
    /// Determine the processing mode for a block.
    pub fn resolve(topology: Topology, sidechain_available: bool) -> Self {
        match (topology, sidechain_available) {
            (Topology::Forward, _) => ProcessingMode::Forward,
            (Topology::Feedback, _) => ProcessingMode::Feedback,
            (Topology::SideChain, true) => ProcessingMode::SideChain,
            (Topology::SideChain, false) => ProcessingMode::EmptySideChain,
        }
    }

    /// Whether the envelope follower listens to a separate side-chain signal in this mode.
    pub fn uses_sidechain(&self) -> bool {
        matches!(self, ProcessingMode::SideChain)
    }
}

impl DetectorInput for ForwardInput {
    #[inline]
    fn next(&mut self, _sample_idx: usize, input: F64x2) -> F64x2 {
        input
    }
}

impl DetectorInput for FeedbackInput {
    #[inline]
    fn next(&mut self, _sample_idx: usize, input: F64x2) -> F64x2 {
        self.amount = self.amount_target + self.alpha * (self.amount - self.amount_target);

        input + self.amount * (self.previous_output - input)
    }

    #[inline]
    fn output(&mut self, output: F64x2) {
        self.previous_output = output;
    }
}

impl DetectorInput for SideChainInput<'_> {
    #[inline]
    fn next(&mut self, sample_idx: usize, _input: F64x2) -> F64x2 {
        F64x2::new(self.left[sample_idx], self.right[sample_idx])
    }
}

impl TopologyProcessor {
    /// Create a processor whose envelope follower can delay its input by up to
    /// `max_delay_samples`. See [`envelope::max_delay_samples()`][crate::envelope::max_delay_samples()].
    pub fn new(max_delay_samples: usize, knots: &KnotSet) -> Self {
        Self {
            envelope: EnvelopeFollower::new(max_delay_samples),
            high_pass: HighPassCascade::default(),
            spline: AutoSpline::new(knots),

            automation_alpha: 0.0,

            stereo_link: 0.0,
            stereo_link_target: 0.0,

            feedback_amount: F64x2::splat(0.0),
            feedback_amount_target: F64x2::splat(0.0),
            feedback_sample: F64x2::splat(0.0),

            level_meter: F64x2::splat(util::LEVEL_FLOOR_DB),
            gain_meter: F64x2::splat(0.0),
        }
    }

    /// Clear all filter state and jump to the current targets.
    pub fn reset(&mut self, knots: &KnotSet) {
        self.envelope.reset();
        self.high_pass.reset();
        self.spline.reset(knots);

        self.stereo_link = self.stereo_link_target;
        self.feedback_amount = self.feedback_amount_target;
        self.feedback_sample = F64x2::splat(0.0);

        self.level_meter = F64x2::splat(util::LEVEL_FLOOR_DB);
        self.gain_meter = F64x2::splat(0.0);
    }

    pub fn set_automation_alpha(&mut self, alpha: f64) {
        self.automation_alpha = alpha;
        self.spline.set_smoothing_alpha(alpha);
    }

    pub fn set_envelope_settings(&mut self, settings: EnvelopeSettings) {
        self.envelope.set_settings(settings);
    }

    /// Set the detector's high-pass cutoff frequencies. `sample_rate` is the oversampled rate.
    pub fn set_high_pass_frequencies(&mut self, sample_rate: f64, frequencies: [f64; 2]) {
        self.high_pass.set_frequencies(sample_rate, frequencies);
    }

    /// The stereo link amount in `[0, 1]`.
    pub fn set_stereo_link_target(&mut self, amount: f64) {
        self.stereo_link_target = amount.clamp(0.0, 1.0);
    }

    /// The feedback amount per channel in `[0, 1]`.
    pub fn set_feedback_amount_target(&mut self, amount: [f64; 2]) {
        self.feedback_amount_target = F64x2::from(amount).map(|amount| amount.clamp(0.0, 1.0));
    }

    pub fn spline(&self) -> &AutoSpline {
        &self.spline
    }

    /// Used to pick up knot edits between blocks.
    pub fn spline_mut(&mut self) -> &mut AutoSpline {
        &mut self.spline
    }

    /// The smoothed detected level per channel in decibels.
    pub fn level_meter(&self) -> [f64; 2] {
        self.level_meter.0
    }

    /// The smoothed gain correction per channel in decibels.
    pub fn gain_meter(&self) -> [f64; 2] {
        self.gain_meter.0
    }

    /// Apply the transfer curve to `io` in place. `io` is at the oversampled rate, and so is
    /// `sidechain` which is only used in [`ProcessingMode::SideChain`].
    ///
    /// # Panics
    ///
    /// Panics if `high_pass_order` is larger than
    /// [`MAX_HIGH_PASS_ORDER`][crate::filter::MAX_HIGH_PASS_ORDER].
    pub fn process(
        &mut self,
        mode: ProcessingMode,
        high_pass_order: usize,
        io: [&mut [f64]; 2],
        sidechain: Option<[&[f64]; 2]>,
    ) {
        curv_debug_assert_eq!(io[0].len(), io[1].len());

        match (mode, sidechain) {
            (ProcessingMode::Forward, _) => {
                self.process_with_order(high_pass_order, io, ForwardInput);
            }
            (ProcessingMode::Feedback, _) => {
                let feedback = self.process_with_order(
                    high_pass_order,
                    io,
                    FeedbackInput {
                        alpha: F64x2::splat(self.automation_alpha),
                        amount: self.feedback_amount,
                        amount_target: self.feedback_amount_target,
                        previous_output: self.feedback_sample,
                    },
                );

                self.feedback_amount = feedback.amount;
                self.feedback_sample = feedback.previous_output;
            }
            (ProcessingMode::SideChain, Some([left, right])) => {
                let len = io[0].len();
                curv_debug_assert!(left.len() >= len && right.len() >= len);
                if left.len() < len || right.len() < len {
                    return;
                }

                self.process_with_order(high_pass_order, io, SideChainInput { left, right });
            }
            (ProcessingMode::SideChain, None) => {
                curv_debug_assert_failure!("Side-chain processing without a side-chain input");
            }
            (ProcessingMode::EmptySideChain, _) => (),
        }

        self.spline.settle();
    }

    fn process_with_order<D: DetectorInput>(
        &mut self,
        high_pass_order: usize,
        io: [&mut [f64]; 2],
        detector: D,
    ) -> D {
        match high_pass_order {
            0 => self.process_samples::<0, D>(io, detector),
            1 => self.process_samples::<1, D>(io, detector),
            2 => self.process_samples::<2, D>(io, detector),
            3 => self.process_samples::<3, D>(io, detector),
            order => unreachable!("Unsupported high-pass order {order}"),
        }
    }

    fn process_samples<const HIGH_PASS_ORDER: usize, D: DetectorInput>(
        &mut self,
        io: [&mut [f64]; 2],
        mut detector: D,
    ) -> D {
        let alpha = self.automation_alpha;
        let meter_alpha = F64x2::splat(alpha);
        let stereo_link_target = self.stereo_link_target;
        let mut stereo_link = self.stereo_link;
        let mut level_meter = self.level_meter;
        let mut gain_meter = self.gain_meter;

        let [left, right] = io;
        for (sample_idx, (left, right)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let input = F64x2::new(*left, *right);

            let detector_input = detector.next(sample_idx, input);
            let detector_input = self.high_pass.process::<HIGH_PASS_ORDER>(detector_input);
            let level = self.envelope.process_db(detector_input);

            // Both levels are pulled towards their mean in the log domain
            stereo_link = stereo_link_target + alpha * (stereo_link - stereo_link_target);
            let mean = F64x2::splat(0.5) * (level + level.swapped());
            let level = level + F64x2::splat(stereo_link) * (mean - level);
            level_meter = level + meter_alpha * (level_meter - level);

            self.spline.automate();
            let gain_db = F64x2::new(
                gain_correction(&self.spline, level[0]),
                gain_correction(&self.spline, level[1]),
            );
            gain_meter = gain_db + meter_alpha * (gain_meter - gain_db);

            let output = input * gain_db.map(util::db_to_gain);
            detector.output(output);

            *left = output[0];
            *right = output[1];
        }

        self.stereo_link = stereo_link;
        self.level_meter = level_meter;
        self.gain_meter = gain_meter;

        detector
    }
}

/// The difference between the curve's output and its input at `level_db`. Signals below
/// [`util::MINUS_INFINITY_DB`] are never boosted, otherwise the noise floor would be amplified.
#[inline]
fn gain_correction(spline: &AutoSpline, level_db: f64) -> f64 {
    let correction = spline.evaluate(level_db) - level_db;
    if level_db < util::MINUS_INFINITY_DB {
        correction.min(0.0)
    } else {
        correction
    }
}
