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

//! The block-level processing. [`Engine`] owns all DSP state, reads the parameters and knots at the
//! start of every block, and runs the signal through the oversampler and the
//! [`TopologyProcessor`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::envelope::{self, EnvelopeSettings};
use crate::meters::VuMeters;
use crate::oversampling::{
    Oversampler, OversamplingControl, OversamplingSettings, MAX_OVERSAMPLING_ORDER,
};
use crate::params::{ParamSnapshot, ParameterSource};
use crate::spline::{KnotSet, SplineSource};
use crate::topology::{ProcessingMode, Topology, TopologyProcessor};
use crate::util;

/// The settings the engine needs to allocate its buffers. Changing these requires calling
/// [`Engine::prepare()`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The host's sample rate.
    pub sample_rate: f64,
    /// The largest block the host will pass to [`Engine::process_block()`].
    pub max_block_size: usize,
    /// The highest oversampling order that can be requested at runtime. Memory for all stages up
    /// to this order is allocated up front.
    pub max_oversampling_order: usize,
    /// The oversampling settings used until something else is requested.
    pub oversampling: OversamplingSettings,
}

/// The audio engine. Parameters and knots are read through the [`ParameterSource`] and
/// [`SplineSource`] handles, and oversampling changes are requested through the
/// [`OversamplingControl`] handle from [`oversampling_control()`][Self::oversampling_control()].
pub struct Engine {
    params: Arc<dyn ParameterSource>,
    spline_source: Arc<dyn SplineSource>,
    oversampling_control: Arc<OversamplingControl>,
    meters: Arc<VuMeters>,

    config: EngineConfig,

    /// The main signal, at the host's sample rate.
    main_buffer: [Vec<f64>; 2],
    /// A copy of the main signal before the input gain is applied.
    dry_buffer: [Vec<f64>; 2],
    sidechain_buffer: [Vec<f64>; 2],

    main_oversampler: Oversampler,
    /// The dry signal runs through its own oversampler so it lines up with the processed signal.
    dry_oversampler: Oversampler,
    sidechain_oversampler: Oversampler,

    processor: TopologyProcessor,

    input_gain: Ramp,
    sidechain_input_gain: Ramp,
    output_gain: Ramp,
    wet: Ramp,

    /// The knots from the spline source, as last read.
    knots: KnotSet,
    /// The spline source's generation when `knots` was read.
    spline_generation: u32,

    /// The topology and mid/side setting from the last block. Changing either resets the engine.
    layout: (Topology, bool),
}

/// A per-channel gain or mix amount that follows its target with a one-pole filter at the host's
/// sample rate.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    value: [f64; 2],
}

/// A sample type [`Engine::process_block()`] accepts. All processing happens in double precision,
/// so these are only converted to and from `f64` at the block's edges.
pub trait Sample: Copy + Send + Sync + 'static {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

/// The values computed from a [`ParamSnapshot`] for a single block.
#[derive(Debug, Clone, Copy)]
struct BlockTargets {
    /// The smoothing coefficient at the host's sample rate.
    alpha: f64,
    input_gain: [f64; 2],
    output_gain: [f64; 2],
    wet: [f64; 2],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            max_block_size: 512,
            max_oversampling_order: MAX_OVERSAMPLING_ORDER,
            oversampling: OversamplingSettings::default(),
        }
    }
}

impl EngineConfig {
    /// This config with every field replaced by something usable. Every replaced value is logged
    /// as a warning.
    pub fn sanitized(self) -> Self {
        let sample_rate = if self.sample_rate.is_finite() && self.sample_rate > 0.0 {
            self.sample_rate
        } else {
            let fallback = Self::default().sample_rate;
            curv_warn!(
                "Invalid sample rate {}, using {} Hz instead",
                self.sample_rate,
                fallback
            );
            fallback
        };
        if self.max_block_size == 0 {
            curv_warn!("The maximum block size is zero, using a single sample instead");
        }
        let max_oversampling_order = self.max_oversampling_order.min(MAX_OVERSAMPLING_ORDER);
        if max_oversampling_order != self.max_oversampling_order {
            curv_warn!(
                "Oversampling order {} is not supported, limiting it to {}",
                self.max_oversampling_order,
                max_oversampling_order
            );
        }

        Self {
            sample_rate,
            max_block_size: self.max_block_size.max(1),
            max_oversampling_order,
            oversampling: self.oversampling.clamped(max_oversampling_order),
        }
    }
}

impl Sample for f32 {
    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Sample for f64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

impl Ramp {
    fn new(value: [f64; 2]) -> Self {
        Self { value }
    }

    #[inline]
    fn next(&mut self, channel: usize, target: f64, alpha: f64) -> f64 {
        let value = &mut self.value[channel];
        *value = target + alpha * (*value - target);

        *value
    }

    /// Multiply `buffers` by the ramp while it moves towards `target`.
    fn apply_gain(&mut self, target: [f64; 2], alpha: f64, buffers: [&mut [f64]; 2]) {
        for (channel, buffer) in buffers.into_iter().enumerate() {
            for sample in buffer {
                *sample *= self.next(channel, target[channel], alpha);
            }
        }
    }
}

impl Engine {
    pub fn new(
        params: Arc<dyn ParameterSource>,
        spline_source: Arc<dyn SplineSource>,
        config: EngineConfig,
    ) -> Self {
        let config = config.sanitized();
        let oversampling_control = Arc::new(OversamplingControl::new(config.oversampling, 0));

        Self::build(
            params,
            spline_source,
            oversampling_control,
            Arc::new(VuMeters::default()),
            config,
            config.oversampling,
        )
    }

    /// Reallocate everything for a new sample rate or maximum block size. The current oversampling
    /// settings are kept, and the engine is reset. This allocates, so it must not be called from
    /// the audio thread.
    pub fn prepare(&mut self, config: EngineConfig) {
        let settings = self.main_oversampler.settings();

        *self = Self::build(
            self.params.clone(),
            self.spline_source.clone(),
            self.oversampling_control.clone(),
            self.meters.clone(),
            config.sanitized(),
            settings,
        );
    }

    fn build(
        params: Arc<dyn ParameterSource>,
        spline_source: Arc<dyn SplineSource>,
        oversampling_control: Arc<OversamplingControl>,
        meters: Arc<VuMeters>,
        config: EngineConfig,
        settings: OversamplingSettings,
    ) -> Self {
        curv_log!(
            "Preparing for {} Hz with blocks of up to {} samples and up to {}x oversampling",
            config.sample_rate,
            config.max_block_size,
            1usize << config.max_oversampling_order
        );

        let max_order = config.max_oversampling_order;
        let settings = settings.clamped(max_order);
        let max_delay_samples =
            envelope::max_delay_samples(config.sample_rate * (1usize << max_order) as f64);

        let spline_generation = spline_source.generation();
        let knots = spline_source.knots();

        let buffer = || std::array::from_fn(|_| vec![0.0; config.max_block_size]);
        let oversampler = || Oversampler::new(config.max_block_size, max_order, settings);

        let mut engine = Self {
            params,
            spline_source,
            oversampling_control,
            meters,

            config,

            main_buffer: buffer(),
            dry_buffer: buffer(),
            sidechain_buffer: buffer(),

            main_oversampler: oversampler(),
            dry_oversampler: oversampler(),
            sidechain_oversampler: oversampler(),

            processor: TopologyProcessor::new(max_delay_samples, &knots),

            input_gain: Ramp::new([1.0; 2]),
            sidechain_input_gain: Ramp::new([1.0; 2]),
            output_gain: Ramp::new([1.0; 2]),
            wet: Ramp::new([1.0; 2]),

            knots,
            spline_generation,

            layout: (Topology::Forward, false),
        };

        engine.reset();
        engine
            .oversampling_control
            .publish_applied(settings, engine.main_oversampler.latency());

        engine
    }

    /// Clear all filters and delay lines, and jump to the current parameter values without
    /// smoothing.
    pub fn reset(&mut self) {
        let snapshot = self.params.snapshot().sanitized();
        self.reset_with(&snapshot);
    }

    fn reset_with(&mut self, snapshot: &ParamSnapshot) {
        let targets = self.update_block_settings(snapshot);
        self.update_spline();
        self.processor.reset(&self.knots);

        for oversampler in [
            &mut self.main_oversampler,
            &mut self.dry_oversampler,
            &mut self.sidechain_oversampler,
        ] {
            oversampler.reset();
        }

        self.input_gain = Ramp::new(targets.input_gain);
        self.sidechain_input_gain = Ramp::new(targets.input_gain);
        self.output_gain = Ramp::new(targets.output_gain);
        self.wet = Ramp::new(targets.wet);

        self.layout = (snapshot.topology, snapshot.mid_side);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A handle for changing the oversampling settings from another thread. Also used to read back
    /// the latency.
    pub fn oversampling_control(&self) -> Arc<OversamplingControl> {
        self.oversampling_control.clone()
    }

    /// The meters, for an editor to poll.
    pub fn meters(&self) -> Arc<VuMeters> {
        self.meters.clone()
    }

    /// The latency for the oversampling settings currently in use, in samples.
    pub fn latency_samples(&self) -> u32 {
        self.main_oversampler.latency()
    }

    /// Process a block of audio in place. `sidechain` is only used with [`Topology::SideChain`],
    /// and it should contain at least as many samples as `main`. Blocks longer than the maximum
    /// block size are replaced by silence. Both `f32` and `f64` buffers are accepted.
    pub fn process_block<S: Sample>(
        &mut self,
        main: [&mut [S]; 2],
        sidechain: Option<[&[S]; 2]>,
    ) {
        util::process_wrapper(|| self.process_block_inner(main, sidechain))
    }

    fn process_block_inner<S: Sample>(
        &mut self,
        main: [&mut [S]; 2],
        sidechain: Option<[&[S]; 2]>,
    ) {
        if let Some(settings) = self.oversampling_control.take_pending() {
            self.apply_oversampling_settings(settings);
        }

        let [main_left, main_right] = main;
        curv_debug_assert_eq!(main_left.len(), main_right.len());
        let num_samples = main_left.len().min(main_right.len());
        if num_samples == 0 {
            return;
        }
        if num_samples > self.config.max_block_size {
            curv_debug_assert_failure!(
                "Got a block of {} samples, the maximum block size is {}",
                num_samples,
                self.config.max_block_size
            );
            main_left.fill(S::from_f64(0.0));
            main_right.fill(S::from_f64(0.0));
            return;
        }

        let snapshot = self.params.snapshot().sanitized();
        if (snapshot.topology, snapshot.mid_side) != self.layout {
            self.reset_with(&snapshot);
        }

        let sidechain = sidechain.filter(|[left, right]| {
            left.len() >= num_samples && right.len() >= num_samples
        });
        let mode = ProcessingMode::resolve(snapshot.topology, sidechain.is_some());

        let targets = self.update_block_settings(&snapshot);
        let num_active_knots = self.update_spline();

        let wet_pass_needed = is_wet_pass_needed(targets.wet, self.wet.value);
        let bypassing = (!wet_pass_needed && self.wet.value[0] == 0.0) || num_active_knots == 0;

        // Everything from here on happens in double precision
        let [left, right] = &mut self.main_buffer;
        let (left, right) = (&mut left[..num_samples], &mut right[..num_samples]);
        copy_from_samples(left, main_left);
        copy_from_samples(right, main_right);
        if snapshot.mid_side {
            util::left_right_to_mid_side(left, right);
        }

        let [dry_left, dry_right] = &mut self.dry_buffer;
        let (dry_left, dry_right) = (&mut dry_left[..num_samples], &mut dry_right[..num_samples]);
        dry_left.copy_from_slice(left);
        dry_right.copy_from_slice(right);

        self.input_gain.apply_gain(
            targets.input_gain,
            targets.alpha,
            [&mut *left, &mut *right],
        );

        let num_upsampled_samples = self.main_oversampler.upsample([&*left, &*right]);
        self.dry_oversampler.upsample([&*dry_left, &*dry_right]);
        if num_upsampled_samples == 0 {
            main_left.fill(S::from_f64(0.0));
            main_right.fill(S::from_f64(0.0));
            return;
        }

        if let (true, Some([sidechain_left, sidechain_right])) = (mode.uses_sidechain(), sidechain)
        {
            let [left, right] = &mut self.sidechain_buffer;
            let (left, right) = (&mut left[..num_samples], &mut right[..num_samples]);
            copy_from_samples(left, &sidechain_left[..num_samples]);
            copy_from_samples(right, &sidechain_right[..num_samples]);
            if snapshot.mid_side {
                util::left_right_to_mid_side(left, right);
            }

            self.sidechain_input_gain.apply_gain(
                targets.input_gain,
                targets.alpha,
                [&mut *left, &mut *right],
            );
            self.sidechain_oversampler.upsample([&*left, &*right]);
        }

        if !bypassing {
            let sidechain = if mode.uses_sidechain() {
                let [left, right] = self.sidechain_oversampler.upsampled();
                Some([&*left, &*right])
            } else {
                None
            };

            self.processor.process(
                mode,
                snapshot.high_pass_order,
                self.main_oversampler.upsampled(),
                sidechain,
            );
        }

        let [left, right] = &mut self.main_buffer;
        let (left, right) = (&mut left[..num_samples], &mut right[..num_samples]);
        self.main_oversampler.downsample([left, right]);
        let [dry_left, dry_right] = &mut self.dry_buffer;
        let (dry_left, dry_right) = (&mut dry_left[..num_samples], &mut dry_right[..num_samples]);
        self.dry_oversampler.downsample([dry_left, dry_right]);

        for (channel, (output, dry)) in [(&mut *left, &*dry_left), (&mut *right, &*dry_right)]
            .into_iter()
            .enumerate()
        {
            let output_gain = targets.output_gain[channel];
            let wet = targets.wet[channel];

            if bypassing {
                output.copy_from_slice(dry);
            } else if wet_pass_needed {
                for (output, dry) in output.iter_mut().zip(dry.iter()) {
                    let gain = self.output_gain.next(channel, output_gain, targets.alpha);
                    let amount = self.wet.next(channel, wet, targets.alpha);
                    *output = mix(gain * *output, *dry, amount);
                }
            } else {
                for output in output.iter_mut() {
                    *output *= self.output_gain.next(channel, output_gain, targets.alpha);
                }
            }
        }

        if snapshot.mid_side {
            util::mid_side_to_left_right(left, right);
        }
        copy_to_samples(main_left, left);
        copy_to_samples(main_right, right);

        let level_meter = self.processor.level_meter();
        let gain_meter = self.processor.gain_meter();
        self.meters.publish(level_meter, gain_meter);
    }

    /// Switch all oversamplers to `settings` and reset everything, since all coefficients depend
    /// on the oversampled rate.
    fn apply_oversampling_settings(&mut self, settings: OversamplingSettings) {
        let settings = settings.clamped(self.config.max_oversampling_order);
        for oversampler in [
            &mut self.main_oversampler,
            &mut self.dry_oversampler,
            &mut self.sidechain_oversampler,
        ] {
            oversampler.set_settings(settings);
        }

        self.reset();
        self.oversampling_control
            .publish_applied(settings, self.main_oversampler.latency());
    }

    /// Update the topology processor's coefficients from `snapshot` and compute this block's gain
    /// and mix targets.
    fn update_block_settings(&mut self, snapshot: &ParamSnapshot) -> BlockTargets {
        let sample_rate = self.config.sample_rate;
        let upsampled_rate = sample_rate * self.main_oversampler.factor() as f64;
        let smoothing_time_ms = snapshot.smoothing_time_ms;

        let upsampled_alpha = util::time_constant_alpha(
            util::angular_frequency_coef(upsampled_rate),
            smoothing_time_ms,
        );
        let stereo_link = snapshot.stereo_link / 100.0;
        let feedback = snapshot.feedback.map(|percent| percent / 100.0);
        let high_pass_cutoffs = snapshot.high_pass_cutoff_hz.resolved();
        let envelope_settings =
            EnvelopeSettings::from_params(upsampled_rate, snapshot.envelope_params());

        let processor = &mut self.processor;
        processor.set_automation_alpha(upsampled_alpha);
        processor.set_stereo_link_target(stereo_link);
        processor.set_feedback_amount_target(feedback);
        processor.set_high_pass_frequencies(upsampled_rate, high_pass_cutoffs);
        processor.set_envelope_settings(envelope_settings);

        BlockTargets {
            alpha: util::time_constant_alpha(
                util::angular_frequency_coef(sample_rate),
                smoothing_time_ms,
            ),
            input_gain: snapshot.input_gain_db.map(util::db_to_gain),
            output_gain: snapshot.output_gain_db.map(util::db_to_gain),
            wet: snapshot.wet.map(|percent| percent / 100.0),
        }
    }

    /// Pick up knot edits. Returns the number of enabled knots.
    fn update_spline(&mut self) -> usize {
        let generation = self.spline_source.generation();
        if generation != self.spline_generation {
            self.knots = self.spline_source.knots();
            self.spline_generation = generation;
            self.processor.spline_mut().retarget(&self.knots);
        }

        self.processor.spline().num_active()
    }
}

/// Whether the dry signal needs to be mixed in. This is not needed when both the current and the
/// target wet amounts are at 100%, or when they're all at 0% since the dry signal is used as is
/// then.
fn is_wet_pass_needed(target: [f64; 2], current: [f64; 2]) -> bool {
    let product = target[0] * target[1] * current[0] * current[1];
    if product == 1.0 {
        false
    } else if product == 0.0 {
        !(target == [0.0; 2] && current == [0.0; 2])
    } else {
        true
    }
}

/// Cross-fade between the processed and the dry signal. This results in exactly `wet` when
/// `amount` is one.
#[inline]
fn mix(wet: f64, dry: f64, amount: f64) -> f64 {
    wet * amount + dry * (1.0 - amount)
}

fn copy_from_samples<S: Sample>(destination: &mut [f64], source: &[S]) {
    for (destination, source) in destination.iter_mut().zip(source) {
        *destination = source.to_f64();
    }
}

fn copy_to_samples<S: Sample>(destination: &mut [S], source: &[f64]) {
    for (destination, source) in destination.iter_mut().zip(source) {
        *destination = S::from_f64(*source);
    }
}
