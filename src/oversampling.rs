// Curvature: a stereo dynamics processor with a freely drawn transfer curve
// Copyright (C) 2023-2024 Robbert van der Helm
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

//! Multi-stage 2x oversampling for a stereo signal, and the lock-free handle used to change the
//! oversampling settings from another thread.
//!
//! Every oversampling stage doubles the sample rate. The stages for the highest order that can be
//! configured are allocated up front, for both the linear-phase and the minimum-phase filters, so
//! switching between settings on the audio thread never allocates.

use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::filter::{Biquad, BiquadCoefficients};

/// The highest supported oversampling order. Order `n` means `2^n` times oversampling, so this is
/// 32x.
pub const MAX_OVERSAMPLING_ORDER: usize = 5;

/// The half-band kernel used by the linear-phase stages. This is a Lanczos kernel with `a = 3`
/// sampled at half sample offsets:
///
/// ```python
/// LANCZOS_A = 3
///
/// x = np.arange(-LANCZOS_A * 2 + 1, LANCZOS_A * 2) / 2
/// np.sinc(x) * np.sinc(x / LANCZOS_A)
/// ```
///
/// The two outer points of the kernel are zero and have been left out.
const LANCZOS3_UPSAMPLING_KERNEL: [f64; 11] = [
    0.024317084074161062,
    0.0,
    -0.13509491152311703,
    0.0,
    0.6079271018540267,
    1.0,
    0.6079271018540267,
    0.0,
    -0.13509491152311703,
    0.0,
    0.024317084074161062,
];

/// [`LANCZOS3_UPSAMPLING_KERNEL`] at half the gain. Zero-stuffing doubles the signal's gain, this
/// undoes that again.
const LANCZOS3_DOWNSAMPLING_KERNEL: [f64; 11] = [
    0.012158542037080531,
    0.0,
    -0.067547455761558515,
    0.0,
    0.30396355092701335,
    0.5,
    0.30396355092701335,
    0.0,
    -0.067547455761558515,
    0.0,
    0.012158542037080531,
];

/// The latency of a single pass through one of the kernels above, at the stage's sample rate.
const LANCZOS3_KERNEL_LATENCY: usize = LANCZOS3_UPSAMPLING_KERNEL.len() / 2;

/// The Q values for the three biquads making up a 6th order Butterworth low-pass filter.
const BUTTERWORTH6_Q: [f64; 3] = [0.5176380902050415, 0.7071067811865476, 1.9318516525781366];

/// The minimum-phase stages' cutoff frequency as a fraction of the stage's upsampled sample rate.
/// This is a bit below the original Nyquist frequency of `0.25`.
const MINIMUM_PHASE_CUTOFF: f64 = 0.22;

/// The oversampling configuration, as requested by the user and as applied by the audio thread.
/// This is small enough to be exchanged between threads through a lock-free [`AtomicCell`]. The
/// alignment lets `Option<OversamplingSettings>` be stored in a single `AtomicU16`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(align(2))]
pub struct OversamplingSettings {
    /// `2^order` times oversampling, `0` disables oversampling.
    pub order: u8,
    /// Use the linear-phase filters instead of the minimum-phase filters. Only the linear-phase
    /// filters add latency.
    pub linear_phase: bool,
}

/// A handle shared between the audio thread and whoever changes the oversampling settings. New
/// settings are posted with [`request()`][Self::request()] and are picked up by the engine at the
/// start of the next block. Only the most recent request matters, so this is a single slot rather
/// than a queue. After applying the settings the engine publishes them here together with the new
/// latency.
#[derive(Debug)]
pub struct OversamplingControl {
    /// The most recently requested settings, if the audio thread has not yet picked them up.
    pending: AtomicCell<Option<OversamplingSettings>>,
    /// The settings that are currently in use.
    applied: AtomicCell<OversamplingSettings>,
    /// The latency in samples at the host's sample rate for the applied settings.
    latency: AtomicU32,
}

/// A stereo oversampler. Which filters are used and how many stages run depend on the current
/// [`OversamplingSettings`].
#[derive(Debug)]
pub struct Oversampler {
    settings: OversamplingSettings,
    max_order: usize,
    max_block_size: usize,

    channels: [ChannelOversampler; 2],

    /// The length of the last block passed to [`upsample()`][Self::upsample()], at the host's
    /// sample rate. Zero if that block could not be upsampled.
    block_len: usize,
}

/// Both filter chains for a single channel. Only one of them is used at a time.
#[derive(Debug)]
struct ChannelOversampler {
    linear_phase: StageChain<Lanczos3Stage>,
    minimum_phase: StageChain<IirStage>,

    /// Used in place of the stages' buffers when oversampling is disabled.
    passthrough: Vec<f64>,
}

/// One or more 2x stages, where stage `n` upsamples the output of stage `n - 1`.
#[derive(Debug)]
struct StageChain<S> {
    stages: Vec<S>,
    /// The chain's latency at the base sample rate when using the first `n + 1` stages.
    latencies: Vec<u32>,
}

/// A single 2x oversampling stage. The stage upsamples into its own scratch buffer, and the next
/// processing step or stage reads from and writes to that buffer.
trait Stage {
    /// Create the stage at index `stage_number`, which runs at `2^(stage_number + 1)` times the
    /// base sample rate. `max_block_size` is the block size at the base sample rate.
    fn new(max_block_size: usize, stage_number: usize) -> Self;

    fn reset(&mut self);

    /// The latency this stage adds to the chain at the base sample rate.
    fn effective_latency(&self) -> u32;

    /// Upsample `block` 2x and store the result in the scratch buffer.
    fn upsample_from(&mut self, block: &[f64]);

    /// Downsample the first `block.len() * 2` samples of the scratch buffer 2x into `block`.
    fn downsample_to(&mut self, block: &mut [f64]);

    fn scratch_buffer(&self) -> &[f64];

    fn scratch_buffer_mut(&mut self) -> &mut [f64];
}

/// A linear-phase stage using the Lanczos kernel from above. The kernel is applied through
/// straight convolution over a ring buffer.
#[derive(Debug, Clone)]
struct Lanczos3Stage {
    /// `2^(stage_number + 1)`.
    oversampling_amount: usize,

    /// Holds the kernel's length in samples plus the additional delay needed to keep this stage's
    /// total latency an integer number of samples at the base sample rate.
    upsampling_rb: Vec<f64>,
    upsampling_write_pos: usize,
    additional_upsampling_latency: usize,

    downsampling_rb: [f64; LANCZOS3_DOWNSAMPLING_KERNEL.len()],
    downsampling_write_pos: usize,

    scratch_buffer: Vec<f64>,
}

/// A minimum-phase stage using a 6th order Butterworth low-pass filter. This doesn't add any
/// latency in the sense that it can be compensated for, but it does shift the phase.
#[derive(Debug, Clone)]
struct IirStage {
    upsampling_filters: [Biquad<f64>; 3],
    downsampling_filters: [Biquad<f64>; 3],

    scratch_buffer: Vec<f64>,
}

impl OversamplingSettings {
    /// The number of 2x stages, which is the order as a `usize`.
    pub fn num_stages(&self) -> usize {
        self.order as usize
    }

    /// The oversampling factor, `2^order`.
    pub fn factor(&self) -> usize {
        1 << self.order
    }

    /// These settings with the order clamped to `max_order`.
    pub fn clamped(self, max_order: usize) -> Self {
        Self {
            // This can only make the order smaller, so it still fits
            order: self.num_stages().min(max_order) as u8,
            ..self
        }
    }
}

impl Default for OversamplingControl {
    fn default() -> Self {
        Self::new(OversamplingSettings::default(), 0)
    }
}

impl OversamplingControl {
    pub fn new(applied: OversamplingSettings, latency: u32) -> Self {
        curv_debug_assert!(AtomicCell::<Option<OversamplingSettings>>::is_lock_free());

        Self {
            pending: AtomicCell::new(None),
            applied: AtomicCell::new(applied.clamped(MAX_OVERSAMPLING_ORDER)),
            latency: AtomicU32::new(latency),
        }
    }

    /// Ask the audio thread to switch to `settings` at the start of the next block. This replaces
    /// any earlier request that has not been picked up yet. The order is clamped to
    /// [`MAX_OVERSAMPLING_ORDER`].
    pub fn request(&self, settings: OversamplingSettings) {
        self.pending
            .store(Some(settings.clamped(MAX_OVERSAMPLING_ORDER)));
    }

    /// Take the most recent request, if there is one. Called by the audio thread.
    pub fn take_pending(&self) -> Option<OversamplingSettings> {
        self.pending.take()
    }

    /// Whether there is a request the audio thread has not yet picked up.
    pub fn has_pending(&self) -> bool {
        self.pending.load().is_some()
    }

    /// Called by the audio thread after applying new settings.
    pub fn publish_applied(&self, settings: OversamplingSettings, latency: u32) {
        self.latency.store(latency, Ordering::Relaxed);
        self.applied.store(settings);
    }

    /// The settings that are currently in use.
    pub fn applied_settings(&self) -> OversamplingSettings {
        self.applied.load()
    }

    /// The latency the engine adds with the currently applied settings, in samples at the host's
    /// sample rate. Hosts should be informed when this changes.
    pub fn latency_samples(&self) -> u32 {
        self.latency.load(Ordering::Relaxed)
    }
}

impl Oversampler {
    /// Create an oversampler that can process blocks of up to `max_block_size` samples with up to
    /// `max_order` oversampling stages.
    ///
    /// # Panics
    ///
    /// Panics if `max_order` exceeds [`MAX_OVERSAMPLING_ORDER`].
    pub fn new(max_block_size: usize, max_order: usize, settings: OversamplingSettings) -> Self {
        assert!(max_order <= MAX_OVERSAMPLING_ORDER);

        Self {
            settings: settings.clamped(max_order),
            max_order,
            max_block_size,

            channels: [
                ChannelOversampler::new(max_block_size, max_order),
                ChannelOversampler::new(max_block_size, max_order),
            ],

            block_len: 0,
        }
    }

    pub fn settings(&self) -> OversamplingSettings {
        self.settings
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Switch to new settings and reset the filters. The order is clamped to the maximum order.
    /// This does not allocate.
    pub fn set_settings(&mut self, settings: OversamplingSettings) {
        let settings = settings.clamped(self.max_order);
        curv_trace!(
            "Switching to {}x oversampling (linear phase: {})",
            settings.factor(),
            settings.linear_phase
        );

        self.settings = settings;
        self.reset();
    }

    /// The current oversampling factor.
    pub fn factor(&self) -> usize {
        self.settings.factor()
    }

    /// The latency for the current settings, in samples at the base sample rate.
    pub fn latency(&self) -> u32 {
        self.channels[0].latency(self.settings)
    }

    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
        self.block_len = 0;
    }

    /// Upsample a stereo block. Returns the number of samples per channel at the upsampled rate,
    /// which can then be accessed through [`upsampled()`][Self::upsampled()]. This returns zero
    /// without touching the filters if the block is empty, if the channels have different lengths,
    /// or if the block is larger than the maximum block size. The caller should then output
    /// silence instead of processing the block.
    pub fn upsample(&mut self, block: [&[f64]; 2]) -> usize {
        let len = block[0].len();
        if len == 0 || len != block[1].len() || len > self.max_block_size {
            curv_debug_assert!(
                len <= self.max_block_size,
                "The block's size exceeds the maximum block size"
            );
            self.block_len = 0;
            return 0;
        }

        let settings = self.settings;
        for (channel, input) in self.channels.iter_mut().zip(block) {
            channel.upsample(input, settings);
        }
        self.block_len = len;

        len * settings.factor()
    }

    /// The upsampled signal from the last [`upsample()`][Self::upsample()] call. This can be
    /// modified in place before calling [`downsample()`][Self::downsample()].
    pub fn upsampled(&mut self) -> [&mut [f64]; 2] {
        let settings = self.settings;
        let upsampled_len = self.block_len * settings.factor();
        let [left, right] = &mut self.channels;

        [
            left.upsampled(settings, upsampled_len),
            right.upsampled(settings, upsampled_len),
        ]
    }

    /// Downsample the upsampled signal back into `block`. `block` needs to have the same length as
    /// the block passed to [`upsample()`][Self::upsample()].
    pub fn downsample(&mut self, block: [&mut [f64]; 2]) {
        let len = self.block_len;
        let settings = self.settings;
        for (channel, output) in self.channels.iter_mut().zip(block) {
            curv_debug_assert_eq!(output.len(), len);
            let len = len.min(output.len());
            channel.downsample(&mut output[..len], settings);
        }
    }
}

impl ChannelOversampler {
    fn new(max_block_size: usize, max_order: usize) -> Self {
        Self {
            linear_phase: StageChain::new(max_block_size, max_order),
            minimum_phase: StageChain::new(max_block_size, max_order),

            passthrough: vec![0.0; max_block_size],
        }
    }

    fn reset(&mut self) {
        self.linear_phase.reset();
        self.minimum_phase.reset();
        self.passthrough.fill(0.0);
    }

    fn latency(&self, settings: OversamplingSettings) -> u32 {
        if settings.linear_phase {
            self.linear_phase.latency(settings.num_stages())
        } else {
            self.minimum_phase.latency(settings.num_stages())
        }
    }

    fn upsample(&mut self, block: &[f64], settings: OversamplingSettings) {
        match settings {
            OversamplingSettings { order: 0, .. } => {
                self.passthrough[..block.len()].copy_from_slice(block)
            }
            OversamplingSettings {
                order,
                linear_phase: true,
            } => self.linear_phase.upsample(block, order as usize),
            OversamplingSettings {
                order,
                linear_phase: false,
            } => self.minimum_phase.upsample(block, order as usize),
        }
    }

    fn upsampled(&mut self, settings: OversamplingSettings, len: usize) -> &mut [f64] {
        match settings {
            OversamplingSettings { order: 0, .. } => &mut self.passthrough[..len],
            OversamplingSettings {
                order,
                linear_phase: true,
            } => self.linear_phase.output(order as usize, len),
            OversamplingSettings {
                order,
                linear_phase: false,
            } => self.minimum_phase.output(order as usize, len),
        }
    }

    fn downsample(&mut self, block: &mut [f64], settings: OversamplingSettings) {
        match settings {
            OversamplingSettings { order: 0, .. } => {
                block.copy_from_slice(&self.passthrough[..block.len()])
            }
            OversamplingSettings {
                order,
                linear_phase: true,
            } => self.linear_phase.downsample(block, order as usize),
            OversamplingSettings {
                order,
                linear_phase: false,
            } => self.minimum_phase.downsample(block, order as usize),
        }
    }
}

impl<S: Stage> StageChain<S> {
    fn new(max_block_size: usize, max_order: usize) -> Self {
        let stages: Vec<S> = (0..max_order)
            .map(|stage_number| S::new(max_block_size, stage_number))
            .collect();

        // The latencies for every possible order are computed up front
        let latencies = stages
            .iter()
            .map(|stage| stage.effective_latency())
            .scan(0, |total_latency, latency| {
                *total_latency += latency;
                Some(*total_latency)
            })
            .collect();

        Self { stages, latencies }
    }

    fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    fn latency(&self, order: usize) -> u32 {
        if order == 0 {
            0
        } else {
            self.latencies[order - 1]
        }
    }

    /// Run `block` through the first `order` stages. The result ends up in the last stage's
    /// scratch buffer.
    fn upsample(&mut self, block: &[f64], order: usize) {
        assert!(order > 0 && order <= self.stages.len());

        self.stages[0].upsample_from(block);

        let mut upsampled_len = block.len() * 2;
        for to_stage_idx in 1..order {
            let ([.., from], [to, ..]) = self.stages.split_at_mut(to_stage_idx) else {
                unreachable!()
            };

            to.upsample_from(&from.scratch_buffer()[..upsampled_len]);
            upsampled_len *= 2;
        }
    }

    fn output(&mut self, order: usize, len: usize) -> &mut [f64] {
        &mut self.stages[order - 1].scratch_buffer_mut()[..len]
    }

    /// The reverse of [`upsample()`][Self::upsample()], going from the last stage back down to
    /// `block`.
    fn downsample(&mut self, block: &mut [f64], order: usize) {
        assert!(order > 0 && order <= self.stages.len());

        let mut downsampled_len = block.len() << (order - 1);
        for to_stage_idx in (1..order).rev() {
            let ([.., to], [from, ..]) = self.stages.split_at_mut(to_stage_idx) else {
                unreachable!()
            };

            from.downsample_to(&mut to.scratch_buffer_mut()[..downsampled_len]);
            downsampled_len /= 2;
        }

        curv_debug_assert_eq!(downsampled_len, block.len());
        self.stages[0].downsample_to(block);
    }
}

impl Stage for Lanczos3Stage {
    fn new(max_block_size: usize, stage_number: usize) -> Self {
        let oversampling_amount = 2usize.pow(stage_number as u32 + 1);

        // The upsampling and downsampling kernels together delay the signal by twice the kernel
        // latency at this stage's rate. That needs to be a multiple of `oversampling_amount` to end
        // up as a whole number of samples at the base rate, so the upsampling filter gets some
        // extra delay to pad it out.
        let uncompensated_stage_latency = LANCZOS3_KERNEL_LATENCY * 2;
        let additional_upsampling_latency = (-(uncompensated_stage_latency as isize))
            .rem_euclid(oversampling_amount as isize)
            as usize;

        Self {
            oversampling_amount,

            upsampling_rb: vec![
                0.0;
                LANCZOS3_UPSAMPLING_KERNEL.len() + additional_upsampling_latency
            ],
            upsampling_write_pos: 0,
            additional_upsampling_latency,

            downsampling_rb: [0.0; LANCZOS3_DOWNSAMPLING_KERNEL.len()],
            downsampling_write_pos: 0,

            scratch_buffer: vec![0.0; max_block_size * oversampling_amount],
        }
    }

    fn reset(&mut self) {
        self.upsampling_rb.fill(0.0);
        self.upsampling_write_pos = 0;

        self.downsampling_rb.fill(0.0);
        self.downsampling_write_pos = 0;
    }

    fn effective_latency(&self) -> u32 {
        let total_stage_latency = LANCZOS3_KERNEL_LATENCY * 2 + self.additional_upsampling_latency;
        curv_debug_assert_eq!(total_stage_latency % self.oversampling_amount, 0);

        (total_stage_latency / self.oversampling_amount) as u32
    }

    fn upsample_from(&mut self, block: &[f64]) {
        let output_len = block.len() * 2;
        assert!(output_len <= self.scratch_buffer.len());

        for (input_sample_idx, input_sample) in block.iter().enumerate() {
            self.scratch_buffer[input_sample_idx * 2] = *input_sample;
            self.scratch_buffer[input_sample_idx * 2 + 1] = 0.0;
        }

        // Every other tap in the kernel is zero. When the kernel is centered on one of the input
        // samples the only non-zero term is that sample times the center tap of 1.0, so those
        // outputs can be copied straight from the ring buffer.
        let rb_len = self.upsampling_rb.len();
        let mut direct_read_pos = (self.upsampling_write_pos + LANCZOS3_KERNEL_LATENCY) % rb_len;
        for output_sample_idx in 0..output_len {
            self.upsampling_rb[self.upsampling_write_pos] = self.scratch_buffer[output_sample_idx];

            // After incrementing, the write position is the oldest sample in the ring buffer. This
            // is where convolution starts, which delays the signal by the additional latency.
            self.upsampling_write_pos = (self.upsampling_write_pos + 1) % rb_len;
            direct_read_pos = (direct_read_pos + 1) % rb_len;

            self.scratch_buffer[output_sample_idx] =
                if output_sample_idx % 2 == LANCZOS3_KERNEL_LATENCY % 2 {
                    curv_debug_assert_eq!(
                        self.upsampling_rb[(direct_read_pos + rb_len - 1) % rb_len],
                        0.0
                    );

                    self.upsampling_rb[direct_read_pos]
                } else {
                    convolve_rb(
                        &self.upsampling_rb,
                        &LANCZOS3_UPSAMPLING_KERNEL,
                        self.upsampling_write_pos,
                    )
                };
        }
    }

    fn downsample_to(&mut self, block: &mut [f64]) {
        let input_len = block.len() * 2;
        assert!(input_len <= self.scratch_buffer.len());

        for input_sample_idx in 0..input_len {
            self.downsampling_rb[self.downsampling_write_pos] =
                self.scratch_buffer[input_sample_idx];
            self.downsampling_write_pos =
                (self.downsampling_write_pos + 1) % LANCZOS3_DOWNSAMPLING_KERNEL.len();

            // Decimation only keeps the even samples, so the odd samples don't need to be filtered
            if input_sample_idx % 2 == 0 {
                block[input_sample_idx / 2] = convolve_rb(
                    &self.downsampling_rb,
                    &LANCZOS3_DOWNSAMPLING_KERNEL,
                    self.downsampling_write_pos,
                );
            }
        }
    }

    fn scratch_buffer(&self) -> &[f64] {
        &self.scratch_buffer
    }

    fn scratch_buffer_mut(&mut self) -> &mut [f64] {
        &mut self.scratch_buffer
    }
}

impl Stage for IirStage {
    fn new(max_block_size: usize, stage_number: usize) -> Self {
        let oversampling_amount = 2usize.pow(stage_number as u32 + 1);

        // Zero-stuffing halves the signal's energy, so the first upsampling filter makes up for
        // that with a gain of two
        let upsampling_filters = std::array::from_fn(|idx| {
            let gain = if idx == 0 { 2.0 } else { 1.0 };
            Biquad::new(BiquadCoefficients::lowpass(
                MINIMUM_PHASE_CUTOFF,
                BUTTERWORTH6_Q[idx],
                gain,
            ))
        });
        let downsampling_filters = std::array::from_fn(|idx| {
            Biquad::new(BiquadCoefficients::lowpass(
                MINIMUM_PHASE_CUTOFF,
                BUTTERWORTH6_Q[idx],
                1.0,
            ))
        });

        Self {
            upsampling_filters,
            downsampling_filters,

            scratch_buffer: vec![0.0; max_block_size * oversampling_amount],
        }
    }

    fn reset(&mut self) {
        for filter in self
            .upsampling_filters
            .iter_mut()
            .chain(self.downsampling_filters.iter_mut())
        {
            filter.reset();
        }
    }

    fn effective_latency(&self) -> u32 {
        0
    }

    fn upsample_from(&mut self, block: &[f64]) {
        assert!(block.len() * 2 <= self.scratch_buffer.len());

        for (input_sample_idx, input_sample) in block.iter().enumerate() {
            for (offset, stuffed_sample) in [*input_sample, 0.0].into_iter().enumerate() {
                self.scratch_buffer[input_sample_idx * 2 + offset] = self
                    .upsampling_filters
                    .iter_mut()
                    .fold(stuffed_sample, |sample, filter| filter.process(sample));
            }
        }
    }

    fn downsample_to(&mut self, block: &mut [f64]) {
        let input_len = block.len() * 2;
        assert!(input_len <= self.scratch_buffer.len());

        for input_sample_idx in 0..input_len {
            let filtered = self
                .downsampling_filters
                .iter_mut()
                .fold(self.scratch_buffer[input_sample_idx], |sample, filter| {
                    filter.process(sample)
                });

            // The filters still need to see every sample even though only the even ones are kept
            if input_sample_idx % 2 == 0 {
                block[input_sample_idx / 2] = filtered;
            }
        }
    }

    fn scratch_buffer(&self) -> &[f64] {
        &self.scratch_buffer
    }

    fn scratch_buffer_mut(&mut self) -> &mut [f64] {
        &mut self.scratch_buffer
    }
}

/// Convolve the ring buffer with `kernel`, treating `ring_buffer_pos` as the oldest sample in the
/// ring buffer.
///
/// # Panics
///
/// May panic if the ring buffer is shorter than the kernel.
fn convolve_rb(input_ring_buffer: &[f64], kernel: &[f64], ring_buffer_pos: usize) -> f64 {
    curv_debug_assert!(input_ring_buffer.len() >= kernel.len());

    let (newer, older) = input_ring_buffer.split_at(ring_buffer_pos);
    older
        .iter()
        .chain(newer)
        .zip(kernel.iter().rev())
        .map(|(sample, kernel_sample)| sample * kernel_sample)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod convolve_rb {
        use super::*;

        #[test]
        fn test_with_wrap() {
            let input_rb = [1.0, 2.0, -3.0, 4.0];
            let kernel = [1.0, 2.0, -0.0, -1.0];

            // `(-3.0 * -1.0) + (4.0 * 0.0) + (1.0 * 2.0) + (2.0 * 1.0) = 7.0`
            assert_eq!(convolve_rb(&input_rb, &kernel, 2), 7.0);
        }

        #[test]
        fn test_no_wrap() {
            let input_rb = [1.0, 2.0, -3.0, 4.0];
            let kernel = [1.0, 2.0, 0.0, -1.0];

            // `(1.0 * -1.0) + (2.0 * 0.0) + (-3.0 * 2.0) + (4.0 * 1.0) = -3.0`
            assert_eq!(convolve_rb(&input_rb, &kernel, 0), -3.0);
        }

        #[test]
        fn test_longer_ring_buffer() {
            // The ring buffer contains an extra sample of delay, the oldest sample is ignored
            let input_rb = [5.0, 1.0, 2.0, 3.0];
            let kernel = [1.0, 10.0, 100.0];

            // Starting at position 1 the samples are `[1, 2, 3, 5]` and only the first three are
            // used with the reversed kernel
            assert_eq!(convolve_rb(&input_rb, &kernel, 1), 100.0 + 20.0 + 3.0);
        }
    }

    mod control {
        use super::*;

        #[test]
        fn slots_are_lock_free() {
            assert_eq!(std::mem::size_of::<Option<OversamplingSettings>>(), 2);
            assert!(AtomicCell::<Option<OversamplingSettings>>::is_lock_free());
            assert!(AtomicCell::<OversamplingSettings>::is_lock_free());
        }

        #[test]
        fn only_the_latest_request_is_kept() {
            let control = OversamplingControl::default();
            assert!(control.take_pending().is_none());

            control.request(OversamplingSettings {
                order: 1,
                linear_phase: false,
            });
            control.request(OversamplingSettings {
                order: 3,
                linear_phase: true,
            });
            assert!(control.has_pending());

            assert_eq!(
                control.take_pending(),
                Some(OversamplingSettings {
                    order: 3,
                    linear_phase: true,
                })
            );
            assert!(control.take_pending().is_none());
        }

        #[test]
        fn requests_are_clamped() {
            let control = OversamplingControl::default();
            control.request(OversamplingSettings {
                order: 12,
                linear_phase: false,
            });

            assert_eq!(
                control.take_pending().map(|settings| settings.num_stages()),
                Some(MAX_OVERSAMPLING_ORDER)
            );
        }

        #[test]
        fn publish_applied() {
            let control = OversamplingControl::default();
            let settings = OversamplingSettings {
                order: 2,
                linear_phase: true,
            };
            control.publish_applied(settings, 8);

            assert_eq!(control.applied_settings(), settings);
            assert_eq!(control.latency_samples(), 8);
        }
    }

    mod oversampling {
        use super::*;

        fn argmax(iter: impl IntoIterator<Item = f64>) -> usize {
            iter.into_iter()
                .enumerate()
                .max_by(|(_, value_a), (_, value_b)| value_a.total_cmp(value_b))
                .unwrap()
                .0
        }

        fn process(
            oversampler: &mut Oversampler,
            block: &mut [f64],
            f: impl FnOnce(&mut [f64]),
        ) -> usize {
            let input = block.to_vec();
            let upsampled_len = oversampler.upsample([&input[..], &input[..]]);
            let [left, _] = oversampler.upsampled();
            f(left);

            let mut right = vec![0.0; block.len()];
            oversampler.downsample([block, &mut right[..]]);

            upsampled_len
        }

        /// The reported latency should match the position of a delayed impulse, and it should be
        /// an integer amount.
        fn test_latency(order: u8) {
            let mut delta_impulse = [0.0; 64];
            delta_impulse[0] = 1.0;

            let settings = OversamplingSettings {
                order,
                linear_phase: true,
            };
            let mut oversampler =
                Oversampler::new(delta_impulse.len(), settings.num_stages(), settings);
            let reported_latency = oversampler.latency() as usize;
            assert!(reported_latency > 0);

            let upsampled_len = process(&mut oversampler, &mut delta_impulse, |_| ());
            assert_eq!(upsampled_len, delta_impulse.len() << order);

            let new_impulse_idx = argmax(delta_impulse);
            assert_eq!(new_impulse_idx, reported_latency);
            assert!(delta_impulse[new_impulse_idx] > delta_impulse[new_impulse_idx - 1]);
            assert!(delta_impulse[new_impulse_idx] > delta_impulse[new_impulse_idx + 1]);
        }

        /// The latency compensated output should match the input, with a gain applied at the
        /// upsampled rate to make sure the upsampled buffer is what gets downsampled.
        fn test_sine_output(order: u8) {
            const GAIN: f64 = 2.0;
            // As a fraction of the sample rate
            const FREQUENCY: f64 = 0.125;

            let mut input = [0.0; 128];
            for (i, sample) in input.iter_mut().enumerate() {
                *sample = (i as f64 * FREQUENCY * std::f64::consts::TAU).sin();
            }

            let mut output = input;
            let settings = OversamplingSettings {
                order,
                linear_phase: true,
            };
            let mut oversampler = Oversampler::new(output.len(), settings.num_stages(), settings);
            process(&mut oversampler, &mut output, |upsampled| {
                for sample in upsampled {
                    *sample *= GAIN;
                }
            });

            let reported_latency = oversampler.latency() as usize;
            for (input_sample_idx, input_sample) in input
                .into_iter()
                .enumerate()
                .take(input.len() - reported_latency)
            {
                let output_sample = output[input_sample_idx + reported_latency];
                approx::assert_relative_eq!(input_sample * GAIN, output_sample, epsilon = 0.1);
            }
        }

        #[test]
        fn latency_2x() {
            test_latency(1);
        }

        #[test]
        fn latency_4x() {
            test_latency(2);
        }

        #[test]
        fn latency_8x() {
            test_latency(3);
        }

        #[test]
        fn latency_16x() {
            test_latency(4);
        }

        #[test]
        fn sine_output_2x() {
            test_sine_output(1);
        }

        #[test]
        fn sine_output_8x() {
            test_sine_output(3);
        }

        #[test]
        fn sine_output_16x() {
            test_sine_output(4);
        }

        #[test]
        fn latencies_grow_with_the_order() {
            let mut oversampler =
                Oversampler::new(64, MAX_OVERSAMPLING_ORDER, OversamplingSettings::default());
            let mut previous_latency = 0;
            for order in 1..=MAX_OVERSAMPLING_ORDER as u8 {
                oversampler.set_settings(OversamplingSettings {
                    order,
                    linear_phase: true,
                });
                assert!(oversampler.latency() > previous_latency);
                previous_latency = oversampler.latency();

                // The minimum-phase filters are not latency compensated
                oversampler.set_settings(OversamplingSettings {
                    order,
                    linear_phase: false,
                });
                assert_eq!(oversampler.latency(), 0);
            }
        }

        #[test]
        fn passthrough_without_oversampling() {
            let mut oversampler = Oversampler::new(16, 3, OversamplingSettings::default());

            let mut block: Vec<f64> = (0..16).map(|i| i as f64 * 0.01).collect();
            let expected = block.clone();
            assert_eq!(process(&mut oversampler, &mut block, |_| ()), 16);
            assert_eq!(block, expected);
        }

        #[test]
        fn minimum_phase_keeps_dc() {
            let settings = OversamplingSettings {
                order: 3,
                linear_phase: false,
            };
            let mut oversampler = Oversampler::new(512, 3, settings);

            let mut block = [0.5; 512];
            process(&mut oversampler, &mut block, |_| ());
            approx::assert_relative_eq!(block[511], 0.5, epsilon = 1e-6);
        }

        #[test]
        fn oversized_blocks_are_rejected() {
            let mut oversampler = Oversampler::new(16, 2, OversamplingSettings::default());
            let input = [0.0; 16];
            assert_eq!(oversampler.upsample([&input[..], &input[..]]), 16);

            oversampler.set_settings(OversamplingSettings {
                order: 2,
                linear_phase: true,
            });
            assert_eq!(oversampler.upsample([&input[..], &input[..]]), 64);
            assert_eq!(oversampler.upsample([&input[..], &input[..8]]), 0);
        }

        #[test]
        fn settings_are_clamped_to_the_maximum_order() {
            let mut oversampler = Oversampler::new(16, 2, OversamplingSettings::default());
            oversampler.set_settings(OversamplingSettings {
                order: 5,
                linear_phase: true,
            });

            assert_eq!(oversampler.settings().order, 2);
            assert_eq!(oversampler.factor(), 4);
        }
    }
}
