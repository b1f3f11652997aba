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

use std::f64::consts;

use crate::simd::{F64x2, SimdType};

/// The highest number of one-pole sections the detector's high-pass pre-filter can cascade.
pub const MAX_HIGH_PASS_ORDER: usize = 3;

/// A topology-preserving one-pole high-pass filter. The coefficient is shared between the
/// sections in a [`HighPassCascade`], so it's passed to [`process()`][Self::process()] instead of
/// being stored here.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnePoleHighPass<T> {
    s: T,
}

impl<T: SimdType> OnePoleHighPass<T> {
    /// Compute the coefficient `g / (1 + g)` with `g = tan(pi * fc / fs)`.
    pub fn coefficient(sample_rate: f64, frequency: f64) -> f64 {
        curv_debug_assert!(sample_rate > 0.0);
        curv_debug_assert!(frequency > 0.0);

        // Keep the prewarped frequency below Nyquist, `tan()` blows up there
        let frequency = frequency.min(sample_rate * 0.49);
        let g = (consts::PI * frequency / sample_rate).tan();

        g / (1.0 + g)
    }

    /// Process a single sample.
    #[inline]
    pub fn process(&mut self, input: T, coefficient: T) -> T {
        let v = coefficient * (input - self.s);
        let low = v + self.s;
        self.s = low + v;

        input - low
    }

    pub fn reset(&mut self) {
        self.s = T::from_f64(0.0);
    }
}

/// Up to [`MAX_HIGH_PASS_ORDER`] cascaded [`OnePoleHighPass`] sections for both channels. The
/// order is a const generic so the per-sample loop doesn't need to branch on it.
#[derive(Debug, Clone, Default)]
pub struct HighPassCascade {
    sections: [OnePoleHighPass<F64x2>; MAX_HIGH_PASS_ORDER],
    coefficient: F64x2,
}

impl HighPassCascade {
    /// Update the cutoff frequencies for the left and right channels.
    pub fn set_frequencies(&mut self, sample_rate: f64, frequencies: [f64; 2]) {
        self.coefficient = F64x2::new(
            OnePoleHighPass::<f64>::coefficient(sample_rate, frequencies[0]),
            OnePoleHighPass::<f64>::coefficient(sample_rate, frequencies[1]),
        );
    }

    /// Run `input` through the first `ORDER` sections. `ORDER == 0` passes the input through
    /// unchanged.
    #[inline]
    pub fn process<const ORDER: usize>(&mut self, input: F64x2) -> F64x2 {
        let coefficient = self.coefficient;
        self.sections
            .iter_mut()
            .take(ORDER)
            .fold(input, |sample, section| section.process(sample, coefficient))
    }

    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }
}

/// A biquad filter in transposed direct form II, used for the minimum-phase oversampling filters.
///
/// Based on <https://en.wikipedia.org/wiki/Digital_biquad_filter#Transposed_direct_forms>.
#[derive(Clone, Copy, Debug)]
pub struct Biquad<T> {
    pub coefficients: BiquadCoefficients<T>,
    s1: T,
    s2: T,
}

/// The coefficients `[b0, b1, b2, a1, a2]` for [`Biquad`]. These have already been divided by
/// `a0`.
#[derive(Clone, Copy, Debug)]
pub struct BiquadCoefficients<T> {
    b0: T,
    b1: T,
    b2: T,
    a1: T,
    a2: T,
}

impl<T: SimdType> Default for Biquad<T> {
    /// Before setting constants the filter should just act as an identity function.
    fn default() -> Self {
        Self {
            coefficients: BiquadCoefficients::identity(),
            s1: T::from_f64(0.0),
            s2: T::from_f64(0.0),
        }
    }
}

impl<T: SimdType> Biquad<T> {
    pub fn new(coefficients: BiquadCoefficients<T>) -> Self {
        Self {
            coefficients,
            ..Self::default()
        }
    }

    /// Process a single sample.
    #[inline]
    pub fn process(&mut self, sample: T) -> T {
        let result = self.coefficients.b0 * sample + self.s1;

        self.s1 = self.coefficients.b1 * sample - self.coefficients.a1 * result + self.s2;
        self.s2 = self.coefficients.b2 * sample - self.coefficients.a2 * result;

        result
    }

    /// Reset the state to zero.
    pub fn reset(&mut self) {
        self.s1 = T::from_f64(0.0);
        self.s2 = T::from_f64(0.0);
    }
}

impl<T: SimdType> BiquadCoefficients<T> {
    /// Filter coefficients that pass the signal through as is.
    pub fn identity() -> Self {
        Self {
            b0: T::from_f64(1.0),
            b1: T::from_f64(0.0),
            b2: T::from_f64(0.0),
            a1: T::from_f64(0.0),
            a2: T::from_f64(0.0),
        }
    }

    /// Compute the coefficients for a low-pass filter. `frequency` is given as a fraction of the
    /// sample rate here since the oversampling stages don't know the actual sample rate. The
    /// result is scaled by `gain`, which the upsampling stages use to make up for zero-stuffing.
    ///
    /// Based on <http://shepazu.github.io/Audio-EQ-Cookbook/audio-eq-cookbook.html>.
    pub fn lowpass(normalized_frequency: f64, q: f64, gain: f64) -> Self {
        curv_debug_assert!(normalized_frequency > 0.0 && normalized_frequency < 0.5);
        curv_debug_assert!(q > 0.0);

        let omega0 = consts::TAU * normalized_frequency;
        let cos_omega0 = omega0.cos();
        let alpha = omega0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha;
        let b0 = gain * ((1.0 - cos_omega0) / 2.0) / a0;
        let b1 = gain * (1.0 - cos_omega0) / a0;
        let b2 = gain * ((1.0 - cos_omega0) / 2.0) / a0;
        let a1 = (-2.0 * cos_omega0) / a0;
        let a2 = (1.0 - alpha) / a0;

        Self {
            b0: T::from_f64(b0),
            b1: T::from_f64(b1),
            b2: T::from_f64(b2),
            a1: T::from_f64(a1),
            a2: T::from_f64(a2),
        }
    }
}
