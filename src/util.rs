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

//! Conversion functions and realtime helpers shared by the DSP modules.

use std::marker::PhantomData;

/// The bit that controls flush-to-zero behavior for denormals in 32 and 64-bit floating point
/// numbers on AArch64.
///
/// <https://developer.arm.com/documentation/ddi0595/2021-06/AArch64-Registers/FPCR--Floating-point-Control-Register>
#[cfg(target_arch = "aarch64")]
const AARCH64_FTZ_BIT: u64 = 1 << 24;

#[cfg(all(debug_assertions, feature = "assert_process_allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

/// Levels below this are considered silence. The spline's gain correction is never allowed to
/// boost signals below this level.
pub const MINUS_INFINITY_DB: f64 = -100.0;
/// The lowest level the envelope follower can report. This keeps the logarithm finite for digital
/// silence.
pub const LEVEL_FLOOR_DB: f64 = -200.0;
/// `10^(LEVEL_FLOOR_DB / 20)`.
pub const LEVEL_FLOOR_GAIN: f64 = 1e-10;

/// `ln(10) / 20`, multiplying a decibel value by this and exponentiating gives a linear gain.
pub const DB_TO_LIN: f64 = std::f64::consts::LN_10 / 20.0;
/// `20 / ln(10)`, the inverse of [`DB_TO_LIN`].
pub const LIN_TO_DB: f64 = 20.0 / std::f64::consts::LN_10;

/// Temporarily allow allocations within `func` if the crate was built with the
/// `assert_process_allocs` feature.
#[cfg(all(debug_assertions, feature = "assert_process_allocs"))]
pub fn permit_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    assert_no_alloc::permit_alloc(func)
}

/// Temporarily allow allocations within `func` if the crate was built with the
/// `assert_process_allocs` feature.
#[cfg(not(all(debug_assertions, feature = "assert_process_allocs")))]
pub fn permit_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    func()
}

/// Convert decibels to a linear gain ratio using `exp()`.
#[inline]
pub fn db_to_gain(dbs: f64) -> f64 {
    (dbs * DB_TO_LIN).exp()
}

/// Convert a linear magnitude to decibels. Magnitudes at or below [`LEVEL_FLOOR_GAIN`] map to
/// [`LEVEL_FLOOR_DB`].
#[inline]
pub fn gain_to_db(gain: f64) -> f64 {
    f64::max(gain, LEVEL_FLOOR_GAIN).ln() * LIN_TO_DB
}

/// The angular frequency coefficient used to turn a time constant in milliseconds into a one-pole
/// smoothing coefficient at `sample_rate`. See [`time_constant_alpha()`].
#[inline]
pub fn angular_frequency_coef(sample_rate: f64) -> f64 {
    1000.0 * std::f64::consts::TAU / sample_rate
}

/// Compute the one-pole coefficient `exp(-angular_coef / time_ms)`. A time constant of zero
/// disables smoothing entirely and results in a coefficient of zero.
#[inline]
pub fn time_constant_alpha(angular_coef: f64, time_ms: f64) -> f64 {
    if time_ms <= 0.0 {
        0.0
    } else {
        (-angular_coef / time_ms).exp()
    }
}

/// Encode a stereo signal as mid/side in place. Left ends up holding the mid channel and right the
/// side channel.
pub fn left_right_to_mid_side(left: &mut [f64], right: &mut [f64]) {
    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        let mid = 0.5 * (*l + *r);
        let side = 0.5 * (*l - *r);
        *l = mid;
        *r = side;
    }
}

/// The inverse of [`left_right_to_mid_side()`].
pub fn mid_side_to_left_right(mid: &mut [f64], side: &mut [f64]) {
    for (m, s) in mid.iter_mut().zip(side.iter_mut()) {
        let left = *m + *s;
        let right = *m - *s;
        *m = left;
        *s = right;
    }
}

/// Wraps a single block of processing. This makes sure FTZ is enabled for the duration of the
/// block, and it sets up `assert_no_alloc` when the `assert_process_allocs` feature is enabled in
/// debug builds.
pub fn process_wrapper<T, F: FnOnce() -> T>(f: F) -> T {
    // Denormals in the envelope follower's and the filters' recursions would otherwise cause CPU
    // spikes when the input decays to silence
    let _ftz_guard = ScopedFtz::enable();

    cfg_if::cfg_if! {
        if #[cfg(all(debug_assertions, feature = "assert_process_allocs"))] {
            assert_no_alloc::assert_no_alloc(f)
        } else {
            f()
        }
    }
}

/// Enable the CPU's Flush To Zero flag while this object is in scope. If the flag was not already
/// set, it will be restored to its old value when this gets dropped.
struct ScopedFtz {
    /// Whether FTZ should be disabled again, i.e. if FTZ was not enabled before.
    should_disable_again: bool,
    /// This object affects the current thread's floating point registers, so it may only be
    /// dropped on the current thread. This makes the struct `!Send` and `!Sync`.
    _send_sync_marker: PhantomData<*const ()>,
}

impl ScopedFtz {
    #[allow(deprecated)]
    fn enable() -> Self {
        #[cfg(not(miri))]
        {
            #[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
            {
                let mode = unsafe { std::arch::x86_64::_MM_GET_FLUSH_ZERO_MODE() };
                let should_disable_again = mode != std::arch::x86_64::_MM_FLUSH_ZERO_ON;
                if should_disable_again {
                    unsafe {
                        std::arch::x86_64::_MM_SET_FLUSH_ZERO_MODE(
                            std::arch::x86_64::_MM_FLUSH_ZERO_ON,
                        )
                    };
                }

                return Self {
                    should_disable_again,
                    _send_sync_marker: PhantomData,
                };
            }

            #[cfg(target_arch = "aarch64")]
            {
                let mut fpcr: u64;
                unsafe { std::arch::asm!("mrs {}, fpcr", out(reg) fpcr) };

                let should_disable_again = fpcr & AARCH64_FTZ_BIT == 0;
                if should_disable_again {
                    unsafe { std::arch::asm!("msr fpcr, {}", in(reg) fpcr | AARCH64_FTZ_BIT) };
                }

                return Self {
                    should_disable_again,
                    _send_sync_marker: PhantomData,
                };
            }
        }

        #[allow(unreachable_code)] // This is only unreachable if on SSE or aarch64
        Self {
            should_disable_again: false,
            _send_sync_marker: PhantomData,
        }
    }
}

impl Drop for ScopedFtz {
    #[allow(deprecated)]
    fn drop(&mut self) {
        #[cfg(not(miri))]
        if self.should_disable_again {
            #[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
            {
                unsafe {
                    std::arch::x86_64::_MM_SET_FLUSH_ZERO_MODE(
                        std::arch::x86_64::_MM_FLUSH_ZERO_OFF,
                    )
                };
            }

            #[cfg(target_arch = "aarch64")]
            {
                let mut fpcr: u64;
                unsafe { std::arch::asm!("mrs {}, fpcr", out(reg) fpcr) };
                unsafe { std::arch::asm!("msr fpcr, {}", in(reg) fpcr & !AARCH64_FTZ_BIT) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod conversion {
        use super::*;

        #[test]
        fn test_db_to_gain() {
            approx::assert_relative_eq!(db_to_gain(-20.0), 0.1, epsilon = 1e-12);
            approx::assert_relative_eq!(db_to_gain(6.0), 1.9952623149688795, epsilon = 1e-12);
        }

        #[test]
        fn test_gain_to_db() {
            approx::assert_relative_eq!(gain_to_db(0.1), -20.0, epsilon = 1e-12);
            approx::assert_relative_eq!(gain_to_db(1.0), 0.0, epsilon = 1e-12);
        }

        #[test]
        fn test_gain_to_db_silence() {
            assert_eq!(gain_to_db(0.0), gain_to_db(LEVEL_FLOOR_GAIN));
            approx::assert_relative_eq!(gain_to_db(0.0), LEVEL_FLOOR_DB, epsilon = 1e-9);
            approx::assert_relative_eq!(gain_to_db(-3.0), LEVEL_FLOOR_DB, epsilon = 1e-9);
        }

        #[test]
        fn test_time_constant_alpha() {
            let coef = angular_frequency_coef(48_000.0);
            assert_eq!(time_constant_alpha(coef, 0.0), 0.0);

            let alpha = time_constant_alpha(coef, 20.0);
            assert!(alpha > 0.99 && alpha < 1.0);

            // Longer time constants decay slower
            assert!(time_constant_alpha(coef, 200.0) > alpha);
            // And the same time constant decays slower per sample at a higher sample rate
            assert!(time_constant_alpha(angular_frequency_coef(96_000.0), 20.0) > alpha);
        }
    }

    #[test]
    fn mid_side_round_trip() {
        let mut left = [0.5, -0.25, 1.0, 0.0];
        let mut right = [0.5, 0.25, -1.0, 0.125];
        let (expected_left, expected_right) = (left, right);

        left_right_to_mid_side(&mut left, &mut right);
        assert_eq!(left[0], 0.5);
        assert_eq!(right[0], 0.0);

        mid_side_to_left_right(&mut left, &mut right);
        assert_eq!(left, expected_left);
        assert_eq!(right, expected_right);
    }
}
