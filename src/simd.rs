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

//! A two lane vector type so the left and right channels can be processed together. `std::simd`
//! is still nightly-only, so this is a plain array with the arithmetic operators implemented
//! lane-wise. LLVM vectorizes these without any help.

use std::ops::{Add, Index, IndexMut, Mul, Sub};

/// Either an `f64` or a [`F64x2`]. Used so the filters can be tested as scalars and then run on
/// both channels at once.
pub trait SimdType:
    Mul<Output = Self> + Sub<Output = Self> + Add<Output = Self> + Copy + Sized
{
    fn from_f64(value: f64) -> Self;
}

/// Two `f64` lanes, one for each channel.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct F64x2(pub [f64; 2]);

impl F64x2 {
    #[inline(always)]
    pub const fn new(left: f64, right: f64) -> Self {
        Self([left, right])
    }

    #[inline(always)]
    pub const fn splat(value: f64) -> Self {
        Self([value, value])
    }

    #[inline(always)]
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self([f(self.0[0]), f(self.0[1])])
    }

    /// The lanes swapped, so `[left, right]` becomes `[right, left]`.
    #[inline(always)]
    pub fn swapped(self) -> Self {
        Self([self.0[1], self.0[0]])
    }

    #[inline(always)]
    pub fn is_finite(self) -> bool {
        self.0[0].is_finite() && self.0[1].is_finite()
    }
}

impl From<[f64; 2]> for F64x2 {
    #[inline(always)]
    fn from(lanes: [f64; 2]) -> Self {
        Self(lanes)
    }
}

impl Index<usize> for F64x2 {
    type Output = f64;

    #[inline(always)]
    fn index(&self, lane: usize) -> &f64 {
        &self.0[lane]
    }
}

impl IndexMut<usize> for F64x2 {
    #[inline(always)]
    fn index_mut(&mut self, lane: usize) -> &mut f64 {
        &mut self.0[lane]
    }
}

macro_rules! impl_lanewise_op {
    ($trait:ident, $fn:ident, $op:tt) => {
        impl $trait for F64x2 {
            type Output = Self;

            #[inline(always)]
            fn $fn(self, rhs: Self) -> Self {
                Self([self.0[0] $op rhs.0[0], self.0[1] $op rhs.0[1]])
            }
        }
    };
}

impl_lanewise_op!(Add, add, +);
impl_lanewise_op!(Sub, sub, -);
impl_lanewise_op!(Mul, mul, *);

impl SimdType for f64 {
    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value
    }
}

impl SimdType for F64x2 {
    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        F64x2::splat(value)
    }
}
