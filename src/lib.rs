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

//! A stereo compressor and expander where the transfer curve is a spline through up to nine
//! freely placed knots. The [`Engine`] processes blocks of audio, optionally oversampled, in one of
//! three detector topologies. Parameters and knots are read through the [`ParameterSource`] and
//! [`SplineSource`] traits so they can be changed from other threads while audio is running.

// Used in the logging macros
pub use log;

#[macro_use]
pub mod debug;

pub mod engine;
pub mod envelope;
pub mod filter;
pub mod meters;
pub mod oversampling;
pub mod params;
pub mod simd;
pub mod spline;
pub mod state;
pub mod topology;
pub mod util;

pub use engine::{Engine, EngineConfig, Sample};
pub use envelope::Metric;
pub use meters::VuMeters;
pub use oversampling::{OversamplingControl, OversamplingSettings};
pub use params::{ChannelParam, Linked, ParamSnapshot, ParameterSource, SharedParams};
pub use spline::{Knot, KnotSet, SharedSpline, SplinePoint, SplineSource};
pub use state::State;
pub use topology::Topology;
