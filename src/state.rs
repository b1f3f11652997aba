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

//! Saving and restoring the engine's state. The binary layout is the oversampling order as a
//! little-endian `i32`, the linear phase flag as a little-endian `i32`, and then the parameters and
//! the knots as JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::oversampling::{OversamplingSettings, MAX_OVERSAMPLING_ORDER};
use crate::params::ParamSnapshot;
use crate::spline::KnotSet;

/// Everything that's stored in the state blob.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub oversampling: OversamplingSettings,
    pub params: ParamSnapshot,
    pub knots: KnotSet,
}

/// The JSON part of the state.
#[derive(Debug, Serialize, Deserialize)]
struct StateBlob {
    params: ParamSnapshot,
    knots: KnotSet,
}

/// The size of the binary header in front of the JSON blob.
const HEADER_LEN: usize = 8;

/// Serialize the state into the binary layout described in the module documentation.
pub fn serialize(state: &State) -> Result<Vec<u8>> {
    let blob = serde_json::to_vec(&StateBlob {
        params: state.params,
        knots: state.knots,
    })
    .context("Could not serialize the parameters")?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + blob.len());
    bytes.extend_from_slice(&(state.oversampling.order as i32).to_le_bytes());
    bytes.extend_from_slice(&(state.oversampling.linear_phase as i32).to_le_bytes());
    bytes.extend_from_slice(&blob);

    Ok(bytes)
}

/// Read state produced by [`serialize()`]. Parameter values are clamped to their ranges.
pub fn deserialize(bytes: &[u8]) -> Result<State> {
    if bytes.len() < HEADER_LEN {
        anyhow::bail!(
            "The state is {} bytes long, expected at least {HEADER_LEN}",
            bytes.len()
        );
    }

    let (header, blob) = bytes.split_at(HEADER_LEN);
    let read_i32 = |offset: usize| {
        let mut field = [0; 4];
        field.copy_from_slice(&header[offset..offset + 4]);
        i32::from_le_bytes(field)
    };

    let order = read_i32(0);
    let order = u8::try_from(order)
        .ok()
        .filter(|order| *order as usize <= MAX_OVERSAMPLING_ORDER)
        .with_context(|| format!("Invalid oversampling order {order}"))?;
    let linear_phase = match read_i32(4) {
        0 => false,
        1 => true,
        flag => anyhow::bail!("Invalid linear phase flag {flag}"),
    };

    let blob: StateBlob =
        serde_json::from_slice(blob).context("Could not deserialize the parameters")?;

    Ok(State {
        oversampling: OversamplingSettings {
            order,
            linear_phase,
        },
        params: blob.params.sanitized(),
        knots: blob.knots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Linked;
    use crate::topology::Topology;

    fn state() -> State {
        let mut params = ParamSnapshot {
            topology: Topology::Feedback,
            high_pass_order: 1,
            ..ParamSnapshot::default()
        };
        params.output_gain_db = Linked {
            linked: false,
            values: [-3.0, 1.5],
        };

        State {
            oversampling: OversamplingSettings {
                order: 3,
                linear_phase: true,
            },
            params,
            knots: KnotSet::default(),
        }
    }

    #[test]
    fn header_layout() {
        let bytes = serialize(&state()).unwrap();
        assert_eq!(&bytes[..4], &3i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1i32.to_le_bytes());
        assert_eq!(bytes[8], b'{');
    }

    #[test]
    fn round_trip() {
        let state = state();
        let bytes = serialize(&state).unwrap();
        assert_eq!(deserialize(&bytes).unwrap(), state);
    }

    #[test]
    fn reject_short_input() {
        assert!(deserialize(&[3, 0, 0, 0]).is_err());
    }

    #[test]
    fn reject_invalid_header() {
        let mut bytes = serialize(&state()).unwrap();
        bytes[..4].copy_from_slice(&9i32.to_le_bytes());
        assert!(deserialize(&bytes).is_err());

        let mut bytes = serialize(&state()).unwrap();
        bytes[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn reject_malformed_json() {
        let mut bytes = serialize(&state()).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn missing_parameters_use_defaults() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(b"{\"params\":{\"mid_side\":true},\"knots\":");
        bytes.extend_from_slice(&serde_json::to_vec(&KnotSet::default()).unwrap());
        bytes.push(b'}');

        let state = deserialize(&bytes).unwrap();
        assert!(state.params.mid_side);
        assert_eq!(state.params.wet, ParamSnapshot::default().wet);
    }
}
