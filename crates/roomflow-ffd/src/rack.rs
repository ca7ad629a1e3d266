//! Equipment racks: specification, power redistribution and the black-box
//! inlet/outlet model.
//!
//! A rack is a solid block whose upstream face draws room air and whose
//! downstream face discharges it, heated by the rack power. The flow rate is
//! configured per watt and only becomes an absolute volume flow once the
//! rack power is known.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use roomflow_core::{Result, RoomflowError};

use crate::grid::Axis;

/// Heat dissipation assumed when a rack record gives none (W).
pub const DEFAULT_RACK_POWER: f64 = 5000.0;

/// Flow per watt assumed when a rack record gives none: 125 CFM per kW.
pub const DEFAULT_FLOW_RATIO: f64 = 125.0 * 0.000_471_947_45 / 1000.0;

/// Direction air moves through a rack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowDirection {
    /// Towards +x.
    #[serde(rename = "+x")]
    PosX,
    /// Towards -x.
    #[serde(rename = "-x")]
    NegX,
    /// Towards +y.
    #[serde(rename = "+y")]
    PosY,
    /// Towards -y.
    #[serde(rename = "-y")]
    NegY,
    /// Towards +z.
    #[serde(rename = "+z")]
    PosZ,
    /// Towards -z.
    #[serde(rename = "-z")]
    NegZ,
}

impl FlowDirection {
    /// Decode the signed axis code used in rack names (±1, ±2, ±3).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::PosX),
            -1 => Some(Self::NegX),
            2 => Some(Self::PosY),
            -2 => Some(Self::NegY),
            3 => Some(Self::PosZ),
            -3 => Some(Self::NegZ),
            _ => None,
        }
    }

    /// Signed axis code.
    pub fn code(self) -> i64 {
        let magnitude = self.axis().index() as i64 + 1;
        magnitude * self.sign() as i64
    }

    /// Axis of travel.
    pub fn axis(self) -> Axis {
        match self {
            Self::PosX | Self::NegX => Axis::X,
            Self::PosY | Self::NegY => Axis::Y,
            Self::PosZ | Self::NegZ => Axis::Z,
        }
    }

    /// +1 or -1 along [`axis`](Self::axis).
    pub fn sign(self) -> i8 {
        match self {
            Self::PosX | Self::PosY | Self::PosZ => 1,
            Self::NegX | Self::NegY | Self::NegZ => -1,
        }
    }
}

/// Rack volume flow, before and after the power is known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RackFlow {
    /// m³/s per W.
    Ratio(f64),
    /// m³/s.
    Absolute(f64),
}

/// A rack as read from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RackSpec {
    /// Rack name without the encoded parameters.
    pub name: String,
    /// Flow direction.
    pub direction: FlowDirection,
    /// Heat dissipation (W).
    pub power: f64,
    /// Volume flow.
    pub flow: RackFlow,
}

impl RackSpec {
    /// Create a rack with its flow still expressed per watt.
    pub fn new(name: impl Into<String>, direction: FlowDirection, power: f64, ratio: f64) -> Result<Self> {
        let name = name.into();
        if !(power.is_finite() && power >= 0.0) {
            return Err(RoomflowError::region(&name, format!("rack power must be >= 0, got {power}")));
        }
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(RoomflowError::region(&name, format!("rack flow ratio must be > 0, got {ratio}")));
        }
        Ok(Self {
            name,
            direction,
            power,
            flow: RackFlow::Ratio(ratio),
        })
    }

    /// Parse the structured name `"<name> <dir> <heatW> <flowRatio>"`.
    ///
    /// Heat and ratio may be omitted, in which case the defaults apply.
    pub fn from_structured_name(encoded: &str) -> Result<Self> {
        let malformed = || RoomflowError::MalformedRackName(encoded.to_string());
        let mut parts = encoded.split_whitespace();
        let name = parts.next().ok_or_else(malformed)?;
        let direction = parts
            .next()
            .and_then(|d| d.parse::<i64>().ok())
            .and_then(FlowDirection::from_code)
            .ok_or_else(malformed)?;
        let power = match parts.next() {
            Some(p) => p.parse::<f64>().map_err(|_| malformed())?,
            None => DEFAULT_RACK_POWER,
        };
        let ratio = match parts.next() {
            Some(r) => r.parse::<f64>().map_err(|_| malformed())?,
            None => DEFAULT_FLOW_RATIO,
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Self::new(name, direction, power, ratio)
    }

    /// Encode back into the structured-name form.
    pub fn structured_name(&self) -> String {
        format!(
            "{} {} {} {}",
            self.name,
            self.direction.code(),
            self.power,
            self.flow_ratio()
        )
    }

    /// Convert a per-watt flow into an absolute one using the current power.
    pub fn resolve_flow(&mut self) {
        if let RackFlow::Ratio(ratio) = self.flow {
            self.flow = RackFlow::Absolute(ratio * self.power);
        }
    }

    /// Flow per watt.
    pub fn flow_ratio(&self) -> f64 {
        match self.flow {
            RackFlow::Ratio(ratio) => ratio,
            RackFlow::Absolute(flow) if self.power > 0.0 => flow / self.power,
            RackFlow::Absolute(_) => 0.0,
        }
    }

    /// Absolute volume flow (m³/s).
    pub fn flow_rate(&self) -> f64 {
        match self.flow {
            RackFlow::Ratio(ratio) => ratio * self.power,
            RackFlow::Absolute(flow) => flow,
        }
    }

    /// Override the power, keeping the flow per watt.
    ///
    /// The absolute flow is first turned back into a ratio with the old
    /// power, then the power is replaced, then the flow is rescaled.
    pub fn set_power(&mut self, power: f64) {
        let ratio = self.flow_ratio();
        self.power = power;
        self.flow = RackFlow::Ratio(ratio);
        self.resolve_flow();
    }
}

impl FromStr for RackSpec {
    type Err = RoomflowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_structured_name(s)
    }
}

impl fmt::Display for RackSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:.0} W, {:.4} m3/s)",
            self.name,
            self.direction,
            self.power,
            self.flow_rate()
        )
    }
}

/// Split a total power budget across racks.
///
/// Racks with `Some(power)` keep the supplied value; the others share what
/// is left evenly. When every rack is supplied, the supplied values are
/// scaled so they add up to the budget. The last rack that receives a
/// computed share absorbs the rounding residual.
pub fn redistribute_power(total: f64, supplied: &[Option<f64>]) -> Result<Vec<f64>> {
    if !(total.is_finite() && total >= 0.0) {
        return Err(RoomflowError::config(format!("rack power budget must be >= 0, got {total}")));
    }
    if let Some(bad) = supplied.iter().flatten().find(|p| !(p.is_finite() && **p >= 0.0)) {
        return Err(RoomflowError::config(format!("supplied rack power must be >= 0, got {bad}")));
    }
    if supplied.is_empty() {
        return Ok(Vec::new());
    }

    let supplied_sum: f64 = supplied.iter().flatten().sum();
    let free = supplied.iter().filter(|p| p.is_none()).count();

    let mut powers: Vec<f64> = if free > 0 {
        let remainder = total - supplied_sum;
        if remainder < 0.0 {
            return Err(RoomflowError::config(format!(
                "supplied rack powers ({supplied_sum} W) exceed the budget ({total} W)"
            )));
        }
        let share = remainder / free as f64;
        supplied.iter().map(|p| p.unwrap_or(share)).collect()
    } else {
        if supplied_sum <= 0.0 {
            return Err(RoomflowError::config(
                "cannot scale zero supplied rack powers to a budget",
            ));
        }
        let scale = total / supplied_sum;
        supplied.iter().flatten().map(|p| p * scale).collect()
    };

    // Residual goes to the last computed entry
    let residual_slot = if free > 0 {
        supplied.iter().rposition(|p| p.is_none())
    } else {
        Some(powers.len() - 1)
    };
    if let Some(slot) = residual_slot {
        let others: f64 = powers
            .iter()
            .enumerate()
            .filter(|(n, _)| *n != slot)
            .map(|(_, p)| p)
            .sum();
        powers[slot] = (total - others).max(0.0);
    }
    Ok(powers)
}

/// Per-step state of the black-box rack model.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RackState {
    /// Owner id in the boundary table.
    pub owner: u32,
    /// Mean temperature over the inlet face (°C).
    pub inlet_temperature: f64,
    /// Discharge temperature (°C).
    pub outlet_temperature: f64,
    /// Signed velocity through both faces along the rack axis (m/s).
    pub face_velocity: f64,
    /// Area of the inlet face (m²).
    pub face_area: f64,
}

impl RackState {
    /// Update the discharge conditions from the inlet mean.
    ///
    /// `T_out = T_in + Q / (rho cp V)` and both faces move air at `V / A`.
    pub fn update(&mut self, spec: &RackSpec, inlet_temperature: f64, density: f64, specific_heat: f64) {
        let flow = spec.flow_rate();
        self.inlet_temperature = inlet_temperature;
        self.outlet_temperature = if flow > 0.0 {
            inlet_temperature + spec.power / (density * specific_heat * flow)
        } else {
            inlet_temperature
        };
        self.face_velocity = if self.face_area > 0.0 {
            spec.direction.sign() as f64 * flow / self.face_area
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_name() {
        let rack = RackSpec::from_structured_name("Rack1 -2 8000 0.0001").unwrap();
        assert_eq!(rack.name, "Rack1");
        assert_eq!(rack.direction, FlowDirection::NegY);
        assert_eq!(rack.power, 8000.0);
        assert_eq!(rack.flow, RackFlow::Ratio(0.0001));
    }

    #[test]
    fn test_parse_defaults() {
        let rack: RackSpec = "R7 3".parse().unwrap();
        assert_eq!(rack.direction, FlowDirection::PosZ);
        assert_eq!(rack.power, DEFAULT_RACK_POWER);
        assert_eq!(rack.flow, RackFlow::Ratio(DEFAULT_FLOW_RATIO));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "Rack1", "Rack1 4 100 0.1", "Rack1 1 hot 0.1", "Rack1 1 100 0.1 extra"] {
            assert!(
                matches!(RackSpec::from_structured_name(bad), Err(RoomflowError::MalformedRackName(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_structured_name_round_trip() {
        let rack = RackSpec::new("A", FlowDirection::NegX, 4000.0, 0.0002).unwrap();
        let back = RackSpec::from_structured_name(&rack.structured_name()).unwrap();
        assert_eq!(back, rack);
    }

    #[test]
    fn test_ratio_then_absolute() {
        let mut rack = RackSpec::new("A", FlowDirection::PosX, 5000.0, 1.0e-4).unwrap();
        rack.resolve_flow();
        assert!(matches!(rack.flow, RackFlow::Absolute(f) if (f - 0.5).abs() < 1e-12));

        rack.set_power(8000.0);
        match rack.flow {
            RackFlow::Absolute(flow) => assert!((flow - 0.8).abs() < 1e-12),
            other => panic!("flow not absolute: {other:?}"),
        }
        assert!((rack.flow_ratio() - 1.0e-4).abs() < 1e-18);
    }

    #[test]
    fn test_redistribute_even_split() {
        let powers = redistribute_power(60000.0, &[None; 10]).unwrap();
        assert!(powers.iter().all(|&p| p == 6000.0));
    }

    #[test]
    fn test_redistribute_with_overrides() {
        let mut supplied = vec![None; 10];
        supplied[0] = Some(8000.0);
        supplied[5] = Some(12000.0);
        let powers = redistribute_power(60000.0, &supplied).unwrap();
        assert_eq!(powers[0], 8000.0);
        assert_eq!(powers[5], 12000.0);
        assert_eq!(powers[1], 5000.0);
        assert_eq!(powers.iter().sum::<f64>(), 60000.0);
    }

    #[test]
    fn test_redistribute_all_supplied_scales() {
        let powers = redistribute_power(100.0, &[Some(10.0), Some(30.0)]).unwrap();
        assert_eq!(powers, vec![25.0, 75.0]);
    }

    #[test]
    fn test_redistribute_over_budget() {
        assert!(redistribute_power(100.0, &[Some(80.0), Some(30.0), None]).is_err());
        assert!(redistribute_power(100.0, &[Some(-1.0), None]).is_err());
    }

    #[test]
    fn test_black_box_update() {
        let mut rack = RackSpec::new("A", FlowDirection::NegX, 1205.0, 1.0e-4).unwrap();
        rack.resolve_flow();
        let mut state = RackState {
            face_area: 0.5,
            ..Default::default()
        };
        state.update(&rack, 20.0, 1.0, 1000.0);
        // Q / (rho cp V) = 1205 / (1000 * 0.1205) = 10 K
        assert!((state.outlet_temperature - 30.0).abs() < 1e-9);
        assert!((state.face_velocity + 0.241).abs() < 1e-12);
    }
}
