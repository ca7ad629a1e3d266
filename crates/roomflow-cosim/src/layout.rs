//! Exchange vector layout.
//!
//! The driver passes one flat input vector and receives one flat output
//! vector per exchange. Both are fixed concatenations of blocks:
//!
//! ```text
//! inputs   surfaces | shade control | shade absorbed | sensible | latent | p
//!          | port mass flow | port T | port species | port trace
//! outputs  surfaces | room T | shade T | port T | port species | port trace
//!          | sensors
//! ```
//!
//! Shade blocks are present only when the case has shaded windows. Species
//! and trace blocks hold `ports × n` values ordered by [`SpeciesLayout`],
//! the same way on both sides.
//!
//! Values stay in driver units here (kelvin, W, kg/s, Pa); the engine
//! converts them.

use roomflow_core::{Result, RoomflowError};
use roomflow_ffd::config::{CaseConfig, SpeciesLayout};
use roomflow_ffd::solver::ShadeInput;

/// Sizes and ordering of the exchange vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeLayout {
    /// Coupled surfaces.
    pub surfaces: usize,
    /// Shaded windows.
    pub shades: usize,
    /// Fluid ports.
    pub ports: usize,
    /// Species per port.
    pub species: usize,
    /// Trace substances per port.
    pub trace: usize,
    /// Sensors.
    pub sensors: usize,
    /// Species block ordering.
    pub species_layout: SpeciesLayout,
}

/// One port's block of the input vector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PortValues {
    /// Mass flow into the room (kg/s).
    pub mass_flow: f64,
    /// Temperature (K).
    pub temperature: f64,
    /// Species mass fractions.
    pub species: [f64; 2],
    /// Trace substances.
    pub trace: [f64; 2],
}

/// Decoded input vector, driver units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomInputs {
    /// Surface temperature (K) or heat flow (W), per surface kind.
    pub surfaces: Vec<f64>,
    /// Shading state per shaded window.
    pub shades: Vec<ShadeInput>,
    /// Sensible heat gain (W).
    pub sensible_heat: f64,
    /// Latent heat gain (W).
    pub latent_heat: f64,
    /// Room pressure (Pa).
    pub pressure: f64,
    /// Port conditions.
    pub ports: Vec<PortValues>,
}

/// Engine results before encoding, driver units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomOutputs {
    /// Surface heat flow (W) or temperature (K), per surface kind.
    pub surfaces: Vec<f64>,
    /// Volume-mean room temperature (K).
    pub room_temperature: f64,
    /// Shade temperatures (K).
    pub shades: Vec<f64>,
    /// Port mean temperature (K).
    pub port_temperatures: Vec<f64>,
    /// Port species, `[port][species]`.
    pub port_species: Vec<[f64; 2]>,
    /// Port trace substances, `[port][substance]`.
    pub port_trace: Vec<[f64; 2]>,
    /// Sensor readings.
    pub sensors: Vec<f64>,
}

impl ExchangeLayout {
    /// Layout implied by a case's coupling section and sensors.
    pub fn from_case(case: &CaseConfig) -> Self {
        let coupling = &case.coupling;
        Self {
            surfaces: coupling.surfaces.len(),
            shades: coupling.shaded_windows.len(),
            ports: coupling.ports.len(),
            species: coupling.species,
            trace: coupling.trace,
            sensors: case.sensors.len(),
            species_layout: coupling.species_layout,
        }
    }

    /// Whether the shade blocks are present.
    pub fn has_shading(&self) -> bool {
        self.shades > 0
    }

    /// Length of the input vector.
    pub fn n_inputs(&self) -> usize {
        self.surfaces + 2 * self.shades + 3 + self.ports * (2 + self.species + self.trace)
    }

    /// Length of the output vector.
    pub fn n_outputs(&self) -> usize {
        self.surfaces + 1 + self.shades + self.ports * (1 + self.species + self.trace) + self.sensors
    }

    fn block_offset(&self, port: usize, n: usize, index: usize) -> usize {
        self.species_layout.offset(port, index, self.ports, n)
    }

    /// Split an input vector into its blocks.
    pub fn decode_inputs(&self, u: &[f64]) -> Result<RoomInputs> {
        if u.len() != self.n_inputs() {
            return Err(RoomflowError::LayoutMismatch {
                what: "driver inputs",
                expected: self.n_inputs(),
                actual: u.len(),
            });
        }
        let mut cursor = Cursor::new(u);
        let surfaces = cursor.take(self.surfaces).to_vec();
        let control = cursor.take(self.shades);
        let absorbed = cursor.take(self.shades);
        let shades = control
            .iter()
            .zip(absorbed)
            .map(|(&control, &absorbed)| ShadeInput { control, absorbed })
            .collect();
        let sensible_heat = cursor.next();
        let latent_heat = cursor.next();
        let pressure = cursor.next();
        let mass_flow = cursor.take(self.ports);
        let temperature = cursor.take(self.ports);
        let species = cursor.take(self.ports * self.species);
        let trace = cursor.take(self.ports * self.trace);

        let ports = (0..self.ports)
            .map(|p| {
                let mut values = PortValues {
                    mass_flow: mass_flow[p],
                    temperature: temperature[p],
                    ..Default::default()
                };
                for s in 0..self.species {
                    values.species[s] = species[self.block_offset(p, self.species, s)];
                }
                for c in 0..self.trace {
                    values.trace[c] = trace[self.block_offset(p, self.trace, c)];
                }
                values
            })
            .collect();

        Ok(RoomInputs {
            surfaces,
            shades,
            sensible_heat,
            latent_heat,
            pressure,
            ports,
        })
    }

    /// Concatenate outputs into `y`, which must have `n_outputs` slots.
    pub fn encode_outputs(&self, out: &RoomOutputs, y: &mut [f64]) -> Result<()> {
        if y.len() != self.n_outputs() {
            return Err(RoomflowError::LayoutMismatch {
                what: "engine outputs",
                expected: self.n_outputs(),
                actual: y.len(),
            });
        }
        let blocks = [
            ("surface outputs", out.surfaces.len(), self.surfaces),
            ("shade outputs", out.shades.len(), self.shades),
            ("port temperatures", out.port_temperatures.len(), self.ports),
            ("port species", out.port_species.len(), self.ports),
            ("port trace", out.port_trace.len(), self.ports),
            ("sensor outputs", out.sensors.len(), self.sensors),
        ];
        for (what, actual, expected) in blocks {
            if actual != expected {
                return Err(RoomflowError::LayoutMismatch { what, expected, actual });
            }
        }

        let (surfaces, rest) = y.split_at_mut(self.surfaces);
        surfaces.copy_from_slice(&out.surfaces);
        let (room, rest) = rest.split_at_mut(1);
        room[0] = out.room_temperature;
        let (shades, rest) = rest.split_at_mut(self.shades);
        shades.copy_from_slice(&out.shades);
        let (ports, rest) = rest.split_at_mut(self.ports);
        ports.copy_from_slice(&out.port_temperatures);
        let (species, rest) = rest.split_at_mut(self.ports * self.species);
        let (trace, sensors) = rest.split_at_mut(self.ports * self.trace);
        for p in 0..self.ports {
            for s in 0..self.species {
                species[self.block_offset(p, self.species, s)] = out.port_species[p][s];
            }
            for c in 0..self.trace {
                trace[self.block_offset(p, self.trace, c)] = out.port_trace[p][c];
            }
        }
        sensors.copy_from_slice(&out.sensors);
        Ok(())
    }
}

struct Cursor<'a> {
    values: &'a [f64],
}

impl<'a> Cursor<'a> {
    fn new(values: &'a [f64]) -> Self {
        Self { values }
    }

    fn take(&mut self, n: usize) -> &'a [f64] {
        let (head, tail) = self.values.split_at(n);
        self.values = tail;
        head
    }

    fn next(&mut self) -> f64 {
        self.take(1)[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(species_layout: SpeciesLayout) -> ExchangeLayout {
        ExchangeLayout {
            surfaces: 2,
            shades: 1,
            ports: 2,
            species: 2,
            trace: 1,
            sensors: 1,
            species_layout,
        }
    }

    #[test]
    fn test_vector_lengths() {
        let l = layout(SpeciesLayout::SpeciesMajor);
        // 2 + 2 + 3 + 2 * (2 + 2 + 1)
        assert_eq!(l.n_inputs(), 17);
        // 2 + 1 + 1 + 2 * (1 + 2 + 1) + 1
        assert_eq!(l.n_outputs(), 13);

        let plain = ExchangeLayout { shades: 0, ..l };
        assert!(!plain.has_shading());
        assert_eq!(plain.n_inputs(), 15);
        assert_eq!(plain.n_outputs(), 12);
    }

    #[test]
    fn test_layout_from_case() {
        let case = CaseConfig::server_room();
        let l = ExchangeLayout::from_case(&case);
        assert_eq!((l.surfaces, l.ports, l.sensors, l.shades), (1, 2, 2, 0));
        assert_eq!(l.n_inputs(), 1 + 3 + 4);
        assert_eq!(l.n_outputs(), 1 + 1 + 2 + 2);
    }

    #[test]
    fn test_decode_species_major() {
        let l = layout(SpeciesLayout::SpeciesMajor);
        let u: Vec<f64> = (0..l.n_inputs()).map(|v| v as f64).collect();
        let inputs = l.decode_inputs(&u).unwrap();
        assert_eq!(inputs.surfaces, vec![0.0, 1.0]);
        assert_eq!(inputs.shades, vec![ShadeInput { control: 2.0, absorbed: 3.0 }]);
        assert_eq!((inputs.sensible_heat, inputs.latent_heat, inputs.pressure), (4.0, 5.0, 6.0));
        assert_eq!(inputs.ports[0].mass_flow, 7.0);
        assert_eq!(inputs.ports[1].mass_flow, 8.0);
        assert_eq!(inputs.ports[1].temperature, 10.0);
        // Species block starts at 11: [s0p0, s0p1, s1p0, s1p1]
        assert_eq!(inputs.ports[0].species, [11.0, 13.0]);
        assert_eq!(inputs.ports[1].species, [12.0, 14.0]);
        assert_eq!(inputs.ports[1].trace[0], 16.0);
    }

    #[test]
    fn test_decode_port_major() {
        let l = layout(SpeciesLayout::PortMajor);
        let u: Vec<f64> = (0..l.n_inputs()).map(|v| v as f64).collect();
        let inputs = l.decode_inputs(&u).unwrap();
        // [p0s0, p0s1, p1s0, p1s1]
        assert_eq!(inputs.ports[0].species, [11.0, 12.0]);
        assert_eq!(inputs.ports[1].species, [13.0, 14.0]);
    }

    #[test]
    fn test_encode_uses_same_ordering() {
        let l = layout(SpeciesLayout::SpeciesMajor);
        let out = RoomOutputs {
            surfaces: vec![100.0, 295.0],
            room_temperature: 296.0,
            shades: vec![300.0],
            port_temperatures: vec![293.0, 297.0],
            port_species: vec![[0.1, 0.2], [0.3, 0.4]],
            port_trace: vec![[5.0, 0.0], [6.0, 0.0]],
            sensors: vec![298.0],
        };
        let mut y = vec![0.0; l.n_outputs()];
        l.encode_outputs(&out, &mut y).unwrap();
        assert_eq!(
            y,
            vec![100.0, 295.0, 296.0, 300.0, 293.0, 297.0, 0.1, 0.3, 0.2, 0.4, 5.0, 6.0, 298.0]
        );
    }

    #[test]
    fn test_wrong_lengths_rejected() {
        let l = layout(SpeciesLayout::SpeciesMajor);
        assert!(matches!(
            l.decode_inputs(&[0.0; 3]),
            Err(RoomflowError::LayoutMismatch { expected: 17, actual: 3, .. })
        ));
        let mut y = vec![0.0; l.n_outputs()];
        let short = RoomOutputs::default();
        assert!(l.encode_outputs(&short, &mut y).is_err());
    }
}
