//! Unit conversions applied at the coupling boundary.
//!
//! The driver speaks SI with temperatures in kelvin; the solver works in
//! degrees Celsius. Conversions happen exactly once on the way in and once
//! on the way out.

/// Offset between the kelvin and Celsius scales.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Specific gas constant of dry air, J/(kg K).
pub const GAS_CONSTANT_AIR: f64 = 287.05;

/// An affine map `y = scale * x + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    /// Multiplicative part.
    pub scale: f64,
    /// Additive part.
    pub offset: f64,
}

impl AffineMap {
    /// Kelvin to degrees Celsius.
    pub const KELVIN_TO_CELSIUS: AffineMap = AffineMap {
        scale: 1.0,
        offset: -KELVIN_OFFSET,
    };

    /// Degrees Celsius to kelvin.
    pub const CELSIUS_TO_KELVIN: AffineMap = AffineMap {
        scale: 1.0,
        offset: KELVIN_OFFSET,
    };

    /// Apply the map.
    #[inline]
    pub fn apply(&self, x: f64) -> f64 {
        self.scale * x + self.offset
    }

    /// The inverse map. `scale` must be non-zero.
    pub fn inverse(&self) -> AffineMap {
        AffineMap {
            scale: 1.0 / self.scale,
            offset: -self.offset / self.scale,
        }
    }
}

/// Kelvin to degrees Celsius.
#[inline]
pub fn kelvin_to_celsius(t: f64) -> f64 {
    AffineMap::KELVIN_TO_CELSIUS.apply(t)
}

/// Degrees Celsius to kelvin.
#[inline]
pub fn celsius_to_kelvin(t: f64) -> f64 {
    AffineMap::CELSIUS_TO_KELVIN.apply(t)
}

/// Ideal-gas density of air at pressure `p` (Pa) and temperature `t` (°C).
pub fn air_density(p: f64, t_celsius: f64) -> f64 {
    p / (GAS_CONSTANT_AIR * celsius_to_kelvin(t_celsius))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for &t in &[0.0, 1.0e-9, 20.0, 293.15, -40.0, 1.0e6] {
            let back = celsius_to_kelvin(kelvin_to_celsius(t));
            assert!((back - t).abs() <= 1e-9 * t.abs().max(1.0), "t = {t}");
        }
    }

    #[test]
    fn test_inverse_map() {
        let inv = AffineMap::KELVIN_TO_CELSIUS.inverse();
        assert_eq!(inv, AffineMap::CELSIUS_TO_KELVIN);
    }

    #[test]
    fn test_air_density() {
        let rho = air_density(101_325.0, 20.0);
        assert!((rho - 1.204).abs() < 1e-3, "rho = {rho}");
    }
}
