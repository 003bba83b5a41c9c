//! Physical parameter extraction
//!
//! Closed-form transform from a fitted (amplitude, damping) pair and a gas
//! pressure reading to particle radius, mass, and the volts-to-metres
//! conversion factor, each with first-order propagated uncertainty.
//!
//! The kinetic-theory radius formula assumes the damping is dominated by
//! environmental gas collisions (harmonic motion, feedback off, pressures of
//! order 1 mbar). Supplying a feedback-modified damping gives a physically
//! meaningless radius; that precondition is the caller's responsibility and
//! is not checked here.

use crate::measurement::Measurement;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Physical constants entering the extraction formulas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalConstants {
    /// Particle bulk density, kg/m³ (fused silica).
    pub particle_density: f64,
    /// Effective gas molecule diameter, m (air; I'Hanlon 2003).
    pub gas_molecule_diameter: f64,
    /// Reference temperature, K.
    pub temperature: f64,
    /// Boltzmann constant, m²·kg·s⁻²·K⁻¹.
    pub boltzmann: f64,
    /// Dynamic viscosity of air, Pa·s.
    pub air_viscosity: f64,
    /// Empirical prefactor of the kinetic-theory radius formula.
    pub radius_calibration: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            particle_density: 2200.0,
            gas_molecule_diameter: 0.372e-9,
            temperature: 300.0,
            boltzmann: 1.38e-23,
            air_viscosity: 18.27e-6,
            radius_calibration: 0.169,
        }
    }
}

/// Extracted particle parameters with propagated uncertainties.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhysicalParameters {
    /// Particle radius, m.
    pub radius: Measurement,
    /// Particle mass, kg.
    pub mass: Measurement,
    /// Volts-to-metres conversion factor.
    pub conversion_factor: Measurement,
}

/// Compute radius, mass, and conversion factor from a pressure reading and
/// the fitted amplitude and damping.
///
/// `pressure_mbar` is converted to pascal internally; `pressure_rel_err` is
/// the relative pressure uncertainty (0.15 for 15 %). Only the amplitude
/// and damping of the fit enter the transform, not the trap frequency.
pub fn extract_parameters(
    pressure_mbar: f64,
    pressure_rel_err: f64,
    amplitude: Measurement,
    damping: Measurement,
    constants: &PhysicalConstants,
) -> PhysicalParameters {
    let c = constants;
    let pressure = 100.0 * pressure_mbar;

    let radius = c.radius_calibration * 9.0 * PI * c.air_viscosity
        * c.gas_molecule_diameter.powi(2)
        / (2.0f64.sqrt() * c.particle_density * c.boltzmann * c.temperature)
        * pressure
        / damping.value;
    let radius_rel = (pressure_rel_err.powi(2) + damping.relative_err().powi(2)).sqrt();

    let mass = c.particle_density * 4.0 * PI * radius.powi(3) / 3.0;
    let mass_rel = 2.0 * radius_rel;

    let conversion_factor =
        (amplitude.value * PI * mass / (c.boltzmann * c.temperature * damping.value)).sqrt();
    let conversion_rel = (amplitude.relative_err().powi(2)
        + mass_rel.powi(2)
        + damping.relative_err().powi(2))
    .sqrt();

    PhysicalParameters {
        radius: Measurement::new(radius, radius * radius_rel),
        mass: Measurement::new(mass, mass * mass_rel),
        conversion_factor: Measurement::new(conversion_factor, conversion_factor * conversion_rel),
    }
}

/// Temperature of a data set relative to a reference assumed to sit at the
/// reference temperature (300 K by default): `T = T₀·(A·Γ_ref)/(A_ref·Γ)`.
pub fn relative_temperature(
    reference_amplitude: Measurement,
    reference_damping: Measurement,
    amplitude: Measurement,
    damping: Measurement,
    constants: &PhysicalConstants,
) -> Measurement {
    ((amplitude * reference_damping) / (reference_amplitude * damping))
        .scale(constants.temperature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn exact(value: f64) -> Measurement {
        Measurement::new(value, 0.0)
    }

    #[test]
    fn test_radius_inverse_in_damping() {
        let constants = PhysicalConstants::default();
        let a = exact(1.0e16);
        let p1 = extract_parameters(1.0, 0.0, a, exact(1000.0), &constants);
        let p2 = extract_parameters(1.0, 0.0, a, exact(2000.0), &constants);
        // radius ∝ pressure / Γ
        assert_relative_eq!(p2.radius.value, p1.radius.value / 2.0, max_relative = 1e-12);
        // mass ∝ radius³
        assert_relative_eq!(p2.mass.value, p1.mass.value / 8.0, max_relative = 1e-12);
        // conversion ∝ sqrt(m / Γ)
        assert_relative_eq!(
            p2.conversion_factor.value,
            p1.conversion_factor.value / 4.0,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_radius_linear_in_pressure() {
        let constants = PhysicalConstants::default();
        let a = exact(1.0e16);
        let g = exact(1500.0);
        let p1 = extract_parameters(1.0, 0.0, a, g, &constants);
        let p2 = extract_parameters(3.0, 0.0, a, g, &constants);
        assert_relative_eq!(p2.radius.value, 3.0 * p1.radius.value, max_relative = 1e-12);
    }

    #[test]
    fn test_magnitudes_are_physical() {
        // ~1 mbar, typical fit output: expect a radius of tens of nm and a
        // femtogram-scale mass.
        let constants = PhysicalConstants::default();
        let params = extract_parameters(
            1.2,
            0.15,
            Measurement::new(5.0e15, 5.0e14),
            Measurement::new(2000.0, 100.0),
            &constants,
        );
        assert!(params.radius.value > 1e-9 && params.radius.value < 1e-6,
            "radius {}", params.radius.value);
        assert!(params.mass.value > 1e-20 && params.mass.value < 1e-14,
            "mass {}", params.mass.value);
        assert!(params.conversion_factor.value > 0.0);
    }

    #[test]
    fn test_error_propagation_quadrature() {
        let constants = PhysicalConstants::default();
        let params = extract_parameters(
            1.0,
            0.03,
            Measurement::new(1.0e16, 0.0),
            Measurement::new(1000.0, 40.0), // 4 %
            &constants,
        );
        let expected_radius_rel = (0.03f64.powi(2) + 0.04f64.powi(2)).sqrt();
        assert_relative_eq!(params.radius.relative_err(), expected_radius_rel, epsilon = 1e-12);
        assert_relative_eq!(
            params.mass.relative_err(),
            2.0 * expected_radius_rel,
            epsilon = 1e-12
        );
        let expected_conv_rel =
            ((2.0 * expected_radius_rel).powi(2) + 0.04f64.powi(2)).sqrt();
        assert_relative_eq!(
            params.conversion_factor.relative_err(),
            expected_conv_rel,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_relative_temperature_of_reference_is_t0() {
        let constants = PhysicalConstants::default();
        let a = Measurement::new(4.0e15, 4.0e14);
        let g = Measurement::new(1200.0, 60.0);
        let t = relative_temperature(a, g, a, g, &constants);
        assert_relative_eq!(t.value, 300.0, max_relative = 1e-12);
    }

    #[test]
    fn test_relative_temperature_scales_with_amplitude() {
        let constants = PhysicalConstants::default();
        let a_ref = exact(4.0e15);
        let g = exact(1200.0);
        // Half the amplitude at the same damping: half the temperature.
        let t = relative_temperature(a_ref, g, exact(2.0e15), g, &constants);
        assert_relative_eq!(t.value, 150.0, max_relative = 1e-12);
    }
}
