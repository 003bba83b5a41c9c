//! End-to-end analysis of a synthetic trapped-particle record
//!
//! Run with: cargo run --example analyze_synthetic -p trapspec-core

use std::f64::consts::PI;
use trapspec_core::prelude::*;

fn main() {
    // Synthesize a record: three motional tones plus deterministic jitter,
    // standing in for a decoded oscilloscope trace.
    let fs = 1.0e6;
    let (f_z, f_x, f_y) = (50_000.0, 80_000.0, 120_000.0);
    let voltage: Vec<f64> = (0..65_536)
        .map(|i| {
            let t = i as f64 / fs;
            let jitter = ((i as f64 * 1.618033).sin() * 43758.5453).fract() * 0.05;
            (2.0 * PI * f_z * t).sin()
                + 0.8 * (2.0 * PI * f_x * t).sin()
                + 0.6 * (2.0 * PI * f_y * t).sin()
                + jitter
        })
        .collect();
    let series = TimeSeries::from_start(0.0, 1.0 / fs, voltage).expect("valid series");

    let spectrum = series.psd(&WelchConfig::default()).expect("psd");
    println!(
        "PSD: {} bins up to {:.0} Hz, global peak at {:.0} Hz",
        spectrum.len(),
        spectrum.frequencies.last().unwrap(),
        spectrum.peak_frequency().expect("peak")
    );

    // Fit the z resonance with the auto-width search.
    let fit = fit_psd_auto(&spectrum, f_z, &AutoWidthConfig::default(), &FitConfig::default())
        .expect("auto fit");
    println!(
        "fit: f_trap = {:.1} Hz, Gamma = {:.1} +- {:.1}",
        fit.trap_freq.value / (2.0 * PI),
        fit.damping.value,
        fit.damping.std_dev
    );

    // 1.2 mbar with 15 % uncertainty, as a calibration table would supply.
    let params = extract_parameters(
        1.2,
        0.15,
        fit.amplitude,
        fit.damping,
        &PhysicalConstants::default(),
    );
    println!("radius = {}", params.radius);
    println!("mass   = {}", params.mass);
    println!("conversion factor = {}", params.conversion_factor);

    // Separate the three motional channels and scan z for phase jumps.
    let channels = extract_channels(
        &series,
        &spectrum,
        [f_z - 1_000.0, f_x + 1_000.0, f_y - 1_000.0],
        5_000.0,
        &ChannelConfig::default(),
    )
    .expect("channel extraction");
    println!("channels: {} samples per axis", channels.z.len());

    let flags = find_collisions(&channels.z, 50.0).expect("discriminator");
    let record = count_collisions(&flags);
    println!("collisions: {} events", record.count);
}
