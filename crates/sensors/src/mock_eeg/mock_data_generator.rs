use std::f64::consts::PI;

use log::debug;
use rand::Rng;
use rand_distr::StandardNormal;

/// Band weights per electrode, cycling every 8 electrodes.
/// Format: [delta, theta, alpha, beta, gamma]
const BASE_CHANNEL_WEIGHTS: [[f64; 5]; 8] = [
    [3.0, 1.5, 0.8, 0.4, 0.1], // frontal left - more delta/theta
    [3.0, 1.5, 0.8, 0.4, 0.1], // frontal right
    [2.0, 1.2, 1.5, 0.6, 0.1], // central left - mix
    [2.0, 1.2, 1.5, 0.6, 0.1], // central right
    [1.5, 1.0, 2.5, 0.7, 0.1], // parietal left - stronger alpha
    [1.5, 1.0, 2.5, 0.7, 0.1], // parietal right
    [1.2, 0.8, 3.0, 0.5, 0.1], // occipital left - strongest alpha
    [1.2, 0.8, 3.0, 0.5, 0.1], // occipital right
];

/// Band centre frequencies in Hz, same order as the weights.
const BAND_FREQS: [f64; 5] = [2.5, 6.0, 10.0, 20.0, 40.0];

/// Scale from unit band amplitude to microvolts.
const MICROVOLTS_PER_UNIT: f64 = 10.0;

/// Standard deviation of the background noise, in unit band amplitude.
const NOISE_STD_DEV: f64 = 0.1;

/// Synthetic EEG source with per-channel band mixtures, 50 Hz line noise and
/// Gaussian background noise, in microvolts.
#[derive(Debug, Clone)]
pub struct EegGenerator {
    sample_rate: f64,
    weights: Vec<[f64; 5]>,
    phases: Vec<[f64; 5]>,
    line_phase: Vec<f64>,
    line_amplitude: Vec<f64>,
}

impl EegGenerator {
    pub fn new(sample_rate: u16, num_channels: usize) -> Self {
        let mut rng = rand::thread_rng();
        debug!(
            "Initializing EEG generator with {} Hz sample rate, {} channels",
            sample_rate, num_channels
        );

        let weights = (0..num_channels)
            .map(|i| BASE_CHANNEL_WEIGHTS[i % BASE_CHANNEL_WEIGHTS.len()])
            .collect();
        let phases = (0..num_channels)
            .map(|_| std::array::from_fn(|_| rng.gen::<f64>() * 2.0 * PI))
            .collect();
        let line_phase = (0..num_channels).map(|_| rng.gen::<f64>() * 2.0 * PI).collect();
        // Different channels pick up different amounts of line noise
        let line_amplitude = (0..num_channels).map(|_| rng.gen_range(0.2..0.7)).collect();

        Self {
            sample_rate: f64::from(sample_rate.max(1)),
            weights,
            phases,
            line_phase,
            line_amplitude,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.weights.len()
    }

    /// Next sample of electrode `channel`, in microvolts.
    pub fn next_sample(&mut self, channel: usize) -> f64 {
        let mut rng = rand::thread_rng();
        let phases = &mut self.phases[channel];
        let mut signal = 0.0;
        for (band, phase) in phases.iter_mut().enumerate() {
            *phase = (*phase + 2.0 * PI * BAND_FREQS[band] / self.sample_rate) % (2.0 * PI);
            signal += phase.sin() * self.weights[channel][band];
        }

        let line = &mut self.line_phase[channel];
        *line = (*line + 2.0 * PI * 50.0 / self.sample_rate) % (2.0 * PI);
        signal += line.sin() * self.line_amplitude[channel];

        let noise: f64 = rng.sample(StandardNormal);
        signal += noise * NOISE_STD_DEV;
        signal * MICROVOLTS_PER_UNIT
    }

    /// `len` consecutive samples of electrode `channel`.
    pub fn next_block(&mut self, channel: usize, len: usize) -> Vec<f64> {
        (0..len).map(|_| self.next_sample(channel)).collect()
    }
}

/// Accelerometer axis readings in g: gravity on z, small jitter on every axis.
pub fn accelerometer_block(axis: usize, len: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let rest = if axis == 2 { 1.0 } else { 0.0 };
    (0..len).map(|_| rest + rng.gen_range(-0.01..0.01)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_a_plausible_range() {
        let mut gen = EegGenerator::new(250, 3);
        assert_eq!(gen.num_channels(), 3);
        for ch in 0..3 {
            for sample in gen.next_block(ch, 500) {
                assert!(sample.is_finite());
                assert!(sample.abs() < 200.0, "sample {} out of range", sample);
            }
        }
    }

    #[test]
    fn accelerometer_rests_on_z() {
        let z = accelerometer_block(2, 10);
        assert!(z.iter().all(|v| (v - 1.0).abs() < 0.02));
        let x = accelerometer_block(0, 10);
        assert!(x.iter().all(|v| v.abs() < 0.02));
    }
}
