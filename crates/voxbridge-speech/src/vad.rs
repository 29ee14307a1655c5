//! Per-frame voice classification over a sliding window.
//!
//! The classifier never looks at a single frame in isolation: it keeps the
//! last `window_ms` of PCM and classifies each incoming frame against that
//! window. A frame counts as voice iff:
//!
//! 1. window RMS ≥ the configured threshold (int16 sample scale), AND
//! 2. spectral energy in the speech band [80 Hz, 4 kHz] exceeds 2× the
//!    energy above 5 kHz — keyboard clatter and similar transients carry
//!    most of their energy up high, speech does not, AND
//! 3. the window holds at least 100 ms of audio; with less, the frame is
//!    optimistically voice so speech onsets are never clipped.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

use voxbridge_core::protocol::SAMPLE_RATE_HZ;

/// Lower edge of the speech band (Hz).
const SPEECH_BAND_LOW_HZ: f32 = 80.0;

/// Upper edge of the speech band (Hz).
const SPEECH_BAND_HIGH_HZ: f32 = 4000.0;

/// Everything above this is treated as noise-band energy (Hz).
const NOISE_BAND_LOW_HZ: f32 = 5000.0;

/// Speech-band energy must exceed this multiple of the noise band.
const SPEECH_TO_NOISE_RATIO: f32 = 2.0;

/// Minimum window before the spectral/energy tests apply (ms).
const MIN_WINDOW_MS: usize = 100;

/// Sliding-window energy + spectral-shape voice detector.
pub struct VoiceClassifier {
    window: VecDeque<i16>,
    window_samples: usize,
    rms_threshold: f32,
    planner: FftPlanner<f32>,
}

impl VoiceClassifier {
    /// Create a classifier with the given window length and RMS threshold.
    #[must_use]
    pub fn new(window_ms: u64, rms_threshold: f32) -> Self {
        let window_samples = (window_ms as usize) * (SAMPLE_RATE_HZ as usize) / 1000;
        Self {
            window: VecDeque::with_capacity(window_samples),
            window_samples: window_samples.max(1),
            rms_threshold,
            planner: FftPlanner::new(),
        }
    }

    /// Feed one frame of samples and classify it against the updated window.
    pub fn push_frame(&mut self, samples: &[i16]) -> bool {
        self.window.extend(samples.iter().copied());
        while self.window.len() > self.window_samples {
            self.window.pop_front();
        }

        let min_samples = MIN_WINDOW_MS * (SAMPLE_RATE_HZ as usize) / 1000;
        if self.window.len() < min_samples {
            // Not enough context yet — optimistically voice.
            return true;
        }

        if self.window_rms() < self.rms_threshold {
            return false;
        }

        self.speech_band_dominates()
    }

    /// Drop all buffered audio (mute, disconnect — the stream has a gap).
    pub fn reset(&mut self) {
        self.window.clear();
    }

    fn window_rms(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = self
            .window
            .iter()
            .map(|&s| {
                let v = f64::from(s);
                v * v
            })
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = sum_squares / self.window.len() as f64;
        #[allow(clippy::cast_possible_truncation)]
        let rms = mean.sqrt() as f32;
        rms
    }

    /// Magnitude-spectrum test: speech band vs high band.
    fn speech_band_dominates(&mut self) -> bool {
        let n = self.window.len();
        let fft: Arc<dyn Fft<f32>> = self.planner.plan_fft_forward(n);

        let mut buf: Vec<Complex<f32>> = self
            .window
            .iter()
            .map(|&s| Complex::new(f32::from(s), 0.0))
            .collect();
        fft.process(&mut buf);

        #[allow(clippy::cast_precision_loss)]
        let bin_hz = SAMPLE_RATE_HZ as f32 / n as f32;
        let mut speech_energy = 0.0f32;
        let mut noise_energy = 0.0f32;

        // Only the first half of the spectrum is meaningful for real input.
        for (i, c) in buf.iter().enumerate().take(n / 2).skip(1) {
            #[allow(clippy::cast_precision_loss)]
            let freq = i as f32 * bin_hz;
            let energy = c.norm_sqr();
            if (SPEECH_BAND_LOW_HZ..=SPEECH_BAND_HIGH_HZ).contains(&freq) {
                speech_energy += energy;
            } else if freq > NOISE_BAND_LOW_HZ {
                noise_energy += energy;
            }
        }

        speech_energy > SPEECH_TO_NOISE_RATIO * noise_energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 100 ms of a sine wave at `freq` Hz with the given peak amplitude.
    fn sine_frame(freq: f32, amplitude: f32) -> Vec<i16> {
        (0..1600)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = i as f32 / SAMPLE_RATE_HZ as f32;
                #[allow(clippy::cast_possible_truncation)]
                let s = (amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16;
                s
            })
            .collect()
    }

    fn classifier() -> VoiceClassifier {
        VoiceClassifier::new(400, 300.0)
    }

    #[test]
    fn silence_is_not_voice() {
        let mut vad = classifier();
        let silence = vec![0i16; 1600];
        // Fill past the 100 ms minimum first.
        vad.push_frame(&silence);
        assert!(!vad.push_frame(&silence));
    }

    #[test]
    fn short_window_is_optimistically_voice() {
        let mut vad = classifier();
        // 50 ms of silence — below the 100 ms minimum.
        assert!(vad.push_frame(&vec![0i16; 800]));
    }

    #[test]
    fn speech_band_tone_is_voice() {
        let mut vad = classifier();
        let tone = sine_frame(440.0, 3000.0);
        vad.push_frame(&tone);
        assert!(vad.push_frame(&tone));
    }

    #[test]
    fn loud_high_frequency_noise_is_rejected() {
        // Keyboard-clatter shape: plenty of energy, nearly all above 5 kHz.
        let mut vad = classifier();
        let clatter = sine_frame(6500.0, 3000.0);
        vad.push_frame(&clatter);
        assert!(!vad.push_frame(&clatter));
    }

    #[test]
    fn quiet_speech_band_tone_is_rejected_by_rms() {
        let mut vad = classifier();
        let whisper = sine_frame(440.0, 50.0);
        vad.push_frame(&whisper);
        assert!(!vad.push_frame(&whisper));
    }

    #[test]
    fn reset_requires_refilling_the_window() {
        let mut vad = classifier();
        let tone = sine_frame(440.0, 3000.0);
        vad.push_frame(&tone);
        vad.push_frame(&tone);
        vad.reset();
        // After reset a short frame is optimistic again.
        assert!(vad.push_frame(&vec![0i16; 800]));
    }
}
