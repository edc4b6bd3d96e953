//! Energy-based voice activity detection
//!
//! Classifies frames as speech or silence from RMS energy and zero-crossing
//! rate, with hysteresis so a single loud click or a short pause does not
//! flip the reported state. Used by the software front-end.

use crate::audio_buffer::AudioSample;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum VadError {
    #[error("Insufficient audio data: need at least {0} samples")]
    InsufficientData(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// VAD configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS threshold for a speech frame (0.0 - 1.0 of full scale)
    pub energy_threshold: f32,

    /// Zero-crossing rate threshold for a speech frame
    pub zcr_threshold: f32,

    /// Smallest frame accepted for analysis
    pub min_frame_samples: usize,

    /// Consecutive speech frames before speech is reported
    pub speech_frames_required: usize,

    /// Consecutive silence frames before silence is reported
    pub silence_frames_required: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            zcr_threshold: 0.02,
            min_frame_samples: 160,      // 10ms at 16kHz
            speech_frames_required: 3,
            silence_frames_required: 10,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<(), VadError> {
        if !(0.0..=1.0).contains(&self.energy_threshold) {
            return Err(VadError::InvalidConfig(
                "energy_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.zcr_threshold) {
            return Err(VadError::InvalidConfig(
                "zcr_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.min_frame_samples < 2 {
            return Err(VadError::InvalidConfig(
                "min_frame_samples must be at least 2".to_string(),
            ));
        }

        if self.speech_frames_required == 0 || self.silence_frames_required == 0 {
            return Err(VadError::InvalidConfig(
                "frame run lengths must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Per-frame measurements
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFeatures {
    /// Normalized RMS energy
    pub rms: f32,
    /// Fraction of adjacent sample pairs that change sign
    pub zcr: f32,
}

impl FrameFeatures {
    pub fn measure(samples: &[AudioSample]) -> Self {
        if samples.is_empty() {
            return Self { rms: 0.0, zcr: 0.0 };
        }

        let scale = i16::MAX as f64;
        let sum_squares: f64 = samples
            .iter()
            .map(|&s| (s as f64 / scale).powi(2))
            .sum();
        let rms = (sum_squares / samples.len() as f64).sqrt() as f32;

        let zcr = if samples.len() < 2 {
            0.0
        } else {
            let crossings = samples
                .windows(2)
                .filter(|w| (w[0] < 0) != (w[1] < 0))
                .count();
            crossings as f32 / (samples.len() - 1) as f32
        };

        Self { rms, zcr }
    }
}

/// Debounced VAD state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    /// Speech frames seen, not yet confirmed
    Onset(usize),
    Speech,
    /// Silence frames seen during speech, not yet confirmed
    Hangover(usize),
}

impl VadState {
    pub fn is_speech(self) -> bool {
        matches!(self, VadState::Speech | VadState::Hangover(_))
    }
}

/// Voice Activity Detector
pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        debug!("Initializing VAD with config: {:?}", config);
        Self {
            config,
            state: VadState::Silence,
        }
    }

    /// Analyse one frame. Returns `Some(speaking)` only when the debounced
    /// state flips.
    pub fn process_frame(&mut self, samples: &[AudioSample]) -> Result<Option<bool>, VadError> {
        if samples.len() < self.config.min_frame_samples {
            return Err(VadError::InsufficientData(self.config.min_frame_samples));
        }

        let features = FrameFeatures::measure(samples);
        let is_speech_frame = features.rms > self.config.energy_threshold
            && features.zcr > self.config.zcr_threshold;

        let was_speech = self.state.is_speech();
        self.state = self.next_state(is_speech_frame);

        trace!(
            "VAD frame: rms={:.4}, zcr={:.4}, state={:?}",
            features.rms,
            features.zcr,
            self.state
        );

        let is_speech = self.state.is_speech();
        if is_speech != was_speech {
            debug!("VAD state changed: speaking={}", is_speech);
            Ok(Some(is_speech))
        } else {
            Ok(None)
        }
    }

    fn next_state(&self, is_speech_frame: bool) -> VadState {
        let speech_required = self.config.speech_frames_required;
        let silence_required = self.config.silence_frames_required;

        match (self.state, is_speech_frame) {
            (VadState::Silence, false) => VadState::Silence,
            (VadState::Silence, true) if speech_required <= 1 => VadState::Speech,
            (VadState::Silence, true) => VadState::Onset(1),
            (VadState::Onset(n), true) if n + 1 >= speech_required => VadState::Speech,
            (VadState::Onset(n), true) => VadState::Onset(n + 1),
            (VadState::Onset(_), false) => VadState::Silence,
            (VadState::Speech, true) => VadState::Speech,
            (VadState::Speech, false) if silence_required <= 1 => VadState::Silence,
            (VadState::Speech, false) => VadState::Hangover(1),
            (VadState::Hangover(_), true) => VadState::Speech,
            (VadState::Hangover(n), false) if n + 1 >= silence_required => VadState::Silence,
            (VadState::Hangover(n), false) => VadState::Hangover(n + 1),
        }
    }

    pub fn is_speech_active(&self) -> bool {
        self.state.is_speech()
    }

    pub fn state(&self) -> VadState {
        self.state
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) fn generate_tone(frequency: f32, len: usize, amplitude: f32) -> Vec<AudioSample> {
        (0..len)
            .map(|i| {
                let t = i as f32 / crate::audio_buffer::SAMPLE_RATE as f32;
                let sample = amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin();
                (sample * i16::MAX as f32) as i16
            })
            .collect()
    }

    fn quick_config() -> VadConfig {
        VadConfig {
            speech_frames_required: 2,
            silence_frames_required: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_valid() {
        assert!(VadConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = VadConfig::default();
        config.energy_threshold = 1.5;
        assert!(config.validate().is_err());

        config.energy_threshold = 0.1;
        config.speech_frames_required = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_features() {
        let silence = FrameFeatures::measure(&[0; 480]);
        assert_relative_eq!(silence.rms, 0.0, epsilon = 0.0001);
        assert_relative_eq!(silence.zcr, 0.0, epsilon = 0.0001);

        let tone = FrameFeatures::measure(&generate_tone(400.0, 480, 0.5));
        // RMS of a sine is amplitude / sqrt(2)
        assert_relative_eq!(tone.rms, 0.5 / 2f32.sqrt(), epsilon = 0.01);
        assert!(tone.zcr > 0.02);
    }

    #[test]
    fn test_transitions_reported_once() {
        let mut vad = VoiceActivityDetector::new(quick_config());
        let speech = generate_tone(400.0, 480, 0.3);
        let silence = vec![0; 480];

        assert_eq!(vad.process_frame(&speech).unwrap(), None);
        assert_eq!(vad.state(), VadState::Onset(1));
        assert_eq!(vad.process_frame(&speech).unwrap(), Some(true));
        assert_eq!(vad.process_frame(&speech).unwrap(), None);

        assert_eq!(vad.process_frame(&silence).unwrap(), None);
        assert_eq!(vad.state(), VadState::Hangover(1));
        assert_eq!(vad.process_frame(&silence).unwrap(), Some(false));
        assert_eq!(vad.process_frame(&silence).unwrap(), None);
        assert_eq!(vad.state(), VadState::Silence);
    }

    #[test]
    fn test_false_onset() {
        let mut vad = VoiceActivityDetector::new(VadConfig {
            speech_frames_required: 3,
            ..Default::default()
        });

        vad.process_frame(&generate_tone(400.0, 480, 0.3)).unwrap();
        vad.process_frame(&vec![0; 480]).unwrap();
        assert_eq!(vad.state(), VadState::Silence);
        assert!(!vad.is_speech_active());
    }

    #[test]
    fn test_insufficient_data() {
        let mut vad = VoiceActivityDetector::new(VadConfig::default());
        match vad.process_frame(&[0; 10]) {
            Err(VadError::InsufficientData(required)) => assert_eq!(required, 160),
            _ => panic!("Expected InsufficientData error"),
        }
    }
}
