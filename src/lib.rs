//! Wake-word capture library
//!
//! Accumulates microphone audio into front-end sized chunks, runs gated
//! wake-word detection on a background worker, retains a bounded window of
//! recent audio and encodes it into packets on demand.

pub mod audio_buffer;
pub mod config;
pub mod detector;
pub mod encoder;
pub mod frontend;
pub mod retention;
pub mod vad;

// Re-export main types
pub use audio_buffer::{AudioBufferError, AudioSample, FeedAccumulator, SAMPLE_RATE};
pub use config::{ConfigError, DetectorConfig};
pub use detector::{DetectionGate, DetectorError, DetectorStats, WakeWordDetector};
pub use encoder::{EncoderFactory, PacketEncoder, Pcm16Encoder};
pub use frontend::{
    AcousticFrontEnd, DetectionResult, EnergyFrontEnd, EnergyFrontEndConfig, FrontEndError,
    VadEvent, WakeWordCatalog,
};
pub use retention::{ByteSize, RetentionQueue, RetentionSnapshot, RetentionStore};
pub use vad::{VadConfig, VadError, VadState, VoiceActivityDetector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
