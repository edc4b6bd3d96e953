//! Acoustic front-end boundary
//!
//! The front-end performs echo cancellation, noise suppression, VAD and
//! wake-word inference. The pipeline only feeds it chunks and fetches
//! results, so it is modelled as a trait. `EnergyFrontEnd` is a software
//! implementation for development and tests; it is not a wake-word model.

use crate::audio_buffer::AudioSample;
use crate::vad::{VadConfig, VadError, VoiceActivityDetector};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum FrontEndError {
    #[error("Front-end fetch failed: {0}")]
    Fetch(String),

    #[error("Front-end input closed")]
    Disconnected,
}

/// Voice activity reported alongside a fetched frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    Speech,
    Silence,
    Unchanged,
}

/// One processed frame from the front-end
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub samples: Vec<AudioSample>,
    pub vad: VadEvent,
    /// 1-based index into the wake-word catalog when a wake word fired
    pub wake_word_index: Option<usize>,
}

impl DetectionResult {
    pub fn frame(samples: Vec<AudioSample>, vad: VadEvent) -> Self {
        Self {
            samples,
            vad,
            wake_word_index: None,
        }
    }

    pub fn with_wake_word(mut self, index: usize) -> Self {
        self.wake_word_index = Some(index);
        self
    }
}

/// Opaque acoustic front-end.
///
/// `feed` is called from the ingest context and must not block for long.
/// `fetch` is called from the detection worker; it should wait a bounded time
/// for a result and return `Ok(None)` when nothing is ready, so the worker can
/// observe shutdown.
#[cfg_attr(test, mockall::automock)]
pub trait AcousticFrontEnd: Send + Sync {
    /// Consume exactly `feed_chunk_size() * channels` interleaved samples
    fn feed(&self, chunk: &[AudioSample]);

    fn fetch(&self) -> Result<Option<DetectionResult>, FrontEndError>;

    /// Samples per channel expected by `feed`
    fn feed_chunk_size(&self) -> usize;

    /// Samples per frame returned by `fetch`
    fn fetch_chunk_size(&self) -> usize;

    /// Wake phrases, `;`-separated, in model index order
    fn wake_words(&self) -> String;
}

/// Wake phrases in model order, resolved by 1-based index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WakeWordCatalog {
    words: Vec<String>,
}

impl WakeWordCatalog {
    /// Split a `;`-delimited phrase list. A trailing delimiter does not
    /// produce an entry; empty interior entries keep their slot so indices
    /// stay aligned with the model.
    pub fn parse(list: &str) -> Self {
        let mut words: Vec<String> = list.split(';').map(str::to_string).collect();
        if words.last().is_some_and(|w| w.is_empty()) {
            words.pop();
        }
        Self { words }
    }

    /// Phrase for a 1-based wake index
    pub fn resolve(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.words.get(i))
            .map(String::as_str)
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Configuration for the software front-end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyFrontEndConfig {
    pub vad: VadConfig,

    /// Interleaved channels in each fed chunk; channel 0 is analysed
    pub channels: usize,

    /// Samples per channel per chunk
    pub chunk_size: usize,

    /// Confirmed speech frames before a wake event is raised
    pub trigger_frames: usize,

    /// How long `fetch` waits for a fed chunk
    pub fetch_timeout_ms: u64,

    /// Frames queued between feed and fetch before new ones are dropped
    pub queue_depth: usize,

    pub wake_words: String,
}

impl Default for EnergyFrontEndConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            channels: 1,
            chunk_size: 512,         // 32ms at 16kHz
            trigger_frames: 15,      // ~480ms of sustained speech
            fetch_timeout_ms: 50,
            queue_depth: 64,
            wake_words: "hey device".to_string(),
        }
    }
}

impl EnergyFrontEndConfig {
    pub fn validate(&self) -> Result<(), VadError> {
        self.vad.validate()?;

        if self.channels == 0 || self.chunk_size < self.vad.min_frame_samples {
            return Err(VadError::InvalidConfig(format!(
                "chunk of {} samples x {} channels cannot be analysed",
                self.chunk_size, self.channels
            )));
        }

        if self.trigger_frames == 0 || self.queue_depth == 0 {
            return Err(VadError::InvalidConfig(
                "trigger_frames and queue_depth must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

struct EnergyState {
    vad: VoiceActivityDetector,
    speech_run: usize,
}

/// Front-end that raises a wake event after a sustained run of speech
pub struct EnergyFrontEnd {
    config: EnergyFrontEndConfig,
    input: SyncSender<Vec<AudioSample>>,
    output: Mutex<Receiver<Vec<AudioSample>>>,
    state: Mutex<EnergyState>,
}

impl EnergyFrontEnd {
    pub fn new(config: EnergyFrontEndConfig) -> Result<Self, VadError> {
        config.validate()?;

        info!(
            "Energy front-end: {} ch, chunk {} samples, wake after {} speech frames",
            config.channels, config.chunk_size, config.trigger_frames
        );

        let (input, output) = mpsc::sync_channel(config.queue_depth);
        let vad = VoiceActivityDetector::new(config.vad.clone());

        Ok(Self {
            config,
            input,
            output: Mutex::new(output),
            state: Mutex::new(EnergyState { vad, speech_run: 0 }),
        })
    }

    fn analyse(&self, frame: Vec<AudioSample>) -> Result<DetectionResult, FrontEndError> {
        let mut state = self.state.lock();

        let transition = state
            .vad
            .process_frame(&frame)
            .map_err(|e| FrontEndError::Fetch(e.to_string()))?;

        let vad = match transition {
            Some(true) => VadEvent::Speech,
            Some(false) => VadEvent::Silence,
            None => VadEvent::Unchanged,
        };

        let mut result = DetectionResult::frame(frame, vad);

        if state.vad.is_speech_active() {
            state.speech_run += 1;
            if state.speech_run == self.config.trigger_frames {
                debug!("Sustained speech for {} frames", state.speech_run);
                result = result.with_wake_word(1);
            }
        } else {
            state.speech_run = 0;
        }

        Ok(result)
    }
}

impl AcousticFrontEnd for EnergyFrontEnd {
    fn feed(&self, chunk: &[AudioSample]) {
        let mono: Vec<AudioSample> = chunk
            .iter()
            .step_by(self.config.channels)
            .copied()
            .collect();

        match self.input.try_send(mono) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Front-end queue full, dropping chunk"),
            Err(TrySendError::Disconnected(_)) => warn!("Front-end queue closed"),
        }
    }

    fn fetch(&self) -> Result<Option<DetectionResult>, FrontEndError> {
        let timeout = Duration::from_millis(self.config.fetch_timeout_ms);
        let frame = match self.output.lock().recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => return Err(FrontEndError::Disconnected),
        };

        trace!("Fetched {} samples", frame.len());
        self.analyse(frame).map(Some)
    }

    fn feed_chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    fn fetch_chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    fn wake_words(&self) -> String {
        self.config.wake_words.clone()
    }
}
