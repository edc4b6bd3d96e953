//! Wake-word capture pipeline
//!
//! Feeds transport audio to the acoustic front-end in exact chunks, runs a
//! gated detection worker that retains every processed frame and reports
//! voice activity and wake events, and encodes the retained audio on demand
//! on a one-shot background worker.
//!
//! Handlers run synchronously on the detection worker and must not block.

use crate::audio_buffer::{AudioBufferError, AudioSample, FeedAccumulator};
use crate::config::{ConfigError, DetectorConfig};
use crate::encoder::{EncoderFactory, Pcm16Encoder};
use crate::frontend::{AcousticFrontEnd, DetectionResult, VadEvent, WakeWordCatalog};
use crate::retention::{RetentionSnapshot, RetentionStore};
use bytes::Bytes;
use cache_padded::CachePadded;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Front-end chunk size unusable: {0}")]
    ChunkSize(#[from] AudioBufferError),

    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("No compressed packet within {0:?}")]
    PacketTimeout(Duration),
}

#[derive(Default)]
struct GateState {
    running: bool,
    shutdown: bool,
}

/// Enable flag the detection worker blocks on
#[derive(Default)]
pub struct DetectionGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl DetectionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.state.lock().running = true;
        self.changed.notify_all();
    }

    pub fn clear(&self) {
        self.state.lock().running = false;
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().running
    }

    /// Block until the gate is set. Returns `false` once shut down.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while !state.running && !state.shutdown {
            self.changed.wait(&mut state);
        }
        !state.shutdown
    }

    /// Release waiters permanently
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.changed.notify_all();
    }
}

type WakeWordHandler = Arc<dyn Fn(&str) + Send + Sync>;
type VadHandler = Arc<dyn Fn(bool) + Send + Sync>;
type OutputHandler = Arc<dyn Fn(&[AudioSample]) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    wake_word: RwLock<Option<WakeWordHandler>>,
    vad: RwLock<Option<VadHandler>>,
    output: RwLock<Option<OutputHandler>>,
}

/// State shared between the caller, the detection worker and encode workers
struct Shared {
    front_end: Arc<dyn AcousticFrontEnd>,
    catalog: WakeWordCatalog,
    gate: CachePadded<DetectionGate>,
    retention: CachePadded<RetentionStore>,
    handlers: Handlers,
    speaking: AtomicBool,
    last_wake_word: Mutex<Option<String>>,
    frames_processed: AtomicU64,
    wake_words_detected: AtomicU64,
    encode_passes: AtomicU64,
}

impl Shared {
    fn process(&self, result: DetectionResult) {
        let DetectionResult {
            samples,
            vad,
            wake_word_index,
        } = result;

        self.frames_processed.fetch_add(1, Ordering::Relaxed);

        let output = self.handlers.output.read().clone();
        if let Some(handler) = output {
            handler(&samples);
        }

        // Retained regardless of VAD so pre-trigger audio is already held
        self.retention.retain_frame(samples);

        self.update_vad(vad);

        if let Some(index) = wake_word_index {
            self.raise_wake_word(index);
        }
    }

    fn update_vad(&self, vad: VadEvent) {
        let handler = self.handlers.vad.read().clone();
        let Some(handler) = handler else {
            return;
        };

        let speaking = self.speaking.load(Ordering::Acquire);
        let next = match vad {
            VadEvent::Speech if !speaking => true,
            VadEvent::Silence if speaking => false,
            _ => return,
        };

        self.speaking.store(next, Ordering::Release);
        debug!("Voice activity changed: speaking={}", next);
        handler(next);
    }

    fn raise_wake_word(&self, index: usize) {
        // Edge-triggered: detection stays off until re-armed
        self.gate.clear();

        let Some(word) = self.catalog.resolve(index) else {
            warn!(
                "Wake index {} outside catalog of {} phrase(s)",
                index,
                self.catalog.len()
            );
            return;
        };

        info!("Wake word detected: {}", word);
        *self.last_wake_word.lock() = Some(word.to_string());
        self.wake_words_detected.fetch_add(1, Ordering::Relaxed);

        let handler = self.handlers.wake_word.read().clone();
        match handler {
            Some(handler) => handler(word),
            None => trace!("No wake-word handler registered"),
        }
    }
}

fn run_detection(shared: Arc<Shared>) {
    debug!("Audio detection worker started");

    while shared.gate.wait() {
        match shared.front_end.fetch() {
            Ok(Some(result)) => shared.process(result),
            Ok(None) => {}
            Err(e) => trace!("Front-end fetch failed, retrying: {}", e),
        }
    }

    debug!("Audio detection worker exiting");
}

fn run_encode_pass(shared: &Shared, factory: &EncoderFactory) {
    let started = Instant::now();

    // Frames retained after this point wait for the next pass
    let frames = shared.retention.take_frames();
    let frame_count = frames.len();

    let mut encoder = factory();
    let mut packets = 0usize;
    let mut emit = |packet: Bytes| {
        if packet.is_empty() {
            debug!("Encoder produced an empty packet, skipping");
            return;
        }
        packets += 1;
        shared.retention.push_packet(packet);
    };

    for frame in frames {
        encoder.encode(frame, &mut emit);
    }
    encoder.flush(&mut emit);

    // Empty packet marks the end of the pass
    shared.retention.push_packet(Bytes::new());
    shared.encode_passes.fetch_add(1, Ordering::Relaxed);

    info!(
        "Encoded {} retained frames into {} packets in {} ms",
        frame_count,
        packets,
        started.elapsed().as_millis()
    );
}

/// Detector statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorStats {
    pub frames_processed: u64,
    pub wake_words_detected: u64,
    pub encode_passes: u64,
    pub is_running: bool,
    pub raw_frames_retained: usize,
    pub raw_bytes_retained: usize,
    pub packets_retained: usize,
    pub packet_bytes_retained: usize,
    pub frames_evicted: u64,
    pub packets_evicted: u64,
}

/// Wake-word capture pipeline
pub struct WakeWordDetector {
    config: DetectorConfig,
    shared: Arc<Shared>,
    accumulator: Mutex<FeedAccumulator>,
    encoder_factory: EncoderFactory,
    detection_worker: Option<JoinHandle<()>>,
    encode_worker: Mutex<Option<JoinHandle<()>>>,
}

impl WakeWordDetector {
    /// Create the pipeline and start its detection worker. Detection stays
    /// idle until `start_detection`.
    pub fn new(
        config: DetectorConfig,
        front_end: Arc<dyn AcousticFrontEnd>,
        encoder_factory: EncoderFactory,
    ) -> Result<Self, DetectorError> {
        config.validate()?;

        let feed_size = front_end.feed_chunk_size() * config.channels;
        let fetch_size = front_end.fetch_chunk_size();
        let accumulator = FeedAccumulator::new(feed_size)?;
        let catalog = WakeWordCatalog::parse(&front_end.wake_words());

        info!("Initializing wake-word detector");
        info!(
            "Channels: {} ({} mic, reference: {}), feed size: {}, fetch size: {}",
            config.channels,
            config.mic_channels(),
            config.reference_channel,
            feed_size,
            fetch_size
        );
        info!("Wake words: {:?}", catalog.words());

        let shared = Arc::new(Shared {
            front_end,
            catalog,
            gate: CachePadded::new(DetectionGate::new()),
            retention: CachePadded::new(RetentionStore::new(
                config.raw_retention_bytes,
                config.packet_retention_bytes,
            )),
            handlers: Handlers::default(),
            speaking: AtomicBool::new(false),
            last_wake_word: Mutex::new(None),
            frames_processed: AtomicU64::new(0),
            wake_words_detected: AtomicU64::new(0),
            encode_passes: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let detection_worker = thread::Builder::new()
            .name("audio_detection".to_string())
            .stack_size(config.detection_stack_size)
            .spawn(move || run_detection(worker_shared))
            .map_err(DetectorError::WorkerSpawn)?;

        Ok(Self {
            config,
            shared,
            accumulator: Mutex::new(accumulator),
            encoder_factory,
            detection_worker: Some(detection_worker),
            encode_worker: Mutex::new(None),
        })
    }

    /// Create the pipeline with the PCM packetiser as compressor
    pub fn with_pcm_encoder(
        config: DetectorConfig,
        front_end: Arc<dyn AcousticFrontEnd>,
    ) -> Result<Self, DetectorError> {
        // Front-end output is a single processed channel
        let factory = Pcm16Encoder::factory(1, config.packet_frame_duration_ms);
        Self::new(config, front_end, factory)
    }

    pub fn start_detection(&self) {
        debug!("Detection started");
        self.shared.gate.set();
    }

    pub fn stop_detection(&self) {
        debug!("Detection stopped");
        self.shared.gate.clear();
    }

    pub fn is_detection_running(&self) -> bool {
        self.shared.gate.is_set()
    }

    /// Push captured interleaved samples. Every complete front-end chunk is
    /// fed synchronously; the remainder waits for the next call.
    pub fn feed(&self, samples: &[AudioSample]) {
        let front_end = &self.shared.front_end;
        self.accumulator
            .lock()
            .push(samples, |chunk| front_end.feed(chunk));
    }

    /// Samples waiting for a complete front-end chunk
    pub fn pending_samples(&self) -> usize {
        self.accumulator.lock().pending()
    }

    pub fn on_wake_word_detected<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.shared.handlers.wake_word.write() = Some(Arc::new(handler));
    }

    pub fn on_vad_state_change<F>(&self, handler: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self.shared.handlers.vad.write() = Some(Arc::new(handler));
    }

    /// Tap every processed frame returned by the front-end
    pub fn on_audio_output<F>(&self, handler: F)
    where
        F: Fn(&[AudioSample]) + Send + Sync + 'static,
    {
        *self.shared.handlers.output.write() = Some(Arc::new(handler));
    }

    pub fn last_detected_wake_word(&self) -> Option<String> {
        self.shared.last_wake_word.lock().clone()
    }

    pub fn wake_words(&self) -> &[String] {
        self.shared.catalog.words()
    }

    /// Speaking state as last reported to the VAD handler
    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::Acquire)
    }

    /// Compress all retained raw frames on a background worker.
    ///
    /// Waits for the previous pass to finish and discards its unread packets
    /// before returning. Consumers read the result with `compressed_packet`;
    /// the pass ends with a sentinel.
    pub fn encode_retained_audio(&self) -> Result<(), DetectorError> {
        let mut slot = self.encode_worker.lock();

        if let Some(previous) = slot.take() {
            if !previous.is_finished() {
                debug!("Waiting for previous encode pass");
            }
            if previous.join().is_err() {
                error!("Previous encode worker panicked");
            }
        }

        // Consumers must never see output from an earlier pass
        self.shared.retention.clear_packets();

        let shared = Arc::clone(&self.shared);
        let factory = Arc::clone(&self.encoder_factory);
        let worker = thread::Builder::new()
            .name("encode_retained".to_string())
            .stack_size(self.config.encode_stack_size)
            .spawn(move || run_encode_pass(&shared, &factory))
            .map_err(DetectorError::WorkerSpawn)?;

        *slot = Some(worker);
        Ok(())
    }

    /// Block until a compressed packet is available and pop it.
    ///
    /// Returns `None` when the popped packet is the end-of-pass sentinel.
    pub fn compressed_packet(&self) -> Option<Bytes> {
        let packet = self.shared.retention.wait_packet();
        (!packet.is_empty()).then_some(packet)
    }

    /// Like `compressed_packet`, failing after `timeout`
    pub fn compressed_packet_timeout(&self, timeout: Duration) -> Result<Option<Bytes>, DetectorError> {
        match self.shared.retention.wait_packet_timeout(timeout) {
            Some(packet) => Ok((!packet.is_empty()).then_some(packet)),
            None => Err(DetectorError::PacketTimeout(timeout)),
        }
    }

    /// Packets of the current pass, ending at the sentinel
    pub fn compressed_packets(&self) -> impl Iterator<Item = Bytes> + '_ {
        std::iter::from_fn(move || self.compressed_packet())
    }

    pub fn stats(&self) -> DetectorStats {
        let RetentionSnapshot {
            frames,
            frame_bytes,
            frames_evicted,
            packets,
            packet_bytes,
            packets_evicted,
        } = self.shared.retention.snapshot();

        DetectorStats {
            frames_processed: self.shared.frames_processed.load(Ordering::Relaxed),
            wake_words_detected: self.shared.wake_words_detected.load(Ordering::Relaxed),
            encode_passes: self.shared.encode_passes.load(Ordering::Relaxed),
            is_running: self.shared.gate.is_set(),
            raw_frames_retained: frames,
            raw_bytes_retained: frame_bytes,
            packets_retained: packets,
            packet_bytes_retained: packet_bytes,
            frames_evicted,
            packets_evicted,
        }
    }
}

impl Drop for WakeWordDetector {
    fn drop(&mut self) {
        self.shared.gate.shutdown();

        if let Some(worker) = self.detection_worker.take() {
            if worker.join().is_err() {
                error!("Detection worker panicked");
            }
        }

        if let Some(worker) = self.encode_worker.get_mut().take() {
            if worker.join().is_err() {
                error!("Encode worker panicked");
            }
        }

        debug!("Wake-word detector shut down");
    }
}
