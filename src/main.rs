//! Wake-word capture service binary
//!
//! Replays a 16kHz PCM16 WAV capture through the pipeline as a transport
//! would deliver it. On the first wake event the retained audio is encoded
//! and written as length-prefixed packets.

use anyhow::{bail, Context, Result};
use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wake_capture::{
    AudioSample, DetectorConfig, EnergyFrontEnd, EnergyFrontEndConfig, WakeWordDetector,
    SAMPLE_RATE,
};

/// Transport delivery size per channel (20ms)
const TRANSPORT_CHUNK: usize = SAMPLE_RATE / 50;
const TRANSPORT_INTERVAL: Duration = Duration::from_millis(20);

struct ServiceConfig {
    detector: DetectorConfig,
    front_end: EnergyFrontEndConfig,
    input: PathBuf,
    output: PathBuf,
    realtime: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wake_capture=debug")),
        )
        .init();

    info!("Starting wake-word capture service");

    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config) {
        error!("Capture failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Wake-word capture service stopped");
}

fn run(mut config: ServiceConfig) -> Result<()> {
    let channels = config.detector.channels;
    let samples = read_wav(&config.input, channels)?;
    info!(
        "Loaded {} ({:.2}s, {} ch)",
        config.input.display(),
        samples.len() as f32 / (SAMPLE_RATE * channels) as f32,
        channels
    );

    if !config.realtime {
        // Replay outruns the front-end; queue the whole capture
        config.front_end.queue_depth =
            samples.len() / (config.front_end.chunk_size * channels) + 1;
    }

    let front_end = EnergyFrontEnd::new(config.front_end).context("Invalid front-end configuration")?;
    let detector = WakeWordDetector::with_pcm_encoder(config.detector, Arc::new(front_end))
        .context("Failed to create detector")?;

    let (wake_tx, wake_rx) = mpsc::channel();
    detector.on_wake_word_detected(move |word| {
        let _ = wake_tx.send(word.to_string());
    });
    detector.on_vad_state_change(|speaking| info!("Speaking: {}", speaking));

    detector.start_detection();
    info!("Listening for {:?}", detector.wake_words());

    let mut wake_word = None;
    for delivery in samples.chunks(TRANSPORT_CHUNK * channels) {
        detector.feed(delivery);
        if config.realtime {
            thread::sleep(TRANSPORT_INTERVAL);
        }
        if let Ok(word) = wake_rx.try_recv() {
            wake_word = Some(word);
            break;
        }
    }

    // Let the detection worker finish what was already fed
    let wake_word = match wake_word {
        Some(word) => word,
        None => match wake_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(word) => word,
            Err(_) => {
                info!("No wake word detected");
                return Ok(());
            }
        },
    };

    let stats = detector.stats();
    info!(
        "Wake word '{}' after {} frames, {} bytes retained",
        wake_word, stats.frames_processed, stats.raw_bytes_retained
    );

    detector.encode_retained_audio()?;
    let (packets, bytes) = write_packets(&detector, &config.output)?;

    info!(
        "Wrote {} packets ({} bytes) to {}",
        packets,
        bytes,
        config.output.display()
    );

    Ok(())
}

fn write_packets(detector: &WakeWordDetector, path: &Path) -> Result<(usize, usize)> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let mut packets = 0;
    let mut bytes = 0;
    for packet in detector.compressed_packets() {
        out.write_all(&(packet.len() as u32).to_le_bytes())?;
        out.write_all(&packet)?;
        packets += 1;
        bytes += packet.len();
    }
    out.flush()?;

    Ok((packets, bytes))
}

fn read_wav(path: &Path, channels: usize) -> Result<Vec<AudioSample>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();

    if spec.sample_rate as usize != SAMPLE_RATE {
        bail!("Expected {} Hz audio, got {} Hz", SAMPLE_RATE, spec.sample_rate);
    }
    if spec.channels as usize != channels {
        bail!("Expected {} channel(s), got {}", channels, spec.channels);
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        bail!("Expected 16-bit integer PCM");
    }

    reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to decode WAV samples")
}

/// Load configuration from a JSON file and environment overrides
fn load_config() -> Result<ServiceConfig> {
    let mut detector = match env::var("WAKE_CAPTURE_CONFIG") {
        Ok(path) => DetectorConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load {}", path))?,
        Err(_) => DetectorConfig::default(),
    };

    if let Ok(channels) = env::var("WAKE_CAPTURE_CHANNELS") {
        detector.channels = channels
            .parse()
            .context("WAKE_CAPTURE_CHANNELS must be an integer")?;
    }

    if let Ok(reference) = env::var("WAKE_CAPTURE_REFERENCE") {
        detector.reference_channel = matches!(reference.as_str(), "1" | "true" | "yes");
    }

    detector.validate()?;

    let mut args = env::args().skip(1);
    let input = args
        .next()
        .or_else(|| env::var("WAKE_CAPTURE_INPUT").ok())
        .map(PathBuf::from)
        .context("usage: wake-capture <input.wav> [output.bin]")?;
    let output = args
        .next()
        .or_else(|| env::var("WAKE_CAPTURE_OUTPUT").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("wake_packets.bin"));

    let mut front_end = EnergyFrontEndConfig {
        channels: detector.channels,
        ..Default::default()
    };
    if let Ok(words) = env::var("WAKE_CAPTURE_WAKE_WORDS") {
        front_end.wake_words = words;
    }

    let realtime = env::var("WAKE_CAPTURE_REALTIME")
        .map(|v| v != "0")
        .unwrap_or(true);

    Ok(ServiceConfig {
        detector,
        front_end,
        input,
        output,
        realtime,
    })
}
