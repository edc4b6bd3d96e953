//! Packet encoder boundary
//!
//! The compressor is opaque to the pipeline: it takes raw frames and emits
//! zero or more packets per call. A fresh encoder is built for every encode
//! pass, so encoders may keep state between frames of one pass.

use crate::audio_buffer::{AudioSample, SAMPLE_RATE};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tracing::trace;

pub trait PacketEncoder: Send {
    /// Encode one raw frame, handing each finished packet to `on_packet`
    fn encode(&mut self, frame: Vec<AudioSample>, on_packet: &mut dyn FnMut(Bytes));

    /// Emit anything still buffered at the end of a pass
    fn flush(&mut self, _on_packet: &mut dyn FnMut(Bytes)) {}
}

/// Builds the encoder for one pass
pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn PacketEncoder> + Send + Sync>;

/// Samples per packet for a frame duration
pub fn samples_per_packet(channels: usize, frame_duration_ms: u32) -> usize {
    SAMPLE_RATE / 1000 * frame_duration_ms as usize * channels
}

/// Packetises PCM into fixed-duration little-endian packets
pub struct Pcm16Encoder {
    packet_samples: usize,
    pending: Vec<AudioSample>,
}

impl Pcm16Encoder {
    pub fn new(channels: usize, frame_duration_ms: u32) -> Self {
        let packet_samples = samples_per_packet(channels, frame_duration_ms).max(1);
        Self {
            packet_samples,
            pending: Vec::with_capacity(packet_samples),
        }
    }

    /// Factory producing a new encoder per pass
    pub fn factory(channels: usize, frame_duration_ms: u32) -> EncoderFactory {
        Arc::new(move || -> Box<dyn PacketEncoder> {
            Box::new(Pcm16Encoder::new(channels, frame_duration_ms))
        })
    }

    pub fn packet_samples(&self) -> usize {
        self.packet_samples
    }

    fn pack(samples: &[AudioSample]) -> Bytes {
        let mut buf = BytesMut::with_capacity(samples.len() * 2);
        for &s in samples {
            buf.put_i16_le(s);
        }
        buf.freeze()
    }
}

impl PacketEncoder for Pcm16Encoder {
    fn encode(&mut self, frame: Vec<AudioSample>, on_packet: &mut dyn FnMut(Bytes)) {
        let mut input = frame.as_slice();

        // Fast path: nothing pending, whole packets straight from the frame
        if self.pending.is_empty() {
            while input.len() >= self.packet_samples {
                let (packet, rest) = input.split_at(self.packet_samples);
                on_packet(Self::pack(packet));
                input = rest;
            }
        }

        for &sample in input {
            self.pending.push(sample);
            if self.pending.len() == self.packet_samples {
                on_packet(Self::pack(&self.pending));
                self.pending.clear();
            }
        }

        trace!("Encoder holding {} samples", self.pending.len());
    }

    fn flush(&mut self, on_packet: &mut dyn FnMut(Bytes)) {
        if !self.pending.is_empty() {
            on_packet(Self::pack(&self.pending));
            self.pending.clear();
        }
    }
}
