//! Ingest accumulator
//!
//! Turns an arbitrary-sized stream of captured samples into the exact chunk
//! size the acoustic front-end consumes. Leftover samples stay in a ring
//! buffer between calls, so memory is bounded regardless of how large a
//! single transport delivery is.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use thiserror::Error;
use tracing::{debug, trace};

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Capture sample rate per channel. Fixed at build time.
pub const SAMPLE_RATE: usize = 16000;

/// Ring capacity in units of feed chunks.
pub const ACCUMULATOR_CHUNKS: usize = 2;

#[derive(Error, Debug)]
pub enum AudioBufferError {
    #[error("Invalid chunk size: {0}")]
    InvalidSize(usize),
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Accumulates incoming samples and releases them in fixed-size chunks.
pub struct FeedAccumulator {
    producer: RingProducer,
    consumer: RingConsumer,
    chunk: Vec<AudioSample>,
    chunks_forwarded: u64,
}

impl FeedAccumulator {
    /// Create an accumulator that releases chunks of `chunk_size` samples
    pub fn new(chunk_size: usize) -> Result<Self, AudioBufferError> {
        if chunk_size == 0 {
            return Err(AudioBufferError::InvalidSize(chunk_size));
        }

        let capacity = chunk_size * ACCUMULATOR_CHUNKS;
        debug!(
            "Creating feed accumulator: chunk {} samples, ring {} samples",
            chunk_size, capacity
        );

        let (producer, consumer) = RingBuffer::new(capacity).split();

        Ok(Self {
            producer,
            consumer,
            chunk: vec![0; chunk_size],
            chunks_forwarded: 0,
        })
    }

    /// Append `samples` and hand every complete chunk to `forward`, oldest first.
    ///
    /// Never drops or duplicates samples. Input larger than the ring is staged
    /// piecewise: whatever does not fit waits until full chunks have been
    /// drained. Returns the number of chunks forwarded by this call.
    pub fn push<F>(&mut self, samples: &[AudioSample], mut forward: F) -> usize
    where
        F: FnMut(&[AudioSample]),
    {
        let chunk_size = self.chunk.len();
        let mut remaining = samples;
        let mut forwarded = 0;

        loop {
            let written = self.producer.push_slice(remaining);
            remaining = &remaining[written..];

            while self.consumer.occupied_len() >= chunk_size {
                let read = self.consumer.pop_slice(&mut self.chunk);
                debug_assert_eq!(read, chunk_size);
                forward(&self.chunk);
                forwarded += 1;
            }

            if remaining.is_empty() {
                break;
            }
        }

        self.chunks_forwarded += forwarded as u64;
        trace!(
            "Accumulated {} samples, forwarded {} chunks, {} pending",
            samples.len(),
            forwarded,
            self.pending()
        );

        forwarded
    }

    /// Samples held back waiting for a complete chunk
    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk.len()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }

    /// Total chunks forwarded since creation
    pub fn chunks_forwarded(&self) -> u64 {
        self.chunks_forwarded
    }

    /// Discard pending samples
    pub fn clear(&mut self) {
        let pending = self.consumer.occupied_len();
        self.consumer.skip(pending);
        debug!("Discarded {} pending samples", pending);
    }
}
