// src/capture.rs
//
// Capture ring shared by recording and export.
//
// The render pass pushes interleaved stereo samples without blocking;
// the control plane drains them and writes WAV files.

use std::path::Path;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::{EngineError, EngineResult};

/// Create the render-side sink and control-side source of one ring.
pub(crate) fn capture_ring(capacity: usize, max_block: usize) -> (CaptureSink, CaptureSource) {
    let rb = HeapRb::<f32>::new(capacity.max(2));
    let (producer, consumer) = rb.split();
    (
        CaptureSink {
            producer,
            zeros: vec![0.0; max_block * 2],
        },
        CaptureSource {
            consumer,
            chunk: vec![0.0; max_block.max(256) * 2],
            captured: Vec::new(),
        },
    )
}

// ═══════════════════════════════════════════════════════════════════
// Render side
// ═══════════════════════════════════════════════════════════════════

pub(crate) struct CaptureSink {
    producer: HeapProd<f32>,
    zeros: Vec<f32>,
}

impl CaptureSink {
    /// Push interleaved samples. Returns false if some did not fit.
    #[inline]
    pub(crate) fn push(&mut self, samples: &[f32]) -> bool {
        self.producer.push_slice(samples) == samples.len()
    }

    /// Push `len` samples of silence.
    #[inline]
    pub(crate) fn push_silence(&mut self, len: usize) -> bool {
        let len = len.min(self.zeros.len());
        self.producer.push_slice(&self.zeros[..len]) == len
    }
}

// ═══════════════════════════════════════════════════════════════════
// Control side
// ═══════════════════════════════════════════════════════════════════

pub(crate) struct CaptureSource {
    consumer: HeapCons<f32>,
    chunk: Vec<f32>,
    captured: Vec<f32>,
}

impl CaptureSource {
    /// Move everything in the ring into the capture. Returns samples moved.
    pub(crate) fn drain(&mut self) -> usize {
        let mut total = 0;
        while self.consumer.occupied_len() > 0 {
            let n = self.consumer.pop_slice(&mut self.chunk);
            if n == 0 {
                break;
            }
            self.captured.extend_from_slice(&self.chunk[..n]);
            total += n;
        }
        total
    }

    /// Drop anything captured or still buffered.
    pub(crate) fn discard(&mut self) {
        self.drain();
        self.captured.clear();
    }

    /// Hand over the captured interleaved samples.
    pub(crate) fn take(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.captured)
    }

    pub(crate) fn captured_len(&self) -> usize {
        self.captured.len()
    }
}

/// Write interleaved stereo samples as a 32-bit float WAV.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> EngineResult<()> {
    let io = |e: hound::Error| match e {
        hound::Error::IoError(e) => EngineError::io(path, e),
        other => EngineError::io(path, std::io::Error::other(other.to_string())),
    };

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(io)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(io)?;
    }
    writer.finalize().map_err(io)
}
