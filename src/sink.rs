//! Audio sink trait plus WAV and live-device implementations (spec.md
//! §4.6, §6.2, §6.4).
//!
//! The Generator only ever writes interleaved stereo `i16` frames; it
//! neither knows nor cares where they end up. `WavSink` is grounded on
//! `phonon::render`'s `hound` usage, `DeviceSink` on `phonon::audio`'s
//! `cpal` stream setup.

use std::path::{Path, PathBuf};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use tracing::{info, warn};

use crate::error::SinkError;

/// `open(channels, &srate) -> Sink | error` per spec.md §6.4, modeled as
/// the `write`/`close` portion of that lifecycle: opening happens in each
/// sink's own constructor, which negotiates and returns the actual rate.
pub trait AudioSink {
    /// Write one block of interleaved stereo i16 frames.
    fn write(&mut self, frames: &[i16]) -> Result<(), SinkError>;
    /// Finish writing and release any resources.
    fn close(&mut self) -> Result<(), SinkError>;
    /// The sample rate this sink actually negotiated, which may differ
    /// from what was requested (spec.md §6.4).
    fn sample_rate(&self) -> u32;
}

/// 16-bit PCM stereo WAV writer (spec.md §6.2).
pub struct WavSink {
    writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>,
    sample_rate: u32,
    path: PathBuf,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| SinkError::Wav(format!("failed to create {}: {e}", path.display())))?;
        info!("opened WAV sink {} at {} Hz", path.display(), sample_rate);
        Ok(Self {
            writer: Some(writer),
            sample_rate,
            path,
        })
    }
}

impl AudioSink for WavSink {
    fn write(&mut self, frames: &[i16]) -> Result<(), SinkError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::Wav("write after close".into()))?;
        for &sample in frames {
            writer
                .write_sample(sample)
                .map_err(|e| SinkError::Wav(format!("{}: {e}", self.path.display())))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| SinkError::Wav(format!("{}: {e}", self.path.display())))?;
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Live audio-device output (spec.md §6.4), backed by `cpal`.
pub struct DeviceSink {
    stream: cpal::Stream,
    producer: ringbuf::HeapProd<i16>,
    sample_rate: u32,
}

impl DeviceSink {
    pub fn open(requested_sample_rate: u32) -> Result<Self, SinkError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SinkError::Device("no output device available".into()))?;
        info!("audio device: {}", device.name().unwrap_or_default());

        let supported = device
            .default_output_config()
            .map_err(|e| SinkError::Device(e.to_string()))?;
        let negotiated = supported.sample_rate().0;
        if negotiated != requested_sample_rate {
            warn!(
                "device negotiated {negotiated} Hz, requested {requested_sample_rate} Hz"
            );
        }
        let channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.config();

        // Ring buffer big enough to absorb normal scheduling jitter
        // between the Generator's pull loop and the device callback.
        let ring = ringbuf::HeapRb::<i16>::new(negotiated as usize * channels);
        let (producer, mut consumer) = ring.split();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        let s = consumer.try_pop().unwrap_or(0);
                        *sample = s as f32 / i16::MAX as f32;
                    }
                },
                |err| tracing::error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| SinkError::Device(e.to_string()))?;
        stream
            .play()
            .map_err(|e| SinkError::Device(e.to_string()))?;

        Ok(Self {
            stream,
            producer,
            sample_rate: negotiated,
        })
    }
}

impl AudioSink for DeviceSink {
    fn write(&mut self, frames: &[i16]) -> Result<(), SinkError> {
        for &sample in frames {
            // Drop samples under backpressure rather than block: the
            // Generator is a pull-mode caller, not a realtime producer
            // thread, and spec.md defines no device-side flow control.
            let _ = self.producer.try_push(sample);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.stream.pause().map_err(|e| SinkError::Device(e.to_string()))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_sink_round_trips_sample_rate_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut sink = WavSink::create(&path, 44100).unwrap();
        assert_eq!(sink.sample_rate(), 44100);
        let frames = vec![0i16; 4410 * 2]; // 0.1s stereo
        sink.write(&frames).unwrap();
        sink.close().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration(), 4410);
    }
}
