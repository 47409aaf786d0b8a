//! Sound card endpoints of the modem: the default output device plays the
//! transmitter's pulses and the default input device feeds the receiver

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, InputCallbackInfo, OutputCallbackInfo, SampleRate, Stream, StreamConfig,
    StreamError,
};
use parking_lot::Mutex;

use calclink_core::{AudioSink, LinkError, SampleSender};

use crate::error::{CliError, Result};

const DRAIN_POLL: Duration = Duration::from_millis(5);
/// Extra time a playback may take before the device counts as stalled
const STALL_MARGIN: Duration = Duration::from_secs(2);

fn stream_config(channels: u16, framerate: u32) -> StreamConfig {
    StreamConfig {
        channels,
        sample_rate: SampleRate(framerate),
        buffer_size: BufferSize::Default,
    }
}

fn error_callback(err: StreamError) {
    log::error!("Audio stream error: {}", err);
}

fn to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn to_short(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Default output device, mono samples copied to every channel
pub struct Speaker {
    queue: Arc<Mutex<VecDeque<f32>>>,
    framerate: u32,
    stream: Stream,
}

impl Speaker {
    pub fn open(framerate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device: Device = host
            .default_output_device()
            .ok_or_else(|| CliError::Audio("No output device available".to_string()))?;
        let supported = device.default_output_config().map_err(CliError::audio)?;
        let channels = supported.channels() as usize;
        log::debug!(
            "Output device {} with {} channels",
            device.name().unwrap_or_default(),
            channels
        );

        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::default();
        let source = Arc::clone(&queue);
        let stream = device
            .build_output_stream(
                &stream_config(supported.channels(), framerate),
                move |data: &mut [f32], _: &OutputCallbackInfo| {
                    let mut source = source.lock();
                    for frame in data.chunks_mut(channels) {
                        let sample = source.pop_front().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                error_callback,
                None,
            )
            .map_err(CliError::audio)?;
        stream.play().map_err(CliError::audio)?;

        Ok(Self {
            queue,
            framerate,
            stream,
        })
    }
}

impl AudioSink for Speaker {
    fn play(&mut self, samples: &[i16]) -> calclink_core::Result<()> {
        let duration = Duration::from_secs_f64(samples.len() as f64 / self.framerate as f64);
        let deadline = Instant::now() + duration + STALL_MARGIN;
        self.queue.lock().extend(samples.iter().map(|&s| to_float(s)));
        while !self.queue.lock().is_empty() {
            if Instant::now() > deadline {
                self.queue.lock().clear();
                return Err(LinkError::Device("Playback stalled".to_string()));
            }
            thread::sleep(DRAIN_POLL);
        }
        Ok(())
    }

    fn close(&mut self) -> calclink_core::Result<()> {
        self.stream
            .pause()
            .map_err(|e| LinkError::Device(e.to_string()))
    }
}

/// Default input device; the first channel goes to the receiver's queue.
/// Recording stops when this is dropped.
pub struct Microphone {
    _stream: Stream,
}

impl Microphone {
    pub fn open(framerate: u32, sender: SampleSender) -> Result<Self> {
        let host = cpal::default_host();
        let device: Device = host
            .default_input_device()
            .ok_or_else(|| CliError::Audio("No input device available".to_string()))?;
        let supported = device.default_input_config().map_err(CliError::audio)?;
        let channels = supported.channels() as usize;
        log::debug!(
            "Input device {} with {} channels",
            device.name().unwrap_or_default(),
            channels
        );

        let stream = device
            .build_input_stream(
                &stream_config(supported.channels(), framerate),
                move |data: &[f32], _: &InputCallbackInfo| {
                    let samples: Vec<i16> = data.iter().step_by(channels).map(|&s| to_short(s)).collect();
                    // the receiver is gone once the session stops
                    let _ = sender.send(samples);
                },
                error_callback,
                None,
            )
            .map_err(CliError::audio)?;
        stream.play().map_err(CliError::audio)?;

        Ok(Self { _stream: stream })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion() {
        assert_eq!(to_short(to_float(i16::MAX)), i16::MAX - 1);
        assert_eq!(to_short(to_float(0)), 0);
        assert_eq!(to_short(2.0), i16::MAX);
        assert_eq!(to_short(-2.0), -i16::MAX);
    }
}
