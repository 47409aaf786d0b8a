//! WAV file I/O for session recordings and offline decoding

use hound::{SampleFormat, WavSpec};
use std::path::{Path, PathBuf};

use crate::error::{LinkError, Result};
use crate::DEFAULT_FRAMERATE;

/// 16-bit mono samples read from a WAV file
#[derive(Debug, Clone)]
pub struct WavData {
    pub samples: Vec<i16>,
    pub framerate: u32,
}

impl WavData {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.framerate as f64
    }
}

fn mono_spec(framerate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: framerate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Read a 16-bit mono WAV file
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<WavData> {
    let mut reader = hound::WavReader::open(path.as_ref())?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(LinkError::InvalidWav(format!(
            "number of channels is not 1. Actual: {}",
            spec.channels
        )));
    }
    if spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int {
        return Err(LinkError::InvalidWav(format!(
            "sample width is not 16 bits. Actual: {}",
            spec.bits_per_sample
        )));
    }
    if spec.sample_rate != DEFAULT_FRAMERATE {
        log::warn!(
            "Framerate is not {}. Actual: {}",
            DEFAULT_FRAMERATE,
            spec.sample_rate
        );
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(WavData {
        samples,
        framerate: spec.sample_rate,
    })
}

/// Write 16-bit mono samples
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[i16], framerate: u32) -> Result<()> {
    let mut writer = hound::WavWriter::create(path.as_ref(), mono_spec(framerate))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Accumulates a session's samples until it is flushed to disk
#[derive(Debug)]
pub struct Recording {
    path: PathBuf,
    framerate: u32,
    samples: Vec<i16>,
}

impl Recording {
    pub fn new<P: Into<PathBuf>>(path: P, framerate: u32) -> Self {
        Self {
            path: path.into(),
            framerate,
            samples: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn extend(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    pub fn extend_silence(&mut self, count: usize) {
        self.samples.resize(self.samples.len() + count, 0);
    }

    pub fn finish(self) -> Result<()> {
        write_wav(&self.path, &self.samples, self.framerate)?;
        log::debug!(
            "Wrote {} samples to {}",
            self.samples.len(),
            self.path.display()
        );
        Ok(())
    }
}
