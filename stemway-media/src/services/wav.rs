//! WAV render conversion
//!
//! Decodes an uploaded raw render, resamples it to the target rate with an
//! FFT resampler, and re-encodes at the target bit depth. All functions are
//! synchronous; the export pipeline calls them through `spawn_blocking`.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{FftFixedIn, Resampler};
use std::path::Path;
use stemway_common::{Error, Result};

/// Target parameters for a conversion
#[derive(Debug, Clone, Copy)]
pub struct ConversionSpec {
    pub sample_rate: u32,
    /// 16 and 24 encode as integer PCM, 32 as float
    pub bit_depth: u16,
}

/// Convert one WAV file to the target sample rate and bit depth
pub fn convert_wav(input: &Path, output: &Path, spec: ConversionSpec) -> Result<()> {
    let (source_spec, channels) = read_samples(input)?;

    let channels = if source_spec.sample_rate != spec.sample_rate {
        resample_channels(&channels, source_spec.sample_rate, spec.sample_rate)?
    } else {
        channels
    };

    write_samples(output, &channels, spec)?;

    tracing::debug!(
        input = %input.display(),
        output = %output.display(),
        from_rate = source_spec.sample_rate,
        to_rate = spec.sample_rate,
        bit_depth = spec.bit_depth,
        "Converted render"
    );
    Ok(())
}

/// Decode a WAV file into normalized f32 samples, one Vec per channel
fn read_samples(path: &Path) -> Result<(WavSpec, Vec<Vec<f32>>)> {
    let mut reader = WavReader::open(path)
        .map_err(|e| Error::InvalidInput(format!("WAV decode failed for {}: {}", path.display(), e)))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::InvalidInput(format!("WAV decode failed: {}", e)))?,
        (SampleFormat::Int, bits @ (16 | 24 | 32)) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::InvalidInput(format!("WAV decode failed: {}", e)))?
        }
        (format, bits) => {
            return Err(Error::InvalidInput(format!(
                "Unsupported WAV encoding: {:?} {}-bit",
                format, bits
            )))
        }
    };

    let n_channels = spec.channels as usize;
    if n_channels == 0 || interleaved.is_empty() {
        return Err(Error::InvalidInput(format!(
            "WAV file {} contains no audio",
            path.display()
        )));
    }

    let frames = interleaved.len() / n_channels;
    let mut channels = vec![Vec::with_capacity(frames); n_channels];
    for frame in interleaved.chunks_exact(n_channels) {
        for (ch, sample) in frame.iter().enumerate() {
            channels[ch].push(*sample);
        }
    }

    Ok((spec, channels))
}

/// FFT resampling of channel-major audio, chunked through `FftFixedIn`
fn resample_channels(channels: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Result<Vec<Vec<f32>>> {
    let n_channels = channels.len();
    let frames = channels[0].len();

    let chunk_size = 1024;
    let sub_chunks = 2;
    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        chunk_size,
        sub_chunks,
        n_channels,
    )
    .map_err(|e| Error::Internal(format!("Failed to create resampler: {}", e)))?;

    let mut output: Vec<Vec<f32>> = vec![Vec::new(); n_channels];
    let input_frames = resampler.input_frames_next();
    let mut position = 0;

    while position < frames {
        let end = (position + input_frames).min(frames);
        let mut input: Vec<Vec<f32>> = Vec::with_capacity(n_channels);
        for channel in channels {
            let mut chunk = channel[position..end].to_vec();
            // Pad the last chunk if needed
            if chunk.len() < input_frames {
                chunk.resize(input_frames, 0.0);
            }
            input.push(chunk);
        }

        let resampled = resampler
            .process(&input, None)
            .map_err(|e| Error::Internal(format!("Resampling failed: {}", e)))?;
        for (ch, data) in resampled.iter().enumerate() {
            output[ch].extend_from_slice(data);
        }
        position += input_frames;
    }

    // Trim padding artifacts to the expected length
    let expected = (frames as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    for channel in &mut output {
        channel.truncate(expected);
    }

    Ok(output)
}

/// Encode channel-major f32 samples at the target bit depth
fn write_samples(path: &Path, channels: &[Vec<f32>], spec: ConversionSpec) -> Result<()> {
    let wav_spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bit_depth,
        sample_format: if spec.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let mut writer = WavWriter::create(path, wav_spec)
        .map_err(|e| Error::Internal(format!("WAV encode failed for {}: {}", path.display(), e)))?;

    let frames = channels[0].len();
    for frame in 0..frames {
        for channel in channels {
            let sample = frame_sample(channel, frame);
            match spec.bit_depth {
                16 => {
                    let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    writer.write_sample(v)
                }
                24 => {
                    let v = (sample.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                    writer.write_sample(v)
                }
                _ => writer.write_sample(sample),
            }
            .map_err(|e| Error::Internal(format!("WAV encode failed: {}", e)))?;
        }
    }

    writer
        .finalize()
        .map_err(|e| Error::Internal(format!("WAV finalize failed: {}", e)))?;
    Ok(())
}

fn frame_sample(channel: &[f32], frame: usize) -> f32 {
    channel.get(frame).copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 0.1s 440 Hz sine, 16-bit mono at the given rate
    fn write_test_wav(path: &Path, sample_rate: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        let frames = sample_rate / 10;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let v = (t * 440.0 * 2.0 * std::f32::consts::PI).sin();
            writer.write_sample((v * i16::MAX as f32 * 0.5) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn converts_rate_and_bit_depth() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_test_wav(&input, 44_100);

        convert_wav(
            &input,
            &output,
            ConversionSpec {
                sample_rate: 48_000,
                bit_depth: 24,
            },
        )
        .unwrap();

        let reader = WavReader::open(&output).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.bits_per_sample, 24);
        assert_eq!(spec.sample_format, SampleFormat::Int);

        // ~0.1s at 48 kHz
        let frames = reader.duration();
        assert!(
            (4_600..=5_000).contains(&frames),
            "expected ~4800 frames, got {}",
            frames
        );
    }

    #[test]
    fn same_rate_float_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_test_wav(&input, 48_000);

        convert_wav(
            &input,
            &output,
            ConversionSpec {
                sample_rate: 48_000,
                bit_depth: 32,
            },
        )
        .unwrap();

        let reader = WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
        assert_eq!(reader.duration(), 4_800);
    }

    #[test]
    fn corrupt_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.wav");
        std::fs::write(&input, b"RIFFnot really a wav").unwrap();

        let err = convert_wav(
            &input,
            &dir.path().join("out.wav"),
            ConversionSpec {
                sample_rate: 44_100,
                bit_depth: 16,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
