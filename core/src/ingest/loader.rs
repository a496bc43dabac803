use crate::config::ChannelMix;
use crate::ingest::buffer::{SampleBuffer, Samples};
use crate::interface::recording::{FormatHint, IqFormat, WaveformSource};
use crate::prelude::{EngineError, EngineResult};
use crate::telemetry::log::LogManager;
use hound::{SampleFormat, WavReader};
use num_complex::Complex32;
use std::io::{Cursor, ErrorKind};
use symphonia::core::audio::SampleBuffer as DecodedBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Interleaved samples straight out of a decoder, before channel reduction.
struct Decoded {
    interleaved: Vec<f32>,
    channels: u16,
    sample_rate: f64,
}

/// Decodes supported containers into a single-channel [`SampleBuffer`].
pub struct WaveformLoader {
    channel_mix: ChannelMix,
    logger: LogManager,
}

impl WaveformLoader {
    pub fn new(channel_mix: ChannelMix) -> Self {
        Self {
            channel_mix,
            logger: LogManager::new("loader"),
        }
    }

    pub fn load(&self, source: &WaveformSource) -> EngineResult<SampleBuffer> {
        if source.bytes.is_empty() {
            return Err(EngineError::EmptyInput);
        }

        let hint = match source.hint {
            FormatHint::Auto => sniff(&source.bytes)?,
            other => other,
        };

        let buffer = match hint {
            FormatHint::RawIq {
                format,
                sample_rate_hz,
            } => decode_iq(&source.bytes, format, sample_rate_hz)?,
            FormatHint::Wav => self.reduce(decode_wav(&source.bytes)?)?,
            FormatHint::Flac => self.reduce(decode_compressed(&source.bytes, "flac", true)?)?,
            FormatHint::Ogg => self.reduce(decode_compressed(&source.bytes, "ogg", false)?)?,
            FormatHint::Mp3 => self.reduce(decode_compressed(&source.bytes, "mp3", false)?)?,
            FormatHint::Auto => {
                return Err(EngineError::Internal("format sniffing returned auto".into()))
            }
        };

        self.logger.record(&format!(
            "decoded {:?}: {} samples at {} Hz ({} channels)",
            hint,
            buffer.len(),
            buffer.sample_rate(),
            buffer.channels()
        ));
        Ok(buffer)
    }

    fn reduce(&self, decoded: Decoded) -> EngineResult<SampleBuffer> {
        let channels = decoded.channels.max(1) as usize;
        let mono: Vec<f32> = match self.channel_mix {
            ChannelMix::First => decoded
                .interleaved
                .chunks_exact(channels)
                .map(|frame| frame[0])
                .collect(),
            ChannelMix::Average => decoded
                .interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect(),
        };
        SampleBuffer::new(Samples::Real(mono), decoded.sample_rate, decoded.channels)
    }
}

fn sniff(bytes: &[u8]) -> EngineResult<FormatHint> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        Ok(FormatHint::Wav)
    } else if bytes.starts_with(b"fLaC") {
        Ok(FormatHint::Flac)
    } else if bytes.starts_with(b"OggS") {
        Ok(FormatHint::Ogg)
    } else if bytes.starts_with(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
    {
        Ok(FormatHint::Mp3)
    } else {
        Err(EngineError::UnsupportedFormat(
            "unrecognised container; raw IQ needs a declared format and sample rate".into(),
        ))
    }
}

fn decode_wav(bytes: &[u8]) -> EngineResult<Decoded> {
    let mut reader = WavReader::new(Cursor::new(bytes)).map_err(wav_error)?;
    let spec = reader.spec();
    let declared = reader.len() as usize;
    let mut interleaved = Vec::with_capacity(declared);

    match spec.sample_format {
        SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                let value = sample.map_err(|err| truncated(declared, interleaved.len(), err))?;
                if !value.is_finite() {
                    return Err(EngineError::CorruptData(format!(
                        "non-finite sample at index {}",
                        interleaved.len()
                    )));
                }
                interleaved.push(value);
            }
        }
        SampleFormat::Int => {
            let scale = 2f32.powi(i32::from(spec.bits_per_sample) - 1);
            for sample in reader.samples::<i32>() {
                let value = sample.map_err(|err| truncated(declared, interleaved.len(), err))?;
                interleaved.push(value as f32 / scale);
            }
        }
    }

    if interleaved.len() != declared {
        return Err(EngineError::CorruptData(format!(
            "declared {} samples, decoded {}",
            declared,
            interleaved.len()
        )));
    }
    if interleaved.is_empty() {
        return Err(EngineError::EmptyInput);
    }

    Ok(Decoded {
        interleaved,
        channels: spec.channels,
        sample_rate: f64::from(spec.sample_rate),
    })
}

fn wav_error(err: hound::Error) -> EngineError {
    match err {
        hound::Error::Unsupported | hound::Error::TooWide | hound::Error::InvalidSampleFormat => {
            EngineError::UnsupportedFormat(format!("wav: {}", err))
        }
        other => EngineError::CorruptData(format!("wav: {}", other)),
    }
}

fn truncated(declared: usize, decoded: usize, err: hound::Error) -> EngineError {
    EngineError::CorruptData(format!(
        "declared {} samples, decoded {} before failure: {}",
        declared, decoded, err
    ))
}

fn decode_compressed(bytes: &[u8], extension: &str, lossless: bool) -> EngineResult<Decoded> {
    let stream = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(extension);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(symphonia_error)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| EngineError::UnsupportedFormat(format!("{}: no audio track", extension)))?;
    let track_id = track.id;
    let declared_frames = track.codec_params.n_frames;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track
        .codec_params
        .channels
        .map(|layout| layout.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(symphonia_error)?;

    let mut interleaved = Vec::new();
    let mut frames: u64 = 0;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(symphonia_error(err)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet).map_err(symphonia_error)?;
        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count() as u16);
        frames += decoded.frames() as u64;

        let mut buffer = DecodedBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buffer.samples());
    }

    if lossless {
        if let Some(declared) = declared_frames {
            if declared != frames {
                return Err(EngineError::CorruptData(format!(
                    "{}: declared {} frames, decoded {}",
                    extension, declared, frames
                )));
            }
        }
    }
    if interleaved.is_empty() {
        return Err(EngineError::EmptyInput);
    }

    let sample_rate = sample_rate
        .ok_or_else(|| EngineError::CorruptData(format!("{}: missing sample rate", extension)))?;
    Ok(Decoded {
        interleaved,
        channels: channels.unwrap_or(1),
        sample_rate: f64::from(sample_rate),
    })
}

fn symphonia_error(err: SymphoniaError) -> EngineError {
    match err {
        SymphoniaError::Unsupported(what) => EngineError::UnsupportedFormat(what.to_string()),
        SymphoniaError::DecodeError(what) => EngineError::CorruptData(what.to_string()),
        SymphoniaError::IoError(err) => EngineError::CorruptData(err.to_string()),
        other => EngineError::Internal(other.to_string()),
    }
}

fn decode_iq(bytes: &[u8], format: IqFormat, sample_rate_hz: u32) -> EngineResult<SampleBuffer> {
    if sample_rate_hz == 0 {
        return Err(EngineError::UnsupportedFormat(
            "raw IQ requires a positive declared sample rate".into(),
        ));
    }
    let frame = format.frame_bytes();
    let chunks = bytes.chunks_exact(frame);
    if !chunks.remainder().is_empty() {
        return Err(EngineError::CorruptData(format!(
            "{} bytes is not a whole number of {:?} samples",
            bytes.len(),
            format
        )));
    }

    let mut samples = Vec::with_capacity(bytes.len() / frame);
    for (idx, chunk) in chunks.enumerate() {
        let sample = match format {
            IqFormat::Cf32 => Complex32::new(
                f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            ),
            IqFormat::Cs16 => Complex32::new(
                f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / 32_768.0,
                f32::from(i16::from_le_bytes([chunk[2], chunk[3]])) / 32_768.0,
            ),
            IqFormat::Cs8 => Complex32::new(
                f32::from(chunk[0] as i8) / 128.0,
                f32::from(chunk[1] as i8) / 128.0,
            ),
            IqFormat::Cu8 => Complex32::new(
                (f32::from(chunk[0]) - 127.5) / 127.5,
                (f32::from(chunk[1]) - 127.5) / 127.5,
            ),
        };
        if !sample.re.is_finite() || !sample.im.is_finite() {
            return Err(EngineError::CorruptData(format!(
                "non-finite IQ sample at index {}",
                idx
            )));
        }
        samples.push(sample);
    }

    SampleBuffer::new(Samples::Complex(samples), f64::from(sample_rate_hz), 2)
}
