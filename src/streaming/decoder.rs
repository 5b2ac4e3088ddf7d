// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::{SampleBuffer, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::backend::{Codec, VoiceFormat};
use crate::error::AudioError;

/// A decoder cursor over one streamed wave. Implementations produce
/// interleaved f32 chunks; the fill thread converts them to the backend's
/// 16-bit format.
pub trait StreamDecoder: Send {
    /// The format of the voice this decoder feeds: always 16-bit PCM at
    /// the source's channel count and rate.
    fn output_format(&self) -> VoiceFormat;

    /// Decodes up to `max_frames` frames. `None` means end of data.
    fn next_chunk(&mut self, max_frames: usize) -> Result<Option<Vec<f32>>, AudioError>;

    /// Closes the cursor and reopens it at position 0.
    fn reset(&mut self) -> Result<(), AudioError>;
}

/// Streams a wave bank payload through symphonia. The payload is the
/// self-describing container the wave bank loader produced, so PCM and
/// MS-ADPCM entries both decode through the same path.
pub struct SymphoniaDecoder {
    payload: Arc<Vec<u8>>,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: VoiceFormat,
    leftover: Vec<f32>,
    finished: bool,
}

impl SymphoniaDecoder {
    pub fn new(payload: Arc<Vec<u8>>) -> Result<Self, AudioError> {
        let (reader, decoder, track_id, format) = Self::open(&payload)?;
        Ok(Self {
            payload,
            reader,
            decoder,
            track_id,
            format,
            leftover: Vec::new(),
            finished: false,
        })
    }

    #[allow(clippy::type_complexity)]
    fn open(
        payload: &Arc<Vec<u8>>,
    ) -> Result<(Box<dyn FormatReader>, Box<dyn Decoder>, u32, VoiceFormat), AudioError> {
        let cursor = Cursor::new(payload.as_ref().clone());
        let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("wav");

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(AudioError::Decode(SymphoniaError::Unsupported(
                "no audio track",
            )))?;
        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params
            .sample_rate
            .ok_or(AudioError::Decode(SymphoniaError::Unsupported(
                "missing sample rate",
            )))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or(AudioError::Decode(SymphoniaError::Unsupported(
                "missing channel count",
            )))?;

        let decoder = get_codecs().make(params, &DecoderOptions::default())?;

        let format = VoiceFormat {
            codec: Codec::Pcm,
            channels,
            sample_rate,
            block_align: channels * 2,
            bits_per_sample: 16,
        };
        Ok((reader, decoder, track_id, format))
    }

    /// Reads and decodes packets until EOF or some samples are produced.
    fn decode_more(&mut self) -> Result<Vec<f32>, AudioError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(Vec::new());
                }
                // Some decoders report EOF as a decode error on the final
                // packet.
                Err(SymphoniaError::DecodeError(_)) => {
                    self.finished = true;
                    return Ok(Vec::new());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self.decoder.decode(&packet)?;
            if decoded.frames() == 0 {
                continue;
            }
            let mut buffer = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
            buffer.copy_interleaved_ref(decoded);
            return Ok(buffer.samples().to_vec());
        }
    }
}

impl StreamDecoder for SymphoniaDecoder {
    fn output_format(&self) -> VoiceFormat {
        self.format.clone()
    }

    fn next_chunk(&mut self, max_frames: usize) -> Result<Option<Vec<f32>>, AudioError> {
        let target = max_frames * self.format.channels as usize;
        let mut samples = std::mem::take(&mut self.leftover);

        while samples.len() < target && !self.finished {
            let more = self.decode_more()?;
            if more.is_empty() {
                break;
            }
            samples.extend_from_slice(&more);
        }

        if samples.is_empty() {
            return Ok(None);
        }
        if samples.len() > target {
            self.leftover = samples.split_off(target);
        }
        Ok(Some(samples))
    }

    fn reset(&mut self) -> Result<(), AudioError> {
        let (reader, decoder, track_id, format) = Self::open(&self.payload)?;
        self.reader = reader;
        self.decoder = decoder;
        self.track_id = track_id;
        self.format = format;
        self.leftover.clear();
        self.finished = false;
        Ok(())
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::parse::wavebank::pcm_to_riff;

    fn riff_payload(samples: &[i16], channels: u16, rate: u32) -> Arc<Vec<u8>> {
        let payload: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let format = VoiceFormat {
            codec: Codec::Pcm,
            channels,
            sample_rate: rate,
            block_align: channels * 2,
            bits_per_sample: 16,
        };
        Arc::new(pcm_to_riff(&format, &payload))
    }

    #[test]
    fn test_decodes_repackaged_pcm() {
        let samples: Vec<i16> = (0..64).map(|i| (i * 100) as i16).collect();
        let mut decoder = SymphoniaDecoder::new(riff_payload(&samples, 1, 22050)).unwrap();

        let format = decoder.output_format();
        assert_eq!(format.channels, 1);
        assert_eq!(format.sample_rate, 22050);

        let mut all = Vec::new();
        while let Some(chunk) = decoder.next_chunk(16).unwrap() {
            assert!(chunk.len() <= 16);
            all.extend_from_slice(&chunk);
        }
        assert_eq!(all.len(), samples.len());
        // Spot-check the scaling: sample 10 is 1000 / 32768.
        assert!((all[10] - 1000.0 / 32768.0).abs() < 1e-3);
    }

    #[test]
    fn test_reset_reopens_at_start() {
        let samples: Vec<i16> = (0..32).map(|i| i as i16).collect();
        let mut decoder = SymphoniaDecoder::new(riff_payload(&samples, 1, 44100)).unwrap();

        let first = decoder.next_chunk(8).unwrap().unwrap();
        while decoder.next_chunk(8).unwrap().is_some() {}

        decoder.reset().unwrap();
        let again = decoder.next_chunk(8).unwrap().unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_garbage_payload_is_an_error() {
        let garbage = Arc::new(vec![0xFFu8; 64]);
        assert!(SymphoniaDecoder::new(garbage).is_err());
    }
}
