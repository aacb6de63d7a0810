//! Minimal RIFF/WAVE codec for mono speech clips.
//!
//! Encoding always writes 16-bit PCM mono. Decoding accepts 16-bit PCM and
//! 32-bit float data with any channel count; multi-channel audio is
//! averaged down to mono.

use thiserror::Error;

use super::AudioClip;

const FORMAT_PCM: u16 = 1;
const FORMAT_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavError {
    #[error("not a RIFF/WAVE file")]
    NotWav,
    #[error("WAV file is truncated")]
    Truncated,
    #[error("missing {0} chunk")]
    MissingChunk(&'static str),
    #[error("unsupported WAV encoding: format {format}, {bits} bits")]
    Unsupported { format: u16, bits: u16 },
}

/// Serialize a clip as 16-bit PCM mono WAV.
pub fn encode(clip: &AudioClip) -> Vec<u8> {
    let data_len = (clip.samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&clip.sample_rate.to_le_bytes());
    out.extend_from_slice(&(clip.sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for &s in &clip.samples {
        out.extend_from_slice(&to_i16(s).to_le_bytes());
    }
    out
}

/// Parse a WAV file into a mono clip.
pub fn decode(bytes: &[u8]) -> Result<AudioClip, WavError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::NotWav);
    }

    let mut fmt: Option<(u16, u16, u32, u16)> = None;
    let mut data: Option<&[u8]> = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let len = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
            as usize;
        let body_start = pos + 8;
        // some recorders write a bogus length for the final data chunk
        let body_end = body_start.saturating_add(len).min(bytes.len());
        let body = &bytes[body_start..body_end];
        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(WavError::Truncated);
                }
                let format = u16::from_le_bytes([body[0], body[1]]);
                let channels = u16::from_le_bytes([body[2], body[3]]);
                let rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let bits = u16::from_le_bytes([body[14], body[15]]);
                let format = if format == FORMAT_EXTENSIBLE && body.len() >= 26 {
                    u16::from_le_bytes([body[24], body[25]])
                } else {
                    format
                };
                fmt = Some((format, channels.max(1), rate, bits));
            }
            b"data" => data = Some(body),
            _ => {}
        }
        // chunks are padded to even sizes
        pos = body_start.saturating_add(len + (len & 1));
    }

    let (format, channels, sample_rate, bits) = fmt.ok_or(WavError::MissingChunk("fmt"))?;
    let data = data.ok_or(WavError::MissingChunk("data"))?;

    let interleaved: Vec<f32> = match (format, bits) {
        (FORMAT_PCM, 16) => data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        (FORMAT_FLOAT, 32) => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (format, bits) => return Err(WavError::Unsupported { format, bits }),
    };

    let channels = channels as usize;
    let samples = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok(AudioClip {
        sample_rate,
        samples,
    })
}

/// Decode raw signed 16-bit little-endian mono PCM.
pub fn pcm16_to_clip(bytes: &[u8], sample_rate: u32) -> AudioClip {
    AudioClip {
        sample_rate,
        samples: bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_header_is_canonical() {
        let clip = AudioClip {
            sample_rate: 16_000,
            samples: vec![0.0, 0.5, -0.5],
        };
        let bytes = encode(&clip);
        assert_eq!(bytes.len(), 44 + 6);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]), 16_000);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), 3);
        assert!((decoded.samples[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn stereo_is_downmixed() {
        // hand-built stereo file: two frames, (1.0, 0.0) and (-1.0, -1.0) as floats
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(4u32 + 24 + 8 + 16).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&FORMAT_FLOAT.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&8_000u32.to_le_bytes());
        bytes.extend_from_slice(&(8_000u32 * 8).to_le_bytes());
        bytes.extend_from_slice(&8u16.to_le_bytes());
        bytes.extend_from_slice(&32u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        for s in [1.0f32, 0.0, -1.0, -1.0] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        let clip = decode(&bytes).unwrap();
        assert_eq!(clip.sample_rate, 8_000);
        assert_eq!(clip.samples, vec![0.5, -1.0]);
    }

    #[test]
    fn rejects_non_wav_and_unsupported() {
        assert_eq!(decode(b"ID3\x03 not audio"), Err(WavError::NotWav));

        let mut bytes = encode(&AudioClip {
            sample_rate: 8_000,
            samples: vec![0.0],
        });
        bytes[34] = 8; // bits per sample
        assert_eq!(
            decode(&bytes),
            Err(WavError::Unsupported { format: 1, bits: 8 })
        );
    }

    #[test]
    fn pcm16_conversion() {
        let clip = pcm16_to_clip(&[0x00, 0x40, 0x00, 0xC0], 24_000);
        assert_eq!(clip.samples, vec![0.5, -0.5]);
    }
}
