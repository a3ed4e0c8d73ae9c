//! WAV encoding helpers shared by the capture path and the playback engine.

use crate::audio::STREAM_SAMPLE_RATE;
use std::io::Cursor;

/// Wrap raw 16-bit PCM frames in a canonical WAV container.
pub fn pcm_frames_to_wav(
    frames: &[Vec<i16>],
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for frame in frames {
            for &sample in frame {
                writer.write_sample(sample)?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Generate a sine-wave beep as WAV bytes. Used when no TTS backend is
/// reachable, and for the speak-now / done cues.
pub fn sine_beep(freq: f32, duration_ms: u32, volume: f32) -> Result<Vec<u8>, hound::Error> {
    let n_samples = (STREAM_SAMPLE_RATE * duration_ms / 1000) as usize;
    let frame: Vec<i16> = (0..n_samples)
        .map(|i| {
            let t = i as f32 / STREAM_SAMPLE_RATE as f32;
            (volume * 32_767.0 * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
        })
        .collect();
    pcm_frames_to_wav(&[frame], STREAM_SAMPLE_RATE, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_round_trip_is_lossless() {
        let frames = vec![vec![0i16, 1, -1, 32_767, -32_768], vec![100, -100, 7]];
        let wav = pcm_frames_to_wav(&frames, 16_000, 1).unwrap();

        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);

        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        let original: Vec<i16> = frames.into_iter().flatten().collect();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_beep_duration_and_rate() {
        let wav = sine_beep(440.0, 500, 0.5).unwrap();
        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, STREAM_SAMPLE_RATE);
        assert_eq!(reader.len(), STREAM_SAMPLE_RATE / 2);
    }

    #[test]
    fn test_beep_stays_within_volume() {
        let wav = sine_beep(880.0, 100, 0.5).unwrap();
        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        for sample in reader.into_samples::<i16>() {
            let sample = sample.unwrap();
            assert!(sample.abs() <= (0.5 * 32_767.0) as i16 + 1);
        }
    }
}
