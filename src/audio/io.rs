use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;

use crate::Result;
use crate::store::AudioFile;

/// Encodes captured mono samples as a 32-bit float WAV file image.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut bytes = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut bytes, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(bytes.into_inner())
}

/// Length in seconds of a WAV file image, read from its header.
pub fn wav_duration(bytes: &[u8]) -> Result<f64> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Ok(0.0);
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Reads an audio file from disk into a named [`AudioFile`].
pub fn read_audio_file<P: AsRef<Path>>(path: P) -> Result<AudioFile> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("audio"));
    Ok(AudioFile::new(name, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_recording_reports_duration() {
        let samples = vec![0.25f32; 22050];
        let bytes = encode_wav(&samples, 44100).unwrap();
        let duration = wav_duration(&bytes).unwrap();
        assert!((duration - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(wav_duration(b"definitely not riff").is_err());
    }

    #[test]
    fn test_read_audio_file_keeps_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bass.wav");
        std::fs::write(&path, encode_wav(&[0.0; 10], 8000).unwrap()).unwrap();

        let file = read_audio_file(&path).unwrap();
        assert_eq!(file.name, "bass.wav");
        assert!(wav_duration(&file.bytes).unwrap() > 0.0);
    }
}
