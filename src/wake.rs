//! Wake phrase detection.
//!
//! Records a bounded clip from the frame queue, sends it to the batch
//! transcription service, and applies the keyword + confidence rule. The
//! bounded recording window is what keeps the wake loop from ever blocking
//! indefinitely.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::audio::AudioFrame;
use crate::transcribe::Transcriber;

#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Every group must match; a group matches when any of its alternatives
    /// is contained in the transcript.
    pub keyword_groups: Vec<Vec<String>>,
    pub confidence_threshold: f32,
    pub record_ms: u64,
    pub sample_rate: u32,
}

/// Parse the compact keyword spec from config.toml: groups separated by ';',
/// alternatives within a group by '|'. "adam;hello|hi" means the transcript
/// needs "adam" and one of "hello"/"hi".
pub fn parse_keyword_groups(spec: &str) -> Vec<Vec<String>> {
    spec.split(';')
        .map(|group| {
            group
                .split('|')
                .map(|kw| kw.trim().to_lowercase())
                .filter(|kw| !kw.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|group: &Vec<String>| !group.is_empty())
        .collect()
}

pub struct WakeDetector {
    config: WakeConfig,
    transcriber: Arc<dyn Transcriber>,
}

impl WakeDetector {
    pub fn new(config: WakeConfig, transcriber: Arc<dyn Transcriber>) -> Self {
        Self { config, transcriber }
    }

    /// The pure wake rule: confidence above the threshold AND every keyword
    /// group present in the transcript.
    pub fn matches(&self, transcript: &str, confidence: f32) -> bool {
        if confidence <= self.config.confidence_threshold {
            return false;
        }
        let lowered = transcript.to_lowercase();
        self.config
            .keyword_groups
            .iter()
            .all(|group| group.iter().any(|kw| lowered.contains(kw.as_str())))
    }

    /// One wake attempt: record, transcribe, check. Returns whether the wake
    /// phrase was heard.
    pub async fn listen_once(&self, frames: &mut mpsc::Receiver<AudioFrame>) -> Result<bool> {
        let clip = self.record_clip(frames).await?;
        let wav = encode_wav(&clip, self.config.sample_rate)?;
        let result = self.transcriber.transcribe(&wav).await?;
        log::info!(
            "Wake transcript: \"{}\" (confidence {:.2})",
            result.transcript,
            result.confidence,
        );
        Ok(self.matches(&result.transcript, result.confidence))
    }

    async fn record_clip(&self, frames: &mut mpsc::Receiver<AudioFrame>) -> Result<Vec<i16>> {
        let target = (self.config.sample_rate as u64 * self.config.record_ms / 1000) as usize;
        let mut clip: Vec<i16> = Vec::with_capacity(target);
        while clip.len() < target {
            match frames.recv().await {
                Some(frame) => clip.extend_from_slice(&frame),
                None => anyhow::bail!("Capture stream closed during wake recording"),
            }
        }
        clip.truncate(target);
        Ok(clip)
    }
}

fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::Transcription;
    use anyhow::Result;
    use async_trait::async_trait;

    struct FixedTranscriber(Transcription);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _wav: &[u8]) -> Result<Transcription> {
            Ok(self.0.clone())
        }
    }

    fn detector() -> WakeDetector {
        WakeDetector::new(
            WakeConfig {
                keyword_groups: parse_keyword_groups("adam;hello|hi"),
                confidence_threshold: 0.6,
                record_ms: 100,
                sample_rate: 16000,
            },
            Arc::new(FixedTranscriber(Transcription {
                transcript: String::new(),
                confidence: 0.0,
            })),
        )
    }

    #[test]
    fn keyword_spec_parses_groups_and_alternatives() {
        assert_eq!(
            parse_keyword_groups("adam;hello|hi"),
            vec![vec!["adam".to_string()], vec!["hello".to_string(), "hi".to_string()]],
        );
    }

    #[test]
    fn wake_triggers_on_all_groups_above_threshold() {
        // "please say hello adam now" at 0.75 wakes
        assert!(detector().matches("please say hello adam now", 0.75));
    }

    #[test]
    fn wake_rejects_missing_keyword_despite_high_confidence() {
        // "hello there" at 0.9 is missing "adam"
        assert!(!detector().matches("hello there", 0.9));
    }

    #[test]
    fn wake_rejects_below_threshold() {
        assert!(!detector().matches("hello adam", 0.5));
        // threshold is strict
        assert!(!detector().matches("hello adam", 0.6));
    }

    #[test]
    fn wake_match_is_case_insensitive() {
        assert!(detector().matches("Hello Adam, what's up?", 0.8));
    }

    #[test]
    fn alternative_keywords_both_accepted() {
        let d = detector();
        assert!(d.matches("hi adam", 0.7));
        assert!(d.matches("hello adam", 0.7));
    }

    #[tokio::test]
    async fn recording_window_is_bounded() {
        let d = detector();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<AudioFrame>(16);
        // 100 ms at 16 kHz = 1600 samples; four 512-sample frames suffice
        for _ in 0..4 {
            tx.send(vec![0i16; 512]).await.unwrap();
        }
        let clip = d.record_clip(&mut rx).await.unwrap();
        assert_eq!(clip.len(), 1600);
    }

    #[tokio::test]
    async fn closed_capture_stream_is_an_error() {
        let d = detector();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<AudioFrame>(1);
        drop(tx);
        assert!(d.record_clip(&mut rx).await.is_err());
    }
}
