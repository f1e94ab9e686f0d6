//! Batch transcription client used by the wake stage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;

/// Credentials for the transcription service, read once at startup.
#[derive(Debug, Deserialize)]
pub struct SttCredentials {
    pub api_key: String,
}

pub fn load_credentials(path: &str) -> Result<SttCredentials> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credentials file '{}'", path))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse credentials file '{}'", path))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub transcript: String,
    pub confidence: f32,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one WAV clip. An empty transcript with zero confidence
    /// means the service heard nothing, which is not an error.
    async fn transcribe(&self, wav: &[u8]) -> Result<Transcription>;
}

#[derive(Deserialize)]
struct RecognizeResponse {
    results: Option<Vec<RecognizeAlternative>>,
}

#[derive(Deserialize)]
struct RecognizeAlternative {
    transcript: String,
    confidence: f32,
}

pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: String,
    boost_phrase: String,
    sample_rate: u32,
}

impl HttpTranscriber {
    pub fn new(url: String, api_key: String, boost_phrase: String, sample_rate: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            boost_phrase,
            sample_rate,
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<Transcription> {
        let body = json!({
            "config": {
                "encoding": "LINEAR16",
                "sample_rate_hertz": self.sample_rate,
                "language_code": "en-US",
                "model": "command_and_search",
                "boost_phrases": [self.boost_phrase],
            },
            "audio": BASE64.encode(wav),
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Transcription request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Transcription HTTP error: {}", response.status());
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;

        // No results means silence, not failure.
        let first = parsed.results.unwrap_or_default().into_iter().next();
        Ok(match first {
            Some(alt) => Transcription {
                transcript: alt.transcript,
                confidence: alt.confidence,
            },
            None => Transcription {
                transcript: String::new(),
                confidence: 0.0,
            },
        })
    }
}
