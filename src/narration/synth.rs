use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use crate::error::ChatError;

/// Turns a line of text into a playable audio payload.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ChatError>;
}

/// Synthesizer backed by the local TTS endpoint: a form-encoded POST of
/// `text=<line>` answered with binary audio.
#[derive(Clone)]
pub struct HttpSynthesizer {
    http: Client,
    url: String,
}

impl HttpSynthesizer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ChatError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::SynthesisFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ChatError> {
        debug!("POST {} ({} bytes of text)", self.url, text.len());

        let resp = self
            .http
            .post(&self.url)
            .form(&[("text", text)])
            .send()
            .await
            .map_err(|e| ChatError::SynthesisFailed(format!("request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::SynthesisFailed(format!(
                "status={status} body={body}"
            )));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| ChatError::SynthesisFailed(format!("failed to read audio: {e}")))?;
        if audio.is_empty() {
            return Err(ChatError::SynthesisFailed("empty audio payload".into()));
        }
        debug!("Received {} bytes of audio", audio.len());
        Ok(audio.to_vec())
    }
}
