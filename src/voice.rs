//! Voice synthesis boundary.
//!
//! Speech generation lives in an external service. The studio only sees
//! the [`Synthesizer`] trait: text, voice and style in, an audio buffer (or
//! a [`SynthesisError`]) out. With the `voice` feature an HTTP client is
//! available that talks to a JSON endpoint returning base64 audio.

use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::error::SynthesisError;

/// What to say and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, voice: impl Into<String>) -> Self {
        SynthesisRequest {
            text: text.into(),
            voice: voice.into(),
            style: None,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }
}

/// Produces speech audio. Buffers may come back in any layout; the studio
/// converts them to the project layout.
#[allow(async_fn_in_trait)]
pub trait Synthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer, SynthesisError>;
}

/// Service reply body.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisReply {
    /// Base64-encoded audio file (WAV or MP3).
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(feature = "voice")]
pub use http::HttpSynthesizer;

#[cfg(feature = "voice")]
mod http {
    use std::time::Duration;

    use base64::{Engine, engine::general_purpose::STANDARD};

    use super::{SynthesisReply, SynthesisRequest, Synthesizer};
    use crate::buffer::AudioBuffer;
    use crate::error::SynthesisError;
    use crate::intake;

    /// JSON-over-HTTP synthesis client.
    #[derive(Debug, Clone)]
    pub struct HttpSynthesizer {
        client: reqwest::Client,
        endpoint: String,
        timeout: Duration,
    }

    impl HttpSynthesizer {
        pub fn new(endpoint: impl Into<String>) -> Self {
            HttpSynthesizer {
                client: reqwest::Client::new(),
                endpoint: endpoint.into(),
                timeout: Duration::from_secs(30),
            }
        }

        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        async fn fetch(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
            let response = self
                .client
                .post(&self.endpoint)
                .json(request)
                .send()
                .await
                .map_err(|e| SynthesisError::Unreachable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(SynthesisError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }

            let reply: SynthesisReply = response
                .json()
                .await
                .map_err(|e| SynthesisError::Unreachable(e.to_string()))?;
            decode_reply(reply)
        }
    }

    pub(super) fn decode_reply(reply: SynthesisReply) -> Result<Vec<u8>, SynthesisError> {
        if let Some(message) = reply.error {
            return Err(SynthesisError::Rejected { status: 200, message });
        }
        let audio = reply.audio.filter(|a| !a.is_empty()).ok_or(SynthesisError::NoAudio)?;
        STANDARD
            .decode(audio.trim())
            .map_err(|_| SynthesisError::NoAudio)
    }

    impl Synthesizer for HttpSynthesizer {
        async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer, SynthesisError> {
            log::info!("requesting synthesis: voice={} ({} chars)", request.voice, request.text.len());
            let bytes = tokio::time::timeout(self.timeout, self.fetch(request))
                .await
                .map_err(|_| SynthesisError::Timeout(self.timeout.as_secs_f64()))??;

            let decoded = intake::decode_container(&bytes)?;
            AudioBuffer::from_planar(decoded.channels, decoded.sample_rate)
                .map_err(|_| SynthesisError::NoAudio)
        }
    }
}
