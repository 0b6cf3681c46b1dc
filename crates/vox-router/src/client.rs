//! Speech client: performs one TTS or STT call against one endpoint.
//!
//! The selector only knows the [`SpeechClient`] trait; [`HttpSpeechClient`] is the
//! OpenAI-compatible implementation (`/audio/speech` and `/audio/transcriptions`).

use crate::classify::is_local_url;
use crate::endpoint::ServiceType;
use crate::error::{ErrorKind, RouterResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TTS_MODEL: &str = "tts-1";
const DEFAULT_AUDIO_FORMAT: &str = "mp3";

/// What to send. The variant decides the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechPayload {
    Speak {
        text: String,
        /// `response_format`, e.g. `mp3` or `wav`.
        format: String,
    },
    Transcribe {
        audio: Vec<u8>,
        file_name: String,
        mime: String,
    },
}

impl SpeechPayload {
    pub fn speak(text: impl Into<String>) -> Self {
        Self::Speak {
            text: text.into(),
            format: DEFAULT_AUDIO_FORMAT.to_string(),
        }
    }

    /// Audio upload; the MIME type is inferred from the file extension.
    pub fn transcribe(audio: Vec<u8>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let mime = mime_for(&file_name).to_string();
        Self::Transcribe {
            audio,
            file_name,
            mime,
        }
    }

    pub fn service(&self) -> ServiceType {
        match self {
            Self::Speak { .. } => ServiceType::Tts,
            Self::Transcribe { .. } => ServiceType::Stt,
        }
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("webm") => "audio/webm",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// One attempt against one endpoint.
#[derive(Debug, Clone)]
pub struct SpeechRequest<'a> {
    pub endpoint_url: &'a str,
    pub service: ServiceType,
    /// Voice for TTS, model for STT.
    pub item: &'a str,
    /// TTS model; unused for STT (the item is the model).
    pub model: Option<&'a str>,
    pub payload: &'a SpeechPayload,
    /// Remaining budget for this attempt.
    pub deadline: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutput {
    Audio(Vec<u8>),
    Transcript(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechFailure {
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SpeechFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::RequestTimeout,
            _ => ErrorKind::RequestFailed,
        }
    }
}

#[async_trait]
pub trait SpeechClient: Send + Sync {
    async fn perform(&self, request: &SpeechRequest<'_>) -> Result<SpeechOutput, SpeechFailure>;
}

#[derive(Deserialize)]
struct Transcription {
    text: String,
}

/// OpenAI-compatible speech client.
#[derive(Debug, Clone)]
pub struct HttpSpeechClient {
    client: reqwest::Client,
    /// Bearer key, only sent to non-local endpoints.
    api_key: Option<String>,
}

impl HttpSpeechClient {
    pub fn new(api_key: Option<String>) -> RouterResult<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, api_key })
    }

    pub fn with_client(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    /// Underlying HTTP client, for sharing its pool with the discoverer.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    fn authorize(&self, req: reqwest::RequestBuilder, endpoint_url: &str) -> reqwest::RequestBuilder {
        match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) if !is_local_url(endpoint_url) => req.bearer_auth(key),
            _ => req,
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        endpoint_url: &str,
        deadline: Duration,
    ) -> Result<reqwest::Response, SpeechFailure> {
        let res = self
            .authorize(req, endpoint_url)
            .timeout(deadline)
            .send()
            .await
            .map_err(transport_failure)?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SpeechFailure::Status {
                code: status.as_u16(),
                body: body.trim().chars().take(200).collect(),
            });
        }
        Ok(res)
    }
}

#[async_trait]
impl SpeechClient for HttpSpeechClient {
    async fn perform(&self, request: &SpeechRequest<'_>) -> Result<SpeechOutput, SpeechFailure> {
        let base = request.endpoint_url.trim_end_matches('/');
        match request.payload {
            SpeechPayload::Speak { text, format } => {
                let body = serde_json::json!({
                    "model": request.model.unwrap_or(DEFAULT_TTS_MODEL),
                    "input": text,
                    "voice": request.item,
                    "response_format": format,
                });
                let req = self.client.post(format!("{}/audio/speech", base)).json(&body);
                let res = self.send(req, request.endpoint_url, request.deadline).await?;
                let bytes = res.bytes().await.map_err(transport_failure)?;
                if bytes.is_empty() {
                    return Err(SpeechFailure::InvalidResponse("empty audio body".to_string()));
                }
                Ok(SpeechOutput::Audio(bytes.to_vec()))
            }
            SpeechPayload::Transcribe {
                audio,
                file_name,
                mime,
            } => {
                let part = reqwest::multipart::Part::bytes(audio.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime)
                    .map_err(|e| SpeechFailure::Transport(format!("invalid mime type: {}", e)))?;
                let form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("model", request.item.to_string());
                let req = self
                    .client
                    .post(format!("{}/audio/transcriptions", base))
                    .multipart(form);
                let res = self.send(req, request.endpoint_url, request.deadline).await?;
                let parsed: Transcription = res.json().await.map_err(|e| {
                    if e.is_timeout() {
                        SpeechFailure::Timeout
                    } else {
                        SpeechFailure::InvalidResponse(e.to_string())
                    }
                })?;
                Ok(SpeechOutput::Transcript(parsed.text.trim().to_string()))
            }
        }
    }
}

fn transport_failure(err: reqwest::Error) -> SpeechFailure {
    if err.is_timeout() {
        SpeechFailure::Timeout
    } else {
        SpeechFailure::Transport(err.to_string())
    }
}
