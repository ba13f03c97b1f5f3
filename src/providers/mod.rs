#![forbid(unsafe_code)]

//! Typed clients for the upstream music APIs.
//!
//! Every source family the product has shipped against (JioSaavn, Piped,
//! Invidious, Jamendo, yt-dlp + YouTube Music) implements the same
//! [`Provider`] trait. The backend selects exactly one at startup; handlers
//! only ever see `Arc<dyn Provider>`.

pub mod invidious;
pub mod jamendo;
pub mod piped;
pub mod saavn;
pub mod ytmusic;

use std::{io, sync::Arc, time::Duration};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, stream::BoxStream};
use reqwest::header;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::failover::MirrorPool;

pub use invidious::InvidiousProvider;
pub use jamendo::JamendoProvider;
pub use piped::PipedProvider;
pub use saavn::SaavnProvider;
pub use ytmusic::YtMusicProvider;

/// Per-request timeout for metadata calls. Streaming bodies are exempt; a
/// three-minute song must not be cut off mid-transfer.
pub(crate) const METADATA_TIMEOUT: Duration = Duration::from_secs(15);

/// One playable search result, the shape every provider normalizes into.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub provider: &'static str,
}

/// Lightweight autocomplete entry for the search box.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Audio bytes that must flow through this server, either proxied from an
/// upstream HTTP response or read off a transcoder subprocess's stdout.
pub struct AudioPipe {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

impl std::fmt::Debug for AudioPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPipe")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("stream", &"<byte stream>")
            .finish()
    }
}

impl AudioPipe {
    pub fn from_response(response: reqwest::Response) -> Self {
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let content_length = response.content_length();
        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        Self {
            content_type,
            content_length,
            stream,
        }
    }
}

/// How the resolved track reaches the listener.
#[derive(Debug)]
pub enum Playback {
    /// The upstream URL is directly fetchable by the browser.
    Redirect(String),
    /// Bytes must be relayed through us.
    Pipe(AudioPipe),
}

/// A best-match lookup, ready to play. `download_url` is set when the
/// upstream hands out a dedicated download link (Jamendo does, JioSaavn's
/// play link doubles as one); piped providers leave it empty and the
/// download route relays the playback pipe instead.
#[derive(Debug)]
pub struct Resolved {
    pub track: Track,
    pub playback: Playback,
    pub download_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned HTTP {status} for {url}")]
    UpstreamStatus { status: u16, url: String },
    #[error("could not decode upstream response: {0}")]
    Decode(String),
    #[error("no results for the requested query")]
    NoResults,
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),
    #[error("all {attempts} mirrors failed; last error: {last}")]
    MirrorsExhausted {
        attempts: usize,
        last: Box<ProviderError>,
    },
    #[error("subprocess failed: {0}")]
    Subprocess(String),
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Small-limit title search backing the autocomplete box.
    async fn suggest(&self, query: &str) -> Result<Vec<Suggestion>, ProviderError>;

    /// Full search results.
    async fn search(&self, query: &str) -> Result<Vec<Track>, ProviderError>;

    /// Best match for a free-text query, resolved all the way to playable
    /// audio.
    async fn resolve(&self, query: &str) -> Result<Resolved, ProviderError>;

    async fn track(&self, _id: &str) -> Result<Track, ProviderError> {
        Err(ProviderError::Unsupported("track lookup"))
    }

    async fn popular(&self) -> Result<Vec<Track>, ProviderError> {
        Err(ProviderError::Unsupported("the popular chart"))
    }
}

/// The source families the backend can be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Saavn,
    Piped,
    Invidious,
    Jamendo,
    YtMusic,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "saavn" | "jiosaavn" => Some(Self::Saavn),
            "piped" => Some(Self::Piped),
            "invidious" => Some(Self::Invidious),
            "jamendo" => Some(Self::Jamendo),
            "ytmusic" | "yt-dlp" | "ytdlp" => Some(Self::YtMusic),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Saavn => "saavn",
            Self::Piped => "piped",
            Self::Invidious => "invidious",
            Self::Jamendo => "jamendo",
            Self::YtMusic => "ytmusic",
        }
    }
}

/// Builds the configured provider. Fails fast on setup problems (a missing
/// Jamendo client id) rather than at first request.
pub fn from_config(
    config: &RuntimeConfig,
    client: reqwest::Client,
) -> anyhow::Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match config.provider {
        ProviderKind::Saavn => Arc::new(SaavnProvider::new(
            client,
            MirrorPool::new(config.saavn_mirrors.clone()),
        )),
        ProviderKind::Piped => Arc::new(PipedProvider::new(
            client,
            MirrorPool::new(config.piped_mirrors.clone()),
        )),
        ProviderKind::Invidious => Arc::new(InvidiousProvider::new(
            client,
            MirrorPool::new(config.invidious_mirrors.clone()),
        )),
        ProviderKind::Jamendo => {
            let client_id = config
                .jamendo_client_id
                .clone()
                .ok_or_else(|| anyhow!("JAMENDO_CLIENT_ID not set"))?;
            Arc::new(JamendoProvider::new(client, client_id))
        }
        ProviderKind::YtMusic => Arc::new(YtMusicProvider),
    };
    Ok(provider)
}

/// Sends a metadata request (GET + query params built by the caller) with
/// the metadata timeout applied and decodes the JSON body.
pub(crate) async fn get_json<T>(request: reqwest::RequestBuilder) -> Result<T, ProviderError>
where
    T: DeserializeOwned,
{
    let response = request.timeout(METADATA_TIMEOUT).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::UpstreamStatus {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|err| ProviderError::Decode(err.to_string()))
}

/// Opens an upstream audio URL as a relayable pipe. No timeout: the body is
/// as long as the song.
pub async fn fetch_audio(
    client: &reqwest::Client,
    url: &str,
) -> Result<AudioPipe, ProviderError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::UpstreamStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(AudioPipe::from_response(response))
}
