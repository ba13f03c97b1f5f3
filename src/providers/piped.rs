#![forbid(unsafe_code)]

//! Piped client. Two calls per playback: `/search` with the `music_songs`
//! filter, then `/streams/{id}` for the audio stream table.
//!
//! Instance stream URLs are short-lived and often refuse cross-origin
//! fetches, so playback is proxied through us rather than redirected.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::failover::MirrorPool;

use super::{Playback, Provider, ProviderError, Resolved, Suggestion, Track, fetch_audio, get_json};

const SUGGEST_LIMIT: usize = 8;

pub struct PipedProvider {
    client: Client,
    mirrors: MirrorPool,
}

impl PipedProvider {
    pub fn new(client: Client, mirrors: MirrorPool) -> Self {
        Self { client, mirrors }
    }
}

#[async_trait]
impl Provider for PipedProvider {
    fn name(&self) -> &'static str {
        "piped"
    }

    async fn suggest(&self, query: &str) -> Result<Vec<Suggestion>, ProviderError> {
        self.mirrors
            .try_each("song suggest", |base| {
                let client = self.client.clone();
                let query = query.to_string();
                async move {
                    let items = search_songs(&client, &base, &query).await?;
                    Ok(items
                        .iter()
                        .take(SUGGEST_LIMIT)
                        .map(suggestion_from)
                        .collect())
                }
            })
            .await
    }

    async fn search(&self, query: &str) -> Result<Vec<Track>, ProviderError> {
        self.mirrors
            .try_each("song search", |base| {
                let client = self.client.clone();
                let query = query.to_string();
                async move {
                    let items = search_songs(&client, &base, &query).await?;
                    Ok(items.iter().map(track_from).collect())
                }
            })
            .await
    }

    async fn resolve(&self, query: &str) -> Result<Resolved, ProviderError> {
        self.mirrors
            .try_each("song resolve", |base| {
                let client = self.client.clone();
                let query = query.to_string();
                async move {
                    let items = search_songs(&client, &base, &query).await?;
                    let item = items.first().ok_or(ProviderError::NoResults)?;
                    let id = item.video_id().ok_or_else(|| {
                        ProviderError::Decode("search item carries no watch URL".into())
                    })?;

                    let endpoint =
                        format!("{}/streams/{}", base.as_str().trim_end_matches('/'), id);
                    let streams: StreamsResponse =
                        get_json(client.get(&endpoint)).await?;
                    let audio = best_audio_stream(&streams.audio_streams).ok_or_else(|| {
                        ProviderError::Decode("stream table has no audio entries".into())
                    })?;

                    let pipe = fetch_audio(&client, &audio.url).await?;
                    Ok(Resolved {
                        track: track_from(item),
                        playback: Playback::Pipe(pipe),
                        download_url: None,
                    })
                }
            })
            .await
    }
}

async fn search_songs(
    client: &Client,
    base: &Url,
    query: &str,
) -> Result<Vec<SearchItem>, ProviderError> {
    let endpoint = format!("{}/search", base.as_str().trim_end_matches('/'));
    let request = client
        .get(&endpoint)
        .query(&[("q", query), ("filter", "music_songs")]);
    let response: SearchResponse = get_json(request).await?;
    let items: Vec<SearchItem> = response
        .items
        .into_iter()
        .filter(|item| item.video_id().is_some())
        .collect();
    if items.is_empty() {
        return Err(ProviderError::NoResults);
    }
    Ok(items)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader_name: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    duration: Option<i64>,
}

impl SearchItem {
    /// Search results reference videos as relative `/watch?v=` links; other
    /// item kinds (channels, playlists) are skipped by the caller.
    fn video_id(&self) -> Option<&str> {
        self.url.as_deref()?.strip_prefix("/watch?v=")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamsResponse {
    #[serde(default)]
    audio_streams: Vec<AudioStream>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioStream {
    url: String,
    #[serde(default)]
    bitrate: i64,
}

fn best_audio_stream(streams: &[AudioStream]) -> Option<&AudioStream> {
    streams.iter().max_by_key(|stream| stream.bitrate)
}

fn track_from(item: &SearchItem) -> Track {
    Track {
        id: item.video_id().unwrap_or_default().to_string(),
        title: item.title.clone().unwrap_or_default(),
        artist: item
            .uploader_name
            .clone()
            .unwrap_or_else(|| "Unknown Artist".to_string()),
        album: None,
        duration_secs: item.duration.and_then(|secs| u64::try_from(secs).ok()),
        thumbnail_url: item.thumbnail.clone(),
        provider: "piped",
    }
}

fn suggestion_from(item: &SearchItem) -> Suggestion {
    Suggestion {
        id: item.video_id().unwrap_or_default().to_string(),
        title: item.title.clone().unwrap_or_default(),
        artist: item
            .uploader_name
            .clone()
            .unwrap_or_else(|| "Unknown Artist".to_string()),
        thumbnail_url: item.thumbnail.clone(),
    }
}
