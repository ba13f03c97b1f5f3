#![forbid(unsafe_code)]

//! Invidious client, speaking the `api/v1` surface.
//!
//! Same two-step shape as the Piped client: `/api/v1/search` for candidates,
//! `/api/v1/videos/{id}` for the adaptive format table, then proxy the best
//! `audio/*` entry. Instances serialize `bitrate` as a string, some as a
//! number; both are accepted.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::failover::MirrorPool;

use super::{Playback, Provider, ProviderError, Resolved, Suggestion, Track, fetch_audio, get_json};

const SUGGEST_LIMIT: usize = 8;

pub struct InvidiousProvider {
    client: Client,
    mirrors: MirrorPool,
}

impl InvidiousProvider {
    pub fn new(client: Client, mirrors: MirrorPool) -> Self {
        Self { client, mirrors }
    }
}

#[async_trait]
impl Provider for InvidiousProvider {
    fn name(&self) -> &'static str {
        "invidious"
    }

    async fn suggest(&self, query: &str) -> Result<Vec<Suggestion>, ProviderError> {
        self.mirrors
            .try_each("song suggest", |base| {
                let client = self.client.clone();
                let query = query.to_string();
                async move {
                    let videos = search_videos(&client, &base, &query).await?;
                    Ok(videos
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
                    let videos = search_videos(&client, &base, &query).await?;
                    Ok(videos.iter().map(track_from).collect())
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
                    let videos = search_videos(&client, &base, &query).await?;
                    let video = videos.first().ok_or(ProviderError::NoResults)?;

                    let endpoint = format!(
                        "{}/api/v1/videos/{}",
                        base.as_str().trim_end_matches('/'),
                        video.video_id
                    );
                    let detail: VideoDetail = get_json(client.get(&endpoint)).await?;
                    let format = best_audio_format(&detail.adaptive_formats).ok_or_else(|| {
                        ProviderError::Decode("video carries no audio formats".into())
                    })?;

                    let pipe = fetch_audio(&client, &format.url).await?;
                    Ok(Resolved {
                        track: track_from(video),
                        playback: Playback::Pipe(pipe),
                        download_url: None,
                    })
                }
            })
            .await
    }
}

async fn search_videos(
    client: &Client,
    base: &Url,
    query: &str,
) -> Result<Vec<SearchVideo>, ProviderError> {
    let endpoint = format!("{}/api/v1/search", base.as_str().trim_end_matches('/'));
    let request = client.get(&endpoint).query(&[("q", query), ("type", "video")]);
    let videos: Vec<SearchVideo> = get_json(request).await?;
    if videos.is_empty() {
        return Err(ProviderError::NoResults);
    }
    Ok(videos)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchVideo {
    video_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    length_seconds: Option<i64>,
    #[serde(default)]
    video_thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetail {
    #[serde(default)]
    adaptive_formats: Vec<AdaptiveFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdaptiveFormat {
    url: String,
    #[serde(default, rename = "type")]
    media_type: Option<String>,
    #[serde(default)]
    bitrate: Option<serde_json::Value>,
}

impl AdaptiveFormat {
    fn is_audio(&self) -> bool {
        self.media_type
            .as_deref()
            .is_some_and(|kind| kind.starts_with("audio/"))
    }

    fn bitrate_value(&self) -> u64 {
        match self.bitrate.as_ref() {
            Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

fn best_audio_format(formats: &[AdaptiveFormat]) -> Option<&AdaptiveFormat> {
    formats
        .iter()
        .filter(|format| format.is_audio())
        .max_by_key(|format| format.bitrate_value())
}

fn best_thumbnail(video: &SearchVideo) -> Option<String> {
    video
        .video_thumbnails
        .iter()
        .find_map(|thumb| thumb.url.clone())
}

fn track_from(video: &SearchVideo) -> Track {
    Track {
        id: video.video_id.clone(),
        title: video.title.clone().unwrap_or_default(),
        artist: video
            .author
            .clone()
            .unwrap_or_else(|| "Unknown Artist".to_string()),
        album: None,
        duration_secs: video
            .length_seconds
            .and_then(|secs| u64::try_from(secs).ok()),
        thumbnail_url: best_thumbnail(video),
        provider: "invidious",
    }
}

fn suggestion_from(video: &SearchVideo) -> Suggestion {
    Suggestion {
        id: video.video_id.clone(),
        title: video.title.clone().unwrap_or_default(),
        artist: video
            .author
            .clone()
            .unwrap_or_else(|| "Unknown Artist".to_string()),
        thumbnail_url: best_thumbnail(video),
    }
}
