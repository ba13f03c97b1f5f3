#![forbid(unsafe_code)]

//! JioSaavn client, speaking the community `saavn.dev`-style API.
//!
//! Search responses carry fully qualified CDN links, so playback is a plain
//! redirect; nothing is proxied. The `downloadUrl` array is ordered
//! worst-to-best quality and the last entry is the 320 kbps link.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::failover::MirrorPool;

use super::{Playback, Provider, ProviderError, Resolved, Suggestion, Track, get_json};

const SUGGEST_LIMIT: u32 = 8;
const SEARCH_LIMIT: u32 = 20;

pub struct SaavnProvider {
    client: Client,
    mirrors: MirrorPool,
}

impl SaavnProvider {
    pub fn new(client: Client, mirrors: MirrorPool) -> Self {
        Self { client, mirrors }
    }
}

#[async_trait]
impl Provider for SaavnProvider {
    fn name(&self) -> &'static str {
        "saavn"
    }

    async fn suggest(&self, query: &str) -> Result<Vec<Suggestion>, ProviderError> {
        self.mirrors
            .try_each("song suggest", |base| {
                let client = self.client.clone();
                let query = query.to_string();
                async move {
                    let songs = search_songs(&client, &base, &query, SUGGEST_LIMIT).await?;
                    Ok(songs.iter().map(suggestion_from).collect())
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
                    let songs = search_songs(&client, &base, &query, SEARCH_LIMIT).await?;
                    Ok(songs.iter().map(track_from).collect())
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
                    let songs = search_songs(&client, &base, &query, 1).await?;
                    let song = songs.first().ok_or(ProviderError::NoResults)?;
                    let url = best_download_url(song).ok_or_else(|| {
                        ProviderError::Decode("result carries no download links".into())
                    })?;
                    Ok(Resolved {
                        track: track_from(song),
                        playback: Playback::Redirect(url.clone()),
                        download_url: Some(url),
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
    limit: u32,
) -> Result<Vec<SongEntry>, ProviderError> {
    let endpoint = format!(
        "{}/api/search/songs",
        base.as_str().trim_end_matches('/')
    );
    let limit = limit.to_string();
    let request = client
        .get(&endpoint)
        .query(&[("query", query), ("limit", limit.as_str())]);
    let response: SearchResponse = get_json(request).await?;
    if response.data.results.is_empty() {
        return Err(ProviderError::NoResults);
    }
    Ok(response.data.results)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: SearchData,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    results: Vec<SongEntry>,
}

/// One search hit. Only the fields the routes need are decoded; hosted forks
/// disagree on the rest of the payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SongEntry {
    id: String,
    name: String,
    #[serde(default)]
    primary_artists: Option<String>,
    #[serde(default)]
    album: Option<AlbumEntry>,
    #[serde(default)]
    duration: Option<serde_json::Value>,
    #[serde(default)]
    image: Vec<LinkEntry>,
    #[serde(default)]
    download_url: Vec<LinkEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AlbumEntry {
    Name(String),
    Object {
        #[serde(default)]
        name: Option<String>,
    },
}

impl AlbumEntry {
    fn name(&self) -> Option<&str> {
        match self {
            AlbumEntry::Name(name) => Some(name),
            AlbumEntry::Object { name } => name.as_deref(),
        }
    }
}

/// Newer deployments say `url`, older forks say `link`.
#[derive(Debug, Deserialize)]
struct LinkEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

impl LinkEntry {
    fn href(&self) -> Option<&str> {
        self.url.as_deref().or(self.link.as_deref())
    }
}

/// Highest quality lives at the end of the list.
fn best_download_url(song: &SongEntry) -> Option<String> {
    song.download_url
        .iter()
        .rev()
        .find_map(|entry| entry.href().map(str::to_string))
}

fn best_image_url(song: &SongEntry) -> Option<String> {
    song.image
        .iter()
        .rev()
        .find_map(|entry| entry.href().map(str::to_string))
}

/// Some deployments serialize duration as `"383"`, others as `383`.
fn duration_secs(song: &SongEntry) -> Option<u64> {
    match song.duration.as_ref()? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn artist_name(song: &SongEntry) -> String {
    song.primary_artists
        .as_deref()
        .filter(|artists| !artists.trim().is_empty())
        .unwrap_or("Unknown Artist")
        .to_string()
}

fn track_from(song: &SongEntry) -> Track {
    Track {
        id: song.id.clone(),
        title: song.name.clone(),
        artist: artist_name(song),
        album: song
            .album
            .as_ref()
            .and_then(|album| album.name())
            .map(str::to_string),
        duration_secs: duration_secs(song),
        thumbnail_url: best_image_url(song),
        provider: "saavn",
    }
}

fn suggestion_from(song: &SongEntry) -> Suggestion {
    Suggestion {
        id: song.id.clone(),
        title: song.name.clone(),
        artist: artist_name(song),
        thumbnail_url: best_image_url(song),
    }
}
