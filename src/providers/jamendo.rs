#![forbid(unsafe_code)]

//! Jamendo client (`api.jamendo.com/v3.0`). The one catalogue that hands out
//! an explicit download link (`audiodownload`) next to the stream link
//! (`audio`), and the only provider with an id lookup and a popularity
//! chart. Requires a registered client id; there are no community mirrors.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{Playback, Provider, ProviderError, Resolved, Suggestion, Track, get_json};

pub const DEFAULT_BASE: &str = "https://api.jamendo.com/v3.0";

const SUGGEST_LIMIT: u32 = 8;
const SEARCH_LIMIT: u32 = 20;
const POPULAR_LIMIT: u32 = 20;

pub struct JamendoProvider {
    client: Client,
    base: String,
    client_id: String,
}

impl JamendoProvider {
    pub fn new(client: Client, client_id: String) -> Self {
        Self::with_base(client, DEFAULT_BASE.to_string(), client_id)
    }

    pub fn with_base(client: Client, base: String, client_id: String) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            client_id,
        }
    }

    async fn tracks(&self, params: &[(&str, &str)]) -> Result<Vec<TrackEntry>, ProviderError> {
        let endpoint = format!("{}/tracks/", self.base);
        let request = self
            .client
            .get(&endpoint)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("format", "json"),
            ])
            .query(params);
        let response: TracksResponse = get_json(request).await?;
        if response.results.is_empty() {
            return Err(ProviderError::NoResults);
        }
        Ok(response.results)
    }
}

#[async_trait]
impl Provider for JamendoProvider {
    fn name(&self) -> &'static str {
        "jamendo"
    }

    async fn suggest(&self, query: &str) -> Result<Vec<Suggestion>, ProviderError> {
        // namesearch matches on the title only, which is what an
        // autocomplete box wants.
        let limit = SUGGEST_LIMIT.to_string();
        let entries = self
            .tracks(&[("namesearch", query), ("limit", limit.as_str())])
            .await?;
        Ok(entries.iter().map(suggestion_from).collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<Track>, ProviderError> {
        let limit = SEARCH_LIMIT.to_string();
        let entries = self.tracks(&[("search", query), ("limit", limit.as_str())]).await?;
        Ok(entries.iter().map(track_from).collect())
    }

    async fn resolve(&self, query: &str) -> Result<Resolved, ProviderError> {
        let entries = self.tracks(&[("search", query), ("limit", "1")]).await?;
        let entry = entries.first().ok_or(ProviderError::NoResults)?;
        let audio = entry
            .audio
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ProviderError::Decode("track carries no audio URL".into()))?;
        Ok(Resolved {
            track: track_from(entry),
            playback: Playback::Redirect(audio),
            download_url: entry
                .audiodownload
                .clone()
                .filter(|url| !url.is_empty()),
        })
    }

    async fn track(&self, id: &str) -> Result<Track, ProviderError> {
        let entries = self.tracks(&[("id", id), ("limit", "1")]).await?;
        let entry = entries.first().ok_or(ProviderError::NoResults)?;
        Ok(track_from(entry))
    }

    async fn popular(&self) -> Result<Vec<Track>, ProviderError> {
        let limit = POPULAR_LIMIT.to_string();
        let entries = self
            .tracks(&[("order", "popularity_week"), ("limit", limit.as_str())])
            .await?;
        Ok(entries.iter().map(track_from).collect())
    }
}

#[derive(Debug, Deserialize)]
struct TracksResponse {
    #[serde(default)]
    results: Vec<TrackEntry>,
}

#[derive(Debug, Deserialize)]
struct TrackEntry {
    id: String,
    name: String,
    #[serde(default)]
    artist_name: Option<String>,
    #[serde(default)]
    album_name: Option<String>,
    #[serde(default)]
    duration: Option<u64>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    audiodownload: Option<String>,
}

fn track_from(entry: &TrackEntry) -> Track {
    Track {
        id: entry.id.clone(),
        title: entry.name.clone(),
        artist: entry
            .artist_name
            .clone()
            .unwrap_or_else(|| "Unknown Artist".to_string()),
        album: entry.album_name.clone().filter(|name| !name.is_empty()),
        duration_secs: entry.duration,
        thumbnail_url: entry.image.clone().filter(|url| !url.is_empty()),
        provider: "jamendo",
    }
}

fn suggestion_from(entry: &TrackEntry) -> Suggestion {
    Suggestion {
        id: entry.id.clone(),
        title: entry.name.clone(),
        artist: entry
            .artist_name
            .clone()
            .unwrap_or_else(|| "Unknown Artist".to_string()),
        thumbnail_url: entry.image.clone().filter(|url| !url.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn provider_for(server: &MockServer) -> JamendoProvider {
        JamendoProvider::with_base(Client::new(), server.base_url(), "test-id".into())
    }

    fn sample_body() -> serde_json::Value {
        json!({
            "headers": {"status": "success", "results_count": 1},
            "results": [{
                "id": "168",
                "name": "J'm'e FPM",
                "artist_name": "TriFace",
                "album_name": "Premiers Jets",
                "duration": 183,
                "image": "https://img.jamendo.test/cover.jpg",
                "audio": "https://stream.jamendo.test/168",
                "audiodownload": "https://dl.jamendo.test/168.mp3"
            }]
        })
    }

    #[tokio::test]
    async fn resolve_redirects_and_keeps_download_link() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/tracks/")
                .query_param("client_id", "test-id")
                .query_param("search", "fpm");
            then.status(200).json_body(sample_body());
        });

        let resolved = provider_for(&server).resolve("fpm").await.unwrap();
        match resolved.playback {
            Playback::Redirect(url) => assert_eq!(url, "https://stream.jamendo.test/168"),
            Playback::Pipe(_) => panic!("jamendo playback must redirect"),
        }
        assert_eq!(
            resolved.download_url.as_deref(),
            Some("https://dl.jamendo.test/168.mp3")
        );
    }

    #[tokio::test]
    async fn track_looks_up_by_id() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/tracks/").query_param("id", "168");
            then.status(200).json_body(sample_body());
        });

        let track = provider_for(&server).track("168").await.unwrap();
        assert_eq!(track.title, "J'm'e FPM");
        assert_eq!(track.album.as_deref(), Some("Premiers Jets"));
        assert_eq!(track.provider, "jamendo");
    }

    #[tokio::test]
    async fn popular_orders_by_weekly_popularity() {
        let server = MockServer::start();
        let chart_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/tracks/")
                .query_param("order", "popularity_week");
            then.status(200).json_body(sample_body());
        });

        let tracks = provider_for(&server).popular().await.unwrap();
        assert_eq!(tracks.len(), 1);
        chart_mock.assert();
    }

    #[tokio::test]
    async fn unknown_id_is_no_results() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/tracks/");
            then.status(200).json_body(json!({"results": []}));
        });

        let err = provider_for(&server).track("999999").await.unwrap_err();
        assert!(matches!(err, ProviderError::NoResults));
    }

    #[tokio::test]
    async fn upstream_error_is_reported_with_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/tracks/");
            then.status(401);
        });

        let err = provider_for(&server).search("anything").await.unwrap_err();
        match err {
            ProviderError::UpstreamStatus { status, .. } => assert_eq!(status, 401),
            other => panic!("unexpected error: {other}"),
        }
    }
}
