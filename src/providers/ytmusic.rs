#![forbid(unsafe_code)]

//! YouTube Music via yt-dlp. No HTTP client of our own: search shells out to
//! `yt-dlp --dump-single-json ytsearchN:…`, and playback pipes
//! `yt-dlp -o -` through `ffmpeg` so the response body is always MP3.
//!
//! Both tools must be on PATH; a missing binary surfaces as a subprocess
//! error on first use rather than at startup.

use std::process::Stdio;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{AudioPipe, Playback, Provider, ProviderError, Resolved, Suggestion, Track};

const SUGGEST_LIMIT: usize = 8;
const SEARCH_LIMIT: usize = 15;

pub struct YtMusicProvider;

#[async_trait]
impl Provider for YtMusicProvider {
    fn name(&self) -> &'static str {
        "ytmusic"
    }

    async fn suggest(&self, query: &str) -> Result<Vec<Suggestion>, ProviderError> {
        let entries = dump_search(query, SUGGEST_LIMIT).await?;
        Ok(entries.iter().map(suggestion_from).collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<Track>, ProviderError> {
        let entries = dump_search(query, SEARCH_LIMIT).await?;
        Ok(entries.iter().map(track_from).collect())
    }

    async fn resolve(&self, query: &str) -> Result<Resolved, ProviderError> {
        let entries = dump_search(query, 1).await?;
        let entry = entries.first().ok_or(ProviderError::NoResults)?;
        let pipe = transcode_pipe(&entry.id)?;
        Ok(Resolved {
            track: track_from(entry),
            playback: Playback::Pipe(pipe),
            download_url: None,
        })
    }
}

/// Runs a flat-playlist search dump and returns the entries. Same yt-dlp
/// invocation shape everywhere: single JSON document on stdout, warnings
/// silenced so stdout stays parseable.
async fn dump_search(query: &str, limit: usize) -> Result<Vec<SearchEntry>, ProviderError> {
    let target = format!("ytsearch{limit}:{query}");
    debug!(%target, "running yt-dlp search");
    let output = Command::new("yt-dlp")
        .arg("--dump-single-json")
        .arg("--flat-playlist")
        .arg("--skip-download")
        .arg("--no-warnings")
        .arg(&target)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| ProviderError::Subprocess(format!("launching yt-dlp: {err}")))?;

    if !output.status.success() {
        return Err(ProviderError::Subprocess(format!(
            "yt-dlp exited with {}",
            output.status
        )));
    }

    let dump: SearchDump = serde_json::from_slice(&output.stdout)
        .map_err(|err| ProviderError::Decode(format!("yt-dlp search dump: {err}")))?;
    let entries: Vec<SearchEntry> = dump
        .entries
        .into_iter()
        .filter(|entry| !entry.id.is_empty())
        .collect();
    if entries.is_empty() {
        return Err(ProviderError::NoResults);
    }
    Ok(entries)
}

/// Wires `yt-dlp -f bestaudio -o - | ffmpeg … -f mp3 pipe:1` and hands back
/// ffmpeg's stdout as the response body. A relay task shovels bytes between
/// the two children and reaps them; if the listener disconnects the pipes
/// collapse and both tools exit on the broken pipe.
fn transcode_pipe(video_id: &str) -> Result<AudioPipe, ProviderError> {
    let url = watch_url(video_id);

    let mut ytdlp = Command::new("yt-dlp")
        .arg("-f")
        .arg("bestaudio/best")
        .arg("-o")
        .arg("-")
        .arg("--quiet")
        .arg("--no-warnings")
        .arg(&url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| ProviderError::Subprocess(format!("launching yt-dlp: {err}")))?;

    let mut ffmpeg = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg("pipe:0")
        .arg("-vn")
        .arg("-codec:a")
        .arg("libmp3lame")
        .arg("-b:a")
        .arg("192k")
        .arg("-f")
        .arg("mp3")
        .arg("pipe:1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| ProviderError::Subprocess(format!("launching ffmpeg: {err}")))?;

    let mut source = ytdlp
        .stdout
        .take()
        .ok_or_else(|| ProviderError::Subprocess("yt-dlp stdout not captured".into()))?;
    let mut sink = ffmpeg
        .stdin
        .take()
        .ok_or_else(|| ProviderError::Subprocess("ffmpeg stdin not captured".into()))?;

    tokio::spawn(async move {
        let _ = tokio::io::copy(&mut source, &mut sink).await;
        // Closing stdin lets ffmpeg flush its final frame and exit.
        drop(sink);
        let _ = ytdlp.wait().await;
    });

    let stdout = ffmpeg
        .stdout
        .take()
        .ok_or_else(|| ProviderError::Subprocess("ffmpeg stdout not captured".into()))?;
    tokio::spawn(async move {
        let _ = ffmpeg.wait().await;
    });

    Ok(AudioPipe {
        content_type: "audio/mpeg".to_string(),
        content_length: None,
        stream: ReaderStream::new(stdout).boxed(),
    })
}

fn watch_url(video_id: &str) -> String {
    format!("https://music.youtube.com/watch?v={video_id}")
}

#[derive(Debug, Deserialize)]
struct SearchDump {
    #[serde(default)]
    entries: Vec<SearchEntry>,
}

/// Flat-playlist entries only carry the cheap fields; that is all the
/// search and suggest routes need.
#[derive(Debug, Deserialize)]
struct SearchEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnails: Vec<ThumbnailEntry>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailEntry {
    #[serde(default)]
    url: Option<String>,
}

fn artist_name(entry: &SearchEntry) -> String {
    entry
        .uploader
        .clone()
        .or_else(|| entry.channel.clone())
        .unwrap_or_else(|| "Unknown Artist".to_string())
}

fn best_thumbnail(entry: &SearchEntry) -> Option<String> {
    entry
        .thumbnails
        .iter()
        .rev()
        .find_map(|thumb| thumb.url.clone())
}

fn track_from(entry: &SearchEntry) -> Track {
    Track {
        id: entry.id.clone(),
        title: entry.title.clone().unwrap_or_default(),
        artist: artist_name(entry),
        album: None,
        duration_secs: entry.duration.map(|secs| secs.max(0.0) as u64),
        thumbnail_url: best_thumbnail(entry),
        provider: "ytmusic",
    }
}

fn suggestion_from(entry: &SearchEntry) -> Suggestion {
    Suggestion {
        id: entry.id.clone(),
        title: entry.title.clone().unwrap_or_default(),
        artist: artist_name(entry),
        thumbnail_url: best_thumbnail(entry),
    }
}
