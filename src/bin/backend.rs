#![forbid(unsafe_code)]

//! Axum backend that fronts one upstream music catalogue.
//!
//! A browser searches for a song title and either streams or downloads the
//! MP3. Every route is a thin wrapper over the configured provider: one
//! outbound call (or a short ordered sequence of them), optionally a relayed
//! byte stream, and a response. The static search page is served from
//! `WWW_ROOT` for everything that is not an API route.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use mime_guess::MimeGuess;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tunebridge::config::{RuntimeOverrides, resolve_runtime_config};
use tunebridge::providers::{
    self, AudioPipe, Playback, Provider, ProviderError, ProviderKind, Suggestion, Track,
    fetch_audio,
};
use tunebridge::security::{ensure_not_root, sanitize_filename};

#[derive(Debug, Clone)]
struct BackendArgs {
    host: Option<IpAddr>,
    port: Option<u16>,
    www_root: Option<PathBuf>,
    provider: Option<ProviderKind>,
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut host = None;
        let mut port = None;
        let mut www_root = None;
        let mut provider = None;
        let mut env_file = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--host=") {
                host = Some(parse_host_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--www-root=") {
                www_root = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--provider=") {
                provider = Some(parse_provider_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env-file=") {
                env_file = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--host" => {
                    let value = args.next().ok_or_else(|| anyhow!("--host requires a value"))?;
                    host = Some(parse_host_arg(&value)?);
                }
                "--port" => {
                    let value = args.next().ok_or_else(|| anyhow!("--port requires a value"))?;
                    port = Some(parse_port_arg(&value)?);
                }
                "--www-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--www-root requires a value"))?;
                    www_root = Some(PathBuf::from(value));
                }
                "--provider" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--provider requires a value"))?;
                    provider = Some(parse_provider_arg(&value)?);
                }
                "--env-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env-file requires a value"))?;
                    env_file = Some(PathBuf::from(value));
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        Ok(Self {
            host,
            port,
            www_root,
            provider,
            env_file,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUNEBRIDGE_HOST")
}

fn parse_provider_arg(value: &str) -> Result<ProviderKind> {
    ProviderKind::parse(value).ok_or_else(|| anyhow!("unknown provider: {value}"))
}

/// Shared state injected into every Axum handler.
///
/// * `provider` is the one upstream client selected at startup.
/// * `cache` keeps suggest/popular responses warm for the configured TTL.
/// * `http` relays redirect-style download links server side.
#[derive(Clone)]
struct AppState {
    provider: Arc<dyn Provider>,
    cache: Arc<ApiCache>,
    http: reqwest::Client,
    www_root: Arc<PathBuf>,
}

struct TimedEntry<T> {
    stored_at: Instant,
    value: T,
}

/// Small TTL cache for the two endpoints browsers hammer: autocomplete
/// while typing, and the popular chart on page load. Everything else goes
/// straight upstream.
struct ApiCache {
    ttl: Duration,
    suggestions: RwLock<HashMap<String, TimedEntry<Vec<Suggestion>>>>,
    popular: RwLock<Option<TimedEntry<Vec<Track>>>>,
}

impl ApiCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            suggestions: RwLock::new(HashMap::new()),
            popular: RwLock::new(None),
        }
    }

    fn fresh(&self, stored_at: Instant) -> bool {
        !self.ttl.is_zero() && stored_at.elapsed() < self.ttl
    }

    fn suggestions_for(&self, query: &str) -> Option<Vec<Suggestion>> {
        let map = self.suggestions.read();
        let entry = map.get(query)?;
        if self.fresh(entry.stored_at) {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn store_suggestions(&self, query: &str, value: &[Suggestion]) {
        if self.ttl.is_zero() {
            return;
        }
        self.suggestions.write().insert(
            query.to_string(),
            TimedEntry {
                stored_at: Instant::now(),
                value: value.to_vec(),
            },
        );
    }

    fn popular(&self) -> Option<Vec<Track>> {
        let slot = self.popular.read();
        let entry = slot.as_ref()?;
        if self.fresh(entry.stored_at) {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn store_popular(&self, value: &[Track]) {
        if self.ttl.is_zero() {
            return;
        }
        self.popular.write().replace(TimedEntry {
            stored_at: Instant::now(),
            value: value.to_vec(),
        });
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Creates a 400 error with the provided message.
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Creates a 404 error with the provided message.
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    /// Creates a 502 error with the provided message.
    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match &err {
            ProviderError::NoResults => Self::not_found("no matching track found"),
            ProviderError::Unsupported(what) => {
                Self::not_found(format!("{what} is not available on this provider"))
            }
            ProviderError::Http(_)
            | ProviderError::UpstreamStatus { .. }
            | ProviderError::Decode(_)
            | ProviderError::MirrorsExhausted { .. }
            | ProviderError::Subprocess(_) => Self::bad_gateway(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tunebridge=info,backend=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = BackendArgs::parse()?;
    ensure_not_root("backend")?;

    let config = resolve_runtime_config(RuntimeOverrides {
        host: args.host.map(|host| host.to_string()),
        port: args.port,
        www_root: args.www_root,
        provider: args.provider,
        env_path: args.env_file,
    })?;
    let host = parse_host_arg(&config.host)?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("tunebridge/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("building HTTP client")?;

    let provider = providers::from_config(&config, client.clone())?;
    info!(provider = provider.name(), "upstream provider selected");

    let state = AppState {
        provider,
        cache: Arc::new(ApiCache::new(config.cache_ttl)),
        http: client,
        www_root: Arc::new(config.www_root.clone()),
    };

    // Each route is extremely small; the provider trait does the real work.
    let app = Router::new()
        .route("/suggest", get(suggest))
        .route("/search", get(search))
        .route("/play", get(play))
        .route("/download", get(download))
        .route("/track", get(track_by_id))
        .route("/popular", get(popular))
        .fallback(static_fallback)
        .with_state(state);

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    // We do not propagate this error up because it only affects graceful
    // shutdown; the process still terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to install Ctrl+C handler: {}", err);
    }
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Deserialize)]
struct TrackParams {
    id: Option<String>,
}

/// Query parameters arrive optional so a missing value becomes our own 400
/// instead of a framework rejection.
fn require<'a>(value: &'a Option<String>, name: &str) -> ApiResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed),
        _ => Err(ApiError::bad_request(format!(
            "missing query parameter \"{name}\""
        ))),
    }
}

async fn suggest(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<Suggestion>>> {
    let query = require(&params.q, "q")?;
    if let Some(cached) = state.cache.suggestions_for(query) {
        return Ok(Json(cached));
    }

    let suggestions = state.provider.suggest(query).await?;
    state.cache.store_suggestions(query, &suggestions);
    Ok(Json(suggestions))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<Track>>> {
    let query = require(&params.q, "q")?;
    let tracks = state.provider.search(query).await?;
    Ok(Json(tracks))
}

async fn play(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Response> {
    let query = require(&params.q, "q")?;
    let resolved = state.provider.resolve(query).await?;
    info!(
        title = %resolved.track.title,
        provider = resolved.track.provider,
        "playing"
    );

    match resolved.playback {
        Playback::Redirect(url) => Ok(Redirect::temporary(&url).into_response()),
        Playback::Pipe(pipe) => Ok(pipe_response(pipe, None)),
    }
}

async fn download(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Response> {
    let query = require(&params.q, "q")?;
    let resolved = state.provider.resolve(query).await?;
    let filename = format!("{}.mp3", sanitize_filename(&resolved.track.title));
    info!(
        title = %resolved.track.title,
        provider = resolved.track.provider,
        "downloading"
    );

    // A redirect cannot carry a filename, so downloads are always relayed.
    let pipe = match (resolved.download_url, resolved.playback) {
        (Some(url), _) => fetch_audio(&state.http, &url).await?,
        (None, Playback::Pipe(pipe)) => pipe,
        (None, Playback::Redirect(url)) => fetch_audio(&state.http, &url).await?,
    };

    Ok(pipe_response(pipe, Some(filename)))
}

async fn track_by_id(
    State(state): State<AppState>,
    Query(params): Query<TrackParams>,
) -> ApiResult<Json<Track>> {
    let id = require(&params.id, "id")?;
    let track = state.provider.track(id).await?;
    Ok(Json(track))
}

async fn popular(State(state): State<AppState>) -> ApiResult<Json<Vec<Track>>> {
    if let Some(cached) = state.cache.popular() {
        return Ok(Json(cached));
    }

    let tracks = state.provider.popular().await?;
    state.cache.store_popular(&tracks);
    Ok(Json(tracks))
}

/// Turns a resolved audio pipe into a streaming response. Pipes cannot seek,
/// so ranges are explicitly not offered.
fn pipe_response(pipe: AudioPipe, attachment: Option<String>) -> Response {
    let mut response = Body::from_stream(pipe.stream).into_response();
    let headers = response.headers_mut();

    if let Ok(value) = pipe.content_type.parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(length) = pipe.content_length {
        headers.insert(header::CONTENT_LENGTH, length.to_string().parse().unwrap());
    }
    headers.insert(header::ACCEPT_RANGES, "none".parse().unwrap());
    if let Some(filename) = attachment
        && let Ok(value) = format!("attachment; filename=\"{filename}\"").parse()
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    response
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    let metadata = tokio::fs::metadata(&target).await;

    match metadata {
        Ok(meta) if meta.is_dir() => send_file(root.join("index.html")).await,
        Ok(_) => send_file(target).await,
        Err(_) => {
            if should_fallback_to_index(request_path) {
                send_file(root.join("index.html")).await
            } else {
                Err(ApiError::not_found("file not found"))
            }
        }
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return true;
    }
    Path::new(trimmed).extension().is_none()
}

async fn send_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::extract::{Query as AxumQuery, State as AxumState};
    use bytes::Bytes;
    use futures_util::StreamExt;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tunebridge::providers::Resolved;

    #[derive(Clone, Copy)]
    enum StubMode {
        Redirect,
        Pipe,
        NoResults,
    }

    struct StubProvider {
        mode: StubMode,
        title: String,
        download_url: Option<String>,
        suggest_calls: AtomicUsize,
        popular_calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(mode: StubMode) -> Self {
            Self {
                mode,
                title: "Test Song".to_string(),
                download_url: None,
                suggest_calls: AtomicUsize::new(0),
                popular_calls: AtomicUsize::new(0),
            }
        }

        fn sample_track(&self) -> Track {
            Track {
                id: "stub-1".into(),
                title: self.title.clone(),
                artist: "Stub Artist".into(),
                album: None,
                duration_secs: Some(180),
                thumbnail_url: None,
                provider: "stub",
            }
        }

        fn sample_pipe() -> AudioPipe {
            let chunks = vec![Ok(Bytes::from_static(b"stub-audio-bytes"))];
            AudioPipe {
                content_type: "audio/mpeg".into(),
                content_length: Some(16),
                stream: futures_util::stream::iter(chunks).boxed(),
            }
        }
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn suggest(&self, _query: &str) -> Result<Vec<Suggestion>, ProviderError> {
            self.suggest_calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                StubMode::NoResults => Err(ProviderError::NoResults),
                _ => Ok(vec![Suggestion {
                    id: "stub-1".into(),
                    title: self.title.clone(),
                    artist: "Stub Artist".into(),
                    thumbnail_url: None,
                }]),
            }
        }

        async fn search(&self, _query: &str) -> Result<Vec<Track>, ProviderError> {
            match self.mode {
                StubMode::NoResults => Err(ProviderError::NoResults),
                _ => Ok(vec![self.sample_track()]),
            }
        }

        async fn resolve(&self, _query: &str) -> Result<Resolved, ProviderError> {
            match self.mode {
                StubMode::NoResults => Err(ProviderError::NoResults),
                StubMode::Redirect => Ok(Resolved {
                    track: self.sample_track(),
                    playback: Playback::Redirect("https://cdn.test/320.mp3".into()),
                    download_url: self
                        .download_url
                        .clone()
                        .or_else(|| Some("https://cdn.test/320.mp3".into())),
                }),
                StubMode::Pipe => Ok(Resolved {
                    track: self.sample_track(),
                    playback: Playback::Pipe(Self::sample_pipe()),
                    download_url: self.download_url.clone(),
                }),
            }
        }

        async fn popular(&self) -> Result<Vec<Track>, ProviderError> {
            self.popular_calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                StubMode::NoResults => Err(ProviderError::Unsupported("the popular chart")),
                _ => Ok(vec![self.sample_track()]),
            }
        }
    }

    struct TestContext {
        _www: TempDir,
        state: AppState,
        provider: Arc<StubProvider>,
    }

    fn context_with(stub: StubProvider, ttl: Duration) -> TestContext {
        let www = TempDir::new().unwrap();
        std::fs::write(www.path().join("index.html"), "<html>search</html>").unwrap();
        let provider = Arc::new(stub);
        let state = AppState {
            provider: provider.clone(),
            cache: Arc::new(ApiCache::new(ttl)),
            http: reqwest::Client::new(),
            www_root: Arc::new(www.path().to_path_buf()),
        };
        TestContext {
            _www: www,
            state,
            provider,
        }
    }

    fn query(q: Option<&str>) -> AxumQuery<SearchParams> {
        AxumQuery(SearchParams {
            q: q.map(str::to_string),
        })
    }

    #[test]
    fn backend_args_parse_all_flags() {
        let args = BackendArgs::from_iter(
            [
                "--host=0.0.0.0",
                "--port",
                "9000",
                "--www-root=/srv/www",
                "--provider",
                "piped",
                "--env-file=/etc/tunebridge.env",
            ]
            .into_iter()
            .map(str::to_string),
        )
        .unwrap();
        assert_eq!(args.host, Some("0.0.0.0".parse().unwrap()));
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.www_root, Some(PathBuf::from("/srv/www")));
        assert_eq!(args.provider, Some(ProviderKind::Piped));
        assert_eq!(args.env_file, Some(PathBuf::from("/etc/tunebridge.env")));
    }

    #[test]
    fn backend_args_reject_unknown_flag() {
        let err =
            BackendArgs::from_iter(["--frobnicate".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown argument"));
    }

    #[tokio::test]
    async fn suggest_requires_query() {
        let ctx = context_with(StubProvider::new(StubMode::Redirect), Duration::ZERO);

        let err = suggest(AxumState(ctx.state.clone()), query(None))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = suggest(AxumState(ctx.state.clone()), query(Some("   ")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn suggest_serves_cache_within_ttl() {
        let ctx = context_with(
            StubProvider::new(StubMode::Redirect),
            Duration::from_secs(300),
        );

        let Json(first) = suggest(AxumState(ctx.state.clone()), query(Some("tum hi ho")))
            .await
            .unwrap();
        let Json(second) = suggest(AxumState(ctx.state.clone()), query(Some("tum hi ho")))
            .await
            .unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(ctx.provider.suggest_calls.load(Ordering::SeqCst), 1);

        // A different query is its own cache key.
        suggest(AxumState(ctx.state.clone()), query(Some("other")))
            .await
            .unwrap();
        assert_eq!(ctx.provider.suggest_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn suggest_skips_cache_when_ttl_zero() {
        let ctx = context_with(StubProvider::new(StubMode::Redirect), Duration::ZERO);

        suggest(AxumState(ctx.state.clone()), query(Some("a")))
            .await
            .unwrap();
        suggest(AxumState(ctx.state.clone()), query(Some("a")))
            .await
            .unwrap();
        assert_eq!(ctx.provider.suggest_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn play_redirects_direct_links() {
        let ctx = context_with(StubProvider::new(StubMode::Redirect), Duration::ZERO);

        let response = play(AxumState(ctx.state.clone()), query(Some("song")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://cdn.test/320.mp3"
        );
    }

    #[tokio::test]
    async fn play_streams_piped_audio() {
        let ctx = context_with(StubProvider::new(StubMode::Pipe), Duration::ZERO);

        let response = play(AxumState(ctx.state.clone()), query(Some("song")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "audio/mpeg"
        );
        assert_eq!(
            response.headers().get(header::ACCEPT_RANGES).unwrap(),
            "none"
        );
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"stub-audio-bytes");
    }

    #[tokio::test]
    async fn play_maps_no_results_to_404() {
        let ctx = context_with(StubProvider::new(StubMode::NoResults), Duration::ZERO);

        let err = play(AxumState(ctx.state.clone()), query(Some("ghost")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_attaches_sanitized_filename() {
        let mut stub = StubProvider::new(StubMode::Pipe);
        stub.title = "AC/DC: Back \"in\" Black".to_string();
        let ctx = context_with(stub, Duration::ZERO);

        let response = download(AxumState(ctx.state.clone()), query(Some("back in black")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"AC DC Back in Black.mp3\""
        );
    }

    #[tokio::test]
    async fn download_relays_direct_links_server_side() {
        let server = httpmock::MockServer::start();
        let file_mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/file.mp3");
            then.status(200)
                .header("Content-Type", "audio/mpeg")
                .body(b"relayed-bytes");
        });

        let mut stub = StubProvider::new(StubMode::Redirect);
        stub.download_url = Some(server.url("/file.mp3"));
        let ctx = context_with(stub, Duration::ZERO);

        let response = download(AxumState(ctx.state.clone()), query(Some("song")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get(header::CONTENT_DISPOSITION)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("attachment")
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"relayed-bytes");
        file_mock.assert();
    }

    #[tokio::test]
    async fn track_requires_id() {
        let ctx = context_with(StubProvider::new(StubMode::Redirect), Duration::ZERO);

        let err = track_by_id(
            AxumState(ctx.state.clone()),
            AxumQuery(TrackParams { id: None }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn track_unsupported_maps_to_404() {
        // StubProvider does not override track(), so the trait default
        // answers Unsupported.
        let ctx = context_with(StubProvider::new(StubMode::Redirect), Duration::ZERO);

        let err = track_by_id(
            AxumState(ctx.state.clone()),
            AxumQuery(TrackParams {
                id: Some("168".into()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(err.message.contains("not available"));
    }

    #[tokio::test]
    async fn popular_serves_cache_within_ttl() {
        let ctx = context_with(
            StubProvider::new(StubMode::Redirect),
            Duration::from_secs(300),
        );

        popular(AxumState(ctx.state.clone())).await.unwrap();
        popular(AxumState(ctx.state.clone())).await.unwrap();
        assert_eq!(ctx.provider.popular_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn static_root_serves_index() {
        let ctx = context_with(StubProvider::new(StubMode::Redirect), Duration::ZERO);

        let response = serve_www_path(&ctx.state.www_root, "/").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"<html>search</html>");
    }

    #[tokio::test]
    async fn static_extensionless_path_falls_back_to_index() {
        let ctx = context_with(StubProvider::new(StubMode::Redirect), Duration::ZERO);

        let response = serve_www_path(&ctx.state.www_root, "/some/spa/route")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn static_missing_asset_is_404() {
        let ctx = context_with(StubProvider::new(StubMode::Redirect), Duration::ZERO);

        let err = serve_www_path(&ctx.state.www_root, "/missing.css")
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_rejects_path_traversal() {
        let ctx = context_with(StubProvider::new(StubMode::Redirect), Duration::ZERO);

        let err = serve_www_path(&ctx.state.www_root, "/../etc/passwd")
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_error_serializes_json() {
        let response = ApiError::not_found("missing").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "missing");
    }
}
