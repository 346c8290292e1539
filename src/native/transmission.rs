use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;

/// Header Transmission uses for its CSRF session token.
pub const SESSION_HEADER: &str = "X-Transmission-Session-Id";

/// `status` code of a torrent that is actively downloading.
pub const STATUS_DOWNLOADING: i64 = 4;

/// Fields requested for the busy check.
pub const BUSY_FIELDS: &[&str] = &["status"];

/// Fields requested for the status report.
pub const STATUS_FIELDS: &[&str] = &[
    "id",
    "name",
    "status",
    "percentDone",
    "rateDownload",
    "rateUpload",
];

const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TransmissionError {
    #[error("Transmission request timed out: {0}")]
    Timeout(String),

    #[error("Transmission transport error: {0}")]
    Transport(String),

    #[error("Transmission returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transmission did not hand out a session id")]
    MissingSession,

    #[error("Transmission RPC failed: {0}")]
    Rpc(String),

    #[error("malformed Transmission response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for TransmissionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransmissionError::Timeout(e.to_string())
        } else if e.is_decode() {
            TransmissionError::Malformed(e.to_string())
        } else {
            TransmissionError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Torrent {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    pub status: i64,
    #[serde(default)]
    pub percent_done: Option<f64>,
    #[serde(default)]
    pub rate_download: Option<i64>,
    #[serde(default)]
    pub rate_upload: Option<i64>,
}

impl Torrent {
    pub fn is_downloading(&self) -> bool {
        self.status == STATUS_DOWNLOADING
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Option<TorrentArguments>,
}

#[derive(Debug, Deserialize)]
struct TorrentArguments {
    torrents: Vec<Torrent>,
}

/// Minimal Transmission RPC client.
///
/// Transmission rejects any call without a valid session id with HTTP 409 and
/// hands the id out in the response header. The client caches the id and
/// redoes the handshake whenever the server rotates it.
pub struct TransmissionClient {
    url: reqwest::Url,
    http: reqwest::Client,
    session: Mutex<Option<HeaderValue>>,
}

impl TransmissionClient {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| anyhow::anyhow!("Invalid Transmission RPC URL {}: {}", url, e))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            url,
            http,
            session: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    fn cached_session(&self) -> Option<HeaderValue> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn store_session(&self, id: HeaderValue) {
        if let Ok(mut session) = self.session.lock() {
            *session = Some(id);
        }
    }

    /// Runs `torrent-get` for the given fields.
    pub async fn torrent_get(&self, fields: &[&str]) -> Result<Vec<Torrent>, TransmissionError> {
        let payload = serde_json::json!({
            "method": "torrent-get",
            "arguments": { "fields": fields },
        });

        // One probe to pick up a fresh session id, one real call.
        for _ in 0..2 {
            let mut request = self.http.post(self.url.clone()).json(&payload);
            if let Some(id) = self.cached_session() {
                request = request.header(SESSION_HEADER, id);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::CONFLICT {
                let id = response
                    .headers()
                    .get(SESSION_HEADER)
                    .cloned()
                    .ok_or(TransmissionError::MissingSession)?;
                tracing::debug!("Transmission session id refreshed");
                self.store_session(id);
                continue;
            }

            if !status.is_success() {
                let mut body = response.text().await.unwrap_or_default();
                clip(&mut body, MAX_ERROR_BODY);
                return Err(TransmissionError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let bytes = response.bytes().await?;
            let parsed: RpcResponse = serde_json::from_slice(&bytes)
                .map_err(|e| TransmissionError::Malformed(e.to_string()))?;
            if parsed.result != "success" {
                return Err(TransmissionError::Rpc(parsed.result));
            }
            return parsed
                .arguments
                .map(|a| a.torrents)
                .ok_or_else(|| TransmissionError::Malformed("missing arguments.torrents".into()));
        }

        Err(TransmissionError::MissingSession)
    }
}

/// Shortens `body` to at most `max` bytes without splitting a character.
fn clip(body: &mut String, max: usize) {
    if body.len() <= max {
        return;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
}
