//! AnkiWeb sync key exchange.
//!
//! One authenticated POST to the hostKey endpoint: the login payload
//! `{"u", "p"}` travels zstd-compressed, protocol metadata travels in the
//! out-of-band `anki-sync` header, and the response decompresses to JSON
//! carrying the issued credential under `"key"`.
//!
//! The exchange is stateless and performs no retries — each call owns its
//! own buffers, so concurrent calls need no coordination. Retry policy,
//! if any, belongs to the caller.

use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{SyncConfig, SYNC_PROTOCOL_VERSION};

/// Fixed User-Agent token the sync server expects.
const USER_AGENT: &str = "Anki";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Failure kinds of the sync key exchange. All are terminal for the call;
/// no partial success exists.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The request could not be built or sent: connection failure,
    /// timeout, or a non-success HTTP status. The response body is never
    /// parsed on a bad status.
    #[error("sync server transport failure: {reason}")]
    Transport {
        /// HTTP status code when the server answered with a non-success status.
        status: Option<u16>,
        /// The request hit the configured timeout.
        timed_out: bool,
        reason: String,
    },
    /// Corrupt compressed payload, or a payload expanding past the
    /// configured size cap.
    #[error("could not decompress sync response: {0}")]
    Decompression(String),
    /// The decompressed response body is not valid JSON.
    #[error("sync response is not valid JSON: {0}")]
    MalformedResponse(#[source] serde_json::Error),
    /// Well-formed response without a credential — the server accepted the
    /// request but issued no key. Wrong credentials or an account-level
    /// restriction, not a transport problem.
    #[error("sync server issued no credential (check username/password)")]
    Protocol,
    /// The caller aborted the exchange before it completed.
    #[error("sync key request was cancelled")]
    Cancelled,
}

impl ExchangeError {
    /// HTTP status recorded on a `Transport` failure, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// True when the failure was the request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { timed_out: true, .. })
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        Self::Transport {
            status: e.status().map(|s| s.as_u16()),
            timed_out: e.is_timeout(),
            reason: e.to_string(),
        }
    }
}

// ─── SyncKeyExchange ─────────────────────────────────────────────────────────

/// Performs the hostKey login exchange against AnkiWeb.
pub struct SyncKeyExchange {
    config: SyncConfig,
    client: reqwest::Client,
}

impl SyncKeyExchange {
    pub fn new(config: SyncConfig) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ExchangeError::from_reqwest)?;
        Ok(Self { config, client })
    }

    /// Exchange account credentials for the opaque sync key.
    ///
    /// Exactly one outbound network call; no state is kept between
    /// invocations. Returns the credential string or one of the
    /// [`ExchangeError`] kinds — never both, never neither.
    pub async fn fetch_credential(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, ExchangeError> {
        let payload = json!({ "u": username, "p": password }).to_string();
        let compressed = compress_login(payload.as_bytes())?;
        debug!(
            payload_bytes = payload.len(),
            compressed_bytes = compressed.len(),
            "sending hostKey request"
        );

        let resp = self
            .client
            .post(&self.config.host_key_url)
            .header("anki-sync", self.sync_header())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .body(compressed)
            .send()
            .await
            .map_err(ExchangeError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExchangeError::Transport {
                status: Some(status.as_u16()),
                timed_out: false,
                reason: format!("HTTP {status} from sync server"),
            });
        }

        let body = resp.bytes().await.map_err(ExchangeError::from_reqwest)?;
        debug!(response_bytes = body.len(), "hostKey response received");

        let plain = decompress(&body, self.config.max_decompressed_bytes)?;
        let data: serde_json::Value =
            serde_json::from_slice(&plain).map_err(ExchangeError::MalformedResponse)?;

        // Fields other than "key" (e.g. host redirection hints) are ignored.
        match data.get("key").and_then(|v| v.as_str()) {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => Err(ExchangeError::Protocol),
        }
    }

    /// Like [`fetch_credential`](Self::fetch_credential), but aborts when
    /// `cancel` fires and surfaces [`ExchangeError::Cancelled`] instead of
    /// a transport failure.
    pub async fn fetch_credential_cancellable(
        &self,
        username: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExchangeError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ExchangeError::Cancelled),
            res = self.fetch_credential(username, password) => res,
        }
    }

    /// The `anki-sync` protocol header: version, empty key and session
    /// (signals "no prior session — this is a login"), client identifier.
    fn sync_header(&self) -> String {
        json!({
            "v": SYNC_PROTOCOL_VERSION,
            "k": "",
            "c": self.config.client_id,
            "s": "",
        })
        .to_string()
    }
}

// ─── Compression ─────────────────────────────────────────────────────────────

/// Compress the login payload into a single zstd frame.
///
/// A codec failure here means the request was never sent, so it surfaces
/// as a `Transport` failure — `Decompression` is reserved for response
/// bodies the server actually delivered.
fn compress_login(payload: &[u8]) -> Result<Vec<u8>, ExchangeError> {
    zstd::bulk::compress(payload, 0).map_err(|e| ExchangeError::Transport {
        status: None,
        timed_out: false,
        reason: format!("failed to compress login payload: {e}"),
    })
}

// ─── Decompression ───────────────────────────────────────────────────────────

/// Decompress a zstd response body, capped at `max_bytes`.
///
/// Primary path: single-shot decode sized by the frame's declared content
/// size. Frames without a declared size (streaming framing) fall back to
/// the incremental decoder. Any other failure propagates immediately.
fn decompress(data: &[u8], max_bytes: u64) -> Result<Vec<u8>, ExchangeError> {
    match zstd::zstd_safe::get_frame_content_size(data) {
        Ok(Some(n)) => {
            if n > max_bytes {
                return Err(ExchangeError::Decompression(format!(
                    "declared size {n} exceeds the {max_bytes} byte cap"
                )));
            }
            zstd::bulk::decompress(data, n as usize)
                .map_err(|e| ExchangeError::Decompression(format!("invalid zstd frame: {e}")))
        }
        Ok(None) => decompress_streaming(data, max_bytes),
        Err(_) => Err(ExchangeError::Decompression(
            "response is not a zstd frame".to_string(),
        )),
    }
}

fn decompress_streaming(data: &[u8], max_bytes: u64) -> Result<Vec<u8>, ExchangeError> {
    use std::io::Read;

    let decoder = zstd::stream::read::Decoder::new(data)
        .map_err(|e| ExchangeError::Decompression(format!("invalid zstd stream: {e}")))?;
    let mut out = Vec::new();
    // Read one byte past the cap so an oversized body is detected rather
    // than silently truncated.
    decoder
        .take(max_bytes + 1)
        .read_to_end(&mut out)
        .map_err(|e| ExchangeError::Decompression(format!("invalid zstd stream: {e}")))?;
    if out.len() as u64 > max_bytes {
        return Err(ExchangeError::Decompression(format!(
            "response exceeded the {max_bytes} byte cap"
        )));
    }
    Ok(out)
}
