//! Newline-delimited JSON envelopes.
//!
//! Each request line is a [`ServiceRequest`] as produced by the TLS
//! terminator in front of the worker: the parsed client certificate, the
//! client address, origin, GeoIP record, headers and body. Each response
//! line is `{"status": .., "headers": {..}, "body": ..}`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use iudx_auth::response::RESPONSE_HEADERS;
use iudx_auth::{AuthError, AuthService, Response, ServiceRequest};

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub status: u16,
    pub headers: BTreeMap<&'static str, &'static str>,
    pub body: Value,
}

impl From<Response> for Envelope {
    fn from(resp: Response) -> Self {
        Self {
            status: resp.status,
            headers: resp.headers().iter().copied().collect(),
            body: resp.body,
        }
    }
}

impl Envelope {
    fn timed_out() -> Self {
        Self {
            status: 503,
            headers: RESPONSE_HEADERS.iter().copied().collect(),
            body: json!({ "error": { "message": "Request timed out" } }),
        }
    }
}

/// Handle a single request line.
///
/// The service call runs on the blocking pool. When `timeout` elapses the
/// caller gets a 503; the abandoned call still runs to completion.
pub async fn dispatch_line(service: &Arc<AuthService>, line: &str, timeout: Duration) -> Envelope {
    let request: ServiceRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("unparseable request line: {e}");
            return Response::from_error(&AuthError::invalid("Invalid data (body)")).into();
        }
    };

    let svc = Arc::clone(service);
    let method = request.method.clone();
    let path = request.path.clone();
    let call = tokio::task::spawn_blocking(move || svc.handle(&request));

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(resp)) => {
            tracing::info!(%method, %path, status = resp.status, "handled");
            resp.into()
        }
        Ok(Err(e)) => {
            tracing::error!(%method, %path, "request handler panicked: {e}");
            Response::from_error(&AuthError::StorageError(e.to_string())).into()
        }
        Err(_) => {
            tracing::warn!(%method, %path, ?timeout, "request timed out");
            Envelope::timed_out()
        }
    }
}

/// Serve one connection until the peer closes it.
pub async fn serve_connection<S>(
    service: Arc<AuthService>,
    stream: S,
    timeout: Duration,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope = dispatch_line(&service, trimmed, timeout).await;
        let mut out = serde_json::to_vec(&envelope)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }

    Ok(())
}
