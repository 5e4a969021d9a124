// src/core/clients/docker.rs

//! A minimal HTTP client for the container engine's Unix-domain socket API.
//! Deliberately not a full SDK: it exposes only the operations the daemon
//! actually uses, each a thin wrapper over a hand-rolled HTTP/1.1 request.

use crate::core::DPlaneError;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const API_VERSION: &str = "v1.43";

/// Minimal client over a fixed Unix-domain socket path.
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: String,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl DockerClient {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&[u8]>,
        deadline: Duration,
    ) -> Result<HttpResponse, DPlaneError> {
        let fut = self.request_inner(method, path, body);
        tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| DPlaneError::DependencyUnavailable("container engine timed out".into()))?
    }

    async fn request_inner(
        &self,
        method: &str,
        path: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, DPlaneError> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            DPlaneError::DependencyUnavailable(format!("container engine socket unavailable: {e}"))
        })?;

        let mut request = format!(
            "{method} /{API_VERSION}{path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n"
        );
        if let Some(b) = body {
            request.push_str("Content-Type: application/json\r\n");
            request.push_str(&format!("Content-Length: {}\r\n", b.len()));
        }
        request.push_str("\r\n");

        stream
            .write_all(request.as_bytes())
            .await
            .map_err(DPlaneError::from)?;
        if let Some(b) = body {
            stream.write_all(b).await.map_err(DPlaneError::from)?;
        }

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(DPlaneError::from)?;

        parse_http_response(&raw)
    }

    /// Lists every container, running or stopped.
    pub async fn list_all(&self) -> Result<Vec<Value>, DPlaneError> {
        let resp = self
            .request("GET", "/containers/json?all=true", None, Duration::from_secs(10))
            .await?;
        expect_json_array(resp)
    }

    /// Fetches full inspect details for one container.
    pub async fn inspect(&self, id: &str) -> Result<Value, DPlaneError> {
        let resp = self
            .request(
                "GET",
                &format!("/containers/{id}/json"),
                None,
                Duration::from_secs(10),
            )
            .await?;
        if resp.status == 404 {
            return Err(DPlaneError::NotFound(format!("container {id}")));
        }
        expect_json(resp)
    }

    /// Starts a container. 204 = started, 304 = already running (tolerated).
    pub async fn start(&self, id: &str) -> Result<(), DPlaneError> {
        let resp = self
            .request(
                "POST",
                &format!("/containers/{id}/start"),
                None,
                Duration::from_secs(60),
            )
            .await?;
        match resp.status {
            204 | 304 => Ok(()),
            404 => Err(DPlaneError::NotFound(format!("container {id}"))),
            s => Err(status_error(s, &resp.body)),
        }
    }

    /// Stops a container within `grace_secs`. 304 = already stopped (tolerated).
    pub async fn stop(&self, id: &str, grace_secs: u32) -> Result<(), DPlaneError> {
        let resp = self
            .request(
                "POST",
                &format!("/containers/{id}/stop?t={grace_secs}"),
                None,
                Duration::from_secs(u64::from(grace_secs) + 30),
            )
            .await?;
        match resp.status {
            204 | 304 => Ok(()),
            404 => Err(DPlaneError::NotFound(format!("container {id}"))),
            s => Err(status_error(s, &resp.body)),
        }
    }

    pub async fn restart(&self, id: &str, grace_secs: u32) -> Result<(), DPlaneError> {
        let resp = self
            .request(
                "POST",
                &format!("/containers/{id}/restart?t={grace_secs}"),
                None,
                Duration::from_secs(u64::from(grace_secs) + 30),
            )
            .await?;
        match resp.status {
            204 => Ok(()),
            404 => Err(DPlaneError::NotFound(format!("container {id}"))),
            s => Err(status_error(s, &resp.body)),
        }
    }

    pub async fn pause(&self, id: &str) -> Result<(), DPlaneError> {
        self.simple_post(&format!("/containers/{id}/pause"), Duration::from_secs(10))
            .await
    }

    pub async fn unpause(&self, id: &str) -> Result<(), DPlaneError> {
        self.simple_post(&format!("/containers/{id}/unpause"), Duration::from_secs(10))
            .await
    }

    async fn simple_post(&self, path: &str, deadline: Duration) -> Result<(), DPlaneError> {
        let resp = self.request("POST", path, None, deadline).await?;
        match resp.status {
            204 => Ok(()),
            404 => Err(DPlaneError::NotFound("container".into())),
            s => Err(status_error(s, &resp.body)),
        }
    }

    /// Pulls an image; uses an extended deadline since layers may be large.
    pub async fn pull(&self, image: &str) -> Result<(), DPlaneError> {
        let resp = self
            .request(
                "POST",
                &format!("/images/create?fromImage={image}"),
                None,
                Duration::from_secs(600),
            )
            .await?;
        if resp.status == 200 {
            Ok(())
        } else {
            Err(status_error(resp.status, &resp.body))
        }
    }

    /// Removes a container. 404 is tolerated as idempotent.
    pub async fn remove(&self, id: &str, force: bool) -> Result<(), DPlaneError> {
        let path = if force {
            format!("/containers/{id}?force=true")
        } else {
            format!("/containers/{id}")
        };
        let resp = self.request("DELETE", &path, None, Duration::from_secs(30)).await?;
        match resp.status {
            204 | 404 => Ok(()),
            s => Err(status_error(s, &resp.body)),
        }
    }

    /// Fetches container logs, stripping the 8-byte multiplex header when
    /// the container was not started with a TTY.
    pub async fn logs(&self, id: &str, tail: u32) -> Result<String, DPlaneError> {
        let resp = self
            .request(
                "GET",
                &format!("/containers/{id}/logs?stdout=true&stderr=true&tail={tail}"),
                None,
                Duration::from_secs(10),
            )
            .await?;
        if resp.status == 404 {
            return Err(DPlaneError::NotFound(format!("container {id}")));
        }
        Ok(demultiplex_logs(&resp.body))
    }

    /// Engine-wide info (version, driver, storage driver, etc).
    pub async fn system_info(&self) -> Result<Value, DPlaneError> {
        let resp = self
            .request("GET", "/info", None, Duration::from_secs(10))
            .await?;
        expect_json(resp)
    }

    pub async fn ping(&self) -> Result<bool, DPlaneError> {
        match self
            .request("GET", "/_ping", None, Duration::from_secs(5))
            .await
        {
            Ok(resp) => Ok(resp.status == 200),
            Err(_) => Ok(false),
        }
    }

    /// Polls inspect until the container is healthy (per its HEALTHCHECK) or,
    /// absent a healthcheck, simply running.
    pub async fn wait_until_healthy(
        &self,
        id: &str,
        deadline: Duration,
    ) -> Result<(), DPlaneError> {
        let start = tokio::time::Instant::now();
        loop {
            let inspect = self.inspect(id).await?;
            let state = inspect.get("State").cloned().unwrap_or(Value::Null);
            let running = state
                .get("Running")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let health_status = state
                .get("Health")
                .and_then(|h| h.get("Status"))
                .and_then(Value::as_str)
                .map(str::to_string);

            match health_status.as_deref() {
                Some("healthy") => return Ok(()),
                Some("unhealthy") => {
                    return Err(DPlaneError::DependencyUnavailable(format!(
                        "container {id} reports unhealthy"
                    )));
                }
                None if running => return Ok(()),
                _ => {}
            }

            if start.elapsed() >= deadline {
                return Err(DPlaneError::DeadlineExceeded {
                    program: "docker-healthcheck".into(),
                    args: vec![id.to_string()],
                });
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

fn status_error(status: u16, body: &[u8]) -> DPlaneError {
    let msg = serde_json::from_slice::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    DPlaneError::DependencyUnavailable(format!("container engine returned {status}: {msg}"))
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn expect_json(resp: HttpResponse) -> Result<Value, DPlaneError> {
    if resp.status >= 400 {
        return Err(status_error(resp.status, &resp.body));
    }
    serde_json::from_slice(&resp.body)
        .map_err(|e| DPlaneError::DependencyUnavailable(format!("malformed engine response: {e}")))
}

fn expect_json_array(resp: HttpResponse) -> Result<Vec<Value>, DPlaneError> {
    match expect_json(resp)? {
        Value::Array(items) => Ok(items),
        _ => Err(DPlaneError::DependencyUnavailable(
            "expected a JSON array from container engine".into(),
        )),
    }
}

/// Parses a minimal raw HTTP/1.1 response (status line, headers, body),
/// honoring `Content-Length` when present.
fn parse_http_response(raw: &[u8]) -> Result<HttpResponse, DPlaneError> {
    let header_end = find_subslice(raw, b"\r\n\r\n")
        .ok_or_else(|| DPlaneError::DependencyUnavailable("malformed HTTP response".into()))?;
    let head = std::str::from_utf8(&raw[..header_end])
        .map_err(|_| DPlaneError::DependencyUnavailable("non-UTF8 HTTP response head".into()))?;
    let mut lines = head.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| DPlaneError::DependencyUnavailable("empty HTTP response".into()))?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DPlaneError::DependencyUnavailable("malformed status line".into()))?;

    let body = raw[header_end + 4..].to_vec();
    Ok(HttpResponse { status, body })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Strips the 8-byte Docker log multiplex header (`[stream][000][size]`)
/// from each frame when present; falls back to raw bytes for TTY streams.
fn demultiplex_logs(raw: &[u8]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i + 8 <= raw.len() {
        let stream_type = raw[i];
        if stream_type > 2 {
            // Not a multiplexed stream (TTY mode): treat the rest as raw text.
            out.push_str(&String::from_utf8_lossy(&raw[i..]));
            return out;
        }
        let size = u32::from_be_bytes([raw[i + 4], raw[i + 5], raw[i + 6], raw[i + 7]]) as usize;
        let start = i + 8;
        let end = (start + size).min(raw.len());
        out.push_str(&String::from_utf8_lossy(&raw[start..end]));
        i = end;
    }
    if i < raw.len() {
        out.push_str(&String::from_utf8_lossy(&raw[i..]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_http_response_with_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"a\":1}";
        let resp = parse_http_response(raw).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"{\"a\":1}");
    }

    #[test]
    fn demultiplexes_stdout_and_stderr_frames() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 5]);
        raw.extend_from_slice(b"hello");
        raw.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 3]);
        raw.extend_from_slice(b"err");
        assert_eq!(demultiplex_logs(&raw), "helloerr");
    }

    #[test]
    fn tty_stream_passes_through_raw() {
        let raw = b"plain tty output with no framing".to_vec();
        assert_eq!(demultiplex_logs(&raw), "plain tty output with no framing");
    }
}
