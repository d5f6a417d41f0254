//! Readiness probes.
//!
//! Concrete checks behind the readiness gate: a TCP connect probe for
//! dependent services and an end-to-end HTTP probe that proves the proxy
//! serves the ACME challenge path before the CA is asked to fetch from it.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};
use warden_acme::ChallengePublisher;

/// A readiness check consulted through the gate.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// One bounded check. Never blocks longer than its own internal
    /// timeout; the gate handles repetition.
    async fn is_ready(&self) -> bool;
}

/// TCP reachability probe for a dependent service.
pub struct TcpProbe {
    address: String,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn is_ready(&self) -> bool {
        match tokio::time::timeout(
            self.connect_timeout,
            tokio::net::TcpStream::connect(&self.address),
        )
        .await
        {
            Ok(Ok(_)) => {
                trace!(address = %self.address, "TCP probe connected");
                true
            }
            Ok(Err(e)) => {
                debug!(address = %self.address, error = %e, "TCP probe failed");
                false
            }
            Err(_) => {
                debug!(address = %self.address, "TCP probe timed out");
                false
            }
        }
    }
}

/// End-to-end challenge-path probe.
///
/// Plants a sentinel token in the validation webroot, fetches its
/// challenge path through the proxy, and compares the body. Passing
/// proves the whole chain the CA will use: proxy up, challenge location
/// mapped to the webroot, file readable.
pub struct HttpChallengeProbe {
    publisher: ChallengePublisher,
    /// Base URL the proxy answers on, e.g. "http://proxy"
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpChallengeProbe {
    pub fn new(publisher: ChallengePublisher, base_url: impl Into<String>) -> Self {
        Self {
            publisher,
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl ReadinessProbe for HttpChallengeProbe {
    async fn is_ready(&self) -> bool {
        let probe = match self.publisher.stage_probe() {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "Could not stage probe token in webroot");
                return false;
            }
        };

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), probe.path());
        let result = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await;

        let ready = match result {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => body == probe.body,
                Err(e) => {
                    debug!(url = %url, error = %e, "Probe body read failed");
                    false
                }
            },
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "Probe got non-success status");
                false
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Probe request failed");
                false
            }
        };

        self.publisher.withdraw(&probe.token);
        trace!(url = %url, ready, "Challenge-path probe finished");
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(probe.is_ready().await);
    }

    #[tokio::test]
    async fn test_tcp_probe_fails_on_closed_port() {
        // Bind then drop to find a port that is very likely closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = TcpProbe::new(addr.to_string(), Duration::from_millis(500));
        assert!(!probe.is_ready().await);
    }

    /// Minimal one-request HTTP server that serves files from a webroot,
    /// standing in for the proxy's challenge location.
    async fn serve_one_request(listener: TcpListener, webroot: PathBuf) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let request = String::from_utf8_lossy(&buf[..n]).into_owned();

        let path = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/")
            .to_string();

        let file = webroot.join(path.trim_start_matches('/'));
        let response = match std::fs::read_to_string(&file) {
            Ok(body) => format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            ),
            Err(_) => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
        };
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
    }

    #[tokio::test]
    async fn test_http_probe_round_trip() {
        let webroot = TempDir::new().unwrap();
        let publisher = ChallengePublisher::new(webroot.path()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_one_request(listener, webroot.path().to_path_buf()));

        let probe = HttpChallengeProbe::new(publisher.clone(), format!("http://{addr}"));
        assert!(probe.is_ready().await);

        // Sentinel token withdrawn after the check
        assert_eq!(publisher.pending_count(), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_probe_fails_when_proxy_unreachable() {
        let webroot = TempDir::new().unwrap();
        let publisher = ChallengePublisher::new(webroot.path()).unwrap();

        // Nothing listens here
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpChallengeProbe::new(publisher.clone(), format!("http://{addr}"))
            .with_request_timeout(Duration::from_millis(500));
        assert!(!probe.is_ready().await);
        assert_eq!(publisher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_http_probe_fails_on_wrong_body() {
        let webroot = TempDir::new().unwrap();
        let publisher = ChallengePublisher::new(webroot.path()).unwrap();

        // A server that answers 200 with the wrong body
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await.unwrap();
            let body = "not-the-proof";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        let probe = HttpChallengeProbe::new(publisher, format!("http://{addr}"));
        assert!(!probe.is_ready().await);
        server.await.unwrap();
    }
}
