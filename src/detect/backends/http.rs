use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use url::Url;

use crate::detect::backend::DetectorBackend;
use crate::detect::wire::DetectorResponse;
use crate::error::DetectorFailure;

const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Detector reached over HTTP: `POST {"image": "data:image/jpeg;base64,..."}`.
pub struct HttpBackend {
    agent: ureq::Agent,
    url: String,
}

impl HttpBackend {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parse detector url {}", url))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported detector scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            url: parsed.to_string(),
        })
    }
}

impl DetectorBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&self, jpeg: &[u8]) -> Result<DetectorResponse, DetectorFailure> {
        let payload = serde_json::json!({
            "image": format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(jpeg)),
        });
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&payload.to_string())
            .map_err(map_request_error)?;

        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut body)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    DetectorFailure::Timeout
                }
                _ => DetectorFailure::Transport(e.to_string()),
            })?;
        DetectorResponse::parse(&body)
    }
}

fn map_request_error(err: ureq::Error) -> DetectorFailure {
    match err {
        ureq::Error::Status(code, _) => DetectorFailure::Status(code),
        ureq::Error::Transport(transport) => {
            let timed_out = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<std::io::Error>())
                .is_some_and(|io| {
                    matches!(
                        io.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                    )
                });
            if timed_out {
                DetectorFailure::Timeout
            } else {
                DetectorFailure::Transport(transport.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                drain_request(&mut stream);
                let reply = format!(
                    "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes());
            }
        });
        format!("http://{}/detect", addr)
    }

    // Read headers plus Content-Length bytes so closing the socket does not reset it.
    fn drain_request(stream: &mut std::net::TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let Ok(read) = stream.read(&mut chunk) else {
                return;
            };
            if read == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..read]);
            let Some(header_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= header_end + 4 + content_length {
                return;
            }
        }
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(HttpBackend::new("ftp://detector", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn parses_successful_response() {
        let url = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"status":"ok","direction":"KANAN","faces":[]}"#,
        );
        let backend = HttpBackend::new(&url, Duration::from_secs(2)).unwrap();
        let response = backend.detect(b"\xFF\xD8jpeg\xFF\xD9").unwrap();
        assert!(matches!(response, DetectorResponse::SingleDirection(_)));
    }

    #[test]
    fn server_error_maps_to_status() {
        let url = serve_once(
            "HTTP/1.1 500 Internal Server Error",
            r#"{"success":false}"#,
        );
        let backend = HttpBackend::new(&url, Duration::from_secs(2)).unwrap();
        assert_eq!(
            backend.detect(b"frame").unwrap_err(),
            DetectorFailure::Status(500)
        );
    }
}
