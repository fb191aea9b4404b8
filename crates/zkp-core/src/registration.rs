//! Registration transport.
//!
//! Registration is a single `POST {base}/register` carrying a JSON
//! `RegistrationPayload`. The engine only needs the status code back.

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use crate::errors::ProtocolError;

#[async_trait]
pub trait Registrar: Send + Sync {
    /// POST `body` as `application/json` and return the HTTP status code.
    async fn post_registration(&self, url: &Url, body: Vec<u8>) -> Result<u16, ProtocolError>;
}

#[cfg(feature = "http")]
pub use http::HttpRegistrar;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use reqwest::header::CONTENT_TYPE;

    #[derive(Clone)]
    pub struct HttpRegistrar {
        client: reqwest::Client,
    }

    impl HttpRegistrar {
        pub fn new() -> Result<Self, ProtocolError> {
            let client = reqwest::Client::builder()
                .use_rustls_tls()
                .build()
                .map_err(|e| ProtocolError::Registration(e.to_string()))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl Registrar for HttpRegistrar {
        async fn post_registration(&self, url: &Url, body: Vec<u8>) -> Result<u16, ProtocolError> {
            let resp = self
                .client
                .post(url.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| ProtocolError::Registration(e.to_string()))?;
            Ok(resp.status().as_u16())
        }
    }
}

/// Answers every registration with a fixed status and records the requests.
pub struct StaticRegistrar {
    status: u16,
    requests: Mutex<Vec<(Url, Vec<u8>)>>,
}

impl StaticRegistrar {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(Url, Vec<u8>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Registrar for StaticRegistrar {
    async fn post_registration(&self, url: &Url, body: Vec<u8>) -> Result<u16, ProtocolError> {
        self.requests.lock().push((url.clone(), body));
        Ok(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_registrar_records_requests() {
        let registrar = StaticRegistrar::new(409);
        let url = Url::parse("https://zkp.example/register").unwrap();
        assert_eq!(registrar.post_registration(&url, b"{}".to_vec()).await.unwrap(), 409);
        assert_eq!(registrar.post_registration(&url, b"[]".to_vec()).await.unwrap(), 409);

        let requests = registrar.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], (url.clone(), b"{}".to_vec()));
        assert_eq!(requests[1].1, b"[]");
    }

    #[cfg(feature = "http")]
    mod http {
        use super::*;
        use std::io::{Read, Write};
        use std::net::TcpListener;

        /// Accept one request, answer with `status`, return the raw request.
        fn serve_once(status: &'static str) -> (Url, std::thread::JoinHandle<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let url = Url::parse(&format!("http://{}/register", listener.local_addr().unwrap())).unwrap();
            let server = std::thread::spawn(move || {
                let (mut stream, _) = listener.accept().unwrap();
                let mut raw = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = stream.read(&mut buf).unwrap();
                    raw.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&raw).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let len = text
                            .lines()
                            .find_map(|l| {
                                let l = l.to_ascii_lowercase();
                                l.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if raw.len() >= end + 4 + len {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                let reply = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                stream.write_all(reply.as_bytes()).unwrap();
                String::from_utf8(raw).unwrap()
            });
            (url, server)
        }

        #[tokio::test]
        async fn test_http_registrar_posts_json() {
            let (url, server) = serve_once("200 OK");
            let registrar = HttpRegistrar::new().unwrap();
            let status = registrar
                .post_registration(&url, br#"{"userID":"alice"}"#.to_vec())
                .await
                .unwrap();
            assert_eq!(status, 200);

            let request = server.join().unwrap();
            assert!(request.starts_with("POST /register HTTP/1.1\r\n"));
            assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
            assert!(request.ends_with(r#"{"userID":"alice"}"#));
        }

        #[tokio::test]
        async fn test_http_registrar_returns_conflict_status() {
            let (url, server) = serve_once("409 Conflict");
            let registrar = HttpRegistrar::new().unwrap();
            assert_eq!(registrar.post_registration(&url, Vec::new()).await.unwrap(), 409);
            server.join().unwrap();
        }

        #[tokio::test]
        async fn test_http_registrar_unreachable_is_registration_error() {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let url = Url::parse(&format!("http://{}/register", listener.local_addr().unwrap())).unwrap();
            drop(listener);

            let registrar = HttpRegistrar::new().unwrap();
            assert!(matches!(
                registrar.post_registration(&url, Vec::new()).await,
                Err(ProtocolError::Registration(_))
            ));
        }
    }
}
