//! reqwest-backed `AuthClient`.
//!
//! Non-2xx answers whose body still parses as an `AuthResponse` are treated as
//! application rejections (`success: false` with the server's message). Anything
//! else is a transport-level `AuthApiError`. Transient failures retry per
//! `RetryPolicy`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{AuthApiError, AuthClient, AuthResponse, Credentials, RefreshRequest, RetryPolicy};
use crate::config::AuthConfig;

#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: reqwest::Client,
    login_url: reqwest::Url,
    refresh_url: reqwest::Url,
    retry: RetryPolicy,
}

impl HttpAuthClient {
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        let retry = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            ..RetryPolicy::default()
        };
        Ok(Self {
            client,
            login_url: join_endpoint(&config.base_url, &config.login_path)?,
            refresh_url: join_endpoint(&config.base_url, &config.refresh_path)?,
            retry,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn login_url(&self) -> &reqwest::Url {
        &self.login_url
    }

    pub fn refresh_url(&self) -> &reqwest::Url {
        &self.refresh_url
    }

    /// POST `body` and decode the answer, retrying transient failures.
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &reqwest::Url,
        body: &B,
    ) -> Result<AuthResponse, AuthApiError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.exchange(url, body).await {
                Err(failure) if attempt < attempts && failure.error.is_retryable() => {
                    let delay = self.retry.delay(attempt, failure.retry_after_secs);
                    log::warn!(
                        "auth {} attempt {}/{} failed: {} (retrying in {:?})",
                        url.path(),
                        attempt,
                        attempts,
                        failure.error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result.map_err(|failure| failure.error),
            }
        }
    }

    /// One request/response round trip.
    async fn exchange<B: Serialize + ?Sized>(
        &self,
        url: &reqwest::Url,
        body: &B,
    ) -> Result<AuthResponse, FailedExchange> {
        let response = self.client.post(url.clone()).json(body).send().await?;
        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| AuthApiError::Json(e).into());
        }
        match serde_json::from_str::<AuthResponse>(&text) {
            Ok(parsed) if !parsed.success => {
                log::debug!("auth endpoint {} rejected request with {}", url.path(), status);
                Ok(parsed)
            }
            _ => Err(FailedExchange {
                error: AuthApiError::ApiError {
                    status: status.as_u16(),
                    message: text,
                },
                retry_after_secs,
            }),
        }
    }
}

/// A failed round trip plus the server's `Retry-After` hint, if any.
struct FailedExchange {
    error: AuthApiError,
    retry_after_secs: Option<u64>,
}

impl From<AuthApiError> for FailedExchange {
    fn from(error: AuthApiError) -> Self {
        Self {
            error,
            retry_after_secs: None,
        }
    }
}

impl From<reqwest::Error> for FailedExchange {
    fn from(error: reqwest::Error) -> Self {
        AuthApiError::Http(error).into()
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, AuthApiError> {
        self.post_json(&self.login_url, credentials).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthApiError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.post_json(&self.refresh_url, &body).await
    }
}

fn join_endpoint(base: &str, path: &str) -> Result<reqwest::Url, AuthApiError> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    reqwest::Url::parse(&joined).map_err(|e| AuthApiError::InvalidEndpoint(format!("{}: {}", joined, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Answer one connection per response, in order, and hand back the raw requests.
    fn serve(responses: Vec<(&'static str, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for (status_line, body) in responses {
                let (mut stream, _) = listener.accept().expect("accept");
                requests.push(read_request(&mut stream));
                let retry_after = if status_line.starts_with('2') {
                    ""
                } else {
                    "Retry-After: 0\r\n"
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    retry_after,
                    body
                );
                stream.write_all(response.as_bytes()).expect("write");
            }
            requests
        });
        (format!("http://127.0.0.1:{}", port), handle)
    }

    fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<Vec<String>>) {
        serve(vec![(status_line, body)])
    }

    fn read_request(stream: &mut std::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).expect("read");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn client_for(base_url: &str) -> HttpAuthClient {
        let config = AuthConfig {
            base_url: base_url.to_string(),
            ..AuthConfig::default()
        };
        HttpAuthClient::from_config(&config)
            .expect("client")
            .with_retry(RetryPolicy::no_retry())
    }

    #[test]
    fn test_join_endpoint_normalizes_slashes() {
        let url = join_endpoint("https://api.example.com/v1/", "/auth/login").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/auth/login");
        assert!(join_endpoint("not a url", "/auth/login").is_err());
    }

    #[tokio::test]
    async fn test_login_success_posts_credentials() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"success":true,"user":{"id":"u1"},"token":"t","refreshToken":"r","permissions":["*"],"roles":["admin"]}"#,
        );
        let client = client_for(&base);

        let resp = client
            .login(&Credentials::new("ada@example.com", "secret"))
            .await
            .expect("login");
        assert!(resp.success);
        assert_eq!(resp.token.as_deref(), Some("t"));
        assert_eq!(resp.roles, vec!["admin".to_string()]);

        let requests = server.join().expect("server");
        assert!(requests[0].starts_with("POST /auth/login"));
        assert!(requests[0].contains(r#""email":"ada@example.com""#));
    }

    #[tokio::test]
    async fn test_rejection_body_on_401_is_application_answer() {
        let (base, server) = serve_once(
            "401 Unauthorized",
            r#"{"success":false,"message":"Invalid credentials"}"#,
        );
        let client = client_for(&base);

        let resp = client
            .login(&Credentials::new("ada@example.com", "wrong"))
            .await
            .expect("application answer");
        assert!(!resp.success);
        assert_eq!(resp.message.as_deref(), Some("Invalid credentials"));
        server.join().expect("server");
    }

    #[tokio::test]
    async fn test_refresh_sends_refresh_token_and_maps_server_error() {
        let (base, server) = serve_once("500 Internal Server Error", "boom");
        let client = client_for(&base);

        let err = client.refresh("r-1").await.expect_err("server error");
        match &err {
            AuthApiError::ApiError { status, message } => {
                assert_eq!(*status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());

        let requests = server.join().expect("server");
        assert!(requests[0].starts_with("POST /auth/refresh"));
        assert!(requests[0].contains(r#""refreshToken":"r-1""#));
    }

    #[tokio::test]
    async fn test_transient_status_is_retried() {
        let (base, server) = serve(vec![
            ("503 Service Unavailable", "busy"),
            ("200 OK", r#"{"success":true,"token":"t-2"}"#),
        ]);
        let client = client_for(&base).with_retry(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        });

        let resp = client.refresh("r-1").await.expect("second attempt");
        assert_eq!(resp.token.as_deref(), Some("t-2"));
        assert_eq!(server.join().expect("server").len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let (base, server) = serve_once("401 Unauthorized", r#"{"success":false,"message":"no"}"#);
        let client = client_for(&base).with_retry(RetryPolicy::default());

        let resp = client.login(&Credentials::new("a@b.c", "pw")).await.expect("answer");
        assert!(!resp.success);
        assert_eq!(server.join().expect("server").len(), 1);
    }
}
