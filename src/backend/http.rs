//! HTTP implementation of [`Backend`] over reqwest.

use crate::backend::Backend;
use crate::backend::protocol::{
    CloseSummary, CreatedSession, GeneratedReply, GoalList, Health, HistoryEntry, HistoryList,
    MessageRole, MoodTrendList, PostMessage, SessionId, SessionTranscript, Statistics,
    parse_response,
};
use crate::error::{Result, WellvoiceError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

pub struct HttpBackend {
    client: Client,
    base: String,
    token: String,
}

impl HttpBackend {
    /// Build a client for `base` (e.g. `http://localhost:8000`) that sends
    /// `token` as bearer auth on every request.
    pub fn new(base: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WellvoiceError::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let raw = format!("{}{path}", self.base);
        let parsed = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        parsed.map_err(|e| WellvoiceError::connection(format!("invalid backend URL {raw}: {e}")))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| WellvoiceError::connection(format!("request failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| WellvoiceError::connection(format!("failed to read response: {e}")))?;
        tracing::trace!(status, %body, "backend response");
        parse_response(status, &body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path, params)?;
        tracing::debug!(%url, "GET");
        self.send(self.client.get(url)).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path, params)?;
        tracing::debug!(%url, "POST");
        self.send(self.client.post(url)).await
    }

    async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path, &[])?;
        tracing::debug!(%url, "POST");
        self.send(self.client.post(url).json(body)).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn create_session(&self) -> Result<SessionId> {
        let created: CreatedSession = self.post("/session/", &[]).await?;
        Ok(created.session_id)
    }

    async fn close_session(&self, session: &SessionId) -> Result<CloseSummary> {
        self.post("/session/close", &[("session_id", session.as_str())])
            .await
    }

    async fn post_message(&self, session: &SessionId, text: &str, role: MessageRole) -> Result<()> {
        let body = PostMessage {
            session_id: session.as_str(),
            text,
            role,
        };
        let _: serde_json::Value = self.post_json("/session/message", &body).await?;
        Ok(())
    }

    async fn generate_reply(&self, session: &SessionId) -> Result<String> {
        let reply: GeneratedReply = self
            .post("/session/generate-question", &[("session_id", session.as_str())])
            .await?;
        reply
            .into_text()
            .ok_or_else(|| WellvoiceError::connection("backend returned an empty reply"))
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let list: HistoryList = self.get("/history/", &[]).await?;
        Ok(list.history)
    }

    async fn session_history(&self, session: &SessionId) -> Result<SessionTranscript> {
        self.get("/history/session", &[("session_id", session.as_str())])
            .await
    }

    async fn statistics(&self) -> Result<Statistics> {
        self.get("/statistics", &[]).await
    }

    async fn mood_trends(&self) -> Result<BTreeMap<String, u64>> {
        let list: MoodTrendList = self.get("/statistics/mood-trends", &[]).await?;
        Ok(list.mood_trends)
    }

    async fn goals(&self) -> Result<Vec<serde_json::Value>> {
        let list: GoalList = self.get("/goals", &[]).await?;
        Ok(list.goals)
    }

    async fn health(&self) -> Result<Health> {
        self.get("/health", &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned response and hand back the raw request.
    async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (base, handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(base, "demo-token", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_create_session_sends_bearer_token() {
        let (base, server) = serve_once("200 OK", r#"{"session_id":"s-42","status":"started"}"#).await;

        let session = backend(&base).create_session().await.unwrap();
        let request = server.await.unwrap();

        assert_eq!(session.as_str(), "s-42");
        assert!(request.starts_with("POST /session/ HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer demo-token"));
    }

    #[tokio::test]
    async fn test_post_message_sends_json_body() {
        let (base, server) = serve_once("200 OK", "null").await;

        backend(&base)
            .post_message(&SessionId::new("s1"), "I slept badly", MessageRole::User)
            .await
            .unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("POST /session/message HTTP/1.1"));
        assert!(request.to_lowercase().contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"session_id":"s1","text":"I slept badly","role":"user"}"#));
    }

    #[tokio::test]
    async fn test_generate_reply_passes_session_query() {
        let (base, server) = serve_once("200 OK", r#"{"question":"What helped today?"}"#).await;

        let reply = backend(&base)
            .generate_reply(&SessionId::new("a b"))
            .await
            .unwrap();
        let request = server.await.unwrap();

        assert_eq!(reply, "What helped today?");
        assert!(request.starts_with("POST /session/generate-question?session_id=a+b HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_server_error_is_connection_error() {
        let (base, server) = serve_once("500 Internal Server Error", r#"{"detail":"boom"}"#).await;

        let err = backend(&base).health().await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, WellvoiceError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = backend(&base).create_session().await.unwrap_err();

        assert!(matches!(err, WellvoiceError::Connection { .. }));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let backend = backend("http://localhost:8000/");
        assert_eq!(backend.base_url(), "http://localhost:8000");
        assert_eq!(
            backend.url("/health", &[]).unwrap().as_str(),
            "http://localhost:8000/health"
        );
    }
}
