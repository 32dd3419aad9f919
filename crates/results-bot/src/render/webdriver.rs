/// Minimal W3C WebDriver client: just the commands needed to fill the portal form and
/// capture the result (session, navigation, element lookup, keys, clicks, screenshots).
///
/// Works against chromedriver or a Selenium grid. Every command is a single JSON
/// exchange; non-2xx replies carry `{"value": {"error", "message"}}` and become
/// `RenderError::WebDriver`.
use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use portal_common::http::HttpClient;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::RenderError;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Deserialize)]
struct NewSessionValue {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(String);

#[derive(Clone)]
pub struct WebDriverClient {
    http: Arc<HttpClient>,
    endpoint: String,
}

impl WebDriverClient {
    pub fn new(http: Arc<HttpClient>, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Start a headless Chrome session.
    pub async fn new_session(&self) -> Result<WebDriverSession, RenderError> {
        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--no-sandbox",
                            "--disable-dev-shm-usage",
                            "--window-size=1280,1600"
                        ]
                    }
                }
            }
        });
        let url = format!("{}/session", self.endpoint);
        let value = self.exchange(Method::POST, &url, Some(&body)).await?;
        let session: NewSessionValue = serde_json::from_value(value)
            .map_err(|e| RenderError::Payload(format!("new session reply: {e}")))?;
        debug!(session = %session.session_id, "webdriver session started");
        Ok(WebDriverSession {
            client: self.clone(),
            id: session.session_id,
            closed: false,
        })
    }

    async fn exchange(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, RenderError> {
        let reply = self
            .http
            .send_json(method, url, body, None)
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RenderError::Unavailable(format!("webdriver at {}", self.endpoint))
                } else {
                    RenderError::Http(e)
                }
            })?;
        let mut body = reply.body;
        let value = body.get_mut("value").map(Value::take).unwrap_or(Value::Null);
        if reply.status.is_success() {
            return Ok(value);
        }
        match serde_json::from_value::<WireError>(value) {
            Ok(wire) => Err(RenderError::WebDriver {
                error: wire.error,
                message: wire.message,
            }),
            Err(_) => Err(RenderError::Status(reply.status.as_u16())),
        }
    }

    fn session_url(&self, id: &str) -> String {
        format!("{}/session/{id}", self.endpoint)
    }
}

/// A live browser session.
///
/// Call `close` when done. A session dropped without it (for instance when the
/// surrounding render is cancelled by its deadline) deletes itself in the background.
pub struct WebDriverSession {
    client: WebDriverClient,
    id: String,
    closed: bool,
}

impl WebDriverSession {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RenderError> {
        let url = format!("{}{path}", self.client.session_url(&self.id));
        self.client.exchange(method, &url, body.as_ref()).await
    }

    pub async fn goto(&self, url: &str) -> Result<(), RenderError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    pub async fn find_all(&self, css: &str) -> Result<Vec<ElementId>, RenderError> {
        let value = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": css })),
            )
            .await?;
        let refs: Vec<HashMap<String, String>> = serde_json::from_value(value)
            .map_err(|e| RenderError::Payload(format!("element list: {e}")))?;
        Ok(refs
            .into_iter()
            .filter_map(|mut r| r.remove(ELEMENT_KEY))
            .map(ElementId)
            .collect())
    }

    pub async fn attribute(
        &self,
        element: &ElementId,
        name: &str,
    ) -> Result<Option<String>, RenderError> {
        let path = format!("/element/{}/attribute/{name}", element.0);
        let value = self.command(Method::GET, &path, None).await?;
        Ok(value.as_str().map(str::to_string))
    }

    pub async fn text(&self, element: &ElementId) -> Result<String, RenderError> {
        let path = format!("/element/{}/text", element.0);
        let value = self.command(Method::GET, &path, None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn send_keys(&self, element: &ElementId, text: &str) -> Result<(), RenderError> {
        let path = format!("/element/{}/value", element.0);
        self.command(Method::POST, &path, Some(json!({ "text": text })))
            .await
            .map(|_| ())
    }

    pub async fn click(&self, element: &ElementId) -> Result<(), RenderError> {
        let path = format!("/element/{}/click", element.0);
        self.command(Method::POST, &path, Some(json!({}))).await.map(|_| ())
    }

    pub async fn element_screenshot(&self, element: &ElementId) -> Result<Vec<u8>, RenderError> {
        let path = format!("/element/{}/screenshot", element.0);
        let value = self.command(Method::GET, &path, None).await?;
        decode_png(&value)
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>, RenderError> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        decode_png(&value)
    }

    pub async fn close(mut self) {
        self.closed = true;
        if let Err(e) = self.command(Method::DELETE, "", None).await {
            warn!(error = %e, session = %self.id, "failed to close webdriver session");
        }
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session = %self.id, "no runtime to close abandoned webdriver session");
            return;
        };
        let client = self.client.clone();
        let id = std::mem::take(&mut self.id);
        debug!(session = %id, "closing abandoned webdriver session");
        runtime.spawn(async move {
            let url = client.session_url(&id);
            if let Err(e) = client.exchange(Method::DELETE, &url, None).await {
                warn!(error = %e, session = %id, "failed to close abandoned webdriver session");
            }
        });
    }
}

fn decode_png(value: &Value) -> Result<Vec<u8>, RenderError> {
    let encoded = value
        .as_str()
        .ok_or_else(|| RenderError::Payload("screenshot is not a string".to_string()))?;
    let png = STANDARD
        .decode(encoded)
        .map_err(|e| RenderError::Payload(format!("screenshot base64: {e}")))?;
    if png.is_empty() {
        return Err(RenderError::Payload("empty screenshot".to_string()));
    }
    Ok(png)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use portal_common::http::HttpClientConfig;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    /// What the fake driver does with one command.
    pub(crate) enum Reply {
        Value(Value),
        Error(u16, Value),
        Hang,
    }

    /// Routes `(method, path, body)` to a reply.
    pub(crate) type Route = fn(&str, &str, &Value) -> Reply;

    /// In-process WebDriver endpoint serving canned W3C replies, one request per
    /// connection. Every request is logged as `"METHOD /path"`.
    pub(crate) struct FakeDriver {
        pub endpoint: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeDriver {
        pub(crate) async fn start(route: Route) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let endpoint = format!("http://{}", listener.local_addr().unwrap());
            let log = Arc::new(Mutex::new(Vec::new()));
            let requests = Arc::clone(&log);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, route, Arc::clone(&requests)));
                }
            });
            Self { endpoint, log }
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        pub(crate) fn client(&self) -> WebDriverClient {
            WebDriverClient::new(http(), &self.endpoint)
        }
    }

    async fn serve(stream: TcpStream, route: Route, log: Arc<Mutex<Vec<String>>>) {
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.is_err() {
            return;
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();

        let mut content_length = 0;
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).await.unwrap_or(0) == 0 || header.trim().is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut raw = vec![0; content_length];
        if reader.read_exact(&mut raw).await.is_err() {
            return;
        }
        let body = serde_json::from_slice(&raw).unwrap_or(Value::Null);

        log.lock().unwrap().push(format!("{method} {path}"));
        let (status, value) = match route(&method, &path, &body) {
            Reply::Value(value) => (200, value),
            Reply::Error(status, value) => (status, value),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }
        };
        let payload = json!({ "value": value }).to_string();
        let response = format!(
            "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{payload}",
            payload.len()
        );
        let _ = reader.get_mut().write_all(response.as_bytes()).await;
    }

    pub(crate) fn http() -> Arc<HttpClient> {
        Arc::new(HttpClient::new(HttpClientConfig::from_env()).unwrap())
    }

    pub(crate) fn elements(ids: &[&str]) -> Reply {
        Reply::Value(Value::Array(
            ids.iter().map(|id| json!({ ELEMENT_KEY: id })).collect(),
        ))
    }

    #[test]
    fn decodes_base64_screenshot() {
        let value = Value::String(STANDARD.encode([0x89, b'P', b'N', b'G']));
        assert_eq!(decode_png(&value).unwrap(), vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn rejects_non_string_or_empty_screenshot() {
        assert!(matches!(decode_png(&Value::Null), Err(RenderError::Payload(_))));
        assert!(matches!(
            decode_png(&Value::String(String::new())),
            Err(RenderError::Payload(_))
        ));
        assert!(matches!(
            decode_png(&Value::String("not base64!".to_string())),
            Err(RenderError::Payload(_))
        ));
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let client = WebDriverClient::new(http(), "http://localhost:9515/");
        assert_eq!(client.endpoint, "http://localhost:9515");
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = WebDriverClient::new(http(), &endpoint);
        assert!(matches!(
            client.new_session().await,
            Err(RenderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn wire_errors_are_decoded() {
        let driver = FakeDriver::start(|_, _, _| {
            Reply::Error(
                500,
                json!({ "error": "session not created", "message": "chrome not found" }),
            )
        })
        .await;

        let Err(RenderError::WebDriver { error, message }) = driver.client().new_session().await
        else {
            panic!("expected a webdriver error");
        };
        assert_eq!(error, "session not created");
        assert_eq!(message, "chrome not found");
    }

    #[tokio::test]
    async fn error_without_wire_payload_keeps_status() {
        let driver = FakeDriver::start(|_, _, _| Reply::Error(502, Value::Null)).await;
        assert!(matches!(
            driver.client().new_session().await,
            Err(RenderError::Status(502))
        ));
    }

    #[tokio::test]
    async fn dropped_session_deletes_itself() {
        let driver = FakeDriver::start(|method, path, body| match (method, path) {
            ("POST", "/session") => Reply::Value(json!({ "sessionId": "s1" })),
            ("POST", "/session/s1/elements") if body["value"] == "table" => elements(&["t1"]),
            _ => Reply::Value(Value::Null),
        })
        .await;
        let client = driver.client();

        let session = client.new_session().await.unwrap();
        assert_eq!(session.find_all("table").await.unwrap(), [ElementId("t1".to_string())]);
        drop(session);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(driver.requests().last().map(String::as_str), Some("DELETE /session/s1"));
    }
}
