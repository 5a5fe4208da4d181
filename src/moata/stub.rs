//! Canned-response HTTP server for exercising the API layer in tests.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

use crate::config::Credentials;

use super::{auth::MoataAuth, client::MoataClient, http::MoataHttp};

pub const TOKEN_BODY: &str = r#"{"access_token":"tok"}"#;

pub struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl StubResponse {
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn render(&self) -> String {
        let mut out = format!(
            "HTTP/1.1 {} Stub\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            self.body.len()
        );
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

pub fn json_response(status: u16, body: &str) -> StubResponse {
    StubResponse {
        status,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: body.to_string(),
    }
}

/// Serves the given responses in order, one per connection, and records each raw request.
pub struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start(responses: Vec<StubResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        tokio::spawn(async move {
            let mut responses = responses.into_iter();
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut stream).await;
                recorded.lock().await.push(request);

                let response = responses
                    .next()
                    .unwrap_or_else(|| json_response(599, r#"{"error":"unexpected request"}"#));
                let _ = stream.write_all(response.render().as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        StubServer { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    /// A client whose token endpoint is `/token` on this server, with no pacing.
    pub fn client(&self) -> MoataClient {
        let credentials = Credentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        };
        let auth = MoataAuth::new(&self.url("token"), "scope", credentials).unwrap();
        let http = MoataHttp::new(&self.base_url(), Arc::new(auth), 1000.0)
            .unwrap()
            .with_backoff_base(Duration::from_millis(1));
        MoataClient::new(http)
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buffer);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buffer.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }

    String::from_utf8_lossy(&buffer).into_owned()
}
