#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Multipart, Path, Query},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use md5::{Digest, Md5};
use openworkers_runtime_xhr::{
    EventType, Listener, ProgressEvent, Runtime, TransportConfig, XmlHttpRequest, run_event_loop,
};
use serde_json::{Map, Value, json};
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Helper owning a runtime and its event loop
pub struct TestRunner {
    pub runtime: Runtime,
    event_loop_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::with_transport(TransportConfig::direct())
    }

    pub fn with_transport(transport: TransportConfig) -> Self {
        let (runtime, scheduler_rx, callback_tx) = Runtime::new(transport);

        // Spawn event loop
        let event_loop_handle = tokio::spawn(async move {
            run_event_loop(scheduler_rx, callback_tx).await;
        });

        Self {
            runtime,
            event_loop_handle: Some(event_loop_handle),
        }
    }

    pub fn xhr(&self) -> XmlHttpRequest {
        self.runtime.xml_http_request()
    }

    /// Apply updates until nothing is in flight
    pub async fn settle(&mut self) {
        tokio::time::timeout(Duration::from_secs(10), self.runtime.run_until_idle())
            .await
            .expect("requests did not settle within 10s");
    }

    /// Process callbacks for a duration
    pub async fn process_for(&mut self, duration: Duration) {
        let iterations = (duration.as_millis() / 10) as usize;
        for _ in 0..iterations {
            self.runtime.process_callbacks();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Final drain
        self.runtime.process_callbacks();
    }

    /// Shutdown the runtime
    pub async fn shutdown(mut self) {
        drop(self.runtime);
        if let Some(handle) = self.event_loop_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
    }
}

/// Ordered record of fired events, tagged by target
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Rc<RefCell<Vec<(String, ProgressEvent)>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self, target: &'static str) -> Listener {
        let entries = self.entries.clone();
        Rc::new(move |event: &ProgressEvent| {
            entries.borrow_mut().push((target.to_string(), event.clone()));
        })
    }

    /// Attach to every handler slot of `xhr` and its upload object
    pub fn attach(&self, xhr: &XmlHttpRequest) {
        xhr.set_onreadystatechange(Some(self.listener("xhr")));
        xhr.set_onload(Some(self.listener("xhr")));
        xhr.set_onprogress(Some(self.listener("xhr")));
        xhr.set_onabort(Some(self.listener("xhr")));
        xhr.set_onerror(Some(self.listener("xhr")));
        xhr.set_ontimeout(Some(self.listener("xhr")));

        let upload = xhr.upload();
        upload.set_onload(Some(self.listener("upload")));
        upload.set_onprogress(Some(self.listener("upload")));
        upload.set_onabort(Some(self.listener("upload")));
        upload.set_onerror(Some(self.listener("upload")));
        upload.set_ontimeout(Some(self.listener("upload")));
    }

    /// `target:type` names in firing order
    pub fn names(&self) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .map(|(target, event)| format!("{}:{}", target, event.event_type))
            .collect()
    }

    pub fn count(&self, target: &str, event_type: EventType) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|(t, e)| t == target && e.event_type == event_type)
            .count()
    }

    pub fn find(&self, target: &str, event_type: EventType) -> Option<ProgressEvent> {
        self.entries
            .borrow()
            .iter()
            .find(|(t, e)| t == target && e.event_type == event_type)
            .map(|(_, e)| e.clone())
    }
}

/// Ready states observed by `onreadystatechange`
pub fn track_ready_states(xhr: &XmlHttpRequest) -> Rc<RefCell<Vec<u8>>> {
    let states = Rc::new(RefCell::new(Vec::new()));
    let sink = states.clone();
    let handle = xhr.clone();

    xhr.add_event_listener(
        EventType::ReadyStateChange,
        Rc::new(move |_: &ProgressEvent| {
            sink.borrow_mut().push(handle.ready_state().as_u8());
        }),
    );

    states
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

// ============================================================================
// Test HTTP server
// ============================================================================

pub struct TestServer {
    pub addr: SocketAddr,
}

impl TestServer {
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/get", get(|| async { "hello" }))
            .route("/echo", post(echo))
            .route("/inspect", post(inspect))
            .route("/formData", post(form_data))
            .route("/timeout", get(delayed))
            .route("/headers", get(custom_headers))
            .route("/status/{code}", get(status));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn echo(body: Bytes) -> Bytes {
    body
}

/// What arrived: byte count, declared length and type, digest
async fn inspect(headers: HeaderMap, body: Bytes) -> Json<Value> {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    Json(json!({
        "length": body.len(),
        "contentLength": header_str(header::CONTENT_LENGTH),
        "contentType": header_str(header::CONTENT_TYPE),
        "token": header_str(header::HeaderName::from_static("x-token")),
        "md5": md5_hex(&body),
    }))
}

/// Text fields as strings, file fields as `{filename, md5}`
async fn form_data(mut multipart: Multipart) -> Result<Json<Value>, StatusCode> {
    let mut result = Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;

        let value = match filename {
            Some(filename) => json!({ "filename": filename, "md5": md5_hex(&data) }),
            None => Value::String(String::from_utf8_lossy(&data).into_owned()),
        };
        result.insert(name, value);
    }

    Ok(Json(Value::Object(result)))
}

async fn delayed(Query(params): Query<HashMap<String, String>>) -> &'static str {
    let duration = params
        .get("duration")
        .and_then(|d| d.parse().ok())
        .unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(duration)).await;
    "done"
}

async fn custom_headers() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert("x-custom", "test-value".parse().unwrap());
    headers.append("x-multi", "a".parse().unwrap());
    headers.append("x-multi", "b".parse().unwrap());
    (headers, "with headers")
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/// A local port with nothing listening on it
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/get", addr)
}

// ============================================================================
// Minimal SOCKS5 proxy (CONNECT only)
// ============================================================================

pub struct Socks5Proxy {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
}

impl Socks5Proxy {
    pub async fn start(credentials: Option<(&'static str, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_socks5(stream, credentials, counter).await {
                        eprintln!("socks5: {}", e);
                    }
                });
            }
        });

        Self { addr, connections }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_socks5(
    mut client: TcpStream,
    credentials: Option<(&'static str, &'static str)>,
    counter: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let invalid = |msg: &str| std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string());

    // Greeting
    let mut head = [0u8; 2];
    client.read_exact(&mut head).await?;
    if head[0] != 5 {
        return Err(invalid("not socks5"));
    }
    let mut methods = vec![0u8; head[1] as usize];
    client.read_exact(&mut methods).await?;

    let wanted = if credentials.is_some() { 0x02 } else { 0x00 };
    if !methods.contains(&wanted) {
        client.write_all(&[5, 0xff]).await?;
        return Err(invalid("no acceptable auth method"));
    }
    client.write_all(&[5, wanted]).await?;

    // Username/password sub-negotiation
    if let Some((user, pass)) = credentials {
        let mut ver_ulen = [0u8; 2];
        client.read_exact(&mut ver_ulen).await?;
        let mut uname = vec![0u8; ver_ulen[1] as usize];
        client.read_exact(&mut uname).await?;
        let plen = client.read_u8().await?;
        let mut passwd = vec![0u8; plen as usize];
        client.read_exact(&mut passwd).await?;

        if uname != user.as_bytes() || passwd != pass.as_bytes() {
            client.write_all(&[1, 1]).await?;
            return Err(invalid("bad credentials"));
        }
        client.write_all(&[1, 0]).await?;
    }

    // CONNECT request
    let mut request = [0u8; 4];
    client.read_exact(&mut request).await?;
    if request[1] != 1 {
        return Err(invalid("only CONNECT is supported"));
    }

    let host = match request[3] {
        1 => {
            let mut ip = [0u8; 4];
            client.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        3 => {
            let len = client.read_u8().await?;
            let mut name = vec![0u8; len as usize];
            client.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        4 => {
            let mut ip = [0u8; 16];
            client.read_exact(&mut ip).await?;
            format!("[{}]", std::net::Ipv6Addr::from(ip))
        }
        _ => return Err(invalid("unknown address type")),
    };
    let port = client.read_u16().await?;

    let mut upstream = TcpStream::connect(format!("{}:{}", host, port)).await?;
    counter.fetch_add(1, Ordering::SeqCst);
    client.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await?;

    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}
