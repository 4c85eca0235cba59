//! End-to-end tests using a real WebSocket client and HTTP client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use duplex_container::ContainerBuilder;
use duplex_server::events::{
    ConnectionReactor, HandlerUnit, MessageReactor, RequestObserver, RequestSummary,
};
use duplex_server::http::{HandlerError, HttpResponse, Router, handler_fn};
use duplex_server::{ConnectionId, Connections, Frame, RouteRegistrar, Server};
use duplex_settings::{Settings, load};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Shared record of reactor calls, in delivery order.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn for_connection(&self, id: u64) -> Vec<String> {
        let id = id.to_string();
        self.entries()
            .into_iter()
            .filter(|e| e.split(':').nth(1) == Some(id.as_str()))
            .collect()
    }
}

struct Greeter(Journal);

#[async_trait]
impl ConnectionReactor for Greeter {
    async fn handle(&self, conns: &Connections, id: ConnectionId) -> anyhow::Result<()> {
        self.0.push(format!("open:{id}"));
        conns.push(id, Frame::text(format!("welcome {id}")))?;
        Ok(())
    }
}

struct Farewell(Journal);

#[async_trait]
impl ConnectionReactor for Farewell {
    async fn handle(&self, _conns: &Connections, id: ConnectionId) -> anyhow::Result<()> {
        self.0.push(format!("close:{id}"));
        Ok(())
    }
}

struct Chat(Journal);

#[async_trait]
impl MessageReactor for Chat {
    async fn handle(
        &self,
        conns: &Connections,
        id: ConnectionId,
        frame: Frame,
    ) -> anyhow::Result<()> {
        let text = frame.as_text().unwrap_or_default().to_string();
        self.0.push(format!("message:{id}:{text}"));
        match text.as_str() {
            "ping" => conns.push(id, Frame::text("pong"))?,
            "boom" => anyhow::bail!("chat reactor failed for {id}"),
            "panic" => panic!("chat reactor panicked"),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                conns.push(id, Frame::text("slow done"))?;
            }
            "bye" => {
                let _ = conns.close(id);
            }
            other => conns.push(id, Frame::text(format!("echo {other}")))?,
        }
        Ok(())
    }
}

struct Observer(Journal);

#[async_trait]
impl RequestObserver for Observer {
    async fn observe(&self, summary: &RequestSummary) -> anyhow::Result<()> {
        self.0.push(format!(
            "request:{} {} {}",
            summary.method,
            summary.target,
            summary.status.as_u16()
        ));
        Ok(())
    }
}

struct Harness {
    server: Server,
    addr: SocketAddr,
    serving: JoinHandle<()>,
    journal: Journal,
}

impl Harness {
    fn ws_url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{path}", self.addr.port())
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.addr.port())
    }

    async fn connect(&self) -> WsStream {
        let (ws, _) = timeout(TIMEOUT, connect_async(self.ws_url("/")))
            .await
            .unwrap()
            .unwrap();
        ws
    }

    async fn stop(self) -> Journal {
        assert!(self.server.drain(self.serving).await);
        self.journal
    }
}

fn routes() -> RouteRegistrar {
    Box::new(|router: &mut Router| {
        let _ = router
            .get(
                "/health",
                handler_fn(|_req| async { Ok(HttpResponse::text(StatusCode::OK, "ok")) }),
            )
            .get(
                "/fail",
                handler_fn(|_req| async {
                    Err(HandlerError::Internal(
                        anyhow::anyhow!("connection refused").context("loading profile"),
                    ))
                }),
            );
    })
}

async fn boot(raw: Value) -> Harness {
    let settings: Arc<Settings> = Arc::new(load(raw).unwrap());
    let journal = Journal::default();
    let (j1, j2, j3, j4) = (journal.clone(), journal.clone(), journal.clone(), journal.clone());
    let container = ContainerBuilder::from_settings(Arc::clone(&settings))
        .named::<HandlerUnit, _>("greeter", move |_| {
            Ok(HandlerUnit::connection(Greeter(j1.clone())))
        })
        .named::<HandlerUnit, _>("chat", move |_| Ok(HandlerUnit::message(Chat(j2.clone()))))
        .named::<HandlerUnit, _>("farewell", move |_| {
            Ok(HandlerUnit::connection(Farewell(j3.clone())))
        })
        .named::<HandlerUnit, _>("observer", move |_| {
            Ok(HandlerUnit::request(Observer(j4.clone())))
        })
        .build()
        .unwrap();
    let bindings = [
        ("open", "greeter"),
        ("message", "chat"),
        ("close", "farewell"),
        ("request", "observer"),
    ]
    .into_iter()
    .map(|(e, h)| (e.to_string(), h.to_string()))
    .collect();
    let server = Server::build(settings, container, routes(), bindings).unwrap();
    let (addr, serving) = server.listen().await.unwrap();
    Harness {
        server,
        addr,
        serving,
        journal,
    }
}

fn local(extra: Value) -> Value {
    duplex_settings::deep_merge(json!({"server": {"host": "127.0.0.1", "port": 0}}), extra)
}

async fn next_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        match msg {
            Message::Text(t) => return t.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send(ws: &mut WsStream, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

/// Wait until `cond` holds on the journal.
async fn eventually(journal: &Journal, cond: impl Fn(&[String]) -> bool) {
    timeout(TIMEOUT, async {
        while !cond(&journal.entries()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn health_and_missing_on_all_interfaces() {
    let h = boot(json!({"server": {"host": "0.0.0.0", "port": 0}})).await;

    let resp = reqwest::get(h.http_url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    let resp = reqwest::get(h.http_url("/missing")).await.unwrap();
    assert_eq!(resp.status(), 404);

    let journal = h.stop().await;
    eventually(&journal, |e| {
        e.iter().any(|x| x == "request:GET /health 200")
            && e.iter().any(|x| x == "request:GET /missing 404")
    })
    .await;
}

#[tokio::test]
async fn ping_gets_pong_only_on_sender() {
    let h = boot(local(json!({}))).await;
    let mut a = h.connect().await;
    let mut b = h.connect().await;
    let greet_a = next_text(&mut a).await;
    let greet_b = next_text(&mut b).await;
    assert!(greet_a.starts_with("welcome "));
    assert!(greet_b.starts_with("welcome "));

    send(&mut a, "ping").await;
    assert_eq!(next_text(&mut a).await, "pong");

    // B sees its own echo next, nothing from A's ping.
    send(&mut b, "hello").await;
    assert_eq!(next_text(&mut b).await, "echo hello");

    a.close(None).await.unwrap();
    b.close(None).await.unwrap();
    let _ = h.stop().await;
}

#[tokio::test]
async fn events_arrive_in_order_per_connection() {
    let h = boot(local(json!({}))).await;
    let mut ws = h.connect().await;
    let greeting = next_text(&mut ws).await;
    let id: u64 = greeting.trim_start_matches("welcome ").parse().unwrap();

    for text in ["slow", "a", "b"] {
        send(&mut ws, text).await;
    }
    assert_eq!(next_text(&mut ws).await, "slow done");
    assert_eq!(next_text(&mut ws).await, "echo a");
    assert_eq!(next_text(&mut ws).await, "echo b");
    ws.close(None).await.unwrap();

    let close = format!("close:{id}");
    eventually(&h.journal, |e| e.contains(&close)).await;
    assert_eq!(
        h.journal.for_connection(id),
        [
            format!("open:{id}"),
            format!("message:{id}:slow"),
            format!("message:{id}:a"),
            format!("message:{id}:b"),
            close,
        ]
    );
    let _ = h.stop().await;
}

#[tokio::test]
async fn reactor_failure_is_contained_to_its_connection() {
    let h = boot(local(json!({}))).await;
    let mut a = h.connect().await;
    let mut b = h.connect().await;
    let _ = next_text(&mut a).await;
    let _ = next_text(&mut b).await;

    send(&mut a, "boom").await;
    send(&mut a, "panic").await;
    send(&mut b, "still here").await;
    assert_eq!(next_text(&mut b).await, "echo still here");

    // A keeps working after both failures.
    send(&mut a, "ping").await;
    assert_eq!(next_text(&mut a).await, "pong");

    let resp = reqwest::get(h.http_url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let _ = h.stop().await;
}

#[tokio::test]
async fn application_close_fires_close_event() {
    let h = boot(local(json!({}))).await;
    let mut ws = h.connect().await;
    let greeting = next_text(&mut ws).await;
    let id = greeting.trim_start_matches("welcome ").to_string();

    send(&mut ws, "bye").await;
    let closed = timeout(TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                return true;
            }
        }
        true
    })
    .await
    .unwrap();
    assert!(closed);
    let close = format!("close:{id}");
    eventually(&h.journal, |e| e.contains(&close)).await;
    let conns = h.server.context().connections().clone();
    eventually(&h.journal, move |_| conns.is_empty()).await;
    let _ = h.stop().await;
}

#[tokio::test]
async fn error_pages_follow_debug_flag() {
    let verbose = boot(local(json!({"app": {"debug": true, "error_content_type": ""}}))).await;
    let client = reqwest::Client::new();
    let resp = client
        .get(verbose.http_url("/fail"))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    assert_eq!(resp.headers()["content-type"], "application/json");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "loading profile");
    assert_eq!(body["error"]["causes"][0], "connection refused");
    let _ = verbose.stop().await;

    let generic = boot(local(json!({"app": {"debug": false}}))).await;
    let resp = client
        .get(generic.http_url("/fail"))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    // HTML is forced by default.
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    let body = resp.text().await.unwrap();
    assert!(body.contains("500 Internal Server Error"));
    assert!(!body.contains("connection refused"));
    let _ = generic.stop().await;
}

#[tokio::test]
async fn excess_upgrades_get_503() {
    let h = boot(local(json!({"server": {"options": {"max_connection": 1}}}))).await;
    let mut first = h.connect().await;
    let _ = next_text(&mut first).await;

    let err = timeout(TIMEOUT, connect_async(h.ws_url("/")))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => {
            assert_eq!(resp.status(), 503);
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }

    // The slot frees up once the first session ends.
    first.close(None).await.unwrap();
    timeout(TIMEOUT, async {
        while h.server.context().available_sessions() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let mut second = h.connect().await;
    assert!(next_text(&mut second).await.starts_with("welcome "));
    let _ = h.stop().await;
}

#[tokio::test]
async fn websocket_path_restricts_upgrades() {
    let h = boot(local(json!({"server": {"options": {"websocket_path": "/chat"}}}))).await;
    let (mut ws, _) = connect_async(h.ws_url("/chat")).await.unwrap();
    assert!(next_text(&mut ws).await.starts_with("welcome "));

    // Elsewhere the upgrade is ignored and routing answers 404.
    let err = connect_async(h.ws_url("/")).await.unwrap_err();
    assert!(matches!(
        err,
        tokio_tungstenite::tungstenite::Error::Http(ref resp) if resp.status() == 404
    ));
    let _ = h.stop().await;
}

#[tokio::test]
async fn idle_sessions_are_closed() {
    let h = boot(local(json!({
        "server": {"options": {"heartbeat_check_interval": 1, "heartbeat_idle_time": 1}}
    })))
    .await;
    let mut ws = h.connect().await;
    let greeting = next_text(&mut ws).await;
    let id = greeting.trim_start_matches("welcome ").to_string();

    // Stop reading so pings go unanswered.
    let close = format!("close:{id}");
    timeout(Duration::from_secs(10), async {
        while !h.journal.entries().contains(&close) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    drop(ws);
    let _ = h.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let h = boot(local(json!({}))).await;
    let mut ws = h.connect().await;
    let greeting = next_text(&mut ws).await;
    let id = greeting.trim_start_matches("welcome ").to_string();

    let journal = h.stop().await;
    assert!(journal.entries().contains(&format!("close:{id}")));
}
