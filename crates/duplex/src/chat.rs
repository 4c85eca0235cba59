//! Demo chat reactors: greet on open, echo messages, log departures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use duplex_container::{ContainerBuilder, Injectable, Resolver};
use duplex_server::events::{ConnectionReactor, HandlerUnit, MessageReactor};
use duplex_server::{ConnectionId, Connections, EventBindings, Frame};
use duplex_settings::Settings;
use tracing::info;

/// Handler id of the `open` reactor.
pub const GREETER: &str = "chat.greeter";
/// Handler id of the `message` reactor.
pub const ECHO: &str = "chat.echo";
/// Handler id of the `close` reactor.
pub const FAREWELL: &str = "chat.farewell";

/// Room-wide state shared by the reactors.
#[derive(Debug)]
pub struct ChatRoom {
    name: String,
    joined: AtomicU64,
}

impl ChatRoom {
    /// Room named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            joined: AtomicU64::new(0),
        }
    }

    /// Connections greeted so far.
    pub fn joined(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }
}

impl Injectable for ChatRoom {
    fn inject(resolver: &Resolver<'_>) -> duplex_container::Result<Self> {
        let settings = resolver.get::<Settings>()?;
        Ok(Self::new(settings.app.name.clone()))
    }
}

/// Nickname attached to each connection on open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nick(pub String);

/// `open`: name the guest and greet them.
pub struct Greeter {
    room: Arc<ChatRoom>,
}

#[async_trait]
impl ConnectionReactor for Greeter {
    async fn handle(&self, conns: &Connections, id: ConnectionId) -> anyhow::Result<()> {
        let nick = format!("guest-{id}");
        let _ = conns.attach(id, Nick(nick.clone()));
        let _ = self.room.joined.fetch_add(1, Ordering::Relaxed);
        conns.push(id, Frame::text(format!("welcome to {}, {nick}", self.room.name)))?;
        Ok(())
    }
}

/// `message`: answer `ping` with `pong`, echo anything else to the sender.
pub struct Echo;

#[async_trait]
impl MessageReactor for Echo {
    async fn handle(
        &self,
        conns: &Connections,
        id: ConnectionId,
        frame: Frame,
    ) -> anyhow::Result<()> {
        let reply = match frame.as_text() {
            Some("ping") => Frame::text("pong"),
            _ => frame,
        };
        conns.push(id, reply)?;
        Ok(())
    }
}

/// `close`: log who left and for how long they stayed.
pub struct Farewell;

#[async_trait]
impl ConnectionReactor for Farewell {
    async fn handle(&self, conns: &Connections, id: ConnectionId) -> anyhow::Result<()> {
        let Some(conn) = conns.get(id) else {
            return Ok(());
        };
        let nick = conn.attachment::<Nick>().map(|Nick(n)| n).unwrap_or_default();
        let stayed = (Utc::now() - conn.opened_at()).num_seconds();
        info!(conn_id = %id, nick = %nick, stayed_secs = stayed, "guest left");
        Ok(())
    }
}

/// Register the room and its three reactors.
pub fn register(builder: ContainerBuilder) -> ContainerBuilder {
    builder
        .autowire::<ChatRoom>()
        .named::<HandlerUnit, _>(GREETER, |r| {
            Ok(HandlerUnit::connection(Greeter {
                room: r.get::<ChatRoom>()?,
            }))
        })
        .named::<HandlerUnit, _>(ECHO, |_| Ok(HandlerUnit::message(Echo)))
        .named::<HandlerUnit, _>(FAREWELL, |_| Ok(HandlerUnit::connection(Farewell)))
}

/// Event bindings for the reactors registered by [`register`].
pub fn bindings() -> EventBindings {
    [("open", GREETER), ("message", ECHO), ("close", FAREWELL)]
        .into_iter()
        .map(|(event, handler)| (event.to_string(), handler.to_string()))
        .collect()
}
