//! `Server`: one listener for both WebSocket sessions and stateless requests.
//!
//! Construction and serving are separate phases. [`Server::build`] validates
//! the container, binds events, and registers routes without touching the
//! network. [`Server::listen`] binds, fires `managerStart` then `start`, and
//! only then starts accepting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::header::{ACCEPT, UPGRADE};
use axum::http::request::Parts;
use axum::http::{Request, Response};
use duplex_container::Container;
use duplex_settings::Settings;
use metrics::{counter, histogram};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::bridge;
use crate::context::{AppContext, LifecycleState};
use crate::errors::{Result, ServerError};
use crate::events::registry::report;
use crate::events::{Event, EventKind, EventRegistry, RequestSummary};
use crate::http::negotiate::join_accept;
use crate::http::{ErrorMiddleware, ErrorOptions, HandlerError, Router};
use crate::metrics::{
    HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL, WS_CONNECTIONS_REJECTED_TOTAL,
};
use crate::websocket::session::run_session;

/// Registers the application's routes. Invoked once, during [`Server::build`].
pub type RouteRegistrar = Box<dyn FnOnce(&mut Router) + Send>;

/// `(event name, handler id)` pairs.
pub type EventBindings = Vec<(String, String)>;

/// The dual-protocol server.
#[derive(Debug)]
pub struct Server {
    ctx: Arc<AppContext>,
}

impl Server {
    /// Assemble the server from validated parts.
    ///
    /// Handler ids in `bindings` are resolved from `container` as named
    /// [`HandlerUnit`](crate::events::HandlerUnit)s. An empty binding set is
    /// rejected.
    pub fn build(
        settings: Arc<Settings>,
        container: Arc<Container>,
        routes: RouteRegistrar,
        bindings: EventBindings,
    ) -> Result<Self> {
        container.validate()?;
        let events = EventRegistry::from_bindings(bindings, &container)?;
        Ok(Self::from_registry(settings, container, routes, events))
    }

    /// Like [`build`](Self::build), with events already bound.
    pub fn from_registry(
        settings: Arc<Settings>,
        container: Arc<Container>,
        routes: RouteRegistrar,
        events: EventRegistry,
    ) -> Self {
        let mut router = Router::new();
        routes(&mut router);
        info!(routes = router.len(), events = ?events, "server built");

        let errors = ErrorMiddleware::new(Arc::new(router), ErrorOptions::from_settings(&settings));
        Self {
            ctx: Arc::new(AppContext::new(settings, container, events, errors)),
        }
    }

    /// Shared state.
    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// The axum application serving both protocols.
    pub fn app(&self) -> axum::Router {
        axum::Router::new()
            .fallback(entry)
            .with_state(Arc::clone(&self.ctx))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind, fire the lifecycle events, and start accepting in the background.
    ///
    /// A failing lifecycle reactor aborts startup. Can only be called once.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        if !self
            .ctx
            .advance(LifecycleState::Unstarted, LifecycleState::ManagerStarting)
        {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = self.ctx.settings().bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        for event in [Event::ManagerStart, Event::Start] {
            let kind = event.kind();
            self.ctx
                .events()
                .dispatch(event)
                .await
                .map_err(|source| ServerError::Lifecycle {
                    event: kind,
                    source,
                })?;
        }
        let _ = self
            .ctx
            .advance(LifecycleState::ManagerStarting, LifecycleState::Started);

        crate::metrics::describe();
        info!(
            addr = %local_addr,
            mode = ?self.ctx.settings().server.mode,
            name = %self.ctx.settings().app.name,
            "server listening"
        );

        let app = self.app();
        let stop = self.ctx.shutdown().token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(stop.cancelled_owned())
            .await;
            if let Err(e) = served {
                error!(error = %e, "listener stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop accepting, close every session, and wait for them to finish.
    ///
    /// Each open session fires `close`. Returns `false` if the shutdown
    /// timeout elapsed first.
    pub async fn drain(&self, serving: JoinHandle<()>) -> bool {
        self.ctx.shutdown().shutdown();
        self.ctx.connections().close_all();

        let sessions = self.ctx.sessions().clone();
        let _ = sessions.close();
        let waiting = tokio::spawn(async move { sessions.wait().await });

        let drained = self.ctx.shutdown().drain(vec![serving, waiting]).await;
        self.ctx.task_pool().close();
        info!(drained, "server stopped");
        drained
    }

    /// Listen until ctrl-c or [`ShutdownCoordinator::shutdown`], then drain.
    ///
    /// [`ShutdownCoordinator::shutdown`]: crate::shutdown::ShutdownCoordinator::shutdown
    pub async fn run(&self) -> Result<()> {
        let (addr, serving) = self.listen().await?;
        self.ctx.shutdown().signalled().await;
        info!(%addr, "shutting down");
        let _ = self.drain(serving).await;
        Ok(())
    }
}

/// Single entry point: upgrades go to a session, everything else to the
/// stateless path.
async fn entry(State(ctx): State<Arc<AppContext>>, request: Request<Body>) -> Response<Body> {
    let ws_path = ctx.settings().server.options.websocket_path.as_deref();
    if wants_upgrade(&request, ws_path) {
        upgrade(ctx, request).await
    } else {
        stateless(ctx, request).await
    }
}

fn wants_upgrade(request: &Request<Body>, ws_path: Option<&str>) -> bool {
    let upgrade = request
        .headers()
        .get_all(UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|p| p.trim().eq_ignore_ascii_case("websocket")));
    upgrade && ws_path.is_none_or(|path| request.uri().path() == path)
}

fn peer_of<B>(request: &Request<B>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

async fn upgrade(ctx: Arc<AppContext>, request: Request<Body>) -> Response<Body> {
    let peer = peer_of(&request);
    let (mut parts, _body) = request.into_parts();

    if ctx.shutdown().is_shutting_down() {
        return reject(&ctx, &HandlerError::Unavailable("server is shutting down".into()), &parts);
    }

    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => {
            let err = HandlerError::BadRequest(rejection.body_text());
            return reject(&ctx, &err, &parts);
        }
    };

    let Some(permit) = ctx.try_acquire_session() else {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(
            max_connection = ctx.settings().server.options.max_connection,
            peer = ?peer,
            "connection limit reached"
        );
        let err = HandlerError::Unavailable("connection limit reached".into());
        return reject(&ctx, &err, &parts);
    };

    let limit = ctx.settings().server.options.package_max_length;
    let sessions = ctx.sessions().clone();
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| sessions.track_future(run_session(socket, ctx, permit, peer)))
}

/// Render `err` for a request that never reached the router.
fn reject(ctx: &AppContext, err: &HandlerError, parts: &Parts) -> Response<Body> {
    let accept = join_accept(parts.headers.get_all(ACCEPT));
    let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let response = ctx
        .errors()
        .render_error(err, &parts.method, target, accept.as_deref());
    bridge::to_transport(response)
}

#[instrument(
    skip_all,
    fields(request_id = %Uuid::now_v7(), method = %request.method(), target = %request.uri())
)]
async fn stateless(ctx: Arc<AppContext>, request: Request<Body>) -> Response<Body> {
    let started = Instant::now();
    let method = request.method().clone();
    let target = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().to_string(), |pq| pq.as_str().to_string());
    let accept = join_accept(request.headers().get_all(ACCEPT));
    let peer = peer_of(&request);

    let limit = ctx.settings().server.options.package_max_length;
    let response = match bridge::to_message(request, limit).await {
        Ok(message) => ctx.errors().handle(message).await,
        Err(malformed) => {
            let err = HandlerError::from(malformed);
            ctx.errors()
                .render_error(&err, &method, &target, accept.as_deref())
        }
    };

    let status = response.status();
    let elapsed = started.elapsed();
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(elapsed.as_secs_f64());
    debug!(
        status = status.as_u16(),
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "request handled"
    );

    if ctx.events().is_bound(EventKind::Request) {
        let summary = RequestSummary {
            method,
            target,
            status,
            elapsed,
            peer,
        };
        let observer_ctx = Arc::clone(&ctx);
        let _ = tokio::spawn(async move {
            if let Err(e) = observer_ctx.events().dispatch(Event::Request(&summary)).await {
                report(&e);
            }
        });
    }

    bridge::to_transport(response)
}
