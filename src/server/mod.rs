pub mod assets;
pub mod hub;
pub mod keepalive;
pub mod registry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::protocol::{Frame, Message};
use hub::Hub;
use registry::Connection;

// ─── Server ─────────────────────────────────────────────────────────────────

pub struct Server {
    config: Config,
    hub: Arc<Hub>,
    web_dir: PathBuf,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Server {
    /// Build a server, resolving the web directory against the working directory.
    pub fn new(config: Config) -> Arc<Self> {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let web_dir = assets::resolve_web_dir(&base, &config.web_dir);
        Self::with_web_dir(config, web_dir)
    }

    pub fn with_web_dir(config: Config, web_dir: impl Into<PathBuf>) -> Arc<Self> {
        let hub = Arc::new(Hub::new(config.send_buffer));
        Arc::new(Self {
            config,
            hub,
            web_dir: web_dir.into(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn web_dir(&self) -> &Path {
        &self.web_dir
    }

    /// Cancelling this token stops accepting, ends every session and lets
    /// [`Server::serve`] return.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn router(self: &Arc<Self>) -> Router {
        let index = self.web_dir.join("index.html");
        Router::new()
            .route(&self.config.ws_path, get(ws_upgrade))
            .route("/health", get(health))
            .route("/debug/web", get(debug_web))
            .nest_service("/static", ServeDir::new(&self.web_dir))
            .fallback_service(ServeFile::new(index))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn listen_and_serve(self: Arc<Self>) -> Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, ws_path = %self.config.ws_path, "listening");
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown, then wait for every
    /// session to finish its teardown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        if let Some(app_url) = self.config.app_url.clone() {
            let every = Duration::from_secs(self.config.keepalive_secs.max(1));
            self.tasks
                .spawn(keepalive::run(app_url, every, self.shutdown.clone()));
        }

        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!(remaining = self.hub.registry().len(), "server stopped");
        served?;
        Ok(())
    }

    async fn serve_conn(self: Arc<Self>, socket: WebSocket) {
        let (conn, outbound) = self.hub.connect();
        let (sink, mut stream) = socket.split();

        let write_pump = tokio::spawn(write_pump(sink, outbound, conn.clone()));

        // Read pump (runs in this task)
        loop {
            let frame = tokio::select! {
                _ = conn.closed() => break,
                _ = self.shutdown.cancelled() => break,
                frame = stream.next() => frame,
            };

            let decoded = match frame {
                Some(Ok(WsMessage::Text(text))) => Message::decode(text.as_str().as_bytes()),
                Some(Ok(WsMessage::Binary(data))) => Message::decode(&data),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(reason))) => {
                    debug!(conn_id = conn.id(), reason = ?reason, "client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    debug!(conn_id = conn.id(), error = %e, "receive error");
                    break;
                }
                None => break,
            };

            match decoded {
                Ok(msg) => self.hub.dispatch(&conn, msg),
                Err(e) => {
                    info!(conn_id = conn.id(), error = %e, "unreadable frame, closing");
                    break;
                }
            }
        }

        // Cleanup
        self.hub.disconnect(&conn);
        if let Err(e) = write_pump.await {
            warn!(conn_id = conn.id(), error = %e, "write pump panicked");
        }
    }
}

/// Owns the socket sink so writes to one client are never interleaved.
async fn write_pump(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Frame>,
    conn: Arc<Connection>,
) {
    loop {
        let frame = tokio::select! {
            _ = conn.closed() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = sink.send(WsMessage::text(frame.to_string())).await {
            debug!(conn_id = conn.id(), error = %e, "write failed");
            break;
        }
    }
    conn.close();
    sink.close().await.ok();
    debug!(conn_id = conn.id(), "write pump ended");
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn ws_upgrade(State(server): State<Arc<Server>>, ws: WebSocketUpgrade) -> Response {
    ws.on_failed_upgrade(|e: axum::Error| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            let tasks = server.tasks.clone();
            tasks.track_future(server.serve_conn(socket))
        })
}

async fn health() -> &'static str {
    "OK"
}

async fn debug_web(State(server): State<Arc<Server>>) -> Json<assets::WebListing> {
    Json(assets::list_web_dir(&server.web_dir))
}
