//! termbot server - one process owning every terminal session.
//!
//! Architecture:
//! - A single dispatch loop consumes inbound messages in arrival order, drops duplicates
//!   and hands each message to its conversation's lane
//! - A lane owns one conversation's operator context and routes its messages in order, so
//!   a slow session create only holds up the conversation that asked for it
//! - Work that touches a terminal is handed to the router's per-session workers, so a slow
//!   command never holds up messages for other sessions
//! - A local HTTP endpoint feeds the loop; the CLI is a thin client of it
//! - PID/port files live under ~/.termbot
//!
//! Endpoints:
//! - POST /api/messages - Deliver a message, wait for its reply
//! - GET /api/sessions - Persisted session records
//! - GET /api/orphans - Live terminals with no session record
//! - GET /health - Liveness

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::assistant::TmuxLauncher;
use crate::config::Config;
use crate::host::{Tmux, TmuxHost};
use crate::models::{InboundMessage, SessionRecord};
use crate::router::{spawn_sweeper, Reply, Router, RouterSettings};
use crate::store::SessionStore;

/// Server configuration file paths.
const SERVER_DIR: &str = ".termbot";
const PID_FILE: &str = "server.pid";
const PORT_FILE: &str = "server.port";

/// How many recent transport message ids are remembered for de-duplication.
const DEDUP_CAPACITY: usize = 512;

/// Inbound queue depth before HTTP callers wait.
const INBOUND_QUEUE: usize = 256;

/// One message waiting for the dispatch loop. `None` is sent back for a duplicate.
#[derive(Debug)]
pub struct Inbound {
    pub message: InboundMessage,
    pub reply: oneshot::Sender<Option<String>>,
}

/// Bounded memory of recently seen message ids.
#[derive(Debug, Default)]
struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    /// Record `id`; returns false if it was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == DEDUP_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

/// Dispatch loop state: duplicate filter plus one lane per conversation.
struct Dispatcher {
    router: Router,
    lanes: HashMap<String, mpsc::UnboundedSender<Inbound>>,
    recent: RecentIds,
}

impl Dispatcher {
    fn new(router: Router) -> Self {
        Self {
            router,
            lanes: HashMap::new(),
            recent: RecentIds::default(),
        }
    }

    /// Hand one message to its conversation; a message id seen before is answered `None`.
    fn handle(&mut self, inbound: Inbound) {
        if let Some(id) = inbound.message.message_id.as_deref() {
            if !self.recent.insert(id) {
                debug!(message_id = id, "duplicate message ignored");
                let _ = inbound.reply.send(None);
                return;
            }
        }

        let key = inbound.message.conversation_key().to_string();
        let router = &self.router;
        let lane = self
            .lanes
            .entry(key.clone())
            .or_insert_with(|| spawn_lane(router.clone(), key));
        if lane.send(inbound).is_err() {
            warn!("conversation lane stopped; message dropped");
        }
    }
}

/// Route one conversation's messages in order against its own operator context.
fn spawn_lane(router: Router, key: String) -> mpsc::UnboundedSender<Inbound> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Inbound>();
    tokio::spawn(async move {
        let mut ctx = router.new_context();
        debug!(conversation = %key, current = ?ctx.current, "conversation opened");
        while let Some(Inbound { message, reply }) = rx.recv().await {
            match router.dispatch(&mut ctx, &message).await {
                Reply::Ready(text) => {
                    let _ = reply.send(Some(text));
                }
                pending => {
                    tokio::spawn(async move {
                        let _ = reply.send(Some(pending.text().await));
                    });
                }
            }
        }
    });
    tx
}

/// Start the dispatch loop; messages sent on the returned channel are accepted in order.
pub fn spawn_dispatcher(router: Router) -> mpsc::Sender<Inbound> {
    let (tx, mut rx) = mpsc::channel::<Inbound>(INBOUND_QUEUE);
    tokio::spawn(async move {
        let mut dispatcher = Dispatcher::new(router);
        while let Some(inbound) = rx.recv().await {
            dispatcher.handle(inbound);
        }
        debug!("dispatch loop stopped");
    });
    tx
}

/// Shared state for HTTP handlers.
#[derive(Clone)]
struct ServerState {
    inbound: mpsc::Sender<Inbound>,
    router: Router,
}

/// Reply to `POST /api/messages`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub reply: Option<String>,
    #[serde(default)]
    pub duplicate: bool,
}

/// Reply to `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
}

// === Server Lifecycle ===

/// Open the store, recover against tmux and serve until interrupted.
///
/// Recovery failure (corrupt store, tmux unreachable) stops startup.
pub async fn start_server(config: Config, port: u16) -> Result<()> {
    let store = SessionStore::open(config.sessions.base_dir())
        .context("Failed to open session store")?;
    let tmux = Tmux::new(&config.sessions.tmux_binary, &config.sessions.tmux_prefix);
    let router = Router::new(
        Arc::new(store),
        Arc::new(TmuxHost::new(tmux.clone())),
        Arc::new(TmuxLauncher::new(tmux, config.assistant.options())),
        config.security.clone(),
        RouterSettings::from_config(&config),
    );

    let report = router
        .reconcile()
        .await
        .context("Recovery failed: could not reconcile sessions with tmux")?;
    info!(
        sessions = router.store().list().len(),
        terminated = report.terminated.len(),
        orphans = report.orphans.len(),
        "recovered session state"
    );

    let sweeper = spawn_sweeper(router.clone(), config.sessions.sweep_interval());
    let state = ServerState {
        inbound: spawn_dispatcher(router.clone()),
        router,
    };

    let app = axum::Router::new()
        .route("/api/messages", post(post_message))
        .route("/api/sessions", get(list_sessions))
        .route("/api/orphans", get(list_orphans))
        .route("/health", get(health))
        .with_state(state);

    let server_dir = get_server_dir()?;
    std::fs::create_dir_all(&server_dir)
        .with_context(|| format!("Failed to create {}", server_dir.display()))?;
    std::fs::write(server_dir.join(PID_FILE), std::process::id().to_string())?;
    std::fs::write(server_dir.join(PORT_FILE), port.to_string())?;

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "termbot server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("Server error");

    sweeper.abort();
    let _ = std::fs::remove_file(server_dir.join(PID_FILE));
    let _ = std::fs::remove_file(server_dir.join(PORT_FILE));
    served
}

fn get_server_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(SERVER_DIR))
}

/// Port of the running server, if its PID file points at a live process.
pub fn get_server_port() -> Option<u16> {
    let server_dir = get_server_dir().ok()?;
    let pid: u32 = std::fs::read_to_string(server_dir.join(PID_FILE))
        .ok()?
        .trim()
        .parse()
        .ok()?;

    #[cfg(unix)]
    {
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !alive {
            return None;
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    std::fs::read_to_string(server_dir.join(PORT_FILE))
        .ok()?
        .trim()
        .parse()
        .ok()
}

// === Handlers ===

async fn post_message(
    State(state): State<ServerState>,
    Json(message): Json<InboundMessage>,
) -> Result<Json<MessageResponse>, StatusCode> {
    let (tx, rx) = oneshot::channel();
    state
        .inbound
        .send(Inbound { message, reply: tx })
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    match rx.await {
        Ok(Some(text)) => Ok(Json(MessageResponse {
            reply: Some(text),
            duplicate: false,
        })),
        Ok(None) => Ok(Json(MessageResponse {
            reply: None,
            duplicate: true,
        })),
        Err(_) => {
            warn!("dispatch loop dropped a message");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn list_sessions(State(state): State<ServerState>) -> Json<Vec<SessionRecord>> {
    Json(
        state
            .router
            .store()
            .list()
            .iter()
            .map(|s| s.to_record())
            .collect(),
    )
}

async fn list_orphans(State(state): State<ServerState>) -> Json<Vec<String>> {
    Json(
        state
            .router
            .orphans()
            .iter()
            .map(ToString::to_string)
            .collect(),
    )
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.router.store().list().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::fake::FakeLauncher;
    use crate::host::fake::FakeHost;
    use crate::security::SecurityPolicy;
    use std::time::Duration;

    fn router(tmp: &tempfile::TempDir) -> Router {
        router_with(tmp, FakeHost::new())
    }

    fn router_with(tmp: &tempfile::TempDir, host: FakeHost) -> Router {
        let store = SessionStore::open(tmp.path()).unwrap();
        Router::new(
            Arc::new(store),
            Arc::new(host),
            Arc::new(FakeLauncher::new()),
            SecurityPolicy::default(),
            RouterSettings::default(),
        )
    }

    async fn send(tx: &mpsc::Sender<Inbound>, message: InboundMessage) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        tx.send(Inbound { message, reply }).await.unwrap();
        rx.await.unwrap()
    }

    #[test]
    fn recent_ids_forget_oldest() {
        let mut recent = RecentIds::default();
        assert!(recent.insert("m-0"));
        assert!(!recent.insert("m-0"));
        for n in 1..=DEDUP_CAPACITY {
            assert!(recent.insert(&format!("m-{n}")));
        }
        assert!(recent.insert("m-0"));
        assert_eq!(recent.order.len(), DEDUP_CAPACITY);
    }

    #[tokio::test]
    async fn duplicate_message_is_processed_once() {
        let tmp = tempfile::tempdir().unwrap();
        let tx = spawn_dispatcher(router(&tmp));

        let mut message = InboundMessage::new("/new-session demo", "alice");
        message.message_id = Some("42".into());

        let first = send(&tx, message.clone()).await.unwrap();
        assert!(first.starts_with("Created session 001"), "{first}");
        assert_eq!(send(&tx, message).await, None);

        let listing = send(&tx, InboundMessage::new("/list-sessions", "alice")).await.unwrap();
        assert!(!listing.contains("002"), "{listing}");
    }

    #[tokio::test]
    async fn conversations_keep_separate_contexts() {
        let tmp = tempfile::tempdir().unwrap();
        let tx = spawn_dispatcher(router(&tmp));

        let mut ops = InboundMessage::new("/new-session ops", "alice");
        ops.topic = Some("ops".into());
        send(&tx, ops).await.unwrap();

        let mut web = InboundMessage::new("/new-session web", "alice");
        web.topic = Some("web".into());
        send(&tx, web).await.unwrap();

        let mut check = InboundMessage::new("/list-sessions", "alice");
        check.topic = Some("ops".into());
        let listing = send(&tx, check).await.unwrap();
        assert!(listing.contains("001 (ops) [active]"), "{listing}");
        assert!(listing.lines().any(|l| l.contains("001 (ops)") && l.ends_with("<- current")));
        assert!(!listing.lines().any(|l| l.contains("002 (web)") && l.ends_with("<- current")));
    }

    #[tokio::test]
    async fn new_conversation_adopts_latest_session() {
        let tmp = tempfile::tempdir().unwrap();
        let tx = spawn_dispatcher(router(&tmp));

        send(&tx, InboundMessage::new("/new-session demo", "alice")).await.unwrap();
        let reply = send(&tx, InboundMessage::new("echo hi", "bob")).await.unwrap();

        assert_eq!(reply, "```\nout: echo hi\n```");
    }

    #[tokio::test]
    async fn slow_create_does_not_hold_up_other_conversations() {
        let tmp = tempfile::tempdir().unwrap();
        let tx = spawn_dispatcher(router_with(
            &tmp,
            FakeHost::with_create_delay(Duration::from_millis(500)),
        ));

        let creating = {
            let tx = tx.clone();
            tokio::spawn(async move {
                send(&tx, InboundMessage::new("/new-session demo", "alice")).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let help = tokio::time::timeout(
            Duration::from_millis(200),
            send(&tx, InboundMessage::new("/help", "bob")),
        )
        .await
        .expect("help waited behind another conversation's create");
        assert!(help.is_some());

        let created = creating.await.unwrap().unwrap();
        assert!(created.starts_with("Created session 001"), "{created}");
    }
}
