//! Session router: resolves the target session, serialises work per session and
//! assembles the reply.
//!
//! Store mutations happen here, at acceptance, under the store's own lock. Anything that
//! touches a terminal is queued to the session's worker, so at most one command is ever
//! in flight per terminal while different sessions proceed in parallel.

mod reply;
mod sweep;
mod worker;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::assistant::{AssistantLauncher, AssistantSupervisor};
use crate::classify::classify;
use crate::config::{Config, SessionsConfig};
use crate::error::BotError;
use crate::host::{CaptureProfile, SessionHost};
use crate::models::{
    AssistantState, Directive, InboundMessage, OperatorContext, Session, SessionId, SessionState,
};
use crate::security::SecurityPolicy;
use crate::store::{SessionStore, Transition};

pub use sweep::spawn_sweeper;
use worker::{Job, JobKind, WorkerHandle};

/// Default scrollback returned by `/history`.
const DEFAULT_HISTORY_LINES: usize = 50;

/// The reply to one inbound message.
///
/// Control directives answer immediately; work queued to a session worker answers once
/// the worker gets to it.
#[derive(Debug)]
pub enum Reply {
    Ready(String),
    Pending(oneshot::Receiver<String>),
}

impl Reply {
    /// Wait for the reply text.
    pub async fn text(self) -> String {
        match self {
            Self::Ready(text) => text,
            Self::Pending(rx) => rx
                .await
                .unwrap_or_else(|_| "Session was terminated before the command ran".to_string()),
        }
    }

    fn error(err: &BotError) -> Self {
        Self::Ready(reply::error(err))
    }
}

/// Tunables the router needs from the configuration.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Capture profile for shell commands.
    pub shell: CaptureProfile,
    /// Capture profile while the assistant owns the pane.
    pub assistant: CaptureProfile,
    pub history_lines: usize,
    pub idle_timeout: Option<Duration>,
    pub assistant_stop_timeout: Duration,
    /// Working-directory shortcuts.
    pub sessions: SessionsConfig,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            shell: config.capture.profile(),
            assistant: config.assistant.profile(&config.capture),
            history_lines: DEFAULT_HISTORY_LINES,
            idle_timeout: config.sessions.idle_timeout(),
            assistant_stop_timeout: config.assistant.stop_timeout(),
            sessions: config.sessions.clone(),
        }
    }
}

/// State shared between the router and its workers.
pub(crate) struct Shared {
    store: Arc<SessionStore>,
    host: Arc<dyn SessionHost>,
    supervisor: AssistantSupervisor,
    policy: SecurityPolicy,
    settings: RouterSettings,
    workers: Mutex<HashMap<SessionId, WorkerHandle>>,
    orphans: Mutex<BTreeSet<SessionId>>,
}

impl Shared {
    fn touch(&self, id: &SessionId) {
        if let Err(err) = self.store.touch(id) {
            debug!(%id, error = %err, "could not record activity");
        }
    }

    /// Queue `kind` on the session's worker, starting the worker if needed.
    fn submit(
        self: &Arc<Self>,
        session: Session,
        kind: JobKind,
        reply: Option<oneshot::Sender<String>>,
    ) {
        let id = session.id.clone();
        let mut job = Job {
            kind,
            session,
            reply,
        };
        let mut workers = self.workers.lock();
        if let Some(handle) = workers.get(&id) {
            match handle.submit(job) {
                Ok(()) => return,
                Err(returned) => job = returned,
            }
        }
        let handle = worker::spawn(Arc::clone(self), id.clone());
        if let Err(job) = handle.submit(job) {
            if let Some(reply) = job.reply {
                let _ = reply.send(reply::error(&BotError::SessionNotFound(id.to_string())));
            }
        }
        workers.insert(id, handle);
    }

    /// Remove a session from the store now and destroy its terminal once queued work
    /// has drained.
    fn terminate(
        self: &Arc<Self>,
        id: &SessionId,
        reply: Option<oneshot::Sender<String>>,
    ) -> Result<(), BotError> {
        let session = self
            .store
            .remove(id)?
            .ok_or_else(|| BotError::SessionNotFound(id.to_string()))?;
        info!(%id, name = %session.name, "session terminated");
        self.submit(session, JobKind::Destroy, reply);
        Ok(())
    }
}

/// Entry point for inbound messages.
#[derive(Clone)]
pub struct Router {
    shared: Arc<Shared>,
}

impl Router {
    pub fn new(
        store: Arc<SessionStore>,
        host: Arc<dyn SessionHost>,
        launcher: Arc<dyn AssistantLauncher>,
        policy: SecurityPolicy,
        settings: RouterSettings,
    ) -> Self {
        let supervisor =
            AssistantSupervisor::new(Arc::clone(&store), launcher, settings.assistant_stop_timeout);
        Self {
            shared: Arc::new(Shared {
                store,
                host,
                supervisor,
                policy,
                settings,
                workers: Mutex::new(HashMap::new()),
                orphans: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.shared.store
    }

    /// Live host processes with no store entry, as of the last reconciliation.
    pub fn orphans(&self) -> Vec<SessionId> {
        self.shared.orphans.lock().iter().cloned().collect()
    }

    /// Context for a conversation seen for the first time: it adopts the most recently
    /// active session.
    pub fn new_context(&self) -> OperatorContext {
        OperatorContext::new(self.shared.store.most_recent_active())
    }

    /// Handle one message and return its reply text.
    pub async fn handle_message(
        &self,
        ctx: &mut OperatorContext,
        message: &InboundMessage,
    ) -> String {
        self.dispatch(ctx, message).await.text().await
    }

    /// Classify and route one message.
    ///
    /// Returns as soon as the message is accepted; work queued to a session worker is
    /// answered through [`Reply::Pending`].
    pub async fn dispatch(&self, ctx: &mut OperatorContext, message: &InboundMessage) -> Reply {
        let directive = classify(&message.text);
        let span = info_span!(
            "message",
            request = %Uuid::now_v7(),
            sender = %message.sender,
            kind = directive.kind()
        );
        async {
            info!(target_hint = ?message.session, "message accepted");
            debug!(text = %message.text, "message text");
            match self.route(ctx, message, directive).await {
                Ok(reply) => reply,
                Err(err) => {
                    info!(error = %err, "request failed");
                    Reply::error(&err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn route(
        &self,
        ctx: &mut OperatorContext,
        message: &InboundMessage,
        directive: Directive,
    ) -> Result<Reply, BotError> {
        let explicit = directive
            .explicit_target()
            .map(ToString::to_string)
            .or_else(|| message.session.clone());

        match directive {
            Directive::Invalid { reason } => Err(BotError::ClassificationInvalid(reason)),
            Directive::Help => Ok(Reply::Ready(reply::HELP.to_string())),
            Directive::ListSessions => {
                let current = self.current(ctx).map(|s| s.id);
                Ok(Reply::Ready(reply::session_list(
                    &self.shared.store.list(),
                    current.as_ref(),
                    &self.orphans(),
                )))
            }
            Directive::CreateSession { name } => self.create(ctx, name.as_deref()).await,
            Directive::SwitchSession { target } => self.switch(ctx, &target),
            Directive::SleepSession { .. } => {
                let session = self.resolve(ctx, explicit.as_deref())?;
                let session = self
                    .shared
                    .store
                    .set_state(&session.id, SessionState::Background)?;
                info!(id = %session.id, "session moved to background");
                Ok(Reply::Ready(reply::state_changed(&session)))
            }
            Directive::KillSession { .. } => self.kill(ctx, explicit.as_deref()).await,
            Directive::RenameSession { target, name } => {
                let session = self.resolve(ctx, Some(target.as_str()))?;
                let renamed = self.shared.store.rename(&session.id, &name)?;
                info!(id = %renamed.id, from = %session.name, to = %renamed.name, "session renamed");
                Ok(Reply::Ready(format!(
                    "Renamed session {} to \"{}\"",
                    renamed.id, renamed.name
                )))
            }
            Directive::SetWorkingDirectory { path } => {
                let session = self.resolve(ctx, explicit.as_deref())?;
                self.change_dir(session, &path)
            }
            Directive::AssistantStart => {
                let session = self.resolve(ctx, explicit.as_deref())?;
                // Fold an exit nobody has noticed yet into `stopped` before deciding.
                self.shared.supervisor.refresh(&session.id).await?;
                match self.shared.supervisor.accept_start(&session.id)? {
                    Transition::Unchanged(state) => {
                        Ok(Reply::Ready(reply::assistant_unchanged(&session, state)))
                    }
                    Transition::Began => {
                        info!(id = %session.id, "assistant starting");
                        Ok(self.queue(session, JobKind::AssistantStart))
                    }
                }
            }
            Directive::AssistantStop => {
                let session = self.resolve(ctx, explicit.as_deref())?;
                match self.shared.supervisor.accept_stop(&session.id)? {
                    Transition::Unchanged(state) => {
                        Ok(Reply::Ready(reply::assistant_unchanged(&session, state)))
                    }
                    Transition::Began => {
                        info!(id = %session.id, "assistant stopping");
                        Ok(self.queue(session, JobKind::AssistantStop))
                    }
                }
            }
            Directive::AssistantStatus => {
                let session = self.resolve(ctx, explicit.as_deref())?;
                Ok(self.assistant_status(session))
            }
            Directive::History { lines } => {
                let session = self.resolve(ctx, explicit.as_deref())?;
                Ok(self.history(session, lines.unwrap_or(self.shared.settings.history_lines)))
            }
            Directive::SendKeys { keys } => {
                let session = self.resolve(ctx, explicit.as_deref())?;
                Ok(self.queue(session, JobKind::Keys(keys)))
            }
            Directive::RawCommand { text } => {
                let session = self.resolve(ctx, explicit.as_deref())?;
                info!(id = %session.id, "raw command queued");
                Ok(self.queue(session, JobKind::Command(text)))
            }
        }
    }

    /// The context's current session, if it still exists. A stale pointer is cleared.
    fn current(&self, ctx: &mut OperatorContext) -> Option<Session> {
        let id = ctx.current.as_ref()?;
        match self.shared.store.get(id).filter(|s| s.state.is_live()) {
            Some(session) => Some(session),
            None => {
                ctx.current = None;
                None
            }
        }
    }

    /// Explicit reference first, then the current session. Never creates a session.
    fn resolve(
        &self,
        ctx: &mut OperatorContext,
        explicit: Option<&str>,
    ) -> Result<Session, BotError> {
        match explicit {
            Some(reference) => self
                .shared
                .store
                .resolve(reference)
                .ok_or_else(|| BotError::SessionNotFound(reference.to_string())),
            None => self.current(ctx).ok_or(BotError::NoActiveSession),
        }
    }

    fn queue(&self, session: Session, kind: JobKind) -> Reply {
        let (tx, rx) = oneshot::channel();
        self.shared.submit(session, kind, Some(tx));
        Reply::Pending(rx)
    }

    async fn create(
        &self,
        ctx: &mut OperatorContext,
        name: Option<&str>,
    ) -> Result<Reply, BotError> {
        let store = &self.shared.store;
        let reservation = store.prepare(name)?;

        match self.shared.host.create(&reservation.id, &reservation.dir).await {
            Ok(handle) => {
                let session = Session::new(
                    reservation.id.clone(),
                    reservation.name.clone(),
                    reservation.dir.clone(),
                );
                if let Err(err) = store.insert(session.clone()) {
                    let _ = self.shared.host.destroy(handle.id()).await;
                    let _ = store.discard(&reservation);
                    return Err(err.into());
                }
                info!(id = %session.id, name = %session.name, target = handle.target(), "session created");
                ctx.current = Some(session.id.clone());
                Ok(Reply::Ready(reply::created(&session)))
            }
            Err(err) => {
                warn!(id = %reservation.id, error = %err, "host refused to create session");
                if let Err(discard) = store.discard(&reservation) {
                    warn!(error = %discard, "could not discard session directory");
                }
                Err(err.into())
            }
        }
    }

    fn switch(&self, ctx: &mut OperatorContext, target: &str) -> Result<Reply, BotError> {
        let session = self
            .shared
            .store
            .resolve(target)
            .ok_or_else(|| BotError::SessionNotFound(target.to_string()))?;
        let session = if session.state == SessionState::Active {
            session
        } else {
            info!(id = %session.id, "waking session");
            self.shared.store.set_state(&session.id, SessionState::Active)?
        };
        ctx.current = Some(session.id.clone());
        Ok(Reply::Ready(reply::state_changed(&session)))
    }

    async fn kill(
        &self,
        ctx: &mut OperatorContext,
        target: Option<&str>,
    ) -> Result<Reply, BotError> {
        let session = match target {
            Some(reference) => match self.shared.store.resolve(reference) {
                Some(session) => session,
                None => return self.kill_orphan(reference).await,
            },
            None => self.current(ctx).ok_or(BotError::NoActiveSession)?,
        };

        if ctx.current.as_ref() == Some(&session.id) {
            ctx.current = None;
        }
        let (tx, rx) = oneshot::channel();
        self.shared.terminate(&session.id, Some(tx))?;
        Ok(Reply::Pending(rx))
    }

    /// `/kill-session <id>` naming a live terminal the store does not know about.
    async fn kill_orphan(&self, reference: &str) -> Result<Reply, BotError> {
        let not_found = || BotError::SessionNotFound(reference.to_string());
        let id = SessionId::parse(reference).ok_or_else(not_found)?;
        if self.shared.store.is_known(&id) || !self.shared.host.list_live().await?.contains(&id) {
            return Err(not_found());
        }
        self.shared.host.destroy(&id).await?;
        self.shared.orphans.lock().remove(&id);
        info!(%id, "orphaned terminal destroyed");
        Ok(Reply::Ready(format!("Orphaned terminal process {id} destroyed")))
    }

    fn change_dir(&self, session: Session, input: &str) -> Result<Reply, BotError> {
        if session.assistant.is_up() {
            return Err(BotError::ClassificationInvalid(format!(
                "the assistant is {} in session {}; stop it before changing directory",
                session.assistant, session.id
            )));
        }
        let path = self
            .shared
            .settings
            .sessions
            .resolve_working_dir(input, &session.working_dir);
        let dir: PathBuf = match std::fs::canonicalize(&path) {
            Ok(dir) if dir.is_dir() => dir,
            Ok(_) => {
                return Err(BotError::ClassificationInvalid(format!(
                    "not a directory: {}",
                    path.display()
                )))
            }
            Err(_) => {
                return Err(BotError::ClassificationInvalid(format!(
                    "directory not found: {}",
                    path.display()
                )))
            }
        };
        Ok(self.queue(session, JobKind::ChangeDir(dir)))
    }

    /// Probe outside the worker: reading the pane does not write to the terminal.
    fn assistant_status(&self, session: Session) -> Reply {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let text = match shared.supervisor.refresh(&session.id).await {
                Ok(status) => match (status.state, status.exited) {
                    (AssistantState::Stopped, Some(code)) => format!(
                        "Assistant in session {} exited{}; state is now stopped",
                        session.label(),
                        code.map(|c| format!(" with code {c}")).unwrap_or_default()
                    ),
                    (state, _) => format!("Assistant in session {} is {state}", session.label()),
                },
                Err(err) => reply::error(&err),
            };
            let _ = tx.send(text);
        });
        Reply::Pending(rx)
    }

    fn history(&self, session: Session, lines: usize) -> Reply {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let text = match shared.host.history(&session.id, lines).await {
                Ok(text) => reply::output(&text),
                Err(err) => reply::error(&err.into()),
            };
            let _ = tx.send(text);
        });
        Reply::Pending(rx)
    }
}

#[cfg(test)]
mod tests;
