use std::sync::Arc;

use tokio::{
    sync::{RwLock, mpsc},
    time::{Instant, sleep_until, timeout},
};

use crate::{
    config::SessionConfig,
    db::credential_store::{CredentialStore, CredentialStoreError},
    events::{EventBroadcaster, SessionEvent},
    session::{
        RegistrySlot,
        error::SessionError,
        handle::{SessionCommand, SessionSnapshot, SessionState},
    },
    wa::{
        client::{ProtocolClient, ProtocolHandle},
        events::ClientEvent,
        qr::print_qr_in_terminal,
    },
};

/// Everything a runner needs; owned by the runner task.
pub(crate) struct RunnerContext {
    pub(crate) user_id: String,
    pub(crate) snapshot: Arc<RwLock<SessionSnapshot>>,
    pub(crate) client: Arc<dyn ProtocolClient>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) events: EventBroadcaster,
    pub(crate) config: SessionConfig,
    pub(crate) slot: RegistrySlot,
}

struct ActiveConnection {
    handle: Box<dyn ProtocolHandle>,
    events: mpsc::Receiver<ClientEvent>,
}

struct RunnerSession {
    state: SessionState,
    connection: Option<ActiveConnection>,
    reconnect_at: Option<Instant>,
    establish_deadline: Option<Instant>,
    /// The current attempt was started by the reconnect timer.
    reconnecting: bool,
}

impl RunnerSession {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            connection: None,
            reconnect_at: None,
            establish_deadline: None,
            reconnecting: false,
        }
    }
}

enum Wake {
    Command(Option<SessionCommand>),
    Client(Option<ClientEvent>),
    ReconnectDue,
    EstablishTimeout,
}

enum Flow {
    Continue,
    Exit,
}

/// Main task loop for a single session.
///
/// This loop is the only writer of the session snapshot; commands and client
/// events are processed one at a time in arrival order.
pub(crate) async fn run(ctx: RunnerContext, mut command_rx: mpsc::Receiver<SessionCommand>) {
    let mut session = RunnerSession::new();
    tracing::debug!(user_id = %ctx.user_id, "session runner started");

    loop {
        let wake = tokio::select! {
            command = command_rx.recv() => Wake::Command(command),
            event = next_client_event(session.connection.as_mut()) => Wake::Client(event),
            _ = wait_until(session.reconnect_at) => Wake::ReconnectDue,
            _ = wait_until(session.establish_deadline) => Wake::EstablishTimeout,
        };

        let flow = match wake {
            Wake::Command(Some(command)) => handle_command(&ctx, &mut session, command).await,
            Wake::Command(None) => Flow::Exit,
            Wake::Client(event) => handle_client_event(&ctx, &mut session, event).await,
            Wake::ReconnectDue => {
                session.reconnect_at = None;
                reconnect(&ctx, &mut session).await;
                Flow::Continue
            }
            Wake::EstablishTimeout => {
                establish_timed_out(&ctx, &mut session).await;
                Flow::Continue
            }
        };

        if matches!(flow, Flow::Exit) {
            break;
        }
    }

    detach(&mut session).await;
    tracing::debug!(user_id = %ctx.user_id, "session runner stopped");
}

async fn next_client_event(connection: Option<&mut ActiveConnection>) -> Option<ClientEvent> {
    match connection {
        Some(connection) => connection.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn handle_command(
    ctx: &RunnerContext,
    session: &mut RunnerSession,
    command: SessionCommand,
) -> Flow {
    match command {
        SessionCommand::Connect { reply } => {
            if session.state.is_active() {
                tracing::debug!(
                    user_id = %ctx.user_id,
                    state = session.state.as_str(),
                    "connect ignored, session already active"
                );
                let _ = reply.send(Ok(()));
                return Flow::Continue;
            }

            session.reconnecting = false;
            let result = open_connection(ctx, session).await;
            if let Err(error) = &result {
                fail_initialization(ctx, session, error.to_string()).await;
            }
            let _ = reply.send(result);
            Flow::Continue
        }
        SessionCommand::Logout { reply } => {
            let result = logout(ctx, session).await;
            let _ = reply.send(result);
            Flow::Exit
        }
        SessionCommand::SendText { to, text, reply } => {
            let result = send_text(session, &to, &text).await;
            let _ = reply.send(result);
            Flow::Continue
        }
        SessionCommand::Shutdown => {
            tracing::info!(user_id = %ctx.user_id, "session shutting down");
            Flow::Exit
        }
    }
}

async fn handle_client_event(
    ctx: &RunnerContext,
    session: &mut RunnerSession,
    event: Option<ClientEvent>,
) -> Flow {
    let Some(event) = event else {
        tracing::warn!(user_id = %ctx.user_id, "client event stream ended");
        schedule_reconnect(ctx, session).await;
        return Flow::Continue;
    };

    match event {
        ClientEvent::Qr(qr) => {
            session.establish_deadline = None;
            session.reconnecting = false;
            if ctx.config.print_qr {
                print_qr_in_terminal(&ctx.user_id, &qr);
            }

            let payload = qr.clone();
            transition(ctx, session, SessionState::AwaitingScan, move |snapshot| {
                snapshot.qr = Some(payload);
                snapshot.identity = None;
            })
            .await;
            tracing::info!(user_id = %ctx.user_id, "qr ready");
            ctx.events.emit(SessionEvent::Qr {
                user_id: ctx.user_id.clone(),
                qr,
            });
        }
        ClientEvent::Open(identity) => {
            session.establish_deadline = None;
            session.reconnecting = false;
            tracing::info!(
                user_id = %ctx.user_id,
                address = %identity.external_address,
                "session connected"
            );
            transition(ctx, session, SessionState::Connected, move |snapshot| {
                snapshot.qr = None;
                snapshot.identity = Some(identity);
                snapshot.last_error = None;
            })
            .await;
        }
        ClientEvent::CredentialsRotated(credentials) => {
            match ctx.credentials.save(&ctx.user_id, &credentials).await {
                Ok(()) => tracing::debug!(user_id = %ctx.user_id, "credentials persisted"),
                Err(error) => {
                    tracing::warn!(user_id = %ctx.user_id, error = %error, "failed to persist rotated credentials");
                    record_error(ctx, format!("credentials_save_failed: {error}")).await;
                }
            }
        }
        ClientEvent::Close(reason) if reason.is_logged_out() => {
            tracing::info!(user_id = %ctx.user_id, "device logged out, clearing session");
            session.reconnect_at = None;
            session.establish_deadline = None;
            transition(ctx, session, SessionState::Closing, |_| {}).await;
            detach(session).await;
            if let Err(error) = finish_logged_out(ctx, session).await {
                tracing::warn!(user_id = %ctx.user_id, error = %error, "failed to wipe credentials");
            }
            return Flow::Exit;
        }
        ClientEvent::Close(reason) => {
            tracing::info!(
                user_id = %ctx.user_id,
                code = reason.status_code(),
                "connection closed, reconnect pending"
            );
            schedule_reconnect(ctx, session).await;
        }
    }

    Flow::Continue
}

async fn open_connection(ctx: &RunnerContext, session: &mut RunnerSession) -> Result<(), SessionError> {
    detach(session).await;
    session.reconnect_at = None;
    session.establish_deadline = None;
    transition(ctx, session, SessionState::Initializing, |snapshot| {
        snapshot.qr = None;
        snapshot.identity = None;
    })
    .await;

    let credentials = ctx.credentials.load(&ctx.user_id).await?;
    let resumed = credentials.is_some();
    let connection = timeout(
        ctx.config.connect_timeout,
        ctx.client.open(&ctx.user_id, credentials),
    )
    .await
    .map_err(|_| SessionError::ConnectTimeout)??;

    tracing::info!(user_id = %ctx.user_id, resumed, "protocol connection opened");
    session.connection = Some(ActiveConnection {
        handle: connection.handle,
        events: connection.events,
    });
    session.establish_deadline = Some(Instant::now() + ctx.config.connect_timeout);
    Ok(())
}

async fn reconnect(ctx: &RunnerContext, session: &mut RunnerSession) {
    session.reconnecting = true;
    match open_connection(ctx, session).await {
        Ok(()) => {}
        Err(error @ SessionError::Credentials(_)) => {
            fail_initialization(ctx, session, error.to_string()).await;
        }
        Err(error) => {
            tracing::warn!(user_id = %ctx.user_id, error = %error, "reconnect attempt failed");
            record_error(ctx, error.to_string()).await;
            schedule_reconnect(ctx, session).await;
        }
    }
}

async fn establish_timed_out(ctx: &RunnerContext, session: &mut RunnerSession) {
    session.establish_deadline = None;
    tracing::warn!(
        user_id = %ctx.user_id,
        timeout_secs = ctx.config.connect_timeout.as_secs(),
        "timed out waiting for connection establishment"
    );

    if session.reconnecting {
        record_error(ctx, "connect_timeout".to_owned()).await;
        schedule_reconnect(ctx, session).await;
    } else {
        fail_initialization(ctx, session, "connect_timeout".to_owned()).await;
    }
}

async fn schedule_reconnect(ctx: &RunnerContext, session: &mut RunnerSession) {
    detach(session).await;
    session.establish_deadline = None;
    session.reconnect_at = Some(Instant::now() + ctx.config.reconnect_delay);
    transition(ctx, session, SessionState::Initializing, |snapshot| {
        snapshot.qr = None;
        snapshot.identity = None;
    })
    .await;

    let delay_ms = u64::try_from(ctx.config.reconnect_delay.as_millis()).unwrap_or(u64::MAX);
    tracing::info!(user_id = %ctx.user_id, delay_ms, "reconnect scheduled");
    ctx.events.emit(SessionEvent::ReconnectScheduled {
        user_id: ctx.user_id.clone(),
        delay_ms,
    });
}

async fn fail_initialization(ctx: &RunnerContext, session: &mut RunnerSession, message: String) {
    detach(session).await;
    session.reconnect_at = None;
    session.establish_deadline = None;
    session.reconnecting = false;

    tracing::warn!(user_id = %ctx.user_id, error = %message, "session initialization failed");
    let last_error = message.clone();
    transition(ctx, session, SessionState::Idle, move |snapshot| {
        snapshot.qr = None;
        snapshot.identity = None;
        snapshot.last_error = Some(last_error);
    })
    .await;
    ctx.events.emit(SessionEvent::Error {
        user_id: ctx.user_id.clone(),
        message,
    });
}

async fn logout(ctx: &RunnerContext, session: &mut RunnerSession) -> Result<(), SessionError> {
    session.reconnect_at = None;
    session.establish_deadline = None;
    transition(ctx, session, SessionState::Closing, |_| {}).await;

    if let Some(ActiveConnection { mut handle, events }) = session.connection.take() {
        drop(events);
        if let Err(error) = handle.logout().await {
            tracing::warn!(user_id = %ctx.user_id, error = %error, "client logout failed");
        }
        handle.close().await;
    }

    tracing::info!(user_id = %ctx.user_id, "session logged out");
    finish_logged_out(ctx, session).await?;
    Ok(())
}

/// Wipes credentials, publishes the terminal state and leaves the registry.
async fn finish_logged_out(
    ctx: &RunnerContext,
    session: &mut RunnerSession,
) -> Result<(), CredentialStoreError> {
    let wiped = ctx.credentials.wipe(&ctx.user_id).await;
    transition(ctx, session, SessionState::LoggedOut, |snapshot| {
        snapshot.qr = None;
        snapshot.identity = None;
    })
    .await;
    ctx.slot.release();
    ctx.events.emit(SessionEvent::LoggedOut {
        user_id: ctx.user_id.clone(),
    });
    wiped
}

async fn send_text(session: &mut RunnerSession, to: &str, text: &str) -> Result<String, SessionError> {
    if session.state != SessionState::Connected {
        return Err(SessionError::NotConnected);
    }

    let Some(connection) = session.connection.as_mut() else {
        return Err(SessionError::NotConnected);
    };
    Ok(connection.handle.send_text(to, text).await?)
}

/// Drops the event stream first, then closes the handle.
async fn detach(session: &mut RunnerSession) {
    if let Some(ActiveConnection { mut handle, events }) = session.connection.take() {
        drop(events);
        handle.close().await;
    }
}

async fn transition<F>(ctx: &RunnerContext, session: &mut RunnerSession, state: SessionState, update: F)
where
    F: FnOnce(&mut SessionSnapshot),
{
    let changed = session.state != state;
    session.state = state;

    let identity = {
        let mut guard = ctx.snapshot.write().await;
        guard.state = state;
        update(&mut *guard);
        guard.identity.clone()
    };

    if changed {
        ctx.events.emit(SessionEvent::StatusChanged {
            user_id: ctx.user_id.clone(),
            state,
            identity,
        });
    }
}

async fn record_error(ctx: &RunnerContext, message: String) {
    ctx.snapshot.write().await.last_error = Some(message);
}
