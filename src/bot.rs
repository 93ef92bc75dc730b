//! Connection Supervisor
//!
//! Owns the lifecycle of the external transport: connect, classify close
//! events, reconnect with exponential backoff, soft-restart, and shutdown.
//! Restart and shutdown are the only operations that need explicit mutual
//! exclusion; they share one fair async mutex so queued critical sections
//! run in arrival order.
//!
//! A fatal authentication invalidation (close code 401) is not a crash: the
//! supervisor parks in a terminal standby state, stops every periodic loop,
//! and keeps the process alive for the operator.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::ai::AiServiceManager;
use crate::cognition::{CognitiveCore, CorrectiveAction};
use crate::commands::{CommandRegistry, Services};
use crate::config::BotConfig;
use crate::dispatch::Dispatcher;
use crate::envelope;
use crate::error::BotError;
use crate::logging::LogHandle;
use crate::session::{ExpiredSession, SessionRegistry};
use crate::social::SocialEngine;
use crate::state::StateStore;
use crate::transport::{
    close_code, InboundMessage, OutboundContent, SendOptions, SocketHandle, Transport,
    TransportError, TransportEvent,
};
use crate::vitals::{Vitals, METABOLISM_INTERVAL_SECS};

/// Exponent clamp for the backoff doubling, to keep the shift in range.
const MAX_BACKOFF_EXPONENT: u32 = 16;
/// Grace window before a non-fatal shutdown signals process exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationalState {
    Stopped,
    Connecting,
    Running,
    Reconnecting,
    SoftRestarting,
    /// Credentials permanently invalidated. Terminal: no reconnects, but the
    /// process stays up for manual intervention.
    FatalSessionError,
}

#[derive(Debug)]
pub enum ControlRequest {
    SoftRestart,
    Shutdown { fatal: bool },
    SetLogLevel(String),
    Fatal { origin: String },
}

/// Fire-and-forget handle for commands and the operator console to drive the
/// supervisor without holding a reference to it.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlRequest>,
}

impl ControlHandle {
    pub fn soft_restart(&self) {
        let _ = self.tx.send(ControlRequest::SoftRestart);
    }

    pub fn shutdown(&self, fatal: bool) {
        let _ = self.tx.send(ControlRequest::Shutdown { fatal });
    }

    pub fn set_log_level(&self, level: impl Into<String>) {
        let _ = self.tx.send(ControlRequest::SetLogLevel(level.into()));
    }

    pub fn fatal(&self, origin: impl Into<String>) {
        let _ = self.tx.send(ControlRequest::Fatal {
            origin: origin.into(),
        });
    }
}

pub struct Bot {
    inner: Arc<BotInner>,
    exit_rx: watch::Receiver<Option<i32>>,
}

struct BotInner {
    config: Arc<BotConfig>,
    transport: Arc<dyn Transport>,
    services: Arc<Services>,
    dispatcher: Arc<Dispatcher>,
    log_handle: Option<LogHandle>,

    op_state: Arc<StdMutex<OperationalState>>,
    reconnect_attempts: AtomicU32,
    is_shutting_down: AtomicBool,
    is_soft_restarting: AtomicBool,
    /// Fair mutex serializing restart and shutdown.
    critical_ops: Mutex<()>,

    socket: StdMutex<Option<Arc<dyn SocketHandle>>>,
    periodic_tasks: StdMutex<Vec<JoinHandle<()>>>,
    health_task: StdMutex<Option<JoinHandle<()>>>,

    control_tx: mpsc::UnboundedSender<ControlRequest>,
    control_rx: StdMutex<Option<mpsc::UnboundedReceiver<ControlRequest>>>,
    expired_rx: StdMutex<Option<mpsc::UnboundedReceiver<ExpiredSession>>>,
    exit_tx: watch::Sender<Option<i32>>,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        transport: Arc<dyn Transport>,
        log_handle: Option<LogHandle>,
    ) -> Self {
        let config = Arc::new(config);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (sessions, expired_rx) = SessionRegistry::new();
        let op_state = Arc::new(StdMutex::new(OperationalState::Stopped));

        let registry = Arc::new(CommandRegistry::new());
        let ai = Arc::new(AiServiceManager::from_config(
            config.bot_name.clone(),
            &config.ai.services,
        ));
        let services = Arc::new(Services {
            config: config.clone(),
            state: StateStore::new(config.data_dir.clone()),
            sessions,
            registry,
            cognition: Arc::new(StdMutex::new(CognitiveCore::new(config.ai.pid, config.ai.health))),
            vitals: Arc::new(Vitals::new()),
            ai,
            social: SocialEngine::new(config.data_dir.join("contactMatrix.json")),
            control: ControlHandle {
                tx: control_tx.clone(),
            },
            op_state: op_state.clone(),
            bot_id: StdMutex::new(None),
        });
        let dispatcher = Dispatcher::new(services.clone());

        Self {
            inner: Arc::new(BotInner {
                config,
                transport,
                services,
                dispatcher,
                log_handle,
                op_state,
                reconnect_attempts: AtomicU32::new(0),
                is_shutting_down: AtomicBool::new(false),
                is_soft_restarting: AtomicBool::new(false),
                critical_ops: Mutex::new(()),
                socket: StdMutex::new(None),
                periodic_tasks: StdMutex::new(Vec::new()),
                health_task: StdMutex::new(None),
                control_tx,
                control_rx: StdMutex::new(Some(control_rx)),
                expired_rx: StdMutex::new(Some(expired_rx)),
                exit_tx,
            }),
            exit_rx,
        }
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            tx: self.inner.control_tx.clone(),
        }
    }

    pub fn services(&self) -> Arc<Services> {
        self.inner.services.clone()
    }

    pub fn operational_state(&self) -> OperationalState {
        *self.inner.op_state.lock().unwrap()
    }

    /// Load state, start the periodic loops, and establish the first
    /// connection.
    pub async fn initialize(&self) -> Result<(), BotError> {
        let inner = &self.inner;
        tracing::info!("starting initialization sequence");

        inner.services.state.load_all().await?;
        inner.services.social.load().await;
        inner.services.registry.load();

        inner.spawn_control_loop();
        inner.spawn_expiry_notifier();
        inner.spawn_metabolism_loop();
        inner.spawn_flush_loop();
        inner.spawn_history_reset_loop();

        inner.connect().await;
        inner.spawn_health_loop();
        Ok(())
    }

    /// Resolve once the supervisor has decided to terminate the process.
    pub async fn wait_exit(&self) -> i32 {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(code) = *rx.borrow() {
                return code;
            }
            if rx.changed().await.is_err() {
                return 0;
            }
        }
    }
}

impl BotInner {
    fn op_state(&self) -> OperationalState {
        *self.op_state.lock().unwrap()
    }

    fn set_op_state(&self, state: OperationalState) {
        *self.op_state.lock().unwrap() = state;
    }

    fn current_socket(&self) -> Option<Arc<dyn SocketHandle>> {
        self.socket.lock().unwrap().clone()
    }

    /// Append one line to the audit log. Fire-and-forget: the write happens
    /// off the caller's path and failures only warn.
    fn audit(&self, event: &str, mut extra: serde_json::Value) {
        let path = self.config.audit_log.clone();
        if let Some(obj) = extra.as_object_mut() {
            obj.insert("ts".into(), json!(chrono::Utc::now().to_rfc3339()));
            obj.insert("event".into(), json!(event));
        }
        let line = format!("{extra}\n");
        tokio::spawn(async move {
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            let result = async {
                use tokio::io::AsyncWriteExt;
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
                file.write_all(line.as_bytes()).await
            }
            .await;
            if let Err(e) = result {
                tracing::warn!("failed to write audit log: {e}");
            }
        });
    }

    // --- connection lifecycle --------------------------------------------

    /// Connect, scheduling a reconnect on failure.
    ///
    /// Returns a boxed future (rather than `async fn`) to give the connection
    /// lifecycle a concrete, nameable type: `connect` → `connect_raw` →
    /// `event_loop` → `on_closed` → `schedule_reconnect` → `connect` is a
    /// recursive cycle, and `async fn`'s opaque return types cannot have their
    /// `Send`-ness resolved through the cycle when the futures are spawned.
    fn connect(
        self: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Err(e) = self.connect_raw().await {
                tracing::error!("failed to establish transport session: {e}");
                self.schedule_reconnect().await;
            }
        })
    }

    /// One connection attempt: no retry policy of its own.
    async fn connect_raw(self: &Arc<Self>) -> Result<(), TransportError> {
        self.set_op_state(OperationalState::Connecting);
        self.audit("connect_attempt", json!({}));

        let (socket, events) = self.transport.connect().await?;
        *self.socket.lock().unwrap() = Some(socket.clone());

        let inner = self.clone();
        tokio::spawn(async move {
            inner.event_loop(socket, events).await;
        });
        Ok(())
    }

    async fn event_loop(
        self: Arc<Self>,
        socket: Arc<dyn SocketHandle>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected { me } => self.on_connected(&socket, me).await,
                TransportEvent::Messages(batch) => self.on_messages(&socket, batch),
                TransportEvent::Closed { reason } => {
                    self.on_closed(reason).await;
                    break;
                }
            }
        }
    }

    async fn on_connected(self: &Arc<Self>, socket: &Arc<dyn SocketHandle>, me: String) {
        self.set_op_state(OperationalState::Running);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        if !me.is_empty() {
            self.services.set_bot_id(envelope::bare(&me).to_string());
        }
        tracing::info!(me = %me, "connection established, state: RUNNING");
        self.audit("connected", json!({ "me": me }));
        self.services.social.start(
            socket.clone(),
            Duration::from_millis(self.config.health_check_interval_ms * 2),
        );
    }

    /// Fan the batch out to per-message dispatch tasks. The recorded latency
    /// is the fan-out time — a proxy for scheduler lag, not handler runtime.
    fn on_messages(self: &Arc<Self>, socket: &Arc<dyn SocketHandle>, batch: Vec<InboundMessage>) {
        let started = std::time::Instant::now();
        for msg in batch {
            if !envelope::sanitize(&msg, self.config.max_text_len) {
                continue;
            }
            let dispatcher = self.dispatcher.clone();
            let socket = socket.clone();
            let control = ControlHandle {
                tx: self.control_tx.clone(),
            };
            let handle = tokio::spawn(async move {
                dispatcher.handle(socket, msg).await;
            });
            tokio::spawn(async move {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    control.fatal("panic escaped the message handler");
                }
            });
        }
        self.services
            .cognition
            .lock()
            .unwrap()
            .record_latency(started.elapsed().as_secs_f64() * 1000.0);
    }

    async fn on_closed(self: &Arc<Self>, reason: Option<u16>) {
        // An expected close during soft restart must not trigger recovery.
        if self.is_soft_restarting.load(Ordering::SeqCst) {
            tracing::info!("old connection closed, restart proceeding");
            return;
        }
        if self.is_shutting_down.load(Ordering::SeqCst) {
            return;
        }

        self.services
            .cognition
            .lock()
            .unwrap()
            .record_disconnect(reason);
        self.services.social.stop();

        if reason == Some(close_code::LOGGED_OUT) {
            self.set_op_state(OperationalState::FatalSessionError);
            tracing::error!("==========================================================");
            tracing::error!(" CRITICAL SESSION ERROR: LOGGED OUT");
            tracing::error!(" Stored credentials are no longer valid.");
            tracing::error!(" ACTION REQUIRED: clear the session and re-pair the device.");
            tracing::error!(" The bot stays up in standby awaiting operator commands.");
            tracing::error!("==========================================================");
            self.audit("logged_out", json!({ "fatal": true }));
            if let Some(handle) = self.health_task.lock().unwrap().take() {
                handle.abort();
            }
            return;
        }

        self.set_op_state(OperationalState::Reconnecting);
        if reason == Some(close_code::CONNECTION_REPLACED) {
            tracing::error!(?reason, "connection closed for an unrecoverable reason");
            self.shutdown(true).await;
        } else {
            tracing::warn!(?reason, "connection lost, attempting to reconnect");
            self.schedule_reconnect().await;
        }
    }

    async fn schedule_reconnect(self: &Arc<Self>) {
        if self.is_shutting_down.load(Ordering::SeqCst)
            || self.is_soft_restarting.load(Ordering::SeqCst)
            || self.op_state() == OperationalState::FatalSessionError
        {
            tracing::warn!("reconnect cancelled: supervisor state forbids it");
            return;
        }

        let attempt = {
            let _guard = self.critical_ops.lock().await;
            self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
        };

        if attempt > self.config.max_reconnect_attempts {
            tracing::error!(
                attempt,
                "reconnect limit exceeded, giving up for good"
            );
            self.shutdown(true).await;
            return;
        }

        let delay = Duration::from_millis(
            self.config.reconnect_base_delay_ms
                * 2u64.pow(attempt.min(MAX_BACKOFF_EXPONENT)),
        );
        tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // State may have changed while we slept.
            if inner.is_shutting_down.load(Ordering::SeqCst)
                || inner.is_soft_restarting.load(Ordering::SeqCst)
                || inner.op_state() == OperationalState::FatalSessionError
            {
                return;
            }
            inner.connect().await;
        });
    }

    /// Controlled teardown-and-reconnect without leaving the process.
    /// Serialized; the restarting flag is raised before teardown so the
    /// resulting close event is recognized as expected, and always cleared.
    async fn soft_restart(self: &Arc<Self>) {
        let guard = self.critical_ops.lock().await;
        if self.is_soft_restarting.load(Ordering::SeqCst)
            || self.is_shutting_down.load(Ordering::SeqCst)
        {
            return;
        }
        tracing::warn!("beginning soft restart procedure");
        self.is_soft_restarting.store(true, Ordering::SeqCst);
        self.set_op_state(OperationalState::SoftRestarting);
        self.audit("soft_restart", json!({}));

        // The initiative engine holds the old socket; the reconnect's
        // Connected event brings it back with the new one.
        self.services.social.stop();

        if let Some(socket) = self.current_socket()
            && let Err(e) = socket.end().await
        {
            tracing::warn!("old connection refused to close ({e}), continuing");
        }

        self.services.registry.load();
        let result = self.connect_raw().await;

        // The flag comes down no matter how the restart went.
        self.is_soft_restarting.store(false, Ordering::SeqCst);
        drop(guard);

        match result {
            Ok(()) => tracing::info!("soft restart completed"),
            Err(e) => {
                tracing::error!("soft restart failed mid-flight: {e}");
                self.schedule_reconnect().await;
            }
        }
    }

    /// Stop everything, persist what we can, close the transport, then
    /// signal process exit — immediately if fatal, after a short grace
    /// window otherwise.
    async fn shutdown(self: &Arc<Self>, is_fatal: bool) {
        let _guard = self.critical_ops.lock().await;
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if is_fatal {
            tracing::error!("beginning FATAL shutdown procedure");
        } else {
            tracing::warn!("beginning shutdown procedure");
        }
        self.audit("shutdown", json!({ "fatal": is_fatal }));

        if let Some(handle) = self.health_task.lock().unwrap().take() {
            handle.abort();
        }
        for handle in self.periodic_tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
        self.services.social.stop();

        self.services.state.save_all().await;
        self.services.social.save().await;
        tracing::info!("state persisted");

        let socket = self.socket.lock().unwrap().take();
        if let Some(socket) = socket {
            match socket.end().await {
                Ok(()) => tracing::info!("transport closed cleanly"),
                Err(e) => tracing::warn!("transport close failed (likely already dead): {e}"),
            }
        }
        self.set_op_state(OperationalState::Stopped);

        if is_fatal {
            tracing::warn!("emergency exit, skipping grace window");
            let _ = self.exit_tx.send(Some(1));
        } else {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            let _ = self.exit_tx.send(Some(0));
        }
    }

    async fn handle_fatal(self: &Arc<Self>, origin: &str) {
        let snapshot = self.services.cognition.lock().unwrap().snapshot();
        tracing::error!(
            origin,
            errors = snapshot.error_count,
            "unrecoverable fault detected"
        );
        if !self.is_shutting_down.load(Ordering::SeqCst) {
            self.shutdown(true).await;
        }
    }

    // --- periodic loops ---------------------------------------------------

    /// The control loop is deliberately NOT in `periodic_tasks`: shutdown
    /// runs on this very task, so aborting it there would cancel the
    /// shutdown sequence mid-flight. It ends with the process.
    fn spawn_control_loop(self: &Arc<Self>) {
        let Some(mut rx) = self.control_rx.lock().unwrap().take() else {
            return;
        };
        let inner = self.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match request {
                    ControlRequest::SoftRestart => inner.soft_restart().await,
                    ControlRequest::Shutdown { fatal } => inner.shutdown(fatal).await,
                    ControlRequest::SetLogLevel(level) => {
                        if let Some(handle) = &inner.log_handle {
                            handle.set_level(&level);
                        }
                        inner.audit("set_log_level", json!({ "level": level }));
                    }
                    ControlRequest::Fatal { origin } => inner.handle_fatal(&origin).await,
                }
            }
        });
    }

    fn spawn_expiry_notifier(self: &Arc<Self>) {
        let Some(mut rx) = self.expired_rx.lock().unwrap().take() else {
            return;
        };
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(expired) = rx.recv().await {
                let Some(socket) = inner.current_socket() else {
                    continue;
                };
                let text = format!("[SYSTEM] Your `{}` session expired.", expired.command);
                let _ = socket
                    .send(
                        &expired.chat,
                        OutboundContent::Text { text },
                        SendOptions::default(),
                    )
                    .await;
            }
        });
        self.periodic_tasks.lock().unwrap().push(handle);
    }

    fn spawn_metabolism_loop(self: &Arc<Self>) {
        let vitals = self.services.vitals.clone();
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(METABOLISM_INTERVAL_SECS));
            loop {
                interval.tick().await;
                vitals.metabolism_step();
            }
        });
        self.periodic_tasks.lock().unwrap().push(handle);
    }

    fn spawn_flush_loop(self: &Arc<Self>) {
        let state = self.services.state.clone();
        let social = self.services.social.clone();
        let period = Duration::from_secs(self.config.state_flush_interval_secs);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                state.save_all().await;
                social.save().await;
            }
        });
        self.periodic_tasks.lock().unwrap().push(handle);
    }

    fn spawn_history_reset_loop(self: &Arc<Self>) {
        let ai = self.services.ai.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                ai.clear_history();
            }
        });
        self.periodic_tasks.lock().unwrap().push(handle);
    }

    /// The health tick loop. Sequential by construction: a tick — including
    /// any soft restart it triggers — completes before the next sleep is
    /// armed, so ticks can never overlap.
    fn spawn_health_loop(self: &Arc<Self>) {
        let inner = self.clone();
        let interval = Duration::from_millis(self.config.health_check_interval_ms);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if inner.is_shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                let action = inner.services.cognition.lock().unwrap().tick();
                match action {
                    CorrectiveAction::Adapt => {
                        if let Some(log) = &inner.log_handle {
                            log.set_level("debug");
                        }
                    }
                    CorrectiveAction::Recover => inner.services.social.stop(),
                    CorrectiveAction::Restart => inner.soft_restart().await,
                    CorrectiveAction::Idle => {}
                }
            }
        });
        *self.health_task.lock().unwrap() = Some(handle);
        tracing::info!("health feedback loop armed");
    }
}
