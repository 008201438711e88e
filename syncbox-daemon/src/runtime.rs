use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use syncbox_core::{Config, DaemonState, Snapshot, SyncOperation};
use syncbox_sync::{outbox, EventTranslator, FsEvent, Outbox};

use crate::error::{io_err, DaemonError};
use crate::protocol::{
    decode_message, read_frame, write_frame, ControlCommand, ControlResponse,
    REGISTER_USER_COMMAND,
};
use crate::remote::{HttpRemote, RemoteClient, RemoteFailure};
use crate::watcher::{spawn_watcher, RawChange, RenamePairer};

/// Remote command that returns `{"files": {path: hash}}`.
pub const SERVER_SNAPSHOT_COMMAND: &str = "get_server_snapshot";

const FS_EVENT_QUEUE: usize = 1024;
const CONTROL_QUEUE: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct ControlJob {
    command: ControlCommand,
    respond_to: oneshot::Sender<Option<ControlResponse>>,
}

/// Sole owner of the snapshot. Filesystem events and control commands are
/// applied here one at a time.
struct Engine {
    translator: EventTranslator,
    snapshot: Snapshot,
    remote: Arc<dyn RemoteClient>,
    outbox: Outbox,
    state_dir: PathBuf,
    state: DaemonState,
}

impl Engine {
    async fn dispatch(&self, command: &str, data: Option<Value>) -> Option<Value> {
        let remote = Arc::clone(&self.remote);
        let command = command.to_string();
        let label = command.clone();
        match tokio::task::spawn_blocking(move || remote.dispatch_request(&command, data.as_ref()))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(command = %label, error = %err, "remote dispatch task failed");
                None
            }
        }
    }

    async fn deliver(&self, operation: &SyncOperation) -> Result<(), RemoteFailure> {
        let remote = Arc::clone(&self.remote);
        let command = operation.command().to_string();
        let payload = operation.payload();
        match tokio::task::spawn_blocking(move || remote.deliver(&command, Some(&payload))).await {
            Ok(result) => result.map(|_| ()),
            Err(err) => {
                tracing::error!(operation = %operation, error = %err, "remote delivery task failed");
                Err(RemoteFailure::Unreachable)
            }
        }
    }

    /// Send each operation. Unreachable-server failures go to the outbox,
    /// refusals become dead letters. An operation is queued straight away
    /// while older ones are still waiting, keeping FIFO order.
    async fn propagate(&mut self, operations: Vec<SyncOperation>) {
        let mut changed = false;
        for operation in operations {
            if self.outbox.is_empty() {
                match self.deliver(&operation).await {
                    Ok(()) => {
                        tracing::info!(operation = %operation, "propagated");
                        continue;
                    }
                    Err(RemoteFailure::Rejected(reason)) => {
                        tracing::warn!(
                            operation = %operation,
                            reason = %reason,
                            "server refused operation, dropped",
                        );
                        self.outbox.reject(operation);
                        changed = true;
                        continue;
                    }
                    Err(RemoteFailure::Unreachable) => {
                        tracing::warn!(
                            operation = %operation,
                            "remote propagation failed, queued for retry",
                        );
                    }
                }
            } else {
                tracing::debug!(operation = %operation, "outbox not empty, queued behind it");
            }
            if let Some(evicted) = self.outbox.push(operation) {
                tracing::warn!(
                    operation = %evicted.operation,
                    attempts = evicted.attempts,
                    "outbox full, dropped oldest operation",
                );
            }
            changed = true;
        }
        if changed {
            self.save_outbox();
        }
    }

    async fn handle_fs_event(&mut self, event: FsEvent) {
        match self.translator.translate(&mut self.snapshot, &event) {
            Ok(operations) => self.propagate(operations).await,
            Err(err) => tracing::warn!(event = ?event, error = %err, "skipping filesystem event"),
        }
    }

    async fn handle_control(&mut self, command: ControlCommand) -> Option<ControlResponse> {
        match command {
            ControlCommand::RegisterUser { username, password } => {
                tracing::info!(username = %username, "registering user");
                let response = self
                    .dispatch(REGISTER_USER_COMMAND, Some(json!([username, password])))
                    .await;
                let message = match response {
                    Some(Value::Object(mut body)) if body.contains_key("message") => {
                        body.remove("message").unwrap_or(Value::Null)
                    }
                    Some(body) => body,
                    None => Value::from("remote server unavailable"),
                };
                Some(ControlResponse::new(message))
            }
            ControlCommand::Shutdown => {
                tracing::info!("shutdown requested over control channel");
                self.state = self.state.stop();
                Some(ControlResponse::new("daemon shutting down"))
            }
            ControlCommand::PassThrough { command, payload } => {
                let data = (!payload.is_null()).then_some(payload);
                match self.dispatch(&command, data).await {
                    Some(_) => tracing::info!(command = %command, "forwarded control command"),
                    None => tracing::warn!(command = %command, "forwarded control command failed"),
                }
                None
            }
        }
    }

    /// Deliver queued operations oldest first.
    ///
    /// A refused head becomes a dead letter. A head that keeps failing while
    /// the entry behind it goes through is set aside the same way; when both
    /// fail the server is taken to be down and the pass stops.
    async fn retry_outbox(&mut self) {
        let mut changed = false;
        while let Some(entry) = self.outbox.front() {
            let operation = entry.operation.clone();
            changed = true;
            match self.deliver(&operation).await {
                Ok(()) => {
                    self.outbox.pop_front();
                    tracing::info!(operation = %operation, "delivered queued operation");
                }
                Err(RemoteFailure::Rejected(reason)) => self.dead_letter(0, &reason),
                Err(RemoteFailure::Unreachable) => {
                    if self.server_answers_next().await {
                        self.dead_letter(0, "failed while later operations were accepted");
                    } else {
                        self.outbox.record_failure();
                        tracing::debug!(pending = self.outbox.len(), "remote still unavailable");
                        break;
                    }
                }
            }
        }
        if changed {
            self.save_outbox();
        }
    }

    /// Try the entry behind the head. True when the server answered it,
    /// whether it accepted or refused.
    async fn server_answers_next(&mut self) -> bool {
        let Some(entry) = self.outbox.get(1) else {
            return false;
        };
        let operation = entry.operation.clone();
        match self.deliver(&operation).await {
            Ok(()) => {
                self.outbox.remove(1);
                tracing::info!(operation = %operation, "delivered queued operation");
                true
            }
            Err(RemoteFailure::Rejected(reason)) => {
                self.dead_letter(1, &reason);
                true
            }
            Err(RemoteFailure::Unreachable) => false,
        }
    }

    fn dead_letter(&mut self, index: usize, reason: &str) {
        if let Some(entry) = self.outbox.dead_letter(index) {
            tracing::warn!(
                operation = %entry.operation,
                attempts = entry.attempts,
                reason,
                "queued operation set aside as dead letter",
            );
        }
    }

    fn save_outbox(&self) {
        if let Err(err) = outbox::save_at(&self.state_dir, &self.outbox) {
            tracing::warn!(error = %err, "failed to persist outbox");
        }
    }
}

/// A daemon that finished its startup sequence and is ready to serve.
pub struct Daemon {
    engine: Engine,
    listener: TcpListener,
    poll_timeout: Duration,
    retry_interval: Duration,
}

impl Daemon {
    /// Build the snapshot, reconcile against the server and bind the control
    /// listener. Fails when the server snapshot cannot be fetched.
    pub async fn start(config: &Config, remote: Arc<dyn RemoteClient>) -> Result<Self, DaemonError> {
        let root = prepare_root(&config.sharing_path)?;
        let filter = config.ignore_filter()?;
        let state_dir = config.state_dir()?;

        let snapshot = {
            let root = root.clone();
            let filter = filter.clone();
            tokio::task::spawn_blocking(move || syncbox_sync::build(&root, &filter))
                .await
                .map_err(|err| DaemonError::Protocol(format!("snapshot task join error: {err}")))??
        };

        let outbox = match outbox::load_at(&state_dir) {
            Ok(outbox) => outbox,
            Err(err) => {
                tracing::warn!(error = %err, "unreadable outbox, starting with an empty one");
                Outbox::new()
            }
        };
        if !outbox.is_empty() {
            tracing::info!(pending = outbox.len(), "loaded queued operations");
        }

        let mut engine = Engine {
            translator: EventTranslator::new(root, filter),
            snapshot,
            remote,
            outbox,
            state_dir,
            state: DaemonState::Down,
        };

        // Older local changes land before the server snapshot is taken.
        if !engine.outbox.is_empty() {
            engine.retry_outbox().await;
        }

        let response = engine
            .dispatch(SERVER_SNAPSHOT_COMMAND, None)
            .await
            .ok_or_else(|| {
                DaemonError::RemoteUnavailable(format!(
                    "could not fetch the server snapshot from {}",
                    config.server_address
                ))
            })?;
        let server = server_snapshot(response)?;
        let operations = syncbox_sync::reconcile(&mut engine.snapshot, &server);
        tracing::info!(
            local = engine.snapshot.len(),
            server = server.len(),
            operations = operations.len(),
            "reconciled with server",
        );
        // Reconciliation recomputes every pending difference from disk.
        if !engine.outbox.is_empty() {
            let superseded = engine.outbox.dead_letter_all();
            tracing::warn!(superseded, "queued operations superseded by reconciliation");
            engine.save_outbox();
        }
        engine.propagate(operations).await;

        let listener = bind_listener(&config.control_address(), config.backlog_listener_sock).await?;

        Ok(Self {
            engine,
            listener,
            poll_timeout: config.poll_timeout(),
            retry_interval: config.outbox_retry_interval(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DaemonError> {
        self.listener
            .local_addr()
            .map_err(|e| io_err("control listener", e))
    }

    pub fn state(&self) -> DaemonState {
        self.engine.state
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.engine.snapshot
    }

    pub fn root(&self) -> &Path {
        self.engine.translator.root()
    }

    /// Run the serving loop until shutdown. Returns the final state.
    pub async fn serve(mut self) -> Result<DaemonState, DaemonError> {
        let (fs_tx, mut fs_rx) = mpsc::channel::<RawChange>(FS_EVENT_QUEUE);
        let watcher = spawn_watcher(self.engine.translator.root(), fs_tx)?;

        let (job_tx, mut job_rx) = mpsc::channel::<ControlJob>(CONTROL_QUEUE);
        let (shutdown_tx, _) = broadcast::channel::<()>(16);
        let mut connections = JoinSet::new();
        let mut pairer = RenamePairer::new(self.poll_timeout);

        let mut tick = tokio::time::interval(self.poll_timeout);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_retry = Instant::now();

        self.engine.state = self.engine.state.start()?;
        tracing::info!(address = %self.local_addr()?, "daemon started");

        while self.engine.state.is_running() {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "control connection opened");
                        let jobs = job_tx.clone();
                        let shutdown_rx = shutdown_tx.subscribe();
                        connections.spawn(async move {
                            if let Err(err) = handle_control_client(stream, jobs, shutdown_rx).await {
                                tracing::warn!(peer = %peer, error = %err, "control connection closed");
                            }
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                },
                Some(joined) = connections.join_next() => {
                    if let Err(err) = joined {
                        tracing::error!(error = %err, "control connection task failed");
                    }
                }
                Some(job) = job_rx.recv() => {
                    let reply = self.engine.handle_control(job.command).await;
                    let _ = job.respond_to.send(reply);
                }
                Some(change) = fs_rx.recv() => {
                    for event in pairer.push(change, std::time::Instant::now()) {
                        self.engine.handle_fs_event(event).await;
                    }
                }
                _ = tick.tick() => {
                    for event in pairer.flush_expired(std::time::Instant::now()) {
                        self.engine.handle_fs_event(event).await;
                    }
                    if !self.engine.outbox.is_empty() && last_retry.elapsed() >= self.retry_interval {
                        self.engine.retry_outbox().await;
                        last_retry = Instant::now();
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => tracing::info!("received ctrl-c, shutting down daemon"),
                        Err(err) => tracing::error!(error = %err, "ctrl-c handler failed"),
                    }
                    self.engine.state = self.engine.state.stop();
                }
            }
        }

        let _ = shutdown_tx.send(());
        // Queued jobs are dropped so waiting connections see a closed reply.
        drop(job_rx);
        drop(fs_rx);
        drop(watcher);
        drop(self.listener);

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = connections.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "control connection task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("control connections still open after grace period, aborting");
            connections.shutdown().await;
        }

        self.engine.save_outbox();
        tracing::info!(state = %self.engine.state, "daemon stopped");
        Ok(self.engine.state)
    }
}

async fn handle_control_client(
    stream: TcpStream,
    jobs: mpsc::Sender<ControlJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let message: Option<Value> = tokio::select! {
            _ = shutdown_rx.recv() => break,
            frame = read_frame(&mut reader) => frame?,
        };
        let Some(message) = message else { break };

        let entries = match decode_message(message) {
            Ok(entries) => entries,
            Err(err) => {
                write_frame(&mut writer, &ControlResponse::new(err.to_string())).await?;
                continue;
            }
        };

        for (name, payload) in entries {
            let command = match ControlCommand::decode(&name, payload) {
                Ok(command) => command,
                Err(err) => {
                    write_frame(&mut writer, &ControlResponse::new(err.to_string())).await?;
                    continue;
                }
            };
            let (tx, rx) = oneshot::channel();
            jobs.send(ControlJob {
                command,
                respond_to: tx,
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("control queue"))?;
            let reply = rx
                .await
                .map_err(|_| DaemonError::ChannelClosed("control response"))?;
            if let Some(reply) = reply {
                write_frame(&mut writer, &reply).await?;
            }
        }
    }

    Ok(())
}

/// Extract the `files` mapping from a `get_server_snapshot` response.
fn server_snapshot(response: Value) -> Result<Snapshot, DaemonError> {
    let files = match response {
        Value::Object(mut body) => body.remove("files"),
        _ => None,
    }
    .ok_or_else(|| {
        DaemonError::RemoteUnavailable("server snapshot response has no `files` mapping".into())
    })?;
    serde_json::from_value(files)
        .map_err(|err| DaemonError::RemoteUnavailable(format!("malformed server snapshot: {err}")))
}

fn prepare_root(sharing_path: &Path) -> Result<PathBuf, DaemonError> {
    if !sharing_path.exists() {
        fs::create_dir_all(sharing_path).map_err(|e| io_err(sharing_path, e))?;
        tracing::info!(path = %sharing_path.display(), "created sharing folder");
    }
    // Watcher paths arrive canonicalized (e.g. /private/var on macOS).
    fs::canonicalize(sharing_path).map_err(|e| io_err(sharing_path, e))
}

async fn bind_listener(address: &str, backlog: u32) -> Result<TcpListener, DaemonError> {
    let addr = tokio::net::lookup_host(address)
        .await
        .map_err(|e| io_err(address, e))?
        .next()
        .ok_or_else(|| DaemonError::Protocol(format!("control address {address} did not resolve")))?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| io_err(address, e))?;
    socket.set_reuseaddr(true).map_err(|e| io_err(address, e))?;
    socket.bind(addr).map_err(|e| io_err(address, e))?;
    socket.listen(backlog).map_err(|e| io_err(address, e))
}

/// Start the daemon with the HTTP remote and serve until shutdown.
pub async fn run(config: Config) -> Result<DaemonState, DaemonError> {
    let remote: Arc<dyn RemoteClient> = Arc::new(HttpRemote::from_config(&config));
    let daemon = Daemon::start(&config, remote).await?;
    daemon.serve().await
}

/// Load `config_path`, start the runtime and block until the daemon stops.
pub fn start_blocking(config_path: &Path) -> Result<DaemonState, DaemonError> {
    init_tracing();
    let config = Config::load_at(config_path)?;
    tracing::info!(
        config = %config_path.display(),
        sharing_path = %config.sharing_path.display(),
        "loaded configuration",
    );
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
