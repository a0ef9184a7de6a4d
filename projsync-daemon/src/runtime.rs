use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;

use projsync_adapters::SourceAdapter;
use projsync_core::config::{config_path_at, BaselineConfig, BaselinePolicy, Config};
use projsync_core::SourceId;
use projsync_engine::{CycleReport, Engine, FailureSet};

use crate::error::{io_err, DaemonError};
use crate::log_rotation::LogRotation;
use crate::paths::{socket_path, LOG_ROTATION_INTERVAL};
use crate::protocol::{DaemonRequest, DaemonResponse};

type SharedEngine = Arc<Mutex<Engine>>;
type SharedStatus = Arc<RwLock<DaemonStatus>>;

// ---------------------------------------------------------------------------
// Settings and status
// ---------------------------------------------------------------------------

/// Everything the runtime needs besides the engine.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub poll_interval: Duration,
    pub baseline: BaselineConfig,
    pub socket: PathBuf,
    pub log_file: PathBuf,
    /// `None` disables the rotation task.
    pub log_rotation: Option<LogRotation>,
}

impl DaemonSettings {
    pub fn from_config(home: &Path, config: &Config) -> Self {
        let log_file = config.log_file_at(home);
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            baseline: config.baseline.clone(),
            socket: socket_path(home),
            log_rotation: Some(LogRotation::new(&log_file, &config.log)),
            log_file,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AcquiringBaselines,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceBaseline {
    pub source: SourceId,
    pub captured: bool,
    pub identities: usize,
}

/// Payload of the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub phase: Phase,
    pub baseline_policy: BaselinePolicy,
    pub poll_interval_secs: u64,
    pub baselines: Vec<SourceBaseline>,
    pub cycles: u64,
    pub last_cycle: Option<CycleReport>,
    pub last_failures: FailureSet,
    pub socket: PathBuf,
    pub log_file: PathBuf,
}

/// Engine state copied out while the engine lock is held.
struct EngineView {
    baselines: Vec<SourceBaseline>,
    cycles: u64,
    last_failures: FailureSet,
}

impl EngineView {
    fn of(engine: &Engine) -> Self {
        Self {
            baselines: engine
                .baselines()
                .iter()
                .map(|(source, state)| SourceBaseline {
                    source: source.clone(),
                    captured: state.is_captured(),
                    identities: state.identities().map(|set| set.len()).unwrap_or(0),
                })
                .collect(),
            cycles: engine.cycles(),
            last_failures: engine.last_failures().clone(),
        }
    }
}

impl DaemonStatus {
    fn new(settings: &DaemonSettings, engine: &Engine) -> Self {
        let mut status = Self {
            running: true,
            pid: std::process::id(),
            started_at: Utc::now(),
            phase: match settings.baseline.policy {
                BaselinePolicy::Blocking => Phase::AcquiringBaselines,
                BaselinePolicy::Lazy => Phase::Polling,
            },
            baseline_policy: settings.baseline.policy,
            poll_interval_secs: settings.poll_interval.as_secs(),
            baselines: Vec::new(),
            cycles: 0,
            last_cycle: None,
            last_failures: FailureSet::new(),
            socket: settings.socket.clone(),
            log_file: settings.log_file.clone(),
        };
        status.apply(EngineView::of(engine));
        status
    }

    fn apply(&mut self, view: EngineView) {
        self.baselines = view.baselines;
        self.cycles = view.cycles;
        self.last_failures = view.last_failures;
    }
}

struct CycleJob {
    respond_to: oneshot::Sender<Result<CycleReport, String>>,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Load the config, install logging and block the current thread until the
/// daemon exits. `config_path` defaults to `<home>/.projsync/config.yaml`.
pub fn start_blocking(home: &Path, config_path: Option<&Path>) -> Result<(), DaemonError> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config_path_at(home));
    let config = Config::load_from(&config_path)?;
    crate::logging::init(&config.log, &config.log_file_at(home))?;
    tracing::info!(config = %config_path.display(), "configuration loaded");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Build the adapters from `config`, prepare them and run until shutdown.
pub async fn run(home: PathBuf, config: Config) -> Result<(), DaemonError> {
    let settings = DaemonSettings::from_config(&home, &config);
    let adapters = projsync_adapters::build_all(&config)?;
    prepare_sources(&adapters);
    run_engine(Engine::new(adapters), settings).await
}

/// Run the daemon tasks around an already-built engine.
pub async fn run_engine(engine: Engine, settings: DaemonSettings) -> Result<(), DaemonError> {
    tracing::info!(
        pid = std::process::id(),
        sources = engine.adapters().len(),
        policy = ?settings.baseline.policy,
        poll_interval_secs = settings.poll_interval.as_secs(),
        "projsync daemon starting",
    );

    let status = Arc::new(RwLock::new(DaemonStatus::new(&settings, &engine)));
    let engine = Arc::new(Mutex::new(engine));
    let (job_tx, job_rx) = mpsc::channel::<CycleJob>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let driver_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let engine = engine.clone();
        let status = status.clone();
        let settings = settings.clone();
        tokio::spawn(async move {
            let result = driver_task(engine, status, settings, job_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let socket = settings.socket.clone();
        let status = status.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(socket, status, job_tx, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let rotation = settings.log_rotation.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(rotation, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { signal_task(shutdown, shutdown_rx).await })
    };

    let (driver_result, socket_result, rotation_result, signal_result) =
        tokio::join!(driver_handle, socket_handle, rotation_handle, signal_handle);

    handle_join("driver", driver_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("projsync daemon stopped");
    Ok(())
}

/// Start-up preparation of every source. Failures are logged; the source
/// then simply reads as unavailable.
fn prepare_sources(adapters: &[Box<dyn SourceAdapter>]) {
    for adapter in adapters {
        if let Err(err) = adapter.prepare() {
            tracing::error!(source = %adapter.id(), error = %err, "source preparation failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Polling driver
// ---------------------------------------------------------------------------

/// Runs cycles strictly one after another. Shutdown and run-now requests are
/// only observed between cycles; a "sync" request that arrives during
/// blocking baseline acquisition waits for it to finish.
async fn driver_task(
    engine: SharedEngine,
    status: SharedStatus,
    settings: DaemonSettings,
    mut jobs: mpsc::Receiver<CycleJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if settings.baseline.policy == BaselinePolicy::Blocking
        && !acquire_baselines(&engine, &status, &settings.baseline, &mut shutdown_rx).await
    {
        return Ok(());
    }
    status.write().await.phase = Phase::Polling;

    let mut interval = tokio::time::interval(settings.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if let Err(err) = run_cycle(&engine, &status).await {
                    tracing::error!(error = %err, "reconciliation cycle aborted");
                }
                interval.reset();
            }
            job = jobs.recv() => {
                let Some(job) = job else { break };
                let outcome = run_cycle(&engine, &status).await.map_err(|err| {
                    tracing::error!(error = %err, "requested cycle aborted");
                    err.to_string()
                });
                let _ = job.respond_to.send(outcome);
                interval.reset();
            }
        }
    }
    Ok(())
}

/// Blocking baseline acquisition: rounds of capture attempts with doubling
/// back-off. Returns `false` if shutdown was requested while waiting.
async fn acquire_baselines(
    engine: &SharedEngine,
    status: &SharedStatus,
    config: &BaselineConfig,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> bool {
    let max_delay = Duration::from_millis(config.max_backoff_ms);
    let mut delay = Duration::from_millis(config.initial_backoff_ms).min(max_delay);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let shared = engine.clone();
        let round = tokio::task::spawn_blocking(move || {
            let mut engine = lock(&shared);
            let pending = engine.try_capture_baselines();
            (pending, EngineView::of(&engine))
        })
        .await;
        let pending = match round {
            Ok((pending, view)) => {
                status.write().await.apply(view);
                pending
            }
            Err(err) => {
                tracing::error!(attempt, error = %err, "baseline capture round aborted");
                lock(engine).baselines().pending_sources()
            }
        };

        if pending.is_empty() {
            tracing::info!(attempts = attempt, "all baselines captured");
            return true;
        }
        let names = join_ids(&pending);
        if config.max_attempts.is_some_and(|max| attempt >= max) {
            tracing::warn!(
                attempts = attempt,
                pending = %names,
                "sources still unavailable, capturing their baselines lazily",
            );
            return true;
        }

        tracing::info!(
            attempt,
            pending = %names,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "waiting for sources to become available",
        );
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("shutdown requested during baseline acquisition");
                return false;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_backoff(delay, max_delay);
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

async fn run_cycle(engine: &SharedEngine, status: &SharedStatus) -> Result<CycleReport, DaemonError> {
    let shared = engine.clone();
    let (report, view) = tokio::task::spawn_blocking(move || {
        let mut engine = lock(&shared);
        let report = engine.run_cycle();
        (report, EngineView::of(&engine))
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("cycle task failed: {err}")))?;

    let mut status = status.write().await;
    status.apply(view);
    status.last_cycle = Some(report.clone());
    Ok(report)
}

/// A cycle that panicked leaves the engine consistent: the baseline advance
/// only runs after every adapter call has returned.
fn lock(engine: &Mutex<Engine>) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_ids(ids: &[SourceId]) -> String {
    ids.iter().map(SourceId::as_str).collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

async fn socket_server_task(
    socket: PathBuf,
    status: SharedStatus,
    job_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if let Some(dir) = socket.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::debug!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let status = status.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, status, job_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    status: SharedStatus,
    job_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => {
                let snapshot = status.read().await.clone();
                DaemonResponse::ok(serde_json::to_value(snapshot)?)
            }
            "sync" => match request_cycle(&job_tx).await {
                Ok(report) => DaemonResponse::ok(serde_json::to_value(report)?),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "stop" => {
                tracing::info!("stop requested over control socket");
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn request_cycle(job_tx: &mpsc::Sender<CycleJob>) -> Result<CycleReport, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(CycleJob { respond_to: tx })
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle queue"))?;
    rx.await
        .map_err(|_| DaemonError::ChannelClosed("cycle response"))?
        .map_err(DaemonError::Protocol)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

// ---------------------------------------------------------------------------
// Log rotation and signals
// ---------------------------------------------------------------------------

async fn log_rotation_task(
    rotation: Option<LogRotation>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(rotation) = rotation else {
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut interval = tokio::time::interval(LOG_ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let rotation = rotation.clone();
                // Outcome is logged by run_once.
                let _ = tokio::task::spawn_blocking(move || rotation.run_once()).await;
            }
        }
    }
    Ok(())
}

async fn signal_task(
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;

    tokio::select! {
        _ = shutdown_rx.recv() => return Ok(()),
        received = tokio::signal::ctrl_c() => {
            received.map_err(|e| io_err("ctrl-c handler", e))?;
            tracing::info!("received interrupt, shutting down after the current cycle");
        }
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down after the current cycle");
        }
    }
    let _ = shutdown.send(());
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use projsync_core::{Attributes, IdentitySet, ProjectIdentity, SourceRead};
    use tempfile::TempDir;

    /// Unavailable until it has been listed `down_for` times.
    struct Flaky {
        id: SourceId,
        live: IdentitySet,
        down_for: usize,
        reads: Arc<AtomicUsize>,
    }

    impl SourceAdapter for Flaky {
        fn id(&self) -> &SourceId {
            &self.id
        }

        fn list_identities(&self) -> SourceRead {
            let seen = self.reads.fetch_add(1, Ordering::SeqCst);
            if seen < self.down_for {
                SourceRead::unavailable()
            } else {
                SourceRead::available(self.live.clone())
            }
        }

        fn create_identity(&self, _identity: &ProjectIdentity, _attributes: &Attributes) -> bool {
            true
        }
    }

    fn flaky(down_for: usize) -> (SharedEngine, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let adapter = Flaky {
            id: SourceId::from("remote"),
            live: [ProjectIdentity::from("A")].into_iter().collect(),
            down_for,
            reads: reads.clone(),
        };
        let engine = Engine::new(vec![Box::new(adapter)]);
        (Arc::new(Mutex::new(engine)), reads)
    }

    fn settings(dir: &TempDir, baseline: BaselineConfig) -> DaemonSettings {
        DaemonSettings {
            poll_interval: Duration::from_secs(3600),
            baseline,
            socket: dir.path().join("daemon.sock"),
            log_file: dir.path().join("projsync.log"),
            log_rotation: None,
        }
    }

    fn blocking(max_attempts: Option<u32>) -> BaselineConfig {
        BaselineConfig {
            policy: BaselinePolicy::Blocking,
            initial_backoff_ms: 10,
            max_backoff_ms: 40,
            max_attempts,
        }
    }

    fn lazy() -> BaselineConfig {
        BaselineConfig {
            policy: BaselinePolicy::Lazy,
            ..BaselineConfig::default()
        }
    }

    fn status_for(dir: &TempDir, engine: &SharedEngine, baseline: BaselineConfig) -> SharedStatus {
        let guard = engine.lock().unwrap();
        Arc::new(RwLock::new(DaemonStatus::new(&settings(dir, baseline), &guard)))
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let max = Duration::from_millis(30_000);
        let mut delay = Duration::from_millis(500);
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(delay.as_millis());
            delay = next_backoff(delay, max);
        }
        assert_eq!(seen, [500, 1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquisition_retries_until_the_source_answers() {
        let dir = TempDir::new().unwrap();
        let (engine, reads) = flaky(2);
        let status = status_for(&dir, &engine, blocking(None));
        let (_tx, mut rx) = broadcast::channel::<()>(1);

        let done = acquire_baselines(&engine, &status, &blocking(None), &mut rx).await;

        assert!(done);
        assert_eq!(reads.load(Ordering::SeqCst), 3);
        let status = status.read().await;
        assert!(status.baselines.iter().all(|b| b.captured));
        assert_eq!(status.baselines[0].identities, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquisition_falls_back_to_lazy_after_max_attempts() {
        let dir = TempDir::new().unwrap();
        let (engine, reads) = flaky(usize::MAX);
        let status = status_for(&dir, &engine, blocking(Some(3)));
        let (_tx, mut rx) = broadcast::channel::<()>(1);

        let done = acquire_baselines(&engine, &status, &blocking(Some(3)), &mut rx).await;

        assert!(done, "fallback continues into polling");
        assert_eq!(reads.load(Ordering::SeqCst), 3);
        assert!(!engine.lock().unwrap().baselines().all_captured());
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquisition_honours_shutdown() {
        let dir = TempDir::new().unwrap();
        let (engine, reads) = flaky(usize::MAX);
        let status = status_for(&dir, &engine, blocking(None));
        let (tx, mut rx) = broadcast::channel::<()>(1);
        tx.send(()).unwrap();

        let done = acquire_baselines(&engine, &status, &blocking(None), &mut rx).await;

        assert!(!done);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    /// Panics on its first read, then answers normally.
    struct PanicsOnce {
        id: SourceId,
        reads: Arc<AtomicUsize>,
    }

    impl SourceAdapter for PanicsOnce {
        fn id(&self) -> &SourceId {
            &self.id
        }

        fn list_identities(&self) -> SourceRead {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("adapter bug");
            }
            SourceRead::available([ProjectIdentity::from("A")].into_iter().collect())
        }

        fn create_identity(&self, _identity: &ProjectIdentity, _attributes: &Attributes) -> bool {
            true
        }
    }

    fn panics_once() -> SharedEngine {
        let adapter = PanicsOnce {
            id: SourceId::from("buggy"),
            reads: Arc::new(AtomicUsize::new(0)),
        };
        Arc::new(Mutex::new(Engine::new(vec![Box::new(adapter)])))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_cycle_is_an_error_and_the_engine_stays_usable() {
        let dir = TempDir::new().unwrap();
        let engine = panics_once();
        let status = status_for(&dir, &engine, lazy());

        let err = run_cycle(&engine, &status).await.unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(ref m) if m.contains("cycle task failed")));

        let report = run_cycle(&engine, &status).await.expect("second cycle");
        assert_eq!(report.cycle, 2);
        assert_eq!(status.read().await.cycles, 2);
        assert!(lock(&engine).baselines().all_captured());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn driver_keeps_polling_after_a_panicking_cycle() {
        let dir = TempDir::new().unwrap();
        let engine = panics_once();
        let status = status_for(&dir, &engine, lazy());
        let mut settings = settings(&dir, lazy());
        settings.poll_interval = Duration::from_millis(20);
        let (_job_tx, job_rx) = mpsc::channel::<CycleJob>(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let driver = tokio::spawn(driver_task(
            engine.clone(),
            status.clone(),
            settings,
            job_rx,
            shutdown_rx,
        ));

        let mut polled = false;
        for _ in 0..250 {
            if status.read().await.cycles >= 2 {
                polled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(polled, "driver stopped after the panicking cycle");
        assert!(!driver.is_finished());

        shutdown_tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .expect("driver exits on shutdown")
            .expect("driver task");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn status_payload_serializes_phase_and_baselines() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = flaky(0);
        let status = status_for(&dir, &engine, blocking(None));
        let payload = serde_json::to_value(status.read().await.clone()).unwrap();

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["phase"], json!("acquiring_baselines"));
        assert_eq!(payload["baseline_policy"], json!("blocking"));
        assert_eq!(payload["baselines"][0]["source"], json!("remote"));
        assert_eq!(payload["baselines"][0]["captured"], json!(false));
        assert!(payload["last_cycle"].is_null());
    }

    #[test]
    fn stale_socket_file_is_removed_before_bind() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, b"").unwrap();
        prepare_socket_for_bind(&socket).unwrap();
        assert!(!socket.exists());
    }

    #[test]
    fn settings_follow_config() {
        let home = TempDir::new().unwrap();
        let config = Config::from_yaml_str(
            "poll_interval_secs: 7\nsources:\n  - id: dirs\n    kind: filesystem\n    root: /tmp/x\n",
            Path::new("inline"),
        )
        .unwrap();
        let settings = DaemonSettings::from_config(home.path(), &config);
        assert_eq!(settings.poll_interval, Duration::from_secs(7));
        assert_eq!(settings.socket, home.path().join(".projsync/run/daemon.sock"));
        assert_eq!(
            settings.log_rotation.map(|r| r.path),
            Some(home.path().join(".projsync/logs/projsync.log"))
        );
    }
}
