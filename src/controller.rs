/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::{
    AnalysisResult, Color, EngineError, EngineProcess, EngineSettings, Launcher, ProcessKiller,
    SystemLauncher, UciClient,
};

/// Receives failures that the user should see but no caller is waiting for,
/// such as an engine that cannot be started after a settings change.
///
/// Runs without any controller lock held, so it may call back into the controller.
pub type ErrorSink = Box<dyn Fn(&EngineError) + Send + Sync>;

/// The eventual outcome of [`EngineController::analyze_position`].
///
/// Resolves exactly once. Requests that never reach the engine, because it was
/// replaced or the controller shut down, resolve to [`EngineError::Abandoned`].
#[derive(Debug)]
#[must_use = "an analysis result is only delivered through its handle"]
pub struct PendingAnalysis {
    receiver: Receiver<Result<AnalysisResult, EngineError>>,
}

impl PendingAnalysis {
    /// A handle that is already resolved with `result`.
    fn resolved(result: Result<AnalysisResult, EngineError>) -> Self {
        let (sender, receiver) = mpsc::channel();
        // Cannot fail: `receiver` is still alive
        let _ = sender.send(result);
        Self { receiver }
    }

    /// Blocks until the analysis finishes.
    pub fn wait(self) -> Result<AnalysisResult, EngineError> {
        self.receiver.recv().unwrap_or(Err(EngineError::Abandoned))
    }

    /// Blocks for at most `timeout`, returning `None` if the analysis is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<AnalysisResult, EngineError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(EngineError::Abandoned)),
        }
    }

    /// Returns the outcome if the analysis already finished, without blocking.
    pub fn try_wait(&self) -> Option<Result<AnalysisResult, EngineError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(EngineError::Abandoned)),
        }
    }
}

/// One queued analysis request.
struct Job {
    fen: String,
    movetime: Duration,

    /// The client generation this job was queued against.
    generation: u64,

    reply: Sender<Result<AnalysisResult, EngineError>>,
}

impl Job {
    fn resolve(self, result: Result<AnalysisResult, EngineError>) {
        // The caller may have dropped its handle; nobody is left to tell
        let _ = self.reply.send(result);
    }
}

/// The bound client and what it was started with.
struct Session<P: EngineProcess> {
    client: Option<UciClient<P>>,
    path: Option<String>,

    /// The settings last pushed to `client`.
    applied: Option<EngineSettings>,
}

/// State shared between the controller and its worker.
struct Shared<P: EngineProcess> {
    /// Held by the worker for the whole duration of a search, so the client can
    /// never be swapped out from under it.
    session: Mutex<Session<P>>,

    /// The most recent snapshot given to `apply_settings`, whether or not an engine runs.
    settings: Mutex<Option<EngineSettings>>,

    /// Mirrors whether `session` holds a ready client, readable without waiting for a search.
    ready: AtomicBool,

    /// Bumped every time the bound client is replaced or removed.
    generation: AtomicU64,

    /// Set once by `shutdown`.
    closed: AtomicBool,

    /// Kills the bound client's process without taking the `session` lock.
    killer: Mutex<Option<ProcessKiller>>,
}

impl<P: EngineProcess> Shared<P> {
    /// Shuts down the bound client, if any, and forgets everything cached about it.
    fn unbind(&self, session: &mut Session<P>) {
        self.ready.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.killer.lock() = None;

        if let Some(mut client) = session.client.take() {
            info!("disabling engine");
            client.shutdown();
        }
        session.path = None;
        session.applied = None;
    }

    fn bind(&self, session: &mut Session<P>, client: UciClient<P>, path: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.killer.lock() = client.process_killer();
        session.client = Some(client);
        session.path = Some(path.to_string());
        self.ready.store(true, Ordering::Release);
    }
}

/// Runs an engine on behalf of many callers.
///
/// The controller keeps at most one engine process alive, starting, reconfiguring
/// or stopping it as settings change. Analysis requests go through a FIFO queue
/// served by a single worker thread, because UCI has no request IDs: two searches
/// interleaved on one process would corrupt each other's output.
///
/// Lifecycle calls ([`EngineController::apply_settings`], [`EngineController::shutdown`])
/// run on the caller's thread and may block while an engine starts (bounded by the
/// handshake timeout) or while an in-flight search finishes.
pub struct EngineController<L: Launcher = SystemLauncher> {
    launcher: L,
    shared: Arc<Shared<L::Process>>,
    jobs: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    error_sink: ErrorSink,
}

impl EngineController<SystemLauncher> {
    /// Creates a controller that runs real engine executables.
    pub fn new(
        error_sink: impl Fn(&EngineError) + Send + Sync + 'static,
    ) -> Result<Self, EngineError> {
        Self::with_launcher(SystemLauncher, error_sink)
    }
}

impl<L: Launcher> EngineController<L>
where
    L::Process: 'static,
{
    /// Creates a controller that starts engines through `launcher`.
    ///
    /// No engine is started until [`EngineController::apply_settings`] enables one.
    pub fn with_launcher(
        launcher: L,
        error_sink: impl Fn(&EngineError) + Send + Sync + 'static,
    ) -> Result<Self, EngineError> {
        let shared = Arc::new(Shared {
            session: Mutex::new(Session {
                client: None,
                path: None,
                applied: None,
            }),
            settings: Mutex::new(None),
            ready: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            killer: Mutex::new(None),
        });

        let (sender, receiver) = mpsc::channel();
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("uci-analysis".into())
                .spawn(move || run_worker(&shared, receiver))
                .map_err(EngineError::Worker)?
        };

        Ok(Self {
            launcher,
            shared,
            jobs: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            error_sink: Box::new(error_sink),
        })
    }
}

impl<L: Launcher> EngineController<L> {
    /// Reconciles the engine process with `settings`.
    ///
    /// - `None` or a disabled snapshot stops any running engine.
    /// - An enabled snapshot without an executable path stops the engine and reports
    ///   [`EngineError::MissingExecutable`] to the error sink.
    /// - If a ready engine already runs from the same path, it is kept and only
    ///   its options are updated.
    /// - Otherwise any running engine is stopped and a new one is started. If that
    ///   fails, the error goes to the error sink and the controller stays disabled.
    ///
    /// Requests queued against an engine that gets replaced are abandoned.
    /// Ignored after [`EngineController::shutdown`].
    pub fn apply_settings(&self, settings: Option<EngineSettings>) {
        if self.shared.closed.load(Ordering::Acquire) {
            warn!("ignoring engine settings after shutdown");
            return;
        }

        debug!("applying engine settings");
        *self.shared.settings.lock() = settings.clone();

        let Some(settings) = settings.filter(|s| s.enabled) else {
            info!("engine disabled by settings");
            self.disable();
            return;
        };

        if settings.executable_path.trim().is_empty() {
            warn!("engine enabled but no executable path is configured");
            self.disable();
            self.notify(&EngineError::MissingExecutable);
            return;
        }

        // The sink may call back into the controller, so it only runs once the session is released
        let mut session = self.shared.session.lock();
        let result = self.reconcile(&mut session, settings);
        drop(session);

        if let Err(err) = result {
            self.notify(&err);
        }
    }

    /// Reuses, reconfigures or replaces the bound client to match `settings`.
    fn reconcile(
        &self,
        session: &mut Session<L::Process>,
        settings: EngineSettings,
    ) -> Result<(), EngineError> {
        let path = settings.executable_path.clone();
        let reusable = session.path.as_deref() == Some(path.as_str())
            && session.client.as_ref().is_some_and(UciClient::is_ready);

        if reusable {
            if session.applied.as_ref() == Some(&settings) {
                debug!("engine settings unchanged");
                return Ok(());
            }
            debug!("engine already running from {path:?}, updating options");
            return configure(session, settings);
        }

        self.shared.unbind(session);

        info!("starting engine at {path:?}");
        let mut client = UciClient::new();
        if let Err(err) = client.try_initialize(&self.launcher, &path) {
            error!("failed to initialize engine at {path:?}: {err}");
            return Err(EngineError::Initialization {
                path,
                source: Box::new(err),
            });
        }

        self.shared.bind(session, client, &path);
        configure(session, settings)
    }

    /// Stops the running engine, if any. Queued requests for it are abandoned.
    pub fn disable(&self) {
        let mut session = self.shared.session.lock();
        self.shared.unbind(&mut session);
    }

    /// Whether an engine is bound and has completed its handshake.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// The most recently applied settings.
    pub fn settings(&self) -> Option<EngineSettings> {
        self.shared.settings.lock().clone()
    }

    /// The side the engine is configured to play, regardless of whether it is running.
    pub fn engine_side(&self) -> Option<Color> {
        self.shared
            .settings
            .lock()
            .as_ref()
            .and_then(|settings| settings.plays_as.color())
    }

    /// Whether the engine should make moves for one side right now.
    pub fn plays_as_opponent(&self) -> bool {
        self.engine_side().is_some() && self.is_ready()
    }

    /// Queues `fen` for analysis with the configured thinking time.
    ///
    /// Never blocks. If no engine is ready the handle is already resolved with
    /// [`EngineError::NotReady`]. Requests are served strictly in submission order.
    pub fn analyze_position(&self, fen: &str) -> PendingAnalysis {
        if !self.is_ready() {
            warn!("analysis requested but engine is not ready");
            return PendingAnalysis::resolved(Err(EngineError::NotReady));
        }

        let movetime = self.shared.settings.lock().as_ref().map(EngineSettings::thinking_time);
        let Some(movetime) = movetime else {
            return PendingAnalysis::resolved(Err(EngineError::NotReady));
        };

        let jobs = self.jobs.lock();
        let Some(sender) = jobs.as_ref() else {
            return PendingAnalysis::resolved(Err(EngineError::ShutDown));
        };

        debug!("queueing position for analysis: {fen}");
        let (reply, receiver) = mpsc::channel();
        let job = Job {
            fen: fen.to_string(),
            movetime,
            generation: self.shared.generation.load(Ordering::Acquire),
            reply,
        };
        if sender.send(job).is_err() {
            // The worker is gone; dropping the job rejects the handle as abandoned
            warn!("analysis worker is not running");
        }

        PendingAnalysis { receiver }
    }

    /// Stops the engine and the worker.
    ///
    /// A search in progress is cut short by killing the engine process. Queued
    /// requests are abandoned, and later requests are rejected with [`EngineError::ShutDown`].
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down engine controller");
        drop(self.jobs.lock().take());

        let mut session = match self.shared.session.try_lock() {
            Some(session) => session,
            None => {
                // The worker is mid-search; killing the engine makes its read fail
                let killer = self.shared.killer.lock().clone();
                if let Some(killer) = killer {
                    debug!("killing engine to interrupt the running search");
                    if let Err(err) = killer.kill() {
                        warn!("failed to kill engine: {err}");
                    }
                }
                self.shared.session.lock()
            }
        };
        self.shared.unbind(&mut session);
        drop(session);

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("analysis worker panicked");
            }
        }
    }

    fn notify(&self, err: &EngineError) {
        (self.error_sink)(err);
    }
}

impl<L: Launcher> Drop for EngineController<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pushes skill level, threads and hash size to the bound client.
///
/// `settings` only counts as applied once every option was written.
fn configure<P: EngineProcess>(
    session: &mut Session<P>,
    settings: EngineSettings,
) -> Result<(), EngineError> {
    let Some(client) = session.client.as_mut() else {
        return Ok(());
    };

    debug!(
        "configuring engine: skill={}, threads={}, hash={}MB",
        settings.skill_level, settings.threads, settings.hash_size_mb
    );
    for cmd in settings.option_commands() {
        if let Err(err) = client.send_option(&cmd) {
            error!("failed to configure engine: {err}");
            return Err(err);
        }
    }
    session.applied = Some(settings);
    Ok(())
}

/// Serves queued jobs one at a time until every sender is gone.
fn run_worker<P: EngineProcess>(shared: &Shared<P>, jobs: Receiver<Job>) {
    for job in jobs {
        if shared.closed.load(Ordering::Acquire) {
            job.resolve(Err(EngineError::Abandoned));
            continue;
        }

        let mut session = shared.session.lock();
        if job.generation != shared.generation.load(Ordering::Acquire) {
            debug!("dropping analysis queued for a replaced engine");
            drop(session);
            job.resolve(Err(EngineError::Abandoned));
            continue;
        }

        let result = match session.client.as_mut() {
            Some(client) if client.is_ready() => client.analyze(&job.fen, job.movetime),
            _ => Err(EngineError::NotReady),
        };
        let ready = session.client.as_ref().is_some_and(UciClient::is_ready);
        shared.ready.store(ready, Ordering::Release);
        drop(session);

        match &result {
            Ok(result) => debug!(
                "analysis result: bestmove={:?}, eval={:?}",
                result.best_move, result.evaluation
            ),
            Err(err) => error!("analysis of {:?} failed: {err}", job.fen),
        }
        job.resolve(result);
    }
    debug!("analysis worker stopped");
}
