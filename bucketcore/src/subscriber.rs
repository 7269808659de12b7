//! The competing subscriber: one orchestration loop per subscription.
//!
//! Every instance of an endpoint tails the whole log from the beginning. The
//! loop routes each event through bucket assignment and dispatches only the
//! events of buckets this instance owns. All claim state lives inside the
//! loop. Heartbeat and coverage timers are arms of the loop's `select!`
//! ahead of any event source, and store I/O for periodic work runs in tasks
//! whose reports come back into the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bucketcore_types::{
    BucketId, BucketKey, ConsumerId, DispatchError, DispatchedEvent, Dispatcher, DropReason,
    EventLog, LogEntry, LogPosition, Operation, OwnershipOutcome, OwnershipStore,
    OwnershipStoreError, ReaderSignal, StartPosition,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::adoption::AdoptionJob;
use crate::assignment::BucketAssigner;
use crate::claims::{AdoptionId, ClaimState, Route};
use crate::config::{AdoptionReplay, CompetingConfig};
use crate::errors::SubscriberError;
use crate::heartbeat::{run_heartbeat_cycle, HeartbeatContext, HeartbeatReport, Orphan};
use crate::inbox::{
    AdoptionReports, AdoptionSignal, Command, Inbox, ADOPTION_CAPACITY, INBOX_CAPACITY,
};
use crate::pause::{count_uncovered, PauseCommand, PauseMonitor};
use crate::reader::LiveEventReader;

/// Callback invoked with the reason and underlying fault when the primary
/// subscription drops abnormally.
pub type DroppedCallback = Arc<dyn Fn(&DropReason, Option<&str>) + Send + Sync>;

/// A competing consumer for one endpoint.
///
/// Construct one per process with the shared ownership store, the event log
/// and the dispatcher that executes side effects, then call
/// [`subscribe_to_all`](Self::subscribe_to_all).
pub struct CompetingSubscriber<S, L, D> {
    config: CompetingConfig,
    consumer_id: ConsumerId,
    store: Arc<S>,
    log: Arc<L>,
    dispatcher: Arc<D>,
    on_dropped: Option<DroppedCallback>,
}

impl<S, L, D> CompetingSubscriber<S, L, D>
where
    S: OwnershipStore + 'static,
    L: EventLog + 'static,
    D: Dispatcher + 'static,
{
    /// Create a subscriber with a freshly generated consumer id.
    ///
    /// When the pause monitor is enabled the dispatcher starts paused and is
    /// resumed by the first coverage cycle that finds every bucket owned.
    pub async fn new(config: CompetingConfig, store: S, log: L, dispatcher: D) -> Self {
        dispatcher.pause(config.pause_on_free_buckets()).await;

        Self {
            config,
            consumer_id: ConsumerId::generate(),
            store: Arc::new(store),
            log: Arc::new(log),
            dispatcher: Arc::new(dispatcher),
            on_dropped: None,
        }
    }

    /// Use `consumer_id` as this instance's identity in the ownership store.
    #[must_use]
    pub fn with_consumer_id(mut self, consumer_id: ConsumerId) -> Self {
        self.consumer_id = consumer_id;
        self
    }

    /// Register a callback for abnormal drops of the primary subscription.
    #[must_use]
    pub fn on_dropped(
        mut self,
        callback: impl Fn(&DropReason, Option<&str>) + Send + Sync + 'static,
    ) -> Self {
        self.on_dropped = Some(Arc::new(callback));
        self
    }

    /// Identity of this instance in the ownership store.
    pub const fn consumer_id(&self) -> &ConsumerId {
        &self.consumer_id
    }

    /// Configuration in use.
    pub const fn config(&self) -> &CompetingConfig {
        &self.config
    }

    /// Start tailing the whole log from the beginning.
    ///
    /// Each call starts from clean in-memory state. Must be called from
    /// within a tokio runtime. Dropping the returned handle detaches the
    /// subscription; use [`SubscriberHandle::shutdown`] to stop it.
    #[instrument(
        name = "subscriber.subscribe_to_all",
        skip(self),
        fields(endpoint = %self.config.endpoint(), consumer = %self.consumer_id)
    )]
    pub fn subscribe_to_all(&self) -> SubscriberHandle {
        info!(
            read_size = %self.config.read_size(),
            "[subscriber.subscribe_to_all] subscribing to all events from start"
        );

        let (inbox, commands) = mpsc::channel(INBOX_CAPACITY);
        let (adoption_reports, adoptions) = mpsc::channel(ADOPTION_CAPACITY);
        let live = Arc::new(AtomicBool::new(false));
        let reader = LiveEventReader::open(
            self.log.as_ref(),
            StartPosition::Beginning,
            self.config.read_size(),
        );

        let orchestrator = Orchestrator {
            assigner: self.config.assigner(),
            claims: ClaimState::new(self.config.buckets_handled().as_usize()),
            config: self.config.clone(),
            owner: self.consumer_id.clone(),
            store: Arc::clone(&self.store),
            log: Arc::clone(&self.log),
            dispatcher: Arc::clone(&self.dispatcher),
            on_dropped: self.on_dropped.clone(),
            pause: PauseMonitor::new(),
            reader,
            commands,
            adoptions,
            adoption_reports,
            tasks: JoinSet::new(),
            heartbeat_running: false,
            scan_running: false,
            adoption_task: None,
            live: Arc::clone(&live),
        };

        SubscriberHandle {
            commands: inbox,
            live,
            task: tokio::spawn(orchestrator.run()),
        }
    }
}

/// Snapshot of a running subscriber's local beliefs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStatus {
    /// Identity of the instance.
    pub consumer_id: ConsumerId,
    /// Buckets this instance believes it owns.
    pub claimed: Vec<BucketId>,
    /// Unclaimed buckets seen since the last heartbeat cycle.
    pub pending: Vec<BucketId>,
    /// Bucket under adoption, if any.
    pub adopting: Option<BucketId>,
    /// Position the adoption has replayed up to.
    pub adoption_cursor: Option<LogPosition>,
    /// Whether the pause monitor is armed.
    pub pause_armed: bool,
    /// Whether the primary subscription reached the live tail.
    pub live: bool,
}

/// Control handle of a running subscription.
pub struct SubscriberHandle {
    commands: Inbox,
    live: Arc<AtomicBool>,
    task: JoinHandle<Result<(), SubscriberError>>,
}

impl SubscriberHandle {
    /// Whether the primary subscription has caught up and is processing live events.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Whether the subscription has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Current claim state as seen by the orchestration loop.
    pub async fn status(&self) -> Result<SubscriberStatus, SubscriberError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Status(reply))
            .await
            .map_err(|_| SubscriberError::AlreadyStopped)?;
        response.await.map_err(|_| SubscriberError::AlreadyStopped)
    }

    /// Stop the subscription and wait for it to wind down.
    ///
    /// Stops the primary reader and both timers, and aborts in-flight
    /// store work; once this returns the subscriber makes no further store
    /// calls. Returns the error the subscription had already ended with, if any.
    pub async fn shutdown(self) -> Result<(), SubscriberError> {
        let _ = self.commands.send(Command::Shutdown).await;
        self.wait().await
    }

    /// Wait for the subscription to end on its own.
    pub async fn wait(self) -> Result<(), SubscriberError> {
        match self.task.await {
            Ok(result) => result,
            Err(error) if error.is_panic() => Err(SubscriberError::TaskPanicked(error.to_string())),
            Err(_) => Err(SubscriberError::AlreadyStopped),
        }
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("live", &self.is_live())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// A timer first firing after `first`, then every `period`.
///
/// Late ticks are skipped rather than bunched up behind a slow dispatch.
fn ticker(first: Duration, period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + first, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

enum TaskOutput {
    Heartbeat(HeartbeatReport),
    Coverage(Result<usize, OwnershipStoreError>),
    AdoptionFinished,
}

enum Step {
    Command(Command),
    HeartbeatTick,
    CoverageTick,
    Adoption(AdoptionId, AdoptionSignal),
    Task(Result<TaskOutput, JoinError>),
    Signal(Option<ReaderSignal>),
}

enum Flow {
    Continue,
    Stop(Result<(), SubscriberError>),
}

/// Sole owner of the claim state of one subscription.
struct Orchestrator<S, L, D> {
    config: CompetingConfig,
    owner: ConsumerId,
    store: Arc<S>,
    log: Arc<L>,
    dispatcher: Arc<D>,
    on_dropped: Option<DroppedCallback>,
    assigner: BucketAssigner,
    claims: ClaimState,
    pause: PauseMonitor,
    reader: LiveEventReader,
    commands: mpsc::Receiver<Command>,
    adoptions: mpsc::Receiver<(AdoptionId, AdoptionSignal)>,
    adoption_reports: AdoptionReports,
    tasks: JoinSet<TaskOutput>,
    heartbeat_running: bool,
    scan_running: bool,
    adoption_task: Option<AbortHandle>,
    live: Arc<AtomicBool>,
}

impl<S, L, D> Orchestrator<S, L, D>
where
    S: OwnershipStore + 'static,
    L: EventLog + 'static,
    D: Dispatcher + 'static,
{
    #[instrument(
        name = "subscriber.run",
        skip_all,
        fields(endpoint = %self.config.endpoint(), consumer = %self.owner)
    )]
    async fn run(mut self) -> Result<(), SubscriberError> {
        let period = self.config.heartbeat_interval();
        let mut heartbeats = ticker(period, period);
        // Half a period out of phase with heartbeats
        let mut coverage = ticker(period / 2, period);
        let coverage_enabled = self.config.pause_on_free_buckets();

        // Timers and task reports take priority over adoption replay and the
        // primary reader.
        let result = loop {
            let step = tokio::select! {
                biased;
                Some(command) = self.commands.recv() => Step::Command(command),
                _ = heartbeats.tick() => Step::HeartbeatTick,
                _ = coverage.tick(), if coverage_enabled => Step::CoverageTick,
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    Step::Task(joined)
                }
                Some((id, signal)) = self.adoptions.recv() => Step::Adoption(id, signal),
                signal = self.reader.next_signal() => Step::Signal(signal),
            };

            let flow = match step {
                Step::Command(command) => self.handle_command(command),
                Step::HeartbeatTick => {
                    self.start_heartbeat();
                    Flow::Continue
                }
                Step::CoverageTick => {
                    self.start_coverage_scan();
                    Flow::Continue
                }
                Step::Adoption(id, signal) => self.handle_adoption(id, signal).await,
                Step::Task(joined) => self.handle_task(joined).await,
                Step::Signal(signal) => self.handle_signal(signal).await,
            };

            if let Flow::Stop(result) = flow {
                break result;
            }
        };

        self.teardown().await;
        result
    }

    async fn teardown(&mut self) {
        let _ = self.reader.stop();
        self.adoption_task = None;
        self.tasks.shutdown().await;
        self.live.store(false, Ordering::SeqCst);
        debug!("subscriber stopped");
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {
                info!("shutdown requested");
                return Flow::Stop(Ok(()));
            }
        }
        Flow::Continue
    }

    async fn handle_task(&mut self, joined: Result<TaskOutput, JoinError>) -> Flow {
        match joined {
            Ok(TaskOutput::Heartbeat(report)) => self.apply_heartbeat(report),
            Ok(TaskOutput::Coverage(result)) => self.apply_coverage(result).await,
            Ok(TaskOutput::AdoptionFinished) => {}
            Err(error) if error.is_cancelled() => {}
            Err(error) => {
                error!(%error, "subscriber task panicked");
                return Flow::Stop(Err(SubscriberError::TaskPanicked(error.to_string())));
            }
        }
        Flow::Continue
    }

    async fn handle_signal(&mut self, signal: Option<ReaderSignal>) -> Flow {
        match signal {
            Some(ReaderSignal::Event(entry)) => self.route(entry).await,
            Some(ReaderSignal::CaughtUp) => {
                info!("live processing started");
                self.live.store(true, Ordering::SeqCst);
                Flow::Continue
            }
            Some(ReaderSignal::Dropped(reason)) if !reason.is_user_initiated() => {
                self.dropped(reason)
            }
            Some(ReaderSignal::Dropped(_)) | None => Flow::Stop(Ok(())),
        }
    }

    async fn route(&mut self, entry: LogEntry) -> Flow {
        let position = entry.position;
        let event = match entry.decode() {
            Ok(event) => event,
            Err(reason) => {
                debug!(%position, %reason, "discarding entry");
                return Flow::Continue;
            }
        };
        let bucket = self.assigner.assign(&entry.stream_id);

        match self.claims.route(bucket, position) {
            Route::Dispatch => {
                debug!(%position, %bucket, "event appeared, processing");
                self.dispatch(event).await
            }
            Route::Skip(reason) => {
                debug!(%position, %bucket, %reason, "event appeared, skipping");
                Flow::Continue
            }
            Route::TryClaim => self.try_claim(bucket, event).await,
        }
    }

    async fn try_claim(&mut self, bucket: BucketId, event: DispatchedEvent) -> Flow {
        let position = event.position;
        let key = self.key(bucket);
        debug!(%bucket, "attempting to claim bucket");

        let claim = self.store.check_or_save(&key, &self.owner, position);
        let outcome = match tokio::time::timeout(self.config.claim_timeout(), claim).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%bucket, timeout = ?self.config.claim_timeout(), "claim attempt timed out");
                OwnershipOutcome::StoreUnavailable(Operation::CheckOrSave)
            }
        };

        match outcome {
            OwnershipOutcome::Owned => {
                self.claims.claim_succeeded(bucket, position);
                info!(
                    %bucket,
                    claimed = self.claims.claimed_count(),
                    limit = self.claims.limit(),
                    "claimed bucket"
                );
                self.dispatch(event).await
            }
            OwnershipOutcome::Conflict => {
                self.claims.claim_failed(bucket, position);
                debug!(%bucket, "bucket owned elsewhere, skipping");
                Flow::Continue
            }
            OwnershipOutcome::StoreUnavailable(operation) => {
                self.claims.claim_failed(bucket, position);
                warn!(%bucket, %operation, "claim attempt failed, skipping");
                Flow::Continue
            }
        }
    }

    async fn dispatch(&mut self, event: DispatchedEvent) -> Flow {
        match self.dispatcher.dispatch(event).await {
            Ok(()) => Flow::Continue,
            Err(DispatchError::Cancelled) => self.cancelled(),
            Err(DispatchError::Failed(detail)) => self.dropped(DropReason::HandlerFault(detail)),
        }
    }

    fn cancelled(&mut self) -> Flow {
        warn!("dispatcher cancelled the subscription");
        let _ = self.reader.stop();
        self.abort_adoption();
        Flow::Stop(Err(SubscriberError::Cancelled))
    }

    fn dropped(&mut self, reason: DropReason) -> Flow {
        warn!(%reason, fault = reason.fault(), "subscription dropped");
        let _ = self.reader.stop();
        self.abort_adoption();
        self.claims.clear();
        self.live.store(false, Ordering::SeqCst);

        if let Some(callback) = &self.on_dropped {
            callback(&reason, reason.fault());
        }
        Flow::Stop(Err(SubscriberError::Dropped(reason)))
    }

    fn start_heartbeat(&mut self) {
        if self.heartbeat_running {
            debug!("previous heartbeat cycle still running, skipping tick");
            return;
        }

        let plan = self.claims.plan_heartbeat();
        if plan.is_empty() {
            return;
        }
        debug!(
            renew = plan.renew.len(),
            ping = plan.ping.len(),
            candidates = plan.candidates.len(),
            "processing heartbeats"
        );

        self.heartbeat_running = true;
        let store = Arc::clone(&self.store);
        let endpoint = self.config.endpoint().clone();
        let owner = self.owner.clone();
        let expiration = self.config.expiration();
        let _ = self.tasks.spawn(async move {
            let ctx = HeartbeatContext {
                store: store.as_ref(),
                endpoint: &endpoint,
                owner: &owner,
                expiration,
            };
            TaskOutput::Heartbeat(run_heartbeat_cycle(ctx, plan).await)
        });
    }

    fn apply_heartbeat(&mut self, report: HeartbeatReport) {
        self.heartbeat_running = false;

        if report.unavailable > 0 {
            warn!(
                failures = report.unavailable,
                claimed = self.claims.claimed_count(),
                "heartbeat cycle incomplete, store unavailable"
            );
        }

        for bucket in report.lost {
            if self.claims.evict(bucket) {
                info!(
                    %bucket,
                    claimed = self.claims.claimed_count(),
                    limit = self.claims.limit(),
                    "lost claim on bucket"
                );
            }
        }

        if let Some(id) = report.adoption_lost {
            if let Some(bucket) = self.claims.abandon_adoption(id) {
                self.abort_adoption();
                info!(%bucket, "lost claim on adopted bucket");
            }
        }

        if let Some(orphan) = report.orphan {
            self.start_adoption(orphan);
        }
    }

    fn start_adoption(&mut self, orphan: Orphan) {
        let Some(id) = self.claims.begin_adoption(orphan.bucket) else {
            return;
        };
        info!(bucket = %orphan.bucket, adoption = %id, "discovered orphaned bucket, adopting");

        let job = AdoptionJob {
            id,
            key: self.key(orphan.bucket),
            owner: self.owner.clone(),
            observed_heartbeat: orphan.observed_heartbeat,
            store: Arc::clone(&self.store),
            log: Arc::clone(&self.log),
            assigner: self.assigner,
            read_size: self.config.read_size(),
        };
        let reports = self.adoption_reports.clone();
        self.adoption_task = Some(self.tasks.spawn(async move {
            job.run(reports).await;
            TaskOutput::AdoptionFinished
        }));
    }

    async fn handle_adoption(&mut self, id: AdoptionId, signal: AdoptionSignal) -> Flow {
        if !self.claims.is_adopting(id) {
            debug!(adoption = %id, "ignoring signal from a finished adoption");
            return Flow::Continue;
        }

        match signal {
            AdoptionSignal::Started(start) => {
                let cursor = match start {
                    StartPosition::After(position) => Some(position),
                    StartPosition::Beginning => None,
                };
                debug!(adoption = %id, ?cursor, "adoption replay started");
                self.claims.advance_adoption(id, cursor);
            }
            AdoptionSignal::Replayed(event) => return self.replayed(id, event).await,
            AdoptionSignal::CaughtUp => {
                if let Some(bucket) = self.claims.complete_adoption(id) {
                    self.adoption_task = None;
                    info!(
                        %bucket,
                        claimed = self.claims.claimed_count(),
                        limit = self.claims.limit(),
                        "successfully adopted bucket"
                    );
                }
            }
            AdoptionSignal::Dropped(reason) => {
                if let Some(bucket) = self.claims.abandon_adoption(id) {
                    self.adoption_task = None;
                    warn!(%bucket, %reason, "adoption subscription dropped");
                }
            }
            AdoptionSignal::NotAdopted(outcome) => {
                if let Some(bucket) = self.claims.abandon_adoption(id) {
                    self.adoption_task = None;
                    info!(%bucket, ?outcome, "failed to adopt bucket, maybe next time");
                }
            }
        }
        Flow::Continue
    }

    async fn replayed(&mut self, id: AdoptionId, event: DispatchedEvent) -> Flow {
        let position = event.position;
        self.claims.advance_adoption(id, Some(position));

        if self.config.adoption_replay() == AdoptionReplay::CursorOnly {
            debug!(adoption = %id, %position, "adopted event appeared, advancing cursor");
            return Flow::Continue;
        }

        debug!(adoption = %id, %position, "adopted event appeared, processing");
        match self.dispatcher.dispatch(event).await {
            Ok(()) => Flow::Continue,
            Err(DispatchError::Cancelled) => {
                let _ = self.claims.abandon_adoption(id);
                self.cancelled()
            }
            Err(DispatchError::Failed(detail)) => {
                if let Some(bucket) = self.claims.abandon_adoption(id) {
                    self.abort_adoption();
                    warn!(%bucket, %position, %detail, "adopted event failed, abandoning adoption");
                }
                Flow::Continue
            }
        }
    }

    fn abort_adoption(&mut self) {
        if let Some(task) = self.adoption_task.take() {
            task.abort();
        }
    }

    fn start_coverage_scan(&mut self) {
        if !self.config.pause_on_free_buckets() {
            return;
        }
        if self.scan_running {
            debug!("previous coverage scan still running, skipping tick");
            return;
        }

        self.scan_running = true;
        let store = Arc::clone(&self.store);
        let endpoint = self.config.endpoint().clone();
        let bucket_count = self.config.bucket_count();
        let expiration = self.config.expiration();
        let _ = self.tasks.spawn(async move {
            let uncovered =
                count_uncovered(store.as_ref(), &endpoint, bucket_count, expiration).await;
            TaskOutput::Coverage(uncovered)
        });
    }

    async fn apply_coverage(&mut self, result: Result<usize, OwnershipStoreError>) {
        self.scan_running = false;

        let uncovered = match result {
            Ok(uncovered) => uncovered,
            Err(error) => {
                warn!(%error, "coverage scan failed, skipping cycle");
                return;
            }
        };

        match self.pause.observe(uncovered) {
            PauseCommand::None => warn!(uncovered, "detected free buckets, pause armed"),
            PauseCommand::Pause => {
                warn!(uncovered, "detected free buckets, pausing");
                self.dispatcher.pause(true).await;
            }
            PauseCommand::Resume => {
                debug!("every bucket is covered");
                self.dispatcher.pause(false).await;
            }
        }
    }

    fn key(&self, bucket: BucketId) -> BucketKey {
        BucketKey::new(self.config.endpoint().clone(), bucket)
    }

    fn status(&self) -> SubscriberStatus {
        let adoption = self.claims.adoption();
        SubscriberStatus {
            consumer_id: self.owner.clone(),
            claimed: self.claims.claimed().collect(),
            pending: self.claims.pending().collect(),
            adopting: adoption.map(|adoption| adoption.bucket),
            adoption_cursor: adoption.and_then(|adoption| adoption.cursor),
            pause_armed: self.pause.is_armed(),
            live: self.live.load(Ordering::SeqCst),
        }
    }
}
