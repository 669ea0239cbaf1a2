use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionConfig, ConnectionHandle, ConnectionProvider};
use crate::engine::{App, Engine, Model, Session};
use crate::models::{bar_chart, Layout, ObjectDefinition, VisualSettings};
use crate::render::{ChartRenderer, RenderTarget};

use super::generation::{Generation, GenerationClock};
use super::stages::{self, StageEvent};
use super::state::{Stage, StageKind, StagePhase};
use super::status::{project_status, PipelineStatus, StatusInputs};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// The fixed inputs of the chart: what gets loaded, which object is derived
/// from it, and how it is drawn.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub load_script: String,
    pub definition: ObjectDefinition,
    pub settings: VisualSettings,
}

impl PipelineInputs {
    pub fn bar_chart() -> Self {
        Self {
            load_script: bar_chart::LOAD_SCRIPT.to_string(),
            definition: bar_chart::object_definition(),
            settings: bar_chart::visual_settings(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageSnapshot {
    pub kind: StageKind,
    pub phase: StagePhase,
    /// Generation of the input the stage was last started for.
    pub input: Option<u64>,
    pub invalidations: u64,
    pub error: Option<String>,
}

/// Everything a host needs to draw the pipeline's current state.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub status: PipelineStatus,
    pub message: String,
    pub connection_url: Option<String>,
    pub app_id: Option<String>,
    pub layout_rows: Option<usize>,
    pub render_count: u64,
    /// Why the current layout could not be drawn, if it could not.
    pub render_error: Option<String>,
    pub stages: Vec<StageSnapshot>,
    #[serde(skip)]
    pub layout: Option<Arc<Layout>>,
}

impl PipelineSnapshot {
    pub fn stage(&self, kind: StageKind) -> Option<&StageSnapshot> {
        self.stages.iter().find(|stage| stage.kind == kind)
    }

    /// First failed stage in pipeline order, if any.
    pub fn failure(&self) -> Option<&StageSnapshot> {
        self.stages
            .iter()
            .find(|stage| stage.phase == StagePhase::Failed)
    }
}

enum Command {
    SetConnection(Option<ConnectionConfig>),
    AttachTarget(Option<RenderTarget>),
}

/// Handle to a running pipeline. Cheap to clone; all clones drive the same
/// supervisor task.
#[derive(Clone)]
pub struct PipelineController {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<PipelineSnapshot>,
    cancel_token: CancellationToken,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PipelineController {
    /// Starts the supervisor on the current tokio runtime. The connection
    /// provider is created here, so a per-mount identity is stamped now.
    pub fn spawn(
        engine: Arc<dyn Engine>,
        renderer: Box<dyn ChartRenderer>,
        inputs: PipelineInputs,
    ) -> Self {
        Self::spawn_with_provider(engine, renderer, inputs, ConnectionProvider::new())
    }

    pub fn spawn_with_provider(
        engine: Arc<dyn Engine>,
        renderer: Box<dyn ChartRenderer>,
        inputs: PipelineInputs,
        provider: ConnectionProvider,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(PipelineSnapshot::default());
        let cancel_token = CancellationToken::new();

        let supervisor = Supervisor {
            engine,
            renderer,
            load_script: Arc::from(inputs.load_script),
            definition: Arc::new(inputs.definition),
            settings: inputs.settings,
            provider,
            clock: GenerationClock::new(),
            connection: None,
            session: Stage::new(StageKind::Session),
            app: Stage::new(StageKind::Application),
            model: Stage::new(StageKind::Model),
            layout: Stage::new(StageKind::Layout),
            subscription: None,
            target: None,
            last_render: None,
            render_count: 0,
            render_error: None,
            tasks: JoinSet::new(),
            events: event_tx,
            snapshots: snapshot_tx,
        };

        let handle = tokio::spawn(supervisor.run(command_rx, event_rx, cancel_token.clone()));

        Self {
            commands: command_tx,
            snapshots: snapshot_rx,
            cancel_token,
            handle: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Points the pipeline at an engine. `None` tears every stage down.
    pub fn set_connection(&self, config: Option<ConnectionConfig>) -> Result<()> {
        self.send(Command::SetConnection(config))
    }

    pub fn attach_target(&self, target: Option<RenderTarget>) -> Result<()> {
        self.send(Command::AttachTarget(target))
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("pipeline supervisor is not running"))
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Waits until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&PipelineSnapshot) -> bool,
    ) -> Result<PipelineSnapshot> {
        let mut snapshots = self.subscribe();
        let snapshot = snapshots
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .context("pipeline supervisor stopped")?;
        Ok(snapshot.clone())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.cancel_token.cancel();

        if let Some(handle) = self.handle.lock().await.take() {
            handle
                .await
                .context("pipeline supervisor failed to join")
        } else {
            Ok(())
        }
    }
}

struct ActiveSubscription {
    model: Generation,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns all pipeline state. Runs on a single task; stage work runs on
/// spawned tasks that report back through `events`.
struct Supervisor {
    engine: Arc<dyn Engine>,
    renderer: Box<dyn ChartRenderer>,
    load_script: Arc<str>,
    definition: Arc<ObjectDefinition>,
    settings: VisualSettings,
    provider: ConnectionProvider,
    clock: GenerationClock,
    connection: Option<(Generation, ConnectionHandle)>,
    session: Stage<Arc<dyn Session>>,
    app: Stage<Arc<dyn App>>,
    model: Stage<Arc<dyn Model>>,
    layout: Stage<Arc<Layout>>,
    subscription: Option<ActiveSubscription>,
    target: Option<RenderTarget>,
    /// (target id, layout generation) of the last render.
    last_render: Option<(u64, Generation)>,
    render_count: u64,
    render_error: Option<String>,
    tasks: JoinSet<()>,
    events: mpsc::UnboundedSender<StageEvent>,
    snapshots: watch::Sender<PipelineSnapshot>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<StageEvent>,
        cancel_token: CancellationToken,
    ) {
        self.publish();

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    log_info!("pipeline supervisor shutting down");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        log_info!("all pipeline controllers dropped, stopping supervisor");
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            log_error!("pipeline stage task panicked: {err}");
                        }
                    }
                    continue;
                }
            }

            self.reconcile();
        }

        self.teardown().await;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetConnection(Some(config)) => {
                let handle = self.provider.provide(&config);
                let unchanged = self
                    .connection
                    .as_ref()
                    .is_some_and(|(_, current)| current.id() == handle.id());
                if unchanged {
                    log_debug!("connection {} unchanged", handle.url());
                    return;
                }
                let generation = self.clock.next();
                log_info!("connection {} set ({generation})", handle.url());
                self.connection = Some((generation, handle));
            }
            Command::SetConnection(None) => {
                if self.connection.take().is_some() {
                    log_info!("connection cleared, tearing pipeline down");
                }
                self.provider.clear();
            }
            Command::AttachTarget(target) => {
                log_debug!(
                    "render target {}",
                    target
                        .as_ref()
                        .map(|target| format!("{} attached", target.id()))
                        .unwrap_or_else(|| "detached".into())
                );
                self.target = target;
            }
        }
    }

    fn handle_event(&mut self, event: StageEvent) {
        match event {
            StageEvent::SessionOpened { tag, result } => {
                if !self.session.awaits(tag) {
                    log_debug!("discarding stale session result ({tag})");
                    return;
                }
                match result {
                    Ok(session) => {
                        let generation = self.clock.next();
                        log_info!("session ready ({generation})");
                        self.session.complete(generation, session);
                    }
                    Err(err) => {
                        log_error!("{err}");
                        self.session.fail(err);
                    }
                }
            }
            StageEvent::AppBuilt { tag, result } => {
                if !self.app.awaits(tag) {
                    log_debug!("discarding stale application result ({tag})");
                    return;
                }
                match result {
                    Ok(app) => {
                        let generation = self.clock.next();
                        log_info!("application {} ready ({generation})", app.id());
                        self.app.complete(generation, app);
                    }
                    Err(err) => {
                        log_error!("{err}");
                        self.app.fail(err);
                    }
                }
            }
            StageEvent::ModelResolved { tag, result } => {
                if !self.model.awaits(tag) {
                    log_debug!("discarding stale model result ({tag})");
                    return;
                }
                match result {
                    Ok(model) => {
                        let generation = self.clock.next();
                        log_info!("model {} ready ({generation})", model.id());
                        self.model.complete(generation, model);
                    }
                    Err(err) => {
                        log_error!("{err}");
                        self.model.fail(err);
                    }
                }
            }
            StageEvent::LayoutChanged { tag, result } => {
                if !self.layout.accepts_update(tag) {
                    log_debug!("discarding stale layout ({tag})");
                    return;
                }
                match result {
                    Ok(layout) => {
                        let generation = self.clock.next();
                        log_debug!("layout {generation} with {} rows", layout.row_count());
                        self.layout.complete(generation, Arc::new(layout));
                    }
                    Err(err) => {
                        log_error!("{err}");
                        self.layout.fail(err);
                        self.release_subscription();
                    }
                }
            }
        }
    }

    /// Starts every stage whose input is ready and differs from the input it
    /// last ran for, resets every stage whose input is gone, then renders
    /// and publishes.
    fn reconcile(&mut self) {
        match self.connection.clone() {
            Some((generation, handle)) => {
                if self.session.needs_start(generation) {
                    self.reset_from(StageKind::Session);
                    self.start_session(generation, handle);
                }
            }
            None => self.reset_from(StageKind::Session),
        }

        match self.session.ready() {
            Some((generation, session)) => {
                if self.app.needs_start(generation) {
                    self.reset_from(StageKind::Application);
                    self.start_app(generation, session);
                }
            }
            None => self.reset_from(StageKind::Application),
        }

        match self.app.ready() {
            Some((generation, app)) => {
                if self.model.needs_start(generation) {
                    self.reset_from(StageKind::Model);
                    self.start_model(generation, app);
                }
            }
            None => self.reset_from(StageKind::Model),
        }

        match self.model.ready() {
            Some((generation, model)) => {
                if self.layout.needs_start(generation) {
                    self.reset_from(StageKind::Layout);
                    self.start_layout(generation, model);
                }
            }
            None => self.reset_from(StageKind::Layout),
        }

        self.render_if_ready();
        self.publish();
    }

    /// Invalidates `kind` and everything downstream of it.
    fn reset_from(&mut self, kind: StageKind) {
        let mut invalidated = Vec::new();
        if kind <= StageKind::Session && self.session.reset() {
            invalidated.push(StageKind::Session);
        }
        if kind <= StageKind::Application && self.app.reset() {
            invalidated.push(StageKind::Application);
        }
        if kind <= StageKind::Model && self.model.reset() {
            invalidated.push(StageKind::Model);
        }
        if self.layout.reset() {
            invalidated.push(StageKind::Layout);
            self.clear_render();
        }
        self.release_subscription();

        if !invalidated.is_empty() {
            log_debug!("invalidated stages {invalidated:?}");
        }
    }

    fn start_session(&mut self, tag: Generation, handle: ConnectionHandle) {
        let _scope = self.session.start(tag);
        let engine = self.engine.clone();
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let result = stages::open_session(engine.as_ref(), &handle).await;
            let _ = events.send(StageEvent::SessionOpened { tag, result });
        });
    }

    fn start_app(&mut self, tag: Generation, session: Arc<dyn Session>) {
        let scope = self.app.start(tag);
        let script = self.load_script.clone();
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let result = stages::build_scratch_app(session.as_ref(), &script, &scope).await;
            if scope.is_cancelled() {
                return;
            }
            let _ = events.send(StageEvent::AppBuilt { tag, result });
        });
    }

    fn start_model(&mut self, tag: Generation, app: Arc<dyn App>) {
        let _scope = self.model.start(tag);
        let definition = self.definition.clone();
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let result = stages::resolve_model(app.as_ref(), &definition).await;
            let _ = events.send(StageEvent::ModelResolved { tag, result });
        });
    }

    fn start_layout(&mut self, tag: Generation, model: Arc<dyn Model>) {
        self.release_subscription();
        let cancel = self.layout.start(tag);
        let task = tokio::spawn(stages::forward_layouts(
            tag,
            model,
            cancel.clone(),
            self.events.clone(),
        ));
        self.subscription = Some(ActiveSubscription {
            model: tag,
            cancel,
            task,
        });
    }

    fn release_subscription(&mut self) {
        if let Some(active) = self.subscription.take() {
            log_debug!("releasing layout subscription of model {}", active.model);
            active.cancel.cancel();
            // The forwarder exits on its own once cancelled.
            drop(active.task);
        }
    }

    fn render_if_ready(&mut self) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let Some((generation, layout)) = self.layout.ready() else {
            return;
        };
        let key = (target.id(), generation);
        if self.last_render == Some(key) {
            return;
        }
        self.last_render = Some(key);

        match self.renderer.render(target, &self.settings, &layout) {
            Ok(()) => {
                self.render_count += 1;
                self.render_error = None;
                log_debug!("rendered layout {generation} into target {}", target.id());
            }
            Err(err) => {
                log_warn!("render of layout {generation} failed: {err:#}");
                self.render_error = Some(format!("{err:#}"));
            }
        }
    }

    /// Wipes what the target shows for a layout that is no longer current.
    fn clear_render(&mut self) {
        if let Some((drawn_on, _)) = self.last_render.take() {
            if let Some(target) = self.target.as_ref().filter(|target| target.id() == drawn_on) {
                target.clear();
            }
        }
        self.render_error = None;
    }

    fn stage_snapshot<T: Clone>(stage: &Stage<T>) -> StageSnapshot {
        StageSnapshot {
            kind: stage.kind(),
            phase: stage.phase(),
            input: stage.input().map(Generation::get),
            invalidations: stage.invalidations(),
            error: stage.error().map(ToString::to_string),
        }
    }

    fn publish(&self) {
        let status = project_status(&StatusInputs {
            session_ready: self.session.value().is_some(),
            app_ready: self.app.value().is_some(),
            model_error: self.model.error().is_some(),
            layout_error: self.layout.error().is_some(),
            layout_ready: self.layout.value().is_some(),
        });
        let layout = self.layout.value().cloned();

        self.snapshots.send_replace(PipelineSnapshot {
            status,
            message: status.message().to_string(),
            connection_url: self
                .connection
                .as_ref()
                .map(|(_, handle)| handle.url().to_string()),
            app_id: self.app.value().map(|app| app.id().to_string()),
            layout_rows: layout.as_ref().map(|layout| layout.row_count()),
            render_count: self.render_count,
            render_error: self.render_error.clone(),
            stages: vec![
                Self::stage_snapshot(&self.session),
                Self::stage_snapshot(&self.app),
                Self::stage_snapshot(&self.model),
                Self::stage_snapshot(&self.layout),
            ],
            layout,
        });
    }

    async fn teardown(&mut self) {
        let forwarder = self.subscription.take().map(|active| {
            active.cancel.cancel();
            active.task
        });

        self.connection = None;
        self.reset_from(StageKind::Session);
        self.tasks.shutdown().await;
        if let Some(task) = forwarder {
            if let Err(err) = task.await {
                log_warn!("layout forwarder failed to join: {err}");
            }
        }
        self.publish();
    }
}
