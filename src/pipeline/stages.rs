//! The asynchronous work behind each stage. Each function only talks to its
//! own collaborator; sequencing and staleness are the supervisor's concern.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionHandle;
use crate::engine::{App, Engine, Model, Session};
use crate::models::{Layout, ObjectDefinition};

use super::generation::Generation;
use super::state::{StageError, StageKind};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Completion messages sent back to the supervisor, tagged with the input
/// generation the work was started for.
pub(crate) enum StageEvent {
    SessionOpened {
        tag: Generation,
        result: Result<Arc<dyn Session>, StageError>,
    },
    AppBuilt {
        tag: Generation,
        result: Result<Arc<dyn App>, StageError>,
    },
    ModelResolved {
        tag: Generation,
        result: Result<Arc<dyn Model>, StageError>,
    },
    LayoutChanged {
        tag: Generation,
        result: Result<Layout, StageError>,
    },
}

pub async fn open_session(
    engine: &dyn Engine,
    handle: &ConnectionHandle,
) -> Result<Arc<dyn Session>, StageError> {
    log_info!("opening session at {}", handle.url());
    engine
        .open(handle)
        .await
        .map_err(|err| StageError::new(StageKind::Session, err))
}

/// Creates a session app, sets `script` and reloads, strictly in that order.
/// Stops between steps once `cancel` fires.
pub async fn build_scratch_app(
    session: &dyn Session,
    script: &str,
    cancel: &CancellationToken,
) -> Result<Arc<dyn App>, StageError> {
    let fail = |cause: String| StageError::new(StageKind::Application, cause);
    let superseded = || fail("superseded before the load completed".into());

    let app = session
        .create_session_app()
        .await
        .map_err(|err| fail(format!("create session app: {err}")))?;
    if cancel.is_cancelled() {
        return Err(superseded());
    }
    log_debug!("session app {} created, setting load script", app.id());

    app.set_script(script)
        .await
        .map_err(|err| fail(format!("set script: {err}")))?;
    if cancel.is_cancelled() {
        return Err(superseded());
    }

    let loaded = app
        .do_reload()
        .await
        .map_err(|err| fail(format!("reload: {err}")))?;
    if !loaded {
        return Err(fail(format!("reload of app {} did not load data", app.id())));
    }

    log_info!("session app {} loaded", app.id());
    Ok(app)
}

pub async fn resolve_model(
    app: &dyn App,
    definition: &ObjectDefinition,
) -> Result<Arc<dyn Model>, StageError> {
    let model = app
        .create_session_object(definition)
        .await
        .map_err(|err| StageError::new(StageKind::Model, err))?;
    log_info!("model {} resolved in app {}", model.id(), app.id());
    Ok(model)
}

/// Subscribes to `model` and forwards every layout to the supervisor until
/// `cancel` fires or an error is delivered. A stream the engine closes is
/// reported as a layout error. The subscription is released on every exit
/// path.
pub(crate) async fn forward_layouts(
    tag: Generation,
    model: Arc<dyn Model>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<StageEvent>,
) {
    let mut subscription = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        subscribed = model.subscribe_layout() => match subscribed {
            Ok(subscription) => subscription,
            Err(err) => {
                let _ = events.send(StageEvent::LayoutChanged {
                    tag,
                    result: Err(StageError::new(StageKind::Layout, err)),
                });
                return;
            }
        },
    };
    log_debug!("subscribed to layout of model {} ({tag})", model.id());

    loop {
        let update = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            update = subscription.next() => update,
        };

        let Some(update) = update else {
            log_warn!("layout stream of model {} ended ({tag})", model.id());
            let _ = events.send(StageEvent::LayoutChanged {
                tag,
                result: Err(StageError::new(StageKind::Layout, "layout stream closed")),
            });
            break;
        };

        let failed = update.is_err();
        let sent = events.send(StageEvent::LayoutChanged {
            tag,
            result: update.map_err(|err| StageError::new(StageKind::Layout, err)),
        });
        if sent.is_err() || failed {
            break;
        }
    }

    subscription.unsubscribe();
    log_debug!("released layout subscription of model {} ({tag})", model.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionConfig, ConnectionProvider};
    use crate::engine::testing::{Harness, Step};
    use crate::engine::{EngineError, LayoutSubscription, MemoryEngine};
    use crate::pipeline::generation::GenerationClock;
    use async_trait::async_trait;
    use crate::models::bar_chart::{object_definition, LOAD_SCRIPT};

    #[tokio::test]
    async fn build_runs_create_set_script_reload_in_order() {
        let harness = Harness::new();
        let engine = harness.engine();
        let handle = ConnectionProvider::with_mount_stamp(7).provide(&ConnectionConfig::default());

        let session = open_session(engine.as_ref(), &handle).await.unwrap();
        let app = build_scratch_app(session.as_ref(), LOAD_SCRIPT, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            harness.journal(),
            vec![Step::Open, Step::CreateApp, Step::SetScript, Step::Reload]
        );
        resolve_model(app.as_ref(), &object_definition()).await.unwrap();
        assert_eq!(harness.count(Step::CreateObject), 1);
    }

    #[tokio::test]
    async fn failing_substep_stops_the_build() {
        let harness = Harness::new();
        harness.fail(Step::SetScript);
        let handle = ConnectionProvider::with_mount_stamp(7).provide(&ConnectionConfig::default());
        let session = open_session(harness.engine().as_ref(), &handle).await.unwrap();

        let err = build_scratch_app(session.as_ref(), LOAD_SCRIPT, &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind, StageKind::Application);
        assert!(err.message.starts_with("set script"));
        assert_eq!(harness.count(Step::Reload), 0);
    }

    #[tokio::test]
    async fn unloadable_script_fails_the_build() {
        let handle = ConnectionProvider::with_mount_stamp(7).provide(&ConnectionConfig::default());
        let session = open_session(&MemoryEngine::new(), &handle).await.unwrap();

        let err = build_scratch_app(session.as_ref(), "T: LOAD * INLINE [", &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(err.message.contains("did not load data"));
    }

    #[tokio::test]
    async fn cancelled_build_stops_before_reload() {
        let harness = Harness::new();
        let handle = ConnectionProvider::with_mount_stamp(7).provide(&ConnectionConfig::default());
        let session = open_session(harness.engine().as_ref(), &handle).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = build_scratch_app(session.as_ref(), LOAD_SCRIPT, &cancel).await;

        assert!(result.is_err());
        assert_eq!(harness.count(Step::SetScript), 0);
        assert_eq!(harness.count(Step::Reload), 0);
    }

    /// A model whose engine side goes away before publishing anything.
    struct ClosedModel;

    #[async_trait]
    impl Model for ClosedModel {
        fn id(&self) -> &str {
            "closed"
        }

        async fn subscribe_layout(&self) -> Result<LayoutSubscription, EngineError> {
            let (publisher, subscription) = LayoutSubscription::channel();
            drop(publisher);
            Ok(subscription)
        }
    }

    #[tokio::test]
    async fn closed_layout_stream_is_reported_as_a_layout_error() {
        let tag = GenerationClock::new().next();
        let (events, mut received) = mpsc::unbounded_channel();

        forward_layouts(tag, Arc::new(ClosedModel), CancellationToken::new(), events).await;

        match received.recv().await {
            Some(StageEvent::LayoutChanged {
                tag: seen,
                result: Err(err),
            }) => {
                assert_eq!(seen, tag);
                assert_eq!(err.kind, StageKind::Layout);
                assert_eq!(err.message, "layout stream closed");
            }
            _ => panic!("expected a layout error event"),
        }
        assert!(received.recv().await.is_none());
    }
}
