//! In-process engine: scratch sessions, inline-script loading and straight
//! hypercube layouts, with change notifications after every reload.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use uuid::Uuid;

use crate::connection::ConnectionHandle;
use crate::models::{Layout, ObjectDefinition};

use super::hypercube;
use super::script::{parse_script, ScriptError, Table};
use super::{App, Engine, EngineError, LayoutPublisher, LayoutSubscription, Model, Session};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryEngine;

impl MemoryEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn open(&self, handle: &ConnectionHandle) -> Result<Arc<dyn Session>, EngineError> {
        if !handle.url().starts_with("ws://") && !handle.url().starts_with("wss://") {
            return Err(EngineError::Connection {
                url: handle.url().to_string(),
                message: "unsupported scheme".into(),
            });
        }
        log_info!(
            "memory engine session opened at {} (schema {})",
            handle.url(),
            handle.schema_version()
        );
        Ok(Arc::new(MemorySession {
            url: handle.url().to_string(),
        }))
    }
}

pub struct MemorySession {
    url: String,
}

#[async_trait]
impl Session for MemorySession {
    async fn create_session_app(&self) -> Result<Arc<dyn App>, EngineError> {
        let app = MemoryApp::new();
        log_debug!("session app {} created on {}", app.id(), self.url);
        Ok(Arc::new(app))
    }
}

struct AppShared {
    id: String,
    state: Mutex<AppState>,
}

struct AppState {
    script: String,
    status: LoadStatus,
    tables: Vec<Table>,
    last_error: Option<ScriptError>,
    objects: HashMap<String, Arc<MemoryModel>>,
}

#[derive(Clone)]
pub struct MemoryApp {
    shared: Arc<AppShared>,
}

impl MemoryApp {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(AppShared {
                id: format!("SessionApp_{}", Uuid::new_v4()),
                state: Mutex::new(AppState {
                    script: String::new(),
                    status: LoadStatus::Unloaded,
                    tables: Vec::new(),
                    last_error: None,
                    objects: HashMap::new(),
                }),
            }),
        }
    }

    #[cfg(test)]
    fn load_status(&self) -> LoadStatus {
        lock(&self.shared.state).status
    }

    #[cfg(test)]
    fn object_count(&self) -> usize {
        lock(&self.shared.state).objects.len()
    }
}

impl Default for MemoryApp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl App for MemoryApp {
    fn id(&self) -> &str {
        &self.shared.id
    }

    async fn set_script(&self, script: &str) -> Result<(), EngineError> {
        lock(&self.shared.state).script = script.to_string();
        Ok(())
    }

    async fn do_reload(&self) -> Result<bool, EngineError> {
        let script = {
            let mut state = lock(&self.shared.state);
            state.status = LoadStatus::Loading;
            state.script.clone()
        };

        let parsed = parse_script(&script);

        let models: Vec<Arc<MemoryModel>> = {
            let mut state = lock(&self.shared.state);
            match parsed {
                Ok(tables) => {
                    log_info!(
                        "app {} loaded {} table(s), {} row(s)",
                        self.shared.id,
                        tables.len(),
                        tables.iter().map(|table| table.rows.len()).sum::<usize>()
                    );
                    state.tables = tables;
                    state.status = LoadStatus::Loaded;
                    state.last_error = None;
                    state.objects.values().cloned().collect()
                }
                Err(err) => {
                    log_warn!("app {} reload failed: {err}", self.shared.id);
                    state.status = LoadStatus::Failed;
                    state.last_error = Some(err);
                    return Ok(false);
                }
            }
        };

        for model in models {
            model.notify_changed();
        }
        Ok(true)
    }

    async fn create_session_object(
        &self,
        definition: &ObjectDefinition,
    ) -> Result<Arc<dyn Model>, EngineError> {
        let mut state = lock(&self.shared.state);
        if let Some(err) = &state.last_error {
            return Err(EngineError::rejected(
                "CreateSessionObject",
                format!("last reload failed: {err}"),
            ));
        }
        if state.status != LoadStatus::Loaded {
            return Err(EngineError::NotLoaded {
                app_id: self.shared.id.clone(),
            });
        }

        if let Some(existing) = state.objects.get(&definition.info.id) {
            if existing.definition == *definition {
                let model: Arc<dyn Model> = existing.clone();
                return Ok(model);
            }
            return Err(EngineError::rejected(
                "CreateSessionObject",
                format!("object id '{}' already in use", definition.info.id),
            ));
        }

        let model = Arc::new(MemoryModel {
            id: definition.info.id.clone(),
            definition: definition.clone(),
            app: Arc::downgrade(&self.shared),
            subscribers: Mutex::new(Vec::new()),
        });
        state.objects.insert(model.id.clone(), model.clone());
        log_debug!("object {} created in app {}", model.id, self.shared.id);
        let model: Arc<dyn Model> = model;
        Ok(model)
    }
}

pub struct MemoryModel {
    id: String,
    definition: ObjectDefinition,
    app: Weak<AppShared>,
    subscribers: Mutex<Vec<LayoutPublisher>>,
}

impl MemoryModel {
    fn layout(&self) -> Result<Layout, EngineError> {
        let app = self.app.upgrade().ok_or(EngineError::Closed)?;
        let state = lock(&app.state);
        let hyper_cube = hypercube::evaluate(&self.definition.hyper_cube_def, &state.tables)?;
        Ok(Layout {
            info: self.definition.info.clone(),
            hyper_cube,
        })
    }

    fn notify_changed(&self) {
        let layout = self.layout();
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|publisher| publisher.publish(layout.clone()));
        log_debug!(
            "object {} changed, {} live subscriber(s)",
            self.id,
            subscribers.len()
        );
    }
}

#[async_trait]
impl Model for MemoryModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn subscribe_layout(&self) -> Result<LayoutSubscription, EngineError> {
        let layout = self.layout()?;
        let (publisher, subscription) = LayoutSubscription::channel();
        publisher.publish(Ok(layout));
        lock(&self.subscribers).push(publisher);
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionConfig, ConnectionProvider};
    use crate::models::bar_chart::{object_definition, LOAD_SCRIPT};

    async fn loaded_app() -> MemoryApp {
        let app = MemoryApp::new();
        app.set_script(LOAD_SCRIPT).await.unwrap();
        assert!(app.do_reload().await.unwrap());
        app
    }

    #[tokio::test]
    async fn opens_websocket_endpoints() {
        let handle = ConnectionProvider::with_mount_stamp(1).provide(&ConnectionConfig::default());
        assert!(MemoryEngine::new().open(&handle).await.is_ok());
    }

    #[tokio::test]
    async fn script_round_trip_yields_ten_rows() {
        let app = loaded_app().await;
        assert_eq!(app.load_status(), LoadStatus::Loaded);

        let model = app.create_session_object(&object_definition()).await.unwrap();
        let mut subscription = model.subscribe_layout().await.unwrap();
        let layout = subscription.next().await.unwrap().unwrap();

        assert_eq!(layout.row_count(), 10);
        assert_eq!(layout.info.id, "barChartExample");
    }

    #[tokio::test]
    async fn objects_are_get_or_create_by_id() {
        let app = loaded_app().await;
        let first = app.create_session_object(&object_definition()).await.unwrap();
        let second = app.create_session_object(&object_definition()).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(app.object_count(), 1);

        let mut other = object_definition();
        other.visualization = "table".into();
        assert!(app.create_session_object(&other).await.is_err());
    }

    #[tokio::test]
    async fn objects_require_loaded_data() {
        let app = MemoryApp::new();
        let err = app.create_session_object(&object_definition()).await.err();
        assert!(matches!(err, Some(EngineError::NotLoaded { .. })));
    }

    #[tokio::test]
    async fn failed_reload_reports_false() {
        let app = MemoryApp::new();
        app.set_script("T: LOAD * INLINE [").await.unwrap();
        assert!(!app.do_reload().await.unwrap());
        assert_eq!(app.load_status(), LoadStatus::Failed);

        let err = app.create_session_object(&object_definition()).await.err().unwrap();
        assert!(err.to_string().contains("last reload failed: script error on line"));
    }

    #[tokio::test]
    async fn reload_notifies_subscribers_and_skips_released_ones() {
        let app = loaded_app().await;
        let model = app.create_session_object(&object_definition()).await.unwrap();
        let mut kept = model.subscribe_layout().await.unwrap();
        let mut released = model.subscribe_layout().await.unwrap();
        kept.next().await.unwrap().unwrap();
        released.next().await.unwrap().unwrap();
        released.unsubscribe();

        app.set_script("Stars:\nLOAD * INLINE [\nRating,Votes\n1,5\n];")
            .await
            .unwrap();
        assert!(app.do_reload().await.unwrap());

        let layout = kept.next().await.unwrap().unwrap();
        assert_eq!(layout.row_count(), 1);
        assert_eq!(released.next().await, None);
    }
}
