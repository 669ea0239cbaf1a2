//! Instrumented wrapper around the in-memory engine: records every call,
//! injects failures per step and can hold a step open until released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::connection::ConnectionHandle;
use crate::models::ObjectDefinition;

use super::{
    App, Engine, EngineError, LayoutPublisher, LayoutSubscription, MemoryEngine, Model, Session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Step {
    Open,
    CreateApp,
    SetScript,
    Reload,
    CreateObject,
    Subscribe,
}

#[derive(Default)]
struct HarnessState {
    journal: Vec<Step>,
    faults: HashSet<Step>,
    gates: HashMap<Step, Arc<Semaphore>>,
    apps: Vec<Arc<dyn App>>,
    subscriptions: Vec<LayoutPublisher>,
}

#[derive(Clone, Default)]
pub(crate) struct Harness {
    state: Arc<Mutex<HarnessState>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HarnessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        Arc::new(HarnessEngine {
            inner: MemoryEngine::new(),
            harness: self.clone(),
        })
    }

    pub fn fail(&self, step: Step) {
        self.lock().faults.insert(step);
    }

    /// Makes every future call of `step` wait until [`Harness::release`].
    pub fn hold(&self, step: Step) {
        self.lock().gates.insert(step, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, step: Step) {
        if let Some(gate) = self.lock().gates.remove(&step) {
            gate.close();
        }
    }

    pub fn journal(&self) -> Vec<Step> {
        self.lock().journal.clone()
    }

    pub fn count(&self, step: Step) -> usize {
        self.lock().journal.iter().filter(|seen| **seen == step).count()
    }

    /// The most recently created underlying app, for driving reloads.
    pub fn last_app(&self) -> Option<Arc<dyn App>> {
        self.lock().apps.last().cloned()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.lock()
            .subscriptions
            .iter()
            .filter(|publisher| !publisher.is_released())
            .count()
    }

    /// Records the call, waits on a held gate, then applies an injected fault.
    async fn enter(&self, step: Step) -> Result<(), EngineError> {
        let gate = {
            let mut state = self.lock();
            state.journal.push(step);
            state.gates.get(&step).cloned()
        };
        if let Some(gate) = gate {
            // Closing the semaphore is the release signal.
            let _ = gate.acquire().await;
        }
        if self.lock().faults.contains(&step) {
            return Err(EngineError::rejected("harness", format!("{step:?} failed")));
        }
        Ok(())
    }
}

struct HarnessEngine {
    inner: MemoryEngine,
    harness: Harness,
}

#[async_trait]
impl Engine for HarnessEngine {
    async fn open(&self, handle: &ConnectionHandle) -> Result<Arc<dyn Session>, EngineError> {
        self.harness.enter(Step::Open).await?;
        let inner = self.inner.open(handle).await?;
        Ok(Arc::new(HarnessSession {
            inner,
            harness: self.harness.clone(),
        }))
    }
}

struct HarnessSession {
    inner: Arc<dyn Session>,
    harness: Harness,
}

#[async_trait]
impl Session for HarnessSession {
    async fn create_session_app(&self) -> Result<Arc<dyn App>, EngineError> {
        self.harness.enter(Step::CreateApp).await?;
        let inner = self.inner.create_session_app().await?;
        self.harness.lock().apps.push(inner.clone());
        Ok(Arc::new(HarnessApp {
            inner,
            harness: self.harness.clone(),
        }))
    }
}

struct HarnessApp {
    inner: Arc<dyn App>,
    harness: Harness,
}

#[async_trait]
impl App for HarnessApp {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn set_script(&self, script: &str) -> Result<(), EngineError> {
        self.harness.enter(Step::SetScript).await?;
        self.inner.set_script(script).await
    }

    async fn do_reload(&self) -> Result<bool, EngineError> {
        self.harness.enter(Step::Reload).await?;
        self.inner.do_reload().await
    }

    async fn create_session_object(
        &self,
        definition: &ObjectDefinition,
    ) -> Result<Arc<dyn Model>, EngineError> {
        self.harness.enter(Step::CreateObject).await?;
        let inner = self.inner.create_session_object(definition).await?;
        Ok(Arc::new(HarnessModel {
            inner,
            harness: self.harness.clone(),
        }))
    }
}

struct HarnessModel {
    inner: Arc<dyn Model>,
    harness: Harness,
}

#[async_trait]
impl Model for HarnessModel {
    fn id(&self) -> &str {
        self.inner.id()
    }

    /// Relays the inner subscription through a tracked channel so tests can
    /// observe when the pipeline releases it.
    async fn subscribe_layout(&self) -> Result<LayoutSubscription, EngineError> {
        self.harness.enter(Step::Subscribe).await?;
        let mut inner = self.inner.subscribe_layout().await?;
        let (publisher, subscription) = LayoutSubscription::channel();
        self.harness.lock().subscriptions.push(publisher.clone());

        tokio::spawn(async move {
            while let Some(update) = inner.next().await {
                if !publisher.publish(update) {
                    break;
                }
            }
        });
        Ok(subscription)
    }
}
