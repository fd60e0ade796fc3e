//! Test utilities for bank-dispatch
//!
//! This module provides in-memory collaborators for exercising the engine
//! without real instances or a real button surface:
//!
//! - [`Recorder`]: shared log of every [`HostEvent`] the fakes observe
//! - [`FakeRegistry`], [`FakeInstance`], [`FakeDefinition`]: a scriptable
//!   instance registry
//! - [`RecordingSurface`], [`RecordingPaging`], [`MemoryPersistence`],
//!   [`StaticBanks`]: host collaborators
//! - [`TestRig`]: all of the above wired into a [`Host`]
//! - Assertion macros for verifying recorded events
//!
//! # Example
//!
//! ```ignore
//! use bank_dispatch::testing::{FakeDefinition, FakeInstance, HostEvent, TestRig};
//!
//! let rig = TestRig::new();
//! rig.registry.insert(
//!     "obs",
//!     FakeInstance::new("OBS").with_definition("scene", FakeDefinition::new(&rig.recorder)),
//! );
//! let mut engine = rig.ready_engine();
//!
//! engine.bank_pressed(BankId::new(1, 1), Direction::Press, None)?;
//! assert_recorded!(rig.recorder.drain(), HostEvent::Indicated { pushed: true, .. });
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;

use crate::action::{Action, ActionId, Options};
use crate::bank::{BankId, RunSource};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::ActionError;
use crate::host::{BankConfig, BankConfigSource, Host, Paging, Persistence, Surface};
use crate::registry::{
    ActionDefinition, Capabilities, Execution, Instance, InstanceRegistry, LearnFuture, OptionSpec,
};
use crate::status::Severity;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Something a fake collaborator observed.
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    Subscribed(ActionId),
    Unsubscribed(ActionId),
    Executed {
        instance: String,
        kind: String,
        id: ActionId,
        device_id: Option<String>,
    },
    Invalidated(BankId),
    Indicated {
        bank: BankId,
        pushed: bool,
        device_id: Option<String>,
    },
    StatusChanged {
        bank: BankId,
        severity: Severity,
    },
    PageUp(Option<String>),
    PageSet(Option<String>, u32),
    PageDown(Option<String>),
}

/// Shared, ordered log of [`HostEvent`]s.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<HostEvent>>>,
}

impl Recorder {
    pub fn record(&self, event: HostEvent) {
        lock(&self.events).push(event);
    }

    /// Take every event recorded so far.
    pub fn drain(&self) -> Vec<HostEvent> {
        std::mem::take(&mut *lock(&self.events))
    }

    /// Copy of the events without draining them.
    pub fn events(&self) -> Vec<HostEvent> {
        lock(&self.events).clone()
    }

    /// Ids of executed actions, in execution order, draining the log.
    pub fn drain_executed(&self) -> Vec<ActionId> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                HostEvent::Executed { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }
}

/// Scriptable action definition.
///
/// Executes successfully by default and records every hook it receives.
#[derive(Clone)]
pub struct FakeDefinition {
    recorder: Recorder,
    capabilities: Capabilities,
    options: Vec<OptionSpec>,
    failure: Option<String>,
    panic: Option<String>,
    deferred: bool,
    learned: Option<Options>,
    learn_error: Option<String>,
    learn_delay: Duration,
    learns_finished: Arc<AtomicUsize>,
}

impl FakeDefinition {
    pub fn new(recorder: &Recorder) -> Self {
        Self {
            recorder: recorder.clone(),
            capabilities: Capabilities::EXECUTE,
            options: Vec::new(),
            failure: None,
            panic: None,
            deferred: false,
            learned: None,
            learn_error: None,
            learn_delay: Duration::ZERO,
            learns_finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Implement the subscribe and unsubscribe hooks.
    pub fn subscribing(mut self) -> Self {
        self.capabilities |= Capabilities::SUBSCRIBE | Capabilities::UNSUBSCRIBE;
        self
    }

    /// Drop the execute hook, leaving only the instance fallback.
    pub fn without_execute(mut self) -> Self {
        self.capabilities.remove(Capabilities::EXECUTE);
        self
    }

    pub fn with_option(mut self, id: &str, default: impl Into<Value>) -> Self {
        self.options.push(OptionSpec::new(id, default));
        self
    }

    /// Report `message` as the execution failure.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Panic with `message` instead of executing.
    pub fn panicking(mut self, message: &str) -> Self {
        self.panic = Some(message.to_string());
        self
    }

    /// Return deferred executions.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Implement learn, answering with `options`.
    pub fn learning(mut self, options: Option<Options>) -> Self {
        self.capabilities |= Capabilities::LEARN;
        self.learned = options;
        self
    }

    pub fn learn_delay(mut self, delay: Duration) -> Self {
        self.learn_delay = delay;
        self
    }

    pub fn rejecting_learn(mut self, message: &str) -> Self {
        self.capabilities |= Capabilities::LEARN;
        self.learn_error = Some(message.to_string());
        self
    }

    /// Counter of learn calls that ran to completion, shared by clones.
    pub fn learns_finished(&self) -> Arc<AtomicUsize> {
        self.learns_finished.clone()
    }
}

impl ActionDefinition for FakeDefinition {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn options(&self) -> &[OptionSpec] {
        &self.options
    }

    fn execute(&self, action: &Action, source: Option<&RunSource>) -> Execution {
        if let Some(message) = &self.panic {
            panic!("{message}");
        }
        self.recorder.record(HostEvent::Executed {
            instance: action.instance_id.clone(),
            kind: action.kind.clone(),
            id: action.id.clone(),
            device_id: source.and_then(|s| s.device_id.clone()),
        });
        let result = match &self.failure {
            Some(message) => Err(ActionError::new(message.clone())),
            None => Ok(()),
        };
        if self.deferred {
            Execution::deferred(async move { result })
        } else {
            Execution::Complete(result)
        }
    }

    fn subscribe(&self, action: &Action) {
        self.recorder.record(HostEvent::Subscribed(action.id.clone()));
    }

    fn unsubscribe(&self, action: &Action) {
        self.recorder
            .record(HostEvent::Unsubscribed(action.id.clone()));
    }

    fn learn(&self, _action: Action) -> LearnFuture {
        let delay = self.learn_delay;
        let learned = self.learned.clone();
        let error = self.learn_error.clone();
        let finished = self.learns_finished.clone();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            finished.fetch_add(1, Ordering::SeqCst);
            match error {
                Some(message) => Err(ActionError::new(message)),
                None => Ok(learned),
            }
        })
    }
}

/// Scriptable instance. Enabled with status 0 until told otherwise.
pub struct FakeInstance {
    label: String,
    enabled: AtomicBool,
    status: AtomicU8,
    definitions: HashMap<String, Arc<dyn ActionDefinition>>,
    fallback: Option<Recorder>,
}

impl FakeInstance {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            enabled: AtomicBool::new(true),
            status: AtomicU8::new(0),
            definitions: HashMap::new(),
            fallback: None,
        }
    }

    pub fn with_definition(mut self, kind: &str, definition: FakeDefinition) -> Self {
        self.definitions
            .insert(kind.to_string(), Arc::new(definition));
        self
    }

    /// Register a hand-written definition.
    pub fn with_shared_definition(
        mut self,
        kind: &str,
        definition: Arc<dyn ActionDefinition>,
    ) -> Self {
        self.definitions.insert(kind.to_string(), definition);
        self
    }

    /// Handle every action through an instance-wide handler.
    pub fn with_fallback(mut self, recorder: &Recorder) -> Self {
        self.fallback = Some(recorder.clone());
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: Severity) {
        self.status.store(status, Ordering::SeqCst);
    }
}

impl Instance for FakeInstance {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn status(&self) -> Severity {
        self.status.load(Ordering::SeqCst)
    }

    fn definition(&self, kind: &str) -> Option<Arc<dyn ActionDefinition>> {
        self.definitions.get(kind).cloned()
    }

    fn execute(&self, action: &Action, source: Option<&RunSource>) -> Option<Execution> {
        let recorder = self.fallback.as_ref()?;
        recorder.record(HostEvent::Executed {
            instance: action.instance_id.clone(),
            kind: action.kind.clone(),
            id: action.id.clone(),
            device_id: source.and_then(|s| s.device_id.clone()),
        });
        Some(Execution::done())
    }
}

/// In-memory instance registry.
#[derive(Default)]
pub struct FakeRegistry {
    instances: Mutex<HashMap<String, Arc<FakeInstance>>>,
}

impl FakeRegistry {
    /// Register an instance, returning a handle for later tweaks.
    pub fn insert(&self, id: &str, instance: FakeInstance) -> Arc<FakeInstance> {
        let instance = Arc::new(instance);
        lock(&self.instances).insert(id.to_string(), instance.clone());
        instance
    }

    pub fn remove(&self, id: &str) -> Option<Arc<FakeInstance>> {
        lock(&self.instances).remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<FakeInstance>> {
        lock(&self.instances).get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.instances).keys().cloned().collect()
    }
}

impl InstanceRegistry for FakeRegistry {
    fn instance(&self, id: &str) -> Option<Arc<dyn Instance>> {
        self.get(id).map(|instance| instance as Arc<dyn Instance>)
    }
}

/// Surface that records every call and tracks pushed state.
#[derive(Default)]
pub struct RecordingSurface {
    recorder: Recorder,
    pushed: Mutex<HashSet<BankId>>,
}

impl RecordingSurface {
    pub fn new(recorder: &Recorder) -> Self {
        Self {
            recorder: recorder.clone(),
            pushed: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_pushed(&self, bank: BankId, pushed: bool) {
        let mut set = lock(&self.pushed);
        if pushed {
            set.insert(bank);
        } else {
            set.remove(&bank);
        }
    }
}

impl Surface for RecordingSurface {
    fn indicate_push(&self, bank: BankId, pushed: bool, device_id: Option<&str>) {
        self.set_pushed(bank, pushed);
        self.recorder.record(HostEvent::Indicated {
            bank,
            pushed,
            device_id: device_id.map(str::to_string),
        });
    }

    fn invalidate(&self, bank: BankId) {
        self.recorder.record(HostEvent::Invalidated(bank));
    }

    fn is_pushed(&self, bank: BankId) -> bool {
        lock(&self.pushed).contains(&bank)
    }

    fn bank_status_changed(&self, bank: BankId, severity: Severity) {
        self.recorder
            .record(HostEvent::StatusChanged { bank, severity });
    }
}

/// Paging that records page requests.
#[derive(Default)]
pub struct RecordingPaging {
    recorder: Recorder,
}

impl RecordingPaging {
    pub fn new(recorder: &Recorder) -> Self {
        Self {
            recorder: recorder.clone(),
        }
    }
}

impl Paging for RecordingPaging {
    fn page_up(&self, device_id: Option<&str>) {
        self.recorder
            .record(HostEvent::PageUp(device_id.map(str::to_string)));
    }

    fn page_set(&self, device_id: Option<&str>, page: u32) {
        self.recorder
            .record(HostEvent::PageSet(device_id.map(str::to_string), page));
    }

    fn page_down(&self, device_id: Option<&str>) {
        self.recorder
            .record(HostEvent::PageDown(device_id.map(str::to_string)));
    }
}

/// Key/value persistence held in memory.
#[derive(Default)]
pub struct MemoryPersistence {
    values: Mutex<HashMap<String, Value>>,
    saves: AtomicUsize,
}

impl MemoryPersistence {
    /// How many times `save` was called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl Persistence for MemoryPersistence {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        lock(&self.values).insert(key.to_string(), value);
    }

    fn save(&self) {
        self.saves.fetch_add(1, Ordering::SeqCst);
    }
}

/// Bank configuration table. Unknown banks get the default configuration.
#[derive(Default)]
pub struct StaticBanks {
    configs: Mutex<HashMap<BankId, BankConfig>>,
}

impl StaticBanks {
    pub fn set(&self, bank: BankId, config: BankConfig) {
        lock(&self.configs).insert(bank, config);
    }
}

impl BankConfigSource for StaticBanks {
    fn bank_config(&self, bank: BankId) -> BankConfig {
        lock(&self.configs).get(&bank).cloned().unwrap_or_default()
    }
}

/// Fake host collaborators sharing one [`Recorder`].
pub struct TestRig {
    pub recorder: Recorder,
    pub registry: Arc<FakeRegistry>,
    pub banks: Arc<StaticBanks>,
    pub surface: Arc<RecordingSurface>,
    pub paging: Arc<RecordingPaging>,
    pub persistence: Arc<MemoryPersistence>,
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRig {
    pub fn new() -> Self {
        let recorder = Recorder::default();
        Self {
            registry: Arc::new(FakeRegistry::default()),
            banks: Arc::new(StaticBanks::default()),
            surface: Arc::new(RecordingSurface::new(&recorder)),
            paging: Arc::new(RecordingPaging::new(&recorder)),
            persistence: Arc::new(MemoryPersistence::default()),
            recorder,
        }
    }

    pub fn host(&self) -> Host {
        Host {
            registry: self.registry.clone(),
            banks: self.banks.clone(),
            surface: self.surface.clone(),
            paging: self.paging.clone(),
            persistence: self.persistence.clone(),
        }
    }

    /// Register an instance whose definitions all record into this rig.
    pub fn instance(&self, id: &str, kinds: &[&str]) -> Arc<FakeInstance> {
        let instance = kinds.iter().fold(FakeInstance::new(id), |instance, kind| {
            instance.with_definition(kind, FakeDefinition::new(&self.recorder).subscribing())
        });
        self.registry.insert(id, instance)
    }

    /// An engine that has not yet seen the instance list.
    ///
    /// # Panics
    ///
    /// Panics if the persisted action lists cannot be decoded.
    pub fn engine_with(&self, config: EngineConfig) -> Engine {
        match Engine::new(self.host(), config) {
            Ok(engine) => engine,
            Err(err) => panic!("failed to build engine: {err}"),
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine_with(EngineConfig::default())
    }

    /// An engine that has been told about every registered instance.
    pub fn ready_engine(&self) -> Engine {
        let mut engine = self.engine();
        engine.instances_loaded(self.registry.ids());
        engine
    }
}

/// Pause tokio time. Requires the `testing-time` feature.
#[cfg(feature = "testing-time")]
pub fn pause_time() {
    tokio::time::pause();
}

/// Resume tokio time. Requires the `testing-time` feature.
#[cfg(feature = "testing-time")]
pub fn resume_time() {
    tokio::time::resume();
}

/// Advance paused tokio time. Requires the `testing-time` feature.
#[cfg(feature = "testing-time")]
pub async fn advance_time(duration: Duration) {
    tokio::time::advance(duration).await;
}

/// Assert that an event matching a pattern was recorded.
///
/// # Example
///
/// ```ignore
/// use bank_dispatch::assert_recorded;
///
/// let events = rig.recorder.drain();
/// assert_recorded!(events, HostEvent::Invalidated(_));
/// ```
#[macro_export]
macro_rules! assert_recorded {
    ($events:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            $events.iter().any(|e| matches!(e, $pattern $(if $guard)?)),
            "Expected event matching `{}` to be recorded, but got: {:?}",
            stringify!($pattern),
            $events
        );
    };
}

/// Assert that no event matching a pattern was recorded.
#[macro_export]
macro_rules! assert_not_recorded {
    ($events:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            !$events.iter().any(|e| matches!(e, $pattern $(if $guard)?)),
            "Expected event matching `{}` NOT to be recorded, but it was: {:?}",
            stringify!($pattern),
            $events
        );
    };
}

/// Count how many recorded events match a pattern.
///
/// # Example
///
/// ```ignore
/// use bank_dispatch::count_recorded;
///
/// assert_eq!(count_recorded!(rig.recorder.drain(), HostEvent::Invalidated(_)), 2);
/// ```
#[macro_export]
macro_rules! count_recorded {
    ($events:expr, $pattern:pat $(if $guard:expr)?) => {
        $events.iter().filter(|e| matches!(e, $pattern $(if $guard)?)).count()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_drain() {
        let recorder = Recorder::default();
        recorder.record(HostEvent::Invalidated(BankId::new(1, 1)));
        recorder.record(HostEvent::PageUp(None));

        assert_eq!(recorder.events().len(), 2);
        let events = recorder.drain();
        assert_eq!(events.len(), 2);
        assert!(recorder.drain().is_empty());
        assert_recorded!(events, HostEvent::PageUp(None));
        assert_not_recorded!(events, HostEvent::PageDown(_));
        assert_eq!(count_recorded!(events, HostEvent::Invalidated(b) if b.page == 1), 1);
    }

    #[test]
    fn test_surface_tracks_pushed() {
        let recorder = Recorder::default();
        let surface = RecordingSurface::new(&recorder);
        let bank = BankId::new(1, 2);

        surface.indicate_push(bank, true, Some("sd"));
        assert!(surface.is_pushed(bank));
        surface.indicate_push(bank, false, None);
        assert!(!surface.is_pushed(bank));
        assert_eq!(recorder.drain().len(), 2);
    }

    #[test]
    fn test_static_banks_default() {
        let banks = StaticBanks::default();
        let bank = BankId::new(1, 1);
        assert_eq!(banks.bank_config(bank), BankConfig::default());

        banks.set(bank, BankConfig::latching());
        assert!(banks.bank_config(bank).latch);
    }
}
