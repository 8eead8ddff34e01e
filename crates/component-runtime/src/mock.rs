//! # Test Doubles
//!
//! Ready-made components for testing code that runs on top of a [`Runtime`](crate::Runtime),
//! without writing a struct and three trait impls per test.
//!
//! | Double | Stands in for | Useful for |
//! |---|---|---|
//! | [`MockOperation`] | an [`Operation`] | scripting outputs and errors, asserting inputs |
//! | [`MockService`] | a [`Service`] | start/stop counting, ordering, injected failures |
//! | [`MockPlugin`] | a [`Plugin`] | loading a set of components, failing `initialize` |
//! | [`EventRecorder`] | a subscriber | asserting which events were published |
//!
//! All doubles are `Clone` and clones share state, so a test keeps one copy for
//! assertions and hands the other to the runtime.
//!
//! ## Scripting an operation
//!
//! Expectations are consumed in order, one per `execute` call:
//!
//! ```rust
//! use component_runtime::mock::MockOperation;
//! use component_runtime::{Context, Envelope, Operation};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let op = MockOperation::new("pricing");
//!     op.expect_execute().with_input(json!({"sku": "a"})).return_ok(json!(42));
//!     op.expect_execute().return_err("upstream down");
//!
//!     let ctx = Context::background();
//!     let first = op.execute(&ctx, Envelope::new(json!({"sku": "a"}))).await.unwrap();
//!     assert_eq!(first.into_envelope().data, json!(42));
//!     assert!(op.execute(&ctx, Envelope::default()).await.is_err());
//!
//!     op.verify();
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::component::{
    Component, ComponentHandle, ComponentInfo, ComponentType, Envelope, Operation,
    OperationResult, Service, ServiceState, ServiceStatus,
};
use crate::context::Context;
use crate::error::BoxError;
use crate::event::{Event, EventBus, Subscription};
use crate::plugin::{Plugin, PluginRegistrar};

// =============================================================================
// MockOperation
// =============================================================================

struct Expectation {
    input: Option<Value>,
    response: Result<Value, String>,
}

/// An [`Operation`] that replays scripted responses.
///
/// A call with no expectation left, or whose input does not match, returns an
/// error and is counted as unexpected; [`verify`](MockOperation::verify) fails on
/// either leftover expectations or unexpected calls.
#[derive(Clone)]
pub struct MockOperation {
    info: ComponentInfo,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    calls: Arc<Mutex<Vec<Envelope>>>,
    unexpected: Arc<AtomicUsize>,
}

impl MockOperation {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            info: ComponentInfo::new(id.clone(), id, ComponentType::Operation),
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            unexpected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An operation that echoes every input back, with no expectations.
    pub fn echo(id: impl Into<String>) -> EchoOperation {
        let id = id.into();
        EchoOperation {
            info: ComponentInfo::new(id.clone(), id, ComponentType::Operation),
        }
    }

    pub fn expect_execute(&self) -> ExecuteExpectationBuilder {
        ExecuteExpectationBuilder {
            input: None,
            expectations: self.expectations.clone(),
        }
    }

    /// Inputs received so far, in call order.
    pub fn calls(&self) -> Vec<Envelope> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn handle(&self) -> ComponentHandle {
        ComponentHandle::operation(self.clone())
    }

    /// Panics unless every expectation was consumed by a matching call.
    pub fn verify(&self) {
        let remaining = self.expectations.lock().len();
        if remaining > 0 {
            panic!("Not all expectations were met. {remaining} remaining");
        }
        let unexpected = self.unexpected.load(Ordering::SeqCst);
        if unexpected > 0 {
            panic!("{unexpected} unexpected execute call(s)");
        }
    }
}

impl Component for MockOperation {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }
}

#[async_trait]
impl Operation for MockOperation {
    async fn execute(&self, _ctx: &Context, input: Envelope) -> Result<OperationResult, BoxError> {
        self.calls.lock().push(input.clone());
        let expectation = self.expectations.lock().pop_front();

        let Some(expectation) = expectation else {
            self.unexpected.fetch_add(1, Ordering::SeqCst);
            return Err(format!("unexpected execute call on {}", self.info.id).into());
        };
        if let Some(expected) = expectation.input {
            if expected != input.data {
                self.unexpected.fetch_add(1, Ordering::SeqCst);
                return Err(format!("expected input {expected}, got {}", input.data).into());
            }
        }
        match expectation.response {
            Ok(value) => Ok(OperationResult::Raw(value)),
            Err(message) => Err(message.into()),
        }
    }
}

/// Builder for `execute` expectations.
pub struct ExecuteExpectationBuilder {
    input: Option<Value>,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
}

impl ExecuteExpectationBuilder {
    /// Only match a call whose input data equals `input`.
    pub fn with_input(mut self, input: impl Into<Value>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn return_ok(self, output: impl Into<Value>) {
        self.push(Ok(output.into()));
    }

    pub fn return_err(self, message: impl Into<String>) {
        self.push(Err(message.into()));
    }

    fn push(self, response: Result<Value, String>) {
        self.expectations.lock().push_back(Expectation {
            input: self.input,
            response,
        });
    }
}

/// Returns its input unchanged. See [`MockOperation::echo`].
#[derive(Clone)]
pub struct EchoOperation {
    info: ComponentInfo,
}

impl EchoOperation {
    pub fn handle(&self) -> ComponentHandle {
        ComponentHandle::operation(self.clone())
    }
}

impl Component for EchoOperation {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }
}

#[async_trait]
impl Operation for EchoOperation {
    async fn execute(&self, _ctx: &Context, input: Envelope) -> Result<OperationResult, BoxError> {
        Ok(input.into())
    }
}

// =============================================================================
// MockService
// =============================================================================

/// A [`Service`] that counts lifecycle calls and can be told to fail.
#[derive(Clone)]
pub struct MockService {
    info: ComponentInfo,
    state: Arc<ServiceState>,
    fail_start: Arc<AtomicBool>,
    fail_stop: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockService {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            info: ComponentInfo::new(id.clone(), id, ComponentType::Service),
            state: Arc::new(ServiceState::new()),
            fail_start: Arc::new(AtomicBool::new(false)),
            fail_stop: Arc::new(AtomicBool::new(false)),
            starts: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
            journal: None,
        }
    }

    pub fn failing_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_stop(self) -> Self {
        self.fail_stop.store(true, Ordering::SeqCst);
        self
    }

    /// Append `"start:<id>"` / `"stop:<id>"` to a journal shared between services,
    /// to assert ordering.
    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> ComponentHandle {
        ComponentHandle::service(self.clone())
    }

    fn record(&self, what: &str) {
        if let Some(journal) = &self.journal {
            journal.lock().push(format!("{what}:{}", self.info.id));
        }
    }
}

impl Component for MockService {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }
}

#[async_trait]
impl Service for MockService {
    async fn start(&self, _ctx: &Context) -> Result<(), BoxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.record("start");
        let outcome: Result<(), BoxError> = if self.fail_start.load(Ordering::SeqCst) {
            Err(format!("{} refused to start", self.info.id).into())
        } else {
            Ok(())
        };
        self.state.start_with(async move { outcome }).await
    }

    async fn stop(&self, _ctx: &Context) -> Result<(), BoxError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.record("stop");
        let outcome: Result<(), BoxError> = if self.fail_stop.load(Ordering::SeqCst) {
            Err(format!("{} refused to stop", self.info.id).into())
        } else {
            Ok(())
        };
        self.state.stop_with(async move { outcome }).await
    }

    fn status(&self) -> ServiceStatus {
        self.state.status()
    }
}

// =============================================================================
// MockPlugin
// =============================================================================

/// A [`Plugin`] that registers a fixed set of components.
#[derive(Clone)]
pub struct MockPlugin {
    id: String,
    version: String,
    components: Vec<ComponentHandle>,
    fail_initialize: bool,
    fail_dispose: bool,
    initialized: Arc<AtomicUsize>,
    disposed: Arc<AtomicUsize>,
}

impl MockPlugin {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: "0.1.0".to_string(),
            components: Vec::new(),
            fail_initialize: false,
            fail_dispose: false,
            initialized: Arc::new(AtomicUsize::new(0)),
            disposed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_component(mut self, component: ComponentHandle) -> Self {
        self.components.push(component);
        self
    }

    /// Stage every component, then fail.
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_dispose(mut self) -> Self {
        self.fail_dispose = true;
        self
    }

    pub fn initialize_count(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn dispose_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for MockPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn initialize(&self, _ctx: &Context, registrar: &mut PluginRegistrar) -> Result<(), BoxError> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        for component in &self.components {
            registrar.register(component.clone())?;
        }
        if self.fail_initialize {
            return Err(format!("plugin {} failed to initialize", self.id).into());
        }
        Ok(())
    }

    async fn dispose(&self) -> Result<(), BoxError> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        if self.fail_dispose {
            return Err(format!("plugin {} failed to dispose", self.id).into());
        }
        Ok(())
    }
}

// =============================================================================
// EventRecorder
// =============================================================================

/// Captures every event published on a set of topics.
///
/// Subscriptions are inline, so events are visible as soon as `publish` returns.
/// They are cancelled when the recorder is dropped.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
    subscriptions: Vec<Subscription>,
}

impl EventRecorder {
    pub fn new(bus: &EventBus, topics: &[&str]) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriptions = topics
            .iter()
            .map(|topic| {
                let sink = events.clone();
                bus.subscribe(*topic, move |event: &Event| {
                    sink.lock().push(event.clone());
                    Ok(())
                })
            })
            .collect();
        Self {
            events,
            subscriptions,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Topics of the recorded events, in arrival order.
    pub fn topics(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.topic.clone()).collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.events.lock().iter().filter(|e| e.topic == topic).count()
    }

    pub fn last(&self, topic: &str) -> Option<Event> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|e| e.topic == topic)
            .cloned()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        for subscription in &self.subscriptions {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    #[should_panic(expected = "1 remaining")]
    async fn verify_reports_unmet_expectations() {
        let op = MockOperation::new("op");
        op.expect_execute().return_ok(json!(1));
        op.verify();
    }

    #[tokio::test]
    async fn mismatched_input_is_an_error() {
        let op = MockOperation::new("op");
        op.expect_execute().with_input(json!("a")).return_ok(json!(1));

        let err = op
            .execute(&Context::background(), Envelope::new(json!("b")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected input"));
        assert_eq!(op.call_count(), 1);
    }

    #[tokio::test]
    async fn mock_service_tracks_status_and_counts() {
        let svc = MockService::new("svc");
        let ctx = Context::background();
        svc.start(&ctx).await.unwrap();
        assert!(svc.is_running());

        svc.set_fail_start(true);
        svc.stop(&ctx).await.unwrap();
        assert!(svc.start(&ctx).await.is_err());
        assert_eq!(svc.status(), ServiceStatus::Failed);
        assert_eq!((svc.start_count(), svc.stop_count()), (2, 1));
    }

    #[test]
    fn recorder_stops_listening_when_dropped() {
        let bus = EventBus::new();
        {
            let recorder = EventRecorder::new(&bus, &["a", "b"]);
            bus.publish(Event::new("a", "test"));
            bus.publish(Event::new("c", "test"));
            assert_eq!(recorder.topics(), vec!["a"]);
        }
        assert!(bus.topics().is_empty());
    }
}
