//! Test doubles and log capture shared by the scenario tests

#![allow(dead_code)]

use async_trait::async_trait;
use pipeline_runtime::connection::{AcquireError, Connection, ResourceFactory};
use pipeline_runtime::core::{
    error::{CoreError, CoreResult},
    lifecycle::{Lifecycle, LifecycleManager},
    message::Message,
    service::Service,
};
use pipeline_runtime::events::{Event, EventSender};
use pipeline_runtime::transport::{Consumer, MessageSink, Producer};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Shared, ordered record of what components did
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries ending in `:<suffix>`, with the suffix stripped
    pub fn with_suffix(&self, suffix: &str) -> Vec<String> {
        let suffix = format!(":{}", suffix);
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }
}

/// Journaling test double usable as a plain component, a step, a
/// connection, a consumer or a producer
pub struct Recorder {
    lifecycle: LifecycleManager,
    journal: Journal,
    fail_init: bool,
    fail_reinit: bool,
    fail_start: bool,
    fail_process: bool,
    connected: bool,
    inits: Arc<AtomicUsize>,
    seen_ids: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            journal: journal.clone(),
            fail_init: false,
            fail_reinit: false,
            fail_start: false,
            fail_process: false,
            connected: false,
            inits: Arc::new(AtomicUsize::new(0)),
            seen_ids: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_init(name: &str, journal: &Journal) -> Self {
        Self {
            fail_init: true,
            ..Self::new(name, journal)
        }
    }

    pub fn failing_start(name: &str, journal: &Journal) -> Self {
        Self {
            fail_start: true,
            ..Self::new(name, journal)
        }
    }

    /// A step whose `process` always fails and that cannot be initialized twice
    pub fn failing_restart(name: &str, journal: &Journal) -> Self {
        Self {
            fail_process: true,
            fail_reinit: true,
            ..Self::new(name, journal)
        }
    }

    /// A step whose `process` always fails
    pub fn failing(name: &str, journal: &Journal) -> Self {
        Self {
            fail_process: true,
            ..Self::new(name, journal)
        }
    }

    pub fn init_counter(&self) -> Arc<AtomicUsize> {
        self.inits.clone()
    }

    pub fn seen_ids(&self) -> Arc<Mutex<Vec<String>>> {
        self.seen_ids.clone()
    }

    fn note(&self, what: &str) {
        self.journal.record(format!("{}:{}", self.lifecycle.name(), what));
    }
}

#[async_trait]
impl Lifecycle for Recorder {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    async fn on_init(&mut self) -> CoreResult<()> {
        self.note("init");
        if self.fail_init || (self.fail_reinit && self.inits.load(Ordering::SeqCst) > 0) {
            return Err(CoreError::configuration(self.lifecycle.name(), "init refused"));
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_start(&mut self) -> CoreResult<()> {
        self.note("start");
        if self.fail_start {
            return Err(CoreError::configuration(self.lifecycle.name(), "start refused"));
        }
        Ok(())
    }

    async fn on_stop(&mut self) -> CoreResult<()> {
        self.note("stop");
        Ok(())
    }

    async fn on_close(&mut self) -> CoreResult<()> {
        self.note("close");
        Ok(())
    }
}

#[async_trait]
impl Service for Recorder {
    async fn process(&mut self, msg: &mut Message) -> CoreResult<()> {
        let name = self.lifecycle.name().to_string();
        self.seen_ids.lock().unwrap().push(msg.unique_id().to_string());
        self.note("process");
        if self.fail_process {
            return Err(CoreError::processing(&name, format!("{} failed on purpose", name)));
        }
        msg.set_metadata(name, "done");
        Ok(())
    }
}

#[async_trait]
impl Connection for Recorder {
    async fn connect(&mut self) -> CoreResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn descriptor(&self) -> String {
        format!("mem://{}", self.lifecycle.name())
    }
}

impl Consumer for Recorder {
    fn register(&mut self, _sink: MessageSink) {
        self.note("register");
    }
}

#[async_trait]
impl Producer for Recorder {
    async fn produce(&mut self, _msg: &Message) -> CoreResult<()> {
        self.note("produce");
        Ok(())
    }
}

/// Producer that keeps everything it is given
pub struct MockProducer {
    lifecycle: LifecycleManager,
    sent: Arc<Mutex<Vec<Message>>>,
    fail: bool,
}

impl MockProducer {
    pub fn new(name: &str) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            sent: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    /// Several producers appending to one shared list
    pub fn sharing(name: &str, sent: &Arc<Mutex<Vec<Message>>>) -> Self {
        Self {
            sent: sent.clone(),
            ..Self::new(name)
        }
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<Message>>> {
        self.sent.clone()
    }
}

#[async_trait]
impl Lifecycle for MockProducer {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }
}

#[async_trait]
impl Producer for MockProducer {
    async fn produce(&mut self, msg: &Message) -> CoreResult<()> {
        if self.fail {
            return Err(CoreError::processing(self.lifecycle.name(), "destination unavailable"));
        }
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

/// Consumer that delivers a fixed batch of messages when started
pub struct QueueConsumer {
    lifecycle: LifecycleManager,
    pending: Vec<Message>,
    sink: Option<MessageSink>,
}

impl QueueConsumer {
    pub fn new(payloads: &[&str]) -> Self {
        Self {
            lifecycle: LifecycleManager::new("queue-consumer"),
            pending: payloads.iter().map(|p| Message::new(*p)).collect(),
            sink: None,
        }
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            pending: messages,
            ..Self::new(&[])
        }
    }
}

#[async_trait]
impl Lifecycle for QueueConsumer {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    async fn on_start(&mut self) -> CoreResult<()> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| CoreError::configuration(self.lifecycle.name(), "not registered"))?;
        for msg in self.pending.drain(..) {
            sink.deliver(msg).await?;
        }
        Ok(())
    }
}

impl Consumer for QueueConsumer {
    fn register(&mut self, sink: MessageSink) {
        self.sink = Some(sink);
    }
}

/// Event sender that keeps every event
pub struct RecordingEventSender {
    lifecycle: LifecycleManager,
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingEventSender {
    pub fn new(name: &str) -> Self {
        Self {
            lifecycle: LifecycleManager::new(name),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<Event>>> {
        self.events.clone()
    }
}

#[async_trait]
impl Lifecycle for RecordingEventSender {
    fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }
}

#[async_trait]
impl EventSender for RecordingEventSender {
    async fn send(&mut self, event: &Event) -> CoreResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Resource that fails a set number of times before handing out handles
pub struct FlakyResource {
    failures_left: usize,
    calls: Arc<AtomicUsize>,
}

impl FlakyResource {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: times,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(usize::MAX)
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl ResourceFactory for FlakyResource {
    type Handle = usize;

    fn descriptor(&self) -> String {
        "tcp://broker.test:5672".to_string()
    }

    async fn acquire(&mut self) -> Result<usize, AcquireError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(AcquireError::transient(format!("connection refused (call {})", call)));
        }
        Ok(call)
    }
}

/// One log event seen by [`LogCapture`]
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// `tracing` layer that stores every event it sees
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Install for the current thread; events are captured until the guard drops
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events at `level` whose target starts with `target_prefix`
    pub fn at(&self, level: Level, target_prefix: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level && e.target.starts_with(target_prefix))
            .collect()
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{:?}", value);
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: collector.message,
            fields: collector.fields,
        });
    }
}
