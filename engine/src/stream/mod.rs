//! Event stream
//!
//! The durable, ordered, multicast log every session component talks
//! through. There is exactly one writer path ([`EventStream::append`]) which
//! assigns ids, persists the event and advances the stream head. Each
//! subscriber is driven by its own delivery task that pulls events after its
//! cursor in strict id order, so a slow subscriber never blocks the writer
//! or other subscribers.
//!
//! Delivery is at-least-once: a subscriber's cursor is persisted after each
//! event it accepts, and a crash between the callback and the cursor write
//! replays that event once more. Subscribers must therefore be idempotent
//! with respect to event id.

mod store;

pub use store::FileStore;
pub(crate) use store::write_atomic;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::EngineError;
use sdk::event::{
    ErrorKind, Event, EventId, EventKind, EventSource, NewEvent, Observation,
};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `close()` waits for a subscriber to drain before aborting it
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives events from the stream
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handles one event. An error is retried once; a second error removes
    /// the subscriber and records an `Error` observation in the stream.
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()>;

    /// Called once after the stream is closed and every event was delivered
    async fn on_closed(&self) {}
}

/// Predicate for [`EventStream::get_events`]
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub source: Option<EventSource>,
    pub subkinds: Vec<&'static str>,
    pub agent: Option<String>,
    pub cause_id: Option<EventId>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn subkind(mut self, subkind: &'static str) -> Self {
        self.subkinds.push(subkind);
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn cause(mut self, cause_id: EventId) -> Self {
        self.cause_id = Some(cause_id);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.kind.map_or(true, |kind| event.kind() == kind)
            && self.source.map_or(true, |source| event.source == source)
            && (self.subkinds.is_empty() || self.subkinds.contains(&event.subkind()))
            && self.agent.as_ref().map_or(true, |agent| &event.agent == agent)
            && self.cause_id.map_or(true, |cause| event.cause_id == Some(cause))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Head {
    latest: EventId,
    closed: bool,
}

struct SubscriberEntry {
    name: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct StreamInner {
    session_id: String,
    store: FileStore,
    log: RwLock<Vec<Arc<Event>>>,
    /// Ids of actions that already have an observation
    answered: RwLock<HashSet<EventId>>,
    append_lock: Mutex<()>,
    head: watch::Sender<Head>,
    subscribers: Mutex<Vec<SubscriberEntry>>,
}

/// Append-only, single-writer, multi-subscriber event log
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<StreamInner>,
}

impl EventStream {
    /// Opens the stream stored in `dir`, loading every persisted event.
    ///
    /// A new session directory yields an empty stream.
    pub fn open(dir: &Path, session_id: impl Into<String>) -> Result<Self, EngineError> {
        let store = FileStore::open(dir)?;
        let events: Vec<Arc<Event>> = store.load_events()?.into_iter().map(Arc::new).collect();
        let latest = events.len() as EventId;
        let answered = events.iter().filter_map(|event| answered_id(event)).collect();
        let (head, _) = watch::channel(Head {
            latest,
            closed: false,
        });

        Ok(Self {
            inner: Arc::new(StreamInner {
                session_id: session_id.into(),
                store,
                log: RwLock::new(events),
                answered: RwLock::new(answered),
                append_lock: Mutex::new(()),
                head,
                subscribers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn dir(&self) -> &Path {
        self.inner.store.root()
    }

    pub fn latest_id(&self) -> EventId {
        self.inner.head.borrow().latest
    }

    pub fn is_closed(&self) -> bool {
        self.inner.head.borrow().closed
    }

    /// Assigns the next id, stamps the timestamp, persists, then advances the
    /// head so subscribers pick the event up.
    ///
    /// # Errors
    ///
    /// `StreamClosed` after [`close`](Self::close); `InvalidEvent` when the
    /// cause does not precede the new id; `Persistence` when the write fails
    /// (the event is then not part of the stream).
    pub async fn append(&self, new: NewEvent) -> Result<EventId, EngineError> {
        let _guard = self.inner.append_lock.lock().await;
        self.append_locked(new).await
    }

    /// Appends an observation unless its action was already answered.
    ///
    /// The check and the write happen under the append lock, so of two
    /// racing answers to the same action exactly one lands. Returns `None`
    /// for the one that lost. Events that answer nothing are appended as by
    /// [`append`](Self::append).
    pub async fn append_answer(&self, new: NewEvent) -> Result<Option<EventId>, EngineError> {
        let _guard = self.inner.append_lock.lock().await;
        if new.body.kind() == EventKind::Observation {
            if let Some(cause) = new.cause_id {
                if self.inner.answered.read().await.contains(&cause) {
                    debug!(
                        cause_id = cause,
                        subkind = new.body.subkind(),
                        "Action already answered; dropping observation"
                    );
                    return Ok(None);
                }
            }
        }
        self.append_locked(new).await.map(Some)
    }

    async fn append_locked(&self, new: NewEvent) -> Result<EventId, EngineError> {
        if self.is_closed() {
            return Err(EngineError::StreamClosed);
        }

        let id = self.inner.head.borrow().latest + 1;
        let event = Event::seal(new, id, Utc::now())?;
        self.inner.store.write_event(&event).await?;

        let subkind = event.subkind();
        let agent = event.agent.clone();
        if let Some(cause) = answered_id(&event) {
            self.inner.answered.write().await.insert(cause);
        }
        self.inner.log.write().await.push(Arc::new(event));
        self.inner.head.send_modify(|head| head.latest = id);

        debug!(event_id = id, subkind, agent = %agent, "Appended event");
        Ok(id)
    }

    /// Registers a subscriber.
    ///
    /// Events with id greater than `resume_from` are delivered first, then
    /// live events. With `None` the subscriber's persisted cursor is used, or
    /// `0` for a subscriber this session has never seen.
    pub async fn subscribe(
        &self,
        name: &str,
        subscriber: Arc<dyn Subscriber>,
        resume_from: Option<EventId>,
    ) -> Result<(), EngineError> {
        let mut subscribers = self.inner.subscribers.lock().await;
        if self.is_closed() {
            return Err(EngineError::StreamClosed);
        }
        if subscribers.iter().any(|entry| entry.name == name) {
            return Err(EngineError::DuplicateSubscriber(name.to_string()));
        }

        let cursor = match resume_from {
            Some(id) => id,
            None => self.inner.store.read_cursor(name)?.unwrap_or(0),
        };
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(deliver(
            self.clone(),
            name.to_string(),
            subscriber,
            cursor,
            stop_rx,
        ));

        info!(subscriber = name, resume_from = cursor, "Subscriber registered");
        subscribers.push(SubscriberEntry {
            name: name.to_string(),
            stop,
            task,
        });
        Ok(())
    }

    /// Stops delivering to `name`. Returns false if it was not subscribed.
    pub async fn unsubscribe(&self, name: &str) -> bool {
        let entry = {
            let mut subscribers = self.inner.subscribers.lock().await;
            let index = subscribers.iter().position(|entry| entry.name == name);
            index.map(|index| subscribers.remove(index))
        };
        match entry {
            Some(entry) => {
                entry.stop.send_replace(true);
                debug!(subscriber = name, "Subscriber removed");
                true
            }
            None => false,
        }
    }

    pub async fn is_subscribed(&self, name: &str) -> bool {
        self.inner
            .subscribers
            .lock()
            .await
            .iter()
            .any(|entry| entry.name == name)
    }

    /// Events with id `>= from_id` matching `filter`, at most `limit` of them
    pub async fn get_events(
        &self,
        filter: &EventFilter,
        from_id: EventId,
        limit: Option<usize>,
    ) -> Vec<Arc<Event>> {
        let log = self.inner.log.read().await;
        let start = from_id.saturating_sub(1) as usize;
        log.iter()
            .skip(start)
            .filter(|event| filter.matches(event))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn event(&self, id: EventId) -> Option<Arc<Event>> {
        if id == 0 {
            return None;
        }
        self.inner.log.read().await.get(id as usize - 1).cloned()
    }

    /// Whether any observation answers `action_id`
    pub async fn has_observation_for(&self, action_id: EventId) -> bool {
        self.inner.answered.read().await.contains(&action_id)
    }

    async fn events_after(&self, cursor: EventId) -> Vec<Arc<Event>> {
        let log = self.inner.log.read().await;
        log.iter().skip(cursor as usize).cloned().collect()
    }

    /// Rejects further appends, lets every subscriber drain what was
    /// appended before, calls their `on_closed`, and waits for them.
    pub async fn close(&self) {
        {
            let _guard = self.inner.append_lock.lock().await;
            if self.is_closed() {
                return;
            }
            self.inner.head.send_modify(|head| head.closed = true);
        }

        let entries: Vec<SubscriberEntry> = self.inner.subscribers.lock().await.drain(..).collect();
        for entry in entries {
            let mut task = entry.task;
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
                warn!(subscriber = %entry.name, "Subscriber did not drain in time; aborting");
                task.abort();
            }
        }
        info!(session = %self.inner.session_id, last_id = self.latest_id(), "Event stream closed");
    }
}

/// The action `event` answers, if it is an observation with a cause
fn answered_id(event: &Event) -> Option<EventId> {
    match (event.kind(), event.cause_id) {
        (EventKind::Observation, Some(cause)) => Some(cause),
        _ => None,
    }
}

/// Calls `on_event`, retrying once on failure.
async fn deliver_one(
    name: &str,
    subscriber: &Arc<dyn Subscriber>,
    event: &Arc<Event>,
) -> anyhow::Result<()> {
    match subscriber.on_event(Arc::clone(event)).await {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!(subscriber = name, event_id = event.id, error = %first, "Subscriber failed; retrying once");
            subscriber.on_event(Arc::clone(event)).await
        }
    }
}

/// Delivery task of one subscriber
async fn deliver(
    stream: EventStream,
    name: String,
    subscriber: Arc<dyn Subscriber>,
    mut cursor: EventId,
    mut stop: watch::Receiver<bool>,
) {
    let mut head = stream.inner.head.subscribe();

    loop {
        for event in stream.events_after(cursor).await {
            if *stop.borrow() {
                return;
            }
            if let Err(err) = deliver_one(&name, &subscriber, &event).await {
                error!(subscriber = %name, event_id = event.id, error = %err, "Subscriber failed twice; unsubscribing");
                drop_failed_subscriber(&stream, &name, event.id, &err).await;
                return;
            }
            cursor = event.id;
            if let Err(err) = stream.inner.store.write_cursor(&name, cursor).await {
                warn!(subscriber = %name, error = %err, "Failed to persist subscriber cursor");
            }
        }

        let current = *head.borrow_and_update();
        if current.latest > cursor {
            continue;
        }
        if current.closed {
            subscriber.on_closed().await;
            return;
        }

        tokio::select! {
            changed = head.changed() => {
                if changed.is_err() {
                    subscriber.on_closed().await;
                    return;
                }
            }
            _ = stop.changed() => return,
        }
    }
}

async fn drop_failed_subscriber(
    stream: &EventStream,
    name: &str,
    event_id: EventId,
    err: &anyhow::Error,
) {
    {
        let mut subscribers = stream.inner.subscribers.lock().await;
        subscribers.retain(|entry| entry.name != name);
    }

    // No cause link: the failed event may be an action awaiting its real result
    let report = NewEvent::notice(
        EventSource::Environment,
        String::new(),
        Observation::Error {
            kind: ErrorKind::Subscriber,
            message: format!("subscriber '{}' failed on event {}: {}", name, event_id, err),
        },
    );
    if let Err(append_err) = stream.append(report).await {
        debug!(subscriber = name, error = %append_err, "Could not record subscriber failure");
    }
}
