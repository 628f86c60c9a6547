//! Runtimes execute runnable actions.
//!
//! [`RuntimeSubscriber`] connects any [`Runtime`] to the event stream: it
//! picks up agent actions the runtime handles, executes each on its own task
//! so the stream's delivery is never blocked, and appends the single
//! resulting observation. An action that already has an observation (for
//! example a synthetic timeout) is not executed again, and a result arriving
//! after such an observation is dropped with a warning.

mod local;

pub use local::{truncate_output, LocalRuntime, MAX_OUTPUT_BYTES};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sdk::event::{Event, EventId, EventSource, NewEvent};
use sdk::runtime::Runtime;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::stream::{EventStream, Subscriber};

pub struct RuntimeSubscriber {
    stream: EventStream,
    runtime: Arc<dyn Runtime>,
    inflight: Arc<Mutex<HashMap<EventId, AbortHandle>>>,
}

impl RuntimeSubscriber {
    pub fn new(stream: EventStream, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            stream,
            runtime,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscriber name used for the cursor file
    pub fn name(&self) -> String {
        format!("runtime:{}", self.runtime.name())
    }

    pub async fn inflight(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

#[async_trait]
impl Subscriber for RuntimeSubscriber {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        let Some(action) = event.as_action() else {
            return Ok(());
        };
        if event.source != EventSource::Agent || !self.runtime.handles(action) {
            return Ok(());
        }
        if self.inflight.lock().await.contains_key(&event.id) {
            return Ok(());
        }
        if self.stream.has_observation_for(event.id).await {
            debug!(event_id = event.id, "Action already observed; not executing");
            return Ok(());
        }

        let stream = self.stream.clone();
        let runtime = Arc::clone(&self.runtime);
        let inflight = Arc::clone(&self.inflight);
        let action = action.clone();
        let action_id = event.id;

        // Held across the spawn so the task cannot finish before it is tracked
        let mut tracked = self.inflight.lock().await;
        let task = tokio::spawn(async move {
            let observation = runtime.execute(action_id, &action).await;
            inflight.lock().await.remove(&action_id);

            let new = NewEvent::observation(
                EventSource::Environment,
                event.agent.clone(),
                action_id,
                observation,
            );
            match stream.append_answer(new).await {
                Ok(Some(_)) => {}
                Ok(None) => warn!(
                    event_id = action_id,
                    "Late observation ignored; action was already answered"
                ),
                Err(e) => warn!(event_id = action_id, error = %e, "Could not record observation"),
            }
        });
        tracked.insert(action_id, task.abort_handle());
        Ok(())
    }

    async fn on_closed(&self) {
        let tasks: Vec<(EventId, AbortHandle)> = self.inflight.lock().await.drain().collect();
        for (action_id, handle) in tasks {
            debug!(event_id = action_id, "Stream closed; abandoning action");
            self.runtime.cancel(action_id).await;
            handle.abort();
        }
    }
}
