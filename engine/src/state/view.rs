//! History view handed to an agent's step

use std::sync::Arc;

use sdk::event::{Action, DelegateInputs, Event, EventBody, EventSource, Observation};

/// The events one agent can see, with child delegations collapsed
#[derive(Debug, Clone, Copy)]
pub struct HistoryView<'a> {
    agent: &'a str,
    task: Option<&'a DelegateInputs>,
    events: &'a [Arc<Event>],
}

impl<'a> HistoryView<'a> {
    pub fn new(agent: &'a str, task: Option<&'a DelegateInputs>, events: &'a [Arc<Event>]) -> Self {
        Self {
            agent,
            task,
            events,
        }
    }

    pub fn agent(&self) -> &'a str {
        self.agent
    }

    /// Task received from the delegating agent, for child agents
    pub fn task(&self) -> Option<&'a DelegateInputs> {
        self.task
    }

    pub fn events(&self) -> &'a [Arc<Event>] {
        self.events
    }

    /// Events worth showing to an LLM: messages, the agent's own actions and
    /// their results, recalled context and errors. Control bookkeeping
    /// (state changes, confirmations, pause requests, switch audits) is
    /// dropped.
    pub fn conversation(&self) -> impl Iterator<Item = &'a Arc<Event>> {
        self.events.iter().filter(|event| match &event.body {
            EventBody::Action(action) => !matches!(
                action,
                Action::ConfirmationRequest { .. }
                    | Action::ChangeAgentState { .. }
                    | Action::AgentSwitch { .. }
            ),
            EventBody::Observation(observation) => !matches!(
                observation,
                Observation::AgentStateChanged { .. } | Observation::Confirmation { .. }
            ),
        })
    }

    /// Action/observation pairs since the last user or environment message,
    /// oldest first. An action without an answer yet is paired with `None`.
    pub fn recent_pairs(&self) -> Vec<(&'a Action, Option<&'a Observation>)> {
        let mut pairs: Vec<(u64, &'a Action, Option<&'a Observation>)> = Vec::new();
        for event in self.conversation() {
            match &event.body {
                EventBody::Action(Action::Message { .. }) if event.source != EventSource::Agent => {
                    pairs.clear();
                }
                EventBody::Action(action) => pairs.push((event.id, action, None)),
                EventBody::Observation(observation) => {
                    if let Some(slot) = pairs
                        .iter_mut()
                        .rev()
                        .find(|(id, _, seen)| seen.is_none() && event.cause_id == Some(*id))
                    {
                        slot.2 = Some(observation);
                    }
                }
            }
        }
        pairs
            .into_iter()
            .map(|(_, action, observation)| (action, observation))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sdk::event::{AgentStatus, NewEvent};

    fn seal(id: u64, new: NewEvent) -> Arc<Event> {
        Arc::new(Event::seal(new, id, Utc::now()).unwrap())
    }

    #[test]
    fn test_conversation_drops_bookkeeping() {
        let events = vec![
            seal(1, NewEvent::user_message("root", "hi")),
            seal(
                2,
                NewEvent::observation(
                    EventSource::Environment,
                    "root",
                    1,
                    Observation::AgentStateChanged {
                        state: AgentStatus::Running,
                    },
                ),
            ),
            seal(
                3,
                NewEvent::action(
                    EventSource::Agent,
                    "root",
                    Action::Think {
                        thought: "plan".to_string(),
                    },
                ),
            ),
        ];
        let view = HistoryView::new("root", None, &events);
        let ids: Vec<_> = view.conversation().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_recent_pairs_reset_by_user_message() {
        let ls = Action::CmdRun {
            command: "ls".to_string(),
        };
        let out = Observation::CmdOutput {
            output: "a".to_string(),
            exit_code: 0,
        };
        let events = vec![
            seal(1, NewEvent::action(EventSource::Agent, "root", ls.clone())),
            seal(
                2,
                NewEvent::observation(EventSource::Environment, "root", 1, out.clone()),
            ),
            seal(3, NewEvent::user_message("root", "try something else")),
            seal(4, NewEvent::action(EventSource::Agent, "root", ls.clone())),
            seal(
                5,
                NewEvent::observation(EventSource::Environment, "root", 4, out.clone()),
            ),
            seal(6, NewEvent::action(EventSource::Agent, "root", ls.clone())),
        ];
        let view = HistoryView::new("root", None, &events);
        let pairs = view.recent_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], (&ls, Some(&out)));
        assert_eq!(pairs[1], (&ls, None));
    }
}
