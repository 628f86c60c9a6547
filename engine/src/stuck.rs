//! Stuck detection
//!
//! Inspects the most recent action/observation pairs of an agent's view and
//! reports patterns that mean the agent is looping instead of progressing.
//! The detector is advisory; the controller applies the configured policy.
//! A user or environment message resets the window, so a corrective note
//! gives the agent a fresh start.

use std::fmt;

use sdk::event::{Action, Observation};

use crate::state::HistoryView;

/// Consecutive identical actions that count as a loop
const REPEATED_ACTIONS: usize = 4;

/// Consecutive identical action/observation pairs that count as a loop
const REPEATED_PAIRS: usize = 3;

/// Consecutive error observations that count as a loop
const REPEATED_ERRORS: usize = 3;

/// Pairs inspected for A/B oscillation
const OSCILLATION_PAIRS: usize = 6;

/// Message recorded when the controller aborts a looping agent
pub const STUCK_MESSAGE: &str = "detected repetition pattern; aborting.";

/// Corrective note appended when the policy lets the agent continue
pub const CORRECTIVE_MESSAGE: &str = "You appear to be repeating the same steps without making progress. \
Stop, reconsider the approach, and try something different or finish with task_completed=false.";

/// Which loop was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckPattern {
    RepeatedAction,
    RepeatedPair,
    RepeatedErrors,
    Oscillation,
}

impl fmt::Display for StuckPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StuckPattern::RepeatedAction => "the same action four times in a row",
            StuckPattern::RepeatedPair => "the same action and result three times in a row",
            StuckPattern::RepeatedErrors => "three errors in a row",
            StuckPattern::Oscillation => "alternating between the same two steps",
        };
        f.write_str(text)
    }
}

type Pair<'a> = (&'a Action, Option<&'a Observation>);

/// Detects repetition over the last `window` action/observation pairs
#[derive(Debug, Clone, Copy)]
pub struct StuckDetector {
    window: usize,
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self::new(OSCILLATION_PAIRS)
    }
}

impl StuckDetector {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(REPEATED_ACTIONS),
        }
    }

    pub fn check(&self, view: &HistoryView<'_>) -> Option<StuckPattern> {
        let pairs = view.recent_pairs();
        let start = pairs.len().saturating_sub(self.window);
        self.check_pairs(&pairs[start..])
    }

    fn check_pairs(&self, pairs: &[Pair<'_>]) -> Option<StuckPattern> {
        if repeated_actions(pairs) {
            return Some(StuckPattern::RepeatedAction);
        }

        // Only answered pairs count for the remaining rules
        let answered: Vec<Pair<'_>> = pairs
            .iter()
            .copied()
            .filter(|(_, observation)| observation.is_some())
            .collect();

        if tail_all_equal(&answered, REPEATED_PAIRS) {
            return Some(StuckPattern::RepeatedPair);
        }
        if repeated_errors(&answered) {
            return Some(StuckPattern::RepeatedErrors);
        }
        if self.window >= OSCILLATION_PAIRS && oscillating(&answered) {
            return Some(StuckPattern::Oscillation);
        }
        None
    }
}

fn repeated_actions(pairs: &[Pair<'_>]) -> bool {
    if pairs.len() < REPEATED_ACTIONS {
        return false;
    }
    let tail = &pairs[pairs.len() - REPEATED_ACTIONS..];
    tail.iter().all(|(action, _)| *action == tail[0].0)
}

fn tail_all_equal(pairs: &[Pair<'_>], count: usize) -> bool {
    if pairs.len() < count {
        return false;
    }
    let tail = &pairs[pairs.len() - count..];
    tail.iter().all(|pair| *pair == tail[0])
}

fn repeated_errors(pairs: &[Pair<'_>]) -> bool {
    if pairs.len() < REPEATED_ERRORS {
        return false;
    }
    pairs[pairs.len() - REPEATED_ERRORS..]
        .iter()
        .all(|(_, observation)| observation.map_or(false, Observation::is_error))
}

/// A, B, A, B, A, B with A != B
fn oscillating(pairs: &[Pair<'_>]) -> bool {
    if pairs.len() < OSCILLATION_PAIRS {
        return false;
    }
    let tail = &pairs[pairs.len() - OSCILLATION_PAIRS..];
    tail[0] != tail[1] && tail.iter().enumerate().all(|(i, pair)| *pair == tail[i % 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sdk::event::{ErrorKind, Event, EventSource, NewEvent};
    use std::sync::Arc;

    struct Script {
        events: Vec<Arc<Event>>,
    }

    impl Script {
        fn new() -> Self {
            Self { events: Vec::new() }
        }

        fn push(&mut self, new: NewEvent) -> u64 {
            let id = self.events.len() as u64 + 1;
            self.events
                .push(Arc::new(Event::seal(new, id, Utc::now()).unwrap()));
            id
        }

        fn step(&mut self, action: Action, observation: Option<Observation>) {
            let id = self.push(NewEvent::action(EventSource::Agent, "root", action));
            if let Some(observation) = observation {
                self.push(NewEvent::observation(
                    EventSource::Environment,
                    "root",
                    id,
                    observation,
                ));
            }
        }

        fn check(&self) -> Option<StuckPattern> {
            StuckDetector::default().check(&HistoryView::new("root", None, &self.events))
        }
    }

    fn run(command: &str) -> Action {
        Action::CmdRun {
            command: command.to_string(),
        }
    }

    fn output(text: &str) -> Observation {
        Observation::CmdOutput {
            output: text.to_string(),
            exit_code: 0,
        }
    }

    #[test]
    fn test_identical_pairs_detected() {
        let mut script = Script::new();
        script.push(NewEvent::user_message("root", "list files"));
        script.step(run("ls"), Some(output("a b")));
        script.step(run("ls"), Some(output("a b")));
        assert_eq!(script.check(), None);

        script.step(run("ls"), Some(output("a b")));
        assert_eq!(script.check(), Some(StuckPattern::RepeatedPair));
    }

    #[test]
    fn test_identical_actions_with_changing_output() {
        let mut script = Script::new();
        for i in 0..4 {
            script.step(run("date"), Some(output(&format!("t{}", i))));
        }
        assert_eq!(script.check(), Some(StuckPattern::RepeatedAction));
    }

    #[test]
    fn test_consecutive_errors() {
        let mut script = Script::new();
        for command in ["make", "make all", "make build"] {
            script.step(
                run(command),
                Some(Observation::Error {
                    kind: ErrorKind::Tool,
                    message: "no makefile".to_string(),
                }),
            );
        }
        assert_eq!(script.check(), Some(StuckPattern::RepeatedErrors));
    }

    #[test]
    fn test_oscillation() {
        let mut script = Script::new();
        for _ in 0..3 {
            script.step(run("git stash"), Some(output("saved")));
            script.step(run("git stash pop"), Some(output("restored")));
        }
        assert_eq!(script.check(), Some(StuckPattern::Oscillation));
    }

    #[test]
    fn test_user_message_resets_window() {
        let mut script = Script::new();
        script.step(run("ls"), Some(output("a")));
        script.step(run("ls"), Some(output("a")));
        script.push(NewEvent::user_message("root", "keep going"));
        script.step(run("ls"), Some(output("a")));
        assert_eq!(script.check(), None);
    }

    #[test]
    fn test_progress_is_not_stuck() {
        let mut script = Script::new();
        for (i, command) in ["ls", "cat a", "cargo test", "cat b", "ls src", "cargo build"]
            .iter()
            .enumerate()
        {
            script.step(run(command), Some(output(&i.to_string())));
        }
        assert_eq!(script.check(), None);
    }
}
