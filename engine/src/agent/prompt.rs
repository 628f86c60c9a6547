//! Prompt construction
//!
//! A step's prompt is the agent's system template followed by the condensed
//! history view. The agent's own actions are rendered as the tool calls that
//! produced them so the model sees a consistent transcript.

use std::path::Path;

use sdk::event::{Action, EventBody, EventSource, Observation};
use tracing::warn;

use super::tools::call_for;
use super::WorkingMemory;
use crate::llm::Message;
use crate::state::HistoryView;

/// Loads `prompts_dir/filename`, falling back to the built-in template when
/// no file is configured or it cannot be read.
pub fn load_system_prompt(
    prompts_dir: &Path,
    filename: Option<&str>,
    agent: &str,
    description: &str,
) -> String {
    if let Some(filename) = filename {
        let path = prompts_dir.join(filename);
        match std::fs::read_to_string(&path) {
            Ok(template) => return template,
            Err(e) => warn!(agent, path = ?path, error = %e, "Prompt template unreadable, using default"),
        }
    }
    default_system_prompt(agent, description)
}

pub fn default_system_prompt(agent: &str, description: &str) -> String {
    let role = if description.is_empty() {
        String::new()
    } else {
        format!(" Your role: {}", description)
    };
    format!(
        "You are the '{agent}' agent of a software engineering assistant.{role}\n\
         Work step by step. Call exactly one tool per reply. \
         Answer in plain text only when you need input from the user.\n\
         When the task is done call `finish` with task_completed=true and a short summary."
    )
}

/// Renders the view into chat messages within `context_limit` tokens
pub fn build_messages(system_prompt: &str, view: &HistoryView<'_>, context_limit: usize) -> Vec<Message> {
    let mut memory = WorkingMemory::with_limit(context_limit);
    memory.push(Message::system(system_prompt));

    if let Some(task) = view.task() {
        let mut text = format!(
            "You have been delegated a task.\nTask: {}\nCompletion criteria: {}",
            task.task, task.completion_criteria
        );
        if let Some(requirements) = &task.requirements {
            text.push_str(&format!("\nRequirements: {}", requirements));
        }
        if let Some(context) = &task.context {
            text.push_str(&format!("\nContext: {}", context));
        }
        memory.push(Message::user(text));
    }

    for event in view.conversation() {
        let message = match (&event.body, event.source) {
            (EventBody::Action(Action::Message { content }), EventSource::User) => {
                Message::user(content.clone())
            }
            (EventBody::Action(Action::Message { content }), EventSource::Agent) => {
                Message::assistant(content.clone())
            }
            (EventBody::Action(Action::Message { content }), EventSource::Environment) => {
                Message::system(content.clone())
            }
            (EventBody::Action(action), _) => match call_for(action) {
                Some((name, arguments)) => Message::assistant(
                    serde_json::json!({ "function": name, "arguments": arguments }).to_string(),
                ),
                None => Message::assistant(action.summary()),
            },
            (EventBody::Observation(observation @ Observation::Recall { .. }), _) => {
                Message::system(observation.content())
            }
            (EventBody::Observation(observation), _) => Message::user(format!(
                "[{} result]\n{}",
                observation.subkind(),
                observation.content()
            )),
        };
        memory.push(message);
    }

    memory.into_messages()
}
