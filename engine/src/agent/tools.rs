//! Tool schema offered to the model and the mapping between tool calls and
//! actions.
//!
//! | Tool | Action |
//! |---|---|
//! | `run` | `CmdRun` |
//! | `edit` | `FileEdit` |
//! | `read` | `FileRead` |
//! | `think` | `Think` |
//! | `browse` | `Browse` |
//! | `delegate` | `Delegate` |
//! | `finish` | `Finish` |
//!
//! `finish` is always offered. `delegate` is offered when the agent has at
//! least one allowed child and its `agent` argument is an enum of them.

use serde::Deserialize;
use serde_json::{json, Value};

use sdk::event::{Action, DelegateInputs};

use crate::llm::{ToolCall, ToolSpec};

/// A child an agent may hand work to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateTarget {
    pub name: String,
    pub description: String,
}

/// Builds the schema for an agent's enabled tools
pub fn tool_specs(tools_enabled: &[String], delegates: &[DelegateTarget]) -> Vec<ToolSpec> {
    let mut specs: Vec<ToolSpec> = tools_enabled
        .iter()
        .filter_map(|name| standard_tool(name))
        .collect();

    if !delegates.is_empty() {
        let names: Vec<&str> = delegates.iter().map(|d| d.name.as_str()).collect();
        let roster = delegates
            .iter()
            .map(|d| {
                if d.description.is_empty() {
                    format!("- {}", d.name)
                } else {
                    format!("- {}: {}", d.name, d.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        specs.push(ToolSpec {
            name: "delegate".to_string(),
            description: format!(
                "Hand a sub-task to a specialist agent and wait for its summary.\nAvailable agents:\n{}",
                roster
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "agent": {"type": "string", "enum": names},
                    "inputs": {
                        "type": "object",
                        "properties": {
                            "task": {"type": "string"},
                            "completion_criteria": {"type": "string"},
                            "requirements": {"type": "string"},
                            "context": {"type": "string"}
                        },
                        "required": ["task", "completion_criteria"]
                    }
                },
                "required": ["agent", "inputs"]
            }),
        });
    }

    specs.push(ToolSpec {
        name: "finish".to_string(),
        description: "Report the result. Set task_completed to false to report progress and keep working."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "message": {"type": "string"},
                "task_completed": {"type": "boolean"}
            },
            "required": ["message", "task_completed"]
        }),
    });

    specs
}

fn standard_tool(name: &str) -> Option<ToolSpec> {
    let (description, parameters) = match name {
        "run" => (
            "Run a shell command in the workspace and return its output and exit code.",
            json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"]
            }),
        ),
        "edit" => (
            "Write a file. Without old_str the file is created or overwritten with new_str; \
             with old_str its single occurrence is replaced by new_str.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "old_str": {"type": "string"},
                    "new_str": {"type": "string"}
                },
                "required": ["path", "new_str"]
            }),
        ),
        "read" => (
            "Read a file from the workspace.",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        ),
        "think" => (
            "Write down reasoning. Has no effect on the workspace.",
            json!({
                "type": "object",
                "properties": {"thought": {"type": "string"}},
                "required": ["thought"]
            }),
        ),
        "browse" => (
            "Fetch a URL and return the response body.",
            json!({
                "type": "object",
                "properties": {"url": {"type": "string"}},
                "required": ["url"]
            }),
        ),
        _ => return None,
    };
    Some(ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    })
}

#[derive(Deserialize)]
struct RunArgs {
    command: String,
}

#[derive(Deserialize)]
struct EditArgs {
    path: String,
    #[serde(default)]
    old_str: Option<String>,
    new_str: String,
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct ThinkArgs {
    thought: String,
}

#[derive(Deserialize)]
struct BrowseArgs {
    url: String,
}

#[derive(Deserialize)]
struct DelegateArgs {
    agent: String,
    inputs: DelegateInputs,
}

#[derive(Deserialize)]
struct FinishArgs {
    message: String,
    task_completed: bool,
}

/// Maps a tool call to an action.
///
/// Returns a diagnostic when the tool is not offered to this agent or its
/// arguments do not match the schema.
pub fn action_from_call(call: &ToolCall, tools_enabled: &[String]) -> Result<Action, String> {
    let name = call.name.as_str();
    let builtin = matches!(name, "delegate" | "finish");
    if !builtin && !tools_enabled.iter().any(|enabled| enabled == name) {
        return Err(format!("tool '{}' is not available to this agent", name));
    }

    let arguments = if call.arguments.trim().is_empty() {
        "{}"
    } else {
        call.arguments.as_str()
    };

    let action = match name {
        "run" => parse::<RunArgs>(name, arguments).map(|a| Action::CmdRun { command: a.command }),
        "edit" => parse::<EditArgs>(name, arguments).map(|a| Action::FileEdit {
            path: a.path,
            old_str: a.old_str,
            new_str: a.new_str,
        }),
        "read" => parse::<PathArgs>(name, arguments).map(|a| Action::FileRead { path: a.path }),
        "think" => parse::<ThinkArgs>(name, arguments).map(|a| Action::Think { thought: a.thought }),
        "browse" => parse::<BrowseArgs>(name, arguments).map(|a| Action::Browse { url: a.url }),
        "delegate" => parse::<DelegateArgs>(name, arguments).map(|a| Action::Delegate {
            agent: a.agent,
            inputs: a.inputs,
        }),
        "finish" => parse::<FinishArgs>(name, arguments).map(|a| Action::Finish {
            message: a.message,
            task_completed: a.task_completed,
        }),
        other => Err(format!("unknown tool '{}'", other)),
    }?;
    Ok(action)
}

fn parse<T: for<'de> Deserialize<'de>>(tool: &str, arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments)
        .map_err(|e| format!("invalid arguments for '{}': {}", tool, e))
}

/// The tool call that would have produced `action`, used to replay the
/// agent's own actions back into the prompt.
pub fn call_for(action: &Action) -> Option<(&'static str, Value)> {
    let call = match action {
        Action::CmdRun { command } => ("run", json!({ "command": command })),
        Action::FileEdit {
            path,
            old_str,
            new_str,
        } => (
            "edit",
            json!({ "path": path, "old_str": old_str, "new_str": new_str }),
        ),
        Action::FileRead { path } => ("read", json!({ "path": path })),
        Action::Think { thought } => ("think", json!({ "thought": thought })),
        Action::Browse { url } => ("browse", json!({ "url": url })),
        Action::Delegate { agent, inputs } => {
            ("delegate", json!({ "agent": agent, "inputs": inputs }))
        }
        Action::Finish {
            message,
            task_completed,
        } => (
            "finish",
            json!({ "message": message, "task_completed": task_completed }),
        ),
        _ => return None,
    };
    Some(call)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall::new("call_1", name, arguments)
    }

    #[test]
    fn test_schema_follows_allowlist() {
        let specs = tool_specs(&enabled(&["read", "think", "bogus"]), &[]);
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["read", "think", "finish"]);
    }

    #[test]
    fn test_delegate_enum_lists_children() {
        let delegates = vec![
            DelegateTarget {
                name: "debug".into(),
                description: "Fixes failing tests".into(),
            },
            DelegateTarget {
                name: "deploy".into(),
                description: String::new(),
            },
        ];
        let specs = tool_specs(&[], &delegates);
        let delegate = specs.iter().find(|s| s.name == "delegate").unwrap();
        assert_eq!(
            delegate.parameters["properties"]["agent"]["enum"],
            json!(["debug", "deploy"])
        );
        assert!(delegate.description.contains("debug: Fixes failing tests"));
    }

    #[test]
    fn test_maps_tool_calls_to_actions() {
        let tools = enabled(&["run", "edit"]);
        assert_eq!(
            action_from_call(&call("run", r#"{"command":"echo hi"}"#), &tools).unwrap(),
            Action::CmdRun {
                command: "echo hi".into()
            }
        );
        assert_eq!(
            action_from_call(&call("edit", r#"{"path":"a.txt","new_str":"x"}"#), &tools).unwrap(),
            Action::FileEdit {
                path: "a.txt".into(),
                old_str: None,
                new_str: "x".into()
            }
        );
        assert_eq!(
            action_from_call(
                &call("finish", r#"{"message":"done","task_completed":true}"#),
                &tools
            )
            .unwrap(),
            Action::Finish {
                message: "done".into(),
                task_completed: true
            }
        );
    }

    #[test]
    fn test_delegate_call_with_optional_inputs() {
        let action = action_from_call(
            &call(
                "delegate",
                r#"{"agent":"debug","inputs":{"task":"fix test","completion_criteria":"all green"}}"#,
            ),
            &[],
        )
        .unwrap();
        match action {
            Action::Delegate { agent, inputs } => {
                assert_eq!(agent, "debug");
                assert_eq!(inputs.task, "fix test");
                assert_eq!(inputs.requirements, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_disabled_tool_is_a_diagnostic() {
        let err = action_from_call(&call("run", r#"{"command":"ls"}"#), &enabled(&["read"]))
            .unwrap_err();
        assert!(err.contains("not available"));
    }

    #[test]
    fn test_bad_arguments_are_a_diagnostic() {
        let err = action_from_call(&call("finish", r#"{"message":"done"}"#), &[]).unwrap_err();
        assert!(err.contains("invalid arguments for 'finish'"));
    }

    #[test]
    fn test_call_for_round_trips_tool_names() {
        let action = Action::FileRead {
            path: "src/lib.rs".into(),
        };
        let (name, args) = call_for(&action).unwrap();
        let back = action_from_call(&call(name, &args.to_string()), &enabled(&["read"])).unwrap();
        assert_eq!(back, action);
        assert!(call_for(&Action::Reject { reason: "no".into() }).is_none());
    }
}
