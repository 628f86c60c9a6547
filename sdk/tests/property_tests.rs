use proptest::prelude::*;
use sdk::errors::{CrewErrorExt, EngineError};
use sdk::event::{Action, Event, EventSource, NewEvent, Observation};

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        "\\PC*".prop_map(|content| Action::Message { content }),
        "\\PC*".prop_map(|command| Action::CmdRun { command }),
        "[a-z/]{1,20}".prop_map(|path| Action::FileRead { path }),
        ("[a-z/]{1,20}", proptest::option::of("\\PC*"), "\\PC*").prop_map(
            |(path, old_str, new_str)| Action::FileEdit {
                path,
                old_str,
                new_str
            }
        ),
        ("\\PC*", any::<bool>()).prop_map(|(message, task_completed)| Action::Finish {
            message,
            task_completed
        }),
    ]
}

proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "\\PC*") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::LLMProvider(error_str.clone()),
            EngineError::ToolError(error_str.clone()),
            EngineError::UnknownAgent(error_str.clone()),
            EngineError::Persistence(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            // Hints are static strings and never echo the raw detail
            if error_str.len() > 8 {
                prop_assert!(!hint.contains(&error_str));
            }
        }
    }

    #[test]
    fn test_event_survives_disk_format(action in arb_action(), id in 2u64..10_000, cause in proptest::option::of(1u64..2)) {
        let mut new = NewEvent::action(EventSource::Agent, "coder", action);
        new.cause_id = cause;
        let event = Event::seal(new, id, chrono::Utc::now()).unwrap();

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, event);
    }

    #[test]
    fn test_observation_content_never_panics(output in "\\PC*", exit_code in any::<i32>()) {
        let observation = Observation::CmdOutput { output: output.clone(), exit_code };
        let content = observation.content();
        prop_assert!(content.starts_with(&output));
        let exit_marker = format!("[exit code: {}]", exit_code);
        prop_assert!(content.ends_with(&exit_marker));
    }
}
