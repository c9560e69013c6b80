use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, ITERATE_COMMAND, LOOPS_COMMAND, NO_ARG_COMMANDS, PATH_ARG_COMMANDS,
    RAW_ARG_COMMANDS,
};

/// Round budget bounds for `/loops`, matching the studio's loop picker.
const MIN_LOOPS: u64 = 1;
const MAX_LOOPS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub settings_update: BTreeMap<String, Value>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            settings_update: BTreeMap::new(),
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn arg_key_for_action(action: &str) -> &'static str {
    match action {
        "set_preset" | "delete_preset" => "preset",
        "set_model" => "model",
        "set_provider" => "provider",
        "set_credential" => "credential",
        "create_preset" => "name",
        _ => "value",
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = match shell_words::split(arg) {
        Ok(parts) => parts,
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    };
    let parts: Vec<String> = parts.into_iter().filter(|value| !value.is_empty()).collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Turn one line of chat input into an intent. Free text is a generation
/// subject; `/command` lines map through the command registry. Unknown
/// commands come back as `unknown` so the shell can print usage instead
/// of generating an animation named "/tpyo".
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len == 0 {
            return Intent::new("unknown", text);
        }
        let command = slash_tail[..command_len].to_ascii_lowercase();
        let arg = slash_tail[command_len..].trim();

        if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
            return Intent::new(action, text);
        }

        if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
            let mut intent = Intent::new(action, text);
            if !arg.is_empty() {
                intent.command_args.insert(
                    arg_key_for_action(action).to_string(),
                    Value::String(arg.to_string()),
                );
            }
            return intent;
        }

        if let Some(action) = find_action(&command, PATH_ARG_COMMANDS) {
            let mut intent = Intent::new(action, text);
            let path = parse_single_path_arg(arg);
            if !path.is_empty() {
                intent
                    .command_args
                    .insert("path".to_string(), Value::String(path));
            }
            return intent;
        }

        if command == LOOPS_COMMAND.command {
            let mut intent = Intent::new(LOOPS_COMMAND.action, text);
            if let Ok(value) = arg.parse::<u64>() {
                let clamped = value.clamp(MIN_LOOPS, MAX_LOOPS);
                intent
                    .settings_update
                    .insert("total_rounds".to_string(), Value::Number(clamped.into()));
            }
            return intent;
        }

        if command == ITERATE_COMMAND.command {
            let mut intent = Intent::new(ITERATE_COMMAND.action, text);
            if !arg.is_empty() {
                intent.prompt = Some(arg.to_string());
            }
            return intent;
        }

        let mut intent = Intent::new("unknown", text);
        intent
            .command_args
            .insert("command".to_string(), Value::String(command));
        return intent;
    }

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::parse_intent;

    #[test]
    fn free_text_is_a_generation_subject() {
        let intent = parse_intent("a mechanical owl with spinning gears");
        assert_eq!(intent.action, "generate");
        assert_eq!(
            intent.prompt.as_deref(),
            Some("a mechanical owl with spinning gears")
        );
    }

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("").action, "noop");
        assert_eq!(parse_intent("   \n").action, "noop");
    }

    #[test]
    fn no_arg_commands_map_to_actions() {
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/presets").action, "list_presets");
        assert_eq!(parse_intent("/optimize").action, "optimize");
        assert_eq!(parse_intent("/quit").action, "quit");
    }

    #[test]
    fn raw_arg_commands_capture_remainder() {
        let intent = parse_intent("/preset neon");
        assert_eq!(intent.action, "set_preset");
        assert_eq!(
            intent.command_args.get("preset"),
            Some(&Value::String("neon".to_string()))
        );

        let intent = parse_intent("/key sk-or-v1-abc");
        assert_eq!(intent.action, "set_credential");
        assert_eq!(
            intent.command_args.get("credential"),
            Some(&Value::String("sk-or-v1-abc".to_string()))
        );

        let intent = parse_intent("/new_preset Watercolor Dreams");
        assert_eq!(intent.action, "create_preset");
        assert_eq!(
            intent.command_args.get("name"),
            Some(&Value::String("Watercolor Dreams".to_string()))
        );
    }

    #[test]
    fn path_commands_respect_quoting() {
        let intent = parse_intent("/save \"my animations/owl.html\"");
        assert_eq!(intent.action, "save_artifact");
        assert_eq!(
            intent.command_args.get("path"),
            Some(&Value::String("my animations/owl.html".to_string()))
        );

        let intent = parse_intent("/screenshot shot.jpg");
        assert_eq!(intent.action, "screenshot_iterate");
        assert_eq!(
            intent.command_args.get("path"),
            Some(&Value::String("shot.jpg".to_string()))
        );
    }

    #[test]
    fn loops_parses_and_clamps_round_budget() {
        let intent = parse_intent("/loops 5");
        assert_eq!(intent.action, "set_loops");
        assert_eq!(
            intent.settings_update.get("total_rounds"),
            Some(&Value::from(5u64))
        );

        let clamped = parse_intent("/loops 99");
        assert_eq!(
            clamped.settings_update.get("total_rounds"),
            Some(&Value::from(10u64))
        );

        let invalid = parse_intent("/loops many");
        assert_eq!(invalid.action, "set_loops");
        assert!(invalid.settings_update.is_empty());
    }

    #[test]
    fn iterate_carries_the_instruction_as_prompt() {
        let intent = parse_intent("/iterate slow down the tail wag");
        assert_eq!(intent.action, "iterate");
        assert_eq!(intent.prompt.as_deref(), Some("slow down the tail wag"));

        let bare = parse_intent("/iterate");
        assert_eq!(bare.action, "iterate");
        assert_eq!(bare.prompt, None);
    }

    #[test]
    fn unknown_commands_are_flagged_not_generated() {
        let intent = parse_intent("/tpyo something");
        assert_eq!(intent.action, "unknown");
        assert_eq!(
            intent.command_args.get("command"),
            Some(&Value::String("tpyo".to_string()))
        );
        assert_eq!(intent.prompt, None);
    }
}
