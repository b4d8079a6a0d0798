use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

/// A parsed line of user input: a slash command or a free-form edit prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
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

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

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
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let key = if action == "run_preset" {
                    "index"
                } else {
                    "entry"
                };
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert(key.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("edit", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("").action, "noop");
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_upload_with_quoted_path() {
        let intent = parse_intent("/upload \"/tmp/product shot.png\"");
        assert_eq!(intent.action, "select_image");
        assert_eq!(intent.command_args["path"], json!("/tmp/product shot.png"));

        let bare = parse_intent("/upload photo.jpg");
        assert_eq!(bare.command_args["path"], json!("photo.jpg"));
    }

    #[test]
    fn parse_download_allows_empty_path() {
        let intent = parse_intent("/download");
        assert_eq!(intent.action, "download");
        assert_eq!(intent.command_args["path"], json!(""));

        let explicit = parse_intent("/download out/result.png");
        assert_eq!(explicit.command_args["path"], json!("out/result.png"));
    }

    #[test]
    fn parse_preset_and_use_pass_raw_args() {
        let preset = parse_intent("/preset 2");
        assert_eq!(preset.action, "run_preset");
        assert_eq!(preset.command_args["index"], json!("2"));

        let entry = parse_intent("/use 3f2a9c1d");
        assert_eq!(entry.action, "set_active_entry");
        assert_eq!(entry.command_args["entry"], json!("3f2a9c1d"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/presets").action, "list_presets");
        assert_eq!(parse_intent("/history").action, "show_history");
        assert_eq!(parse_intent("/reset").action, "reset");
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/quit").action, "quit");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn plain_text_becomes_edit_prompt() {
        let intent = parse_intent("  Remove background  ");
        assert_eq!(intent.action, "edit");
        assert_eq!(intent.prompt.as_deref(), Some("Remove background"));
    }
}
