use crate::providers::BackendId;
use crate::services::settings::{ColorScheme, SettingsPatch};

const SET_USAGE: &str =
    "/set <backend|local-model|remote-model|url|theme|temperature|system> <value>";

pub const HELP: &str = "\
Type a message and press Enter to send it.
  /new             start a new conversation
  /list            list conversations
  /switch <n>      show conversation number n from /list
  /rename <title>  rename the shown conversation
  /delete          delete the shown conversation
  /stop            stop the reply being generated
  /settings        show settings
  /set <key> <v>   change a setting (backend, local-model, remote-model,
                   url, theme, temperature, system); `none` clears url
                   and system
  /help            show this help
  /quit            exit
";

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Send(String),
    New,
    List,
    /// 1-based index into the conversation list.
    Switch(usize),
    Rename(String),
    Delete,
    Stop,
    Settings,
    Set(SettingsPatch),
    Help,
    Quit,
    Usage(&'static str),
    Unknown(String),
}

/// Parse a line of input. Blank lines yield `None`; a leading `//` sends the
/// rest of the line literally.
pub fn parse(line: &str) -> Option<UserCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(UserCommand::Send(line.to_string()));
    };
    if rest.starts_with('/') {
        return Some(UserCommand::Send(rest.to_string()));
    }

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "new" => UserCommand::New,
        "list" | "ls" => UserCommand::List,
        "switch" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => UserCommand::Switch(n),
            _ => UserCommand::Usage("/switch <n>"),
        },
        "rename" if arg.is_empty() => UserCommand::Usage("/rename <title>"),
        "rename" => UserCommand::Rename(arg.to_string()),
        "delete" => UserCommand::Delete,
        "stop" => UserCommand::Stop,
        "settings" => UserCommand::Settings,
        "set" => parse_setting(arg).map_or(UserCommand::Usage(SET_USAGE), UserCommand::Set),
        "help" | "?" => UserCommand::Help,
        "quit" | "exit" => UserCommand::Quit,
        other => UserCommand::Unknown(other.to_string()),
    };
    Some(command)
}

/// `<key> <value>` as a one-field settings patch.
fn parse_setting(arg: &str) -> Option<SettingsPatch> {
    let (key, value) = arg.split_once(char::is_whitespace)?;
    let value = value.trim();
    let cleared = (value != "none").then(|| value.to_string());

    let patch = match key {
        "backend" => SettingsPatch {
            backend: Some(BackendId::from_str(value)?),
            ..Default::default()
        },
        "local-model" => SettingsPatch {
            local_model: Some(value.to_string()),
            ..Default::default()
        },
        "remote-model" => SettingsPatch {
            remote_model: Some(value.to_string()),
            ..Default::default()
        },
        "url" => SettingsPatch {
            remote_base_url: Some(cleared),
            ..Default::default()
        },
        "theme" => SettingsPatch {
            color_scheme: Some(ColorScheme::from_str(value)?),
            ..Default::default()
        },
        "temperature" => SettingsPatch {
            temperature: Some(value.parse().ok()?),
            ..Default::default()
        },
        "system" => SettingsPatch {
            system_prompt: Some(cleared),
            ..Default::default()
        },
        _ => return None,
    };
    Some(patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_sent_trimmed() {
        assert_eq!(
            parse("  hello there \n"),
            Some(UserCommand::Send("hello there".to_string()))
        );
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(parse("/switch 3"), Some(UserCommand::Switch(3)));
        assert_eq!(parse("/switch 0"), Some(UserCommand::Usage("/switch <n>")));
        assert_eq!(parse("/switch two"), Some(UserCommand::Usage("/switch <n>")));
        assert_eq!(
            parse("/rename  Weekend trip "),
            Some(UserCommand::Rename("Weekend trip".to_string()))
        );
        assert_eq!(parse("/rename"), Some(UserCommand::Usage("/rename <title>")));
    }

    #[test]
    fn test_bare_commands() {
        assert_eq!(parse("/new"), Some(UserCommand::New));
        assert_eq!(parse("/ls"), Some(UserCommand::List));
        assert_eq!(parse("/delete"), Some(UserCommand::Delete));
        assert_eq!(parse("/stop"), Some(UserCommand::Stop));
        assert_eq!(parse("/exit"), Some(UserCommand::Quit));
        assert_eq!(parse("/frobnicate"), Some(UserCommand::Unknown("frobnicate".to_string())));
    }

    #[test]
    fn test_double_slash_escapes() {
        assert_eq!(
            parse("//etc/hosts looks odd"),
            Some(UserCommand::Send("/etc/hosts looks odd".to_string()))
        );
    }

    #[test]
    fn test_set_builds_single_field_patch() {
        assert_eq!(
            parse("/set backend remote"),
            Some(UserCommand::Set(SettingsPatch {
                backend: Some(BackendId::Remote),
                ..Default::default()
            }))
        );
        assert_eq!(
            parse("/set system  Answer in French. "),
            Some(UserCommand::Set(SettingsPatch {
                system_prompt: Some(Some("Answer in French.".to_string())),
                ..Default::default()
            }))
        );
        assert_eq!(
            parse("/set url none"),
            Some(UserCommand::Set(SettingsPatch {
                remote_base_url: Some(None),
                ..Default::default()
            }))
        );
        assert_eq!(parse("/settings"), Some(UserCommand::Settings));
    }

    #[test]
    fn test_set_rejects_bad_values() {
        assert_eq!(parse("/set backend cloud"), Some(UserCommand::Usage(SET_USAGE)));
        assert_eq!(parse("/set temperature warm"), Some(UserCommand::Usage(SET_USAGE)));
        assert_eq!(parse("/set theme"), Some(UserCommand::Usage(SET_USAGE)));
        assert_eq!(parse("/set colour dark"), Some(UserCommand::Usage(SET_USAGE)));
    }
}
