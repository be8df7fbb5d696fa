//! Text commands for a headless operator console.

use super::map::MarkerAction;
use super::DashboardCommand;
use std::fmt;
use uuid::Uuid;

pub const CONSOLE_HELP: &str = "commands: select <stop> | simulate <stop> | dismiss <id> | clear | \
history [on|off] | sound on|off | save | connect <stop> | video <stop> | hangup <stop> | say <stop> <text> | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleError {
    Empty,
    UnknownCommand(String),
    BadArgument { command: String, reason: String },
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Empty => write!(f, "empty command"),
            ConsoleError::UnknownCommand(cmd) => write!(f, "unknown command '{}'", cmd),
            ConsoleError::BadArgument { command, reason } => {
                write!(f, "{}: {}", command, reason)
            }
        }
    }
}

impl std::error::Error for ConsoleError {}

fn bad(command: &str, reason: impl Into<String>) -> ConsoleError {
    ConsoleError::BadArgument {
        command: command.to_string(),
        reason: reason.into(),
    }
}

fn stop_id(command: &str, arg: Option<&str>) -> Result<u64, ConsoleError> {
    let arg = arg.ok_or_else(|| bad(command, "missing stop id"))?;
    arg.parse()
        .map_err(|_| bad(command, format!("'{}' is not a stop id", arg)))
}

pub fn parse_console_line(line: &str) -> Result<DashboardCommand, ConsoleError> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let arg = if rest.is_empty() { None } else { Some(rest) };

    match command {
        "" => Err(ConsoleError::Empty),
        // Same path as a click on the map marker
        "select" => Ok(DashboardCommand::ClickMarker(MarkerAction::Select(stop_id(
            command, arg,
        )?))),
        "simulate" => Ok(DashboardCommand::ClickMarker(
            MarkerAction::SimulateEmergency(stop_id(command, arg)?),
        )),
        "dismiss" => {
            let arg = arg.ok_or_else(|| bad(command, "missing notification id"))?;
            let id = Uuid::parse_str(arg).map_err(|e| bad(command, e.to_string()))?;
            Ok(DashboardCommand::Dismiss(id))
        }
        "clear" => Ok(DashboardCommand::ClearHistory),
        "history" => match arg {
            None => Ok(DashboardCommand::ShowHistory),
            Some("on") => Ok(DashboardCommand::SetHistoryVisible(true)),
            Some("off") => Ok(DashboardCommand::SetHistoryVisible(false)),
            _ => Err(bad(command, "expected nothing, 'on' or 'off'")),
        },
        "sound" => match arg {
            Some("on") => Ok(DashboardCommand::SetSound(true)),
            Some("off") => Ok(DashboardCommand::SetSound(false)),
            _ => Err(bad(command, "expected 'on' or 'off'")),
        },
        "save" => Ok(DashboardCommand::SavePreferences),
        "connect" => Ok(DashboardCommand::OpenLink(stop_id(command, arg)?)),
        "video" => Ok(DashboardCommand::RequestVideo(stop_id(command, arg)?)),
        "hangup" => Ok(DashboardCommand::EndVideo(stop_id(command, arg)?)),
        "say" => {
            let (id, text) = match rest.split_once(char::is_whitespace) {
                Some((id, text)) if !text.trim().is_empty() => (id, text.trim()),
                _ => return Err(bad(command, "expected '<stop> <text>'")),
            };
            Ok(DashboardCommand::AdminMessage {
                stop_id: stop_id(command, Some(id))?,
                content: text.to_string(),
            })
        }
        "quit" | "exit" => Ok(DashboardCommand::Shutdown),
        other => Err(ConsoleError::UnknownCommand(other.to_string())),
    }
}

#[cfg(test)]
mod console_tests {
    use super::*;

    #[test]
    fn test_stop_commands() {
        assert!(matches!(
            parse_console_line("select 3"),
            Ok(DashboardCommand::ClickMarker(MarkerAction::Select(3)))
        ));
        assert!(matches!(
            parse_console_line("  simulate   450 "),
            Ok(DashboardCommand::ClickMarker(MarkerAction::SimulateEmergency(450)))
        ));
        assert!(matches!(parse_console_line("video 450"), Ok(DashboardCommand::RequestVideo(450))));
        assert!(matches!(parse_console_line("hangup 450"), Ok(DashboardCommand::EndVideo(450))));
    }

    #[test]
    fn test_say_keeps_message_text() {
        match parse_console_line("say 450 버스가 곧 도착합니다") {
            Ok(DashboardCommand::AdminMessage { stop_id, content }) => {
                assert_eq!(stop_id, 450);
                assert_eq!(content, "버스가 곧 도착합니다");
            }
            other => panic!("Expected AdminMessage, got {:?}", other),
        }
        assert!(parse_console_line("say 450").is_err());
    }

    #[test]
    fn test_dismiss_takes_uuid() {
        let id = Uuid::now_v7();
        match parse_console_line(&format!("dismiss {}", id)) {
            Ok(DashboardCommand::Dismiss(parsed)) => assert_eq!(parsed, id),
            other => panic!("Expected Dismiss, got {:?}", other),
        }
        assert!(parse_console_line("dismiss 12").is_err());
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_console_line("   ").unwrap_err(), ConsoleError::Empty);
        assert_eq!(
            parse_console_line("reboot").unwrap_err(),
            ConsoleError::UnknownCommand("reboot".to_string())
        );
        let err = parse_console_line("select three").unwrap_err();
        assert_eq!(err.to_string(), "select: 'three' is not a stop id");
        assert!(parse_console_line("sound loud").is_err());
    }

    #[test]
    fn test_simple_commands() {
        assert!(matches!(parse_console_line("sound off"), Ok(DashboardCommand::SetSound(false))));
        assert!(matches!(parse_console_line("save"), Ok(DashboardCommand::SavePreferences)));
        assert!(matches!(parse_console_line("clear"), Ok(DashboardCommand::ClearHistory)));
        assert!(matches!(parse_console_line("history"), Ok(DashboardCommand::ShowHistory)));
        assert!(matches!(
            parse_console_line("history off"),
            Ok(DashboardCommand::SetHistoryVisible(false))
        ));
        assert!(parse_console_line("history maybe").is_err());
        assert!(matches!(parse_console_line("quit"), Ok(DashboardCommand::Shutdown)));
    }
}
