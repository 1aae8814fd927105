//! Operator commands
//!
//! Lines starting with `/` are commands; anything else is an answer to the
//! running login prompt.

use std::fmt::Write as _;

use voicefleet_core::{Fleet, FleetResult, FlowStep, UserId};

pub const HELP: &str = "\
/new             start a login flow for a new session
/cancel          abandon the running login flow
/list            list sessions and their state
/start           bring every session online
/stop            take every session offline
/join <link>     join every session into a channel call
/leave [name]    leave the call (all sessions, or one)
/delete <name>   forget a session and its stored credential
/status          fleet overview
/help            this text
/quit            leave every call, disconnect and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    NewSession,
    CancelLogin,
    List,
    StartAll,
    StopAll,
    JoinAll(String),
    LeaveAll,
    LeaveOne(String),
    Delete(String),
    Status,
    Help,
    Quit,
    /// Free text for the login prompt
    Input(String),
}

impl Command {
    /// Parse one console line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Command::Input(line.to_string())));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        let argument = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(format!("too many arguments for /{}", name));
        }

        let command = match (name.as_str(), argument) {
            ("new", None) => Command::NewSession,
            ("cancel", None) => Command::CancelLogin,
            ("list", None) => Command::List,
            ("start", None) => Command::StartAll,
            ("stop", None) => Command::StopAll,
            ("join", Some(link)) => Command::JoinAll(link),
            ("join", None) => return Err("usage: /join <link>".to_string()),
            ("leave", None) => Command::LeaveAll,
            ("leave", Some(session)) => Command::LeaveOne(session),
            ("delete", Some(session)) => Command::Delete(session),
            ("delete", None) => return Err("usage: /delete <name>".to_string()),
            ("status", None) => Command::Status,
            ("help", None) => Command::Help,
            ("quit" | "exit", None) => Command::Quit,
            (other, Some(_)) if is_known(other) => {
                return Err(format!("/{} takes no argument", other));
            }
            (other, _) => return Err(format!("unknown command /{} (try /help)", other)),
        };
        Ok(Some(command))
    }
}

fn is_known(name: &str) -> bool {
    matches!(
        name,
        "new" | "cancel" | "list" | "start" | "stop" | "status" | "help" | "quit" | "exit"
    )
}

/// Result of running one command
#[derive(Debug)]
pub struct Reply {
    pub text: String,
    pub quit: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quit: false,
        }
    }
}

/// Run a command on behalf of `user`.
///
/// Errors are returned for the caller to print; none of them end the
/// console.
pub async fn execute(fleet: &Fleet, user: UserId, command: Command) -> FleetResult<Reply> {
    fleet.authorize(user)?;

    let reply = match command {
        Command::NewSession => Reply::text(fleet.begin_login(user).await.prompt()),
        Command::CancelLogin => {
            if fleet.cancel_login(user).await {
                Reply::text("Login cancelled")
            } else {
                Reply::text("No login in progress")
            }
        }
        Command::Input(text) => {
            if !fleet.auth().is_active(user) {
                Reply::text("No login in progress; use /new to add a session")
            } else {
                let step = fleet.submit_login(user, &text).await?;
                Reply::text(step_text(&step))
            }
        }
        Command::List => Reply::text(list_text(fleet)),
        Command::StartAll => Reply::text(fleet.start_all().await?.to_string()),
        Command::StopAll => Reply::text(fleet.stop_all().await?.to_string()),
        Command::JoinAll(link) => Reply::text(fleet.join_all(&link).await?.to_string()),
        Command::LeaveAll => Reply::text(fleet.leave_all().await?.to_string()),
        Command::LeaveOne(name) => Reply::text(fleet.leave_one(&name).await?.to_string()),
        Command::Delete(name) => Reply::text(fleet.delete_session(&name).await?.to_string()),
        Command::Status => Reply::text(fleet.overview().await?.to_string()),
        Command::Help => Reply::text(HELP),
        Command::Quit => Reply {
            text: "Shutting down".to_string(),
            quit: true,
        },
    };
    Ok(reply)
}

fn step_text(step: &FlowStep) -> String {
    match step {
        FlowStep::Completed(_) => format!("{}. Use /start to bring it online.", step),
        _ if step.is_terminal() => format!("{}. Use /new to start over.", step),
        _ => step.to_string(),
    }
}

fn list_text(fleet: &Fleet) -> String {
    let status = fleet.status();
    if status.is_empty() {
        return "No sessions. Use /new to add one.".to_string();
    }
    let mut text = String::new();
    for entry in status {
        let _ = writeln!(text, "{}", entry);
    }
    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicefleet_core::AuthStage;

    #[test]
    fn free_text_is_login_input() {
        assert_eq!(
            Command::parse("  +15550001 ").unwrap(),
            Some(Command::Input("+15550001".to_string()))
        );
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(
            Command::parse("/join https://t.me/foo?videochat").unwrap(),
            Some(Command::JoinAll("https://t.me/foo?videochat".to_string()))
        );
        assert_eq!(Command::parse("/leave").unwrap(), Some(Command::LeaveAll));
        assert_eq!(
            Command::parse("/leave work").unwrap(),
            Some(Command::LeaveOne("work".to_string()))
        );
        assert_eq!(Command::parse("/QUIT").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn finished_flows_point_at_next_command() {
        let failed = FlowStep::Failed {
            reason: "phone rejected".to_string(),
        };
        assert!(step_text(&failed).ends_with("Use /new to start over."));
        assert!(step_text(&FlowStep::Discarded).ends_with("Use /new to start over."));

        let prompt = step_text(&FlowStep::Advanced(AuthStage::AwaitingPhone));
        assert_eq!(prompt, AuthStage::AwaitingPhone.prompt());
    }

    #[test]
    fn malformed_commands_are_rejected() {
        assert!(Command::parse("/join").is_err());
        assert!(Command::parse("/delete").is_err());
        assert!(Command::parse("/list all").is_err());
        assert!(Command::parse("/join a b").is_err());
        assert!(Command::parse("/dance").unwrap_err().contains("unknown command"));
    }
}
