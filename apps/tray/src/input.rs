use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aicap_sync::{EngineCommand, Provider};

use crate::console::PendingConfirm;

pub const HELP: &str = "\
commands:
  refresh                 fetch usage now
  show | hide             window visibility
  auto on|off             periodic refresh
  notify on|off           usage notifications
  locale <code>           interface language
  provider <name>         codex | antigravity
  switch <id>             make an account active
  edit <id> | cancel      open or close the rename slot
  rename <id> <name>      rename an account
  delete <id>             delete an inactive account
  add                     add an account in the browser
  login | logout          sign the provider in or out
  autostart [on|off]      show or change launch at login
  quit";

fn parse_toggle(value: Option<&str>) -> Result<bool, String> {
    match value {
        Some("on" | "true" | "yes") => Ok(true),
        Some("off" | "false" | "no") => Ok(false),
        _ => Err("expected `on` or `off`".to_string()),
    }
}

fn required<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str, String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing {what}"))
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<EngineCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let mut args = rest.split_whitespace();

    let command = match verb.to_ascii_lowercase().as_str() {
        "refresh" | "r" => EngineCommand::Refresh,
        "show" => EngineCommand::SetVisible(true),
        "hide" => EngineCommand::SetVisible(false),
        "auto" => EngineCommand::SetAutoRefresh(parse_toggle(args.next())?),
        "notify" => EngineCommand::SetNotifications(parse_toggle(args.next())?),
        "autostart" => match args.next() {
            None => EngineCommand::ShowAutostart,
            value => EngineCommand::SetAutostart(parse_toggle(value)?),
        },
        "locale" => EngineCommand::SetLocale(required(args.next(), "locale")?.to_string()),
        "provider" => {
            let provider: Provider = required(args.next(), "provider")?.parse()?;
            EngineCommand::SwitchProvider(provider)
        }
        "switch" => EngineCommand::SwitchAccount(required(args.next(), "account id")?.to_string()),
        "edit" => EngineCommand::BeginRename(required(args.next(), "account id")?.to_string()),
        "cancel" => EngineCommand::CancelRename,
        "rename" => {
            let (id, name) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: rename <id> <name>".to_string())?;
            EngineCommand::RenameAccount {
                account_id: id.to_string(),
                name: name.to_string(),
            }
        }
        "delete" => EngineCommand::RemoveAccount(required(args.next(), "account id")?.to_string()),
        "add" => EngineCommand::AddAccount,
        "login" => EngineCommand::Login,
        "logout" => EngineCommand::Logout,
        "quit" | "exit" => EngineCommand::Shutdown,
        other => return Err(format!("unknown command `{other}`; type `help`")),
    };

    Ok(Some(command))
}

fn take_pending(pending: &PendingConfirm) -> Option<tokio::sync::oneshot::Sender<bool>> {
    pending.lock().ok().and_then(|mut slot| slot.take())
}

/// Forwards stdin lines to the engine. An open confirmation prompt
/// consumes the next line as its answer. EOF shuts the engine down.
pub async fn read_commands(commands: mpsc::Sender<EngineCommand>, pending: PendingConfirm) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed to read stdin");
                break;
            }
        };

        if let Some(answer) = take_pending(&pending) {
            let yes = matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes");
            let _ = answer.send(yes);
            continue;
        }

        if line.trim().eq_ignore_ascii_case("help") {
            println!("{HELP}");
            continue;
        }

        match parse_command(&line) {
            Ok(Some(command)) => {
                debug!(?command, "queued command");
                if commands.send(command).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(message) => println!("{message}"),
        }
    }

    let _ = commands.send(EngineCommand::Shutdown).await;
}
