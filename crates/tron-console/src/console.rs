//! Interactive loop: stdin lines become hub commands, keyword updates are
//! printed as they arrive.

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tron_client::{ActorKeyword, Command, CommandStatus, Connection, KeywordListener};
use tron_core::ConnectionStatus;

/// How keyword updates are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Plain,
    Json,
}

pub struct Session<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub program: &'a str,
    pub patterns: &'a [String],
    pub format: OutputFormat,
}

pub async fn run(conn: &Connection, session: Session<'_>) -> Result<()> {
    let status_task = tokio::spawn(log_status_changes(conn.clone()));

    let status = conn.connect(session.host, session.port).await;
    if !status.contains(ConnectionStatus::CONNECTED) {
        status_task.abort();
        bail!("could not connect to {}:{} ({status})", session.host, session.port);
    }

    if let Err(error) = conn.authorise(session.user, session.program).await {
        status_task.abort();
        return Err(anyhow!("login as {} failed: {}", session.user, error.reason()));
    }

    let (listener, mut updates) = KeywordListener::channel();
    let outcome = conn
        .subscribe_keywords(session.patterns, &listener, false, true)
        .await;
    for pattern in &outcome.rejected {
        eprintln!("ignoring invalid keyword pattern {pattern:?}");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(update) = updates.recv() => {
                println!("{}", format_update(&update, session.format)?);
            }
            line = stdin.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                let command = conn.send_command(text).await;
                tokio::spawn(async move {
                    let status = command.completed().await;
                    println!("{}", format_completion(&command, status));
                });
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    conn.disconnect().await;
    status_task.abort();
    Ok(())
}

async fn log_status_changes(conn: Connection) {
    let mut rx = conn.subscribe_status();
    while rx.changed().await.is_ok() {
        let status = *rx.borrow_and_update();
        tracing::info!(%status, "hub connection");
    }
}

pub fn format_update(update: &ActorKeyword, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Plain => {
            let values: Vec<String> = update.keyword.values.iter().map(|v| v.to_string()).collect();
            format!("{} = {}", update.full_name(), values.join(", "))
        }
        OutputFormat::Json => serde_json::to_string(update)?,
    })
}

pub fn format_completion(command: &Command, status: CommandStatus) -> String {
    let mut line = format!("[{}] {}: {status}", command.id(), command.text());
    if status == CommandStatus::Failed {
        let reason = command
            .keyword("text")
            .or_else(|| command.keyword("why"))
            .and_then(|kw| kw.first_text())
            .or_else(|| command.abandoned_reason());
        if let Some(reason) = reason {
            line.push_str(&format!(" ({reason})"));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use tron_client::CommandRegistry;
    use tron_core::Keyword;

    fn update() -> ActorKeyword {
        ActorKeyword {
            actor: "tcc".into(),
            keyword: Keyword::new("axisCmdState", "Tracking, 1.5, T"),
        }
    }

    #[test]
    fn plain_update() {
        let line = format_update(&update(), OutputFormat::Plain).unwrap();
        assert_eq!(line, "tcc.axiscmdstate = Tracking, 1.5, T");
    }

    #[test]
    fn json_update() {
        let line = format_update(&update(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["actor"], "tcc");
        assert_eq!(value["keyword"]["name"], "axiscmdstate");
        assert_eq!(value["keyword"]["values"][1], 1.5);
    }

    #[test]
    fn completion_includes_local_failure_reason() {
        let mut registry = CommandRegistry::new();
        let command = registry.allocate("tcc track 10,20");
        registry.abandon_all("disconnected");
        assert_eq!(
            format_completion(&command, command.status()),
            "[1] tcc track 10,20: failed (disconnected)"
        );
    }

    #[test]
    fn completion_without_failure() {
        let mut registry = CommandRegistry::new();
        let command = registry.allocate("tcc status");
        assert_eq!(format_completion(&command, CommandStatus::Done), "[1] tcc status: done");
    }
}
