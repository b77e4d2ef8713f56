use std::sync::Arc;

use anyhow::{bail, Context, Result};
use devkit_auth::{Session, SessionChangeEvent, SessionError, SessionManager};
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::bootstrap_helpers::{build_session_manager, open_secret_store};
use crate::cli_args::{Cli, CliCommand};
use crate::terminal_prompt::TerminalPrompt;

pub(crate) async fn execute_command(cli: Cli) -> Result<()> {
    let secrets = open_secret_store(&cli)?;
    let manager = build_session_manager(&cli, secrets.clone(), Arc::new(TerminalPrompt::new()))?;
    manager
        .initialize()
        .await
        .context("failed to load persisted session")?;

    match cli.command {
        CliCommand::Login => {
            let outcome = manager.create_session().await;
            report_provisioning("Login", outcome)
        }
        CliCommand::SwitchOrg => {
            let outcome = manager.switch_organization().await;
            report_provisioning("Organization switch", outcome)
        }
        CliCommand::Logout => {
            let removed = manager.remove_session().await?;
            println!("{}", render_logout(removed.as_ref()));
            Ok(())
        }
        CliCommand::Status { json } => {
            println!("{}", render_status(&manager.get_sessions(), json)?);
            Ok(())
        }
        CliCommand::Watch => {
            secrets
                .start_watching()
                .context("failed to watch secret store")?;
            watch_sessions(&manager).await
        }
    }
}

fn report_provisioning(action: &str, outcome: Result<Session, SessionError>) -> Result<()> {
    match outcome {
        Ok(session) => {
            println!("{}", render_signed_in(&session));
            Ok(())
        }
        Err(error) if error.is_benign() => {
            println!("{action} not completed: {error}");
            Ok(())
        }
        Err(error) => bail!("{action} failed: {error}"),
    }
}

fn render_signed_in(session: &Session) -> String {
    format!(
        "Successfully logged in to Azure DevOps ({}).",
        session.organization_id()
    )
}

fn render_logout(removed: Option<&Session>) -> &'static str {
    match removed {
        Some(_) => "Successfully logged out of Azure DevOps.",
        None => "You are not logged in.",
    }
}

fn render_status(sessions: &[Session], as_json: bool) -> Result<String> {
    let session = sessions.first();
    if as_json {
        let payload = json!({
            "signed_in": session.is_some(),
            "organization": session.map(Session::organization_id),
            "principal_id": session.and_then(Session::principal_id),
            "account": session.map(Session::account_label),
        });
        return serde_json::to_string_pretty(&payload).context("failed to render status");
    }
    Ok(match session {
        Some(session) => format!(
            "Signed in to {} as {}.",
            session.account_label(),
            session.account_id()
        ),
        None => "You are not logged in.".to_string(),
    })
}

fn render_event(event: &SessionChangeEvent) -> String {
    let describe = |sessions: &[Session]| {
        sessions
            .iter()
            .map(Session::organization_id)
            .collect::<Vec<_>>()
            .join(", ")
    };
    match (event.added.is_empty(), event.removed.is_empty()) {
        (true, true) => "no session".to_string(),
        (false, true) => format!("signed in: {}", describe(&event.added)),
        (true, false) => format!("signed out: {}", describe(&event.removed)),
        (false, false) => format!(
            "switched: {} -> {}",
            describe(&event.removed),
            describe(&event.added)
        ),
    }
}

async fn watch_sessions(manager: &Arc<SessionManager>) -> Result<()> {
    let reconciler = manager.watch_secret_changes();
    let mut events = BroadcastStream::new(manager.subscribe());
    println!("{}", render_status(&manager.get_sessions(), false)?);
    println!("Watching for session changes. Press Ctrl-C to stop.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = events.next() => match next {
                Some(Ok(event)) => println!("{}", render_event(&event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "session event display lagged");
                }
                None => break,
            },
        }
    }
    reconciler.abort();
    Ok(())
}
