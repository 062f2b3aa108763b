use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

use super::commands::{self, UserCommand};
use super::render::{self, Renderer};
use crate::services::chat::{ChatHandle, ChatSnapshot};

/// Line-based front end: reads commands from stdin until `/quit`, Ctrl-C or
/// EOF while a renderer task streams the displayed conversation to stdout.
pub async fn run(handle: ChatHandle) -> Result<()> {
    let renderer = tokio::spawn(render_loop(handle.subscribe()));
    print!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let Some(command) = commands::parse(&line) else {
            continue;
        };
        if command == UserCommand::Quit {
            break;
        }
        dispatch(&handle, command).await?;
    }

    renderer.abort();
    Ok(())
}

async fn dispatch(handle: &ChatHandle, command: UserCommand) -> Result<()> {
    match command {
        UserCommand::Send(text) => handle.send_message(text).await?,
        UserCommand::New => {
            if handle.create_conversation().await?.is_none() {
                println!("Could not create a conversation; see the log for details.");
            }
        }
        UserCommand::List => print!("{}", render::conversation_list(&handle.snapshot())),
        UserCommand::Switch(n) => {
            let target = n
                .checked_sub(1)
                .and_then(|idx| handle.snapshot().conversations.get(idx).map(|c| c.id.clone()));
            match target {
                Some(id) => handle.select_conversation(&id).await?,
                None => println!("No conversation number {}; try /list", n),
            }
        }
        UserCommand::Rename(title) => match handle.snapshot().active {
            Some(active) => handle.rename_conversation(&active.id, &title).await?,
            None => println!("No conversation to rename."),
        },
        UserCommand::Delete => match handle.snapshot().active {
            Some(active) => handle.delete_conversation(&active.id).await?,
            None => println!("No conversation to delete."),
        },
        UserCommand::Stop => handle.stop_generation().await?,
        UserCommand::Settings => match handle.settings().await? {
            Some(settings) => print!("{}", render::settings_summary(&settings)),
            None => println!("Could not read settings; see the log for details."),
        },
        UserCommand::Set(patch) => match handle.update_settings(patch).await? {
            Some(settings) => {
                print!("{}", render::settings_summary(&settings));
                println!("Saved. Backend and model changes apply on next start.");
            }
            None => println!("Could not save settings; see the log for details."),
        },
        UserCommand::Help => print!("{}", commands::HELP),
        UserCommand::Usage(usage) => println!("Usage: {}", usage),
        UserCommand::Unknown(name) => println!("Unknown command /{}; try /help", name),
        UserCommand::Quit => {}
    }
    Ok(())
}

async fn render_loop(mut snapshots: watch::Receiver<ChatSnapshot>) {
    let mut renderer = Renderer::new();
    let mut stdout = tokio::io::stdout();
    loop {
        let output = renderer.update(&snapshots.borrow_and_update());
        if !output.is_empty() {
            if let Err(e) = stdout.write_all(output.as_bytes()).await {
                tracing::error!("Failed to write to terminal: {}", e);
                return;
            }
            let _ = stdout.flush().await;
        }
        if snapshots.changed().await.is_err() {
            return;
        }
    }
}
