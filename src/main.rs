use anyhow::{Context, Result};
use tokio::sync::mpsc;

mod app;
mod config;
mod gemini;
mod handler;
mod markdown;
mod tui;
mod ui;

use app::App;
use config::Config;
use gemini::StreamEvent;

#[tokio::main]
async fn main() -> Result<()> {
    // The credential is required; refuse to bring up the UI without it.
    let api_key = config::api_key_from_env()?;
    let config = Config::load().context("Failed to read config file")?;

    let mut app = App::new(&config, &api_key);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let events = tui::EventHandler::new();

    let result = run(&mut terminal, &mut app, events).await;

    tui::restore()?;
    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App, mut events: tui::EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        tokio::select! {
            maybe_event = events.next() => {
                match maybe_event {
                    Some(event) => handler::handle_event(app, event)?,
                    None => break,
                }
            }
            maybe_fragment = next_stream_event(&mut app.stream_rx) => {
                match maybe_fragment {
                    Some(event) => app.on_stream_event(event),
                    None => app.on_stream_closed(),
                }
            }
        }
    }
    Ok(())
}

/// Wait on the in-flight exchange's channel; pend forever when idle so the
/// select loop only wakes for terminal events.
async fn next_stream_event(
    stream_rx: &mut Option<mpsc::Receiver<StreamEvent>>,
) -> Option<StreamEvent> {
    match stream_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
