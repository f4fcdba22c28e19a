//! Terminal user interface for the tunnel client.

mod app;
mod ui;

pub use app::{TuiApp, TunnelStatus, View};

use crate::client::ClientEvent;
use crate::commands::api_base_url;
use anyhow::{Context, Result};
use crossterm::event::{Event, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;

/// What the replay key needs to reach the server API
#[derive(Debug, Clone)]
pub struct ReplayContext {
    pub api_base: String,
    pub token: Option<String>,
}

impl ReplayContext {
    pub fn new(server_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            api_base: api_base_url(server_url)?,
            token,
        })
    }
}

/// Run the TUI until the user quits. Client events stream in over the
/// channel; the replay key posts to the server API in the background.
pub async fn run(events: mpsc::Receiver<ClientEvent>, replay: ReplayContext) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let result = event_loop(&mut terminal, events, replay).await;
    restore_terminal(&mut terminal)?;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut events: mpsc::Receiver<ClientEvent>,
    replay: ReplayContext,
) -> Result<()> {
    let mut input = spawn_input_reader();
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    let (replay_results_tx, mut replay_results) = mpsc::channel::<String>(8);

    let mut app = TuiApp::new();

    loop {
        terminal.draw(|frame| ui::draw(frame, &app))?;

        tokio::select! {
            Some(event) = events.recv() => app.handle_client_event(event),
            Some(key) = input.recv() => app.handle_key(key),
            Some(message) = replay_results.recv() => app.set_status(message),
            _ = tick.tick() => app.tick(),
        }

        if let Some(record) = app.replay_requested.take() {
            match app.connection.as_ref().map(|c| c.tunnel_id.clone()) {
                Some(tunnel_id) => {
                    app.set_status(format!("replaying {}", record.id));
                    tokio::spawn(post_replay(
                        replay.clone(),
                        tunnel_id,
                        record.id.clone(),
                        replay_results_tx.clone(),
                    ));
                }
                None => app.set_status("not connected".to_string()),
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

async fn post_replay(
    replay: ReplayContext,
    tunnel_id: String,
    request_id: String,
    results: mpsc::Sender<String>,
) {
    let url = format!(
        "{}/api/tunnels/{}/requests/{}/replay",
        replay.api_base, tunnel_id, request_id
    );
    let client = reqwest::Client::new();
    let mut request = client.post(&url);
    if let Some(token) = &replay.token {
        request = request.bearer_auth(token);
    }

    let message = match request.send().await {
        Ok(response) if response.status().is_success() => format!("replayed {request_id}"),
        Ok(response) => format!("replay failed: {}", response.status()),
        Err(err) => format!("replay failed: {err}"),
    };
    let _ = results.send(message).await;
}

/// Terminal key events bridged onto a channel. Crossterm reads are
/// blocking, so they get their own thread.
fn spawn_input_reader() -> mpsc::Receiver<crossterm::event::KeyEvent> {
    let (tx, rx) = mpsc::channel(32);
    std::thread::spawn(move || loop {
        match crossterm::event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                if tx.blocking_send(key).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    });
    rx
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    crossterm::terminal::enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen)
        .context("failed to enter alternate screen")?;
    Terminal::new(CrosstermBackend::new(stdout)).context("failed to create terminal")
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
