//! TUI application state and event handling.

use crate::client::{ClientEvent, ConnectionInfo, RequestRecord};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Cap on requests kept for the list view
const MAX_REQUESTS: usize = 500;

/// Requests shown on the main view
pub const RECENT_REQUESTS: usize = 10;

/// How long a status message stays on screen
const STATUS_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Main,
    Requests,
    Detail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    Connecting,
    Online,
    Reconnecting,
    Offline,
}

impl TunnelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Connecting => "connecting",
            TunnelStatus::Online => "online",
            TunnelStatus::Reconnecting => "reconnecting",
            TunnelStatus::Offline => "offline",
        }
    }
}

/// TUI application state
pub struct TuiApp {
    pub view: View,
    pub status: TunnelStatus,
    pub connection: Option<ConnectionInfo>,
    pub requests: Vec<RequestRecord>,
    pub recent: VecDeque<RequestRecord>,
    pub selected: usize,
    pub status_message: Option<(String, Instant)>,
    pub should_quit: bool,
    /// Set by the `r` key; drained by the event loop
    pub replay_requested: Option<RequestRecord>,
}

impl TuiApp {
    pub fn new() -> Self {
        Self {
            view: View::Main,
            status: TunnelStatus::Connecting,
            connection: None,
            requests: Vec::new(),
            recent: VecDeque::with_capacity(RECENT_REQUESTS),
            selected: 0,
            status_message: None,
            should_quit: false,
            replay_requested: None,
        }
    }

    pub fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected(info) => {
                self.connection = Some(info);
                self.status = TunnelStatus::Online;
            }
            ClientEvent::Disconnected => {
                self.status = TunnelStatus::Offline;
            }
            ClientEvent::Reconnecting { .. } => {
                self.status = TunnelStatus::Reconnecting;
            }
            ClientEvent::Request(record) => self.add_request(*record),
        }
    }

    pub fn add_request(&mut self, record: RequestRecord) {
        self.recent.push_back(record.clone());
        if self.recent.len() > RECENT_REQUESTS {
            self.recent.pop_front();
        }

        self.requests.push(record);
        if self.requests.len() > MAX_REQUESTS {
            self.requests.remove(0);
            self.selected = self.selected.saturating_sub(1);
        }
    }

    pub fn selected_request(&self) -> Option<&RequestRecord> {
        self.requests.get(self.selected)
    }

    pub fn set_status(&mut self, message: String) {
        self.status_message = Some((message, Instant::now()));
    }

    /// Periodic upkeep: expire the status message.
    pub fn tick(&mut self) {
        if let Some((_, shown_at)) = &self.status_message {
            if shown_at.elapsed() > STATUS_TTL {
                self.status_message = None;
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        // Ctrl+C quits from anywhere.
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }

        match self.view {
            View::Main => match key.code {
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Char('o') | KeyCode::Tab | KeyCode::Enter => {
                    self.view = View::Requests;
                    self.selected = self.requests.len().saturating_sub(1);
                }
                _ => {}
            },
            View::Requests => match key.code {
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Esc => self.view = View::Main,
                KeyCode::Enter => {
                    if self.selected_request().is_some() {
                        self.view = View::Detail;
                    }
                }
                KeyCode::Char('r') => {
                    self.replay_requested = self.selected_request().cloned();
                }
                KeyCode::Up | KeyCode::Char('k') => {
                    self.selected = self.selected.saturating_sub(1);
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    self.selected =
                        (self.selected + 1).min(self.requests.len().saturating_sub(1));
                }
                KeyCode::PageUp => self.selected = self.selected.saturating_sub(10),
                KeyCode::PageDown => {
                    self.selected =
                        (self.selected + 10).min(self.requests.len().saturating_sub(1));
                }
                KeyCode::Home => self.selected = 0,
                KeyCode::End => self.selected = self.requests.len().saturating_sub(1),
                _ => {}
            },
            View::Detail => match key.code {
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Esc | KeyCode::Enter => self.view = View::Requests,
                KeyCode::Char('r') => {
                    self.replay_requested = self.selected_request().cloned();
                }
                _ => {}
            },
        }
    }
}

impl Default for TuiApp {
    fn default() -> Self {
        Self::new()
    }
}
