//! Colored console output for the tunnel client.

use super::ConnectionInfo;
use console::{style, StyledObject};
use hookshot_common::{HttpRequest, HttpResponse};
use std::time::Duration;

/// Longest body excerpt printed in verbose mode
const MAX_BODY_DISPLAY: usize = 500;

#[derive(Debug, Clone)]
pub struct Display {
    verbose: bool,
    /// TUI mode owns the terminal; the console logger stays quiet.
    silent: bool,
}

impl Display {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            silent: false,
        }
    }

    pub fn silenced(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn connected(&self, info: &ConnectionInfo) {
        if self.silent {
            return;
        }
        println!();
        println!("{}", style("◆ Connected!").green().bold());
        println!();
        println!("  Tunnel ID:  {}", style(&info.tunnel_id).cyan());
        println!("  Public URL: {}", style(&info.public_url).cyan());
        println!("  Forwarding: {}", style(&info.target).cyan());
        println!();
        println!("  {}", style("Waiting for requests... (Ctrl+C to stop)").dim());
        println!("{}", style("─".repeat(50)).dim());
    }

    pub fn disconnected(&self, err: &anyhow::Error) {
        if self.silent {
            return;
        }
        println!("{}", style(format!("⚠ Disconnected: {err:#}")).yellow());
    }

    pub fn reconnecting(&self, attempt: u32) {
        if self.silent {
            return;
        }
        println!(
            "{}",
            style(format!("↻ Reconnecting (attempt {attempt})...")).yellow()
        );
    }

    pub fn request(&self, request: &HttpRequest) {
        if self.silent {
            return;
        }
        println!(
            "{} {} {} {} {}",
            timestamp(),
            style("→").cyan(),
            method_styled(&request.method),
            request.path,
            style(format!("({})", request.id)).black().bright(),
        );
        if self.verbose && !request.body.is_empty() {
            print_body("   req", &request.body);
        }
    }

    pub fn response(&self, request: &HttpRequest, response: &HttpResponse, duration: Duration) {
        if self.silent {
            return;
        }
        println!(
            "{} {} {} {} {}",
            timestamp(),
            style("←").cyan(),
            status_styled(response.status_code),
            style(format!("({})", format_duration(duration))).dim(),
            style(format!("({})", request.id)).black().bright(),
        );
        if self.verbose && !response.body.is_empty() {
            print_body("   res", &response.body);
        }
    }

    pub fn error(&self, request: &HttpRequest, err: &anyhow::Error) {
        if self.silent {
            return;
        }
        println!(
            "{} {} {}",
            timestamp(),
            style("✗").red(),
            style(format!("{} failed: {err:#}", request.id)).red(),
        );
    }
}

fn timestamp() -> StyledObject<String> {
    style(chrono::Local::now().format("[%H:%M:%S]").to_string()).dim()
}

fn method_styled(method: &str) -> StyledObject<String> {
    let padded = format!("{method:<7}");
    match method {
        "GET" => style(padded).green(),
        "POST" => style(padded).yellow(),
        "PUT" => style(padded).blue(),
        "PATCH" => style(padded).magenta(),
        "DELETE" => style(padded).red(),
        "HEAD" => style(padded).cyan(),
        _ => style(padded).white(),
    }
}

fn status_styled(status: u16) -> StyledObject<String> {
    let text = status.to_string();
    match status {
        200..=299 => style(text).green(),
        300..=399 => style(text).cyan(),
        400..=499 => style(text).yellow(),
        500..=599 => style(text).red(),
        _ => style(text).white(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration < Duration::from_millis(1) {
        format!("{}µs", duration.as_micros())
    } else if duration < Duration::from_secs(1) {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

fn print_body(prefix: &str, body: &[u8]) {
    if !is_text_body(body) {
        println!(
            "{} {}",
            style(prefix).black().bright(),
            style(format!("[binary {} bytes]", body.len())).dim()
        );
        return;
    }

    let text = String::from_utf8_lossy(body)
        .replace('\n', "\\n")
        .replace('\r', "")
        .replace('\t', " ");

    if text.len() > MAX_BODY_DISPLAY {
        let cut = truncate_at_char_boundary(&text, MAX_BODY_DISPLAY);
        println!(
            "{} {}{}",
            style(prefix).black().bright(),
            style(cut).black().bright(),
            style("...").dim()
        );
    } else {
        println!(
            "{} {}",
            style(prefix).black().bright(),
            style(text).black().bright()
        );
    }
}

fn truncate_at_char_boundary(text: &str, limit: usize) -> &str {
    let mut end = limit.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// A body is printable when it is valid UTF-8 with few control characters.
fn is_text_body(body: &[u8]) -> bool {
    if body.is_empty() || std::str::from_utf8(body).is_err() {
        return false;
    }
    let sample = &body[..body.len().min(512)];
    let control = sample
        .iter()
        .filter(|b| **b < 32 && !matches!(**b, b'\n' | b'\r' | b'\t'))
        .count();
    (control as f64) / (sample.len() as f64) < 0.1
}
