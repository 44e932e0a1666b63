//! Cloudflared CLI wrapper and output parsing

use std::process::Stdio;

use tokio::process::{Child, Command};

use super::config::ValidConfig;
use super::events::LogLevel;

/// Result of checking cloudflared installation
#[derive(Debug, Clone)]
pub struct CloudflaredInfo {
    pub version: String,
    pub path: String,
}

/// Check if cloudflared is installed and get version
pub async fn check_installation(binary: &str) -> Option<CloudflaredInfo> {
    let output = Command::new(binary).arg("--version").output().await.ok()?;

    if !output.status.success() {
        return None;
    }

    let version_str = String::from_utf8_lossy(&output.stdout);
    // Parse "cloudflared version 2024.12.0 (built 2024-12-01)"
    let version = version_str
        .split_whitespace()
        .nth(2)
        .unwrap_or("unknown")
        .to_string();

    let path = which::which(binary).ok()?.to_string_lossy().to_string();

    Some(CloudflaredInfo { version, path })
}

/// Spawn `cloudflared tunnel run` for a token-authenticated tunnel
///
/// The token goes through `TUNNEL_TOKEN` so it never shows up in the
/// process list. Logs are read from stderr.
pub fn spawn_tunnel(binary: &str, config: &ValidConfig) -> std::io::Result<Child> {
    Command::new(binary)
        .arg("tunnel")
        .arg("--no-autoupdate")
        .arg("run")
        .arg("--url")
        .arg(config.local_addr().to_string())
        .env("TUNNEL_TOKEN", config.auth_token())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// Parse the level and message out of a cloudflared log line
///
/// Accepts both "INF message" and "2024-12-01T10:00:00Z INF message".
pub fn parse_log_line(line: &str) -> Option<(LogLevel, &str)> {
    let mut rest = line.trim_start();
    for _ in 0..2 {
        let (token, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let level = match token {
            "DBG" => LogLevel::Debug,
            "INF" => LogLevel::Info,
            "WRN" => LogLevel::Warn,
            "ERR" | "FTL" => LogLevel::Error,
            _ => {
                rest = tail.trim_start();
                continue;
            }
        };
        return Some((level, tail.trim()));
    }
    None
}

/// Extract a quick-tunnel URL (`https://<name>.trycloudflare.com`) from a log line
pub fn extract_tunnel_url(line: &str) -> Option<String> {
    let start = line.find("https://")?;
    let url: String = line[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '|' && *c != '"')
        .collect();
    url.ends_with(".trycloudflare.com").then_some(url)
}

/// Check if line indicates successful connection
pub fn is_connection_registered(line: &str) -> bool {
    line.contains("Registered tunnel connection")
        || (line.contains("Connection") && line.contains(" registered"))
}

/// Check if line indicates connection lost
pub fn is_connection_lost(line: &str) -> bool {
    line.contains("Unregistered") || line.contains("connection lost")
}

/// Check if line indicates the token or credentials were refused
pub fn is_auth_failure(line: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "Unauthorized",
        "Provided Tunnel token is not valid",
        "Invalid tunnel secret",
        "failed to unmarshal tunnel token",
    ];
    MARKERS.iter().any(|marker| line.contains(marker))
}
