//! Window focus side effect
//!
//! Before emitting input the bridge raises the target window so the game, not
//! whatever happens to be focused, receives the keys. Focus is best-effort:
//! failures are logged and never reach the caller.

use crate::config::FocusConfig;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Something that can pull the target application to the foreground
pub trait FocusTarget: Send + Sync + 'static {
    fn focus(&self);
}

/// Rate limiter for focus requests
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Minimum spacing between two accepted requests
    min_interval: Duration,

    /// When the last request was let through
    last_event_time: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_event_time: None,
        }
    }

    /// Returns true and arms the limiter if enough time has passed
    pub fn should_process(&mut self) -> bool {
        let now = Instant::now();
        match self.last_event_time {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_event_time = Some(now);
                true
            }
        }
    }
}

/// Focuses an X11 window through `wmctrl -i -a <id>`
///
/// Without a window id every call is a no-op and input goes to whichever
/// window is focused.
pub struct WindowFocus {
    window_id: Option<String>,
    limiter: Mutex<RateLimiter>,
}

impl WindowFocus {
    pub fn new(window_id: Option<String>, min_interval: Duration) -> Self {
        Self {
            window_id,
            limiter: Mutex::new(RateLimiter::new(min_interval)),
        }
    }

    /// Builds the focus target from configuration, resolving a title through `wmctrl -l`
    pub async fn from_config(config: &FocusConfig) -> Self {
        let window_id = match (&config.window_id, &config.window_title) {
            (Some(id), _) => Some(id.clone()),
            (None, Some(title)) => resolve_window_by_title(title).await,
            (None, None) => None,
        };

        match &window_id {
            Some(id) => info!("Target window: {}", id),
            None => info!("No target window, input goes to the focused window"),
        }

        Self::new(window_id, Duration::from_millis(config.min_interval_ms))
    }
}

impl FocusTarget for WindowFocus {
    fn focus(&self) {
        let Some(window_id) = &self.window_id else {
            return;
        };

        match self.limiter.lock() {
            Ok(mut limiter) => {
                if !limiter.should_process() {
                    return;
                }
            }
            Err(e) => {
                warn!("Focus limiter poisoned: {}", e);
                return;
            }
        }

        // The child is reaped by tokio once it exits; nothing waits on it here
        if let Err(e) = Command::new("wmctrl")
            .args(["-i", "-a", window_id.as_str()])
            .spawn()
        {
            warn!("Failed to focus window {}: {}", window_id, e);
        }
    }
}

/// One line of `wmctrl -l`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub id: String,
    pub name: String,
}

/// Parses `wmctrl -l` output: `<id> <desktop> <host> <title...>`
pub fn parse_window_list(output: &str) -> Vec<WindowEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let _desktop = parts.next()?;
            let _host = parts.next()?;
            let name = parts.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return None;
            }
            Some(WindowEntry {
                id: id.to_string(),
                name,
            })
        })
        .collect()
}

async fn resolve_window_by_title(title: &str) -> Option<String> {
    let output = match Command::new("wmctrl").arg("-l").output().await {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!("wmctrl -l exited with {}", output.status);
            return None;
        }
        Err(e) => {
            warn!("wmctrl not available, window targeting disabled: {}", e);
            return None;
        }
    };

    let listing = String::from_utf8_lossy(&output.stdout);
    let windows = parse_window_list(&listing);
    debug!("Found {} windows", windows.len());

    let needle = title.to_lowercase();
    let found = windows
        .into_iter()
        .find(|window| window.name.to_lowercase().contains(&needle));
    if found.is_none() {
        warn!("No window title contains {:?}", title);
    }
    found.map(|window| window.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wmctrl_listing() {
        let listing = "0x01e00003  0 host Terminal\n\
                       0x04a00007  0 host Speed Dreams 2.3\n\
                       0x05000001 -1 host\n";
        let windows = parse_window_list(listing);

        assert_eq!(
            windows,
            vec![
                WindowEntry {
                    id: "0x01e00003".to_string(),
                    name: "Terminal".to_string(),
                },
                WindowEntry {
                    id: "0x04a00007".to_string(),
                    name: "Speed Dreams 2.3".to_string(),
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_spaces_requests() {
        let mut limiter = RateLimiter::new(Duration::from_millis(250));

        assert!(limiter.should_process());
        assert!(!limiter.should_process());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!limiter.should_process());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(limiter.should_process());
    }

    #[test]
    fn focus_without_window_is_noop() {
        let focus = WindowFocus::new(None, Duration::from_millis(250));
        focus.focus();
        assert!(focus.window_id.is_none());
        assert_eq!(focus.limiter.lock().unwrap().last_event_time, None);
    }
}
