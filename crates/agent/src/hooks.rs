use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info};

use vendi_core::TurnMetadata;

use crate::orchestrator::ChatResponse;

/// Mutable state threaded through the hook chain for one turn.
pub struct TurnContext {
    pub session_id: String,
    pub message: String,
    pub metadata: TurnMetadata,
    pub started_at: Instant,
    pub response: Option<ChatResponse>,
    pub error: Option<String>,
}

impl TurnContext {
    pub fn new(session_id: &str, message: &str, metadata: TurnMetadata) -> Self {
        Self {
            session_id: session_id.to_string(),
            message: message.to_string(),
            metadata,
            started_at: Instant::now(),
            response: None,
            error: None,
        }
    }
}

/// Middleware around a turn. Handlers run in registration order; a
/// failing `before` or `after` aborts the turn into the fallback
/// path, where `error` handlers still run.
#[async_trait]
pub trait TurnHook: Send + Sync {
    async fn before(&self, _ctx: &mut TurnContext) -> Result<()> {
        Ok(())
    }

    async fn after(&self, _ctx: &mut TurnContext) -> Result<()> {
        Ok(())
    }

    async fn error(&self, _ctx: &mut TurnContext) -> Result<()> {
        Ok(())
    }
}

/// Structured request logging for each turn.
#[derive(Default)]
pub struct RequestLogger;

#[async_trait]
impl TurnHook for RequestLogger {
    async fn before(&self, ctx: &mut TurnContext) -> Result<()> {
        info!(
            event_name = "turn.start",
            session_id = %ctx.session_id,
            message_chars = ctx.message.chars().count(),
            "turn received"
        );
        Ok(())
    }

    async fn after(&self, ctx: &mut TurnContext) -> Result<()> {
        info!(
            event_name = "turn.success",
            session_id = %ctx.session_id,
            intent = ctx.response.as_ref().map(|response| response.intent.as_str()).unwrap_or("unknown"),
            duration_ms = ctx.started_at.elapsed().as_millis() as u64,
            "turn completed"
        );
        Ok(())
    }

    async fn error(&self, ctx: &mut TurnContext) -> Result<()> {
        error!(
            event_name = "turn.error",
            session_id = %ctx.session_id,
            error = ctx.error.as_deref().unwrap_or("unknown"),
            duration_ms = ctx.started_at.elapsed().as_millis() as u64,
            "turn failed"
        );
        Ok(())
    }
}

struct Window {
    count: u32,
    window_start: Instant,
}

/// Fixed-window per-session rate limiting with a bounded key map:
/// when the map is full, expired windows are dropped first, then the
/// stalest window is evicted. The map can never grow past
/// `max_sessions`.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    max_sessions: usize,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, max_sessions: usize) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            max_sessions: max_sessions.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn tracked_sessions(&self) -> usize {
        self.windows.lock().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(60), 10_000)
    }
}

#[async_trait]
impl TurnHook for RateLimiter {
    async fn before(&self, ctx: &mut TurnContext) -> Result<()> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if !windows.contains_key(&ctx.session_id) && windows.len() >= self.max_sessions {
            windows.retain(|_, window| now.duration_since(window.window_start) <= self.window);
            while windows.len() >= self.max_sessions {
                let stalest = windows
                    .iter()
                    .min_by_key(|(_, window)| window.window_start)
                    .map(|(key, _)| key.clone());
                match stalest {
                    Some(key) => windows.remove(&key),
                    None => break,
                };
            }
        }

        let window = windows
            .entry(ctx.session_id.clone())
            .or_insert_with(|| Window { count: 0, window_start: now });

        if now.duration_since(window.window_start) > self.window {
            window.count = 0;
            window.window_start = now;
        }

        window.count += 1;
        if window.count > self.max_requests {
            bail!("Rate limit exceeded for this session.");
        }

        Ok(())
    }
}
