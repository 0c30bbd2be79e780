//! Per-provider request rate limiting
//!
//! Streaming providers meter API traffic per account, so outbound
//! requests are gated per provider with a fixed-window
//! requests-per-minute budget. The gate never errors: callers suspend
//! until a grant is available. With a `Some(0)` budget the gate
//! suspends forever — that is a documented misconfiguration, not a
//! defect the gate tries to paper over.
//!
//! Quota decrement happens under a per-provider async mutex, so
//! concurrent callers can never over-admit past the configured budget
//! within one window. The lock is held only for the in-memory
//! bookkeeping, never across a sleep or any I/O — workers waiting on
//! one provider's window do not serialize fetches for other providers.

use crate::config::Config;
use crate::types::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Length of one rate-limit window
const WINDOW: Duration = Duration::from_secs(60);

/// Mutable window state for one provider
#[derive(Debug)]
struct GateState {
    /// When the current window opened
    window_start: Instant,
    /// Grants left in the current window
    remaining: u32,
}

/// One provider's gate: its configured budget plus guarded window state
struct Gate {
    limit: Option<u32>,
    state: tokio::sync::Mutex<GateState>,
}

/// Per-provider request gate shared by all workers
///
/// Cloning is cheap; all clones share the same window state.
#[derive(Clone)]
pub struct RateLimiter {
    window: Duration,
    gates: Arc<HashMap<Provider, Gate>>,
}

impl RateLimiter {
    /// Build the limiter from the configured per-provider budgets
    ///
    /// Every [`Provider`] variant gets a gate; providers without a
    /// configured budget are unlimited and their gate is a no-op.
    pub fn new(config: &Config) -> Self {
        Self::with_window(config, WINDOW)
    }

    /// Build with an explicit window length (shortened in tests)
    pub(crate) fn with_window(config: &Config, window: Duration) -> Self {
        let now = Instant::now();
        let gates = Provider::ALL
            .iter()
            .map(|&provider| {
                let limit = config.requests_per_minute(provider);
                let gate = Gate {
                    limit,
                    state: tokio::sync::Mutex::new(GateState {
                        window_start: now,
                        remaining: limit.unwrap_or(0),
                    }),
                };
                (provider, gate)
            })
            .collect();

        Self {
            window,
            gates: Arc::new(gates),
        }
    }

    /// The configured budget for a provider (None = unlimited)
    pub fn limit(&self, provider: Provider) -> Option<u32> {
        self.gates.get(&provider).and_then(|gate| gate.limit)
    }

    /// Wait until the provider's window has a grant available, then take it
    ///
    /// Returns immediately for unlimited providers. Under concurrent
    /// callers, at most `limit` acquisitions return per window; the
    /// rest suspend until rollover. Never errors.
    pub async fn acquire(&self, provider: Provider) {
        let Some(gate) = self.gates.get(&provider) else {
            // All variants are registered at construction; nothing to gate
            return;
        };
        let Some(limit) = gate.limit else {
            return; // unlimited — no lock taken
        };

        loop {
            let wait = {
                let mut state = gate.state.lock().await;
                let now = Instant::now();

                if now.duration_since(state.window_start) >= self.window {
                    state.window_start = now;
                    state.remaining = limit;
                }

                if state.remaining > 0 {
                    state.remaining -= 1;
                    return;
                }

                self.window
                    .saturating_sub(now.duration_since(state.window_start))
            };

            // Quota exhausted — sleep past rollover without holding the lock,
            // then re-check (another caller may win the refreshed window first)
            tracing::debug!(
                provider = %provider,
                wait_ms = wait.as_millis(),
                "Rate limit window exhausted, waiting for rollover"
            );
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}
