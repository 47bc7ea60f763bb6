//! Per-cycle context for correlating log output.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What caused a reconciliation cycle to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    /// The initial deployment pass when the service starts.
    Startup,
    /// A debounced burst of filesystem events.
    FilesystemChange,
    /// An explicit request from an operator or embedding host.
    Manual,
}

impl fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "startup",
            Self::FilesystemChange => "filesystem_change",
            Self::Manual => "manual",
        })
    }
}

/// Identity and timing of one reconciliation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleContext {
    /// Unique cycle identifier.
    pub cycle_id: Uuid,
    /// Why the cycle runs.
    pub trigger: CycleTrigger,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
}

impl CycleContext {
    /// Create a context for a cycle starting now.
    #[must_use]
    pub fn new(trigger: CycleTrigger) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            trigger,
            started_at: Utc::now(),
        }
    }

    /// Elapsed time since the cycle started.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        // started_at is taken at construction, so now >= started_at.
        #[allow(clippy::arithmetic_side_effects)]
        let elapsed = Utc::now() - self.started_at;
        elapsed
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed().num_milliseconds()
    }

    /// A tracing span carrying the cycle identity.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "cycle",
            cycle_id = %self.short_id(),
            trigger = %self.trigger,
        )
    }

    /// First eight characters of the cycle id.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.cycle_id.simple().to_string()[..8].to_string()
    }
}

/// Logs cycle start and completion inside the cycle span.
///
/// The guard does not enter the span itself; attach [`CycleGuard::span`] to
/// the cycle future with `tracing::Instrument` so the guard can be held
/// across await points.
pub struct CycleGuard {
    context: CycleContext,
    span: tracing::Span,
}

impl CycleGuard {
    /// Create the cycle span and log the start of the cycle.
    #[must_use]
    pub fn new(context: CycleContext) -> Self {
        let span = context.span();
        span.in_scope(|| tracing::debug!("Cycle started"));
        Self { context, span }
    }

    /// The cycle context.
    #[must_use]
    pub fn context(&self) -> &CycleContext {
        &self.context
    }

    /// The cycle span.
    #[must_use]
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        let elapsed_ms = self.context.elapsed_ms();
        self.span
            .in_scope(|| tracing::debug!(elapsed_ms, "Cycle finished"));
    }
}
