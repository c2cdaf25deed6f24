//! Escrow state machine - timed verification window for sell requests.
//!
//! `Created -> Running -> {Released, Abandoned}`. The session record lives on
//! the sell request itself; `EscrowTimer` is the viewer-owned task that ticks
//! it and detaches it when dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::config::ExpiryPolicy;
use crate::core::{Error, RequestId, Result};
use crate::desk::TradeDesk;

/// Why a session stopped without a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbandonReason {
    /// Countdown reached zero
    Expired,
    /// Owning view went away
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum EscrowState {
    Created,
    Running,
    Released { at: DateTime<Utc> },
    Abandoned { reason: AbandonReason },
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still running with this many seconds left
    Running(u64),
    /// This tick ran the window out and the session closed
    Expired,
    /// Session was not running; nothing changed
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowSession {
    pub window_secs: u64,
    pub remaining_secs: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub state: EscrowState,
}

impl EscrowSession {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs,
            remaining_secs: window_secs,
            started_at: None,
            state: EscrowState::Created,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != EscrowState::Created {
            return Err(Error::InvalidState(format!("escrow cannot start from {:?}", self.state)));
        }
        self.remaining_secs = self.window_secs;
        self.started_at = Some(Utc::now());
        self.state = EscrowState::Running;
        Ok(())
    }

    /// One second elapsed. Floors at zero.
    pub fn tick(&mut self, policy: ExpiryPolicy) -> TickOutcome {
        if self.state != EscrowState::Running {
            return TickOutcome::Idle;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 && policy == ExpiryPolicy::Abandon {
            self.state = EscrowState::Abandoned { reason: AbandonReason::Expired };
            return TickOutcome::Expired;
        }
        TickOutcome::Running(self.remaining_secs)
    }

    /// User confirmed the release. Does not touch the ledger.
    pub fn release(&mut self) -> Result<()> {
        match self.state {
            EscrowState::Running => {
                self.state = EscrowState::Released { at: Utc::now() };
                Ok(())
            }
            EscrowState::Released { .. } => Err(Error::InvalidState("escrow already released".into())),
            other => Err(Error::InvalidState(format!("escrow cannot be released from {:?}", other))),
        }
    }

    /// View closed without release. Returns whether anything changed.
    pub fn detach(&mut self) -> bool {
        if self.state == EscrowState::Running {
            self.state = EscrowState::Abandoned { reason: AbandonReason::Detached };
            true
        } else {
            false
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == EscrowState::Running
    }

    pub fn released(&self) -> bool {
        matches!(self.state, EscrowState::Released { .. })
    }

    /// Fraction of the window already used, 0-100
    pub fn progress_pct(&self) -> u64 {
        if self.window_secs == 0 {
            return 100;
        }
        (self.window_secs - self.remaining_secs.min(self.window_secs)) * 100 / self.window_secs
    }

    /// `MM:SS` countdown
    pub fn countdown(&self) -> String {
        format!("{:02}:{:02}", self.remaining_secs / 60, self.remaining_secs % 60)
    }
}

/// Periodic tick task for one session, owned by the view that started it.
/// Dropping the timer aborts the task and detaches a still-running session.
pub struct EscrowTimer {
    request_id: RequestId,
    desk: TradeDesk,
    task: Option<JoinHandle<()>>,
}

impl EscrowTimer {
    pub fn start(desk: TradeDesk, request_id: RequestId, period: Duration) -> Self {
        let task_desk = desk.clone();
        let id = request_id.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match task_desk.tick_escrow(&id) {
                    Ok(TickOutcome::Running(_)) => {}
                    Ok(TickOutcome::Expired) | Ok(TickOutcome::Idle) => break,
                    Err(e) => {
                        debug!("Escrow timer for {} stopping: {}", id, e);
                        break;
                    }
                }
            }
        });
        info!("Escrow timer attached to {}", request_id);
        Self { request_id, desk, task: Some(task) }
    }

    /// The tick task has stopped, on expiry or a missing request.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl Drop for EscrowTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // a missing request is fine here; nothing is left to detach
        let _ = self.desk.detach_escrow(&self.request_id);
    }
}
