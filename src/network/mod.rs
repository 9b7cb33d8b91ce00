//! Network join controller.
//!
//! Owns the mesh membership lifecycle:
//!
//! ```text
//!            start_steering            success
//!   Idle ───────────────▶ Steering ─────────────▶ Joined
//!     ▲                     │  ▲                    │
//!     │               failure│  │timer flag          │ leave
//!     │                     ▼  │                    │
//!     │                  RetryWait                  │
//!     │                     │ budget spent          │
//!     │          ┌──────────┴───────────┐           │
//!     │          ▼                      ▼           │
//!     │      Cooldown ──timer──▶ (fresh burst)   Halted
//!     └────────────────────────────────────────────┘
//! ```
//!
//! Steering is fire-and-forget; the outcome arrives later as a
//! [`MeshSignal`]. The retry timer callback only raises a flag and
//! [`JoinController::poll`] acts on it from the main loop.

pub mod bind;
pub mod zcl;

use log::{info, warn};

use crate::app::ports::{MeshPort, RetryTimer};
use crate::config::SteeringConfig;
use crate::error::ProtocolFailure;

/// Backoff delays for retries 0, 1, 2 and 3+ (seconds).
const BACKOFF_SCHEDULE_S: [u32; 4] = [5, 10, 20, 40];

const US_PER_S: u64 = 1_000_000;

/// Signals delivered by the mesh stack, queued for the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshSignal {
    /// Stack started for the first time (or after a factory reset).
    FirstStart { status: i32, joined: bool },
    /// Stack started from saved network state.
    Reboot { status: i32 },
    /// A steering attempt finished.
    Steering { status: i32 },
    /// The node left or was removed from the network.
    Leave,
    /// The stack is idle and would allow light sleep.
    CanSleep,
    /// A bind request finished.
    BindComplete { token: u16, status: i32 },
    /// The maintenance cluster's reset attribute was written.
    ResetCounterWritten,
    Other { signal: u32, status: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    Idle,
    Steering,
    Joined,
    RetryWait,
    /// Attempt budget spent; a fresh burst starts when the cooldown ends.
    Cooldown,
    /// Attempt budget spent with no cooldown; waits for an external reset.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinState {
    pub phase: JoinPhase,
    pub retry_count: u8,
    pub total_attempts: u32,
    pub retry_deadline: Option<u64>,
}

/// What a controller call did, for the orchestrator to act on and log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinTransition {
    /// Nothing changed.
    None,
    SteeringStarted { attempt: u32 },
    /// Already steering; the request was dropped.
    AlreadySteering,
    /// Attempt budget spent; steering was not started.
    Suppressed,
    Joined,
    RetryScheduled { delay_s: u32, retry_count: u8 },
    CooldownStarted { cooldown_s: u32 },
    Halted,
    Left,
}

/// Retry policy derived from [`SteeringConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteeringPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// `None` halts once the budget is spent.
    pub cooldown_s: Option<u32>,
    pub max_backoff_s: u32,
    pub join_tx_power_dbm: i8,
    pub tx_power_dbm: i8,
}

impl From<&SteeringConfig> for SteeringPolicy {
    fn from(cfg: &SteeringConfig) -> Self {
        Self {
            max_attempts: (cfg.max_attempts > 0).then_some(cfg.max_attempts),
            cooldown_s: (cfg.cooldown_s > 0).then_some(cfg.cooldown_s),
            max_backoff_s: cfg.max_backoff_s.max(1),
            join_tx_power_dbm: cfg.join_tx_power_dbm,
            tx_power_dbm: cfg.tx_power_dbm,
        }
    }
}

/// Delay before retry number `retry_count` (0-based), capped at `max_s`.
pub fn backoff_delay_s(retry_count: u8, max_s: u32) -> u32 {
    let idx = usize::from(retry_count).min(BACKOFF_SCHEDULE_S.len() - 1);
    BACKOFF_SCHEDULE_S[idx].min(max_s)
}

pub struct JoinController {
    state: JoinState,
    policy: SteeringPolicy,
    /// The retry timer could not be armed; `poll` falls back to the deadline.
    timer_unarmed: bool,
}

impl JoinController {
    pub fn new(policy: SteeringPolicy) -> Self {
        Self {
            state: JoinState {
                phase: JoinPhase::Idle,
                retry_count: 0,
                total_attempts: 0,
                retry_deadline: None,
            },
            policy,
            timer_unarmed: false,
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn phase(&self) -> JoinPhase {
        self.state.phase
    }

    pub fn is_joined(&self) -> bool {
        self.state.phase == JoinPhase::Joined
    }

    pub fn set_policy(&mut self, policy: SteeringPolicy) {
        self.policy = policy;
    }

    fn budget_spent(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.state.total_attempts >= max)
    }

    /// Enter `Steering` and hand the request to the stack.
    ///
    /// A stack refusal is handled like a failed attempt.
    pub fn start_steering(
        &mut self,
        mesh: &mut dyn MeshPort,
        timer: &mut dyn RetryTimer,
        now: u64,
        reason: &str,
    ) -> JoinTransition {
        if self.state.phase == JoinPhase::Steering {
            return JoinTransition::AlreadySteering;
        }
        if self.budget_spent() {
            warn!(
                "join: steering suppressed ({}), {} attempts used",
                reason, self.state.total_attempts
            );
            return JoinTransition::Suppressed;
        }

        self.state.phase = JoinPhase::Steering;
        self.state.retry_deadline = None;
        self.state.total_attempts = self.state.total_attempts.saturating_add(1);
        mesh.set_tx_power(self.policy.join_tx_power_dbm);
        info!(
            "join: steering ({}), attempt {} retry {} tx={}dBm",
            reason,
            self.state.total_attempts,
            self.state.retry_count,
            self.policy.join_tx_power_dbm
        );

        match mesh.start_steering() {
            Ok(()) => JoinTransition::SteeringStarted {
                attempt: self.state.total_attempts,
            },
            Err(e) => {
                warn!("join: stack refused steering: {}", e);
                self.on_join_failure(timer, now, ProtocolFailure::SteeringFailed(e.0))
            }
        }
    }

    /// The stack reports membership.
    pub fn on_join_success(
        &mut self,
        mesh: &mut dyn MeshPort,
        timer: &mut dyn RetryTimer,
    ) -> JoinTransition {
        timer.stop();
        self.timer_unarmed = false;
        self.state = JoinState {
            phase: JoinPhase::Joined,
            retry_count: 0,
            total_attempts: 0,
            retry_deadline: None,
        };
        mesh.set_tx_power(self.policy.tx_power_dbm);
        info!("join: joined, tx={}dBm", self.policy.tx_power_dbm);
        JoinTransition::Joined
    }

    /// A steering or rejoin attempt failed.
    pub fn on_join_failure(
        &mut self,
        timer: &mut dyn RetryTimer,
        now: u64,
        failure: ProtocolFailure,
    ) -> JoinTransition {
        match self.state.phase {
            JoinPhase::Cooldown | JoinPhase::Halted | JoinPhase::Joined => {
                warn!("join: ignoring {} in {:?}", failure, self.state.phase);
                return JoinTransition::None;
            }
            JoinPhase::Idle | JoinPhase::Steering | JoinPhase::RetryWait => {}
        }
        warn!("join: {}", failure);

        if self.budget_spent() {
            timer.stop();
            return match self.policy.cooldown_s {
                Some(cooldown_s) => {
                    self.state.retry_count = 0;
                    self.state.phase = JoinPhase::Cooldown;
                    self.arm(timer, now, cooldown_s);
                    warn!(
                        "join: {} attempts used, cooling down for {}s",
                        self.state.total_attempts, cooldown_s
                    );
                    JoinTransition::CooldownStarted { cooldown_s }
                }
                None => {
                    self.state.phase = JoinPhase::Halted;
                    self.state.retry_deadline = None;
                    warn!(
                        "join: {} attempts used, retries halted",
                        self.state.total_attempts
                    );
                    JoinTransition::Halted
                }
            };
        }

        let delay_s = backoff_delay_s(self.state.retry_count, self.policy.max_backoff_s);
        self.state.retry_count = self.state.retry_count.saturating_add(1);
        self.state.phase = JoinPhase::RetryWait;
        self.arm(timer, now, delay_s);
        info!(
            "join: retry {} in {}s",
            self.state.retry_count, delay_s
        );
        JoinTransition::RetryScheduled {
            delay_s,
            retry_count: self.state.retry_count,
        }
    }

    fn arm(&mut self, timer: &mut dyn RetryTimer, now: u64, delay_s: u32) {
        let delay_us = u64::from(delay_s) * US_PER_S;
        self.state.retry_deadline = Some(now.saturating_add(delay_us));
        timer.stop();
        match timer.start_once(delay_us) {
            Ok(()) => self.timer_unarmed = false,
            Err(e) => {
                log::error!("join: retry timer not armed ({}), polling deadline", e);
                self.timer_unarmed = true;
            }
        }
    }

    /// Act on an expired retry or cooldown timer. Call once per loop.
    pub fn poll(
        &mut self,
        mesh: &mut dyn MeshPort,
        timer: &mut dyn RetryTimer,
        now: u64,
    ) -> JoinTransition {
        let fired = timer.take_expired();
        let overdue = self.timer_unarmed
            && self.state.retry_deadline.is_some_and(|deadline| now >= deadline);
        if !fired && !overdue {
            return JoinTransition::None;
        }
        self.timer_unarmed = false;

        match self.state.phase {
            JoinPhase::RetryWait => self.start_steering(mesh, timer, now, "retry"),
            JoinPhase::Cooldown => {
                self.state.retry_count = 0;
                self.state.total_attempts = 0;
                info!("join: cooldown over, new retry burst");
                self.start_steering(mesh, timer, now, "cooldown elapsed")
            }
            _ => JoinTransition::None,
        }
    }

    /// The node is no longer a network member.
    pub fn on_leave(&mut self, timer: &mut dyn RetryTimer) -> JoinTransition {
        timer.stop();
        self.timer_unarmed = false;
        self.state.phase = JoinPhase::Idle;
        self.state.retry_deadline = None;
        info!("join: left network");
        JoinTransition::Left
    }

    /// Back to `Idle` with a fresh budget.
    pub fn reset(&mut self, timer: &mut dyn RetryTimer) {
        timer.stop();
        self.timer_unarmed = false;
        self.state = JoinState {
            phase: JoinPhase::Idle,
            retry_count: 0,
            total_attempts: 0,
            retry_deadline: None,
        };
    }
}
