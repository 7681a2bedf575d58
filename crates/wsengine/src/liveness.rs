//! Ping/pong liveness supervision.
//!
//! Each connection runs a chained heartbeat with exactly one pending timer:
//!
//! ```text
//!            initial_ping_delay
//!   open ──────────────────────► Idle ──timer──► PingSent ──timer──► Closed
//!                                 ▲                  │
//!                                 └──── pong ────────┘
//!                             (next ping at pong + ping_interval)
//! ```
//!
//! The next check is always scheduled from the resolution of the previous one,
//! so a slow peer can never have more than one unanswered ping.
//!
//! [`Liveness`] owns no timer itself. The host asks [`Liveness::deadline`] for
//! the single instant to wake up at and calls [`Liveness::on_timer`] when it
//! passes. Dropping the state cancels the chain.

use std::time::Duration;

use tokio::time::Instant;

use crate::Config;

/// Heartbeat durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&Config> for Heartbeat {
    fn from(config: &Config) -> Self {
        Self {
            initial_delay: config.initial_ping_delay,
            interval: config.ping_interval,
            timeout: config.pong_timeout,
        }
    }
}

/// Liveness state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// No ping outstanding, next one due at `next_ping_at`.
    Idle { next_ping_at: Instant },
    /// A ping was sent and the pong is due before `deadline`.
    PingSent { sent_at: Instant, deadline: Instant },
    /// The peer missed a pong or the connection was shut down.
    Closed,
}

/// What the host must do after the timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The deadline has not been reached yet.
    Wait,
    /// Send a ping frame now.
    SendPing,
    /// The pong did not arrive in time; close the connection.
    Expired,
}

/// Per-connection heartbeat supervisor.
#[derive(Debug, Clone)]
pub struct Liveness {
    heartbeat: Heartbeat,
    state: LivenessState,
}

impl Liveness {
    /// Starts supervising a connection opened at `now`.
    pub fn new(heartbeat: Heartbeat, now: Instant) -> Self {
        Self {
            heartbeat,
            state: LivenessState::Idle {
                next_ping_at: now + heartbeat.initial_delay,
            },
        }
    }

    #[inline]
    pub fn state(&self) -> LivenessState {
        self.state
    }

    /// Returns `true` while a ping is unanswered.
    #[inline]
    pub fn pong_pending(&self) -> bool {
        matches!(self.state, LivenessState::PingSent { .. })
    }

    /// The one instant at which [`Liveness::on_timer`] must be called next.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            LivenessState::Idle { next_ping_at } => Some(next_ping_at),
            LivenessState::PingSent { deadline, .. } => Some(deadline),
            LivenessState::Closed => None,
        }
    }

    /// Advances the state machine at `now`.
    ///
    /// On [`Tick::SendPing`] the state has already moved to `PingSent`; the
    /// caller writes the frame.
    pub fn on_timer(&mut self, now: Instant) -> Tick {
        match self.state {
            LivenessState::Idle { next_ping_at } if now >= next_ping_at => {
                self.state = LivenessState::PingSent {
                    sent_at: now,
                    deadline: now + self.heartbeat.timeout,
                };
                Tick::SendPing
            }
            LivenessState::PingSent { deadline, .. } if now >= deadline => {
                self.state = LivenessState::Closed;
                Tick::Expired
            }
            _ => Tick::Wait,
        }
    }

    /// Records a pong received at `now`.
    ///
    /// Returns the round trip time when it answers the outstanding ping.
    /// Unsolicited pongs leave the schedule untouched.
    pub fn on_pong(&mut self, now: Instant) -> Option<Duration> {
        match self.state {
            LivenessState::PingSent { sent_at, .. } => {
                self.state = LivenessState::Idle {
                    next_ping_at: now + self.heartbeat.interval,
                };
                Some(now.saturating_duration_since(sent_at))
            }
            _ => None,
        }
    }

    /// Stops supervision.
    pub fn close(&mut self) {
        self.state = LivenessState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> Heartbeat {
        Heartbeat {
            initial_delay: Duration::from_secs(10),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_first_ping_after_initial_delay() {
        let start = Instant::now();
        let mut liveness = Liveness::new(heartbeat(), start);

        assert_eq!(liveness.deadline(), Some(start + Duration::from_secs(10)));
        assert_eq!(liveness.on_timer(start + Duration::from_secs(9)), Tick::Wait);
        assert!(!liveness.pong_pending());

        assert_eq!(
            liveness.on_timer(start + Duration::from_secs(10)),
            Tick::SendPing
        );
        assert!(liveness.pong_pending());
        assert_eq!(liveness.deadline(), Some(start + Duration::from_secs(15)));
    }

    #[test]
    fn test_pong_schedules_next_ping_from_receipt() {
        let start = Instant::now();
        let mut liveness = Liveness::new(heartbeat(), start);
        let ping_at = start + Duration::from_secs(10);
        liveness.on_timer(ping_at);

        let pong_at = ping_at + Duration::from_secs(2);
        assert_eq!(liveness.on_pong(pong_at), Some(Duration::from_secs(2)));
        assert!(!liveness.pong_pending());
        assert_eq!(liveness.deadline(), Some(pong_at + Duration::from_secs(30)));

        // never earlier than the interval
        assert_eq!(
            liveness.on_timer(pong_at + Duration::from_secs(29)),
            Tick::Wait
        );
        assert_eq!(
            liveness.on_timer(pong_at + Duration::from_secs(30)),
            Tick::SendPing
        );
    }

    #[test]
    fn test_missing_pong_expires() {
        let start = Instant::now();
        let mut liveness = Liveness::new(heartbeat(), start);
        let ping_at = start + Duration::from_secs(10);
        liveness.on_timer(ping_at);

        assert_eq!(liveness.on_timer(ping_at + Duration::from_secs(4)), Tick::Wait);
        assert_eq!(
            liveness.on_timer(ping_at + Duration::from_secs(5)),
            Tick::Expired
        );
        assert_eq!(liveness.state(), LivenessState::Closed);
        assert_eq!(liveness.deadline(), None);
        assert_eq!(liveness.on_timer(ping_at + Duration::from_secs(60)), Tick::Wait);
    }

    #[test]
    fn test_unsolicited_pong_ignored() {
        let start = Instant::now();
        let mut liveness = Liveness::new(heartbeat(), start);
        assert_eq!(liveness.on_pong(start + Duration::from_secs(1)), None);
        assert_eq!(liveness.deadline(), Some(start + Duration::from_secs(10)));
    }
}
