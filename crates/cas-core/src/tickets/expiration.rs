//! Expiration policies.
//!
//! A policy is data: it serializes with the ticket it governs, so every node
//! reading the ticket back from a shared backend applies the same rule. All
//! evaluation is a pure function of the ticket and `now`; applying the state
//! changes that drive it (`last_used_at`, `count_of_uses`) is the
//! orchestrator's job.

use super::Ticket;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    Never,
    /// Expired once `now - created_at > time_to_kill`.
    HardTimeout { time_to_kill_secs: i64 },
    /// Expired once `now - last_used_at > time_to_idle`.
    IdleTimeout { time_to_idle_secs: i64 },
    /// Expired once `count_of_uses >= max_uses`.
    UseCount { max_uses: u32 },
    /// Expired as soon as any member policy is expired.
    AnyOf { policies: Vec<ExpirationPolicy> },
    /// Delegates to `remember_me` when the ticket's authentication was a
    /// remember-me login, otherwise to `default`.
    RememberMe {
        remember_me: Box<ExpirationPolicy>,
        default: Box<ExpirationPolicy>,
    },
}

impl ExpirationPolicy {
    /// Session shape for TGTs and PGTs: hard ceiling plus sliding idle window.
    pub fn session(max_time_to_live_secs: i64, time_to_idle_secs: i64) -> Self {
        ExpirationPolicy::AnyOf {
            policies: vec![
                ExpirationPolicy::HardTimeout {
                    time_to_kill_secs: max_time_to_live_secs,
                },
                ExpirationPolicy::IdleTimeout { time_to_idle_secs },
            ],
        }
    }

    /// Grant shape for STs and PTs: short hard TTL plus a use ceiling.
    pub fn grant(time_to_kill_secs: i64, max_uses: u32) -> Self {
        ExpirationPolicy::AnyOf {
            policies: vec![
                ExpirationPolicy::HardTimeout { time_to_kill_secs },
                ExpirationPolicy::UseCount { max_uses },
            ],
        }
    }

    pub fn is_expired(&self, ticket: &Ticket, now: DateTime<Utc>) -> bool {
        match self {
            ExpirationPolicy::Never => false,
            ExpirationPolicy::HardTimeout { time_to_kill_secs } => {
                now - ticket.created_at > Duration::seconds(*time_to_kill_secs)
            }
            ExpirationPolicy::IdleTimeout { time_to_idle_secs } => {
                now - ticket.last_used_at > Duration::seconds(*time_to_idle_secs)
            }
            ExpirationPolicy::UseCount { max_uses } => ticket.count_of_uses >= *max_uses,
            ExpirationPolicy::AnyOf { policies } => {
                policies.iter().any(|p| p.is_expired(ticket, now))
            }
            ExpirationPolicy::RememberMe {
                remember_me,
                default,
            } => {
                let remembered = ticket
                    .authentication()
                    .map(|a| a.is_remember_me())
                    .unwrap_or(false);
                if remembered {
                    remember_me.is_expired(ticket, now)
                } else {
                    default.is_expired(ticket, now)
                }
            }
        }
    }

    /// Longest time, from creation, that a ticket under this policy can
    /// possibly live. Backends use it as a storage-level eviction hint;
    /// `None` means unbounded.
    pub fn hard_ceiling(&self) -> Option<Duration> {
        match self {
            ExpirationPolicy::HardTimeout { time_to_kill_secs } => {
                Some(Duration::seconds(*time_to_kill_secs))
            }
            ExpirationPolicy::Never
            | ExpirationPolicy::IdleTimeout { .. }
            | ExpirationPolicy::UseCount { .. } => None,
            ExpirationPolicy::AnyOf { policies } => {
                policies.iter().filter_map(ExpirationPolicy::hard_ceiling).min()
            }
            ExpirationPolicy::RememberMe {
                remember_me,
                default,
            } => match (remember_me.hard_ceiling(), default.hard_ceiling()) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
        }
    }
}
