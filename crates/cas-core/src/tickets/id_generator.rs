//! Ticket id generation: `PREFIX-SEQUENCE-RANDOM[-SUFFIX]`.
//!
//! SEQUENCE is a process-local counter that keeps ids from one node distinct
//! even if the random segment ever collided; RANDOM carries the entropy that
//! makes ids unguessable; SUFFIX names the node for cluster routing.

use crate::crypto::{self, CryptoError};
use crate::tickets::TicketType;
use ring::rand::SystemRandom;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default length of the RANDOM segment.
pub const DEFAULT_RANDOM_LENGTH: usize = 20;

#[derive(Debug)]
pub struct UniqueTicketIdGenerator {
    sequence: AtomicU64,
    random_length: usize,
    suffix: Option<String>,
    rng: SystemRandom,
}

impl UniqueTicketIdGenerator {
    pub fn new(random_length: usize, suffix: Option<String>) -> Self {
        Self {
            sequence: AtomicU64::new(1),
            random_length,
            suffix: suffix.filter(|s| !s.is_empty()),
            rng: SystemRandom::new(),
        }
    }

    pub fn new_ticket_id(&self, ticket_type: TicketType) -> Result<String, CryptoError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let random = crypto::random_alphanumeric(&self.rng, self.random_length)?;

        let mut id = format!("{}-{}-{}", ticket_type.prefix(), sequence, random);
        if let Some(suffix) = &self.suffix {
            id.push('-');
            id.push_str(suffix);
        }
        Ok(id)
    }
}

impl Default for UniqueTicketIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_RANDOM_LENGTH, None)
    }
}
