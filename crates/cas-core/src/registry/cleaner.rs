//! Background sweep of expired tickets.
//!
//! Lazy expiration already hides expired tickets from readers; the sweep
//! reclaims storage for tickets nobody reads again. Expired granting tickets
//! are removed with everything beneath them. Running the sweep on several
//! nodes at once is harmless since removal is idempotent.
//!
//! # Graceful Shutdown
//!
//! [`run_cleaner`] exits when its cancellation token is cancelled, after
//! finishing any sweep already in progress.

use super::{RegistryError, TicketRegistry};
use crate::observability::metrics;
use common::sanitize::MaskedTicketId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone)]
pub struct TicketRegistryCleaner {
    registry: Arc<TicketRegistry>,
}

impl TicketRegistryCleaner {
    pub fn new(registry: Arc<TicketRegistry>) -> Self {
        Self { registry }
    }

    /// Remove every expired ticket. Returns the number of records removed,
    /// including non-expired descendants of expired granting tickets.
    #[instrument(skip_all, name = "cas.registry.sweep")]
    pub async fn clean(&self) -> Result<u64, RegistryError> {
        let start = Instant::now();
        let now = self.registry.clock().now();

        let expired: Vec<_> = self
            .registry
            .all_tickets_including_expired()
            .await?
            .into_iter()
            .filter(|ticket| ticket.is_expired(now))
            .collect();

        let mut removed = 0u64;
        for ticket in &expired {
            debug!(
                target: "cas.registry.cleaner",
                ticket_id = %MaskedTicketId(&ticket.id),
                ticket_type = %ticket.ticket_type,
                "Removing expired ticket"
            );
            removed += self.registry.delete_ticket(&ticket.id).await?;
        }

        metrics::record_tickets_removed("sweep", removed);
        metrics::record_registry_sweep(start.elapsed());
        Ok(removed)
    }
}

/// Run [`TicketRegistryCleaner::clean`] every `interval` until `cancel_token`
/// is cancelled. Sweep failures are logged and retried on the next tick.
pub async fn run_cleaner(
    cleaner: TicketRegistryCleaner,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        target: "cas.registry.cleaner",
        interval_secs = interval.as_secs(),
        "Ticket registry cleaner started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match cleaner.clean().await {
                    Ok(removed) => {
                        if removed > 0 {
                            info!(target: "cas.registry.cleaner", removed, "Removed expired tickets");
                        }
                    }
                    Err(e) => {
                        error!(target: "cas.registry.cleaner", error = %e, "Ticket registry sweep failed");
                    }
                }
            }
            () = cancel_token.cancelled() => {
                info!(target: "cas.registry.cleaner", "Ticket registry cleaner received shutdown signal, exiting");
                break;
            }
        }
    }
}
