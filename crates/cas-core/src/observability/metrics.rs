//! Metrics definitions for the CAS core.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cas_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `ticket_type`: 5 values (TGT, ST, PGT, PGTIOU, PT)
//! - `status`: 2 values (success, error) unless noted
//! - `operation`: bounded by code
//! - `handler`: bounded by deployment configuration
//! - `transition`: 6 values (see `MultifactorDecision`)
//! - `category`: 5 values (see `ErrorCategory`)
//!
//! Ticket ids and principal ids never appear as labels.

use metrics::{counter, histogram};
use std::time::Duration;

// ============================================================================
// Ticket Metrics
// ============================================================================

/// Metric: `cas_tickets_created_total`
/// Labels: `ticket_type`
pub fn record_ticket_created(ticket_type: &str) {
    counter!("cas_tickets_created_total", "ticket_type" => ticket_type.to_string()).increment(1);
}

/// Record a service or proxy ticket validation outcome.
///
/// Metric: `cas_ticket_validations_total`
/// Labels: `status`
pub fn record_ticket_validation(status: &str) {
    counter!("cas_ticket_validations_total", "status" => status.to_string()).increment(1);
}

/// Metric: `cas_tickets_removed_total`
/// Labels: `reason` (destroyed, expired_on_read, consumed, sweep)
pub fn record_tickets_removed(reason: &str, count: u64) {
    if count == 0 {
        return;
    }
    counter!("cas_tickets_removed_total", "reason" => reason.to_string()).increment(count);
    if reason == "sweep" {
        counter!("cas_registry_sweep_removed_total").increment(count);
    }
}

// ============================================================================
// Registry Metrics
// ============================================================================

/// Record a backend call made by the registry.
///
/// Metric: `cas_registry_operation_duration_seconds`, `cas_registry_operations_total`
/// Labels: `operation`, `status`
pub fn record_registry_operation(operation: &str, status: &str, duration: Duration) {
    histogram!("cas_registry_operation_duration_seconds", "operation" => operation.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("cas_registry_operations_total", "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Metric: `cas_registry_sweep_duration_seconds`
pub fn record_registry_sweep(duration: Duration) {
    histogram!("cas_registry_sweep_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record the outcome of a whole authentication transaction.
///
/// Metric: `cas_authentication_total`, `cas_authentication_duration_seconds`
/// Labels: `status` (success, failure, prevented)
pub fn record_authentication(status: &str, duration: Duration) {
    histogram!("cas_authentication_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("cas_authentication_total", "status" => status.to_string()).increment(1);
}

/// Record a single handler invocation.
///
/// Metric: `cas_authentication_handler_duration_seconds`
/// Labels: `handler`, `status` (success, or the failure code)
pub fn record_handler_duration(handler: &str, status: &str, duration: Duration) {
    histogram!("cas_authentication_handler_duration_seconds", "handler" => handler.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Multifactor Metrics
// ============================================================================

/// Metric: `cas_mfa_decisions_total`
/// Labels: `transition`
pub fn record_mfa_decision(transition: &str) {
    counter!("cas_mfa_decisions_total", "transition" => transition.to_string()).increment(1);
}

// ============================================================================
// Error Metrics
// ============================================================================

/// Metric: `cas_errors_total`
/// Labels: `operation`, `category`
pub fn record_error(operation: &str, category: &str) {
    counter!("cas_errors_total", "operation" => operation.to_string(), "category" => category.to_string())
        .increment(1);
}
