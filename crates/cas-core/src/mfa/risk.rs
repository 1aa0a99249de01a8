//! Risk-based step-up: score the current request against the principal's
//! authentication history.
//!
//! Each [`RiskCalculator`] scores `1 - matches / total` over the history, so
//! a request that looks like every past one scores 0.0 and a request from a
//! principal with no history scores 1.0. The trigger fires when the mean
//! score exceeds its threshold.

use super::triggers::MultifactorTrigger;
use super::{MultifactorError, RequestContext};
use crate::authentication::Authentication;
use crate::clock::Clock;
use crate::services::RegisteredService;
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &GeoLocation) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// One past successful authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationEvent {
    pub principal: String,
    pub remote_address: Option<String>,
    pub user_agent: Option<String>,
    pub geo_location: Option<GeoLocation>,
    pub timestamp: DateTime<Utc>,
}

impl AuthenticationEvent {
    pub fn from_request(
        principal: impl Into<String>,
        context: &RequestContext,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            principal: principal.into(),
            remote_address: context.remote_address.clone(),
            user_agent: context.user_agent.clone(),
            geo_location: context.geo_location,
            timestamp,
        }
    }
}

#[async_trait]
pub trait AuthenticationEventRepository: Send + Sync {
    async fn record(&self, event: AuthenticationEvent);

    async fn events_for(&self, principal: &str) -> Vec<AuthenticationEvent>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuthenticationEventRepository {
    events: RwLock<HashMap<String, Vec<AuthenticationEvent>>>,
}

impl InMemoryAuthenticationEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthenticationEventRepository for InMemoryAuthenticationEventRepository {
    async fn record(&self, event: AuthenticationEvent) {
        self.events
            .write()
            .await
            .entry(event.principal.clone())
            .or_default()
            .push(event);
    }

    async fn events_for(&self, principal: &str) -> Vec<AuthenticationEvent> {
        self.events
            .read()
            .await
            .get(principal)
            .cloned()
            .unwrap_or_default()
    }
}

pub trait RiskCalculator: Send + Sync {
    fn name(&self) -> &str;

    /// Score in `[0.0, 1.0]`; higher is riskier.
    fn calculate(
        &self,
        context: &RequestContext,
        now: DateTime<Utc>,
        history: &[AuthenticationEvent],
    ) -> f64;
}

fn mismatch_ratio(history: &[AuthenticationEvent], matches: impl Fn(&AuthenticationEvent) -> bool) -> f64 {
    if history.is_empty() {
        return 1.0;
    }
    let matched = history.iter().filter(|e| matches(e)).count();
    1.0 - (matched as f64 / history.len() as f64)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IpAddressRiskCalculator;

impl RiskCalculator for IpAddressRiskCalculator {
    fn name(&self) -> &str {
        "ip-address"
    }

    fn calculate(
        &self,
        context: &RequestContext,
        _now: DateTime<Utc>,
        history: &[AuthenticationEvent],
    ) -> f64 {
        let current = context.remote_address.as_deref();
        mismatch_ratio(history, |e| {
            current.is_some() && e.remote_address.as_deref() == current
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UserAgentRiskCalculator;

impl RiskCalculator for UserAgentRiskCalculator {
    fn name(&self) -> &str {
        "user-agent"
    }

    fn calculate(
        &self,
        context: &RequestContext,
        _now: DateTime<Utc>,
        history: &[AuthenticationEvent],
    ) -> f64 {
        let current = context.user_agent.as_deref();
        mismatch_ratio(history, |e| current.is_some() && e.user_agent.as_deref() == current)
    }
}

/// Past events within `radius_km` of the current location count as matches.
#[derive(Debug, Clone, Copy)]
pub struct GeoLocationRiskCalculator {
    pub radius_km: f64,
}

impl GeoLocationRiskCalculator {
    pub fn new(radius_km: f64) -> Self {
        Self { radius_km }
    }
}

impl RiskCalculator for GeoLocationRiskCalculator {
    fn name(&self) -> &str {
        "geo-location"
    }

    fn calculate(
        &self,
        context: &RequestContext,
        _now: DateTime<Utc>,
        history: &[AuthenticationEvent],
    ) -> f64 {
        let Some(current) = context.geo_location else {
            return 1.0;
        };
        mismatch_ratio(history, |e| {
            e.geo_location
                .is_some_and(|past| past.distance_km(&current) <= self.radius_km)
        })
    }
}

/// Past events whose hour of day (UTC) lies within `window_hours` of the
/// current hour count as matches. The window wraps around midnight.
#[derive(Debug, Clone, Copy)]
pub struct TimeOfDayRiskCalculator {
    pub window_hours: u32,
}

impl TimeOfDayRiskCalculator {
    pub fn new(window_hours: u32) -> Self {
        Self { window_hours }
    }
}

impl Default for TimeOfDayRiskCalculator {
    fn default() -> Self {
        Self::new(2)
    }
}

fn hour_distance(a: u32, b: u32) -> u32 {
    let diff = a.abs_diff(b) % 24;
    diff.min(24 - diff)
}

impl RiskCalculator for TimeOfDayRiskCalculator {
    fn name(&self) -> &str {
        "time-of-day"
    }

    fn calculate(
        &self,
        _context: &RequestContext,
        now: DateTime<Utc>,
        history: &[AuthenticationEvent],
    ) -> f64 {
        let hour = now.hour();
        mismatch_ratio(history, |e| {
            hour_distance(e.timestamp.hour(), hour) <= self.window_hours
        })
    }
}

/// Fires `provider` when the mean risk score exceeds `threshold`.
pub struct RiskBasedTrigger {
    repository: Arc<dyn AuthenticationEventRepository>,
    calculators: Vec<Box<dyn RiskCalculator>>,
    threshold: f64,
    provider: String,
    clock: Arc<dyn Clock>,
    order: i32,
}

impl RiskBasedTrigger {
    pub fn new(
        repository: Arc<dyn AuthenticationEventRepository>,
        threshold: f64,
        provider: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            calculators: Vec::new(),
            threshold,
            provider: provider.into(),
            clock,
            order: 50,
        }
    }

    pub fn with_calculator(mut self, calculator: impl RiskCalculator + 'static) -> Self {
        self.calculators.push(Box::new(calculator));
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Mean score across calculators; 0.0 when none are configured.
    pub async fn score(&self, principal: &str, context: &RequestContext) -> f64 {
        if self.calculators.is_empty() {
            return 0.0;
        }
        let history = self.repository.events_for(principal).await;
        let now = self.clock.now();
        let total: f64 = self
            .calculators
            .iter()
            .map(|c| c.calculate(context, now, &history))
            .sum();
        total / self.calculators.len() as f64
    }
}

#[async_trait]
impl MultifactorTrigger for RiskBasedTrigger {
    fn name(&self) -> &str {
        "risk-based"
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn is_activated(
        &self,
        authentication: &Authentication,
        _service: Option<&RegisteredService>,
        context: &RequestContext,
    ) -> Result<Option<String>, MultifactorError> {
        let score = self.score(&authentication.principal.id, context).await;
        debug!(
            target: "cas.mfa.risk",
            score,
            threshold = self.threshold,
            "Computed authentication risk"
        );
        Ok((score > self.threshold).then(|| self.provider.clone()))
    }
}
