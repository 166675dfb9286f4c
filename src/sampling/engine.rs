//! Forward/drop decisions.
//!
//! # Responsibilities
//! - Apply the sampling percentage, keyed per [`SamplingKeyKind`]
//! - Apply the static exclusions (health checks, static assets)
//! - Resolve the destination through the [`RouteTable`]
//!
//! # Design Decisions
//! - Rule order is sample → static filters → routing; the sampling draw is
//!   taken even for requests a later rule drops
//! - Each decision seeds its own `StdRng`, so there is no shared RNG state
//!   and keyed decisions are reproducible

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{SamplingConfig, ValidationError};
use crate::http::CapturedRequest;
use crate::observability::metrics;
use crate::routing::RouteTable;
use crate::sampling::filter;
use crate::sampling::key::{self, SamplingKeyKind};

/// Why a request is not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Lost the sampling draw.
    Sampled,
    /// No OS entropy for a random key.
    EntropyUnavailable,
    HealthCheck,
    StaticAsset,
    /// Host missing from the route table.
    UnknownHost,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Sampled => "sampled",
            DropReason::EntropyUnavailable => "entropy_unavailable",
            DropReason::HealthCheck => "health_check",
            DropReason::StaticAsset => "static_asset",
            DropReason::UnknownHost => "unknown_host",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward to this URL (base URL + raw target).
    Forward { url: String },
    Drop(DropReason),
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Forward { .. } => "forward",
            Decision::Drop(reason) => reason.as_str(),
        }
    }
}

/// Sampling and filter engine. Immutable; share it by `Arc`.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    percentage: f64,
    key: SamplingKeyKind,
    routes: Arc<RouteTable>,
}

impl FilterEngine {
    pub fn new(percentage: f64, key: SamplingKeyKind, routes: Arc<RouteTable>) -> Self {
        Self {
            percentage,
            key,
            routes,
        }
    }

    pub fn from_config(
        config: &SamplingConfig,
        routes: Arc<RouteTable>,
    ) -> Result<Self, ValidationError> {
        if !(0.0..=100.0).contains(&config.percentage) {
            return Err(ValidationError::PercentageOutOfRange(config.percentage));
        }
        let key = SamplingKeyKind::from_config(config)?;
        Ok(Self::new(config.percentage, key, routes))
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    pub fn key_kind(&self) -> &SamplingKeyKind {
        &self.key
    }

    /// Decide whether `request` is forwarded, and where to.
    pub fn decide(&self, request: &CapturedRequest) -> Decision {
        let decision = self.evaluate(request);
        metrics::record_decision(decision.as_str());
        decision
    }

    fn evaluate(&self, request: &CapturedRequest) -> Decision {
        if self.percentage != 100.0 {
            let seed = match key::sampling_key(&self.key, request) {
                Ok(seed) => seed,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read OS entropy for sampling seed");
                    return Decision::Drop(DropReason::EntropyUnavailable);
                }
            };
            let draw = draw(seed);
            if draw > self.percentage || self.percentage <= 0.0 {
                return Decision::Drop(DropReason::Sampled);
            }
        }

        if filter::is_health_check(request) {
            return Decision::Drop(DropReason::HealthCheck);
        }
        if filter::is_static_asset(request.path()) {
            return Decision::Drop(DropReason::StaticAsset);
        }

        let Some(host) = request.host() else {
            tracing::info!(
                client = %request.client_ip(),
                target = %request.target,
                "Request has no host, not forwarding"
            );
            return Decision::Drop(DropReason::UnknownHost);
        };
        match self.routes.resolve(host) {
            Some(base) => Decision::Forward {
                url: format!("{}{}", base, request.target),
            },
            None => {
                tracing::info!(
                    host = %host,
                    client = %request.client_ip(),
                    target = %request.target,
                    "Request host is not in the route table"
                );
                Decision::Drop(DropReason::UnknownHost)
            }
        }
    }
}

/// Uniform draw in [0, 100) from a PRNG seeded with `seed`.
pub fn draw(seed: u64) -> f64 {
    StdRng::seed_from_u64(seed).gen::<f64>() * 100.0
}
