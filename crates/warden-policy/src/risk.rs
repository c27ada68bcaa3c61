//! Contextual risk scoring.
//!
//! The [`RiskEngine`] runs an ordered list of [`RiskFactorEvaluator`]
//! strategies, sums their contributions and clamps the total to `0..=100`.
//! A factor that lacks the data it needs reports [`RiskContribution::Unknown`]
//! and is charged the configured unknown contribution instead of failing the
//! whole computation.

use std::sync::Arc;

use ipnetwork::IpNetwork;
use serde::Serialize;
use time::UtcOffset;

use crate::config::{ConfigError, RiskConfig};
use crate::context::EvaluationContext;

/// Upper bound of every risk score.
pub const MAX_RISK_SCORE: u32 = 100;

/// Result of a single risk factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskContribution {
    /// Points added to the score.
    Score(u32),
    /// The factor could not be assessed from the context.
    Unknown,
}

/// A single, side-effect-free risk strategy.
///
/// Evaluators run synchronously during condition evaluation and must not
/// block.
pub trait RiskFactorEvaluator: Send + Sync {
    /// Factor name for logs and breakdowns.
    fn name(&self) -> &str;

    /// Assess the context.
    fn evaluate(&self, ctx: &EvaluationContext) -> RiskContribution;
}

// =============================================================================
// Risk Engine
// =============================================================================

/// Per-factor line of a [`RiskAssessment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorScore {
    /// Factor name.
    pub name: String,
    /// Points charged for this factor.
    pub contribution: u32,
    /// Whether the factor lacked data and was charged the unknown contribution.
    pub unknown: bool,
}

/// Score with its per-factor breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    /// Clamped total.
    pub score: u32,
    /// Contributions in evaluation order.
    pub factors: Vec<FactorScore>,
}

/// Composes risk factors into a bounded score.
#[derive(Clone)]
pub struct RiskEngine {
    factors: Vec<Arc<dyn RiskFactorEvaluator>>,
    unknown_contribution: u32,
}

impl RiskEngine {
    /// Create an engine with no factors.
    #[must_use]
    pub fn new(unknown_contribution: u32) -> Self {
        Self {
            factors: Vec::new(),
            unknown_contribution,
        }
    }

    /// Create an engine with the built-in factors configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a trusted network is not valid
    /// CIDR notation.
    pub fn from_config(config: &RiskConfig) -> Result<Self, ConfigError> {
        let network = NetworkOriginRiskFactor::from_cidrs(
            &config.trusted_networks,
            config.untrusted_network_contribution,
        )?;

        Ok(Self::new(config.unknown_contribution)
            .with_factor(Arc::new(network))
            .with_factor(Arc::new(TimeOfDayRiskFactor::new(
                config.business_hours_start,
                config.business_hours_end,
                config.off_hours_contribution,
            )))
            .with_factor(Arc::new(RoleSensitivityRiskFactor::new(
                config.sensitive_roles.clone(),
                config.sensitive_role_contribution,
            ))))
    }

    /// Append a factor.
    #[must_use]
    pub fn with_factor(mut self, factor: Arc<dyn RiskFactorEvaluator>) -> Self {
        self.factors.push(factor);
        self
    }

    /// Number of registered factors.
    #[must_use]
    pub fn factor_count(&self) -> usize {
        self.factors.len()
    }

    /// Score the context and report each factor's share.
    #[must_use]
    pub fn assess(&self, ctx: &EvaluationContext) -> RiskAssessment {
        let factors: Vec<FactorScore> = self
            .factors
            .iter()
            .map(|factor| {
                let (contribution, unknown) = match factor.evaluate(ctx) {
                    RiskContribution::Score(points) => (points, false),
                    RiskContribution::Unknown => (self.unknown_contribution, true),
                };
                FactorScore {
                    name: factor.name().to_string(),
                    contribution,
                    unknown,
                }
            })
            .collect();

        let total = factors
            .iter()
            .fold(0u32, |acc, f| acc.saturating_add(f.contribution));

        RiskAssessment {
            score: total.min(MAX_RISK_SCORE),
            factors,
        }
    }

    /// Compute the risk score of the context, in `0..=100`.
    #[must_use]
    pub fn calculate_risk_score(&self, ctx: &EvaluationContext) -> u32 {
        let assessment = self.assess(ctx);
        tracing::debug!(
            subject = %ctx.subject.name,
            resource = %ctx.resource.identifier,
            score = assessment.score,
            "Calculated risk score"
        );
        assessment.score
    }

    /// Risk score memoized on the context.
    pub fn risk_score(&self, ctx: &mut EvaluationContext) -> u32 {
        if let Some(score) = ctx.cached_risk_score() {
            return score;
        }
        let score = self.calculate_risk_score(ctx);
        ctx.remember_risk_score(score);
        score
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(RiskConfig::default().unknown_contribution)
    }
}

// =============================================================================
// Built-in Factors
// =============================================================================

/// Charges requests whose remote address is outside every trusted network.
///
/// Reports `Unknown` when the context has no remote address (in-process
/// invocations).
#[derive(Debug, Clone)]
pub struct NetworkOriginRiskFactor {
    trusted: Vec<IpNetwork>,
    contribution: u32,
}

impl NetworkOriginRiskFactor {
    /// Create the factor from parsed networks.
    #[must_use]
    pub fn new(trusted: Vec<IpNetwork>, contribution: u32) -> Self {
        Self {
            trusted,
            contribution,
        }
    }

    /// Create the factor from CIDR strings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` on malformed CIDR notation.
    pub fn from_cidrs(cidrs: &[String], contribution: u32) -> Result<Self, ConfigError> {
        let trusted = cidrs
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNetwork>().map_err(|e| {
                    ConfigError::InvalidValue(format!("trusted network '{}': {}", cidr, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(trusted, contribution))
    }
}

impl RiskFactorEvaluator for NetworkOriginRiskFactor {
    fn name(&self) -> &str {
        "network-origin"
    }

    fn evaluate(&self, ctx: &EvaluationContext) -> RiskContribution {
        match ctx.environment.remote_address {
            None => RiskContribution::Unknown,
            Some(ip) if self.trusted.iter().any(|net| net.contains(ip)) => {
                RiskContribution::Score(0)
            }
            Some(_) => RiskContribution::Score(self.contribution),
        }
    }
}

/// Charges decisions made outside business hours (UTC).
#[derive(Debug, Clone, Copy)]
pub struct TimeOfDayRiskFactor {
    start_hour: u8,
    end_hour: u8,
    contribution: u32,
}

impl TimeOfDayRiskFactor {
    /// Business hours are `start_hour..end_hour`.
    #[must_use]
    pub fn new(start_hour: u8, end_hour: u8, contribution: u32) -> Self {
        Self {
            start_hour,
            end_hour,
            contribution,
        }
    }
}

impl RiskFactorEvaluator for TimeOfDayRiskFactor {
    fn name(&self) -> &str {
        "time-of-day"
    }

    fn evaluate(&self, ctx: &EvaluationContext) -> RiskContribution {
        let hour = ctx.environment.timestamp.to_offset(UtcOffset::UTC).hour();
        if (self.start_hour..self.end_hour).contains(&hour) {
            RiskContribution::Score(0)
        } else {
            RiskContribution::Score(self.contribution)
        }
    }
}

/// Charges subjects holding a sensitive authority.
#[derive(Debug, Clone)]
pub struct RoleSensitivityRiskFactor {
    sensitive: Vec<String>,
    contribution: u32,
}

impl RoleSensitivityRiskFactor {
    /// Create the factor.
    #[must_use]
    pub fn new(sensitive: Vec<String>, contribution: u32) -> Self {
        Self {
            sensitive,
            contribution,
        }
    }
}

impl RiskFactorEvaluator for RoleSensitivityRiskFactor {
    fn name(&self) -> &str {
        "role-sensitivity"
    }

    fn evaluate(&self, ctx: &EvaluationContext) -> RiskContribution {
        if ctx
            .authorities
            .contains_any(self.sensitive.iter().map(String::as_str))
        {
            RiskContribution::Score(self.contribution)
        } else {
            RiskContribution::Score(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{AuthoritySet, Subject};
    use crate::context::ResourceDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    struct FixedFactor(u32);

    impl RiskFactorEvaluator for FixedFactor {
        fn name(&self) -> &str {
            "fixed"
        }

        fn evaluate(&self, _ctx: &EvaluationContext) -> RiskContribution {
            RiskContribution::Score(self.0)
        }
    }

    struct CountingFactor(AtomicUsize);

    impl RiskFactorEvaluator for CountingFactor {
        fn name(&self) -> &str {
            "counting"
        }

        fn evaluate(&self, _ctx: &EvaluationContext) -> RiskContribution {
            self.0.fetch_add(1, Ordering::SeqCst);
            RiskContribution::Score(10)
        }
    }

    fn create_context(authorities: &[&str]) -> EvaluationContext {
        EvaluationContext::new(
            Subject::new("alice"),
            authorities.iter().copied().collect::<AuthoritySet>(),
            ResourceDescriptor::new("URL", "/"),
            "GET",
        )
        .with_timestamp(datetime!(2024-03-04 10:00 UTC))
    }

    #[test]
    fn test_sum_is_clamped() {
        let engine = RiskEngine::new(20)
            .with_factor(Arc::new(FixedFactor(30)))
            .with_factor(Arc::new(FixedFactor(85)));
        assert_eq!(engine.calculate_risk_score(&create_context(&[])), 100);
    }

    #[test]
    fn test_no_factors_scores_zero() {
        assert_eq!(RiskEngine::new(20).calculate_risk_score(&create_context(&[])), 0);
    }

    #[test]
    fn test_missing_remote_address_is_unknown() {
        let engine = RiskEngine::from_config(&RiskConfig::default()).unwrap();
        let assessment = engine.assess(&create_context(&[]));

        let network = &assessment.factors[0];
        assert_eq!(network.name, "network-origin");
        assert!(network.unknown);
        assert_eq!(network.contribution, 20);
        assert_eq!(assessment.score, 20);
    }

    #[test]
    fn test_network_origin() {
        let factor =
            NetworkOriginRiskFactor::from_cidrs(&["10.0.0.0/8".to_string()], 40).unwrap();

        let mut ctx = create_context(&[]);
        ctx.environment.remote_address = Some("10.2.3.4".parse().unwrap());
        assert_eq!(factor.evaluate(&ctx), RiskContribution::Score(0));

        ctx.environment.remote_address = Some("203.0.113.9".parse().unwrap());
        assert_eq!(factor.evaluate(&ctx), RiskContribution::Score(40));
    }

    #[test]
    fn test_invalid_cidr() {
        assert!(NetworkOriginRiskFactor::from_cidrs(&["10.0.0.0/99".to_string()], 40).is_err());
    }

    #[test]
    fn test_time_of_day() {
        let factor = TimeOfDayRiskFactor::new(8, 18, 25);
        let ctx = create_context(&[]);
        assert_eq!(factor.evaluate(&ctx), RiskContribution::Score(0));

        let night = create_context(&[]).with_timestamp(datetime!(2024-03-04 23:30 UTC));
        assert_eq!(factor.evaluate(&night), RiskContribution::Score(25));

        let shifted = create_context(&[]).with_timestamp(datetime!(2024-03-04 19:00 +02:00));
        assert_eq!(factor.evaluate(&shifted), RiskContribution::Score(0));
    }

    #[test]
    fn test_role_sensitivity() {
        let factor = RoleSensitivityRiskFactor::new(vec!["ROLE_ADMIN".to_string()], 15);
        assert_eq!(
            factor.evaluate(&create_context(&["ROLE_ADMIN"])),
            RiskContribution::Score(15)
        );
        assert_eq!(
            factor.evaluate(&create_context(&["ROLE_USER"])),
            RiskContribution::Score(0)
        );
    }

    #[test]
    fn test_score_memoized_per_context() {
        let counter = Arc::new(CountingFactor(AtomicUsize::new(0)));
        let engine = RiskEngine::new(20).with_factor(counter.clone());

        let mut ctx = create_context(&[]);
        assert_eq!(engine.risk_score(&mut ctx), 10);
        assert_eq!(engine.risk_score(&mut ctx), 10);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        let mut other = create_context(&[]);
        engine.risk_score(&mut other);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
