//! Per-category duration estimates refined by an exponentially weighted moving
//! average of observed completion times.
use crate::config::EstimatorConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_ALPHA: f64 = 0.3;
pub const DEFAULT_MINUTES: f64 = 30.0;

/// How the first observation of a category is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedPolicy {
    /// The first observation becomes the estimate.
    #[default]
    Adopt,
    /// The first observation is averaged against the default like any other.
    Blend,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateProfile {
    /// Minutes
    pub estimate: f64,
    pub observations: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurationEstimator {
    alpha: f64,
    default_minutes: f64,
    seed_policy: SeedPolicy,
    profiles: BTreeMap<String, EstimateProfile>,
}

impl Default for DurationEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA, DEFAULT_MINUTES, SeedPolicy::default())
    }
}

impl DurationEstimator {
    /// `alpha` is clamped into (0, 1].
    pub fn new(alpha: f64, default_minutes: f64, seed_policy: SeedPolicy) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 {
            alpha.min(1.0)
        } else {
            DEFAULT_ALPHA
        };
        Self {
            alpha,
            default_minutes,
            seed_policy,
            profiles: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &EstimatorConfig) -> Self {
        Self::new(
            config.alpha,
            config.default_minutes,
            config.first_observation,
        )
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Minutes a task of `category` is expected to take. Unobserved
    /// categories get the default.
    pub fn estimate(&self, category: &str) -> f64 {
        self.profiles
            .get(category)
            .map(|p| p.estimate)
            .unwrap_or(self.default_minutes)
    }

    /// [`Self::estimate`] rounded to whole minutes.
    pub fn estimate_minutes(&self, category: &str) -> u32 {
        let est = self.estimate(category).round();
        if est <= 0.0 { 0 } else { est.min(u32::MAX as f64) as u32 }
    }

    /// Folds one observed duration into the category's profile and returns the
    /// new estimate. Negative or non-finite values are ignored.
    pub fn observe(&mut self, category: &str, actual_minutes: f64) -> f64 {
        if !actual_minutes.is_finite() || actual_minutes < 0.0 {
            log::warn!(
                "Ignoring invalid duration {} for category '{}'",
                actual_minutes,
                category
            );
            return self.estimate(category);
        }

        let alpha = self.alpha;
        let seed = match self.seed_policy {
            SeedPolicy::Adopt => actual_minutes,
            SeedPolicy::Blend => alpha * actual_minutes + (1.0 - alpha) * self.default_minutes,
        };
        let profile = self
            .profiles
            .entry(category.to_string())
            .and_modify(|p| {
                p.estimate = alpha * actual_minutes + (1.0 - alpha) * p.estimate;
                p.observations = p.observations.saturating_add(1);
            })
            .or_insert(EstimateProfile {
                estimate: seed,
                observations: 1,
            });
        log::debug!(
            "Estimate for '{}' now {:.1} min after {} observation(s)",
            category,
            profile.estimate,
            profile.observations
        );
        profile.estimate
    }

    pub fn profile(&self, category: &str) -> Option<&EstimateProfile> {
        self.profiles.get(category)
    }

    pub fn profiles(&self) -> &BTreeMap<String, EstimateProfile> {
        &self.profiles
    }

    /// Replaces the profiles with previously persisted ones.
    pub fn restore(&mut self, profiles: BTreeMap<String, EstimateProfile>) {
        self.profiles = profiles;
    }
}
