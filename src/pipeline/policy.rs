//! Per-institution policy objects and the format registry

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::*;
use crate::dedup::{BalanceFingerprint, OrderIdFingerprint};
use crate::filter::ExclusionRule;
use crate::reconciliation::{CapabilitySelector, FixedMode};
use crate::sequence::{DayBuckets, SecondBuckets};
use crate::traits::*;
use crate::types::*;

/// Everything that varies between institutions
#[derive(Clone)]
pub struct InstitutionPolicy {
    /// Filter predicates applied before anything else
    pub rules: Vec<ExclusionRule>,
    pub fingerprint: Arc<dyn FingerprintStrategy>,
    pub bucketing: Arc<dyn BucketStrategy>,
    pub balance_mode: Arc<dyn BalanceModeSelector>,
    pub source_order: SourceOrder,
}

impl Default for InstitutionPolicy {
    fn default() -> Self {
        Self {
            rules: vec![ExclusionRule::ZeroAmount],
            fingerprint: Arc::new(OrderIdFingerprint),
            bucketing: Arc::new(SecondBuckets),
            balance_mode: Arc::new(CapabilitySelector),
            source_order: SourceOrder::NewestFirst,
        }
    }
}

impl std::fmt::Debug for InstitutionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstitutionPolicy")
            .field("rules", &self.rules)
            .field("fingerprint", &self.fingerprint.name())
            .field("bucketing", &self.bucketing.name())
            .field("source_order", &self.source_order)
            .finish()
    }
}

impl InstitutionPolicy {
    /// Create a policy with default strategies
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the strategy objects described by a config section
    pub fn from_config(config: &InstitutionConfig) -> Self {
        let fingerprint: Arc<dyn FingerprintStrategy> = match config.fingerprint {
            FingerprintKind::OrderId => Arc::new(OrderIdFingerprint),
            FingerprintKind::Balance => Arc::new(BalanceFingerprint),
        };
        let bucketing: Arc<dyn BucketStrategy> = match config.bucketing {
            BucketingKind::Second => Arc::new(SecondBuckets),
            BucketingKind::Day => Arc::new(DayBuckets),
        };
        let balance_mode: Arc<dyn BalanceModeSelector> = match config.balance_mode {
            BalanceModeKind::Auto => Arc::new(CapabilitySelector),
            BalanceModeKind::Forward => Arc::new(FixedMode(BalanceMode::Forward)),
            BalanceModeKind::Backward => Arc::new(FixedMode(BalanceMode::Backward)),
            BalanceModeKind::Embedded => Arc::new(FixedMode(BalanceMode::EmbeddedCheck)),
            BalanceModeKind::Disabled => Arc::new(FixedMode(BalanceMode::Unavailable)),
        };

        Self {
            rules: config.exclusion_rules(),
            fingerprint,
            bucketing,
            balance_mode,
            source_order: config.source_order,
        }
    }

    pub fn rules(mut self, rules: Vec<ExclusionRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn fingerprint<F: FingerprintStrategy + 'static>(mut self, strategy: F) -> Self {
        self.fingerprint = Arc::new(strategy);
        self
    }

    pub fn bucketing<B: BucketStrategy + 'static>(mut self, strategy: B) -> Self {
        self.bucketing = Arc::new(strategy);
        self
    }

    pub fn balance_mode<M: BalanceModeSelector + 'static>(mut self, selector: M) -> Self {
        self.balance_mode = Arc::new(selector);
        self
    }

    pub fn source_order(mut self, order: SourceOrder) -> Self {
        self.source_order = order;
        self
    }
}

/// Lookup table from source format to institution policy
///
/// Handed to the pipeline at construction; there is no global registry.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, InstitutionPolicy>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding one policy per configured institution
    pub fn from_config(config: &PipelineConfig) -> Self {
        let policies = config
            .institutions
            .iter()
            .map(|(format, institution)| {
                (format.clone(), InstitutionPolicy::from_config(institution))
            })
            .collect();
        Self { policies }
    }

    /// Add or replace a policy, builder style
    pub fn with(mut self, format: impl Into<String>, policy: InstitutionPolicy) -> Self {
        self.insert(format, policy);
        self
    }

    pub fn insert(&mut self, format: impl Into<String>, policy: InstitutionPolicy) {
        self.policies.insert(format.into(), policy);
    }

    /// Policy for a source format
    pub fn get(&self, format: &str) -> PipelineResult<&InstitutionPolicy> {
        self.policies
            .get(format)
            .ok_or_else(|| ImportError::UnknownSourceFormat(format.to_string()))
    }

    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }
}
