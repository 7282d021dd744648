//! Pipeline configuration
//!
//! ```toml
//! balance_tolerance = "0.01"
//!
//! [institutions.cmb_credit]
//! fingerprint = "order_id"
//! balance_mode = "backward"
//! excluded_statuses = ["declined"]
//!
//! [institutions.alipay]
//! bucketing = "second"
//! source_order = "newest_first"
//! allowed_currencies = ["CNY"]
//! ```

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::filter::ExclusionRule;
use crate::types::*;

/// Fingerprint strategy names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintKind {
    #[default]
    OrderId,
    Balance,
}

/// Sequence bucket granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketingKind {
    #[default]
    Second,
    Day,
}

/// Balance mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceModeKind {
    #[default]
    Auto,
    Forward,
    Backward,
    Embedded,
    #[serde(rename = "none")]
    Disabled,
}

/// Order in which a source lists its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Per-institution settings, keyed by source format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstitutionConfig {
    pub fingerprint: FingerprintKind,
    pub bucketing: BucketingKind,
    pub balance_mode: BalanceModeKind,
    pub source_order: SourceOrder,
    pub excluded_statuses: Vec<String>,
    pub allowed_currencies: Vec<String>,
    pub drop_zero_amounts: bool,
}

impl Default for InstitutionConfig {
    fn default() -> Self {
        Self {
            fingerprint: FingerprintKind::default(),
            bucketing: BucketingKind::default(),
            balance_mode: BalanceModeKind::default(),
            source_order: SourceOrder::default(),
            excluded_statuses: Vec::new(),
            allowed_currencies: Vec::new(),
            drop_zero_amounts: true,
        }
    }
}

impl InstitutionConfig {
    /// Exclusion rules implied by the settings
    pub fn exclusion_rules(&self) -> Vec<ExclusionRule> {
        let mut rules = Vec::new();
        if !self.excluded_statuses.is_empty() {
            rules.push(ExclusionRule::StatusBlacklist(self.excluded_statuses.clone()));
        }
        if self.drop_zero_amounts {
            rules.push(ExclusionRule::ZeroAmount);
        }
        if !self.allowed_currencies.is_empty() {
            rules.push(ExclusionRule::CurrencyAllowList(self.allowed_currencies.clone()));
        }
        rules
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Allowed drift when checking embedded balances
    pub balance_tolerance: BigDecimal,
    /// Cross-check re-imported date windows
    pub validate_overlaps: bool,
    pub institutions: HashMap<String, InstitutionConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            balance_tolerance: BigDecimal::new(5.into(), 3),
            validate_overlaps: true,
            institutions: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> PipelineResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ImportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honor
    pub fn validate(&self) -> PipelineResult<()> {
        if self.balance_tolerance < BigDecimal::from(0) {
            return Err(ImportError::Config(
                "balance_tolerance cannot be negative".to_string(),
            ));
        }
        for format in self.institutions.keys() {
            if format.trim().is_empty() {
                return Err(ImportError::Config(
                    "institution format key cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
