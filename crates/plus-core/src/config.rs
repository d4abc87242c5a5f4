use crate::error::{PlusError, Result};
use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ResolutionConfig
// ---------------------------------------------------------------------------

/// Tunables for one voting cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Support percentage at or above which a candidate passes.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    /// Support percentage at or above which a passing candidate may vouch.
    #[serde(default = "default_vouch_criteria")]
    pub vouch_criteria: BTreeMap<Tier, f64>,
    /// Share of the blended score taken from the candidate's opposite region.
    #[serde(default = "default_other_region_weight")]
    pub other_region_weight: f64,
    /// Months added to the cycle month to get a penalized voucher's
    /// `can_vouch_again_after`.
    #[serde(default = "default_vouch_cooldown_months")]
    pub vouch_cooldown_months: u32,
}

fn default_pass_threshold() -> f64 {
    50.0
}

fn default_vouch_criteria() -> BTreeMap<Tier, f64> {
    BTreeMap::from([(Tier::One, 90.0), (Tier::Two, 85.0), (Tier::Three, 80.0)])
}

fn default_other_region_weight() -> f64 {
    0.5
}

fn default_vouch_cooldown_months() -> u32 {
    5
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            pass_threshold: default_pass_threshold(),
            vouch_criteria: default_vouch_criteria(),
            other_region_weight: default_other_region_weight(),
            vouch_cooldown_months: default_vouch_cooldown_months(),
        }
    }
}

impl ResolutionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: ResolutionConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Load `path` if given, otherwise fall back to the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn vouch_criterion(&self, tier: Tier) -> Result<f64> {
        self.vouch_criteria
            .get(&tier)
            .copied()
            .ok_or(PlusError::MissingVouchCriteria(tier))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !(0.0..=100.0).contains(&self.pass_threshold) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "pass_threshold {} must be between 0 and 100",
                    self.pass_threshold
                ),
            });
        }

        if !(0.0..=1.0).contains(&self.other_region_weight) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "other_region_weight {} must be between 0 and 1",
                    self.other_region_weight
                ),
            });
        }

        if self.vouch_cooldown_months == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "vouch_cooldown_months must be at least 1".to_string(),
            });
        }

        for tier in Tier::ALL {
            match self.vouch_criteria.get(&tier) {
                None => warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "no vouch criteria for tier {tier}; a cycle with ballots at that tier will fail"
                    ),
                }),
                Some(&criterion) if criterion < self.pass_threshold => {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "vouch criteria {criterion} for tier {tier} is below pass_threshold {}",
                            self.pass_threshold
                        ),
                    })
                }
                Some(_) => {}
            }
        }

        warnings
    }

    /// Fail on any error-level finding from [`validate`](Self::validate).
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PlusError::InvalidConfig(errors.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
