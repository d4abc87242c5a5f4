use crate::error::{PlusError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = i64;

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// One rung of the Plus Server ladder. Tier 1 is the highest.
///
/// Non-membership is modelled as `Option<Tier>::None` rather than a variant,
/// so a ballot can never be cast "for tier 0".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    One = 1,
    Two = 2,
    Three = 3,
}

impl Tier {
    /// Evaluation order for a cycle.
    pub const ALL: [Tier; 3] = [Tier::One, Tier::Two, Tier::Three];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Where an unprotected candidate lands after failing this tier.
    pub fn demotion_target(self) -> Option<Tier> {
        match self {
            Tier::One => Some(Tier::Two),
            Tier::Two => Some(Tier::Three),
            Tier::Three => None,
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = PlusError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Tier::One),
            2 => Ok(Tier::Two),
            3 => Ok(Tier::Three),
            other => Err(PlusError::InvalidRecord(format!("tier out of range: {other}"))),
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier.as_u8()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Render a membership tier the way the ledger stores it: 0 for non-members.
pub fn membership_tier_number(tier: Option<Tier>) -> u8 {
    tier.map(Tier::as_u8).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Score {
    MinusTwo,
    MinusOne,
    PlusOne,
    PlusTwo,
}

impl Score {
    /// Index into a [`VoteCounts`] histogram: -2, -1, +1, +2.
    pub fn bucket(self) -> usize {
        match self {
            Score::MinusTwo => 0,
            Score::MinusOne => 1,
            Score::PlusOne => 2,
            Score::PlusTwo => 3,
        }
    }

    pub fn value(self) -> i8 {
        match self {
            Score::MinusTwo => -2,
            Score::MinusOne => -1,
            Score::PlusOne => 1,
            Score::PlusTwo => 2,
        }
    }
}

impl TryFrom<i8> for Score {
    type Error = PlusError;

    fn try_from(value: i8) -> Result<Self> {
        match value {
            -2 => Ok(Score::MinusTwo),
            -1 => Ok(Score::MinusOne),
            1 => Ok(Score::PlusOne),
            2 => Ok(Score::PlusTwo),
            other => Err(PlusError::InvalidRecord(format!("score out of range: {other}"))),
        }
    }
}

impl From<Score> for i8 {
    fn from(score: Score) -> i8 {
        score.value()
    }
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "NA")]
    Na,
    #[serde(rename = "EU")]
    Eu,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Na => "NA",
            Region::Eu => "EU",
        }
    }

    pub fn other(self) -> Region {
        match self {
            Region::Na => Region::Eu,
            Region::Eu => Region::Na,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Region {
    type Err = PlusError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NA" => Ok(Region::Na),
            "EU" => Ok(Region::Eu),
            _ => Err(PlusError::InvalidRecord(format!("unknown region '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// VoteCounts
// ---------------------------------------------------------------------------

/// Ballot histogram indexed by [`Score::bucket`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteCounts(pub [u32; 4]);

impl VoteCounts {
    pub fn record(&mut self, score: Score) {
        self.0[score.bucket()] += 1;
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter_id: UserId,
    pub voted_id: UserId,
    pub tier: Tier,
    pub score: Score,
    #[serde(default)]
    pub is_stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipStatus {
    pub user_id: UserId,
    pub membership_tier: Option<Tier>,
    pub region: Region,
    /// Set together with `vouch_tier`.
    pub voucher_id: Option<UserId>,
    pub vouch_tier: Option<Tier>,
    pub can_vouch_for: Option<Tier>,
    pub can_vouch_again_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub name_for_voting: String,
}

impl MembershipStatus {
    pub fn new(user_id: UserId, membership_tier: Option<Tier>, region: Region) -> Self {
        Self {
            user_id,
            membership_tier,
            region,
            voucher_id: None,
            vouch_tier: None,
            can_vouch_for: None,
            can_vouch_again_after: None,
            name_for_voting: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggested_id: UserId,
    pub suggester_id: UserId,
    pub tier: Tier,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_resuggestion: bool,
}

/// Append-only history row: one per (tier, candidate) that received ballots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSummary {
    pub user_id: UserId,
    pub month: u32,
    pub year: i32,
    pub tier: Tier,
    pub was_suggested: bool,
    pub was_vouched: bool,
    pub counts_eu: VoteCounts,
    pub counts_na: VoteCounts,
}

impl VotingSummary {
    pub fn counts(&self, region: Region) -> &VoteCounts {
        match region {
            Region::Na => &self.counts_na,
            Region::Eu => &self.counts_eu,
        }
    }

    pub fn counts_mut(&mut self, region: Region) -> &mut VoteCounts {
        match region {
            Region::Na => &mut self.counts_na,
            Region::Eu => &mut self.counts_eu,
        }
    }
}

/// Everything one cycle reads from storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub ballots: Vec<Ballot>,
    pub statuses: Vec<MembershipStatus>,
    pub suggestions: Vec<Suggestion>,
}

// ---------------------------------------------------------------------------
// CycleDate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleDate {
    /// 1-based calendar month.
    pub month: u32,
    pub year: i32,
}

impl CycleDate {
    pub fn from_now(now: DateTime<Utc>) -> Self {
        Self {
            month: now.month(),
            year: now.year(),
        }
    }

    /// Midnight UTC on day 1 of `month + months`, rolling into later years.
    pub fn cooldown_end(self, months: u32) -> Result<DateTime<Utc>> {
        let out_of_range = || {
            PlusError::InvalidConfig(format!(
                "cooldown of {months} months from {}/{} is out of range",
                self.month, self.year
            ))
        };
        let zero_based = self
            .month
            .saturating_sub(1)
            .checked_add(months)
            .ok_or_else(out_of_range)?;
        let year = i32::try_from(zero_based / 12)
            .ok()
            .and_then(|years| self.year.checked_add(years))
            .ok_or_else(out_of_range)?;
        let month = zero_based % 12 + 1;
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| {
                PlusError::InvalidConfig(format!("cooldown end {year}-{month} is out of range"))
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
