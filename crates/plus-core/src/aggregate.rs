//! Ballot aggregation: active ballots → one [`VotingSummary`] per
//! (tier, candidate), split by the voter's region.

use crate::error::Result;
use crate::index::StatusIndex;
use crate::types::{Ballot, CycleDate, Suggestion, Tier, UserId, VoteCounts, VotingSummary};
use std::collections::{BTreeMap, HashSet};

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

/// Summaries keyed by (tier, candidate). The key order makes iteration
/// tier-major and ascending by user id, whatever order the ballots came in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    summaries: BTreeMap<(Tier, UserId), VotingSummary>,
}

impl Tally {
    pub fn get(&self, tier: Tier, user_id: UserId) -> Option<&VotingSummary> {
        self.summaries.get(&(tier, user_id))
    }

    pub fn for_tier(&self, tier: Tier) -> impl Iterator<Item = &VotingSummary> {
        self.summaries
            .range((tier, UserId::MIN)..=(tier, UserId::MAX))
            .map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VotingSummary> {
        self.summaries.values()
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn into_summaries(self) -> Vec<VotingSummary> {
        self.summaries.into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Tally every non-stale ballot.
///
/// Fails if a voter or candidate has no membership status: the voter's region
/// decides which histogram a ballot lands in, and the candidate's status
/// carries the vouch flag and region needed downstream.
pub fn aggregate(
    ballots: &[Ballot],
    statuses: &StatusIndex<'_>,
    suggestions: &[Suggestion],
    cycle: CycleDate,
) -> Result<Tally> {
    let suggested: HashSet<(Tier, UserId)> = suggestions
        .iter()
        .map(|s| (s.tier, s.suggested_id))
        .collect();

    let mut summaries: BTreeMap<(Tier, UserId), VotingSummary> = BTreeMap::new();

    for ballot in ballots.iter().filter(|b| !b.is_stale) {
        let region = statuses.voter(ballot.voter_id)?.region;
        let key = (ballot.tier, ballot.voted_id);

        if !summaries.contains_key(&key) {
            let candidate = statuses.candidate(ballot.voted_id)?;
            summaries.insert(
                key,
                VotingSummary {
                    user_id: ballot.voted_id,
                    month: cycle.month,
                    year: cycle.year,
                    tier: ballot.tier,
                    was_suggested: suggested.contains(&key),
                    was_vouched: candidate.vouch_tier == Some(ballot.tier),
                    counts_eu: VoteCounts::default(),
                    counts_na: VoteCounts::default(),
                },
            );
        }

        if let Some(summary) = summaries.get_mut(&key) {
            summary.counts_mut(region).record(ballot.score);
        }
    }

    tracing::debug!(summaries = summaries.len(), "ballots aggregated");
    Ok(Tally { summaries })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
