//! The bundled write set of one cycle and the committer that hands it to a
//! [`StorageGateway`] as a single transaction.
//!
//! A gateway applies [`CycleEffects`] in this order, all or nothing:
//!
//! 1. delete ballots that were already stale
//! 2. mark every remaining ballot stale
//! 3. delete every suggestion
//! 4. insert `summaries`
//! 5. clear `voucher_id` / `vouch_tier` for everyone
//! 6. clear `can_vouch_again_after` for `expired_cooldowns`
//! 7. write `membership` tiers
//! 8. clear `can_vouch_for` for everyone, then write `vouch_grants`
//! 9. write `can_vouch_again_after` for `revoked_vouchers`

use crate::error::{ErrorKind, PlusError, Result};
use crate::gateway::StorageGateway;
use crate::types::{membership_tier_number, Tier, UserId, VotingSummary};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct CycleEffects {
    pub now: DateTime<Utc>,
    pub summaries: Vec<VotingSummary>,
    pub expired_cooldowns: BTreeSet<UserId>,
    /// Target membership tier → users. `None` is non-membership.
    pub membership: BTreeMap<Option<Tier>, BTreeSet<UserId>>,
    pub vouch_grants: BTreeMap<Tier, BTreeSet<UserId>>,
    pub revoked_vouchers: BTreeSet<UserId>,
    pub can_vouch_again_after: DateTime<Utc>,
}

impl CycleEffects {
    /// Reject a user listed under two membership tiers or two vouch grants,
    /// and a penalty date that is not in the future.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<UserId, u8> = HashMap::new();
        for (tier, users) in &self.membership {
            let number = membership_tier_number(*tier);
            for &user_id in users {
                if let Some(first) = seen.insert(user_id, number) {
                    return Err(PlusError::ConflictingAssignment {
                        user_id,
                        what: "membership tiers",
                        first,
                        second: number,
                    });
                }
            }
        }

        seen.clear();
        for (tier, users) in &self.vouch_grants {
            for &user_id in users {
                if let Some(first) = seen.insert(user_id, tier.as_u8()) {
                    return Err(PlusError::ConflictingAssignment {
                        user_id,
                        what: "vouch grants",
                        first,
                        second: tier.as_u8(),
                    });
                }
            }
        }

        if !self.revoked_vouchers.is_empty() && self.can_vouch_again_after <= self.now {
            return Err(PlusError::InvalidConfig(format!(
                "vouch cooldown {} is not after cycle time {}",
                self.can_vouch_again_after, self.now
            )));
        }
        Ok(())
    }

    pub fn membership_writes(&self) -> usize {
        self.membership.values().map(BTreeSet::len).sum()
    }

    pub fn grant_writes(&self) -> usize {
        self.vouch_grants.values().map(BTreeSet::len).sum()
    }
}

// ---------------------------------------------------------------------------
// CycleCommitter
// ---------------------------------------------------------------------------

pub struct CycleCommitter;

impl CycleCommitter {
    /// Validate `effects` and apply them through `gateway` in one transaction.
    ///
    /// Any storage failure surfaces as [`PlusError::Transaction`] so the
    /// caller can retry the whole cycle from a fresh snapshot.
    pub fn commit<G: StorageGateway + ?Sized>(gateway: &mut G, effects: &CycleEffects) -> Result<()> {
        effects.validate()?;

        tracing::info!(
            summaries = effects.summaries.len(),
            memberships = effects.membership_writes(),
            grants = effects.grant_writes(),
            revoked = effects.revoked_vouchers.len(),
            expired = effects.expired_cooldowns.len(),
            "committing cycle"
        );

        gateway.apply_cycle_commit(effects).map_err(|e| {
            tracing::error!(error = %e, "cycle commit failed; nothing was applied");
            match e.kind() {
                ErrorKind::Transaction => e,
                _ => PlusError::Transaction(e.to_string()),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
