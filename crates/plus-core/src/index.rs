//! Per-cycle lookup of membership statuses by user id.
//!
//! Building the index also checks the voucher invariant for every status and
//! that every voucher has a status of their own, so a corrupt ledger stops the
//! cycle before any tallying happens.

use crate::error::{PlusError, Result};
use crate::types::{MembershipStatus, UserId};
use std::collections::HashMap;

pub struct StatusIndex<'a> {
    by_user: HashMap<UserId, &'a MembershipStatus>,
}

impl<'a> StatusIndex<'a> {
    pub fn build(statuses: &'a [MembershipStatus]) -> Result<Self> {
        let mut by_user = HashMap::with_capacity(statuses.len());
        for status in statuses {
            match (status.voucher_id, status.vouch_tier) {
                (None, Some(tier)) => {
                    return Err(PlusError::VouchWithoutVoucher {
                        user_id: status.user_id,
                        tier,
                    })
                }
                (Some(voucher_id), None) => {
                    return Err(PlusError::VoucherWithoutTier {
                        user_id: status.user_id,
                        voucher_id,
                    })
                }
                _ => {}
            }
            if by_user.insert(status.user_id, status).is_some() {
                return Err(PlusError::InvalidRecord(format!(
                    "duplicate membership status for user {}",
                    status.user_id
                )));
            }
        }
        for status in statuses {
            if let Some(voucher_id) = status.voucher_id {
                if !by_user.contains_key(&voucher_id) {
                    return Err(PlusError::UnknownVoucher {
                        user_id: status.user_id,
                        voucher_id,
                    });
                }
            }
        }
        Ok(Self { by_user })
    }

    pub fn get(&self, user_id: UserId) -> Option<&'a MembershipStatus> {
        self.by_user.get(&user_id).copied()
    }

    pub fn voter(&self, voter_id: UserId) -> Result<&'a MembershipStatus> {
        self.get(voter_id)
            .ok_or(PlusError::UnknownVoter { voter_id })
    }

    pub fn candidate(&self, user_id: UserId) -> Result<&'a MembershipStatus> {
        self.get(user_id)
            .ok_or(PlusError::UnknownCandidate { user_id })
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}
