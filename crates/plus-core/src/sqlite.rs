//! SQLite-backed [`StorageGateway`].
//!
//! # Table design
//!
//! ```text
//! plus_status          one row per user; membership_tier NULL = non-member
//! plus_ballot          (voter_id, voted_id, tier, is_stale) is unique, so a
//!                      voter can hold last cycle's stale ballot and this
//!                      cycle's active one for the same candidate
//! plus_suggestion      wiped every cycle
//! plus_voting_summary  append-only history, counts stored as JSON arrays
//! ```
//!
//! Timestamps are Unix milliseconds. A cycle commit runs inside one
//! `rusqlite::Transaction`; returning early drops it, which rolls back.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};

use crate::commit::CycleEffects;
use crate::error::{PlusError, Result};
use crate::gateway::StorageGateway;
use crate::types::{
    Ballot, MembershipStatus, Region, Score, Suggestion, Tier, UserId, VoteCounts, VotingSummary,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS plus_status (
    user_id INTEGER PRIMARY KEY,
    membership_tier INTEGER,
    region TEXT NOT NULL,
    voucher_id INTEGER,
    vouch_tier INTEGER,
    can_vouch_for INTEGER,
    can_vouch_again_after INTEGER,
    name_for_voting TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS plus_ballot (
    voter_id INTEGER NOT NULL,
    voted_id INTEGER NOT NULL,
    tier INTEGER NOT NULL,
    score INTEGER NOT NULL,
    is_stale INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (voter_id, voted_id, tier, is_stale)
);
CREATE TABLE IF NOT EXISTS plus_suggestion (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    suggested_id INTEGER NOT NULL,
    suggester_id INTEGER NOT NULL,
    tier INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_resuggestion INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS plus_voting_summary (
    user_id INTEGER NOT NULL,
    month INTEGER NOT NULL,
    year INTEGER NOT NULL,
    tier INTEGER NOT NULL,
    was_suggested INTEGER NOT NULL,
    was_vouched INTEGER NOT NULL,
    counts_eu TEXT NOT NULL,
    counts_na TEXT NOT NULL,
    PRIMARY KEY (user_id, month, year, tier)
);
";

fn storage(e: rusqlite::Error) -> PlusError {
    PlusError::Storage(e.to_string())
}

fn transaction(e: rusqlite::Error) -> PlusError {
    PlusError::Transaction(e.to_string())
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| PlusError::InvalidRecord(format!("timestamp out of range: {ms}")))
}

fn tier_opt(raw: Option<u8>) -> Result<Option<Tier>> {
    raw.map(Tier::try_from).transpose()
}

// ---------------------------------------------------------------------------
// SqliteGateway
// ---------------------------------------------------------------------------

pub struct SqliteGateway {
    conn: Connection,
}

impl SqliteGateway {
    /// Open or create the database at `path` and make sure every table exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------------

    pub fn insert_status(&self, status: &MembershipStatus) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO plus_status (user_id, membership_tier, region, voucher_id, vouch_tier,
                     can_vouch_for, can_vouch_again_after, name_for_voting)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    status.user_id,
                    status.membership_tier.map(Tier::as_u8),
                    status.region.as_str(),
                    status.voucher_id,
                    status.vouch_tier.map(Tier::as_u8),
                    status.can_vouch_for.map(Tier::as_u8),
                    status.can_vouch_again_after.map(to_millis),
                    status.name_for_voting,
                ],
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn insert_ballot(&self, ballot: &Ballot) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO plus_ballot (voter_id, voted_id, tier, score, is_stale)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    ballot.voter_id,
                    ballot.voted_id,
                    ballot.tier.as_u8(),
                    ballot.score.value(),
                    ballot.is_stale,
                ],
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn insert_suggestion(&self, suggestion: &Suggestion) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO plus_suggestion (suggested_id, suggester_id, tier, description, is_resuggestion)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    suggestion.suggested_id,
                    suggestion.suggester_id,
                    suggestion.tier.as_u8(),
                    suggestion.description,
                    suggestion.is_resuggestion,
                ],
            )
            .map_err(storage)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    fn query_ballots(&self, sql: &str) -> Result<Vec<Ballot>> {
        let mut stmt = self.conn.prepare(sql).map_err(storage)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, u8>(2)?,
                    row.get::<_, i8>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })
            .map_err(storage)?;

        let mut ballots = Vec::new();
        for row in rows {
            let (voter_id, voted_id, tier, score, is_stale) = row.map_err(storage)?;
            ballots.push(Ballot {
                voter_id,
                voted_id,
                tier: Tier::try_from(tier)?,
                score: Score::try_from(score)?,
                is_stale,
            });
        }
        Ok(ballots)
    }

    /// Every ballot, stale or not, in insertion order.
    pub fn fetch_all_ballots(&self) -> Result<Vec<Ballot>> {
        self.query_ballots(
            "SELECT voter_id, voted_id, tier, score, is_stale FROM plus_ballot ORDER BY rowid",
        )
    }

    /// Summary history, optionally narrowed to one month. Ordered by year,
    /// month, tier, then user.
    pub fn fetch_voting_summaries(&self, month: Option<(u32, i32)>) -> Result<Vec<VotingSummary>> {
        let (m, y) = match month {
            Some((m, y)) => (Some(m), Some(y)),
            None => (None, None),
        };
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_id, month, year, tier, was_suggested, was_vouched, counts_eu, counts_na
                 FROM plus_voting_summary
                 WHERE (?1 IS NULL OR month = ?1) AND (?2 IS NULL OR year = ?2)
                 ORDER BY year, month, tier, user_id",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![m, y], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, i32>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(storage)?;

        let mut summaries = Vec::new();
        for row in rows {
            let (user_id, month, year, tier, was_suggested, was_vouched, eu, na) =
                row.map_err(storage)?;
            summaries.push(VotingSummary {
                user_id,
                month,
                year,
                tier: Tier::try_from(tier)?,
                was_suggested,
                was_vouched,
                counts_eu: serde_json::from_str::<VoteCounts>(&eu)?,
                counts_na: serde_json::from_str::<VoteCounts>(&na)?,
            });
        }
        Ok(summaries)
    }
}

// ---------------------------------------------------------------------------
// Commit helpers
// ---------------------------------------------------------------------------

/// Run `sql` (`?1` = value, `?2` = user id) once per user, requiring each to
/// hit exactly one status row.
fn update_each(
    tx: &Transaction<'_>,
    sql: &str,
    value: Option<i64>,
    users: &BTreeSet<UserId>,
) -> Result<()> {
    let mut stmt = tx.prepare(sql).map_err(transaction)?;
    for &user_id in users {
        let changed = stmt.execute(params![value, user_id]).map_err(transaction)?;
        if changed != 1 {
            return Err(PlusError::Transaction(format!(
                "no membership status for user {user_id}"
            )));
        }
    }
    Ok(())
}

fn insert_summaries(tx: &Transaction<'_>, summaries: &[VotingSummary]) -> Result<()> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO plus_voting_summary
                 (user_id, month, year, tier, was_suggested, was_vouched, counts_eu, counts_na)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .map_err(transaction)?;
    for s in summaries {
        stmt.execute(params![
            s.user_id,
            s.month,
            s.year,
            s.tier.as_u8(),
            s.was_suggested,
            s.was_vouched,
            serde_json::to_string(&s.counts_eu)?,
            serde_json::to_string(&s.counts_na)?,
        ])
        .map_err(transaction)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// StorageGateway
// ---------------------------------------------------------------------------

impl StorageGateway for SqliteGateway {
    fn fetch_active_ballots(&self) -> Result<Vec<Ballot>> {
        self.query_ballots(
            "SELECT voter_id, voted_id, tier, score, is_stale FROM plus_ballot
             WHERE is_stale = 0 ORDER BY rowid",
        )
    }

    fn fetch_membership_statuses(&self) -> Result<Vec<MembershipStatus>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_id, membership_tier, region, voucher_id, vouch_tier,
                        can_vouch_for, can_vouch_again_after, name_for_voting
                 FROM plus_status ORDER BY user_id",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<u8>>(4)?,
                    row.get::<_, Option<u8>>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(storage)?;

        let mut statuses = Vec::new();
        for row in rows {
            let (user_id, tier, region, voucher_id, vouch_tier, can_vouch_for, again, name) =
                row.map_err(storage)?;
            statuses.push(MembershipStatus {
                user_id,
                membership_tier: tier_opt(tier)?,
                region: region.parse::<Region>()?,
                voucher_id,
                vouch_tier: tier_opt(vouch_tier)?,
                can_vouch_for: tier_opt(can_vouch_for)?,
                can_vouch_again_after: again.map(from_millis).transpose()?,
                name_for_voting: name,
            });
        }
        Ok(statuses)
    }

    fn fetch_suggestions(&self) -> Result<Vec<Suggestion>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT suggested_id, suggester_id, tier, description, is_resuggestion
                 FROM plus_suggestion ORDER BY id",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, u8>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })
            .map_err(storage)?;

        let mut suggestions = Vec::new();
        for row in rows {
            let (suggested_id, suggester_id, tier, description, is_resuggestion) =
                row.map_err(storage)?;
            suggestions.push(Suggestion {
                suggested_id,
                suggester_id,
                tier: Tier::try_from(tier)?,
                description,
                is_resuggestion,
            });
        }
        Ok(suggestions)
    }

    fn apply_cycle_commit(&mut self, effects: &CycleEffects) -> Result<()> {
        let tx = self.conn.transaction().map_err(transaction)?;

        tx.execute("DELETE FROM plus_ballot WHERE is_stale = 1", [])
            .map_err(transaction)?;
        tx.execute("UPDATE plus_ballot SET is_stale = 1", [])
            .map_err(transaction)?;
        tx.execute("DELETE FROM plus_suggestion", [])
            .map_err(transaction)?;
        insert_summaries(&tx, &effects.summaries)?;
        tx.execute(
            "UPDATE plus_status SET voucher_id = NULL, vouch_tier = NULL",
            [],
        )
        .map_err(transaction)?;
        update_each(
            &tx,
            "UPDATE plus_status SET can_vouch_again_after = ?1 WHERE user_id = ?2",
            None,
            &effects.expired_cooldowns,
        )?;
        for (tier, users) in &effects.membership {
            update_each(
                &tx,
                "UPDATE plus_status SET membership_tier = ?1 WHERE user_id = ?2",
                tier.map(|t| i64::from(t.as_u8())),
                users,
            )?;
        }
        tx.execute("UPDATE plus_status SET can_vouch_for = NULL", [])
            .map_err(transaction)?;
        for (tier, users) in &effects.vouch_grants {
            update_each(
                &tx,
                "UPDATE plus_status SET can_vouch_for = ?1 WHERE user_id = ?2",
                Some(i64::from(tier.as_u8())),
                users,
            )?;
        }
        update_each(
            &tx,
            "UPDATE plus_status SET can_vouch_again_after = ?1 WHERE user_id = ?2",
            Some(to_millis(effects.can_vouch_again_after)),
            &effects.revoked_vouchers,
        )?;

        tx.commit().map_err(transaction)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn seeded() -> SqliteGateway {
        let db = SqliteGateway::open_in_memory().unwrap();
        let mut voucher = MembershipStatus::new(1, Some(Tier::One), Region::Na);
        voucher.name_for_voting = "captain".into();
        voucher.can_vouch_again_after = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut vouched = MembershipStatus::new(2, None, Region::Eu);
        vouched.voucher_id = Some(1);
        vouched.vouch_tier = Some(Tier::Three);
        db.insert_status(&voucher).unwrap();
        db.insert_status(&vouched).unwrap();
        db.insert_ballot(&Ballot {
            voter_id: 1,
            voted_id: 2,
            tier: Tier::Three,
            score: Score::MinusTwo,
            is_stale: false,
        })
        .unwrap();
        db.insert_ballot(&Ballot {
            voter_id: 1,
            voted_id: 2,
            tier: Tier::Three,
            score: Score::PlusOne,
            is_stale: true,
        })
        .unwrap();
        db.insert_suggestion(&Suggestion {
            suggested_id: 2,
            suggester_id: 1,
            tier: Tier::Three,
            description: "good at the game".into(),
            is_resuggestion: false,
        })
        .unwrap();
        db
    }

    fn effects() -> CycleEffects {
        CycleEffects {
            now: Utc.with_ymd_and_hms(2024, 4, 30, 18, 0, 0).unwrap(),
            summaries: vec![VotingSummary {
                user_id: 2,
                month: 4,
                year: 2024,
                tier: Tier::Three,
                was_suggested: true,
                was_vouched: true,
                counts_eu: VoteCounts::default(),
                counts_na: VoteCounts([1, 0, 0, 0]),
            }],
            expired_cooldowns: BTreeSet::from([1]),
            membership: BTreeMap::from([(Some(Tier::Three), BTreeSet::from([2]))]),
            vouch_grants: BTreeMap::from([(Tier::One, BTreeSet::from([1]))]),
            revoked_vouchers: BTreeSet::from([1]),
            can_vouch_again_after: Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn reads_roundtrip_seeded_rows() {
        let db = seeded();
        let statuses = db.fetch_membership_statuses().unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name_for_voting, "captain");
        assert_eq!(statuses[1].vouch_tier, Some(Tier::Three));
        assert_eq!(statuses[1].region, Region::Eu);
        assert_eq!(db.fetch_active_ballots().unwrap().len(), 1);
        assert_eq!(db.fetch_all_ballots().unwrap().len(), 2);
        assert_eq!(db.fetch_suggestions().unwrap()[0].description, "good at the game");
    }

    #[test]
    fn commit_applies_every_effect() {
        let mut db = seeded();
        let e = effects();
        db.apply_cycle_commit(&e).unwrap();

        let ballots = db.fetch_all_ballots().unwrap();
        assert_eq!(ballots.len(), 1);
        assert!(ballots[0].is_stale);
        assert_eq!(ballots[0].score, Score::MinusTwo);
        assert!(db.fetch_suggestions().unwrap().is_empty());

        let statuses = db.fetch_membership_statuses().unwrap();
        assert_eq!(statuses[1].membership_tier, Some(Tier::Three));
        assert_eq!(statuses[1].voucher_id, None);
        assert_eq!(statuses[1].vouch_tier, None);
        assert_eq!(statuses[0].can_vouch_for, Some(Tier::One));
        // expired cooldown cleared, then the fresh penalty written
        assert_eq!(statuses[0].can_vouch_again_after, Some(e.can_vouch_again_after));

        let history = db.fetch_voting_summaries(Some((4, 2024))).unwrap();
        assert_eq!(history, e.summaries);
        assert!(db.fetch_voting_summaries(Some((5, 2024))).unwrap().is_empty());
    }

    #[test]
    fn failed_commit_rolls_back() {
        let mut db = seeded();
        let before = db.fetch_membership_statuses().unwrap();
        let mut e = effects();
        e.revoked_vouchers.insert(999);
        let err = db.apply_cycle_commit(&e).unwrap_err();
        assert!(err.is_retryable());

        assert_eq!(db.fetch_membership_statuses().unwrap(), before);
        assert_eq!(db.fetch_active_ballots().unwrap().len(), 1);
        assert_eq!(db.fetch_suggestions().unwrap().len(), 1);
        assert!(db.fetch_voting_summaries(None).unwrap().is_empty());
    }

    #[test]
    fn invalid_stored_tier_is_an_integrity_error() {
        let db = SqliteGateway::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO plus_status (user_id, membership_tier, region) VALUES (1, 7, 'NA')",
                [],
            )
            .unwrap();
        let err = db.fetch_membership_statuses().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataIntegrity);
    }

    #[test]
    fn open_is_idempotent_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plus.db");
        {
            let db = SqliteGateway::open(&path).unwrap();
            db.insert_status(&MembershipStatus::new(1, None, Region::Na)).unwrap();
        }
        let db = SqliteGateway::open(&path).unwrap();
        assert_eq!(db.fetch_membership_statuses().unwrap().len(), 1);
    }
}
