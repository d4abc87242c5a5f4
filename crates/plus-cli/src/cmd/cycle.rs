use crate::output::{print_json, Column, Table};
use anyhow::Context;
use chrono::{DateTime, Utc};
use plus_core::config::ResolutionConfig;
use plus_core::types::membership_tier_number;
use plus_core::engine::CandidateOutcome;
use plus_core::{CycleReport, SqliteGateway};
use std::path::Path;

/// Shared inputs of `preview` and `run`.
pub struct CycleArgs<'a> {
    pub db: &'a Path,
    pub config: Option<&'a Path>,
    pub at: Option<DateTime<Utc>>,
    pub json: bool,
}

fn open(args: &CycleArgs<'_>) -> anyhow::Result<(SqliteGateway, ResolutionConfig)> {
    let config = ResolutionConfig::load_or_default(args.config).context("failed to load config")?;
    if !args.db.exists() {
        anyhow::bail!(
            "database not found at {} (run 'plus-cycle init' first)",
            args.db.display()
        );
    }
    let gateway = SqliteGateway::open(args.db)
        .with_context(|| format!("failed to open database at {}", args.db.display()))?;
    Ok((gateway, config))
}

// ---------------------------------------------------------------------------
// preview
// ---------------------------------------------------------------------------

pub fn preview(args: CycleArgs<'_>) -> anyhow::Result<()> {
    let (gateway, config) = open(&args)?;
    let now = args.at.unwrap_or_else(Utc::now);
    let plan = plus_core::preview_cycle(&gateway, &config, now).context("cycle resolution failed")?;
    print_report(&plan.report, args.json)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(args: CycleArgs<'_>) -> anyhow::Result<()> {
    let (mut gateway, config) = open(&args)?;
    let now = args.at.unwrap_or_else(Utc::now);
    let report = plus_core::run_cycle(&mut gateway, &config, now).map_err(|e| {
        let hint = if e.is_retryable() {
            "nothing was written; rerun the cycle"
        } else {
            "nothing was written; fix the data or config before rerunning"
        };
        anyhow::Error::new(e).context(hint)
    })?;
    print_report(&report, args.json)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn print_report(report: &CycleReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }

    let verb = if report.committed { "Resolved" } else { "Preview of" };
    println!(
        "{verb} Plus voting for {}/{}: {} candidates",
        report.month,
        report.year,
        report.outcomes.len()
    );
    if report.outcomes.is_empty() {
        return Ok(());
    }
    println!();

    outcome_table(&report.outcomes).print();

    println!();
    println!(
        "promoted: {}  demoted: {}  vouch grants: {}  revoked vouchers: {}",
        report.promoted,
        report.demoted,
        report.vouch_grants,
        report.revoked_vouchers.len()
    );
    Ok(())
}

const OUTCOME_COLUMNS: [Column; 7] = [
    Column::left("TIER"),
    Column::right("USER"),
    Column::left("NAME"),
    Column::right("SUPPORT"),
    Column::left("DECISION"),
    Column::right("TARGET"),
    Column::left("FLAGS"),
];

fn outcome_flags(o: &CandidateOutcome) -> String {
    [
        (o.was_suggested, "suggested"),
        (o.was_vouched, "vouched"),
        (o.vouch_eligible, "can-vouch"),
    ]
    .iter()
    .filter(|(set, _)| *set)
    .map(|(_, flag)| *flag)
    .collect::<Vec<_>>()
    .join(",")
}

fn outcome_table(outcomes: &[CandidateOutcome]) -> Table {
    let mut table = Table::new(&OUTCOME_COLUMNS);
    for o in outcomes {
        table.push(vec![
            format!("+{}", o.tier),
            o.user_id.to_string(),
            o.name.clone(),
            format!("{:.1}%", o.percentage),
            o.decision.to_string(),
            membership_tier_number(o.target_tier).to_string(),
            outcome_flags(o),
        ]);
    }
    table
}
