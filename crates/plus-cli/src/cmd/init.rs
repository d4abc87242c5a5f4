use anyhow::Context;
use plus_core::SqliteGateway;
use std::path::Path;

pub fn run(db: &Path) -> anyhow::Result<()> {
    let existed = db.exists();
    SqliteGateway::open(db)
        .with_context(|| format!("failed to open database at {}", db.display()))?;
    tracing::info!(path = %db.display(), existed, "plus tables ready");
    println!("Initialized Plus voting tables in {}", db.display());
    Ok(())
}
