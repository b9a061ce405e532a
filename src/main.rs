use anyhow::Result;
use std::env;

use ans_despesas::{
    run_aggregation, run_consolidation, run_enrichment, run_fetch, run_load, PipelineConfig,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = PipelineConfig::default();

    match args.get(1).map(|s| s.as_str()) {
        Some("fetch") => run_fetch(&config)?,
        Some("consolidate") => {
            println!("🧮 Consolidation: raw statements → consolidated table");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            run_consolidation(&config)?;
        }
        Some("enrich") => {
            println!("🔗 Enrichment: registry join + CNPJ validation");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            run_enrichment(&config)?;
        }
        Some("aggregate") => {
            println!("📈 Aggregation: ranked expense statistics");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            run_aggregation(&config)?;
        }
        Some("load") => {
            println!("🗄️  Load: SQLite import + analysis queries");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            run_load(&config)?;
        }
        Some("pipeline") => run_pipeline(&config)?,
        _ => print_usage(),
    }

    Ok(())
}

/// Consolidate → enrich → aggregate → load, each stage a complete batch run
/// over flat files before the next begins.
fn run_pipeline(config: &PipelineConfig) -> Result<()> {
    println!("🏥 ANS Expense Pipeline v{}", ans_despesas::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n[1/4] Consolidating raw statements...");
    if run_consolidation(config)?.is_none() {
        println!("Nothing to consolidate - pipeline stopped.");
        return Ok(());
    }

    println!("\n[2/4] Enriching with registry data...");
    run_enrichment(config)?;

    println!("\n[3/4] Aggregating statistics...");
    run_aggregation(config)?;

    println!("\n[4/4] Loading into SQLite...");
    run_load(config)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Pipeline complete.");
    println!("✓ Consolidated: {}", config.consolidated_path().display());
    println!("✓ Aggregated:   {}", config.aggregated_path().display());
    println!("✓ Database:     {}", config.database_path().display());

    Ok(())
}

fn print_usage() {
    println!("ANS Expense Pipeline v{}", ans_despesas::VERSION);
    println!();
    println!("Usage: ans-despesas <command>");
    println!();
    println!("Commands:");
    println!("  fetch        Download + extract recent quarterly archives (best effort)");
    println!("  consolidate  Merge raw statements into the consolidated expense table");
    println!("  enrich       Attach registry columns + CNPJ validity flag (in place)");
    println!("  aggregate    Write the ranked per-operator statistics table");
    println!("  load         Import tables into SQLite and run the analysis queries");
    println!("  pipeline     consolidate → enrich → aggregate → load");
}
