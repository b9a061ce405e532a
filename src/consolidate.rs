// 🧮 Consolidator
// Merges every raw statement file into one canonical per-operator-per-quarter
// expense table, then bundles it into a zip archive for distribution.

use crate::config::PipelineConfig;
use crate::ingest::{ingest_file, ExpenseRow};
use crate::registry::load_registry;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

/// Aggregation key: one consolidated row per (cnpj, razao_social, trimestre, ano)
type ConsolidationKey = (String, String, String, i32);

/// Run the consolidation stage.
///
/// Returns the path of the written consolidated table, or `None` when zero
/// statement files were ingestible (no partial/empty-file output in that
/// case).
pub fn run_consolidation(config: &PipelineConfig) -> Result<Option<PathBuf>> {
    fs::create_dir_all(&config.processed_dir).with_context(|| {
        format!("Failed to create directory: {}", config.processed_dir.display())
    })?;

    let registry = load_registry(&config.registry_path());
    if registry.is_empty() {
        println!("⚠️  Empty registry - operator names will use registration ids");
    }

    let files = collect_statement_files(&config.raw_dir, config);
    if files.is_empty() {
        println!("No statement files found under {}", config.raw_dir.display());
        return Ok(None);
    }

    println!("Processing {} statement files...", files.len());

    let mut rows: Vec<ExpenseRow> = Vec::new();
    let mut ingested_files = 0usize;

    for file in &files {
        match ingest_file(file, &registry, config) {
            Ok(file_rows) => {
                ingested_files += 1;
                rows.extend(file_rows);
            }
            // Single-file failure is non-fatal to the batch
            Err(e) => eprintln!("⚠️  Skipping {}: {:#}", file.display(), e),
        }
    }

    if ingested_files == 0 {
        println!("No statement file could be ingested - nothing written");
        return Ok(None);
    }

    let consolidated = consolidate_rows(rows);
    println!("📊 Aggregated into {} consolidated rows", consolidated.len());

    let csv_content = render_csv(&consolidated);
    let csv_path = config.consolidated_path();

    // The consolidated table itself is UTF-8; the enricher later rewrites
    // the same path as Latin-1
    fs::write(&csv_path, csv_content.as_bytes())
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;

    write_archive(&config.archive_path(), &config.archive_entry, &csv_content)?;

    println!("✓ Consolidated table: {}", csv_path.display());
    println!("✓ Archive: {}", config.archive_path().display());

    Ok(Some(csv_path))
}

/// Every .csv under the raw tree, registry excluded by filename heuristic,
/// in sorted order for deterministic ingestion.
pub fn collect_statement_files(dir: &Path, config: &PipelineConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_csv_files(dir, &mut files);

    files.retain(|p| !config.is_registry_file(p));
    files.sort();
    files
}

fn collect_csv_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_csv_files(&path, out);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
}

/// Zero-filter, sign normalization and keyed summation.
///
/// Sign is not semantically meaningful at this stage - only the magnitude
/// of the expense matters - so values are folded to their absolute value
/// after exact zeros are discarded. Sum-preserving by construction.
pub fn consolidate_rows(rows: Vec<ExpenseRow>) -> BTreeMap<ConsolidationKey, f64> {
    let mut totals: BTreeMap<ConsolidationKey, f64> = BTreeMap::new();

    for row in rows {
        if row.valor == 0.0 {
            continue;
        }

        let key = (row.cnpj, row.razao_social, row.trimestre, row.ano);
        *totals.entry(key).or_insert(0.0) += row.valor.abs();
    }

    totals
}

fn render_csv(consolidated: &BTreeMap<ConsolidationKey, f64>) -> String {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());

    // Header + rows are infallible when writing into a Vec
    let _ = writer.write_record(["CNPJ", "RazaoSocial", "Trimestre", "Ano", "ValorDespesas"]);
    for ((cnpj, razao, trimestre, ano), valor) in consolidated {
        let ano = ano.to_string();
        let valor = format!("{:.2}", valor);
        let _ = writer.write_record([
            cnpj.as_str(),
            razao.as_str(),
            trimestre.as_str(),
            ano.as_str(),
            valor.as_str(),
        ]);
    }

    String::from_utf8(writer.into_inner().unwrap_or_default()).unwrap_or_default()
}

/// Single-entry deflated archive holding the UTF-8 consolidated table.
/// Produced once here; the enricher never regenerates it.
fn write_archive(archive_path: &Path, entry_name: &str, content: &str) -> Result<()> {
    let file = fs::File::create(archive_path)
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;

    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(entry_name, options)
        .with_context(|| format!("Failed to start archive entry {}", entry_name))?;
    zip.write_all(content.as_bytes())
        .context("Failed to write archive entry")?;
    zip.finish().context("Failed to finalize archive")?;

    Ok(())
}
