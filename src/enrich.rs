// 🔗 Enricher
// Re-reads the consolidated table, attaches the CNPJ validity flag and the
// registry classification columns (RegistroANS, Modalidade, UF), then
// rewrites the table in place as Latin-1.
//
// Two deliberately separate predicates govern filtering here:
// - CNPJ checksum validity is a FLAG, it never excludes a row;
// - a missing legal name is the pipeline's single exclusion rule.

use crate::cnpj::{is_valid_cnpj, normalize_cnpj};
use crate::config::PipelineConfig;
use crate::encoding::{read_utf8_bom, write_latin1};
use crate::ingest::parse_decimal;
use crate::registry::{load_registry, OperatorRegistry};
use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Sentinel for an unresolved registration id or region
pub const SENTINEL_ND: &str = "N/D";

/// Sentinel for an unresolved market modality
pub const SENTINEL_MODALIDADE: &str = "Desconhecida";

/// Consolidated row as written by the consolidator (all columns as text;
/// the numeric column is re-derived here)
#[derive(Debug, Deserialize)]
struct ConsolidatedRow {
    #[serde(rename = "CNPJ")]
    cnpj: String,

    #[serde(rename = "RazaoSocial")]
    razao_social: String,

    #[serde(rename = "Trimestre")]
    trimestre: String,

    #[serde(rename = "Ano")]
    ano: String,

    #[serde(rename = "ValorDespesas")]
    valor: String,
}

/// Consolidated row plus registry-derived classification
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRow {
    pub cnpj: String,
    pub razao_social: String,
    pub trimestre: String,
    pub ano: String,
    pub valor: f64,
    /// Checksum validation result - informational, never used to drop rows
    pub cnpj_valido: bool,
    pub registro_ans: String,
    pub modalidade: String,
    pub uf: String,
}

/// Run the enrichment stage. Returns the number of rows written.
///
/// The missing consolidated input is the one fatal condition; a missing
/// registry degrades to sentinel-filled classification columns.
pub fn run_enrichment(config: &PipelineConfig) -> Result<usize> {
    let path = config.consolidated_path();
    if !path.exists() {
        bail!(
            "Consolidated table not found: {} (run the consolidation stage first)",
            path.display()
        );
    }

    // Pre-enrichment the table is UTF-8 (the consolidator wrote it);
    // post-enrichment consumers read Latin-1
    let content = read_utf8_bom(&path)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(content.as_bytes());

    let registry = load_registry(&config.registry_path());
    if registry.is_empty() {
        println!("⚠️  Registry unavailable - classification columns get sentinels");
    }

    let mut enriched = Vec::new();
    let mut dropped_unnamed = 0usize;

    for (line, record) in reader.deserialize::<ConsolidatedRow>().enumerate() {
        let row = record
            .with_context(|| format!("Bad consolidated record at line {}", line + 2))?;

        // The single exclusion rule: a record with no legal name is
        // unusable for reporting
        if row.razao_social.trim().is_empty() {
            dropped_unnamed += 1;
            continue;
        }

        enriched.push(enrich_row(row, &registry));
    }

    if dropped_unnamed > 0 {
        println!("Dropped {} rows without a legal name", dropped_unnamed);
    }

    let count = enriched.len();
    write_enriched(config, &enriched)?;

    println!("✓ Enriched {} rows in place: {}", count, path.display());
    Ok(count)
}

fn enrich_row(row: ConsolidatedRow, registry: &OperatorRegistry) -> EnrichedRow {
    // Transient join key; not part of the output
    let key = normalize_cnpj(Some(&row.cnpj));
    let entry = registry.by_cnpj(&key);

    // Three independent fallbacks: a match with a blank column still gets
    // that column's sentinel without blanking the other two
    let registro_ans = entry
        .map(|e| e.registro_ans.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(SENTINEL_ND)
        .to_string();
    let modalidade = entry
        .map(|e| e.modalidade.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(SENTINEL_MODALIDADE)
        .to_string();
    let uf = entry
        .map(|e| e.uf.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(SENTINEL_ND)
        .to_string();

    EnrichedRow {
        cnpj_valido: is_valid_cnpj(Some(&row.cnpj)),
        valor: parse_decimal(&row.valor).unwrap_or(0.0),
        cnpj: row.cnpj,
        razao_social: row.razao_social,
        trimestre: row.trimestre,
        ano: row.ano,
        registro_ans,
        modalidade,
        uf,
    }
}

fn write_enriched(config: &PipelineConfig, rows: &[EnrichedRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());

    let _ = writer.write_record([
        "CNPJ",
        "RazaoSocial",
        "Trimestre",
        "Ano",
        "ValorDespesas",
        "CNPJ_Valido",
        "RegistroANS",
        "Modalidade",
        "UF",
    ]);

    for row in rows {
        let valor = format!("{:.2}", row.valor);
        let _ = writer.write_record([
            row.cnpj.as_str(),
            row.razao_social.as_str(),
            row.trimestre.as_str(),
            row.ano.as_str(),
            valor.as_str(),
            if row.cnpj_valido { "true" } else { "false" },
            row.registro_ans.as_str(),
            row.modalidade.as_str(),
            row.uf.as_str(),
        ]);
    }

    let content = String::from_utf8(writer.into_inner().unwrap_or_default())
        .unwrap_or_default();

    // Destructive in-place rewrite, Latin-1 from here on
    write_latin1(&config.consolidated_path(), &content)
}
