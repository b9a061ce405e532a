// 📑 Statement Ingestor
// Reads one raw accounting extract and turns it into expense rows:
// account-category filter, operator identity resolution, quarter derivation.

use crate::config::PipelineConfig;
use crate::encoding::read_latin1;
use crate::registry::OperatorRegistry;
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Quarter/year sentinel for rows without a usable transaction date
pub const QUARTER_UNKNOWN: &str = "N/D";

/// One expense row as produced by ingestion, keyed for consolidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRow {
    /// Tax id; falls back to the registration id when the registry misses
    pub cnpj: String,

    /// Legal name; falls back to "Operadora {registration id}"
    pub razao_social: String,

    /// Quarter label "1T".."4T", or "N/D" when the date is unusable
    pub trimestre: String,

    /// Calendar year of the transaction date, or the configured fallback
    pub ano: i32,

    /// Expense magnitude (signed at this stage; the consolidator takes abs)
    pub valor: f64,
}

/// Ingest a single raw statement file.
///
/// Errors (malformed CSV, missing required column) are returned to the
/// caller, which logs a warning and skips the file - single-file failure
/// is non-fatal to the batch.
pub fn ingest_file(
    path: &Path,
    registry: &OperatorRegistry,
    config: &PipelineConfig,
) -> Result<Vec<ExpenseRow>> {
    let content = read_latin1(path)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header: {}", path.display()))?
        .clone();

    let idx_reg = find_column(&headers, "REG_ANS")
        .with_context(|| format!("{}: missing REG_ANS column", path.display()))?;
    let idx_conta = find_column(&headers, "CD_CONTA_CONTABIL")
        .with_context(|| format!("{}: missing CD_CONTA_CONTABIL column", path.display()))?;
    let idx_valor = find_column(&headers, "VL_SALDO_FINAL")
        .with_context(|| format!("{}: missing VL_SALDO_FINAL column", path.display()))?;

    // DATA is optional; without it the whole file lands in the N/D quarter
    let idx_data = find_column(&headers, "DATA");
    if idx_data.is_none() {
        eprintln!(
            "⚠️  {}: no DATA column, quarter set to {}",
            path.display(),
            QUARTER_UNKNOWN
        );
    }

    let mut rows = Vec::new();

    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| {
            format!("Failed to parse line {} in {}", line + 2, path.display())
        })?;

        let conta = record.get(idx_conta).unwrap_or("").trim();

        // Hard domain filter: only category-4 accounts are expenses
        if !conta.starts_with('4') {
            continue;
        }

        let registro = record.get(idx_reg).unwrap_or("").trim().to_string();

        // Identity resolution with fallbacks: every row gets SOME name and
        // tax id, even with an empty registry
        let (cnpj, razao_social) = match registry.by_registration(&registro) {
            Some(entry) => (entry.cnpj.clone(), entry.razao_social.clone()),
            None => (registro.clone(), format!("Operadora {}", registro)),
        };

        let (trimestre, ano) = match idx_data.and_then(|i| record.get(i)) {
            Some(raw_date) => quarter_of(raw_date, config.fallback_year),
            None => (QUARTER_UNKNOWN.to_string(), config.fallback_year),
        };

        rows.push(ExpenseRow {
            cnpj,
            razao_social,
            trimestre,
            ano,
            // Unparseable balances coerce to zero; the consolidator drops them
            valor: parse_decimal(record.get(idx_valor).unwrap_or("")).unwrap_or(0.0),
        });
    }

    Ok(rows)
}

/// Derive (quarter label, year) from a raw date string.
/// Months 1-3 map to "1T", 4-6 to "2T", and so on. Unparseable dates get
/// the "N/D" quarter and the fixed fallback year.
pub fn quarter_of(raw: &str, fallback_year: i32) -> (String, i32) {
    match parse_date(raw) {
        Some(date) => {
            let quarter = 1 + (date.month() - 1) / 3;
            (format!("{}T", quarter), date.year())
        }
        None => (QUARTER_UNKNOWN.to_string(), fallback_year),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Parse a Brazilian-formatted decimal: `.` thousands separator, `,` decimal.
/// Plain dot-decimal values also parse (the consolidated table uses them).
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let normalized = if raw.contains(',') {
        // "1.234,56" -> "1234.56"
        raw.replace('.', "").replace(',', ".")
    } else {
        raw.to_string()
    };

    normalized.parse::<f64>().ok()
}

fn find_column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::write_latin1;
    use crate::registry::load_registry;
    use tempfile::tempdir;

    fn empty_registry() -> OperatorRegistry {
        OperatorRegistry::default()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn test_quarter_derivation() {
        assert_eq!(quarter_of("2025-01-15", 2025), ("1T".to_string(), 2025));
        assert_eq!(quarter_of("2025-03-31", 2025), ("1T".to_string(), 2025));
        assert_eq!(quarter_of("2025-04-01", 2025), ("2T".to_string(), 2025));
        assert_eq!(quarter_of("2024-09-30", 2025), ("3T".to_string(), 2024));
        assert_eq!(quarter_of("2024-12-01", 2025), ("4T".to_string(), 2024));
        // Brazilian day-first format
        assert_eq!(quarter_of("01/06/2024", 2025), ("2T".to_string(), 2024));
    }

    #[test]
    fn test_unparseable_date_falls_back() {
        assert_eq!(quarter_of("", 2025), ("N/D".to_string(), 2025));
        assert_eq!(quarter_of("not-a-date", 2025), ("N/D".to_string(), 2025));
    }

    #[test]
    fn test_parse_decimal_formats() {
        assert_eq!(parse_decimal("1234.56"), Some(1234.56));
        assert_eq!(parse_decimal("1.234,56"), Some(1234.56));
        assert_eq!(parse_decimal("1234,56"), Some(1234.56));
        assert_eq!(parse_decimal("-300,10"), Some(-300.10));
        assert_eq!(parse_decimal("1.234.567,89"), Some(1234567.89));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("abc"), None);
    }

    #[test]
    fn test_ingest_filters_expense_accounts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1T2025.csv");
        write_latin1(
            &path,
            "DATA;REG_ANS;CD_CONTA_CONTABIL;DESCRICAO;VL_SALDO_FINAL\n\
             2025-01-01;12345;411000;Eventos conhecidos;100,00\n\
             2025-01-01;12345;311000;Contraprestações;999,00\n\
             2025-01-01;12345;46;Outras despesas;50,00\n",
        )
        .unwrap();

        let rows = ingest_file(&path, &empty_registry(), &config()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.trimestre == "1T" && r.ano == 2025));
        assert_eq!(rows[0].valor, 100.0);
        assert_eq!(rows[1].valor, 50.0);
    }

    #[test]
    fn test_ingest_falls_back_without_registry_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2T2025.csv");
        write_latin1(
            &path,
            "DATA;REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n\
             2025-05-01;12345;411000;200,00\n",
        )
        .unwrap();

        let rows = ingest_file(&path, &empty_registry(), &config()).unwrap();
        assert_eq!(rows[0].cnpj, "12345");
        assert_eq!(rows[0].razao_social, "Operadora 12345");
    }

    #[test]
    fn test_ingest_resolves_identity_via_registry() {
        let dir = tempdir().unwrap();

        let registry_path = dir.path().join("Relatorio_cadop.csv");
        write_latin1(
            &registry_path,
            "REGISTRO_OPERADORA;CNPJ;Razao_Social;Modalidade;UF\n\
             12345;11444777000161;Saúde Total SA;Medicina de Grupo;SP\n",
        )
        .unwrap();
        let registry = load_registry(&registry_path);

        let path = dir.path().join("1T2025.csv");
        write_latin1(
            &path,
            "DATA;REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n\
             2025-02-01;12345;411000;100,00\n",
        )
        .unwrap();

        let rows = ingest_file(&path, &registry, &config()).unwrap();
        assert_eq!(rows[0].cnpj, "11444777000161");
        assert_eq!(rows[0].razao_social, "Saúde Total SA");
    }

    #[test]
    fn test_ingest_without_data_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sem_data.csv");
        write_latin1(
            &path,
            "REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n12345;411000;100,00\n",
        )
        .unwrap();

        let rows = ingest_file(&path, &empty_registry(), &config()).unwrap();
        assert_eq!(rows[0].trimestre, "N/D");
        assert_eq!(rows[0].ano, 2025);
    }

    #[test]
    fn test_ingest_missing_required_column_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.csv");
        write_latin1(&path, "DATA;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n2025-01-01;4;1\n").unwrap();

        let err = ingest_file(&path, &empty_registry(), &config()).unwrap_err();
        assert!(err.to_string().contains("REG_ANS"));
    }

    #[test]
    fn test_ingest_coerces_unparseable_value_to_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coerce.csv");
        write_latin1(
            &path,
            "DATA;REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n\
             2025-01-01;12345;411000;n/a\n",
        )
        .unwrap();

        let rows = ingest_file(&path, &empty_registry(), &config()).unwrap();
        assert_eq!(rows[0].valor, 0.0);
    }
}
