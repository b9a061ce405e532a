// 🗂️ Operator Reference Registry (CADOP)
// Maps registration ids and CNPJs to the operator's legal identity and
// classification. Loaded once per run; lookups degrade to defaults when
// the file is missing or broken.

use crate::cnpj::normalize_cnpj;
use crate::encoding::read_latin1;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One reference record from the CADOP export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorRegistryEntry {
    /// ANS registration id (primary key of the export)
    pub registro_ans: String,

    /// Legal name (Razao_Social)
    pub razao_social: String,

    /// Tax id, 14-digit canonical form
    pub cnpj: String,

    /// Federative unit (state code), may be empty in older exports
    pub uf: String,

    /// Market modality, may be empty in older exports
    pub modalidade: String,
}

/// In-memory registry with the two lookup views the pipeline needs:
/// by registration id (statement ingestion) and by normalized CNPJ
/// (enrichment join). Duplicates keep the LAST occurrence - later lines
/// of the export carry the more current data.
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    by_registration: HashMap<String, OperatorRegistryEntry>,
    by_cnpj: HashMap<String, OperatorRegistryEntry>,
}

impl OperatorRegistry {
    pub fn is_empty(&self) -> bool {
        self.by_registration.is_empty() && self.by_cnpj.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_registration.len()
    }

    /// Resolve an operator by its ANS registration id
    pub fn by_registration(&self, registro: &str) -> Option<&OperatorRegistryEntry> {
        self.by_registration.get(registro.trim())
    }

    /// Resolve an operator by normalized 14-digit CNPJ
    pub fn by_cnpj(&self, cnpj_key: &str) -> Option<&OperatorRegistryEntry> {
        self.by_cnpj.get(cnpj_key)
    }

    fn insert(&mut self, entry: OperatorRegistryEntry) {
        if !entry.registro_ans.is_empty() {
            self.by_registration
                .insert(entry.registro_ans.clone(), entry.clone());
        }
        // Join key is the normalized CNPJ; rows without one (all zeros after
        // padding) are only reachable through the registration view
        if entry.cnpj.chars().any(|c| c != '0') {
            self.by_cnpj.insert(entry.cnpj.clone(), entry);
        }
    }
}

/// Load the CADOP reference table.
///
/// Non-fatal by contract: a missing file or any read/parse error logs a
/// warning and returns an empty registry, and the caller degrades to
/// fallback-filled output. Never raises.
pub fn load_registry(path: &Path) -> OperatorRegistry {
    if !path.exists() {
        eprintln!(
            "⚠️  Registry file not found: {} (falling back to registration ids)",
            path.display()
        );
        return OperatorRegistry::default();
    }

    match parse_registry(path) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("⚠️  Failed to load registry {}: {:#}", path.display(), e);
            OperatorRegistry::default()
        }
    }
}

fn parse_registry(path: &Path) -> Result<OperatorRegistry> {
    let content = read_latin1(path)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read registry header: {}", path.display()))?
        .clone();

    // Required columns; REGISTRO_OPERADORA appears as Registro_ANS in some exports
    let idx_registro = find_column(&headers, &["REGISTRO_OPERADORA", "Registro_ANS"])
        .context("Registry is missing the registration id column")?;
    let idx_cnpj =
        find_column(&headers, &["CNPJ"]).context("Registry is missing the CNPJ column")?;
    let idx_razao = find_column(&headers, &["Razao_Social", "RAZAO_SOCIAL"])
        .context("Registry is missing the Razao_Social column")?;

    // Optional classification columns (older exports omit them)
    let idx_modalidade = find_column(&headers, &["Modalidade", "MODALIDADE"]);
    let idx_uf = find_column(&headers, &["UF"]);

    let mut registry = OperatorRegistry::default();

    for (line, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("Bad registry record at line {}", line + 2))?;

        let get = |idx: Option<usize>| -> String {
            idx.and_then(|i| record.get(i))
                .unwrap_or("")
                .trim()
                .to_string()
        };

        registry.insert(OperatorRegistryEntry {
            registro_ans: get(Some(idx_registro)),
            razao_social: get(Some(idx_razao)),
            cnpj: normalize_cnpj(record.get(idx_cnpj)),
            uf: get(idx_uf),
            modalidade: get(idx_modalidade),
        });
    }

    Ok(registry)
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::write_latin1;
    use tempfile::tempdir;

    fn write_registry(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Relatorio_cadop.csv");
        write_latin1(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_registry_basic() {
        let (_dir, path) = write_registry(
            "REGISTRO_OPERADORA;CNPJ;Razao_Social;Modalidade;UF\n\
             12345;11444777000161;Assistência Médica Ltda;Medicina de Grupo;SP\n\
             67890;00000000000272;Cooperativa Saúde;Cooperativa Médica;RJ\n",
        );

        let registry = load_registry(&path);
        assert_eq!(registry.len(), 2);

        let entry = registry.by_registration("12345").unwrap();
        assert_eq!(entry.razao_social, "Assistência Médica Ltda");
        assert_eq!(entry.cnpj, "11444777000161");
        assert_eq!(entry.uf, "SP");

        let entry = registry.by_cnpj("11444777000161").unwrap();
        assert_eq!(entry.registro_ans, "12345");
        assert_eq!(entry.modalidade, "Medicina de Grupo");
    }

    #[test]
    fn test_duplicates_keep_last_occurrence() {
        let (_dir, path) = write_registry(
            "REGISTRO_OPERADORA;CNPJ;Razao_Social;Modalidade;UF\n\
             12345;11444777000161;Old Name;Filantropia;MG\n\
             12345;11444777000161;Current Name;Medicina de Grupo;SP\n",
        );

        let registry = load_registry(&path);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.by_registration("12345").unwrap().razao_social,
            "Current Name"
        );
        assert_eq!(registry.by_cnpj("11444777000161").unwrap().uf, "SP");
    }

    #[test]
    fn test_cnpj_is_normalized_for_lookup() {
        let (_dir, path) = write_registry(
            "REGISTRO_OPERADORA;CNPJ;Razao_Social\n\
             12345;11.444.777/0001-61;Formatted Cnpj SA\n",
        );

        let registry = load_registry(&path);
        assert!(registry.by_cnpj("11444777000161").is_some());
    }

    #[test]
    fn test_missing_optional_columns_degrade_to_empty() {
        let (_dir, path) = write_registry(
            "Registro_ANS;CNPJ;Razao_Social\n12345;11444777000161;No Classification SA\n",
        );

        let registry = load_registry(&path);
        let entry = registry.by_registration("12345").unwrap();
        assert_eq!(entry.uf, "");
        assert_eq!(entry.modalidade, "");
    }

    #[test]
    fn test_missing_file_returns_empty_registry() {
        let dir = tempdir().unwrap();
        let registry = load_registry(&dir.path().join("nope.csv"));

        assert!(registry.is_empty());
        assert!(registry.by_registration("12345").is_none());
    }

    #[test]
    fn test_missing_required_column_returns_empty_registry() {
        let (_dir, path) = write_registry("CNPJ;Razao_Social\n11444777000161;Sem Registro SA\n");

        let registry = load_registry(&path);
        assert!(registry.is_empty());
    }
}
