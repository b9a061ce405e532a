// ⚙️ Pipeline Configuration
// Every path, filename and fallback constant in one explicit struct.
// Stages never reach for globals - they receive &PipelineConfig.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a complete pipeline execution
///
/// The `Default` impl reproduces the canonical data layout:
/// raw quarterly extracts under `data/raw`, derived artifacts under
/// `data/processed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Where fetched/extracted quarterly statement files live
    pub raw_dir: PathBuf,

    /// Where consolidated/enriched/aggregated artifacts are written
    pub processed_dir: PathBuf,

    /// CADOP reference table filename (inside `raw_dir`)
    pub registry_file: String,

    /// Consolidated expense table filename (inside `processed_dir`)
    pub consolidated_file: String,

    /// Zip archive bundling the consolidated table
    pub archive_file: String,

    /// Entry name of the consolidated table inside the archive
    pub archive_entry: String,

    /// Aggregated statistics filename (inside `processed_dir`)
    pub aggregated_file: String,

    /// SQLite database filename (inside `processed_dir`)
    pub database_file: String,

    /// Base URL of the ANS open-data quarterly statements tree
    pub base_url: String,

    /// Year assigned to rows whose transaction date is absent or unparseable.
    /// A fixed constant, not "now": outputs must be reproducible across runs
    /// in the same reporting period.
    pub fallback_year: i32,

    /// How many recent quarters the fetch stage downloads
    pub quarters_to_fetch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            raw_dir: PathBuf::from("data").join("raw"),
            processed_dir: PathBuf::from("data").join("processed"),
            registry_file: "Relatorio_cadop.csv".to_string(),
            consolidated_file: "consolidado.csv".to_string(),
            archive_file: "demonstracoes_contabeis_consolidadas.zip".to_string(),
            archive_entry: "consolidado_despesas.csv".to_string(),
            aggregated_file: "despesas_agregadas.csv".to_string(),
            database_file: "despesas.db".to_string(),
            base_url: "https://dadosabertos.ans.gov.br/FTP/PDA/demonstracoes_contabeis/"
                .to_string(),
            fallback_year: 2025,
            quarters_to_fetch: 3,
        }
    }
}

impl PipelineConfig {
    /// Config rooted at an arbitrary base directory (used by tests)
    pub fn with_base_dir(base: &Path) -> Self {
        PipelineConfig {
            raw_dir: base.join("raw"),
            processed_dir: base.join("processed"),
            ..PipelineConfig::default()
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.raw_dir.join(&self.registry_file)
    }

    pub fn consolidated_path(&self) -> PathBuf {
        self.processed_dir.join(&self.consolidated_file)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.processed_dir.join(&self.archive_file)
    }

    pub fn aggregated_path(&self) -> PathBuf {
        self.processed_dir.join(&self.aggregated_file)
    }

    pub fn database_path(&self) -> PathBuf {
        self.processed_dir.join(&self.database_file)
    }

    /// Registry filename heuristic: the CADOP reference table is the one
    /// file in the raw tree that must never be ingested as a statement.
    pub fn is_registry_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_lowercase().contains("cadop"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = PipelineConfig::default();

        assert_eq!(
            config.consolidated_path(),
            PathBuf::from("data").join("processed").join("consolidado.csv")
        );
        assert_eq!(
            config.registry_path(),
            PathBuf::from("data").join("raw").join("Relatorio_cadop.csv")
        );
        assert_eq!(config.fallback_year, 2025);
    }

    #[test]
    fn test_registry_file_heuristic() {
        let config = PipelineConfig::default();

        assert!(config.is_registry_file(Path::new("data/raw/Relatorio_cadop.csv")));
        assert!(config.is_registry_file(Path::new("data/raw/RELATORIO_CADOP.CSV")));
        assert!(!config.is_registry_file(Path::new("data/raw/1T2025.csv")));
    }

    #[test]
    fn test_with_base_dir() {
        let config = PipelineConfig::with_base_dir(Path::new("/tmp/run"));

        assert_eq!(config.raw_dir, PathBuf::from("/tmp/run/raw"));
        assert_eq!(config.processed_dir, PathBuf::from("/tmp/run/processed"));
        // Filenames are unchanged from the defaults
        assert_eq!(config.consolidated_file, "consolidado.csv");
    }
}
