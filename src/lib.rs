// ANS Quarterly Expense Consolidation Pipeline - Core Library
// Exposes all stages for use in the CLI and tests

pub mod aggregate;
pub mod cnpj;
pub mod config;
pub mod consolidate;
pub mod db;
pub mod encoding;
pub mod enrich;
pub mod fetch;
pub mod ingest;
pub mod registry;

// Re-export commonly used types
pub use aggregate::{run_aggregation, AggregatedStatistic};
pub use cnpj::{is_valid_cnpj, normalize_cnpj};
pub use config::PipelineConfig;
pub use consolidate::run_consolidation;
pub use db::{run_load, setup_database, verify_count, DespesaRecord, LoadReport};
pub use enrich::{run_enrichment, EnrichedRow, SENTINEL_MODALIDADE, SENTINEL_ND};
pub use fetch::{recent_quarters, run_fetch};
pub use ingest::{ingest_file, ExpenseRow, QUARTER_UNKNOWN};
pub use registry::{load_registry, OperatorRegistry, OperatorRegistryEntry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
