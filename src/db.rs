// 🗄️ Relational Load + Analysis
// Thin load/execute utility: pushes the enriched and aggregated tables into
// SQLite and runs the standing analytical questions against them.
// Re-loads are idempotent via per-row idempotency hashes.

use crate::config::PipelineConfig;
use crate::encoding::read_latin1;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// One enriched expense row as loaded into the `despesas` table
#[derive(Debug, Clone, Deserialize)]
pub struct DespesaRecord {
    #[serde(rename = "CNPJ")]
    pub cnpj: String,

    #[serde(rename = "RazaoSocial")]
    pub razao_social: String,

    #[serde(rename = "Trimestre")]
    pub trimestre: String,

    #[serde(rename = "Ano")]
    pub ano: i64,

    #[serde(rename = "ValorDespesas")]
    pub valor: f64,

    #[serde(rename = "CNPJ_Valido")]
    pub cnpj_valido: bool,

    #[serde(rename = "RegistroANS")]
    pub registro_ans: String,

    #[serde(rename = "Modalidade")]
    pub modalidade: String,

    #[serde(rename = "UF")]
    pub uf: String,
}

impl DespesaRecord {
    /// Hash over the aggregation key. Used for DEDUPLICATION on re-load,
    /// not for identity - two loads of the same consolidated row collide
    /// here on purpose.
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{};{};{};{}",
            self.cnpj, self.razao_social, self.trimestre, self.ano
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// One row of the aggregated statistics table
#[derive(Debug, Clone, Deserialize)]
pub struct AgregadaRecord {
    #[serde(rename = "RazaoSocial")]
    pub razao_social: String,

    #[serde(rename = "UF")]
    pub uf: String,

    #[serde(rename = "RegistroANS")]
    pub registro_ans: String,

    #[serde(rename = "Modalidade")]
    pub modalidade: String,

    #[serde(rename = "Total_Despesas")]
    pub total_despesas: f64,

    #[serde(rename = "Media_Trimestral")]
    pub media_trimestral: f64,

    #[serde(rename = "Desvio_Padrao")]
    pub desvio_padrao: f64,
}

/// Outcome of one load run
#[derive(Debug)]
pub struct LoadReport {
    pub run_id: String,
    pub despesas_inserted: usize,
    pub despesas_duplicates: usize,
    pub agregadas_inserted: usize,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS despesas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            cnpj TEXT NOT NULL,
            razao_social TEXT NOT NULL,
            trimestre TEXT NOT NULL,
            ano INTEGER NOT NULL,
            valor REAL NOT NULL,
            cnpj_valido INTEGER NOT NULL,
            registro_ans TEXT NOT NULL,
            modalidade TEXT NOT NULL,
            uf TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Derived snapshot, replaced wholesale on each load
    conn.execute(
        "CREATE TABLE IF NOT EXISTS despesas_agregadas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            razao_social TEXT NOT NULL,
            uf TEXT NOT NULL,
            registro_ans TEXT NOT NULL,
            modalidade TEXT NOT NULL,
            total_despesas REAL NOT NULL,
            media_trimestral REAL NOT NULL,
            desvio_padrao REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            source_file TEXT NOT NULL,
            rows_inserted INTEGER NOT NULL,
            rows_duplicate INTEGER NOT NULL,
            details TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_despesas_cnpj ON despesas(cnpj)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_despesas_periodo ON despesas(ano, trimestre)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_despesas_uf ON despesas(uf)",
        [],
    )?;

    Ok(())
}

/// Insert expense rows; a UNIQUE-hash conflict counts as a duplicate, not
/// an error. Returns (inserted, duplicates).
pub fn insert_despesas(conn: &Connection, rows: &[DespesaRecord]) -> Result<(usize, usize)> {
    let mut inserted = 0;
    let mut duplicates = 0;

    for row in rows {
        let hash = row.compute_idempotency_hash();

        let result = conn.execute(
            "INSERT INTO despesas (
                idempotency_hash, cnpj, razao_social, trimestre, ano, valor,
                cnpj_valido, registro_ans, modalidade, uf
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                hash,
                row.cnpj,
                row.razao_social,
                row.trimestre,
                row.ano,
                row.valor,
                row.cnpj_valido,
                row.registro_ans,
                row.modalidade,
                row.uf,
            ],
        );

        match result {
            Ok(_) => inserted += 1,
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                duplicates += 1;
            }
            Err(e) => return Err(e).context("Failed to insert expense row"),
        }
    }

    Ok((inserted, duplicates))
}

/// Replace the aggregated-statistics snapshot
pub fn insert_agregadas(conn: &Connection, rows: &[AgregadaRecord]) -> Result<usize> {
    conn.execute("DELETE FROM despesas_agregadas", [])?;

    for row in rows {
        conn.execute(
            "INSERT INTO despesas_agregadas (
                razao_social, uf, registro_ans, modalidade,
                total_despesas, media_trimestral, desvio_padrao
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.razao_social,
                row.uf,
                row.registro_ans,
                row.modalidade,
                row.total_despesas,
                row.media_trimestral,
                row.desvio_padrao,
            ],
        )?;
    }

    Ok(rows.len())
}

pub fn verify_count(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

/// Read the enriched consolidated table (Latin-1, post-enrichment contract)
pub fn read_despesas_csv(config: &PipelineConfig) -> Result<Vec<DespesaRecord>> {
    let path = config.consolidated_path();
    if !path.exists() {
        bail!(
            "Enriched consolidated table not found: {} (run the pipeline first)",
            path.display()
        );
    }

    let content = read_latin1(&path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<DespesaRecord>().enumerate() {
        rows.push(
            record.with_context(|| format!("Bad enriched record at line {}", line + 2))?,
        );
    }
    Ok(rows)
}

fn read_agregadas_csv(config: &PipelineConfig) -> Result<Vec<AgregadaRecord>> {
    let content = read_latin1(&config.aggregated_path())?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<AgregadaRecord>().enumerate() {
        rows.push(
            record.with_context(|| format!("Bad aggregated record at line {}", line + 2))?,
        );
    }
    Ok(rows)
}

/// Full load run: setup, CSV reads, inserts, run bookkeeping, analysis.
pub fn run_load(config: &PipelineConfig) -> Result<LoadReport> {
    let despesas = read_despesas_csv(config)?;

    let agregadas = if config.aggregated_path().exists() {
        read_agregadas_csv(config)?
    } else {
        eprintln!(
            "⚠️  Aggregated table not found: {} (skipping statistics load)",
            config.aggregated_path().display()
        );
        Vec::new()
    };

    let conn = Connection::open(config.database_path()).with_context(|| {
        format!("Failed to open database: {}", config.database_path().display())
    })?;
    setup_database(&conn)?;

    let (inserted, duplicates) = insert_despesas(&conn, &despesas)?;
    let agregadas_inserted = insert_agregadas(&conn, &agregadas)?;

    let report = LoadReport {
        run_id: uuid::Uuid::new_v4().to_string(),
        despesas_inserted: inserted,
        despesas_duplicates: duplicates,
        agregadas_inserted,
    };

    conn.execute(
        "INSERT INTO import_runs (
            run_id, started_at, source_file, rows_inserted, rows_duplicate, details
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            report.run_id,
            Utc::now().to_rfc3339(),
            config.consolidated_path().display().to_string(),
            inserted as i64,
            duplicates as i64,
            serde_json::json!({
                "despesas_rows": despesas.len(),
                "agregadas_rows": agregadas.len(),
                "database": config.database_path().display().to_string(),
            })
            .to_string(),
        ],
    )?;

    println!(
        "✓ Loaded {} expense rows ({} duplicates skipped), {} statistics rows",
        inserted, duplicates, agregadas_inserted
    );

    run_analysis(&conn)?;

    Ok(report)
}

/// The standing analytical questions, executed and printed (top 5 rows each)
pub fn run_analysis(conn: &Connection) -> Result<()> {
    print_query(
        conn,
        "Quais as 5 operadoras com maior crescimento percentual de despesas \
         entre o primeiro e o último trimestre analisado?",
        "WITH per_quarter AS (
            SELECT cnpj, razao_social, ano, trimestre, SUM(valor) AS total
            FROM despesas
            WHERE trimestre != 'N/D'
            GROUP BY cnpj, razao_social, ano, trimestre
        ),
        ordered AS (
            SELECT *,
                ROW_NUMBER() OVER (
                    PARTITION BY cnpj, razao_social ORDER BY ano, trimestre
                ) AS rn_first,
                ROW_NUMBER() OVER (
                    PARTITION BY cnpj, razao_social ORDER BY ano DESC, trimestre DESC
                ) AS rn_last
            FROM per_quarter
        )
        SELECT f.razao_social,
               ROUND(f.total, 2) AS primeiro_trimestre,
               ROUND(l.total, 2) AS ultimo_trimestre,
               ROUND((l.total - f.total) * 100.0 / f.total, 2) AS crescimento_pct
        FROM ordered f
        JOIN ordered l
          ON l.cnpj = f.cnpj AND l.razao_social = f.razao_social
        WHERE f.rn_first = 1 AND l.rn_last = 1
          AND f.total > 0
          AND NOT (f.ano = l.ano AND f.trimestre = l.trimestre)
        ORDER BY crescimento_pct DESC
        LIMIT 5",
    )?;

    print_query(
        conn,
        "Qual a distribuição de despesas por UF? Liste os 5 estados com \
         maiores despesas totais.",
        "SELECT uf, ROUND(SUM(valor), 2) AS total_despesas
         FROM despesas
         GROUP BY uf
         ORDER BY total_despesas DESC
         LIMIT 5",
    )?;

    print_query(
        conn,
        "Quantas operadoras tiveram despesas acima da média geral em pelo \
         menos 2 dos trimestres analisados?",
        "WITH per_quarter AS (
            SELECT cnpj, razao_social, ano, trimestre, SUM(valor) AS total
            FROM despesas
            WHERE trimestre != 'N/D'
            GROUP BY cnpj, razao_social, ano, trimestre
        ),
        media_geral AS (
            SELECT AVG(total) AS media FROM per_quarter
        )
        SELECT COUNT(*) AS operadoras_acima_da_media
        FROM (
            SELECT p.cnpj
            FROM per_quarter p, media_geral m
            WHERE p.total > m.media
            GROUP BY p.cnpj, p.razao_social
            HAVING COUNT(*) >= 2
        )",
    )?;

    Ok(())
}

fn print_query(conn: &Connection, title: &str, sql: &str) -> Result<()> {
    let mut stmt = conn.prepare(sql).context("Failed to prepare analysis query")?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    println!("\n[QUESTÃO] {}", title);
    println!("Colunas: {}", columns.join(", "));

    let mut rows = stmt.query([])?;
    let mut printed = 0usize;

    while let Some(row) = rows.next()? {
        let mut fields = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value: rusqlite::types::Value = row.get(i)?;
            fields.push(format_value(value));
        }
        println!("  {}", fields.join(" | "));
        printed += 1;
    }

    if printed == 0 {
        println!("  (nenhum dado retornado)");
    }

    Ok(())
}

fn format_value(value: rusqlite::types::Value) -> String {
    use rusqlite::types::Value;

    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => format!("{:.2}", r),
        Value::Text(t) => t,
        Value::Blob(_) => "<blob>".to_string(),
    }
}
