// 📈 Statistical Aggregator
// Groups the enriched table by operator identity/classification and writes
// the ranked summary (total, quarterly mean, standard deviation).

use crate::config::PipelineConfig;
use crate::encoding::{read_latin1, write_latin1};
use crate::ingest::parse_decimal;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Grouping key: (RazaoSocial, UF, RegistroANS, Modalidade)
type GroupKey = (String, String, String, String);

/// Columns of the enriched consolidated table the aggregator consumes;
/// the remaining columns are ignored by header name
#[derive(Debug, Deserialize)]
struct EnrichedRecord {
    #[serde(rename = "RazaoSocial")]
    razao_social: String,

    #[serde(rename = "UF")]
    uf: String,

    #[serde(rename = "RegistroANS")]
    registro_ans: String,

    #[serde(rename = "Modalidade")]
    modalidade: String,

    #[serde(rename = "ValorDespesas")]
    valor: String,
}

/// One row of the ranked summary table
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedStatistic {
    pub razao_social: String,
    pub uf: String,
    pub registro_ans: String,
    pub modalidade: String,
    pub total: f64,
    pub media: f64,
    pub desvio_padrao: f64,
}

/// Run the aggregation stage over the enriched consolidated table.
/// Returns the number of summary rows written.
pub fn run_aggregation(config: &PipelineConfig) -> Result<usize> {
    let path = config.consolidated_path();
    if !path.exists() {
        bail!(
            "Enriched consolidated table not found: {} (run consolidate + enrich first)",
            path.display()
        );
    }

    // Post-enrichment the consolidated table is Latin-1
    let content = read_latin1(&path)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut groups: HashMap<GroupKey, Vec<f64>> = HashMap::new();

    for (line, record) in reader.deserialize::<EnrichedRecord>().enumerate() {
        let row = record
            .with_context(|| format!("Bad enriched record at line {}", line + 2))?;

        let valor = parse_decimal(&row.valor).unwrap_or(0.0);

        // Zero-expense rows stay in the enriched table but contribute
        // nothing to the statistics
        if valor <= 0.0 {
            continue;
        }

        groups
            .entry((row.razao_social, row.uf, row.registro_ans, row.modalidade))
            .or_default()
            .push(valor);
    }

    let stats = compute_statistics(groups);
    let count = stats.len();

    write_statistics(config, &stats)?;

    println!(
        "✓ Aggregated statistics ({} groups): {}",
        count,
        config.aggregated_path().display()
    );
    Ok(count)
}

/// Sum/mean/sample-standard-deviation per group, ranked by total descending.
pub fn compute_statistics(groups: HashMap<GroupKey, Vec<f64>>) -> Vec<AggregatedStatistic> {
    let mut stats: Vec<AggregatedStatistic> = groups
        .into_iter()
        .map(|((razao_social, uf, registro_ans, modalidade), values)| {
            let total: f64 = values.iter().sum();
            let media = total / values.len() as f64;

            AggregatedStatistic {
                razao_social,
                uf,
                registro_ans,
                modalidade,
                total,
                media,
                desvio_padrao: sample_std_dev(&values, media),
            }
        })
        .collect();

    // Ties beyond the primary key are left to the comparator's ordering
    stats.sort_by(|a, b| b.total.total_cmp(&a.total));
    stats
}

/// Sample standard deviation (n-1 denominator). A group of one has no
/// spread, so the undefined deviation is rewritten to 0 - the output never
/// carries a NaN marker.
pub fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    let std = (sum_sq / (values.len() - 1) as f64).sqrt();

    if std.is_finite() {
        std
    } else {
        0.0
    }
}

fn write_statistics(config: &PipelineConfig, stats: &[AggregatedStatistic]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());

    let _ = writer.write_record([
        "RazaoSocial",
        "UF",
        "RegistroANS",
        "Modalidade",
        "Total_Despesas",
        "Media_Trimestral",
        "Desvio_Padrao",
    ]);

    for stat in stats {
        let total = format!("{:.2}", stat.total);
        let media = format!("{:.2}", stat.media);
        let desvio = format!("{:.2}", stat.desvio_padrao);
        let _ = writer.write_record([
            stat.razao_social.as_str(),
            stat.uf.as_str(),
            stat.registro_ans.as_str(),
            stat.modalidade.as_str(),
            total.as_str(),
            media.as_str(),
            desvio.as_str(),
        ]);
    }

    let content = String::from_utf8(writer.into_inner().unwrap_or_default())
        .unwrap_or_default();

    write_latin1(&config.aggregated_path(), &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::run_consolidation;
    use crate::encoding::write_latin1;
    use crate::enrich::run_enrichment;
    use std::fs;
    use tempfile::tempdir;

    fn key(razao: &str, uf: &str, registro: &str, modalidade: &str) -> GroupKey {
        (
            razao.to_string(),
            uf.to_string(),
            registro.to_string(),
            modalidade.to_string(),
        )
    }

    #[test]
    fn test_sample_std_dev() {
        assert_eq!(sample_std_dev(&[100.0], 100.0), 0.0);
        assert_eq!(sample_std_dev(&[], 0.0), 0.0);

        // Sample std of {100, 200} = sqrt(5000) ≈ 70.7107
        let std = sample_std_dev(&[100.0, 200.0], 150.0);
        assert!((std - 70.7107).abs() < 1e-3);
    }

    #[test]
    fn test_statistics_are_ranked_by_total_descending() {
        let mut groups = HashMap::new();
        groups.insert(key("Pequena", "SP", "1", "Seguradora"), vec![10.0]);
        groups.insert(key("Grande", "RJ", "2", "Seguradora"), vec![500.0, 300.0]);
        groups.insert(key("Média", "MG", "3", "Filantropia"), vec![100.0, 50.0]);

        let stats = compute_statistics(groups);

        assert_eq!(stats[0].razao_social, "Grande");
        assert_eq!(stats[0].total, 800.0);
        assert_eq!(stats[0].media, 400.0);
        assert_eq!(stats[1].razao_social, "Média");
        assert_eq!(stats[2].razao_social, "Pequena");
        assert_eq!(stats[2].desvio_padrao, 0.0);
    }

    #[test]
    fn test_aggregation_skips_non_positive_values() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::with_base_dir(dir.path());
        fs::create_dir_all(&config.processed_dir).unwrap();

        write_latin1(
            &config.consolidated_path(),
            "CNPJ;RazaoSocial;Trimestre;Ano;ValorDespesas;CNPJ_Valido;RegistroANS;Modalidade;UF\n\
             1;Com Despesa;1T;2025;100.00;false;N/D;Desconhecida;N/D\n\
             2;Sem Despesa;1T;2025;0.00;false;N/D;Desconhecida;N/D\n",
        )
        .unwrap();

        assert_eq!(run_aggregation(&config).unwrap(), 1);

        let content = crate::encoding::read_latin1(&config.aggregated_path()).unwrap();
        assert!(content.contains("Com Despesa"));
        assert!(!content.contains("Sem Despesa"));
    }

    #[test]
    fn test_aggregation_requires_input() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::with_base_dir(dir.path());

        assert!(run_aggregation(&config).is_err());
    }

    // Acceptance scenario: two statement files for one operator, no registry.
    // Consolidation yields two quarters with fallback identity; enrichment
    // fills sentinels; aggregation collapses them into one ranked group.
    #[test]
    fn test_full_pipeline_end_to_end() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::with_base_dir(dir.path());
        fs::create_dir_all(&config.raw_dir).unwrap();

        write_latin1(
            &config.raw_dir.join("1T2025.csv"),
            "DATA;REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n\
             2025-02-15;12345;411000;100,00\n",
        )
        .unwrap();
        write_latin1(
            &config.raw_dir.join("2T2025.csv"),
            "DATA;REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n\
             2025-05-15;12345;411000;200,00\n",
        )
        .unwrap();

        // Consolidation: two rows, fallback name and tax id
        run_consolidation(&config).unwrap();
        let consolidated = fs::read_to_string(config.consolidated_path()).unwrap();
        assert_eq!(
            consolidated,
            "CNPJ;RazaoSocial;Trimestre;Ano;ValorDespesas\n\
             12345;Operadora 12345;1T;2025;100.00\n\
             12345;Operadora 12345;2T;2025;200.00\n"
        );

        // Enrichment with no registry: both rows get all three sentinels
        assert_eq!(run_enrichment(&config).unwrap(), 2);
        let enriched = crate::encoding::read_latin1(&config.consolidated_path()).unwrap();
        for line in enriched.lines().skip(1) {
            assert!(line.ends_with(";false;N/D;Desconhecida;N/D"));
        }

        // Aggregation: one group, total 300, mean 150, sample std ≈ 70.71
        assert_eq!(run_aggregation(&config).unwrap(), 1);
        let aggregated = crate::encoding::read_latin1(&config.aggregated_path()).unwrap();
        assert_eq!(
            aggregated,
            "RazaoSocial;UF;RegistroANS;Modalidade;Total_Despesas;Media_Trimestral;Desvio_Padrao\n\
             Operadora 12345;N/D;N/D;Desconhecida;300.00;150.00;70.71\n"
        );
    }
}
