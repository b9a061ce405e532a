// 🌐 Quarterly Archive Fetcher
// Downloads and extracts the recent quarterly statement archives from the
// ANS open-data tree. Retry-free and best-effort: every remote failure is
// logged and the next quarter is attempted; only local filesystem errors
// creating the raw directory fail the stage.

use crate::config::PipelineConfig;
use anyhow::{Context, Result};
use chrono::{Datelike, Days, NaiveDate, Utc};
use std::fs;
use std::time::Duration;

/// The distinct quarters to fetch, ascending, walking back from
/// `reference - 180 days` in 90-day steps. Pure and deterministic given
/// the reference date.
pub fn recent_quarters(reference: NaiveDate, count: usize) -> Vec<(i32, u32)> {
    let mut quarters: Vec<(i32, u32)> = Vec::new();
    let mut cursor = reference - Days::new(180);

    while quarters.len() < count {
        let quarter = (cursor.year(), 1 + (cursor.month() - 1) / 3);
        if !quarters.contains(&quarter) {
            quarters.push(quarter);
        }
        cursor = cursor - Days::new(90);
    }

    quarters.sort();
    quarters
}

/// Remote archive URL for one quarter, e.g. `{base}/2025/1T2025.zip`
pub fn quarter_url(base_url: &str, year: i32, quarter: u32) -> String {
    format!("{}{}/{}T{}.zip", base_url, year, quarter, year)
}

/// Local filename the downloaded archive is stored under
pub fn local_archive_name(year: i32, quarter: u32) -> String {
    format!("{}_{}T_demonstracoes_contabeis.zip", year, quarter)
}

/// Download + extract the recent quarterly archives into `raw_dir`.
pub fn run_fetch(config: &PipelineConfig) -> Result<()> {
    fs::create_dir_all(&config.raw_dir)
        .with_context(|| format!("Failed to create directory: {}", config.raw_dir.display()))?;

    let quarters = recent_quarters(Utc::now().date_naive(), config.quarters_to_fetch);
    println!(
        "Fetching quarters: {}",
        quarters
            .iter()
            .map(|(y, q)| format!("{}/{}T", y, q))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")?;

    for (year, quarter) in quarters {
        let url = quarter_url(&config.base_url, year, quarter);
        let zip_path = config.raw_dir.join(local_archive_name(year, quarter));

        println!("⬇️  Downloading {}/{}T...", year, quarter);

        let response = match client.get(&url).send() {
            Ok(response) => response,
            Err(e) => {
                eprintln!("⚠️  Request failed for {}: {}", url, e);
                continue;
            }
        };

        if !response.status().is_success() {
            eprintln!("⚠️  Not found ({}): {}", response.status(), url);
            eprintln!("    The ANS may not have published this quarter yet.");
            continue;
        }

        let bytes = match response.bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("⚠️  Download aborted for {}: {}", url, e);
                continue;
            }
        };

        if let Err(e) = fs::write(&zip_path, &bytes) {
            eprintln!("⚠️  Failed to save {}: {}", zip_path.display(), e);
            continue;
        }
        println!("✓ Downloaded: {}", zip_path.display());

        match extract_archive(&zip_path, config) {
            Ok(entries) => println!("✓ Extracted {} entries", entries),
            Err(e) => eprintln!("⚠️  Corrupt archive {}: {:#}", zip_path.display(), e),
        }
    }

    println!("Fetch finished.");
    Ok(())
}

fn extract_archive(zip_path: &std::path::Path, config: &PipelineConfig) -> Result<usize> {
    let file = fs::File::open(zip_path)
        .with_context(|| format!("Failed to open {}", zip_path.display()))?;

    let mut archive = zip::ZipArchive::new(file).context("Not a valid zip archive")?;
    let entries = archive.len();

    archive
        .extract(&config.raw_dir)
        .with_context(|| format!("Failed to extract into {}", config.raw_dir.display()))?;

    Ok(entries)
}
