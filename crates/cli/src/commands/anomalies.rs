//! Anomaly listing and CSV export

use std::path::PathBuf;

use anyhow::{Context, Result};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    format_ms, format_timestamp, print_json, print_rows, print_success, OutputFormat,
};

#[derive(Tabled)]
struct AnomalyRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "z")]
    zscore: String,
}

/// Show recent latency anomalies, newest first
pub async fn show_anomalies(client: &ApiClient, hours: u32, format: OutputFormat) -> Result<()> {
    let anomalies = client.anomalies(hours).await?;

    match format {
        OutputFormat::Json => print_json(&anomalies),
        OutputFormat::Table => {
            println!("Anomalies in the last {hours}h: {}", anomalies.len());
            let rows = anomalies
                .iter()
                .map(|s| AnomalyRow {
                    time: format_timestamp(s.timestamp),
                    target: s.target.clone(),
                    latency: format_ms(s.response_time_ms),
                    zscore: s
                        .zscore
                        .map(|z| format!("{z:+.3}"))
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            print_rows(rows);
            Ok(())
        }
    }
}

/// Download the 24h CSV export to a file or stdout
pub async fn export_csv(client: &ApiClient, output: Option<PathBuf>) -> Result<()> {
    let csv = client.export_csv().await?;

    match output {
        Some(path) => {
            std::fs::write(&path, &csv)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            let rows = csv.lines().count().saturating_sub(1);
            print_success(&format!("Exported {rows} samples to {}", path.display()));
        }
        None => print!("{csv}"),
    }
    Ok(())
}
