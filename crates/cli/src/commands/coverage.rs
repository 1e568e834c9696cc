//! Reverse proxy coverage verification

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use observatory_lib::coverage::{check_coverage, parse_nginx_locations, CoverageReport};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_json, print_rows, print_success, print_warning, OutputFormat};

#[derive(Tabled)]
struct GapRow {
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "proxy_pass")]
    proxy_pass: String,
    #[tabled(rename = "Suggested target URL")]
    suggested: String,
}

/// Compare an nginx site file with the daemon's targets.
///
/// Returns whether every proxied location is covered.
pub async fn verify(client: &ApiClient, nginx: &Path, format: OutputFormat) -> Result<bool> {
    let text = std::fs::read_to_string(nginx)
        .with_context(|| format!("Failed to read {}", nginx.display()))?;
    let targets = client.targets().await?;

    let report = check_coverage(&parse_nginx_locations(&text), &targets);
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }
    Ok(report.is_complete())
}

fn print_report(report: &CoverageReport) {
    println!(
        "{} proxied locations, {} covered",
        report.covered.len() + report.gaps.len(),
        report.covered.len().to_string().green()
    );

    if report.is_complete() {
        print_success("Every proxied location is monitored");
        return;
    }

    print_warning(&format!("{} locations are not monitored", report.gaps.len()));
    let rows = report
        .gaps
        .iter()
        .map(|gap| GapRow {
            location: gap.location.location.clone(),
            proxy_pass: gap.location.proxy_pass.clone(),
            suggested: gap
                .suggested_url
                .clone()
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    print_rows(rows);
}
