//! Status, target and alert-state commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_state, color_uptime, format_ms, format_timestamp, print_info, print_json, print_rows,
    print_success, print_warning, OutputFormat,
};

/// Row for the status table
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Target")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Code")]
    status_code: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "z")]
    zscore: String,
    #[tabled(rename = "Uptime 24h")]
    uptime: String,
    #[tabled(rename = "Avg")]
    avg: String,
    #[tabled(rename = "Max")]
    max: String,
    #[tabled(rename = "Anomalies")]
    anomalies: usize,
}

/// Show current status and 24h stats of every target
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.status().await?;

    if let OutputFormat::Json = format {
        return print_json(&report);
    }

    println!("{}", "Observatory Status".bold());
    println!("{}", "=".repeat(60));
    println!("Generated: {}", report.generated_at);
    println!();

    let rows: Vec<StatusRow> = report
        .targets
        .iter()
        .map(|t| {
            let latest = t.latest.as_ref();
            let mut latency = format_ms(latest.and_then(|s| s.response_time_ms));
            if latest.is_some_and(|s| s.is_anomaly) {
                latency = format!("{latency} ⚠").yellow().to_string();
            }
            StatusRow {
                name: t.target.name.clone(),
                state: color_state(&t.alert.state.to_string()),
                status_code: latest
                    .and_then(|s| s.status_code)
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                latency,
                zscore: latest
                    .and_then(|s| s.zscore)
                    .map(|z| format!("{z:+.2}"))
                    .unwrap_or_else(|| "-".to_string()),
                uptime: color_uptime(t.stats.uptime_pct),
                avg: format_ms(t.stats.avg_ms),
                max: format_ms(t.stats.max_ms),
                anomalies: t.stats.anomalies,
            }
        })
        .collect();
    print_rows(rows);
    println!();

    if report.all_up {
        print_success("All targets up");
    } else {
        print_warning("Some targets are failing");
    }
    Ok(())
}

#[derive(Tabled)]
struct TargetRow {
    #[tabled(rename = "Slug")]
    slug: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Host")]
    host: String,
}

/// List configured targets
pub async fn list_targets(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let targets = client.targets().await?;

    match format {
        OutputFormat::Json => print_json(&targets),
        OutputFormat::Table => {
            let rows = targets
                .into_iter()
                .map(|t| TargetRow {
                    slug: t.slug,
                    name: t.name,
                    url: t.url,
                    host: t.host.unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            print_rows(rows);
            Ok(())
        }
    }
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Target")]
    slug: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Since")]
    since: String,
    #[tabled(rename = "Last Alert")]
    last_alert: String,
}

/// Show alert state machine records
pub async fn show_alerts(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let alerts = client.alerts().await?;

    match format {
        OutputFormat::Json => print_json(&alerts),
        OutputFormat::Table => {
            if alerts.is_empty() {
                print_info("No target has been checked yet");
                return Ok(());
            }
            let rows = alerts
                .iter()
                .map(|(slug, a)| AlertRow {
                    slug: slug.clone(),
                    state: color_state(&a.state.to_string()),
                    failures: a.consecutive_failures,
                    since: a
                        .last_state_change_at
                        .map(format_timestamp)
                        .unwrap_or_else(|| "-".to_string()),
                    last_alert: a
                        .last_alerted_at
                        .map(format_timestamp)
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            print_rows(rows);
            Ok(())
        }
    }
}
