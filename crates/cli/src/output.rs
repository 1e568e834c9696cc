//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_rows<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format an optional duration in milliseconds
pub fn format_ms(ms: Option<f64>) -> String {
    match ms {
        Some(ms) if ms >= 1000.0 => format!("{:.2}s", ms / 1000.0),
        Some(ms) => format!("{:.0}ms", ms),
        None => "-".to_string(),
    }
}

/// Format an optional percentage
pub fn format_pct(pct: Option<f64>) -> String {
    pct.map(|p| format!("{:.2}%", p))
        .unwrap_or_else(|| "-".to_string())
}

/// Format a unix timestamp for display
pub fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Color an availability state
pub fn color_state(state: &str) -> String {
    match state.to_uppercase().as_str() {
        "UP" => state.green().to_string(),
        "DOWN" => state.red().bold().to_string(),
        _ => state.to_string(),
    }
}

/// Color uptime based on value
pub fn color_uptime(pct: Option<f64>) -> String {
    let formatted = format_pct(pct);
    match pct {
        Some(p) if p >= 99.0 => formatted.green().to_string(),
        Some(p) if p >= 95.0 => formatted.yellow().to_string(),
        Some(_) => formatted.red().to_string(),
        None => formatted,
    }
}
