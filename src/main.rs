//! MedMind Blood Test Analyzer
//!
//! Extracts lab values from PDF blood-test reports, classifies them against
//! reference ranges, keeps a per-user history and reports trends.
//!
//! Usage:
//!   medmind analyze <user> <report.pdf>   - Analyze a PDF report
//!   medmind history <user>                - List stored sessions
//!   medmind compare <user>                - Latest vs previous session
//!   medmind --help                        - Show help
//!   MEDMIND_DBG=1 medmind analyze ...     - Enable debug output

mod analyzer;
mod config;
mod error;
mod evaluator;
mod extractor;
mod pdf;
mod ranges;
mod stats;
mod storage;
mod trends;

use std::env;
use std::fs;
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use crate::analyzer::Analyzer;
use crate::config::{Config, config_file_path, ensure_data_dir};
use crate::error::MedMindError;
use crate::extractor::RuleSet;
use crate::ranges::ReferenceTable;
use crate::storage::Storage;

fn main() -> Result<(), MedMindError> {
    let args: Vec<String> = env::args().collect();

    // Check for debug mode
    let debug_mode = env::var("MEDMIND_DBG").is_ok();

    // Initialize logger
    if debug_mode {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp(None)
            .init();
    }

    // Ensure data directory exists
    if let Err(e) = ensure_data_dir() {
        eprintln!("Warning: Could not create data directory: {}", e);
    }

    // Create default config if it doesn't exist
    let cfg_path = config_file_path();
    if !cfg_path.exists() {
        if let Err(e) = Config::create_default(&cfg_path) {
            warn!("Could not create default config: {}", e);
        }
    }

    // Try loading config from data directory first, then current directory
    let config = Config::load(&cfg_path)
        .or_else(|_| Config::load("config.txt"))
        .unwrap_or_else(|e| {
            warn!("Could not load config: {}. Using defaults.", e);
            Config::default()
        });

    let command = args.get(1).map(|s| s.as_str());
    match command {
        Some("--help") | Some("-h") | Some("help") | None => {
            print_help();
            return Ok(());
        }
        Some("--version") | Some("-V") => {
            println!("medmind {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("path") | Some("paths") => {
            cmd_show_paths(&config);
            return Ok(());
        }
        _ => {}
    }

    // Reference ranges are loaded once and shared read-only by every command
    let table = match &config.ranges_path {
        Some(path) => ReferenceTable::load(path)?,
        None => ReferenceTable::builtin()?,
    };
    info!("Loaded {} reference ranges", table.len());

    match command {
        Some("tests") => print_json(&table.iter().collect::<Vec<_>>()),
        Some("analyze") => {
            let (user_key, file) = two_args(&args, "analyze <user> <report.pdf>")?;
            cmd_analyze_pdf(&config, &table, user_key, file)
        }
        Some("analyze-text") => {
            let (user_key, file) = two_args(&args, "analyze-text <user> <report.txt>")?;
            cmd_analyze_text(&config, &table, user_key, file)
        }
        Some("history") => {
            let user_key = user_arg(&args, "history <user> [limit]")?;
            let limit = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(config.history_limit);
            let storage = Storage::new(config.database_path())?;
            let history = storage.get_history(user_key, limit)?;
            print_json(&history)
        }
        Some("session") => {
            let (user_key, id) = two_args(&args, "session <user> <id>")?;
            let id: i64 = id
                .parse()
                .map_err(|_| MedMindError::InvalidUpload(format!("invalid session id: {}", id)))?;
            let storage = Storage::new(config.database_path())?;
            match storage.get_session(user_key, id)? {
                Some(session) => {
                    let values = storage.get_values(session.id)?;
                    print_json(&serde_json::json!({ "session": session, "values": values }))
                }
                None => {
                    eprintln!("No session {} for this user", id);
                    Ok(())
                }
            }
        }
        Some("series") => {
            let (user_key, test_name) = two_args(&args, "series <user> <test>")?;
            let storage = Storage::new(config.database_path())?;
            print_json(&trends::trend(&storage, user_key, test_name)?)
        }
        Some("trend") => {
            let (user_key, test_name) = two_args(&args, "trend <user> <test> [months]")?;
            let months = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(config.trend_months);
            let storage = Storage::new(config.database_path())?;
            let analysis = trends::analyze_trend(
                &storage,
                &table,
                user_key,
                test_name,
                months,
                config.stable_threshold_pct,
                Utc::now(),
            )?;
            print_json(&analysis)
        }
        Some("compare") | Some("comparison") => {
            let user_key = user_arg(&args, "compare <user>")?;
            let storage = Storage::new(config.database_path())?;
            let comparison = trends::compare(&storage, &table, user_key, config.stable_threshold_pct)?;
            print_json(&comparison)
        }
        Some("stats") => {
            let user_key = user_arg(&args, "stats <user>")?;
            let storage = Storage::new(config.database_path())?;
            print_json(&trends::user_stats(&storage, user_key)?)
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            Ok(())
        }
        None => Ok(()),
    }
}

/// Analyze a PDF report and store the results
fn cmd_analyze_pdf(config: &Config, table: &ReferenceTable, user_key: &str, file: &str) -> Result<(), MedMindError> {
    let document = pdf::load_pdf(file, config.max_upload_bytes())?;
    let rules = RuleSet::from_table(table)?;
    let analyzer = Analyzer::new(table, &rules, config.stable_threshold_pct);

    let mut storage = Storage::new(config.database_path())?;
    let report = analyzer.analyze_document(&mut storage, user_key, &document)?;

    eprintln!("Found {} of {} known tests in {}", report.total_tests_found, report.total_tests_available, report.filename);
    eprintln!("{}", report.message);
    print_json(&report)
}

/// Analyze text that was already extracted from a report
fn cmd_analyze_text(config: &Config, table: &ReferenceTable, user_key: &str, file: &str) -> Result<(), MedMindError> {
    let text = fs::read_to_string(file)?;
    let filename = std::path::Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string());
    let rules = RuleSet::from_table(table)?;
    let analyzer = Analyzer::new(table, &rules, config.stable_threshold_pct);

    let mut storage = Storage::new(config.database_path())?;
    let report = analyzer.analyze_text(&mut storage, user_key, &filename, &text, Utc::now())?;

    eprintln!("{}", report.message);
    print_json(&report)
}

/// Show data paths
fn cmd_show_paths(config: &Config) {
    use crate::config::get_data_dir;

    println!("MedMind Data Paths:");
    println!("  Data directory:  {}", get_data_dir().display());
    println!("  Database:        {}", config.database_path().display());
    println!("  Config file:     {}", config_file_path().display());
    match &config.ranges_path {
        Some(path) => println!("  Ranges file:     {}", path),
        None => println!("  Ranges file:     (built-in)"),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), MedMindError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

fn user_arg<'a>(args: &'a [String], usage: &str) -> Result<&'a str, MedMindError> {
    args.get(2)
        .map(|s| s.as_str())
        .ok_or_else(|| MedMindError::InvalidUpload(format!("usage: medmind {}", usage)))
}

fn two_args<'a>(args: &'a [String], usage: &str) -> Result<(&'a str, &'a str), MedMindError> {
    match (args.get(2), args.get(3)) {
        (Some(a), Some(b)) => Ok((a.as_str(), b.as_str())),
        _ => Err(MedMindError::InvalidUpload(format!("usage: medmind {}", usage))),
    }
}

fn print_help() {
    eprintln!("MedMind Blood Test Analyzer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("  medmind analyze <user> <report.pdf>       Analyze a PDF report");
    eprintln!("  medmind analyze-text <user> <report.txt>  Analyze pre-extracted text");
    eprintln!("  medmind history <user> [limit]            List stored sessions");
    eprintln!("  medmind session <user> <id>               Show one stored session");
    eprintln!("  medmind series <user> <test>              All stored values of one test");
    eprintln!("  medmind trend <user> <test> [months]      Trend of one test");
    eprintln!("  medmind compare <user>                    Latest vs previous session");
    eprintln!("  medmind stats <user>                      Tracking statistics");
    eprintln!("  medmind tests                             List known tests");
    eprintln!("  medmind path                              Show data file locations");
    eprintln!("  medmind help                              Show this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("  MEDMIND_DBG=1                             Enable debug output");
    eprintln!();
    eprintln!("DATA LOCATIONS:");
    eprintln!("  Config:    {}", config_file_path().display());
}
