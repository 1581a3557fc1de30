use anyhow::{Context, Result};
use chrono::{Datelike, Duration, Utc};
use rusqlite::Connection;
use std::env;
use std::path::Path;

use provider_funds::{
    build_candidates, get_allocations, get_reports_since, init_tracing, insert_allocations,
    insert_report, load_index, merge_allocations, resolve_allocations, save_index, setup_database,
    AllocationSheetParser, AppConfig, DeduplicationEngine, ProviderSheetParser, ReportKind,
    SheetParser, UserReport,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config = AppConfig::load()?;
    init_tracing(&config);

    match args.get(1).map(String::as_str) {
        Some("import") if args.len() > 2 => run_import(&config, &args[2..]),
        Some("import-allocations") if args.len() == 5 => {
            run_import_allocations(&config, &args[2], &args[3], &args[4])
        }
        Some("status") if args.len() >= 3 => {
            run_status(&config, &args[2], args.get(3).map(String::as_str))
        }
        Some("suggest") if args.len() >= 3 => run_suggest(&config, &args[2..].join(" ")),
        Some("report") if args.len() >= 5 => {
            let comment = (args.len() > 5).then(|| args[5..].join(" "));
            run_report(&config, &args[2], &args[3], &args[4], comment.as_deref())
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("provider-funds {}", provider_funds::VERSION);
    println!();
    println!("Usage:");
    println!("  provider-funds import <file.csv>...");
    println!("  provider-funds import-allocations <file.csv> <year> <month>");
    println!("  provider-funds status <provider-id> [service-type]");
    println!("  provider-funds suggest <query>");
    println!("  provider-funds report <provider-id> <kind> <submitter> [comment]");
    println!();
    println!("Report kinds: funds-available, funds-exhausted, long-wait, good-service");
}

fn open_database(config: &AppConfig) -> Result<Connection> {
    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open database: {}", config.database_path))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn run_import(config: &AppConfig, files: &[String]) -> Result<()> {
    println!("📥 Importing provider sheets");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_database(config)?;
    let mut index = load_index(&conn)?;
    println!("✓ Loaded {} existing providers", index.count());

    let parser = ProviderSheetParser::new(Utc::now());
    let mut records = Vec::new();
    for file in files {
        match parser.parse(Path::new(file)) {
            Ok(rows) => {
                println!("✓ {}: {} rows", file, rows.len());
                records.extend(rows);
            }
            Err(e) => eprintln!("❌ {}: {:#}", file, e),
        }
    }

    let engine = DeduplicationEngine::new(config.specialty_map()?);
    let report = engine.process_batch(&mut index, &records);
    save_index(&conn, &index)?;

    println!("\n🔍 {}", report.summary());
    println!("✓ Database contains {} providers", index.count());
    Ok(())
}

fn run_import_allocations(config: &AppConfig, file: &str, year: &str, month: &str) -> Result<()> {
    let year: i32 = year.parse().with_context(|| format!("Invalid year: {}", year))?;
    let month: u32 = month
        .parse()
        .ok()
        .filter(|m| (1..=12).contains(m))
        .with_context(|| format!("Invalid month: {}", month))?;

    println!("💶 Importing allocations for {}-{:02}", year, month);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_database(config)?;
    let index = load_index(&conn)?;

    let rows = AllocationSheetParser::new(year, month).parse(Path::new(file))?;
    let resolution = resolve_allocations(&rows, &index);
    insert_allocations(&conn, &resolution.allocations)?;

    println!("✓ {} rows parsed", rows.len());
    println!("✓ {} allocations stored", resolution.allocations.len());
    if !resolution.unresolved.is_empty() {
        println!("⚠️  {} rows without a known provider:", resolution.unresolved.len());
        for row in &resolution.unresolved {
            println!("   {} ({})", row.provider_name, row.source_ref());
        }
    }
    Ok(())
}

fn run_status(config: &AppConfig, provider_id: &str, service_type: Option<&str>) -> Result<()> {
    let conn = open_database(config)?;
    let index = load_index(&conn)?;
    let provider = index
        .find_by_id(provider_id)
        .with_context(|| format!("Unknown provider: {}", provider_id))?;

    let now = Utc::now();
    let allocations = get_allocations(&conn, provider_id, now.year(), now.month())?;
    let merged = merge_allocations(&allocations, provider_id, now.year(), now.month(), service_type);

    let window = Duration::seconds((config.estimator.window_hours * 3600.0) as i64);
    let reports = get_reports_since(&conn, provider_id, now - window)?;
    let status = config.estimator().estimate(merged.as_ref(), &reports, now);

    println!("🏥 {}", provider.display_name);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Level:       {}", status.level.as_str());
    println!("Confidence:  {:.0}%", status.confidence * 100.0);
    println!("Reason:      {}", status.explanation.as_str());
    if let Some(ratio) = status.remaining_ratio {
        println!("Remaining:   {:.1}%", ratio * 100.0);
    }
    if let Some(lean) = status.lean {
        println!("Reports:     {:?}", lean);
    }
    println!(
        "Reports 48h: {} fund, {} other",
        status.signals.qualifying, status.signals.informational
    );
    Ok(())
}

fn run_suggest(config: &AppConfig, query: &str) -> Result<()> {
    let conn = open_database(config)?;
    let index = load_index(&conn)?;
    let candidates = build_candidates(&index);
    let suggestions = config.ranker().rank(query, &candidates);

    if suggestions.is_empty() {
        println!("No suggestions for \"{}\"", query);
        return Ok(());
    }
    for s in suggestions {
        match &s.subtitle {
            Some(subtitle) => println!("{:>3}  {:<12} {} ({})", s.score, s.kind.as_str(), s.name, subtitle),
            None => println!("{:>3}  {:<12} {}", s.score, s.kind.as_str(), s.name),
        }
    }
    Ok(())
}

fn run_report(
    config: &AppConfig,
    provider_id: &str,
    kind: &str,
    submitter: &str,
    comment: Option<&str>,
) -> Result<()> {
    let kind: ReportKind = kind.parse()?;
    let conn = open_database(config)?;
    let index = load_index(&conn)?;

    let now = Utc::now();
    let policy = config.report_policy();
    let existing = get_reports_since(&conn, provider_id, now - policy.cooldown)?;
    let report = UserReport::new(provider_id, kind, comment, submitter, &config.fingerprint_salt, now);

    match policy.check(&index, &existing, &report) {
        Ok(()) => {
            insert_report(&conn, &report)?;
            println!("✅ Report recorded: {} for {}", report.kind, provider_id);
        }
        Err(rejection) => println!("❌ {}", rejection),
    }
    Ok(())
}
