// 🗄️ SQLite Store - Providers, specialties, allocations and reports
//
// The core works on in-memory values; this module only moves them in and out
// of SQLite. Timestamps are stored as fixed-width RFC 3339 (UTC, microseconds)
// so they compare correctly as text.

use crate::allocation::FundAllocation;
use crate::entities::provider::{CanonicalProvider, GeoPoint, ProviderIndex};
use crate::entities::specialty::{CanonicalSpecialty, SpecialtyCategory, SpecialtyRegistry};
use crate::normalizer::LegalForm;
use crate::reports::{ReportKind, UserReport};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS specialties (
            id TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            display_name TEXT NOT NULL,
            category TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS providers (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            legal_form TEXT,
            address TEXT,
            address_key TEXT,
            city TEXT,
            phone TEXT,
            email TEXT,
            lat REAL,
            lng REAL,
            specialty_ids TEXT NOT NULL,
            sources TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS allocations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            service_type TEXT NOT NULL,
            allocated REAL NOT NULL,
            consumed REAL,
            source TEXT NOT NULL,
            UNIQUE(provider_id, year, month, service_type, source)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reports (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            comment TEXT,
            fingerprint TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_providers_name ON providers(normalized_name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_allocations_period ON allocations(provider_id, year, month)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_provider_time ON reports(provider_id, created_at)",
        [],
    )?;

    Ok(())
}

fn time_to_sql(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn time_from_sql(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn set_from_sql(idx: usize, value: &str) -> rusqlite::Result<BTreeSet<String>> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// PROVIDER INDEX
// ============================================================================

/// Upsert every specialty and provider of the index. Returns providers written.
pub fn save_index(conn: &Connection, index: &ProviderIndex) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    for specialty in index.specialties().all_specialties() {
        tx.execute(
            "INSERT INTO specialties (id, name, display_name, category)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                category = excluded.category",
            params![
                specialty.id,
                specialty.name,
                specialty.display_name,
                specialty.category.as_str(),
            ],
        )
        .with_context(|| format!("Failed to save specialty {}", specialty.name))?;
    }

    for provider in index.all_providers() {
        let specialty_ids = serde_json::to_string(&provider.specialty_ids)?;
        let sources = serde_json::to_string(&provider.sources)?;

        tx.execute(
            "INSERT INTO providers (
                id, display_name, normalized_name, legal_form, address, address_key,
                city, phone, email, lat, lng, specialty_ids, sources,
                first_seen_at, last_seen_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                normalized_name = excluded.normalized_name,
                legal_form = excluded.legal_form,
                address = excluded.address,
                address_key = excluded.address_key,
                city = excluded.city,
                phone = excluded.phone,
                email = excluded.email,
                lat = excluded.lat,
                lng = excluded.lng,
                specialty_ids = excluded.specialty_ids,
                sources = excluded.sources,
                first_seen_at = excluded.first_seen_at,
                last_seen_at = excluded.last_seen_at",
            params![
                provider.id,
                provider.display_name,
                provider.normalized_name,
                provider.legal_form.map(|f| f.as_str()),
                provider.address,
                provider.address_key,
                provider.city,
                provider.phone,
                provider.email,
                provider.coordinates.map(|c| c.lat),
                provider.coordinates.map(|c| c.lng),
                specialty_ids,
                sources,
                time_to_sql(&provider.first_seen_at),
                time_to_sql(&provider.last_seen_at),
            ],
        )
        .with_context(|| format!("Failed to save provider {}", provider.id))?;
    }

    tx.commit()?;
    tracing::debug!(providers = index.count(), specialties = index.specialties().count(), "saved index");
    Ok(index.count())
}

/// Rebuild the provider index in insertion order
pub fn load_index(conn: &Connection) -> Result<ProviderIndex> {
    let mut stmt = conn.prepare(
        "SELECT id, name, display_name, category FROM specialties ORDER BY rowid",
    )?;
    let specialties = stmt
        .query_map([], |row| {
            let category: String = row.get(3)?;
            Ok(CanonicalSpecialty {
                id: row.get(0)?,
                name: row.get(1)?,
                display_name: row.get(2)?,
                category: SpecialtyCategory::from_label(&category).unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to load specialties")?;

    let mut stmt = conn.prepare(
        "SELECT id, display_name, normalized_name, legal_form, address, address_key,
                city, phone, email, lat, lng, specialty_ids, sources,
                first_seen_at, last_seen_at
         FROM providers
         ORDER BY rowid",
    )?;
    let providers = stmt
        .query_map([], |row| {
            let legal_form: Option<String> = row.get(3)?;
            let lat: Option<f64> = row.get(9)?;
            let lng: Option<f64> = row.get(10)?;
            let specialty_ids: String = row.get(11)?;
            let sources: String = row.get(12)?;
            let first_seen_at: String = row.get(13)?;
            let last_seen_at: String = row.get(14)?;

            Ok(CanonicalProvider {
                id: row.get(0)?,
                display_name: row.get(1)?,
                normalized_name: row.get(2)?,
                legal_form: legal_form
                    .and_then(|f| serde_json::from_value::<LegalForm>(serde_json::Value::String(f)).ok()),
                address: row.get(4)?,
                address_key: row.get(5)?,
                city: row.get(6)?,
                phone: row.get(7)?,
                email: row.get(8)?,
                coordinates: match (lat, lng) {
                    (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
                    _ => None,
                },
                specialty_ids: set_from_sql(11, &specialty_ids)?,
                sources: set_from_sql(12, &sources)?,
                first_seen_at: time_from_sql(13, &first_seen_at)?,
                last_seen_at: time_from_sql(14, &last_seen_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to load providers")?;

    Ok(ProviderIndex::from_parts(
        providers,
        SpecialtyRegistry::from_specialties(specialties),
    ))
}

pub fn provider_exists(conn: &Connection, provider_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM providers WHERE id = ?1",
            params![provider_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

// ============================================================================
// ALLOCATIONS
// ============================================================================

/// Upsert allocations; a re-import of the same source replaces its figures
pub fn insert_allocations(conn: &Connection, allocations: &[FundAllocation]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut written = 0;

    for allocation in allocations {
        written += tx.execute(
            "INSERT INTO allocations (
                provider_id, year, month, service_type, allocated, consumed, source
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(provider_id, year, month, service_type, source) DO UPDATE SET
                allocated = excluded.allocated,
                consumed = excluded.consumed",
            params![
                allocation.provider_id,
                allocation.year,
                allocation.month,
                allocation.service_type,
                allocation.allocated,
                allocation.consumed,
                allocation.source,
            ],
        )?;
    }

    tx.commit()?;
    Ok(written)
}

pub fn get_allocations(
    conn: &Connection,
    provider_id: &str,
    year: i32,
    month: u32,
) -> Result<Vec<FundAllocation>> {
    let mut stmt = conn.prepare(
        "SELECT provider_id, year, month, service_type, allocated, consumed, source
         FROM allocations
         WHERE provider_id = ?1 AND year = ?2 AND month = ?3
         ORDER BY id",
    )?;

    let allocations = stmt
        .query_map(params![provider_id, year, month], |row| {
            Ok(FundAllocation {
                provider_id: row.get(0)?,
                year: row.get(1)?,
                month: row.get(2)?,
                service_type: row.get(3)?,
                allocated: row.get(4)?,
                consumed: row.get(5)?,
                source: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(allocations)
}

// ============================================================================
// REPORTS
// ============================================================================

pub fn insert_report(conn: &Connection, report: &UserReport) -> Result<()> {
    conn.execute(
        "INSERT INTO reports (id, provider_id, kind, comment, fingerprint, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            report.id,
            report.provider_id,
            report.kind.as_str(),
            report.comment,
            report.fingerprint,
            time_to_sql(&report.created_at),
        ],
    )
    .with_context(|| format!("Failed to insert report for {}", report.provider_id))?;

    Ok(())
}

/// Reports for a provider created at or after `since`, oldest first
pub fn get_reports_since(
    conn: &Connection,
    provider_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<UserReport>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, kind, comment, fingerprint, created_at
         FROM reports
         WHERE provider_id = ?1 AND created_at >= ?2
         ORDER BY created_at",
    )?;

    let reports = stmt
        .query_map(params![provider_id, time_to_sql(&since)], |row| {
            let kind: String = row.get(2)?;
            let created_at: String = row.get(5)?;

            Ok(UserReport {
                id: row.get(0)?,
                provider_id: row.get(1)?,
                kind: kind
                    .parse::<ReportKind>()
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?,
                comment: row.get(3)?,
                fingerprint: row.get(4)?,
                created_at: time_from_sql(5, &created_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(reports)
}

// ============================================================================
// TESTS
// ============================================================================
