// 🏗️ Sheet Parsers - Heterogeneous provider and allocation spreadsheets
//
// Exports come from many publishers: preamble rows before the header, columns
// in any order under different names, `,` `;` or tab delimiters, and
// multi-valued specialty cells. Parsers only lift cells into raw rows; all
// matching happens later.

use crate::allocation::FundAllocation;
use crate::entities::provider::{ProviderIndex, RawRecord};
use crate::normalizer::{combined_key, fold_diacritics, normalize_address, normalize_name};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Header row must appear within the first rows of a file
const HEADER_SCAN_ROWS: usize = 15;

/// Service type used when an allocation export has no such column
pub const DEFAULT_SERVICE_TYPE: &str = "general";

// ============================================================================
// COLUMNS & HEADER DETECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Name,
    Address,
    City,
    Phone,
    Email,
    Specialty,
    ServiceType,
    Allocated,
    Consumed,
    Year,
    Month,
}

impl Column {
    /// Header spellings seen in the wild (folded, punctuation as spaces)
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Column::Name => &[
                "nume", "name", "denumire", "denumire furnizor", "nume furnizor", "furnizor",
                "denumire unitate", "unitate", "unitate medicala", "provider", "clinica",
            ],
            Column::Address => &["adresa", "address", "adresa furnizor", "sediu", "adresa sediu"],
            Column::City => &["localitate", "oras", "city", "municipiu", "localitatea"],
            Column::Phone => &["telefon", "tel", "phone", "nr telefon", "numar telefon"],
            Column::Email => &["email", "e mail", "mail", "adresa email", "adresa e mail"],
            Column::Specialty => &[
                "specialitate", "specialitati", "specialitatea", "specialty", "specialties",
                "specialitati medicale", "specialitate medicala",
            ],
            Column::ServiceType => &[
                "tip serviciu", "tip servicii", "tip asistenta", "serviciu", "service type", "service",
            ],
            Column::Allocated => &[
                "suma alocata", "alocat", "alocata", "valoare alocata", "valoare contract", "allocated", "suma",
            ],
            Column::Consumed => &[
                "consumat", "suma consumata", "valoare consumata", "decontat", "consumed",
            ],
            Column::Year => &["an", "anul", "year"],
            Column::Month => &["luna", "month"],
        }
    }

    fn all() -> [Column; 11] {
        [
            Column::Name,
            Column::Address,
            Column::City,
            Column::Phone,
            Column::Email,
            Column::Specialty,
            Column::ServiceType,
            Column::Allocated,
            Column::Consumed,
            Column::Year,
            Column::Month,
        ]
    }
}

/// "Denumire Furnizor:" → "denumire furnizor"
fn header_key(cell: &str) -> String {
    fold_diacritics(&cell.to_lowercase())
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn column_for(cell: &str) -> Option<Column> {
    let key = header_key(cell);
    if key.is_empty() {
        return None;
    }
    let all = Column::all();
    all.iter()
        .find(|col| col.aliases().contains(&key.as_str()))
        .or_else(|| {
            all.iter().find(|col| {
                col.aliases()
                    .iter()
                    .any(|alias| key.starts_with(&format!("{} ", alias)))
            })
        })
        .copied()
}

/// Column positions found in a header row (first occurrence wins)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    columns: HashMap<Column, usize>,
}

impl HeaderMap {
    pub fn from_record(record: &StringRecord) -> Self {
        let mut columns = HashMap::new();
        for (pos, cell) in record.iter().enumerate() {
            if let Some(column) = column_for(cell) {
                columns.entry(column).or_insert(pos);
            }
        }
        HeaderMap { columns }
    }

    pub fn position(&self, column: Column) -> Option<usize> {
        self.columns.get(&column).copied()
    }

    pub fn has_all(&self, required: &[Column]) -> bool {
        required.iter().all(|c| self.columns.contains_key(c))
    }

    /// Trimmed cell for a column, None when missing or blank
    pub fn cell<'r>(&self, record: &'r StringRecord, column: Column) -> Option<&'r str> {
        self.position(column)
            .and_then(|pos| record.get(pos))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Pick `,` `;` or tab by frequency in a line (comma on ties)
pub fn detect_delimiter(line: &str) -> u8 {
    let count = |d: char| line.chars().filter(|c| *c == d).count();
    let mut best = (b',', count(','));
    for (delimiter, c) in [(b';', ';'), (b'\t', '\t')] {
        let n = count(c);
        if n > best.1 {
            best = (delimiter, n);
        }
    }
    best.0
}

/// Located header: delimiter, 1-based line, column map
#[derive(Debug, Clone)]
pub struct SheetLayout {
    pub delimiter: u8,
    pub header_line: u64,
    pub header: HeaderMap,
}

/// Scan the first rows for a header holding every required column
pub fn find_layout(content: &str, required: &[Column]) -> Option<SheetLayout> {
    for (idx, line) in content.lines().take(HEADER_SCAN_ROWS).enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let delimiter = detect_delimiter(line);
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(line.as_bytes());

        if let Some(Ok(record)) = reader.records().next() {
            let header = HeaderMap::from_record(&record);
            if header.has_all(required) {
                return Some(SheetLayout {
                    delimiter,
                    header_line: idx as u64 + 1,
                    header,
                });
            }
        }
    }
    None
}

/// Data records after the header with their 1-based line numbers
fn data_records(content: &str, layout: &SheetLayout, source_file: &str) -> Result<Vec<(usize, StringRecord)>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(layout.delimiter)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.with_context(|| format!("Failed to parse CSV record in {}", source_file))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if line <= layout.header_line {
            continue;
        }
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push((line as usize, record));
    }
    Ok(rows)
}

/// Split "Cardiologie, ORL / Pediatrie" into its labels
pub fn split_multi_value(cell: &str) -> Vec<String> {
    cell.split(|c| matches!(c, ',' | ';' | '/' | '|' | '\n' | '\r'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse "10.000,50", "10,000.50", "1 500 lei"
///
/// With both separators present the last one is the decimal mark. A single
/// separator kind is a thousands mark when it repeats or is followed by
/// exactly three digits, otherwise the decimal mark.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => resolve_single_separator(&cleaned, ','),
        (None, Some(_)) => resolve_single_separator(&cleaned, '.'),
        (None, None) => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn resolve_single_separator(s: &str, sep: char) -> String {
    let occurrences = s.matches(sep).count();
    let digits_after = s.rsplit(sep).next().map_or(0, str::len);
    if occurrences > 1 || digits_after == 3 {
        s.replace(sep, "")
    } else {
        s.replace(sep, ".")
    }
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// A parser for one kind of spreadsheet export
pub trait SheetParser {
    type Row;

    /// Parse already-opened content; `source_file` is used for provenance
    fn parse_reader<R: Read>(&self, reader: R, source_file: &str) -> Result<Vec<Self::Row>>;

    /// Parse a file on disk
    fn parse(&self, file_path: &Path) -> Result<Vec<Self::Row>> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;
        let source_file = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv")
            .to_string();
        self.parse_reader(file, &source_file)
    }

    /// Parser version (for provenance)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

fn read_content<R: Read>(mut reader: R, source_file: &str) -> Result<String> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read {}", source_file))?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(content.trim_start_matches('\u{feff}').to_string())
}

// ============================================================================
// PROVIDER SHEETS
// ============================================================================

/// Provider lists: name, address, city, contact, specialties
pub struct ProviderSheetParser {
    imported_at: DateTime<Utc>,
}

impl ProviderSheetParser {
    pub fn new(imported_at: DateTime<Utc>) -> Self {
        ProviderSheetParser { imported_at }
    }
}

impl SheetParser for ProviderSheetParser {
    type Row = RawRecord;

    fn parse_reader<R: Read>(&self, reader: R, source_file: &str) -> Result<Vec<RawRecord>> {
        let content = read_content(reader, source_file)?;
        let layout = find_layout(&content, &[Column::Name])
            .with_context(|| format!("No provider header row found in {}", source_file))?;
        let header = &layout.header;

        let mut records = Vec::new();
        for (line, row) in data_records(&content, &layout, source_file)? {
            let name = header.cell(&row, Column::Name).unwrap_or("");
            let mut record = RawRecord::new(name, source_file, line, self.imported_at);

            if let Some(address) = header.cell(&row, Column::Address) {
                record = record.with_address(address);
            }
            if let Some(city) = header.cell(&row, Column::City) {
                record = record.with_city(city);
            }
            if let Some(phone) = header.cell(&row, Column::Phone) {
                record = record.with_phone(phone);
            }
            if let Some(email) = header.cell(&row, Column::Email) {
                record = record.with_email(email);
            }
            if let Some(cell) = header.cell(&row, Column::Specialty) {
                for label in split_multi_value(cell) {
                    record = record.with_specialty(&label);
                }
            }

            records.push(record);
        }

        tracing::info!(
            source_file,
            rows = records.len(),
            header_line = layout.header_line,
            "parsed provider sheet"
        );
        Ok(records)
    }
}

// ============================================================================
// ALLOCATION SHEETS
// ============================================================================

/// One allocation line as published, before the provider is resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub provider_name: String,
    pub address: Option<String>,
    pub service_type: String,
    pub allocated: f64,
    pub consumed: Option<f64>,
    pub year: i32,
    pub month: u32,
    pub source_file: String,
    pub row: usize,
}

impl AllocationRow {
    pub fn source_ref(&self) -> String {
        format!("{}#{}", self.source_file, self.row)
    }
}

/// Allocation exports; year/month columns override the defaults when present
pub struct AllocationSheetParser {
    default_year: i32,
    default_month: u32,
}

impl AllocationSheetParser {
    pub fn new(default_year: i32, default_month: u32) -> Self {
        AllocationSheetParser {
            default_year,
            default_month,
        }
    }
}

impl SheetParser for AllocationSheetParser {
    type Row = AllocationRow;

    fn parse_reader<R: Read>(&self, reader: R, source_file: &str) -> Result<Vec<AllocationRow>> {
        let content = read_content(reader, source_file)?;
        let layout = find_layout(&content, &[Column::Name, Column::Allocated])
            .with_context(|| format!("No allocation header row found in {}", source_file))?;
        let header = &layout.header;

        let mut rows = Vec::new();
        for (line, row) in data_records(&content, &layout, source_file)? {
            let Some(provider_name) = header.cell(&row, Column::Name) else {
                tracing::warn!(source_file, line, "allocation row without provider name");
                continue;
            };
            let Some(allocated) = header.cell(&row, Column::Allocated).and_then(parse_amount) else {
                tracing::warn!(source_file, line, "allocation row without a readable amount");
                continue;
            };

            let year = header
                .cell(&row, Column::Year)
                .and_then(|y| y.parse::<i32>().ok())
                .unwrap_or(self.default_year);
            let month = header
                .cell(&row, Column::Month)
                .and_then(|m| m.parse::<u32>().ok())
                .filter(|m| (1..=12).contains(m))
                .unwrap_or(self.default_month);

            rows.push(AllocationRow {
                provider_name: provider_name.to_string(),
                address: header.cell(&row, Column::Address).map(str::to_string),
                service_type: header
                    .cell(&row, Column::ServiceType)
                    .unwrap_or(DEFAULT_SERVICE_TYPE)
                    .to_lowercase(),
                allocated,
                consumed: header.cell(&row, Column::Consumed).and_then(parse_amount),
                year,
                month,
                source_file: source_file.to_string(),
                row: line,
            });
        }

        tracing::info!(source_file, rows = rows.len(), "parsed allocation sheet");
        Ok(rows)
    }
}

/// Allocation rows tied to canonical providers
#[derive(Debug, Clone, Default)]
pub struct AllocationResolution {
    pub allocations: Vec<FundAllocation>,
    pub unresolved: Vec<AllocationRow>,
}

/// Match allocation rows to providers with the matcher's keys (combined, then name)
///
/// The allocation source is the file label, so a re-import of an updated export
/// replaces its figures even when rows moved. Rows of one file naming the same
/// provider, month and service type are summed.
pub fn resolve_allocations(rows: &[AllocationRow], index: &ProviderIndex) -> AllocationResolution {
    let mut resolution = AllocationResolution::default();
    let mut positions: HashMap<(String, i32, u32, String, String), usize> = HashMap::new();

    for row in rows {
        let provider = normalize_name(&row.provider_name).and_then(|name_key| {
            let combined = row
                .address
                .as_deref()
                .and_then(normalize_address)
                .and_then(|address_key| index.find_by_key(&combined_key(&name_key, &address_key)));
            combined.or_else(|| index.find_by_key(&name_key))
        });

        let Some(provider) = provider else {
            tracing::warn!(provider = %row.provider_name, source = %row.source_ref(), "unresolved allocation row");
            resolution.unresolved.push(row.clone());
            continue;
        };

        let key = (
            provider.id.clone(),
            row.year,
            row.month,
            row.service_type.clone(),
            row.source_file.clone(),
        );
        match positions.get(&key) {
            Some(&pos) => {
                let existing = &mut resolution.allocations[pos];
                existing.allocated += row.allocated;
                existing.consumed = existing.consumed.zip(row.consumed).map(|(a, b)| a + b);
                tracing::debug!(provider_id = %provider.id, source = %row.source_ref(), "summed repeated allocation row");
            }
            None => {
                let mut allocation = FundAllocation::new(
                    &provider.id,
                    row.year,
                    row.month,
                    &row.service_type,
                    row.allocated,
                    &row.source_file,
                );
                allocation.consumed = row.consumed;
                positions.insert(key, resolution.allocations.len());
                resolution.allocations.push(allocation);
            }
        }
    }

    resolution
}

// ============================================================================
// TESTS
// ============================================================================
