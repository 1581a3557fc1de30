// Provider Funds - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod allocation;     // Fund allocations and monthly merge
pub mod config;         // JSON settings + tracing setup
pub mod db;             // SQLite store
pub mod deduplication;  // Matcher / deduplicator
pub mod entities;       // Providers and specialties
pub mod estimator;      // Fund availability estimate
pub mod geocoding;      // Coordinates through an external geocoder
pub mod normalizer;     // Match keys for names, addresses, specialties
pub mod parser;         // Provider and allocation spreadsheets
pub mod ranker;         // Typeahead suggestions
pub mod reports;        // Community reports

// Re-export commonly used types
pub use allocation::{merge_allocations, FundAllocation, MergedAllocation};
pub use config::{init_tracing, AppConfig};
pub use db::{
    get_allocations, get_reports_since, insert_allocations, insert_report, load_index,
    provider_exists, save_index, setup_database,
};
pub use deduplication::{
    BatchReport, DeduplicationEngine, MatchOutcome, MatchStrategy, RecordResult, SkipReason,
};
pub use entities::{
    CanonicalProvider, CanonicalSpecialty, GeoPoint, ProviderIndex, RawRecord, SpecialtyCategory,
    SpecialtyRegistry,
};
pub use estimator::{
    AvailabilityLevel, Basis, EstimatorConfig, FundEstimator, FundStatus, Lean, ReasonCode,
};
pub use geocoding::{fill_missing_coordinates, GeocodeSummary, Geocoder};
pub use normalizer::{
    legal_form, normalize_address, normalize_name, normalize_specialty, LegalForm, SpecialtyMap,
};
pub use parser::{
    resolve_allocations, AllocationResolution, AllocationRow, AllocationSheetParser,
    ProviderSheetParser, SheetParser,
};
pub use ranker::{
    build_candidates, score, MatchRule, Suggestion, SuggestionCandidate, SuggestionKind,
    SuggestionRanker,
};
pub use reports::{ReportKind, ReportPolicy, ReportRejection, UserReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
