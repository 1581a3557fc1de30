// 🏥 Provider Entity - One real-world healthcare provider
//
// Identity vs values:
// - `id` never changes once assigned
// - Values (address, phone, email ...) are only ever FILLED, never overwritten,
//   so re-running an import over overlapping files converges and never
//   clobbers fields cleaned up by hand.
//
// ProviderIndex is the caller-owned arena the matcher works against. It holds
// no locks: one writer at a time.

use crate::entities::specialty::SpecialtyRegistry;
use crate::normalizer::{combined_key, LegalForm};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Namespace for provider ids (uuid v5 over the normalized name)
const PROVIDER_NAMESPACE: Uuid = Uuid::from_u128(0x2d8e_41b0_7c5a_4f3e_a1d9_58c6_0e7b_b214);

// ============================================================================
// RAW RECORD
// ============================================================================

/// One row from one imported source file, exactly as parsed
///
/// Immutable once parsed. Many raw records may describe the same provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub specialties: Vec<String>,

    // Provenance
    pub source_file: String,
    pub row: usize,
    pub imported_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(name: &str, source_file: &str, row: usize, imported_at: DateTime<Utc>) -> Self {
        RawRecord {
            name: name.to_string(),
            address: None,
            city: None,
            phone: None,
            email: None,
            specialties: Vec::new(),
            source_file: source_file.to_string(),
            row,
            imported_at,
        }
    }

    /// Builder pattern: add address
    pub fn with_address(mut self, address: &str) -> Self {
        self.address = non_blank(address);
        self
    }

    pub fn with_city(mut self, city: &str) -> Self {
        self.city = non_blank(city);
        self
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = non_blank(phone);
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = non_blank(email);
        self
    }

    pub fn with_specialty(mut self, label: &str) -> Self {
        if let Some(label) = non_blank(label) {
            self.specialties.push(label);
        }
        self
    }

    /// Identifier of this row for audit trails: "file.csv#12"
    pub fn source_ref(&self) -> String {
        format!("{}#{}", self.source_file, self.row)
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// CANONICAL PROVIDER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProvider {
    /// Stable identity - NEVER changes
    pub id: String,

    pub display_name: String,

    /// Name match key (normalizer output)
    pub normalized_name: String,

    pub legal_form: Option<LegalForm>,

    pub address: Option<String>,

    /// Address match key (normalizer output)
    pub address_key: Option<String>,

    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,

    /// Filled later by the geocoding collaborator
    pub coordinates: Option<GeoPoint>,

    pub specialty_ids: BTreeSet<String>,

    /// Contributing raw rows ("file.csv#12")
    pub sources: BTreeSet<String>,

    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl CanonicalProvider {
    /// Seed a new provider from the first raw record that describes it
    pub fn from_record(
        record: &RawRecord,
        normalized_name: &str,
        address_key: Option<String>,
        legal_form: Option<LegalForm>,
    ) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(record.source_ref());

        CanonicalProvider {
            id: provider_id(normalized_name),
            display_name: record.name.trim().to_string(),
            normalized_name: normalized_name.to_string(),
            legal_form,
            address: record.address.clone(),
            address_key,
            city: record.city.clone(),
            phone: record.phone.clone(),
            email: record.email.clone(),
            coordinates: None,
            specialty_ids: BTreeSet::new(),
            sources,
            first_seen_at: record.imported_at,
            last_seen_at: record.imported_at,
        }
    }

    /// Merge a matching raw record: fill empty fields, add provenance
    ///
    /// Returns the names of the fields that were filled.
    pub fn merge_record(
        &mut self,
        record: &RawRecord,
        address_key: Option<String>,
        legal_form: Option<LegalForm>,
    ) -> Vec<&'static str> {
        let mut filled = Vec::new();

        if self.address.is_none() && record.address.is_some() {
            self.address = record.address.clone();
            filled.push("address");
        }
        if self.address_key.is_none() && address_key.is_some() {
            self.address_key = address_key;
        }
        if fill(&mut self.city, &record.city) {
            filled.push("city");
        }
        if fill(&mut self.phone, &record.phone) {
            filled.push("phone");
        }
        if fill(&mut self.email, &record.email) {
            filled.push("email");
        }
        if self.legal_form.is_none() && legal_form.is_some() {
            self.legal_form = legal_form;
            filled.push("legal_form");
        }

        self.sources.insert(record.source_ref());
        self.first_seen_at = self.first_seen_at.min(record.imported_at);
        self.last_seen_at = self.last_seen_at.max(record.imported_at);

        filled
    }

    /// Link a specialty (idempotent). Returns true if the link is new.
    pub fn link_specialty(&mut self, specialty_id: &str) -> bool {
        self.specialty_ids.insert(specialty_id.to_string())
    }

    /// Keys this provider can be found under: name, and name+address when known
    pub fn match_keys(&self) -> Vec<String> {
        let mut keys = vec![self.normalized_name.clone()];
        if let Some(address_key) = &self.address_key {
            keys.push(combined_key(&self.normalized_name, address_key));
        }
        keys
    }
}

fn fill(slot: &mut Option<String>, value: &Option<String>) -> bool {
    if slot.is_none() && value.is_some() {
        *slot = value.clone();
        true
    } else {
        false
    }
}

/// Deterministic id for a newly seen provider
pub fn provider_id(normalized_name: &str) -> String {
    Uuid::new_v5(&PROVIDER_NAMESPACE, normalized_name.as_bytes()).to_string()
}

// ============================================================================
// PROVIDER INDEX
// ============================================================================

/// Caller-owned collection of canonical providers and specialties
///
/// Providers are addressed by position; `keys` maps every match key to the
/// first provider registered under it.
#[derive(Debug, Clone, Default)]
pub struct ProviderIndex {
    providers: Vec<CanonicalProvider>,
    keys: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    specialties: SpecialtyRegistry,
}

impl ProviderIndex {
    pub fn new() -> Self {
        ProviderIndex::default()
    }

    /// Rebuild an index from stored providers and specialties
    pub fn from_parts(providers: Vec<CanonicalProvider>, specialties: SpecialtyRegistry) -> Self {
        let mut index = ProviderIndex {
            specialties,
            ..ProviderIndex::default()
        };
        for provider in providers {
            index.register(provider);
        }
        index
    }

    /// Add a provider and index it under every key it supports
    ///
    /// A provider whose id is already taken gets a fresh random id.
    pub fn register(&mut self, mut provider: CanonicalProvider) -> usize {
        if self.by_id.contains_key(&provider.id) {
            provider.id = Uuid::new_v4().to_string();
        }

        let pos = self.providers.len();
        for key in provider.match_keys() {
            self.keys.entry(key).or_insert(pos);
        }
        self.by_id.insert(provider.id.clone(), pos);
        self.providers.push(provider);
        pos
    }

    /// Point an additional key at an existing provider (no-op if the key is taken)
    pub fn add_key(&mut self, key: String, pos: usize) {
        if pos < self.providers.len() {
            self.keys.entry(key).or_insert(pos);
        }
    }

    pub fn position_by_key(&self, key: &str) -> Option<usize> {
        self.keys.get(key).copied()
    }

    pub fn find_by_key(&self, key: &str) -> Option<&CanonicalProvider> {
        self.position_by_key(key).map(|pos| &self.providers[pos])
    }

    pub fn find_by_id(&self, id: &str) -> Option<&CanonicalProvider> {
        self.by_id.get(id).map(|pos| &self.providers[*pos])
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut CanonicalProvider> {
        match self.by_id.get(id) {
            Some(pos) => self.providers.get_mut(*pos),
            None => None,
        }
    }

    pub fn provider(&self, pos: usize) -> Option<&CanonicalProvider> {
        self.providers.get(pos)
    }

    pub fn provider_mut(&mut self, pos: usize) -> Option<&mut CanonicalProvider> {
        self.providers.get_mut(pos)
    }

    /// Mutable access to a provider and the specialty registry at once
    pub fn provider_and_specialties_mut(
        &mut self,
        pos: usize,
    ) -> Option<(&mut CanonicalProvider, &mut SpecialtyRegistry)> {
        let provider = self.providers.get_mut(pos)?;
        Some((provider, &mut self.specialties))
    }

    pub fn all_providers(&self) -> &[CanonicalProvider] {
        &self.providers
    }

    pub fn providers_mut(&mut self) -> impl Iterator<Item = &mut CanonicalProvider> {
        self.providers.iter_mut()
    }

    pub fn count(&self) -> usize {
        self.providers.len()
    }

    pub fn specialties(&self) -> &SpecialtyRegistry {
        &self.specialties
    }

    pub fn specialties_mut(&mut self) -> &mut SpecialtyRegistry {
        &mut self.specialties
    }

    /// Providers linked to a specialty
    pub fn by_specialty(&self, specialty_id: &str) -> Vec<&CanonicalProvider> {
        self.providers
            .iter()
            .filter(|p| p.specialty_ids.contains(specialty_id))
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
