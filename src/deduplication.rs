// 🔍 Deduplication Engine - Raw rows → canonical providers
// Decides, for every imported row, whether it describes a provider we already
// know or a new one, then links its specialty labels.
//
// Two strategies, strongest first:
//   1. Combined key: normalized name + "|" + normalized address
//   2. Name only:    normalized name (address is often missing from exports)
//
// Merges only fill empty fields and specialty links are set-union, so running
// the same (or overlapping) files again converges to the same result.

use crate::entities::provider::{CanonicalProvider, ProviderIndex, RawRecord};
use crate::entities::specialty::SpecialtyRegistry;
use crate::normalizer::{combined_key, legal_form, normalize_address, normalize_name, SpecialtyMap};
use serde::Serialize;

// ============================================================================
// MATCH STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStrategy {
    /// Same normalized name and same normalized address
    CombinedKey,

    /// Same normalized name; address missing or not yet seen
    NameOnly,
}

// ============================================================================
// MATCH OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Nothing name-like left after normalization (header artifact, numbers only ...)
    UnusableName,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum MatchOutcome {
    /// Merged into an existing provider
    Matched {
        provider_id: String,
        strategy: MatchStrategy,
        filled: Vec<&'static str>,
    },

    /// No existing provider matched; a new one was created
    Created { provider_id: String },

    /// Rejected before indexing
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordResult {
    /// Row reference ("file.csv#12")
    pub source: String,
    pub outcome: MatchOutcome,
    pub specialties_created: usize,
    pub links_added: usize,
}

impl RecordResult {
    pub fn provider_id(&self) -> Option<&str> {
        match &self.outcome {
            MatchOutcome::Matched { provider_id, .. } | MatchOutcome::Created { provider_id } => {
                Some(provider_id)
            }
            MatchOutcome::Skipped { .. } => None,
        }
    }
}

// ============================================================================
// BATCH REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<RecordResult>,
    pub created: usize,
    pub matched: usize,
    pub skipped: usize,
    pub specialties_created: usize,
    pub links_added: usize,
}

impl BatchReport {
    fn push(&mut self, result: RecordResult) {
        match result.outcome {
            MatchOutcome::Matched { .. } => self.matched += 1,
            MatchOutcome::Created { .. } => self.created += 1,
            MatchOutcome::Skipped { .. } => self.skipped += 1,
        }
        self.specialties_created += result.specialties_created;
        self.links_added += result.links_added;
        self.results.push(result);
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows: {} new providers, {} merged, {} skipped, {} new specialties, {} new links",
            self.results.len(),
            self.created,
            self.matched,
            self.skipped,
            self.specialties_created,
            self.links_added
        )
    }
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

pub struct DeduplicationEngine {
    /// Variant → canonical specialty table
    specialty_map: SpecialtyMap,
}

impl DeduplicationEngine {
    pub fn new(specialty_map: SpecialtyMap) -> Self {
        DeduplicationEngine { specialty_map }
    }

    pub fn specialty_map(&self) -> &SpecialtyMap {
        &self.specialty_map
    }

    /// Process a batch of raw records against a caller-owned index
    ///
    /// Never aborts: a bad row is skipped with a reason and the batch goes on.
    /// The index is not safe for concurrent writers; call this from one thread.
    pub fn process_batch(&self, index: &mut ProviderIndex, records: &[RawRecord]) -> BatchReport {
        let mut report = BatchReport::default();

        for record in records {
            report.push(self.process_record(index, record));
        }

        tracing::info!(
            rows = records.len(),
            created = report.created,
            matched = report.matched,
            skipped = report.skipped,
            "deduplication batch finished"
        );

        report
    }

    /// Match a single record, merging or creating as needed
    pub fn process_record(&self, index: &mut ProviderIndex, record: &RawRecord) -> RecordResult {
        let source = record.source_ref();

        let name_key = match normalize_name(&record.name) {
            Some(key) => key,
            None => {
                tracing::warn!(%source, name = %record.name, "skipping row without usable name");
                return RecordResult {
                    source,
                    outcome: MatchOutcome::Skipped {
                        reason: SkipReason::UnusableName,
                    },
                    specialties_created: 0,
                    links_added: 0,
                };
            }
        };

        let address_key = record.address.as_deref().and_then(normalize_address);
        let combined = address_key.as_deref().map(|a| combined_key(&name_key, a));
        let form = legal_form(&record.name);
        let specialties = self.canonical_specialties(record);

        // Combined key always wins when computable
        let hit = combined
            .as_deref()
            .and_then(|key| index.position_by_key(key))
            .map(|pos| (pos, MatchStrategy::CombinedKey))
            .or_else(|| {
                index
                    .position_by_key(&name_key)
                    .map(|pos| (pos, MatchStrategy::NameOnly))
            });

        let (pos, outcome) = match hit {
            Some((pos, strategy)) => {
                let filled = match index.provider_mut(pos) {
                    Some(provider) => provider.merge_record(record, address_key, form),
                    None => Vec::new(),
                };
                if let Some(key) = combined {
                    index.add_key(key, pos);
                }
                let provider_id = index.provider(pos).map(|p| p.id.clone()).unwrap_or_default();

                tracing::debug!(%source, %provider_id, ?strategy, ?filled, "merged into existing provider");
                (pos, MatchOutcome::Matched { provider_id, strategy, filled })
            }
            None => {
                let provider = CanonicalProvider::from_record(record, &name_key, address_key, form);
                let pos = index.register(provider);
                let provider_id = index.provider(pos).map(|p| p.id.clone()).unwrap_or_default();

                tracing::debug!(%source, %provider_id, name = %name_key, "created provider");
                (pos, MatchOutcome::Created { provider_id })
            }
        };

        let (specialties_created, links_added) = match index.provider_and_specialties_mut(pos) {
            Some((provider, registry)) => {
                self.link_specialties(provider, registry, &specialties)
            }
            None => (0, 0),
        };

        RecordResult {
            source,
            outcome,
            specialties_created,
            links_added,
        }
    }

    /// Normalized, de-duplicated specialty names of a record
    fn canonical_specialties(&self, record: &RawRecord) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for label in &record.specialties {
            match self.specialty_map.normalize(label) {
                Some(name) if !names.contains(&name) => names.push(name),
                Some(_) => {}
                None => tracing::debug!(label = %label, "ignoring unusable specialty label"),
            }
        }
        names
    }

    /// Ensure each specialty exists and link it; returns (created, links added)
    fn link_specialties(
        &self,
        provider: &mut CanonicalProvider,
        registry: &mut SpecialtyRegistry,
        names: &[String],
    ) -> (usize, usize) {
        let mut created = 0;
        let mut linked = 0;

        for name in names {
            let (id, was_created) = registry.ensure(name, &self.specialty_map);
            if was_created {
                created += 1;
            }
            if provider.link_specialty(&id) {
                linked += 1;
            }
        }

        (created, linked)
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new(SpecialtyMap::with_defaults())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn imported_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    fn record(name: &str, file: &str, row: usize) -> RawRecord {
        RawRecord::new(name, file, row, imported_at())
    }

    #[test]
    fn test_name_and_address_variants_match_one_provider() {
        let engine = DeduplicationEngine::default();
        let mut index = ProviderIndex::new();

        let records = vec![
            record("SC Clinica Sante SRL", "cas_2024.csv", 2).with_address("Str. Exemplu 10, Sector 2"),
            record("Clinica Sante", "cas_2025.csv", 7).with_address("Strada Exemplu nr. 10, Sect. 2"),
        ];

        let report = engine.process_batch(&mut index, &records);

        assert_eq!(index.count(), 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.matched, 1);
        assert!(matches!(
            report.results[1].outcome,
            MatchOutcome::Matched { strategy: MatchStrategy::CombinedKey, .. }
        ));

        let provider = &index.all_providers()[0];
        assert_eq!(provider.display_name, "SC Clinica Sante SRL");
        assert_eq!(provider.sources.len(), 2);
    }

    #[test]
    fn test_name_only_fallback_fills_missing_fields() {
        let engine = DeduplicationEngine::default();
        let mut index = ProviderIndex::new();

        let records = vec![
            record("Policlinica Nord", "a.csv", 1),
            record("POLICLINICA NORD S.R.L.", "b.csv", 1)
                .with_address("Bd. Unirii 5")
                .with_phone("021 111 2222"),
        ];

        let report = engine.process_batch(&mut index, &records);

        assert_eq!(index.count(), 1);
        match &report.results[1].outcome {
            MatchOutcome::Matched { strategy, filled, .. } => {
                assert_eq!(*strategy, MatchStrategy::NameOnly);
                assert!(filled.contains(&"address"));
                assert!(filled.contains(&"phone"));
            }
            other => panic!("expected match, got {:?}", other),
        }

        // The combined key now resolves too
        assert!(index.find_by_key("policlinica nord|unirii-5").is_some());
        assert_eq!(index.all_providers()[0].address_key, Some("unirii-5".to_string()));
    }

    #[test]
    fn test_combined_key_preferred_over_name() {
        let engine = DeduplicationEngine::default();
        let mut index = ProviderIndex::new();

        // Two providers with the same name already in the store
        let a = CanonicalProvider::from_record(
            &record("Nova Med", "seed.csv", 1).with_address("Str. Lalelelor 3"),
            "nova med",
            Some("lalelelor-3".to_string()),
            None,
        );
        let b = CanonicalProvider::from_record(
            &record("Nova Med", "seed.csv", 2).with_address("Calea Dorobanti 40"),
            "nova med",
            Some("dorobanti-40".to_string()),
            None,
        );
        index.register(a);
        let b_pos = index.register(b);
        let b_id = index.provider(b_pos).unwrap().id.clone();

        let result = engine.process_record(
            &mut index,
            &record("Nova Med SRL", "new.csv", 4).with_address("Calea Dorobanti nr. 40"),
        );

        assert_eq!(result.provider_id(), Some(b_id.as_str()));
        assert!(matches!(
            result.outcome,
            MatchOutcome::Matched { strategy: MatchStrategy::CombinedKey, .. }
        ));
    }

    #[test]
    fn test_unusable_name_is_skipped_and_batch_continues() {
        let engine = DeduplicationEngine::default();
        let mut index = ProviderIndex::new();

        let records = vec![
            record("12345", "a.csv", 1),
            record("", "a.csv", 2),
            record("Clinica Vest", "a.csv", 3),
        ];

        let report = engine.process_batch(&mut index, &records);

        assert_eq!(report.skipped, 2);
        assert_eq!(report.created, 1);
        assert_eq!(index.count(), 1);
        assert_eq!(
            report.results[0].outcome,
            MatchOutcome::Skipped { reason: SkipReason::UnusableName }
        );
        assert_eq!(report.results[0].provider_id(), None);
    }

    #[test]
    fn test_specialties_linked_and_created_once() {
        let engine = DeduplicationEngine::default();
        let mut index = ProviderIndex::new();

        let records = vec![
            record("Clinica Sante", "a.csv", 1)
                .with_specialty("ORL")
                .with_specialty("Cardiologie"),
            record("Clinica Sante", "b.csv", 1)
                .with_specialty("O.R.L.")
                .with_specialty("otorino")
                .with_specialty("Pediatrie"),
        ];

        let report = engine.process_batch(&mut index, &records);

        assert_eq!(index.specialties().count(), 3);
        assert_eq!(report.specialties_created, 3);
        assert_eq!(report.links_added, 3);

        let provider = &index.all_providers()[0];
        assert_eq!(provider.specialty_ids.len(), 3);
        let orl = index.specialties().find_by_name("otorinolaringologie").unwrap();
        assert!(provider.specialty_ids.contains(&orl.id));
        assert_eq!(index.by_specialty(&orl.id).len(), 1);
    }

    #[test]
    fn test_rerun_converges() {
        let engine = DeduplicationEngine::default();
        let mut index = ProviderIndex::new();

        let records = vec![
            record("Clinica Sante", "a.csv", 1)
                .with_address("Str. Exemplu 10")
                .with_specialty("Cardiologie"),
            record("Policlinica Nord", "a.csv", 2).with_specialty("ORL"),
        ];

        engine.process_batch(&mut index, &records);
        let before: Vec<CanonicalProvider> = index.all_providers().to_vec();

        let second = engine.process_batch(&mut index, &records);

        assert_eq!(second.created, 0);
        assert_eq!(second.matched, 2);
        assert_eq!(second.links_added, 0);
        assert_eq!(second.specialties_created, 0);
        assert_eq!(index.all_providers(), before.as_slice());
    }

    #[test]
    fn test_manual_edits_survive_rerun() {
        let engine = DeduplicationEngine::default();
        let mut index = ProviderIndex::new();
        let rows = vec![record("Clinica Sante", "a.csv", 1).with_phone("021 000 0000")];

        engine.process_batch(&mut index, &rows);
        let id = index.all_providers()[0].id.clone();
        index.find_by_id_mut(&id).unwrap().phone = Some("0722 123 456".to_string());

        engine.process_batch(&mut index, &rows);

        assert_eq!(index.find_by_id(&id).unwrap().phone, Some("0722 123 456".to_string()));
    }

    fn permutations(items: &[RawRecord]) -> Vec<Vec<RawRecord>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                all.push(tail);
            }
        }
        all
    }

    #[test]
    fn test_matching_is_order_independent() {
        let records = vec![
            record("Clinica Sante", "a.csv", 1).with_address("Str. Exemplu 10, Sector 2"),
            record("Clinica Sante", "b.csv", 1)
                .with_phone("021 123")
                .with_specialty("ORL"),
            record("Policlinica Nord", "a.csv", 2).with_email("nord@example.ro"),
            record("Policlinica Nord", "c.csv", 5)
                .with_city("Ploiești")
                .with_specialty("Cardiolog"),
        ];

        let engine = DeduplicationEngine::default();
        let mut expected: Option<Vec<CanonicalProvider>> = None;

        for order in permutations(&records) {
            let mut index = ProviderIndex::new();
            engine.process_batch(&mut index, &order);

            let mut providers = index.all_providers().to_vec();
            providers.sort_by(|a, b| a.normalized_name.cmp(&b.normalized_name));

            match &expected {
                None => expected = Some(providers),
                Some(first) => assert_eq!(&providers, first),
            }
        }

        let providers = expected.unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].address_key, Some("exemplu-10-s2".to_string()));
        assert_eq!(providers[0].phone, Some("021 123".to_string()));
        assert_eq!(providers[1].email, Some("nord@example.ro".to_string()));
        assert_eq!(providers[1].city, Some("Ploiești".to_string()));
    }

    #[test]
    fn test_batch_summary() {
        let engine = DeduplicationEngine::default();
        let mut index = ProviderIndex::new();
        let report = engine.process_batch(&mut index, &[record("Clinica Vest", "a.csv", 1)]);

        assert_eq!(
            report.summary(),
            "1 rows: 1 new providers, 0 merged, 0 skipped, 0 new specialties, 0 new links"
        );
    }
}
