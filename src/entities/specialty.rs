// 🩺 Specialty Entity - Canonical medical specialties
//
// Many raw spellings ("ORL", "O.R.L.", "otorino") map to ONE canonical
// specialty through the SpecialtyMap. The id is derived from the canonical
// name, so re-importing the same sources always yields the same id.

use crate::normalizer::SpecialtyMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Namespace for specialty ids (uuid v5 over the canonical name)
const SPECIALTY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b3d_4c11_8e57_0d2b_7a64_c931);

// ============================================================================
// SPECIALTY CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialtyCategory {
    /// Consultations in an outpatient clinic (default)
    Clinical,

    /// Laboratory, imaging and other diagnostic services
    Paraclinical,

    /// Dental care
    Dental,

    /// Physical medicine and rehabilitation
    Rehabilitation,

    /// Care delivered at the patient's home
    HomeCare,
}

impl SpecialtyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialtyCategory::Clinical => "clinical",
            SpecialtyCategory::Paraclinical => "paraclinical",
            SpecialtyCategory::Dental => "dental",
            SpecialtyCategory::Rehabilitation => "rehabilitation",
            SpecialtyCategory::HomeCare => "homecare",
        }
    }

    /// Parse a category label from the specialty map
    pub fn from_label(label: &str) -> Option<SpecialtyCategory> {
        match label.trim().to_lowercase().as_str() {
            "clinical" | "clinic" | "clinice" => Some(SpecialtyCategory::Clinical),
            "paraclinical" | "paraclinic" | "paraclinice" => Some(SpecialtyCategory::Paraclinical),
            "dental" | "stomatologie" => Some(SpecialtyCategory::Dental),
            "rehabilitation" | "recuperare" => Some(SpecialtyCategory::Rehabilitation),
            "homecare" | "home-care" | "ingrijiri la domiciliu" => Some(SpecialtyCategory::HomeCare),
            _ => None,
        }
    }
}

impl Default for SpecialtyCategory {
    fn default() -> Self {
        SpecialtyCategory::Clinical
    }
}

// ============================================================================
// SPECIALTY ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSpecialty {
    /// Stable identity derived from the canonical name
    pub id: String,

    /// Canonical name (normalization output, lower-case)
    pub name: String,

    /// Name shown to users ("Cardiologie")
    pub display_name: String,

    pub category: SpecialtyCategory,
}

impl CanonicalSpecialty {
    pub fn new(name: &str, category: SpecialtyCategory) -> Self {
        CanonicalSpecialty {
            id: specialty_id(name),
            name: name.to_string(),
            display_name: display_name(name),
            category,
        }
    }
}

/// Stable id for a canonical specialty name
pub fn specialty_id(canonical_name: &str) -> String {
    Uuid::new_v5(&SPECIALTY_NAMESPACE, canonical_name.as_bytes()).to_string()
}

/// "medicină de laborator" → "Medicină de laborator"
fn display_name(canonical_name: &str) -> String {
    let mut chars = canonical_name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// SPECIALTY REGISTRY
// ============================================================================

/// All known canonical specialties, keyed by canonical name
#[derive(Debug, Clone, Default)]
pub struct SpecialtyRegistry {
    specialties: Vec<CanonicalSpecialty>,
    by_name: HashMap<String, usize>,
}

impl SpecialtyRegistry {
    pub fn new() -> Self {
        SpecialtyRegistry::default()
    }

    /// Rebuild a registry from stored specialties
    pub fn from_specialties(specialties: Vec<CanonicalSpecialty>) -> Self {
        let mut registry = SpecialtyRegistry::new();
        for specialty in specialties {
            registry.register(specialty);
        }
        registry
    }

    /// Register a specialty (ignored if the canonical name already exists)
    pub fn register(&mut self, specialty: CanonicalSpecialty) -> &CanonicalSpecialty {
        let pos = match self.by_name.get(&specialty.name) {
            Some(pos) => *pos,
            None => {
                self.by_name.insert(specialty.name.clone(), self.specialties.len());
                self.specialties.push(specialty);
                self.specialties.len() - 1
            }
        };
        &self.specialties[pos]
    }

    /// Find or create the specialty for a canonical name
    ///
    /// Category comes from the map's classification, defaulting to clinical.
    /// Returns (id, created).
    pub fn ensure(&mut self, canonical_name: &str, map: &SpecialtyMap) -> (String, bool) {
        if let Some(existing) = self.find_by_name(canonical_name) {
            return (existing.id.clone(), false);
        }

        let category = match map.category_for(canonical_name) {
            Some(label) => SpecialtyCategory::from_label(label).unwrap_or_else(|| {
                tracing::warn!(specialty = canonical_name, label, "unknown specialty category, using clinical");
                SpecialtyCategory::default()
            }),
            None => SpecialtyCategory::default(),
        };

        let created = self.register(CanonicalSpecialty::new(canonical_name, category));
        tracing::debug!(specialty = %created.name, category = created.category.as_str(), "created specialty");
        (created.id.clone(), true)
    }

    pub fn find_by_name(&self, canonical_name: &str) -> Option<&CanonicalSpecialty> {
        self.by_name.get(canonical_name).map(|pos| &self.specialties[*pos])
    }

    pub fn find_by_id(&self, id: &str) -> Option<&CanonicalSpecialty> {
        self.specialties.iter().find(|s| s.id == id)
    }

    pub fn all_specialties(&self) -> &[CanonicalSpecialty] {
        &self.specialties
    }

    pub fn count(&self) -> usize {
        self.specialties.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specialty_id_is_stable() {
        let a = CanonicalSpecialty::new("cardiologie", SpecialtyCategory::Clinical);
        let b = CanonicalSpecialty::new("cardiologie", SpecialtyCategory::Clinical);

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, specialty_id("pediatrie"));
        assert_eq!(a.display_name, "Cardiologie");
    }

    #[test]
    fn test_display_name_keeps_diacritics() {
        let s = CanonicalSpecialty::new("medicină dentară", SpecialtyCategory::Dental);
        assert_eq!(s.display_name, "Medicină dentară");
    }

    #[test]
    fn test_ensure_creates_once() {
        let map = SpecialtyMap::new();
        let mut registry = SpecialtyRegistry::new();

        let (id1, created1) = registry.ensure("cardiologie", &map);
        let (id2, created2) = registry.ensure("cardiologie", &map);

        assert!(created1);
        assert!(!created2);
        assert_eq!(id1, id2);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_ensure_uses_map_category() {
        let map = SpecialtyMap::with_defaults();
        let mut registry = SpecialtyRegistry::new();

        registry.ensure("medicină de laborator", &map);
        registry.ensure("pediatrie", &map);

        assert_eq!(
            registry.find_by_name("medicină de laborator").unwrap().category,
            SpecialtyCategory::Paraclinical
        );
        assert_eq!(
            registry.find_by_name("pediatrie").unwrap().category,
            SpecialtyCategory::Clinical
        );
    }

    #[test]
    fn test_unknown_category_label_defaults_to_clinical() {
        let mut map = SpecialtyMap::new();
        map.set_category("homeopatie", "alternative");
        let mut registry = SpecialtyRegistry::new();

        registry.ensure("homeopatie", &map);
        assert_eq!(
            registry.find_by_name("homeopatie").unwrap().category,
            SpecialtyCategory::Clinical
        );
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(SpecialtyCategory::from_label("Paraclinical"), Some(SpecialtyCategory::Paraclinical));
        assert_eq!(SpecialtyCategory::from_label(" dental "), Some(SpecialtyCategory::Dental));
        assert_eq!(SpecialtyCategory::from_label("???"), None);
    }

    #[test]
    fn test_registry_find_by_id() {
        let mut registry = SpecialtyRegistry::new();
        let (id, _) = registry.ensure("oftalmologie", &SpecialtyMap::new());

        assert_eq!(registry.find_by_id(&id).unwrap().name, "oftalmologie");
        assert!(registry.find_by_id("missing").is_none());
    }
}
