// 💶 Fund Allocations - Monthly quotas per provider and service type
//
// A provider may hold several allocations in the same month (one per service
// type). The merged view is always computed from the individual rows, never
// stored pre-summed:
//
//   allocated = Σ allocated
//   consumed  = Σ consumed   (only if EVERY row exposes a consumed amount)

use serde::{Deserialize, Serialize};

// ============================================================================
// FUND ALLOCATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundAllocation {
    pub provider_id: String,
    pub year: i32,
    /// 1..=12
    pub month: u32,
    /// e.g. "paraclinic", "clinic", "recuperare"
    pub service_type: String,
    pub allocated: f64,
    /// Unknown for many sources
    pub consumed: Option<f64>,
    /// Where the figures came from (file or publisher label)
    pub source: String,
}

impl FundAllocation {
    pub fn new(
        provider_id: &str,
        year: i32,
        month: u32,
        service_type: &str,
        allocated: f64,
        source: &str,
    ) -> Self {
        FundAllocation {
            provider_id: provider_id.to_string(),
            year,
            month,
            service_type: service_type.trim().to_string(),
            allocated,
            consumed: None,
            source: source.to_string(),
        }
    }

    /// Builder pattern: add consumed amount
    pub fn with_consumed(mut self, consumed: f64) -> Self {
        self.consumed = Some(consumed);
        self
    }

    pub fn is_for(&self, provider_id: &str, year: i32, month: u32) -> bool {
        self.provider_id == provider_id && self.year == year && self.month == month
    }

    pub fn has_service_type(&self, service_type: &str) -> bool {
        self.service_type.trim().eq_ignore_ascii_case(service_type.trim())
    }
}

/// Negative, NaN or infinite amounts are treated as zero
pub fn sanitize_amount(amount: f64) -> f64 {
    if amount.is_finite() && amount > 0.0 {
        amount
    } else {
        0.0
    }
}

// ============================================================================
// MERGED ALLOCATION
// ============================================================================

/// Combined view of one provider's allocations for one month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedAllocation {
    pub provider_id: String,
    pub year: i32,
    pub month: u32,
    pub service_types: Vec<String>,
    pub allocated: f64,
    pub consumed: Option<f64>,
    pub sources: Vec<String>,
}

impl MergedAllocation {
    /// Share of the quota still unspent, None when it cannot be computed
    /// (unknown consumption, or nothing allocated)
    pub fn remaining_ratio(&self) -> Option<f64> {
        let allocated = sanitize_amount(self.allocated);
        if allocated <= 0.0 {
            return None;
        }
        let consumed = sanitize_amount(self.consumed?);
        Some((allocated - consumed) / allocated)
    }

    pub fn remaining(&self) -> Option<f64> {
        self.consumed
            .map(|consumed| sanitize_amount(self.allocated) - sanitize_amount(consumed))
    }
}

impl From<&FundAllocation> for MergedAllocation {
    fn from(allocation: &FundAllocation) -> Self {
        MergedAllocation {
            provider_id: allocation.provider_id.clone(),
            year: allocation.year,
            month: allocation.month,
            service_types: vec![allocation.service_type.clone()],
            allocated: sanitize_amount(allocation.allocated),
            consumed: allocation.consumed.map(sanitize_amount),
            sources: vec![allocation.source.clone()],
        }
    }
}

/// Merge a provider's allocations for one month
///
/// `service_type = None` merges every service type. Returns None when no
/// allocation matches.
pub fn merge_allocations(
    allocations: &[FundAllocation],
    provider_id: &str,
    year: i32,
    month: u32,
    service_type: Option<&str>,
) -> Option<MergedAllocation> {
    let group: Vec<&FundAllocation> = allocations
        .iter()
        .filter(|a| a.is_for(provider_id, year, month))
        .filter(|a| service_type.map_or(true, |s| a.has_service_type(s)))
        .collect();

    if group.is_empty() {
        return None;
    }

    let allocated = group.iter().map(|a| sanitize_amount(a.allocated)).sum();
    let consumed = group
        .iter()
        .map(|a| a.consumed.map(sanitize_amount))
        .sum::<Option<f64>>();

    let mut service_types: Vec<String> = Vec::new();
    let mut sources: Vec<String> = Vec::new();
    for a in &group {
        if !service_types.contains(&a.service_type) {
            service_types.push(a.service_type.clone());
        }
        if !sources.contains(&a.source) {
            sources.push(a.source.clone());
        }
    }

    Some(MergedAllocation {
        provider_id: provider_id.to_string(),
        year,
        month,
        service_types,
        allocated,
        consumed,
        sources,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn allocations() -> Vec<FundAllocation> {
        vec![
            FundAllocation::new("p1", 2025, 3, "clinic", 10000.0, "cas.csv").with_consumed(4000.0),
            FundAllocation::new("p1", 2025, 3, "paraclinic", 5000.0, "cas.csv").with_consumed(1000.0),
            FundAllocation::new("p1", 2025, 4, "clinic", 9000.0, "cas.csv"),
            FundAllocation::new("p2", 2025, 3, "clinic", 7000.0, "cas.csv"),
        ]
    }

    #[test]
    fn test_merge_sums_all_service_types() {
        let merged = merge_allocations(&allocations(), "p1", 2025, 3, None).unwrap();

        assert_eq!(merged.allocated, 15000.0);
        assert_eq!(merged.consumed, Some(5000.0));
        assert_eq!(merged.service_types, vec!["clinic", "paraclinic"]);
        assert_eq!(merged.sources, vec!["cas.csv"]);
    }

    #[test]
    fn test_merge_consumed_unknown_if_any_member_lacks_it() {
        let mut rows = allocations();
        rows.push(FundAllocation::new("p1", 2025, 3, "recuperare", 2000.0, "other.csv"));

        let merged = merge_allocations(&rows, "p1", 2025, 3, None).unwrap();

        assert_eq!(merged.allocated, 17000.0);
        assert_eq!(merged.consumed, None);
        assert_eq!(merged.remaining_ratio(), None);
    }

    #[test]
    fn test_merge_single_service_type() {
        let merged = merge_allocations(&allocations(), "p1", 2025, 3, Some(" Paraclinic ")).unwrap();

        assert_eq!(merged.allocated, 5000.0);
        assert_eq!(merged.remaining_ratio(), Some(0.8));
    }

    #[test]
    fn test_merge_no_match() {
        assert!(merge_allocations(&allocations(), "p3", 2025, 3, None).is_none());
        assert!(merge_allocations(&allocations(), "p1", 2024, 3, None).is_none());
        assert!(merge_allocations(&allocations(), "p1", 2025, 3, Some("dental")).is_none());
    }

    #[test]
    fn test_negative_amounts_clamped() {
        let rows = vec![
            FundAllocation::new("p1", 2025, 3, "clinic", -500.0, "bad.csv").with_consumed(-10.0),
            FundAllocation::new("p1", 2025, 3, "paraclinic", 1000.0, "cas.csv").with_consumed(f64::NAN),
        ];

        let merged = merge_allocations(&rows, "p1", 2025, 3, None).unwrap();
        assert_eq!(merged.allocated, 1000.0);
        assert_eq!(merged.consumed, Some(0.0));
        assert_eq!(merged.remaining_ratio(), Some(1.0));
    }

    #[test]
    fn test_remaining_ratio_guards_zero_allocation() {
        let merged = MergedAllocation::from(
            &FundAllocation::new("p1", 2025, 3, "clinic", 0.0, "cas.csv").with_consumed(0.0),
        );
        assert_eq!(merged.remaining_ratio(), None);
    }

    #[test]
    fn test_remaining_can_go_negative() {
        let merged = MergedAllocation::from(
            &FundAllocation::new("p1", 2025, 3, "clinic", 1000.0, "cas.csv").with_consumed(1200.0),
        );
        assert_eq!(merged.remaining(), Some(-200.0));
        assert_eq!(merged.remaining_ratio(), Some(-0.2));
    }
}
