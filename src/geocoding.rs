// 📍 Geocoding - Fill provider coordinates through an external geocoder
//
// The geocoder itself (HTTP service, offline gazetteer) lives outside the
// crate. Existing coordinates are never overwritten.

use crate::entities::provider::{CanonicalProvider, GeoPoint, ProviderIndex};
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub trait Geocoder {
    /// Resolve a free-text address. Ok(None) when the address is not found.
    fn geocode(&self, query: &str) -> Result<Option<GeoPoint>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocodeSummary {
    pub attempted: usize,
    pub filled: usize,
    pub not_found: usize,
    pub failed: usize,

    /// Providers that received coordinates in this run
    pub filled_ids: Vec<String>,
}

/// "Str. Exemplu 10, Sector 2, Bucuresti"
pub fn geocode_query(provider: &CanonicalProvider) -> Option<String> {
    let address = provider.address.as_deref()?.trim();
    if address.is_empty() {
        return None;
    }
    match provider.city.as_deref().map(str::trim) {
        Some(city) if !city.is_empty() && !address.to_lowercase().contains(&city.to_lowercase()) => {
            Some(format!("{}, {}", address, city))
        }
        _ => Some(address.to_string()),
    }
}

fn is_valid(point: &GeoPoint) -> bool {
    point.lat.is_finite()
        && point.lng.is_finite()
        && (-90.0..=90.0).contains(&point.lat)
        && (-180.0..=180.0).contains(&point.lng)
}

/// Geocode providers that have an address but no coordinates
///
/// A failing lookup is counted and skipped; the run continues.
pub fn fill_missing_coordinates(index: &mut ProviderIndex, geocoder: &dyn Geocoder) -> GeocodeSummary {
    let mut summary = GeocodeSummary::default();

    for provider in index.providers_mut() {
        if provider.coordinates.is_some() {
            continue;
        }
        let Some(query) = geocode_query(provider) else {
            continue;
        };

        summary.attempted += 1;
        match geocoder.geocode(&query) {
            Ok(Some(point)) if is_valid(&point) => {
                provider.coordinates = Some(point);
                summary.filled += 1;
                summary.filled_ids.push(provider.id.clone());
            }
            Ok(Some(point)) => {
                tracing::warn!(provider_id = %provider.id, lat = point.lat, lng = point.lng, "geocoder returned invalid point");
                summary.not_found += 1;
            }
            Ok(None) => {
                tracing::debug!(provider_id = %provider.id, %query, "address not found");
                summary.not_found += 1;
            }
            Err(e) => {
                tracing::warn!(provider_id = %provider.id, error = %e, "geocoding failed");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        attempted = summary.attempted,
        filled = summary.filled,
        not_found = summary.not_found,
        failed = summary.failed,
        "geocoding finished"
    );
    summary
}

// ============================================================================
// TESTS
// ============================================================================
