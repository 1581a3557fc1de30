// Entity Models
//
// Each entity has:
// - Stable identity (UUID) derived from its normalized key
// - Registry for normalization and lookups

pub mod provider;
pub mod specialty;

pub use provider::{CanonicalProvider, GeoPoint, ProviderIndex, RawRecord};
pub use specialty::{CanonicalSpecialty, SpecialtyCategory, SpecialtyRegistry};
