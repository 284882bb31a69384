//! Address and district resolution for a finished route.
//!
//! The first and last point are reverse-geocoded concurrently. The street
//! comes from the start point (falling back to the end point), the house
//! number range spans both, and the district is looked up from the start
//! point's postal code in an ordered [`DistrictTable`].
//!
//! Resolution never fails: a lookup error only removes that point's
//! contribution. Results are tagged with the route version they were computed
//! for so callers can drop answers that arrive after the route changed again.

use std::future::Future;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::GeoPoint;

/// Reverse-geocoding service.
///
/// An `Err` and an empty [`AddressLookup`] are both treated as a failed lookup.
pub trait ReverseGeocoder: Send + Sync {
    fn lookup(&self, latitude: f64, longitude: f64) -> impl Future<Output = Result<AddressLookup>> + Send;
}

/// Raw answer of a reverse lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLookup {
    pub street_name: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
}

impl AddressLookup {
    /// True when no field carries usable text.
    pub fn is_empty(&self) -> bool {
        non_blank(&self.street_name).is_none()
            && non_blank(&self.house_number).is_none()
            && non_blank(&self.postal_code).is_none()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Derived address fields of a route. Empty strings mean "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct ResolvedLocation {
    pub street: String,
    pub district: String,
    pub house_number_range: String,
}

// ============================================================================
// District Table
// ============================================================================

/// One named postal-code range, bounds inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct DistrictRange {
    pub name: String,
    pub min: String,
    pub max: String,
}

impl DistrictRange {
    pub fn new(name: &str, min: &str, max: &str) -> Self {
        Self {
            name: name.to_string(),
            min: normalize_postal_code(min),
            max: normalize_postal_code(max),
        }
    }

    fn contains(&self, normalized_code: &str) -> bool {
        self.min.as_str() <= normalized_code && normalized_code <= self.max.as_str()
    }
}

/// Uppercase and strip all whitespace: `"8232 ab"` → `"8232AB"`.
pub fn normalize_postal_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Ordered postal-code range table.
///
/// Lookup returns the first entry containing the code, so overlapping ranges
/// must be listed most specific first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DistrictRange>", into = "Vec<DistrictRange>")]
pub struct DistrictTable {
    entries: Vec<DistrictRange>,
}

impl From<Vec<DistrictRange>> for DistrictTable {
    fn from(entries: Vec<DistrictRange>) -> Self {
        Self::new(entries)
    }
}

impl From<DistrictTable> for Vec<DistrictRange> {
    fn from(table: DistrictTable) -> Self {
        table.entries
    }
}

impl DistrictTable {
    pub fn new(entries: Vec<DistrictRange>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| DistrictRange::new(&e.name, &e.min, &e.max))
            .collect();
        Self { entries }
    }

    /// Parse a JSON array of `{ "name", "min", "max" }` objects.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CaptureError::Config(format!("invalid district table: {}", e)))
    }

    pub fn entries(&self) -> &[DistrictRange] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name of the first district whose range contains `postal_code`.
    pub fn lookup(&self, postal_code: &str) -> Option<&str> {
        let code = normalize_postal_code(postal_code);
        if code.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.contains(&code))
            .map(|e| e.name.as_str())
    }
}

impl Default for DistrictTable {
    /// Bundled table for the Lelystad survey area.
    fn default() -> Self {
        Self::new(vec![
            // Overrides inside the wider ranges below
            DistrictRange::new("Stadshart", "8232 AA", "8232 ZZ"),
            DistrictRange::new("Lelystad-Haven", "8221 AA", "8221 ZZ"),
            DistrictRange::new("Zuiderzeewijk", "8224 AA", "8224 ZZ"),
            DistrictRange::new("Atolwijk", "8222 AA", "8223 ZZ"),
            DistrictRange::new("Boswijk", "8225 AA", "8226 ZZ"),
            DistrictRange::new("Waterwijk", "8227 AA", "8229 ZZ"),
            DistrictRange::new("Bolderwijk", "8231 AA", "8231 ZZ"),
            DistrictRange::new("Punt van Warmenhuizen", "8233 AA", "8235 ZZ"),
            DistrictRange::new("Kustwijk", "8239 AA", "8239 ZZ"),
            DistrictRange::new("Warande", "8236 AA", "8238 ZZ"),
            DistrictRange::new("Lelystad-Buitengebied", "8200 AA", "8245 ZZ"),
        ])
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Route snapshot to resolve, tagged with the route version it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionRequest {
    pub version: u64,
    pub first: GeoPoint,
    pub last: GeoPoint,
}

impl ResolutionRequest {
    /// `None` for routes with fewer than two points.
    pub fn for_route(version: u64, points: &[GeoPoint]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        Some(Self {
            version,
            first: points[0],
            last: points[points.len() - 1],
        })
    }
}

/// Result of a [`ResolutionRequest`], carrying the same version tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub version: u64,
    pub location: ResolvedLocation,
}

/// Resolves street, house-number range and district for a route.
pub struct LocationResolver<G: ReverseGeocoder> {
    geocoder: G,
    districts: DistrictTable,
}

impl<G: ReverseGeocoder> LocationResolver<G> {
    pub fn new(geocoder: G, districts: DistrictTable) -> Self {
        Self { geocoder, districts }
    }

    pub fn districts(&self) -> &DistrictTable {
        &self.districts
    }

    /// Resolve derived address fields for a route. Below two points the
    /// result is empty and no lookups are issued.
    pub async fn resolve(&self, points: &[GeoPoint]) -> ResolvedLocation {
        match ResolutionRequest::for_route(0, points) {
            Some(request) => self.resolve_request(&request).await.location,
            None => ResolvedLocation::default(),
        }
    }

    /// Resolve a tagged request; the answer carries the request's version.
    pub async fn resolve_request(&self, request: &ResolutionRequest) -> Resolution {
        let (start, end) = futures::join!(
            self.lookup_point(&request.first, "start"),
            self.lookup_point(&request.last, "end"),
        );

        let location = self.combine(start.as_ref(), end.as_ref());
        debug!(
            "[LocationResolver] v{} resolved street='{}' houses='{}' district='{}'",
            request.version, location.street, location.house_number_range, location.district
        );

        Resolution { version: request.version, location }
    }

    async fn lookup_point(&self, point: &GeoPoint, label: &str) -> Option<AddressLookup> {
        match self.geocoder.lookup(point.latitude, point.longitude).await {
            Ok(found) if !found.is_empty() => Some(found),
            Ok(_) => {
                warn!(
                    "[LocationResolver] empty lookup for {} point ({:.5}, {:.5})",
                    label, point.latitude, point.longitude
                );
                None
            }
            Err(e) => {
                warn!("[LocationResolver] lookup for {} point failed: {}", label, e);
                None
            }
        }
    }

    fn combine(&self, start: Option<&AddressLookup>, end: Option<&AddressLookup>) -> ResolvedLocation {
        let street = start
            .and_then(|a| non_blank(&a.street_name))
            .or_else(|| end.and_then(|a| non_blank(&a.street_name)))
            .unwrap_or_default()
            .to_string();

        let first_number = start.and_then(|a| non_blank(&a.house_number));
        let last_number = end.and_then(|a| non_blank(&a.house_number));
        let house_number_range = match (first_number, last_number) {
            (Some(first), Some(last)) => format!("{}-{}", first, last),
            (Some(single), None) | (None, Some(single)) => single.to_string(),
            (None, None) => String::new(),
        };

        let district = start
            .and_then(|a| non_blank(&a.postal_code))
            .and_then(|code| self.districts.lookup(code))
            .unwrap_or_default()
            .to_string();

        ResolvedLocation { street, district, house_number_range }
    }
}
