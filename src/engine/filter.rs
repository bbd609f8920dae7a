use std::collections::HashSet;

use crate::model::*;

use super::EngineError;

/// Reject ranges the user can't have meant before any row is touched.
pub fn validate(spec: &FilterSpec) -> Result<(), EngineError> {
    if !spec.price_range.is_ordered() {
        return Err(EngineError::InvalidRange {
            field: "price",
            min: spec.price_range.min,
            max: spec.price_range.max,
        });
    }
    if !spec.room_range.is_ordered() {
        return Err(EngineError::InvalidRange {
            field: "nb_rooms",
            min: spec.room_range.min as f64,
            max: spec.room_range.max as f64,
        });
    }
    if !spec.bathroom_range.is_ordered() {
        return Err(EngineError::InvalidRange {
            field: "num_bathrooms",
            min: spec.bathroom_range.min as f64,
            max: spec.bathroom_range.max as f64,
        });
    }
    Ok(())
}

/// First city id (insertion order) whose name matches exactly.
///
/// Duplicate names are a known data-quality gap: later ids with the same
/// name are never selected.
pub fn resolve_city(cities: &[City], name: &str) -> Option<Id> {
    cities.iter().find(|c| c.name == name).map(|c| c.id)
}

/// Ids of listings carrying at least one of the named amenities.
/// Link rows pointing at unknown amenities simply never match.
pub fn listings_with_any_amenity(snapshot: &Snapshot, names: &[String]) -> HashSet<Id> {
    let amenity_ids: HashSet<Id> = snapshot
        .amenities
        .iter()
        .filter(|a| names.iter().any(|n| *n == a.name))
        .map(|a| a.id)
        .collect();
    snapshot
        .listing_amenities
        .iter()
        .filter(|link| amenity_ids.contains(&link.amenity_id))
        .map(|link| link.listing_id)
        .collect()
}

/// Retain listings satisfying every active constraint, in input order.
pub fn apply_filter(snapshot: &Snapshot, spec: &FilterSpec) -> Result<Vec<Listing>, EngineError> {
    validate(spec)?;

    // An unknown city name filters out everything rather than erroring.
    let city = match spec.city_constraint() {
        Some(name) => match resolve_city(&snapshot.cities, name) {
            Some(id) => Some(id),
            None => return Ok(Vec::new()),
        },
        None => None,
    };

    let amenity_listings = if spec.amenity_names.is_empty() {
        None
    } else {
        Some(listings_with_any_amenity(snapshot, &spec.amenity_names))
    };

    Ok(snapshot
        .listings
        .iter()
        .filter(|l| {
            spec.price_range.contains(l.price)
                && spec.room_range.contains(l.nb_rooms)
                && spec.bathroom_range.contains(l.num_bathrooms)
        })
        .filter(|l| city.is_none_or(|id| l.city_id == Some(id)))
        .filter(|l| amenity_listings.as_ref().is_none_or(|ids| ids.contains(&l.id)))
        .cloned()
        .collect())
}

/// Distinct city and amenity names in first-seen order.
pub fn filter_options(snapshot: &Snapshot) -> FilterOptions {
    let mut seen = HashSet::new();
    let mut cities = vec![ALL_CITIES.to_string()];
    cities.extend(
        snapshot
            .cities
            .iter()
            .filter(|c| seen.insert(c.name.as_str()))
            .map(|c| c.name.clone()),
    );

    let mut seen = HashSet::new();
    let amenities = snapshot
        .amenities
        .iter()
        .filter(|a| seen.insert(a.name.as_str()))
        .map(|a| a.name.clone())
        .collect();

    FilterOptions { cities, amenities }
}
