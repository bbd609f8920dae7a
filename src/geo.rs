use std::collections::HashMap;
use std::path::Path;

use crate::model::{City, Coordinates};

/// Bundled city → coordinates table.
const BUNDLED_COORDINATES: &str = include_str!("../assets/city_coordinates.json");

/// Name → coordinate lookup. Unknown names are "no coordinates", not errors.
pub trait CoordinateLookup: Send + Sync {
    fn coordinates(&self, city_name: &str) -> Option<Coordinates>;
}

/// Static table keyed by exact city display name.
#[derive(Debug, Clone, Default)]
pub struct CoordinateTable {
    entries: HashMap<String, Coordinates>,
}

impl CoordinateTable {
    pub fn new(entries: HashMap<String, Coordinates>) -> Self {
        Self { entries }
    }

    /// The table shipped in `assets/city_coordinates.json`.
    pub fn bundled() -> serde_json::Result<Self> {
        Self::from_json(BUNDLED_COORDINATES)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(std::io::Error::other)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CoordinateLookup for CoordinateTable {
    fn coordinates(&self, city_name: &str) -> Option<Coordinates> {
        self.entries.get(city_name).copied()
    }
}

/// Lookup that knows no city.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCoordinates;

impl CoordinateLookup for NoCoordinates {
    fn coordinates(&self, _city_name: &str) -> Option<Coordinates> {
        None
    }
}

/// Copy of `cities` with coordinates attached by exact name. Unmatched
/// names end up with `None`, never a placeholder location.
pub fn attach_geocoordinates(cities: &[City], lookup: &dyn CoordinateLookup) -> Vec<City> {
    cities
        .iter()
        .map(|city| City {
            coordinates: lookup.coordinates(&city.name),
            ..city.clone()
        })
        .collect()
}
