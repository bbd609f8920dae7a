use serde::{Deserialize, Serialize};

/// Primary/foreign key type for every record set.
pub type Id = i64;

/// City name that stands for "no city constraint".
pub const ALL_CITIES: &str = "All";

/// Default number of bins in the price histogram.
pub const DEFAULT_HISTOGRAM_BINS: usize = 20;

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> ValueRange<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }

    /// False when `min > max`, or when either bound is unordered (NaN).
    pub fn is_ordered(&self) -> bool {
        self.min <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A single property listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Id,
    pub price: f64,
    pub nb_rooms: i64,
    pub num_bathrooms: i64,
    #[serde(default)]
    pub surface_area: Option<f64>,
    #[serde(default)]
    pub city_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: Id,
    pub name: String,
    /// Attached from the coordinate lookup, never read from the data source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amenity {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingAmenity {
    pub listing_id: Id,
    pub amenity_id: Id,
}

/// The four record sets, loaded once per session and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub listings: Vec<Listing>,
    pub cities: Vec<City>,
    #[serde(default)]
    pub amenities: Vec<Amenity>,
    #[serde(default)]
    pub listing_amenities: Vec<ListingAmenity>,
}

impl Snapshot {
    /// Global `[min, max]` price, or `(0, 0)` when there are no listings.
    pub fn price_bounds(&self) -> ValueRange<f64> {
        let mut prices = self.listings.iter().map(|l| l.price).filter(|p| !p.is_nan());
        let Some(first) = prices.next() else {
            return ValueRange::new(0.0, 0.0);
        };
        let (min, max) = prices.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        ValueRange::new(min, max)
    }

    pub fn room_bounds(&self) -> ValueRange<i64> {
        int_bounds(self.listings.iter().map(|l| l.nb_rooms))
    }

    pub fn bathroom_bounds(&self) -> ValueRange<i64> {
        int_bounds(self.listings.iter().map(|l| l.num_bathrooms))
    }
}

fn int_bounds(mut values: impl Iterator<Item = i64>) -> ValueRange<i64> {
    let Some(first) = values.next() else {
        return ValueRange::new(0, 0);
    };
    let (min, max) = values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    ValueRange::new(min, max)
}

/// The active user-chosen constraints for one recomputation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub price_range: ValueRange<f64>,
    pub room_range: ValueRange<i64>,
    pub bathroom_range: ValueRange<i64>,
    /// `None` or `"All"` disables the city clause.
    pub city_name: Option<String>,
    /// Empty disables the amenity clause; otherwise ANY of these qualifies.
    pub amenity_names: Vec<String>,
}

impl FilterSpec {
    /// Full-range spec: every listing in `snapshot` passes it.
    pub fn defaults_for(snapshot: &Snapshot) -> Self {
        Self {
            price_range: snapshot.price_bounds(),
            room_range: snapshot.room_bounds(),
            bathroom_range: snapshot.bathroom_bounds(),
            city_name: None,
            amenity_names: Vec::new(),
        }
    }

    /// The city name to match, if the city clause is active.
    pub fn city_constraint(&self) -> Option<&str> {
        self.city_name
            .as_deref()
            .filter(|name| *name != ALL_CITIES)
    }
}

// ── Projection result types ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityCount {
    pub city_id: Id,
    pub city_name: String,
    pub count: u64,
}

/// Count per city id over all listings; `city_name` is `None` when the id
/// matches no city.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityTally {
    pub city_id: Id,
    pub city_name: Option<String>,
    pub count: u64,
}

/// Histogram bin. Half-open `[lower, upper)`, except the last bin which
/// also holds `upper`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityPrice {
    pub city_name: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfacePrice {
    pub surface_area: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityMarker {
    pub city_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub count: u64,
}

/// Selectable values for the city and amenity widgets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    /// `"All"` first, then distinct city names in first-seen order.
    pub cities: Vec<String>,
    pub amenities: Vec<String>,
}

/// A projection result. `Empty` tells the caller to show an informational
/// message instead of a chart; it is not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum View<T> {
    Empty,
    Rows(Vec<T>),
}

impl<T> View<T> {
    pub fn from_rows(rows: Vec<T>) -> Self {
        if rows.is_empty() {
            View::Empty
        } else {
            View::Rows(rows)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, View::Empty)
    }

    pub fn rows(&self) -> &[T] {
        match self {
            View::Empty => &[],
            View::Rows(rows) => rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn into_rows(self) -> Vec<T> {
        match self {
            View::Empty => Vec::new(),
            View::Rows(rows) => rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: Id, price: f64, rooms: i64, baths: i64) -> Listing {
        Listing {
            id,
            price,
            nb_rooms: rooms,
            num_bathrooms: baths,
            surface_area: None,
            city_id: None,
        }
    }

    #[test]
    fn range_is_inclusive() {
        let r = ValueRange::new(10, 20);
        assert!(r.contains(10));
        assert!(r.contains(20));
        assert!(!r.contains(9));
        assert!(!r.contains(21));
    }

    #[test]
    fn range_ordering() {
        assert!(ValueRange::new(1.0, 1.0).is_ordered());
        assert!(!ValueRange::new(2.0, 1.0).is_ordered());
        assert!(!ValueRange::new(f64::NAN, 1.0).is_ordered());
    }

    #[test]
    fn snapshot_bounds() {
        let snapshot = Snapshot {
            listings: vec![
                listing(1, 250.0, 3, 1),
                listing(2, 90.5, 1, 2),
                listing(3, 1200.0, 6, 3),
            ],
            ..Default::default()
        };
        assert_eq!(snapshot.price_bounds(), ValueRange::new(90.5, 1200.0));
        assert_eq!(snapshot.room_bounds(), ValueRange::new(1, 6));
        assert_eq!(snapshot.bathroom_bounds(), ValueRange::new(1, 3));
    }

    #[test]
    fn empty_snapshot_bounds_are_zero() {
        let snapshot = Snapshot::default();
        assert_eq!(snapshot.price_bounds(), ValueRange::new(0.0, 0.0));
        assert_eq!(snapshot.room_bounds(), ValueRange::new(0, 0));
    }

    #[test]
    fn all_is_not_a_city_constraint() {
        let mut spec = FilterSpec::defaults_for(&Snapshot::default());
        assert_eq!(spec.city_constraint(), None);
        spec.city_name = Some(ALL_CITIES.into());
        assert_eq!(spec.city_constraint(), None);
        spec.city_name = Some("Rabat".into());
        assert_eq!(spec.city_constraint(), Some("Rabat"));
    }

    #[test]
    fn view_from_rows() {
        let empty: View<u32> = View::from_rows(vec![]);
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
        let rows = View::from_rows(vec![1, 2]);
        assert!(!rows.is_empty());
        assert_eq!(rows.rows(), &[1, 2]);
        assert_eq!(rows.into_rows(), vec![1, 2]);
    }

    #[test]
    fn snapshot_deserializes_without_optional_fields() {
        let json = r#"{
            "listings": [{"id": 1, "price": 100.0, "nb_rooms": 2, "num_bathrooms": 1}],
            "cities": [{"id": 1, "name": "Rabat"}]
        }"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.listings[0].surface_area, None);
        assert_eq!(snapshot.listings[0].city_id, None);
        assert!(snapshot.cities[0].coordinates.is_none());
        assert!(snapshot.amenities.is_empty());
    }
}
