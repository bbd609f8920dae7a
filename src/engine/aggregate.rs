use std::collections::{BTreeMap, HashMap};

use crate::model::*;

/// id → name, first row wins when ids repeat.
fn city_names(cities: &[City]) -> HashMap<Id, &str> {
    let mut names = HashMap::with_capacity(cities.len());
    for city in cities {
        names.entry(city.id).or_insert(city.name.as_str());
    }
    names
}

/// Listing counts per city, ordered by city id.
///
/// Inner join on the city side: listings with a null or unmatched
/// `city_id` are not counted here, so the sum can be below the number of
/// filtered listings.
pub fn aggregate_by_city(listings: &[Listing], cities: &[City]) -> Vec<CityCount> {
    let names = city_names(cities);
    let mut groups: BTreeMap<Id, u64> = BTreeMap::new();
    for city_id in listings.iter().filter_map(|l| l.city_id) {
        *groups.entry(city_id).or_default() += 1;
    }
    groups
        .into_iter()
        .filter_map(|(city_id, count)| {
            names.get(&city_id).map(|name| CityCount {
                city_id,
                city_name: (*name).to_string(),
                count,
            })
        })
        .collect()
}

/// Per-city counts over every listing. Listings without a city are not
/// counted; ids with no matching city keep a row with no name.
pub fn city_overview(listings: &[Listing], cities: &[City]) -> Vec<CityTally> {
    let names = city_names(cities);
    let mut groups: BTreeMap<Id, u64> = BTreeMap::new();
    for id in listings.iter().filter_map(|l| l.city_id) {
        *groups.entry(id).or_default() += 1;
    }

    groups
        .into_iter()
        .map(|(id, count)| CityTally {
            city_id: id,
            city_name: names.get(&id).map(|n| (*n).to_string()),
            count,
        })
        .collect()
}

/// Equal-width histogram over the observed price range.
pub fn price_histogram(listings: &[Listing], bin_count: usize) -> Vec<PriceBin> {
    let prices: Vec<f64> = listings
        .iter()
        .map(|l| l.price)
        .filter(|p| p.is_finite())
        .collect();
    if prices.is_empty() || bin_count == 0 {
        return Vec::new();
    }

    let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return vec![PriceBin {
            lower: min,
            upper: max,
            count: prices.len() as u64,
        }];
    }

    let width = (max - min) / bin_count as f64;
    let mut bins: Vec<PriceBin> = (0..bin_count)
        .map(|i| PriceBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bin_count {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();

    for price in prices {
        let idx = (((price - min) / width) as usize).min(bin_count - 1);
        bins[idx].count += 1;
    }
    bins
}

/// One `(city, price)` row per listing with a resolvable city.
pub fn price_by_city(listings: &[Listing], cities: &[City]) -> Vec<CityPrice> {
    let names = city_names(cities);
    listings
        .iter()
        .filter_map(|l| {
            let name = names.get(&l.city_id?)?;
            Some(CityPrice {
                city_name: (*name).to_string(),
                price: l.price,
            })
        })
        .collect()
}

/// Pairs for listings with a surface area; missing values are excluded,
/// never read as zero.
pub fn surface_vs_price(listings: &[Listing]) -> Vec<SurfacePrice> {
    listings
        .iter()
        .filter_map(|l| {
            let surface_area = l.surface_area?;
            (surface_area.is_finite() && l.price.is_finite()).then_some(SurfacePrice {
                surface_area,
                price: l.price,
            })
        })
        .collect()
}

/// Join per-city counts with geocoded cities. Cities without coordinates
/// are left off the map.
pub fn city_map(by_city: &[CityCount], cities: &[City]) -> Vec<CityMarker> {
    let mut coordinates: HashMap<Id, Option<Coordinates>> = HashMap::new();
    for city in cities {
        coordinates.entry(city.id).or_insert(city.coordinates);
    }
    by_city
        .iter()
        .filter_map(|row| {
            let c = coordinates.get(&row.city_id).copied().flatten()?;
            Some(CityMarker {
                city_name: row.city_name.clone(),
                latitude: c.latitude,
                longitude: c.longitude,
                count: row.count,
            })
        })
        .collect()
}
