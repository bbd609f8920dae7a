use serde::Serialize;

use crate::model::*;

use super::aggregate::*;
use super::filter::apply_filter;
use super::EngineError;

/// Every projection of one recomputation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub listings: View<Listing>,
    pub by_city: View<CityCount>,
    pub price_histogram: View<PriceBin>,
    pub price_by_city: View<CityPrice>,
    pub surface_vs_price: View<SurfacePrice>,
    pub city_map: View<CityMarker>,
}

impl Dashboard {
    /// True when the filter left nothing to show at all.
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

/// Filter once, then derive every projection from the filtered set.
pub fn recompute(
    snapshot: &Snapshot,
    spec: &FilterSpec,
    bin_count: usize,
) -> Result<Dashboard, EngineError> {
    let filtered = apply_filter(snapshot, spec)?;
    let by_city = aggregate_by_city(&filtered, &snapshot.cities);
    let city_map = city_map(&by_city, &snapshot.cities);

    Ok(Dashboard {
        by_city: View::from_rows(by_city),
        city_map: View::from_rows(city_map),
        price_histogram: View::from_rows(price_histogram(&filtered, bin_count)),
        price_by_city: View::from_rows(price_by_city(&filtered, &snapshot.cities)),
        surface_vs_price: View::from_rows(surface_vs_price(&filtered)),
        listings: View::from_rows(filtered),
    })
}
