use std::sync::Arc;
use std::time::{Duration, Instant};

use listboard::engine;
use listboard::geo::CoordinateTable;
use listboard::model::{
    Amenity, City, DEFAULT_HISTOGRAM_BINS, FilterSpec, Listing, ListingAmenity, Snapshot, ValueRange,
};
use listboard::session::Session;

const CITIES: [&str; 8] = [
    "Rabat", "Fès", "Marrakech", "Casablanca", "Agadir", "Tanger", "Meknès", "Oujda",
];
const AMENITIES: [&str; 6] = ["Piscine", "Parking", "Jardin", "Ascenseur", "Terrasse", "Climatisation"];

/// Deterministic xorshift so runs are comparable.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn synthetic(listings: usize) -> Snapshot {
    let mut rng = Rng(0x9e37_79b9_7f4a_7c15);
    let cities: Vec<City> = CITIES
        .iter()
        .enumerate()
        .map(|(i, name)| City {
            id: i as i64 + 1,
            name: name.to_string(),
            coordinates: None,
        })
        .collect();
    let amenities: Vec<Amenity> = AMENITIES
        .iter()
        .enumerate()
        .map(|(i, name)| Amenity {
            id: i as i64 + 1,
            name: name.to_string(),
        })
        .collect();

    let mut rows = Vec::with_capacity(listings);
    let mut links = Vec::new();
    for id in 1..=listings as i64 {
        let rooms = 1 + rng.below(6) as i64;
        rows.push(Listing {
            id,
            price: 200_000.0 + rng.below(4_000_000) as f64,
            nb_rooms: rooms,
            num_bathrooms: 1 + rng.below(rooms as u64) as i64,
            surface_area: (rng.below(10) != 0).then(|| 30.0 + rng.below(300) as f64),
            city_id: (rng.below(20) != 0).then(|| 1 + rng.below(CITIES.len() as u64) as i64),
        });
        for amenity_id in 1..=AMENITIES.len() as i64 {
            if rng.below(3) == 0 {
                links.push(ListingAmenity {
                    listing_id: id,
                    amenity_id,
                });
            }
        }
    }

    Snapshot {
        listings: rows,
        cities,
        amenities,
        listing_amenities: links,
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn time_recompute(snapshot: &Snapshot, spec: &FilterSpec, iterations: usize) -> Vec<Duration> {
    (0..iterations)
        .map(|_| {
            let start = Instant::now();
            let dash = engine::recompute(snapshot, spec, DEFAULT_HISTOGRAM_BINS).unwrap();
            std::hint::black_box(&dash);
            start.elapsed()
        })
        .collect()
}

fn phase1_unfiltered(snapshot: &Snapshot) {
    let spec = FilterSpec::defaults_for(snapshot);
    let mut latencies = time_recompute(snapshot, &spec, 200);
    print_latency("default filter", &mut latencies);
}

fn phase2_filtered(snapshot: &Snapshot) {
    let mut spec = FilterSpec::defaults_for(snapshot);
    spec.price_range = ValueRange::new(500_000.0, 2_500_000.0);
    spec.room_range = ValueRange::new(2, 4);
    spec.city_name = Some("Rabat".into());
    spec.amenity_names = vec!["Piscine".into(), "Jardin".into()];
    let mut latencies = time_recompute(snapshot, &spec, 200);
    print_latency("city + amenities + ranges", &mut latencies);

    spec.price_range = ValueRange::new(1.0, 2.0);
    let mut latencies = time_recompute(snapshot, &spec, 200);
    print_latency("empty result", &mut latencies);
}

async fn phase3_concurrent(snapshot: Snapshot, tasks: usize, per_task: usize) {
    let coordinates = CoordinateTable::bundled().unwrap();
    let session = Arc::new(Session::new("bench", snapshot, &coordinates));

    let start = Instant::now();
    let mut handles = Vec::with_capacity(tasks);
    for t in 0..tasks {
        let session = session.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let mut spec = session.default_filter();
            spec.city_name = Some(CITIES[t % CITIES.len()].to_string());
            (0..per_task)
                .map(|_| {
                    let start = Instant::now();
                    std::hint::black_box(session.recompute(&spec, DEFAULT_HISTOGRAM_BINS).unwrap());
                    start.elapsed()
                })
                .collect::<Vec<_>>()
        }));
    }

    let mut latencies = Vec::new();
    for handle in handles {
        latencies.extend(handle.await.unwrap());
    }
    let elapsed = start.elapsed();
    println!(
        "  {} recomputes across {tasks} tasks in {:.2}s ({:.0}/s)",
        latencies.len(),
        elapsed.as_secs_f64(),
        latencies.len() as f64 / elapsed.as_secs_f64()
    );
    print_latency("per recompute", &mut latencies);
}

#[tokio::main]
async fn main() {
    let size: usize = std::env::var("LISTBOARD_BENCH_LISTINGS")
        .unwrap_or_else(|_| "50000".into())
        .parse()
        .expect("invalid LISTBOARD_BENCH_LISTINGS");

    println!("=== listboard recompute benchmark ===");
    let snapshot = synthetic(size);
    println!(
        "snapshot: {} listings, {} amenity links\n",
        snapshot.listings.len(),
        snapshot.listing_amenities.len()
    );

    println!("[phase 1] unfiltered recompute");
    phase1_unfiltered(&snapshot);

    println!("\n[phase 2] filtered recompute");
    phase2_filtered(&snapshot);

    println!("\n[phase 3] concurrent recompute on one session");
    phase3_concurrent(snapshot, 8, 50).await;

    println!("\n=== done ===");
}
