//! Where snapshots come from.
//!
//! The engine never talks to a data store itself: a [`DataSource`] hands
//! it a fully materialized [`Snapshot`] once per session.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, error, info};

use crate::model::*;

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self) -> Result<Snapshot, SourceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

// ── Postgres ─────────────────────────────────────────────────────

const LISTINGS_SQL: &str = r#"SELECT id::int8, price::float8, nb_rooms::int8, num_bathrooms::int8,
       surface_area::float8, city_id::int8
FROM "Annonce" ORDER BY id"#;
const CITIES_SQL: &str = r#"SELECT id::int8, name_ville FROM "Ville" ORDER BY id"#;
const AMENITIES_SQL: &str = r#"SELECT id::int8, name_equipement FROM "Equipement" ORDER BY id"#;
const LINKS_SQL: &str =
    r#"SELECT "Annonce_id"::int8, equipement_id::int8 FROM "Annonce_Equipement""#;

/// Reads the four dashboard tables over a fresh connection per load.
pub struct PostgresSource {
    url: String,
}

impl PostgresSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl DataSource for PostgresSource {
    async fn load(&self) -> Result<Snapshot, SourceError> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("data source connection error: {e}");
            }
        });

        let listings = client
            .query(LISTINGS_SQL, &[])
            .await
            .map_err(query_err("Annonce"))?
            .iter()
            .map(listing_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let cities = client
            .query(CITIES_SQL, &[])
            .await
            .map_err(query_err("Ville"))?
            .iter()
            .map(|row| {
                Ok(City {
                    id: column(row, 0)?,
                    name: column(row, 1)?,
                    coordinates: None,
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?;
        let amenities = client
            .query(AMENITIES_SQL, &[])
            .await
            .map_err(query_err("Equipement"))?
            .iter()
            .map(|row| {
                Ok(Amenity {
                    id: column(row, 0)?,
                    name: column(row, 1)?,
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?;
        let listing_amenities = client
            .query(LINKS_SQL, &[])
            .await
            .map_err(query_err("Annonce_Equipement"))?
            .iter()
            .map(|row| {
                Ok(ListingAmenity {
                    listing_id: column(row, 0)?,
                    amenity_id: column(row, 1)?,
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?;

        debug!(
            listings = listings.len(),
            cities = cities.len(),
            amenities = amenities.len(),
            links = listing_amenities.len(),
            "postgres snapshot loaded"
        );
        Ok(Snapshot {
            listings,
            cities,
            amenities,
            listing_amenities,
        })
    }

    fn describe(&self) -> String {
        // Keep credentials out of logs.
        match self.url.rsplit_once('@') {
            Some((_, host)) => format!("postgres://…@{host}"),
            None => "postgres".to_string(),
        }
    }
}

fn listing_from_row(row: &Row) -> Result<Listing, SourceError> {
    Ok(Listing {
        id: column(row, 0)?,
        price: column(row, 1)?,
        nb_rooms: column(row, 2)?,
        num_bathrooms: column(row, 3)?,
        surface_area: column(row, 4)?,
        city_id: column(row, 5)?,
    })
}

fn column<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a Row,
    idx: usize,
) -> Result<T, SourceError> {
    row.try_get(idx)
        .map_err(|e| SourceError::Decode(format!("column {idx}: {e}")))
}

fn query_err(table: &'static str) -> impl Fn(tokio_postgres::Error) -> SourceError {
    move |e| SourceError::Query(format!("{table}: {e}"))
}

// ── JSON fixture ─────────────────────────────────────────────────

/// Reads a JSON-serialized [`Snapshot`] from disk on every load.
pub struct FixtureSource {
    path: PathBuf,
}

impl FixtureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for FixtureSource {
    async fn load(&self) -> Result<Snapshot, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SourceError::Io(format!("{}: {e}", self.path.display())))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::Decode(format!("{}: {e}", self.path.display())))?;
        info!(
            "fixture {} loaded: {} listings",
            self.path.display(),
            snapshot.listings.len()
        );
        Ok(snapshot)
    }

    fn describe(&self) -> String {
        format!("fixture {}", self.path.display())
    }
}

// ── In-memory ────────────────────────────────────────────────────

/// Hands out clones of a snapshot built in process (tests, benches).
pub struct MemorySource {
    snapshot: Snapshot,
}

impl MemorySource {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn load(&self) -> Result<Snapshot, SourceError> {
        Ok(self.snapshot.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    Connect(String),
    Query(String),
    Io(String),
    Decode(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Connect(e) => write!(f, "data source connect error: {e}"),
            SourceError::Query(e) => write!(f, "data source query error: {e}"),
            SourceError::Io(e) => write!(f, "data source io error: {e}"),
            SourceError::Decode(e) => write!(f, "data source decode error: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}
