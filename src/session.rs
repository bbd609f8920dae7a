use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::info;

use crate::engine::{self, Dashboard, EngineError};
use crate::geo::{CoordinateLookup, attach_geocoordinates};
use crate::limits::*;
use crate::model::*;
use crate::source::{DataSource, SourceError};

/// One dashboard session: an immutable snapshot with coordinates attached.
#[derive(Debug)]
pub struct Session {
    name: String,
    snapshot: Snapshot,
}

impl Session {
    pub fn new(name: impl Into<String>, mut snapshot: Snapshot, coordinates: &dyn CoordinateLookup) -> Self {
        snapshot.cities = attach_geocoordinates(&snapshot.cities, coordinates);
        Self {
            name: name.into(),
            snapshot,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn default_filter(&self) -> FilterSpec {
        FilterSpec::defaults_for(&self.snapshot)
    }

    pub fn filter_options(&self) -> FilterOptions {
        engine::filter_options(&self.snapshot)
    }

    pub fn apply_filter(&self, spec: &FilterSpec) -> Result<Vec<Listing>, EngineError> {
        engine::apply_filter(&self.snapshot, spec)
    }

    pub fn recompute(&self, spec: &FilterSpec, bin_count: usize) -> Result<Dashboard, EngineError> {
        engine::recompute(&self.snapshot, spec, bin_count)
    }

    /// Unfiltered per-city counts, unmatched cities included.
    pub fn city_overview(&self) -> View<CityTally> {
        View::from_rows(engine::city_overview(&self.snapshot.listings, &self.snapshot.cities))
    }
}

/// Owns every live session. Session = database name from the pgwire
/// connection; each one holds its own snapshot, loaded on first use.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    source: Arc<dyn DataSource>,
    coordinates: Arc<dyn CoordinateLookup>,
}

impl SessionManager {
    pub fn new(source: Arc<dyn DataSource>, coordinates: Arc<dyn CoordinateLookup>) -> Self {
        Self {
            sessions: DashMap::new(),
            source,
            coordinates,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Get or lazily load the session for `name`.
    pub async fn get_or_load(&self, name: &str) -> Result<Arc<Session>, SessionError> {
        let safe_name = sanitize(name)?;
        if let Some(session) = self.sessions.get(&safe_name) {
            return Ok(session.value().clone());
        }
        if self.sessions.len() >= MAX_SESSIONS {
            return Err(SessionError::TooManySessions);
        }

        let session = self.load(&safe_name).await?;
        // Concurrent first loads of one name settle on whichever landed first.
        let session = self
            .sessions
            .entry(safe_name)
            .or_insert(session)
            .value()
            .clone();
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        Ok(session)
    }

    /// Replace the session's snapshot with a fresh load from the source.
    pub async fn reload(&self, name: &str) -> Result<Arc<Session>, SessionError> {
        let safe_name = sanitize(name)?;
        if !self.sessions.contains_key(&safe_name) && self.sessions.len() >= MAX_SESSIONS {
            return Err(SessionError::TooManySessions);
        }
        let session = self.load(&safe_name).await?;
        self.sessions.insert(safe_name, session.clone());
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        Ok(session)
    }

    async fn load(&self, name: &str) -> Result<Arc<Session>, SessionError> {
        let started = Instant::now();
        let snapshot = self.source.load().await?;
        metrics::histogram!(crate::observability::SNAPSHOT_LOAD_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        info!(
            "session {name}: loaded {} listings, {} cities, {} amenities from {}",
            snapshot.listings.len(),
            snapshot.cities.len(),
            snapshot.amenities.len(),
            self.source.describe()
        );
        Ok(Arc::new(Session::new(name, snapshot, self.coordinates.as_ref())))
    }
}

fn sanitize(name: &str) -> Result<String, SessionError> {
    if name.len() > MAX_SESSION_NAME_LEN {
        return Err(SessionError::InvalidName("session name too long"));
    }
    let safe_name: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe_name.is_empty() {
        return Err(SessionError::InvalidName("empty session name"));
    }
    Ok(safe_name)
}

#[derive(Debug)]
pub enum SessionError {
    Source(SourceError),
    InvalidName(&'static str),
    TooManySessions,
}

impl From<SourceError> for SessionError {
    fn from(e: SourceError) -> Self {
        SessionError::Source(e)
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Source(e) => write!(f, "{e}"),
            SessionError::InvalidName(msg) => write!(f, "invalid session name: {msg}"),
            SessionError::TooManySessions => write!(f, "too many sessions"),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::geo::{CoordinateTable, NoCoordinates};
    use crate::source::MemorySource;

    /// Returns a snapshot whose single listing id is the load counter.
    struct CountingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl DataSource for CountingSource {
        async fn load(&self) -> Result<Snapshot, SourceError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Snapshot {
                listings: vec![Listing {
                    id: n as Id,
                    price: 100.0,
                    nb_rooms: 1,
                    num_bathrooms: 1,
                    surface_area: None,
                    city_id: None,
                }],
                ..Default::default()
            })
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    struct FailingSource;

    #[async_trait]
    impl DataSource for FailingSource {
        async fn load(&self) -> Result<Snapshot, SourceError> {
            Err(SourceError::Connect("refused".into()))
        }

        fn describe(&self) -> String {
            "failing".into()
        }
    }

    fn counting_manager() -> (SessionManager, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        (SessionManager::new(source.clone(), Arc::new(NoCoordinates)), source)
    }

    fn sample() -> Snapshot {
        Snapshot {
            listings: vec![Listing {
                id: 1,
                price: 100.0,
                nb_rooms: 2,
                num_bathrooms: 1,
                surface_area: None,
                city_id: Some(1),
            }],
            cities: vec![
                City {
                    id: 1,
                    name: "Rabat".into(),
                    coordinates: None,
                },
                City {
                    id: 2,
                    name: "Atlantis".into(),
                    coordinates: None,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn session_attaches_coordinates() {
        let table = CoordinateTable::bundled().unwrap();
        let session = Session::new("main", sample(), &table);
        let cities = &session.snapshot().cities;
        assert!(cities[0].coordinates.is_some());
        assert!(cities[1].coordinates.is_none());
        assert_eq!(session.name(), "main");
    }

    #[test]
    fn session_recompute_uses_defaults() {
        let session = Session::new("main", sample(), &NoCoordinates);
        let dash = session
            .recompute(&session.default_filter(), DEFAULT_HISTOGRAM_BINS)
            .unwrap();
        assert_eq!(dash.listings.len(), 1);
        assert_eq!(session.filter_options().cities, vec!["All", "Rabat", "Atlantis"]);
        assert_eq!(session.city_overview().len(), 1);
    }

    #[tokio::test]
    async fn same_session_returned() {
        let (sm, source) = counting_manager();
        let a = sm.get_or_load("dash").await.unwrap();
        let b = sm.get_or_load("dash").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sessions_hold_independent_snapshots() {
        let (sm, _source) = counting_manager();
        let a = sm.get_or_load("alice").await.unwrap();
        let b = sm.get_or_load("bob").await.unwrap();
        assert_eq!(a.snapshot().listings[0].id, 1);
        assert_eq!(b.snapshot().listings[0].id, 2);
        assert_eq!(sm.session_count(), 2);
    }

    #[tokio::test]
    async fn reload_replaces_snapshot() {
        let (sm, _source) = counting_manager();
        let before = sm.get_or_load("dash").await.unwrap();
        let after = sm.reload("dash").await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.snapshot().listings[0].id, 2);
        let again = sm.get_or_load("dash").await.unwrap();
        assert!(Arc::ptr_eq(&after, &again));
        // the old snapshot is untouched for whoever still holds it
        assert_eq!(before.snapshot().listings[0].id, 1);
    }

    #[tokio::test]
    async fn name_sanitized() {
        let (sm, _source) = counting_manager();
        let session = sm.get_or_load("../evil").await.unwrap();
        assert_eq!(session.name(), "evil");
        assert!(matches!(
            sm.get_or_load("../..").await,
            Err(SessionError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn names_that_sanitize_alike_share_a_session() {
        let (sm, source) = counting_manager();
        let raw = sm.get_or_load("../evil").await.unwrap();
        let clean = sm.get_or_load("evil").await.unwrap();
        assert!(Arc::ptr_eq(&raw, &clean));
        assert_eq!(sm.session_count(), 1);
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        let reloaded = sm.reload("evil/").await.unwrap();
        assert!(Arc::ptr_eq(&reloaded, &sm.get_or_load("../evil").await.unwrap()));
        assert_eq!(sm.session_count(), 1);
    }

    #[tokio::test]
    async fn name_too_long() {
        let (sm, _source) = counting_manager();
        let long_name = "x".repeat(MAX_SESSION_NAME_LEN + 1);
        let err = sm.get_or_load(&long_name).await.unwrap_err();
        assert!(err.to_string().contains("session name too long"));
        assert!(sm.get_or_load(&"x".repeat(MAX_SESSION_NAME_LEN)).await.is_ok());
    }

    #[tokio::test]
    async fn session_count_limit() {
        let sm = SessionManager::new(
            Arc::new(MemorySource::new(Snapshot::default())),
            Arc::new(NoCoordinates),
        );
        for i in 0..MAX_SESSIONS {
            sm.get_or_load(&format!("s{i}")).await.unwrap();
        }
        let err = sm.get_or_load("one_more").await.unwrap_err();
        assert!(matches!(err, SessionError::TooManySessions));
        // existing sessions are still served
        assert!(sm.get_or_load("s0").await.is_ok());
    }

    #[tokio::test]
    async fn source_failure_is_not_cached() {
        let sm = SessionManager::new(Arc::new(FailingSource), Arc::new(NoCoordinates));
        let err = sm.get_or_load("dash").await.unwrap_err();
        assert!(matches!(err, SessionError::Source(SourceError::Connect(_))));
        assert_eq!(sm.session_count(), 0);
    }
}
