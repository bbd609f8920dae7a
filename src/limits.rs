/// Maximum number of live dashboard sessions.
pub const MAX_SESSIONS: usize = 64;

/// Maximum length of a session (database) name.
pub const MAX_SESSION_NAME_LEN: usize = 63;

/// Upper bound for `bins = N` on the price histogram.
pub const MAX_HISTOGRAM_BINS: usize = 1000;

/// Maximum number of amenity names in one filter.
pub const MAX_AMENITY_FILTERS: usize = 256;
