use thiserror::Error;

/// Errors raised while opening or querying a tile store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The database could not be opened
    #[error("Failed to open tile store {path}: {message}")]
    Open { path: String, message: String },

    /// A query against an open store failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Metadata or schema reads failed on a store that looked valid
    #[error("Corrupt tile store {path}: {message}")]
    Corrupt { path: String, message: String },

    /// The store opened but holds no readable tile matrix
    #[error("No tile matrix in {path}")]
    NoDescriptor { path: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

/// Per-tile read failures.
///
/// None of these are fatal to the shared store; callers may retry with a
/// different address or zoom level.
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    /// No row exists for the requested address
    #[error("Tile not found: zoom {zoom}, column {column}, row {row}")]
    NotFound { zoom: u8, column: u32, row: u32 },

    /// The blob exists but could not be decoded
    #[error("Failed to decode tile: {message}")]
    DecodeFailure { message: String },

    /// A decoded tile could not be written out as an image file
    #[error("Failed to encode tile: {message}")]
    EncodeFailure { message: String },

    /// The source rectangle or destination size is unusable
    #[error("Invalid read region: {message}")]
    InvalidRegion { message: String },

    /// The underlying query failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors produced when parsing a tile locator string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    /// The locator does not start with the expected scheme
    #[error("Unsupported locator scheme: {0}")]
    Scheme(String),

    /// A required component is missing
    #[error("Locator is missing '{0}'")]
    Missing(&'static str),

    /// A component is present but malformed
    #[error("Invalid locator component '{name}': {message}")]
    Invalid { name: &'static str, message: String },
}
