//! Synthetic tile locators.
//!
//! A locator binds a reader to one specific query without re-deriving it:
//!
//! ```text
//! sqlite://<path>?query=<percent-encoded SQL>&width=<px>&height=<px>
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::LocatorError;

/// Scheme prefix of every locator.
pub const LOCATOR_SCHEME: &str = "sqlite://";

/// A parsed tile locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLocator {
    /// Backing store path
    pub path: PathBuf,

    /// SQL returning `tile_data` and optionally `tile_alpha`
    pub sql: String,

    /// Output width in pixels
    pub width: u32,

    /// Output height in pixels
    pub height: u32,
}

impl TileLocator {
    pub fn new(path: impl AsRef<Path>, sql: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sql: sql.into(),
            width,
            height,
        }
    }

    /// Parse a locator string.
    pub fn parse(locator: &str) -> Result<Self, LocatorError> {
        let rest = locator
            .strip_prefix(LOCATOR_SCHEME)
            .ok_or_else(|| LocatorError::Scheme(scheme_of(locator)))?;

        // The SQL is percent-encoded, so the last '?' separates the path.
        let (path, params) = rest.rsplit_once('?').ok_or(LocatorError::Missing("query"))?;
        if path.is_empty() {
            return Err(LocatorError::Missing("path"));
        }

        let mut sql = None;
        let mut width = None;
        let mut height = None;
        for pair in params.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "query" => {
                    let decoded =
                        urlencoding::decode(value).map_err(|e| LocatorError::Invalid {
                            name: "query",
                            message: e.to_string(),
                        })?;
                    sql = Some(decoded.into_owned());
                }
                "width" => width = Some(parse_dimension("width", value)?),
                "height" => height = Some(parse_dimension("height", value)?),
                _ => {}
            }
        }

        let sql = sql
            .filter(|s| !s.trim().is_empty())
            .ok_or(LocatorError::Missing("query"))?;
        Ok(Self {
            path: PathBuf::from(path),
            sql,
            width: width.ok_or(LocatorError::Missing("width"))?,
            height: height.ok_or(LocatorError::Missing("height"))?,
        })
    }
}

impl fmt::Display for TileLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}?query={}&width={}&height={}",
            LOCATOR_SCHEME,
            self.path.display(),
            urlencoding::encode(&self.sql),
            self.width,
            self.height
        )
    }
}

impl std::str::FromStr for TileLocator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_dimension(name: &'static str, value: &str) -> Result<u32, LocatorError> {
    match value.parse::<u32>() {
        Ok(0) => Err(LocatorError::Invalid {
            name,
            message: "must be greater than zero".to_string(),
        }),
        Ok(v) => Ok(v),
        Err(e) => Err(LocatorError::Invalid {
            name,
            message: e.to_string(),
        }),
    }
}

fn scheme_of(locator: &str) -> String {
    match locator.find("://") {
        Some(end) => locator[..end].to_string(),
        None => locator.to_string(),
    }
}
