//! Schema detection for tile stores.
//!
//! A database is a tile store when its `tiles` table has exactly one of the
//! accepted column sets:
//!
//! - **Basic**: `zoom_level, tile_column, tile_row, tile_data`
//! - **With alpha**: the basic columns plus a `tile_alpha` side-channel
//!
//! Anything else is "not a tile store". That is a probe outcome, not an
//! error: the caller is expected to try another format.

use std::collections::BTreeSet;

use rusqlite::Connection;

// =============================================================================
// TileSchema
// =============================================================================

/// Detected layout of the `tiles` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSchema {
    /// `zoom_level, tile_column, tile_row, tile_data`
    Basic,

    /// Basic columns plus `tile_alpha`
    WithAlpha,
}

impl TileSchema {
    /// Get a human-readable name for the schema.
    pub const fn name(&self) -> &'static str {
        match self {
            TileSchema::Basic => "MBTiles",
            TileSchema::WithAlpha => "MBTiles with alpha channel",
        }
    }

    pub const fn has_alpha(&self) -> bool {
        matches!(self, TileSchema::WithAlpha)
    }
}

// =============================================================================
// Detection
// =============================================================================

const BASIC_COLUMNS: [&str; 4] = ["zoom_level", "tile_column", "tile_row", "tile_data"];

const ALPHA_COLUMN: &str = "tile_alpha";

/// Detect the tile schema of an open database.
///
/// # Returns
/// * `Ok(Some(schema))` - The `tiles` table matches an accepted column set
/// * `Ok(None)` - No `tiles` table, or its columns match neither set
/// * `Err(_)` - The schema could not be read
pub fn detect_schema(conn: &Connection) -> Result<Option<TileSchema>, rusqlite::Error> {
    let columns = table_columns(conn, "tiles")?;
    Ok(classify_columns(&columns))
}

/// Classify a set of lowercase column names.
pub fn classify_columns(columns: &BTreeSet<String>) -> Option<TileSchema> {
    let basic: BTreeSet<String> = BASIC_COLUMNS.iter().map(|c| c.to_string()).collect();
    if *columns == basic {
        return Some(TileSchema::Basic);
    }

    let mut with_alpha = basic;
    with_alpha.insert(ALPHA_COLUMN.to_string());
    if *columns == with_alpha {
        return Some(TileSchema::WithAlpha);
    }

    None
}

/// Returns true if `table` exists.
pub fn has_table(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Lowercased column names of `table`; empty when the table does not exist.
fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let names = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .map(|name| name.map(|n| n.to_ascii_lowercase()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(names)
}

// =============================================================================
// Tests
// =============================================================================
