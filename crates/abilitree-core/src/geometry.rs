//! Tier/column grid quantization.
//!
//! Converts continuous pixel positions (the reference point of a dragged
//! node) into discrete `(tier, column)` cells and back. Everything here is a
//! pure function of its inputs; there is no state and no knowledge of a
//! tree's tier count. Clamping a tier against the tree is the caller's job
//! (see [`clamp_tier`]).
//!
//! # Rounding rules
//!
//! - **Tier**: `tier = max(1, floor(y / tier_height) + 1)`. The quotient is
//!   floored, so a point exactly on the line between rows `k` and `k + 1`
//!   (that is, `y == k * tier_height`) belongs to tier `k + 1`. Anything
//!   above the first line, negatives included, is tier 1.
//! - **Column**: `column = round((x - origin_x) / column_width)` with ties
//!   rounded up, toward positive infinity: `+0.5 -> 1`, `-0.5 -> 0`,
//!   `-1.5 -> -1`. This is `floor(q + 0.5)`, computed from the fractional
//!   part so that quotients just below a half never tip over.
//!
//! The canonical placement of a cell is `x = origin_x + column * column_width`
//! and `y = (tier - 0.5) * tier_height` (the vertical center of the row), so
//! snapping a canonical placement again always reproduces the same cell.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A raw pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The result of snapping a position: the discrete cell and the pixel
/// position of that cell's canonical placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellPlacement {
    pub tier: u32,
    pub column: i32,
    pub snapped: Position,
}

/// Invalid static grid parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("tier height must be finite and positive, got {0}")]
    TierHeight(f64),
    #[error("column width must be finite and positive, got {0}")]
    ColumnWidth(f64),
    #[error("grid origin must be finite, got {0}")]
    Origin(f64),
    #[error("tier count must be at least 1, got {0}")]
    TierCount(i64),
    #[error("position ({x}, {y}) is not a finite point")]
    NonFinitePosition { x: f64, y: f64 },
}

/// Validated grid parameters shared by every snap in a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridConfig {
    tier_height: f64,
    column_width: f64,
    origin_x: f64,
}

impl GridConfig {
    /// Validate and build a grid configuration.
    pub fn new(
        tier_height: f64,
        column_width: f64,
        origin_x: f64,
    ) -> Result<Self, ConfigurationError> {
        validate(tier_height, column_width, origin_x)?;
        Ok(Self {
            tier_height,
            column_width,
            origin_x,
        })
    }

    pub fn tier_height(&self) -> f64 {
        self.tier_height
    }

    pub fn column_width(&self) -> f64 {
        self.column_width
    }

    pub fn origin_x(&self) -> f64 {
        self.origin_x
    }

    /// Snap a raw position to its cell. Only fails on non-finite input.
    pub fn snap(&self, position: Position) -> Result<CellPlacement, ConfigurationError> {
        snap_to_cell(position, self.tier_height, self.column_width, self.origin_x)
    }

    /// Tier containing the given vertical coordinate.
    pub fn tier_of(&self, y: f64) -> u32 {
        tier_index(y, self.tier_height)
    }

    /// Column containing the given horizontal coordinate.
    pub fn column_of(&self, x: f64) -> i32 {
        column_index(x, self.column_width, self.origin_x)
    }

    /// Canonical pixel position of a cell.
    pub fn placement(&self, tier: u32, column: i32) -> Position {
        Position::new(
            column_x(column, self.column_width, self.origin_x),
            tier_center(tier, self.tier_height),
        )
    }

    /// Top and bottom lines of a tier, for drawing the grid.
    pub fn tier_bounds(&self, tier: u32) -> (f64, f64) {
        tier_bounds_unchecked(tier, self.tier_height)
    }
}

/// 180px rows, 150px columns, column 0 at x = 0.
impl Default for GridConfig {
    fn default() -> Self {
        Self {
            tier_height: 180.0,
            column_width: 150.0,
            origin_x: 0.0,
        }
    }
}

impl<'de> Deserialize<'de> for GridConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct GridData {
            tier_height: f64,
            column_width: f64,
            #[serde(default)]
            origin_x: f64,
        }

        let data = GridData::deserialize(deserializer)?;
        GridConfig::new(data.tier_height, data.column_width, data.origin_x)
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Snap a raw position to the grid.
///
/// Returns the tier (>= 1), the column, and the canonical pixel position of
/// that cell. See the module docs for the exact rounding rules.
pub fn snap_to_cell(
    position: Position,
    tier_height: f64,
    column_width: f64,
    origin_x: f64,
) -> Result<CellPlacement, ConfigurationError> {
    validate(tier_height, column_width, origin_x)?;
    if !position.x.is_finite() || !position.y.is_finite() {
        return Err(ConfigurationError::NonFinitePosition {
            x: position.x,
            y: position.y,
        });
    }

    let tier = tier_index(position.y, tier_height);
    let column = column_index(position.x, column_width, origin_x);
    Ok(CellPlacement {
        tier,
        column,
        snapped: Position::new(
            column_x(column, column_width, origin_x),
            tier_center(tier, tier_height),
        ),
    })
}

/// Canonical vertical position of a tier: the row's center line.
///
/// This is the `y` that [`snap_to_cell`] produces for the tier, and snapping
/// it again yields the same tier.
pub fn cell_origin(tier: u32, tier_height: f64) -> Result<f64, ConfigurationError> {
    validate_tier_height(tier_height)?;
    Ok(tier_center(tier.max(1), tier_height))
}

/// Top and bottom pixel lines of a tier.
pub fn tier_bounds(tier: u32, tier_height: f64) -> Result<(f64, f64), ConfigurationError> {
    validate_tier_height(tier_height)?;
    Ok(tier_bounds_unchecked(tier.max(1), tier_height))
}

/// Clamp a snapped tier into `[1, tier_count]`.
pub fn clamp_tier(tier: u32, tier_count: u32) -> u32 {
    tier.clamp(1, tier_count.max(1))
}

/// Validate a signed tier count coming from user input or a data file.
pub fn validate_tier_count(tier_count: i64) -> Result<u32, ConfigurationError> {
    if tier_count < 1 || tier_count > i64::from(u32::MAX) {
        return Err(ConfigurationError::TierCount(tier_count));
    }
    Ok(tier_count as u32)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn validate(tier_height: f64, column_width: f64, origin_x: f64) -> Result<(), ConfigurationError> {
    validate_tier_height(tier_height)?;
    if !column_width.is_finite() || column_width <= 0.0 {
        return Err(ConfigurationError::ColumnWidth(column_width));
    }
    if !origin_x.is_finite() {
        return Err(ConfigurationError::Origin(origin_x));
    }
    Ok(())
}

fn validate_tier_height(tier_height: f64) -> Result<(), ConfigurationError> {
    if !tier_height.is_finite() || tier_height <= 0.0 {
        return Err(ConfigurationError::TierHeight(tier_height));
    }
    Ok(())
}

fn tier_index(y: f64, tier_height: f64) -> u32 {
    let row = (y / tier_height).floor() + 1.0;
    if row < 1.0 {
        1
    } else if row >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        row as u32
    }
}

fn column_index(x: f64, column_width: f64, origin_x: f64) -> i32 {
    let quotient = (x - origin_x) / column_width;
    let below = quotient.floor();
    let column = if quotient - below >= 0.5 { below + 1.0 } else { below };
    // Saturating cast: columns far off-canvas pin to the i32 range.
    column as i32
}

fn column_x(column: i32, column_width: f64, origin_x: f64) -> f64 {
    origin_x + f64::from(column) * column_width
}

fn tier_center(tier: u32, tier_height: f64) -> f64 {
    (f64::from(tier) - 0.5) * tier_height
}

fn tier_bounds_unchecked(tier: u32, tier_height: f64) -> (f64, f64) {
    let top = f64::from(tier.saturating_sub(1)) * tier_height;
    (top, top + tier_height)
}
