//! Canonical request signatures.
//!
//! A signature is the search query string itself, built with a fixed key
//! order. Two requests with the same signature are the same request.

use std::fmt::Write as _;

use sensor_map_search_models::BoundingBox;

/// The visible map area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Map zoom level.
    pub zoom: i32,
    /// Visible rectangle in public coordinates.
    pub bbox: BoundingBox,
}

impl Viewport {
    /// A viewport at `zoom` showing `bbox`.
    #[must_use]
    pub const fn new(zoom: i32, bbox: BoundingBox) -> Self {
        Self { zoom, bbox }
    }
}

/// A requested time range in epoch milliseconds. `0` means unset on
/// either end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Lower bound, or `0`.
    pub from_ms: i64,
    /// Upper bound, or `0`.
    pub to_ms: i64,
}

impl TimeRange {
    /// No time range; the server picks its default window.
    pub const UNSET: Self = Self { from_ms: 0, to_ms: 0 };

    /// A range from `from_ms` to `to_ms`; pass `0` to leave an end open.
    #[must_use]
    pub const fn new(from_ms: i64, to_ms: i64) -> Self {
        Self { from_ms, to_ms }
    }

    /// The window of width `width_ms` centred on `cursor_ms`.
    #[must_use]
    pub const fn centred(cursor_ms: i64, width_ms: i64) -> Self {
        let half = width_ms / 2;
        Self {
            from_ms: cursor_ms.saturating_sub(half),
            to_ms: cursor_ms.saturating_add(half),
        }
    }
}

/// Builds the query string for a search.
///
/// Keys appear as `zoom, minlng, minlat, maxlng, maxlat`, followed by
/// `from_date` and `to_date` when they are not `0`.
#[must_use]
pub fn signature(viewport: &Viewport, range: TimeRange) -> String {
    let bbox = &viewport.bbox;
    let mut query = format!(
        "zoom={}&minlng={}&minlat={}&maxlng={}&maxlat={}",
        viewport.zoom, bbox.west, bbox.south, bbox.east, bbox.north
    );
    if range.from_ms != 0 {
        let _ = write!(query, "&from_date={}", range.from_ms);
    }
    if range.to_ms != 0 {
        let _ = write!(query, "&to_date={}", range.to_ms);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hessdalen() -> Viewport {
        Viewport::new(8, BoundingBox::new(10.0, 62.0, 11.0, 62.5))
    }

    #[test]
    fn fixed_key_order_without_dates() {
        assert_eq!(
            signature(&hessdalen(), TimeRange::UNSET),
            "zoom=8&minlng=10&minlat=62&maxlng=11&maxlat=62.5"
        );
    }

    #[test]
    fn dates_are_appended_when_set() {
        assert_eq!(
            signature(
                &hessdalen(),
                TimeRange::new(1_700_000_000_000, 1_700_050_000_000)
            ),
            "zoom=8&minlng=10&minlat=62&maxlng=11&maxlat=62.5\
             &from_date=1700000000000&to_date=1700050000000"
        );
        assert!(
            signature(&hessdalen(), TimeRange::new(0, 5))
                .ends_with("maxlat=62.5&to_date=5")
        );
    }

    #[test]
    fn centred_window_is_symmetric() {
        assert_eq!(TimeRange::centred(1_000, 200), TimeRange::new(900, 1_100));
    }
}
