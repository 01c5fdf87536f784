//! Mercator projection into the unit square.
//!
//! The spatial index works in normalized coordinates regardless of zoom, so
//! every latitude/longitude is projected once on the way in. The projection
//! is monotonic in both axes: longitude grows x eastward and latitude shrinks
//! y northward, so rectangular viewport queries stay rectangular.

use crate::types::GeoBounds;
use geo::{Coord, Rect, coord};
use std::f64::consts::PI;

/// Latitude clamp for the Web Mercator projection.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Project a latitude/longitude pair into the unit square.
///
/// `x` runs west to east over `[0, 1]`; `y` runs north to south over
/// `[0, 1]`. Latitudes beyond the Mercator limit are clamped.
pub fn project(lat: f64, lng: f64) -> Coord<f64> {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = (lng + 180.0) / 360.0;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
    coord! { x: x, y: y }
}

/// Project geographic bounds into a normalized rectangle.
///
/// `geo::Rect::new` orders the corners itself, so the north/south y-flip of
/// the projection needs no special handling here.
pub fn project_bounds(bounds: &GeoBounds) -> Rect<f64> {
    Rect::new(
        project(bounds.south, bounds.west),
        project(bounds.north, bounds.east),
    )
}

/// The unit square covered by the projection.
pub fn unit_rect() -> Rect<f64> {
    Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 })
}

/// Grow a normalized rectangle by `radius` on every side, clamped to the
/// unit square.
pub fn rect_around(center: Coord<f64>, radius: f64) -> Rect<f64> {
    Rect::new(
        coord! { x: (center.x - radius).max(0.0), y: (center.y - radius).max(0.0) },
        coord! { x: (center.x + radius).min(1.0), y: (center.y + radius).min(1.0) },
    )
}

/// Euclidean distance between two normalized coordinates.
pub fn normalized_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}
