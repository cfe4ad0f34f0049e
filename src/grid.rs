//! Spatial Grid Indexer
//!
//! Assigns checklists to cells of an equal-area hexagonal tessellation.
//! Coordinates are projected with a Lambert azimuthal equal-area projection
//! of a spherical Earth (authalic radius) centred on the study region, and
//! pointy-top hexagons are laid out on the projected plane so that adjacent
//! cell centres are `spacing_km` apart. Equal area on the plane means equal
//! area on the sphere.
//!
//! Assumes the study region stays well away from the antipode of the
//! projection centre; polar and antimeridian-crossing regions are not handled.

use serde::Serialize;

use crate::data::Observation;
use crate::error::{PipelineError, Result};

/// Authalic Earth radius (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0072;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Packed axial (q, r) hexagon coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CellId(pub u64);

impl CellId {
    fn pack(q: i32, r: i32) -> Self {
        CellId(((q as u32 as u64) << 32) | (r as u32 as u64))
    }

    /// Axial coordinates (q, r)
    pub fn axial(self) -> (i32, i32) {
        ((self.0 >> 32) as u32 as i32, self.0 as u32 as i32)
    }
}

/// Time bucket used for stratification: (year, week of year)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimeBucket {
    pub year: i32,
    pub week: u32,
}

impl TimeBucket {
    pub fn of(observation: &Observation) -> Self {
        TimeBucket {
            year: observation.year(),
            week: observation.week(),
        }
    }
}

/// Hexagonal equal-area grid with a fixed centre spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HexGrid {
    spacing_km: f64,
    /// Hexagon circumradius = spacing / sqrt(3)
    size_km: f64,
    center_lat: f64,
    center_lon: f64,
    sin_lat0: f64,
    cos_lat0: f64,
}

impl HexGrid {
    /// Grid projected about (0, 0).
    pub fn new(spacing_km: f64) -> Result<Self> {
        Self::centered_at(spacing_km, 0.0, 0.0)
    }

    /// Grid projected about the given origin, normally the study-region centre.
    pub fn centered_at(spacing_km: f64, center_lat: f64, center_lon: f64) -> Result<Self> {
        if !(spacing_km.is_finite() && spacing_km > 0.0) {
            return Err(PipelineError::Config(format!(
                "grid spacing must be positive, got {}",
                spacing_km
            )));
        }
        if !(-90.0..=90.0).contains(&center_lat) || !(-180.0..=180.0).contains(&center_lon) {
            return Err(PipelineError::Config(format!(
                "grid centre ({}, {}) is not a valid coordinate",
                center_lat, center_lon
            )));
        }
        let lat0 = center_lat.to_radians();
        Ok(Self {
            spacing_km,
            size_km: spacing_km / SQRT_3,
            center_lat,
            center_lon,
            sin_lat0: lat0.sin(),
            cos_lat0: lat0.cos(),
        })
    }

    pub fn spacing_km(&self) -> f64 {
        self.spacing_km
    }

    pub fn center(&self) -> (f64, f64) {
        (self.center_lat, self.center_lon)
    }

    /// Cell containing (lat, lon). Pure and deterministic.
    pub fn cell_of(&self, lat: f64, lon: f64) -> CellId {
        let (x, y) = self.project(lat, lon);
        let q = (SQRT_3 / 3.0 * x - y / 3.0) / self.size_km;
        let r = (2.0 / 3.0 * y) / self.size_km;
        let (q, r) = cube_round(q, r);
        CellId::pack(q, r)
    }

    /// Centre of a cell as (lat, lon)
    pub fn cell_center(&self, cell: CellId) -> (f64, f64) {
        let (q, r) = cell.axial();
        let (q, r) = (f64::from(q), f64::from(r));
        let x = self.size_km * SQRT_3 * (q + r / 2.0);
        let y = self.size_km * 1.5 * r;
        self.unproject(x, y)
    }

    /// Lambert azimuthal equal-area forward projection (km)
    fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let dlambda = (lon - self.center_lon).to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let cos_dl = dlambda.cos();

        let denom = 1.0 + self.sin_lat0 * sin_phi + self.cos_lat0 * cos_phi * cos_dl;
        // Antipode of the centre is a singularity; clamp keeps it finite.
        let k = (2.0 / denom.max(f64::EPSILON)).sqrt();

        let x = EARTH_RADIUS_KM * k * cos_phi * dlambda.sin();
        let y = EARTH_RADIUS_KM * k * (self.cos_lat0 * sin_phi - self.sin_lat0 * cos_phi * cos_dl);
        (x, y)
    }

    /// Inverse projection back to (lat, lon)
    fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        let rho = x.hypot(y);
        if rho < 1e-12 {
            return (self.center_lat, self.center_lon);
        }
        let c = 2.0 * libm::asin((rho / (2.0 * EARTH_RADIUS_KM)).min(1.0));
        let (sin_c, cos_c) = c.sin_cos();

        let lat = libm::asin(cos_c * self.sin_lat0 + y * sin_c * self.cos_lat0 / rho);
        let lon = self.center_lon.to_radians()
            + libm::atan2(
                x * sin_c,
                rho * self.cos_lat0 * cos_c - y * self.sin_lat0 * sin_c,
            );
        (lat.to_degrees(), normalize_lon(lon.to_degrees()))
    }
}

fn normalize_lon(lon: f64) -> f64 {
    let mut lon = (lon + 180.0) % 360.0;
    if lon < 0.0 {
        lon += 360.0;
    }
    lon - 180.0
}

/// Round fractional axial coordinates to the containing hexagon
fn cube_round(q: f64, r: f64) -> (i32, i32) {
    let s = -q - r;
    let mut rq = q.round();
    let mut rr = r.round();
    let rs = s.round();

    let dq = (rq - q).abs();
    let dr = (rr - r).abs();
    let ds = (rs - s).abs();

    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }
    (rq as i32, rr as i32)
}

/// Great-circle (haversine) distance in km
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * libm::asin(a.sqrt().min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_cell_id_packing() {
        for (q, r) in [(0, 0), (-1, 5), (123_456, -98_765), (i32::MIN, i32::MAX)] {
            assert_eq!(CellId::pack(q, r).axial(), (q, r));
        }
    }

    #[test]
    fn test_cell_of_is_deterministic() {
        let grid = HexGrid::centered_at(5.0, 42.5, -76.5).unwrap();
        let a = grid.cell_of(42.4321, -76.1234);
        let b = grid.cell_of(42.4321, -76.1234);
        assert_eq!(a, b);

        let copy = HexGrid::centered_at(5.0, 42.5, -76.5).unwrap();
        assert_eq!(copy.cell_of(42.4321, -76.1234), a);
    }

    #[test]
    fn test_adjacent_centres_are_spacing_apart() {
        let grid = HexGrid::centered_at(5.0, 42.5, -76.5).unwrap();
        let origin = grid.cell_of(42.5, -76.5);
        let (q, r) = origin.axial();
        let (lat0, lon0) = grid.cell_center(origin);

        for (dq, dr) in [(1, 0), (0, 1), (-1, 1), (-1, 0), (0, -1), (1, -1)] {
            let neighbour = CellId::pack(q + dq, r + dr);
            let (lat, lon) = grid.cell_center(neighbour);
            assert_relative_eq!(haversine_km(lat0, lon0, lat, lon), 5.0, epsilon = 0.01);
        }
    }

    #[test]
    fn test_centre_maps_back_to_own_cell() {
        let grid = HexGrid::centered_at(3.0, 10.0, 20.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let lat = rng.gen_range(9.0..11.0);
            let lon = rng.gen_range(19.0..21.0);
            let cell = grid.cell_of(lat, lon);
            let (clat, clon) = grid.cell_center(cell);
            assert_eq!(grid.cell_of(clat, clon), cell);
        }
    }

    #[test]
    fn test_points_in_same_cell_are_close() {
        let spacing = 5.0;
        let grid = HexGrid::centered_at(spacing, 42.5, -76.5).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let points: Vec<(f64, f64, CellId)> = (0..2000)
            .map(|_| {
                let lat = rng.gen_range(42.0..43.0);
                let lon = rng.gen_range(-77.0..-76.0);
                (lat, lon, grid.cell_of(lat, lon))
            })
            .collect();

        // Hexagon diameter is 2 * spacing / sqrt(3) ~ 1.155 * spacing
        let bound = spacing * 2.0 / SQRT_3 * 1.01;
        let mut shared = 0;
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                let (a, b) = (points[i], points[j]);
                if a.2 == b.2 {
                    shared += 1;
                    assert!(haversine_km(a.0, a.1, b.0, b.1) <= bound);
                }
            }
        }
        assert!(shared > 0);
    }

    #[test]
    fn test_rejects_invalid_spacing() {
        assert!(HexGrid::new(0.0).is_err());
        assert!(HexGrid::new(-5.0).is_err());
        assert!(HexGrid::new(f64::NAN).is_err());
        assert!(HexGrid::centered_at(5.0, 95.0, 0.0).is_err());
    }
}
