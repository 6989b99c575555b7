pub mod canvas;

use std::io::Cursor;

use image::{codecs::png::PngEncoder, ColorType, DynamicImage, ImageEncoder, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Margin added around live station positions, in degrees.
pub const LIVE_PADDING: f64 = 0.001;

pub const ACTIVE_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const INACTIVE_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// A lon/lat rectangle, in the `[lonMin, lonMax, latMin, latMax]` order of
/// the town configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

impl BoundingBox {
    pub fn from_array([lon_min, lon_max, lat_min, lat_max]: [f64; 4]) -> Self {
        Self {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.lon_min, self.lon_max, self.lat_min, self.lat_max]
            .iter()
            .all(|v| v.is_finite())
            && self.lon_min < self.lon_max
            && self.lat_min < self.lat_max
    }

    /// Box around `(lat, lon, _)` positions, widened by `padding` and rounded
    /// to 4 decimals. `None` for an empty slice.
    pub fn around(coords: &[(f64, f64, bool)], padding: f64) -> Option<Self> {
        let (first, rest) = coords.split_first()?;
        let init = (first.0, first.0, first.1, first.1);
        let (lat_min, lat_max, lon_min, lon_max) =
            rest.iter()
                .fold(init, |(lat_lo, lat_hi, lon_lo, lon_hi), (lat, lon, _)| {
                    (
                        lat_lo.min(*lat),
                        lat_hi.max(*lat),
                        lon_lo.min(*lon),
                        lon_hi.max(*lon),
                    )
                });

        Some(Self {
            lon_min: round4(lon_min - padding),
            lon_max: round4(lon_max + padding),
            lat_min: round4(lat_min - padding),
            lat_max: round4(lat_max + padding),
        })
    }

    /// The four corners in map space, `(lon, lat)`, walking the outline.
    pub fn corners(&self) -> [[f64; 2]; 4] {
        [
            [self.lon_min, self.lat_min],
            [self.lon_min, self.lat_max],
            [self.lon_max, self.lat_max],
            [self.lon_max, self.lat_min],
        ]
    }

    /// Pixel position of a map-space point on a `width` x `height` canvas
    /// framed on this box. North is up.
    pub fn project(&self, lon: f64, lat: f64, width: u32, height: u32) -> (f64, f64) {
        let x = (lon - self.lon_min) / (self.lon_max - self.lon_min) * width as f64;
        let y = (self.lat_max - lat) / (self.lat_max - self.lat_min) * height as f64;
        (x, y)
    }
}

/// An in-memory render. Cloning duplicates the pixel buffer, which is how an
/// overlay starts from its base.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster(RgbaImage);

impl Raster {
    pub fn new(image: RgbaImage) -> Self {
        Self(image)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.0
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.0
    }

    pub fn to_png(&self) -> image::ImageResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        let encoder = PngEncoder::new(&mut cursor);
        encoder.write_image(
            self.0.as_raw(),
            self.0.width(),
            self.0.height(),
            ColorType::Rgba8.into(),
        )?;
        Ok(cursor.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPoint {
    pub lon: f64,
    pub lat: f64,
    pub color: Rgba<u8>,
}

/// Markers for live `(lat, lon, active)` positions. Active stations are
/// blue and inactive ones black, unless every station shares one state, in
/// which case all are blue.
pub fn station_points(coords: &[(f64, f64, bool)]) -> Vec<MapPoint> {
    let mixed = coords.iter().any(|c| c.2) && coords.iter().any(|c| !c.2);
    coords
        .iter()
        .map(|&(lat, lon, active)| MapPoint {
            lon,
            lat,
            color: if active || !mixed {
                ACTIVE_COLOR
            } else {
                INACTIVE_COLOR
            },
        })
        .collect()
}

pub trait MapRenderer: Send {
    /// Frames a town's static map on `extent` and draws the grid.
    fn render_base(&self, image: &DynamicImage, extent: &BoundingBox) -> Raster;

    /// Copy of `base` with one marker per point.
    fn scatter(&self, base: &Raster, extent: &BoundingBox, points: &[MapPoint]) -> Raster;

    /// Copy of `overlay` with a translucent filled polygon, its outline and
    /// vertex markers. `points` are `(lon, lat)`.
    fn polygon(&self, overlay: &Raster, extent: &BoundingBox, points: &[(f64, f64)]) -> Raster;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_around_pads_and_rounds() {
        let coords = [(45.75712, 4.83211, true), (45.76049, 4.85987, false)];
        let b = BoundingBox::around(&coords, LIVE_PADDING).unwrap();
        assert_eq!(
            b,
            BoundingBox {
                lon_min: 4.8311,
                lon_max: 4.8609,
                lat_min: 45.7561,
                lat_max: 45.7615,
            }
        );
        assert!(BoundingBox::around(&[], LIVE_PADDING).is_none());
    }

    #[test]
    fn test_corners_walk_the_outline() {
        let b = BoundingBox::from_array([4.8, 4.9, 45.7, 45.8]);
        assert_eq!(
            b.corners(),
            [[4.8, 45.7], [4.8, 45.8], [4.9, 45.8], [4.9, 45.7]]
        );
    }

    #[test]
    fn test_project() {
        let b = BoundingBox::from_array([0.0, 10.0, 0.0, 10.0]);
        assert_eq!(b.project(0.0, 10.0, 100, 50), (0.0, 0.0));
        assert_eq!(b.project(5.0, 5.0, 100, 50), (50.0, 25.0));
        assert!(!BoundingBox::from_array([1.0, 0.0, 0.0, 1.0]).is_valid());
    }

    #[test]
    fn test_station_points_palette() {
        let same = station_points(&[(0.0, 0.0, false), (1.0, 1.0, false)]);
        assert!(same.iter().all(|p| p.color == ACTIVE_COLOR));

        let mixed = station_points(&[(0.0, 1.0, true), (1.0, 2.0, false)]);
        assert_eq!(mixed[0].color, ACTIVE_COLOR);
        assert_eq!(mixed[1].color, INACTIVE_COLOR);
        assert_eq!((mixed[1].lon, mixed[1].lat), (2.0, 1.0));
    }

    #[test]
    fn test_png_encoding() {
        let raster = Raster::new(RgbaImage::new(4, 3));
        let png = raster.to_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }
}
