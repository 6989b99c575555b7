use image::{
    imageops::{self, FilterType},
    DynamicImage, Pixel, Rgba, RgbaImage,
};
use itertools::Itertools;

use crate::render::{BoundingBox, MapPoint, MapRenderer, Raster};

const GRID_COLOR: Rgba<u8> = Rgba([176, 176, 176, 150]);
const POLYGON_FILL: Rgba<u8> = Rgba([255, 0, 0, 51]);
const POLYGON_STROKE: Rgba<u8> = Rgba([255, 0, 0, 255]);
const MARKER_RADIUS: f64 = 2.0;
const CROSS_HALF_SIZE: i64 = 3;

/// Software renderer drawing straight into RGBA buffers of a fixed size.
pub struct ImageRenderer {
    width: u32,
    height: u32,
}

impl ImageRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

fn blend(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return;
    }
    img.get_pixel_mut(x as u32, y as u32).blend(&color);
}

/// Liang-Barsky clip of a segment to the canvas widened by one pixel on each
/// side. `None` when nothing of the segment is left.
fn clip(
    from: (f64, f64),
    to: (f64, f64),
    width: u32,
    height: u32,
) -> Option<((f64, f64), (f64, f64))> {
    let (w, h) = (width as f64, height as f64);
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    if ![from.0, from.1, dx, dy].iter().all(|v| v.is_finite()) {
        return None;
    }

    // cut points come from the edge itself, not from `from + t * d`, which
    // loses every significant digit when the far end is huge
    let cut = |edge: usize| match edge {
        0 => (-1.0, from.1 + (-1.0 - from.0) * dy / dx),
        1 => (w, from.1 + (w - from.0) * dy / dx),
        2 => (from.0 + (-1.0 - from.1) * dx / dy, -1.0),
        _ => (from.0 + (h - from.1) * dx / dy, h),
    };
    let edges = [
        (-dx, from.0 + 1.0),
        (dx, w - from.0),
        (-dy, from.1 + 1.0),
        (dy, h - from.1),
    ];

    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    let (mut start, mut end) = (from, to);
    for (edge, (p, q)) in edges.into_iter().enumerate() {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 && r > t0 {
            t0 = r;
            start = cut(edge);
        } else if p > 0.0 && r < t1 {
            t1 = r;
            end = cut(edge);
        }
        if t0 > t1 {
            return None;
        }
    }

    let clamp = |(x, y): (f64, f64)| (x.clamp(-1.0, w), y.clamp(-1.0, h));
    Some((clamp(start), clamp(end)))
}

fn on_canvas(img: &RgbaImage, (x, y): (f64, f64), margin: f64) -> bool {
    x.is_finite()
        && y.is_finite()
        && x > -margin
        && y > -margin
        && x < img.width() as f64 + margin
        && y < img.height() as f64 + margin
}

fn line(img: &mut RgbaImage, from: (f64, f64), to: (f64, f64), color: Rgba<u8>) {
    let Some((from, to)) = clip(from, to, img.width(), img.height()) else {
        return;
    };
    let (mut x0, mut y0) = (from.0.floor() as i64, from.1.floor() as i64);
    let (x1, y1) = (to.0.floor() as i64, to.1.floor() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        blend(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn disc(img: &mut RgbaImage, (cx, cy): (f64, f64), radius: f64, color: Rgba<u8>) {
    if !on_canvas(img, (cx, cy), radius + 1.0) {
        return;
    }
    let reach = radius.ceil() as i64;
    let (px, py) = (cx.floor() as i64, cy.floor() as i64);
    for y in (py - reach)..=(py + reach) {
        for x in (px - reach)..=(px + reach) {
            let (ddx, ddy) = (x as f64 + 0.5 - cx, y as f64 + 0.5 - cy);
            if ddx * ddx + ddy * ddy <= radius * radius {
                blend(img, x, y, color);
            }
        }
    }
}

fn cross(img: &mut RgbaImage, (cx, cy): (f64, f64), color: Rgba<u8>) {
    if !on_canvas(img, (cx, cy), CROSS_HALF_SIZE as f64 + 1.0) {
        return;
    }
    let (px, py) = (cx.floor() as i64, cy.floor() as i64);
    for d in -CROSS_HALF_SIZE..=CROSS_HALF_SIZE {
        blend(img, px + d, py + d, color);
        if d != 0 {
            blend(img, px + d, py - d, color);
        }
    }
}

/// Even-odd scanline fill, sampling pixel centres.
fn fill(img: &mut RgbaImage, vertices: &[(f64, f64)], color: Rgba<u8>) {
    if vertices.len() < 3 {
        return;
    }

    for y in 0..img.height() as i64 {
        let sy = y as f64 + 0.5;
        let mut crossings = vertices
            .iter()
            .circular_tuple_windows()
            .filter(|(a, b)| (a.1 <= sy) != (b.1 <= sy))
            .map(|(a, b)| a.0 + (sy - a.1) * (b.0 - a.0) / (b.1 - a.1))
            .collect::<Vec<_>>();
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            let start = (span[0] - 0.5).ceil() as i64;
            let end = (span[1] - 0.5).floor() as i64;
            for x in start.max(0)..=end.min(img.width() as i64 - 1) {
                blend(img, x, y, color);
            }
        }
    }
}

/// Tick spacing of roughly `span / 5`, snapped to 1, 2 or 5 times a power of
/// ten.
fn grid_step(span: f64) -> f64 {
    let raw = span / 5.0;
    let magnitude = 10f64.powf(raw.log10().floor());
    let residual = raw / magnitude;
    let nice = if residual < 1.5 {
        1.0
    } else if residual < 3.5 {
        2.0
    } else if residual < 7.5 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

fn grid_lines(min: f64, max: f64) -> Vec<f64> {
    let step = grid_step(max - min);
    let first = (min / step).ceil() as i64;
    let last = (max / step).floor() as i64;
    (first..=last).map(|i| i as f64 * step).collect()
}

impl MapRenderer for ImageRenderer {
    fn render_base(&self, image: &DynamicImage, extent: &BoundingBox) -> Raster {
        let mut canvas = imageops::resize(
            &image.to_rgba8(),
            self.width,
            self.height,
            FilterType::Triangle,
        );
        let (w, h) = (canvas.width(), canvas.height());

        for lon in grid_lines(extent.lon_min, extent.lon_max) {
            let (x, _) = extent.project(lon, extent.lat_max, w, h);
            line(&mut canvas, (x, 0.0), (x, h as f64 - 1.0), GRID_COLOR);
        }
        for lat in grid_lines(extent.lat_min, extent.lat_max) {
            let (_, y) = extent.project(extent.lon_min, lat, w, h);
            line(&mut canvas, (0.0, y), (w as f64 - 1.0, y), GRID_COLOR);
        }

        Raster::new(canvas)
    }

    fn scatter(&self, base: &Raster, extent: &BoundingBox, points: &[MapPoint]) -> Raster {
        let mut out = base.clone();
        let (w, h) = (out.image().width(), out.image().height());
        for p in points {
            let centre = extent.project(p.lon, p.lat, w, h);
            disc(out.image_mut(), centre, MARKER_RADIUS, p.color);
        }
        out
    }

    fn polygon(&self, overlay: &Raster, extent: &BoundingBox, points: &[(f64, f64)]) -> Raster {
        let mut out = overlay.clone();
        let (w, h) = (out.image().width(), out.image().height());
        let pixels = points
            .iter()
            .map(|&(lon, lat)| extent.project(lon, lat, w, h))
            .collect::<Vec<_>>();

        fill(out.image_mut(), &pixels, POLYGON_FILL);
        for (a, b) in pixels.iter().circular_tuple_windows() {
            line(out.image_mut(), *a, *b, POLYGON_STROKE);
        }
        for p in &pixels {
            cross(out.image_mut(), *p, POLYGON_STROKE);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ACTIVE_COLOR, INACTIVE_COLOR};

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn extent() -> BoundingBox {
        BoundingBox::from_array([0.0, 10.0, 0.0, 10.0])
    }

    fn white_base() -> Raster {
        Raster::new(RgbaImage::from_pixel(100, 100, WHITE))
    }

    #[test]
    fn test_render_base_resizes_and_draws_grid() {
        let renderer = ImageRenderer::new(100, 80);
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, WHITE));
        let base = renderer.render_base(&source, &extent());

        assert_eq!(base.image().dimensions(), (100, 80));
        // lon 2.0 is a grid line at x = 20
        let on_grid = *base.image().get_pixel(20, 40);
        let off_grid = *base.image().get_pixel(25, 45);
        assert!(off_grid[0] > 250);
        assert!(on_grid[0] < off_grid[0]);
    }

    #[test]
    fn test_scatter_leaves_base_untouched() {
        let renderer = ImageRenderer::new(100, 100);
        let base = white_base();
        let points = [
            MapPoint {
                lon: 5.0,
                lat: 5.0,
                color: ACTIVE_COLOR,
            },
            MapPoint {
                lon: 2.0,
                lat: 8.0,
                color: INACTIVE_COLOR,
            },
        ];
        let overlay = renderer.scatter(&base, &extent(), &points);

        assert_eq!(*overlay.image().get_pixel(50, 50), ACTIVE_COLOR);
        assert_eq!(*overlay.image().get_pixel(20, 20), INACTIVE_COLOR);
        assert_eq!(base, white_base());
    }

    #[test]
    fn test_polygon_is_translucent_inside_and_stroked() {
        let renderer = ImageRenderer::new(100, 100);
        let overlay = white_base();
        let square = [(2.0, 2.0), (2.0, 8.0), (8.0, 8.0), (8.0, 2.0)];
        let out = renderer.polygon(&overlay, &extent(), &square);

        let inside = *out.image().get_pixel(50, 50);
        assert_eq!(inside[0], 255);
        assert!(inside[1] < 255 && inside[1] > 150);
        assert_eq!(*out.image().get_pixel(5, 5), WHITE);
        assert_eq!(*out.image().get_pixel(20, 50), POLYGON_STROKE);
    }

    #[test]
    fn test_far_off_polygon_is_clipped() {
        let renderer = ImageRenderer::new(100, 100);
        let overlay = white_base();
        let shapes: [&[(f64, f64)]; 2] = [
            &[(1e300, 5.0), (-1e300, 5.0), (5.0, 8.0)],
            &[(1e9, 2.0), (8.0, 2.0), (5.0, 8.0)],
        ];

        for shape in shapes {
            let out = renderer.polygon(&overlay, &extent(), shape);
            assert_eq!(out.image().dimensions(), (100, 100));
            assert_ne!(out, overlay);
        }
        // lat 5 runs across the whole canvas at y = 50
        let out = renderer.polygon(&overlay, &extent(), shapes[0]);
        assert_eq!(*out.image().get_pixel(0, 50), POLYGON_STROKE);
        assert_eq!(*out.image().get_pixel(99, 50), POLYGON_STROKE);
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip((10.0, 10.0), (20.0, 20.0), 100, 100), Some(((10.0, 10.0), (20.0, 20.0))));
        assert_eq!(clip((-50.0, 10.0), (150.0, 10.0), 100, 100), Some(((-1.0, 10.0), (100.0, 10.0))));
        assert_eq!(clip((-50.0, -50.0), (-10.0, 200.0), 100, 100), None);
        assert_eq!(clip((f64::MAX, 0.0), (f64::MIN, 0.0), 100, 100), None);
    }

    #[test]
    fn test_scatter_skips_points_off_the_map() {
        let renderer = ImageRenderer::new(100, 100);
        let base = white_base();
        let points = [
            MapPoint {
                lon: 1e12,
                lat: -1e12,
                color: ACTIVE_COLOR,
            },
            MapPoint {
                lon: -3.0,
                lat: 5.0,
                color: INACTIVE_COLOR,
            },
        ];
        assert_eq!(renderer.scatter(&base, &extent(), &points), base);
    }

    #[test]
    fn test_grid_step() {
        assert!((grid_step(1.0) - 0.2).abs() < 1e-12);
        assert!((grid_step(0.03) - 0.005).abs() < 1e-12);
        assert_eq!(grid_lines(0.0, 10.0), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    }
}
