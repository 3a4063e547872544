// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::regions::RegionProperties;

/// An 8 bit per channel color.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Rgba{r, g, b, a}
    }

    /// Packs the color as 0xRRGGBBAA, reinterpreted as a signed 32 bit
    /// integer (the form image servers store shape colors in).
    pub fn to_signed_int(self) -> i32 {
        i32::from_be_bytes([self.r, self.g, self.b, self.a])
    }
}

pub const DEFAULT_FILL: Rgba = Rgba::new(10, 10, 10, 255);
pub const DEFAULT_STROKE: Rgba = Rgba::new(255, 255, 255, 255);
pub const DEFAULT_STROKE_WIDTH: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShapeKind {
    Point { x: f64, y: f64 },
    Line { x1: f64, y1: f64, x2: f64, y2: f64 },
    Rectangle { x: f64, y: f64, width: f64, height: f64 },
    Ellipse { x: f64, y: f64, radius_x: f64, radius_y: f64 },
    Polygon { points: Vec<(f64, f64)> },
    /// Bit mask anchored at (x, y); `bytes` holds `width * height` bits,
    /// row-major, most significant bit first.
    Mask { x: f64, y: f64, width: u32, height: u32, bytes: Vec<u8> },
}

/// A geometric ROI shape placed on one z plane and time point of an image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub kind: ShapeKind,
    pub z: u32,
    pub t: u32,
    pub name: Option<String>,
    pub fill: Option<Rgba>,
    pub stroke: Option<Rgba>,
    /// Stroke width in pixels.
    pub stroke_width: Option<f64>,
}

impl Shape {
    // Shapes other than masks carry both fill and stroke styling.
    fn styled(kind: ShapeKind, z: u32, t: u32) -> Shape {
        Shape{kind, z, t, name: None,
              fill: Some(DEFAULT_FILL),
              stroke: Some(DEFAULT_STROKE),
              stroke_width: Some(DEFAULT_STROKE_WIDTH)}
    }

    pub fn point(x: f64, y: f64, z: u32, t: u32) -> Shape {
        Shape::styled(ShapeKind::Point{x, y}, z, t)
    }

    pub fn line(x1: f64, y1: f64, x2: f64, y2: f64, z: u32, t: u32) -> Shape {
        Shape::styled(ShapeKind::Line{x1, y1, x2, y2}, z, t)
    }

    pub fn rectangle(x: f64, y: f64, width: f64, height: f64, z: u32, t: u32)
                     -> Shape {
        Shape::styled(ShapeKind::Rectangle{x, y, width, height}, z, t)
    }

    pub fn ellipse(x: f64, y: f64, radius_x: f64, radius_y: f64, z: u32, t: u32)
                   -> Shape {
        Shape::styled(ShapeKind::Ellipse{x, y, radius_x, radius_y}, z, t)
    }

    pub fn polygon(points: Vec<(f64, f64)>, z: u32, t: u32) -> Shape {
        Shape::styled(ShapeKind::Polygon{points}, z, t)
    }

    /// Mask shape from the nonzero pixels of `mask`. Masks have a fill color
    /// but no stroke.
    pub fn mask(mask: &GrayImage, x: f64, y: f64, z: u32, t: u32) -> Shape {
        let (width, height) = mask.dimensions();
        let bits: Vec<bool> = mask.as_raw().iter().map(|p| *p != 0).collect();
        Shape{kind: ShapeKind::Mask{x, y, width, height, bytes: pack_bits(&bits)},
              z, t, name: None, fill: Some(DEFAULT_FILL),
              stroke: None, stroke_width: None}
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Shape {
        self.name = Some(name.into());
        self
    }

    pub fn with_fill(mut self, fill: Rgba) -> Shape {
        self.fill = Some(fill);
        self
    }

    pub fn with_stroke(mut self, stroke: Rgba, width: f64) -> Shape {
        self.stroke = Some(stroke);
        self.stroke_width = Some(width);
        self
    }
}

/// Polygon vertices in the "x1,y1, x2,y2, ..." text form.
pub fn polygon_points_string(points: &[(f64, f64)]) -> String {
    points.iter().map(|(x, y)| format!("{},{}", x, y))
        .collect::<Vec<String>>().join(", ")
}

/// Packs booleans 8 to a byte, most significant bit first. The last byte is
/// zero padded.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8).map(|chunk| {
        chunk.iter().enumerate().fold(0_u8, |byte, (i, bit)| {
            if *bit { byte | (0x80 >> i) } else { byte }
        })
    }).collect()
}

/// One point shape per spot, placed on the plane nearest to the spot's
/// centroid and named after the channel and region label.
pub fn spot_shapes(regions: &[RegionProperties], channel: usize, t: u32,
                   color: Rgba) -> Vec<Shape> {
    regions.iter().map(|r| {
        let [x, y, z] = r.centroid;
        Shape::point(x, y, z.round().max(0.0) as u32, t)
            .with_name(format!("ch{}_spot{}", channel, r.label))
            .with_stroke(color, DEFAULT_STROKE_WIDTH)
    }).collect()
}

#[cfg(test)]
mod tests {
    use imageproc::gray_image;
    use super::*;

    #[test]
    fn test_rgba_to_signed_int() {
        assert_eq!(Rgba::new(0, 0, 0, 255).to_signed_int(), 255);
        assert_eq!(Rgba::new(0, 0, 1, 0).to_signed_int(), 256);
        // Red channel above 127 wraps to negative.
        assert_eq!(Rgba::new(255, 255, 255, 255).to_signed_int(), -1);
        assert_eq!(Rgba::new(255, 0, 0, 255).to_signed_int(),
                   (0xff0000ff_u32 as i64 - (1_i64 << 32)) as i32);
        assert_eq!(DEFAULT_FILL.to_signed_int(), 0x0a0a0aff);
    }

    #[test]
    fn test_default_styling() {
        let point = Shape::point(1.0, 2.0, 3, 0);
        assert_eq!(point.fill, Some(DEFAULT_FILL));
        assert_eq!(point.stroke, Some(DEFAULT_STROKE));
        assert_eq!(point.stroke_width, Some(1.0));
        assert_eq!(point.z, 3);

        let rect = Shape::rectangle(0.0, 0.0, 4.0, 5.0, 0, 1)
            .with_name("box").with_fill(Rgba::new(1, 2, 3, 4));
        assert_eq!(rect.name.as_deref(), Some("box"));
        assert_eq!(rect.fill, Some(Rgba::new(1, 2, 3, 4)));
        assert_eq!(rect.t, 1);
    }

    #[test]
    fn test_polygon_points_string() {
        assert_eq!(polygon_points_string(&[(1.0, 2.0), (3.5, 4.0), (5.0, 6.25)]),
                   "1,2, 3.5,4, 5,6.25");
        assert_eq!(polygon_points_string(&[]), "");
    }

    #[test]
    fn test_pack_bits() {
        let bits = [true, false, true, false, false, false, false, true,
                    true, true];
        assert_eq!(pack_bits(&bits), vec![0b1010_0001, 0b1100_0000]);
        assert!(pack_bits(&[]).is_empty());
    }

    #[test]
    fn test_mask_shape() {
        let mask = gray_image!(0, 255, 0; 1, 0, 0; 0, 0, 9);
        let shape = Shape::mask(&mask, 10.0, 20.0, 0, 0);
        match &shape.kind {
            ShapeKind::Mask{width, height, bytes, ..} => {
                assert_eq!((*width, *height), (3, 3));
                assert_eq!(bytes, &vec![0b0101_0000, 0b1000_0000]);
            },
            other => panic!("Expected mask, got {:?}", other),
        }
        assert!(shape.stroke.is_none());
        assert_eq!(shape.fill, Some(DEFAULT_FILL));
    }

    #[test]
    fn test_spot_shapes() {
        let region = RegionProperties{
            label: 4, area: 3, centroid: [5.0, 6.0, 2.6],
            weighted_centroid: [5.0, 6.0, 2.6],
            min_intensity: 1.0, mean_intensity: 2.0, max_intensity: 3.0};
        let shapes = spot_shapes(&[region], 1, 0, Rgba::new(255, 0, 0, 255));
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].kind, ShapeKind::Point{x: 5.0, y: 6.0});
        assert_eq!(shapes[0].z, 3);
        assert_eq!(shapes[0].name.as_deref(), Some("ch1_spot4"));
        assert_eq!(shapes[0].stroke, Some(Rgba::new(255, 0, 0, 255)));
    }
}  // mod tests.
