use crate::error::MapError;
use geo::{Coord, LineString, Polygon, Rect};
use std::collections::HashMap;

/// Identifier -> value, `None` where the table cell was empty or non-numeric.
pub type ValueMap = HashMap<String, Option<f64>>;

/// One shapefile record: all ring vertices back to back, plus the index at
/// which each ring starts.
#[derive(Debug, Clone)]
pub struct GeometryRecord {
    pub id: String,
    pub points: Vec<Coord<f64>>,
    pub parts: Vec<usize>,
}

impl GeometryRecord {
    pub fn new(id: impl Into<String>, points: Vec<Coord<f64>>, parts: Vec<usize>) -> Self {
        Self {
            id: id.into(),
            points,
            parts,
        }
    }

    /// Splits the record into its rings. Empty rings (repeated offsets) are
    /// skipped and out-of-range offsets are clamped to the point count.
    pub fn rings(&self) -> Vec<&[Coord<f64>]> {
        let len = self.points.len();
        let mut rings = Vec::with_capacity(self.parts.len());

        for (i, &start) in self.parts.iter().enumerate() {
            let end = self.parts.get(i + 1).copied().unwrap_or(len);
            let start = start.min(len);
            let end = end.min(len);
            if start < end {
                rings.push(&self.points[start..end]);
            }
        }

        rings
    }

    /// Each ring with at least three vertices as a closed polygon.
    pub fn polygons(&self) -> Vec<Polygon<f64>> {
        self.rings()
            .into_iter()
            .filter(|ring| ring.len() >= 3)
            .map(|ring| Polygon::new(LineString::from(ring.to_vec()), Vec::new()))
            .collect()
    }
}

/// Visible map bounds in source coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Viewport {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, MapError> {
        let viewport = Self {
            west,
            south,
            east,
            north,
        };
        viewport.validate()?;
        Ok(viewport)
    }

    pub fn validate(&self) -> Result<(), MapError> {
        let ordered = self.west < self.east && self.south < self.north;
        let finite = [self.west, self.south, self.east, self.north]
            .iter()
            .all(|v| v.is_finite());
        if ordered && finite {
            Ok(())
        } else {
            Err(MapError::InvalidViewport {
                west: self.west,
                south: self.south,
                east: self.east,
                north: self.north,
            })
        }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }
}
