use crate::error::MapError;
use crate::types::ValueMap;
use image::Rgba;

/// Normalized RGB, each channel in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        let channel = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgba([channel(self.r), channel(self.g), channel(self.b), 255])
    }
}

/// Fill for regions without a value.
pub const NO_DATA: Color = Color::new(1.0, 1.0, 1.0);

/// Black-to-pale-blue ramp. The green channel reaches 1/1.5 at t = 1.
pub fn gradient(t: f64) -> Color {
    Color::new(t / 3.0, t / 1.5, t)
}

/// Linear mapping of values onto [0, 1], rebuilt for every render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub min: f64,
    pub max: f64,
}

impl ColorScale {
    pub fn from_values(values: &ValueMap) -> Result<Self, MapError> {
        let mut present = values.values().filter_map(|v| *v).filter(|v| v.is_finite());
        let first = present.next().ok_or(MapError::EmptyDataset)?;
        let (min, max) = present.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        Ok(Self { min, max })
    }

    /// Position of `value` on the scale. A constant dataset maps to 0.
    pub fn normalize(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / range).clamp(0.0, 1.0)
    }

    pub fn color(&self, value: Option<f64>) -> Color {
        match value {
            Some(v) if v.is_finite() => gradient(self.normalize(v)),
            _ => NO_DATA,
        }
    }

    /// `count` evenly spaced values from min to max, inclusive.
    pub fn ticks(&self, count: usize) -> Vec<f64> {
        match count {
            0 => Vec::new(),
            1 => vec![self.min],
            _ => (0..count)
                .map(|i| self.min + (self.max - self.min) * i as f64 / (count - 1) as f64)
                .collect(),
        }
    }
}

pub fn hex_to_rgba(hex: &str) -> Option<Rgba<u8>> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Rgba([r, g, b, 255]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, Option<f64>)]) -> ValueMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn scale_ignores_missing_values() {
        let scale = ColorScale::from_values(&values(&[
            ("a", Some(10.0)),
            ("b", None),
            ("c", Some(30.0)),
        ]))
        .unwrap();
        assert_eq!(scale, ColorScale { min: 10.0, max: 30.0 });
    }

    #[test]
    fn all_missing_is_empty_dataset() {
        let err = ColorScale::from_values(&values(&[("a", None)])).unwrap_err();
        assert!(matches!(err, MapError::EmptyDataset));
        assert!(matches!(
            ColorScale::from_values(&ValueMap::new()),
            Err(MapError::EmptyDataset)
        ));
    }

    #[test]
    fn endpoints_of_gradient() {
        let scale = ColorScale { min: 10.0, max: 30.0 };
        assert_eq!(scale.color(Some(10.0)), Color::new(0.0, 0.0, 0.0));
        assert_eq!(scale.color(Some(30.0)), Color::new(1.0 / 3.0, 1.0 / 1.5, 1.0));
        assert_eq!(scale.color(None), NO_DATA);
    }

    #[test]
    fn channels_stay_in_unit_range() {
        let scale = ColorScale { min: -5.0, max: 95.0 };
        for i in 0..=100 {
            let c = scale.color(Some(-5.0 + i as f64));
            for channel in [c.r, c.g, c.b] {
                assert!((0.0..=1.0).contains(&channel));
            }
        }
    }

    #[test]
    fn constant_dataset_maps_to_zero() {
        let scale = ColorScale::from_values(&values(&[("a", Some(4.0)), ("b", Some(4.0))])).unwrap();
        assert_eq!(scale.normalize(4.0), 0.0);
        assert_eq!(scale.color(Some(4.0)), gradient(0.0));
    }

    #[test]
    fn ticks_span_the_scale() {
        let scale = ColorScale { min: 0.0, max: 40.0 };
        assert_eq!(scale.ticks(5), vec![0.0, 10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn rgba_conversion_rounds() {
        assert_eq!(NO_DATA.to_rgba(), Rgba([255, 255, 255, 255]));
        assert_eq!(gradient(1.0).to_rgba(), Rgba([85, 170, 255, 255]));
        assert_eq!(hex_to_rgba("#31a354"), Some(Rgba([0x31, 0xa3, 0x54, 255])));
        assert_eq!(hex_to_rgba("nope"), None);
    }
}
