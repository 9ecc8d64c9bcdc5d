use crate::color::{gradient, hex_to_rgba, ColorScale};
use crate::config::StyleConfig;
use crate::error::MapError;
use crate::types::{GeometryRecord, ValueMap, Viewport};
use anyhow::{anyhow, Context, Result};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{BooleanOps, Coord, Intersects, MultiPolygon};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_polygon_mut,
    draw_text_mut, text_size,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Embedded font data - DejaVu Sans Mono, used when no font file is configured
const FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

const LEGEND_TICKS: usize = 5;
const TITLE_PT: f32 = 14.0;
const LABEL_PT: f32 = 10.0;

/// Resolved drawing parameters for one render.
#[derive(Clone)]
pub struct Style {
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: f32,
    pub aspect: f64,
    pub outline: Option<Rgba<u8>>,
    pub font: Font<'static>,
}

pub fn bundled_font() -> Result<Font<'static>> {
    Font::try_from_bytes(FONT_DATA).ok_or_else(|| anyhow!("Bundled font could not be parsed"))
}

impl Style {
    pub fn from_config(config: &StyleConfig) -> Result<Self> {
        let positive = config.dpi > 0.0
            && config.width_in > 0.0
            && config.height_in > 0.0
            && config.aspect > 0.0;
        if !positive {
            return Err(anyhow!(
                "style needs positive width_in, height_in, dpi and aspect (got {}, {}, {}, {})",
                config.width_in,
                config.height_in,
                config.dpi,
                config.aspect
            ));
        }

        let outline = match &config.outline {
            Some(hex) => Some(
                hex_to_rgba(hex).ok_or_else(|| anyhow!("Invalid outline colour: {}", hex))?,
            ),
            None => None,
        };

        let font = match &config.font {
            Some(path) => {
                let bytes = fs::read(path)
                    .with_context(|| format!("Failed to read font file: {:?}", path))?;
                Font::try_from_vec(bytes)
                    .ok_or_else(|| anyhow!("Not a usable TrueType font: {:?}", path))?
            }
            None => bundled_font()?,
        };

        Ok(Self {
            width_px: ((config.width_in * config.dpi).round() as u32).max(64),
            height_px: ((config.height_in * config.dpi).round() as u32).max(64),
            dpi: config.dpi,
            aspect: config.aspect,
            outline,
            font,
        })
    }

    fn px(&self, points: f32) -> f32 {
        points * self.dpi / 72.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    fn to_rect(self) -> Rect {
        Rect::at(self.x as i32, self.y as i32).of_size(self.width.max(1), self.height.max(1))
    }
}

/// A rendered map plus where its parts landed on the canvas.
pub struct Choropleth {
    pub image: RgbaImage,
    pub dpi: f32,
    pub scale: ColorScale,
    pub viewport: Viewport,
    pub map: PixelRect,
    pub legend: PixelRect,
}

impl Choropleth {
    /// Canvas pixel under a source coordinate, if it lies inside the viewport.
    pub fn map_pixel(&self, coord: Coord<f64>) -> Option<(u32, u32)> {
        let (x, y) = project(&self.viewport, self.map.width, self.map.height, coord);
        if x < 0.0 || y < 0.0 || x >= self.map.width as f64 || y >= self.map.height as f64 {
            return None;
        }
        Some((self.map.x + x as u32, self.map.y + y as u32))
    }
}

fn project(viewport: &Viewport, width: u32, height: u32, coord: Coord<f64>) -> (f64, f64) {
    let x = (coord.x - viewport.west) / viewport.width() * width as f64;
    let y = (viewport.north - coord.y) / viewport.height() * height as f64;
    (x, y)
}

/// Largest panel of height/width `ratio` that fits in the box.
fn fit_panel(box_width: u32, box_height: u32, ratio: f64) -> (u32, u32) {
    if box_width as f64 * ratio <= box_height as f64 {
        let height = (box_width as f64 * ratio).round() as u32;
        (box_width, height.clamp(1, box_height))
    } else {
        let width = (box_height as f64 / ratio).round() as u32;
        (width.clamp(1, box_width), box_height)
    }
}

/// Fills every record by its value, then adds title and legend.
pub fn render(
    records: &[GeometryRecord],
    values: &ValueMap,
    viewport: &Viewport,
    style: &Style,
    title: &str,
    description: &str,
) -> Result<Choropleth, MapError> {
    viewport.validate()?;
    let scale = ColorScale::from_values(values)?;

    let title_px = style.px(TITLE_PT);
    let label_px = style.px(LABEL_PT);
    let unit = style.dpi / 100.0;

    let bar_height = (12.0 * unit).round().max(6.0) as u32;
    let tick_len = (4.0 * unit).round().max(2.0) as u32;
    let legend_gap = (24.0 * unit).round() as u32;
    let title_band = (title_px * 2.0).round() as u32;
    let legend_band = legend_gap + bar_height + tick_len + (label_px * 4.0).round() as u32;

    let width = style.width_px;
    let height = style.height_px.max(title_band + legend_band + 1);

    // Axes box; the map keeps its aspect inside it, as in a fixed-size figure.
    let box_width = ((width as f64 * 0.775).round() as u32).max(1);
    let box_height = height - title_band - legend_band;
    let box_x = ((width - box_width) as f64 * 0.55).round() as u32;
    let ratio = viewport.height() / viewport.width() * style.aspect;
    let (map_width, map_height) = fit_panel(box_width, box_height, ratio);
    let map = PixelRect {
        x: box_x + (box_width - map_width) / 2,
        y: title_band + (box_height - map_height) / 2,
        width: map_width,
        height: map_height,
    };

    let legend = PixelRect {
        x: (width as f64 * 0.21).round() as u32,
        y: title_band + box_height + legend_gap,
        width: ((width as f64 * 0.6).round() as u32).max(2),
        height: bar_height,
    };

    let mut canvas = RgbaImage::from_pixel(width, height, WHITE);

    let panel = draw_map_panel(records, values, viewport, style, &scale, map.width, map.height);
    imageops::replace(&mut canvas, &panel, map.x as i64, map.y as i64);
    draw_hollow_rect_mut(&mut canvas, map.to_rect(), BLACK);

    draw_legend(&mut canvas, &scale, legend, tick_len, style, description);

    if !title.is_empty() {
        let title_scale = Scale::uniform(title_px);
        let (w, _) = text_size(title_scale, &style.font, title);
        let x = (width as i32 - w) / 2;
        let y = ((title_band as f32 - title_px) / 2.0).round() as i32;
        draw_text_mut(&mut canvas, BLACK, x, y, title_scale, &style.font, title);
    }

    Ok(Choropleth {
        image: canvas,
        dpi: style.dpi,
        scale,
        viewport: *viewport,
        map,
        legend,
    })
}

fn draw_map_panel(
    records: &[GeometryRecord],
    values: &ValueMap,
    viewport: &Viewport,
    style: &Style,
    scale: &ColorScale,
    width: u32,
    height: u32,
) -> RgbaImage {
    let mut panel = RgbaImage::from_pixel(width, height, WHITE);
    let bounds = viewport.rect();
    let clip = bounds.to_polygon();
    let mut drawn = 0usize;

    for record in records {
        let fill = scale.color(values.get(&record.id).copied().flatten()).to_rgba();

        for ring in record.polygons() {
            let bbox = match ring.bounding_rect() {
                Some(rect) if rect.intersects(&bounds) => rect,
                _ => continue,
            };

            let visible = if bounds.contains(&bbox) {
                MultiPolygon::new(vec![ring])
            } else {
                ring.intersection(&clip)
            };

            for part in visible.iter() {
                let polygon = ring_to_pixels(&part.exterior().0, viewport, width, height);
                if polygon.len() < 3 {
                    continue;
                }
                draw_polygon_mut(&mut panel, &polygon, fill);
                if let Some(outline) = style.outline {
                    draw_outline(&mut panel, &polygon, outline);
                }
                drawn += 1;
            }
        }
    }

    debug!("Filled {} rings from {} records", drawn, records.len());
    panel
}

/// Projects a ring to pixels, dropping repeated vertices and the closing
/// vertex, which the scan converter rejects.
fn ring_to_pixels(
    ring: &[Coord<f64>],
    viewport: &Viewport,
    width: u32,
    height: u32,
) -> Vec<Point<i32>> {
    let mut points: Vec<Point<i32>> = ring
        .iter()
        .map(|&c| {
            let (x, y) = project(viewport, width, height, c);
            Point::new(x.round() as i32, y.round() as i32)
        })
        .collect();

    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

fn draw_outline(panel: &mut RgbaImage, polygon: &[Point<i32>], color: Rgba<u8>) {
    for (i, a) in polygon.iter().enumerate() {
        let b = polygon[(i + 1) % polygon.len()];
        draw_line_segment_mut(
            panel,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            color,
        );
    }
}

fn draw_legend(
    canvas: &mut RgbaImage,
    scale: &ColorScale,
    bar: PixelRect,
    tick_len: u32,
    style: &Style,
    description: &str,
) {
    let last = (bar.width - 1).max(1) as f64;
    for col in 0..bar.width {
        let color = gradient(col as f64 / last).to_rgba();
        let column = Rect::at((bar.x + col) as i32, bar.y as i32).of_size(1, bar.height.max(1));
        draw_filled_rect_mut(canvas, column, color);
    }
    draw_hollow_rect_mut(canvas, bar.to_rect(), BLACK);

    let ticks = if scale.max > scale.min {
        scale.ticks(LEGEND_TICKS)
    } else {
        scale.ticks(1)
    };

    let font = &style.font;
    let tick_top = (bar.y + bar.height) as f32;
    let label_scale = Scale::uniform(style.px(LABEL_PT));
    let label_y = (tick_top + tick_len as f32 + 2.0).round() as i32;

    for value in &ticks {
        let x = bar.x as f32 + (scale.normalize(*value) * last) as f32;
        draw_line_segment_mut(canvas, (x, tick_top), (x, tick_top + tick_len as f32), BLACK);

        let label = format_tick(*value);
        let (w, _) = text_size(label_scale, font, &label);
        draw_text_mut(canvas, BLACK, x.round() as i32 - w / 2, label_y, label_scale, font, &label);
    }

    if !description.is_empty() {
        let (w, _) = text_size(label_scale, font, description);
        let x = (bar.x + bar.width / 2) as i32 - w / 2;
        let y = label_y + (style.px(LABEL_PT) * 1.6).round() as i32;
        draw_text_mut(canvas, BLACK, x, y, label_scale, font, description);
    }
}

fn format_tick(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{:.0}", value)
    } else {
        let text = format!("{:.2}", value);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Picks the image format from an explicit name or the output extension.
pub fn output_format(path: &Path, explicit: Option<&str>) -> Result<ImageFormat, MapError> {
    let format = match explicit {
        Some(name) => ImageFormat::from_extension(name.to_lowercase()),
        None => path.extension().and_then(ImageFormat::from_extension),
    };

    match format {
        Some(f @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp | ImageFormat::Tiff)) => {
            Ok(f)
        }
        _ => {
            let extension = explicit
                .map(str::to_string)
                .or_else(|| path.extension().and_then(|e| e.to_str()).map(str::to_string))
                .unwrap_or_default();
            Err(MapError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            })
        }
    }
}

/// Writes the map at `resolution` dpi, resampling if it was rendered at a
/// different one.
pub fn save(map: &Choropleth, path: &Path, format: ImageFormat, resolution: f32) -> Result<()> {
    let image = if resolution > 0.0 && (resolution - map.dpi).abs() > f32::EPSILON {
        let factor = resolution / map.dpi;
        let width = ((map.image.width() as f32 * factor).round() as u32).max(1);
        let height = ((map.image.height() as f32 * factor).round() as u32).max(1);
        debug!("Resampling {}x{} map to {}x{}", map.image.width(), map.image.height(), width, height);
        imageops::resize(&map.image, width, height, FilterType::Triangle)
    } else {
        map.image.clone()
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
    }

    DynamicImage::ImageRgba8(image)
        .to_rgb8()
        .save_with_format(path, format)
        .with_context(|| format!("Failed to save map to {:?}", path))?;

    info!("Plot saved to {:?}", path);
    Ok(())
}
