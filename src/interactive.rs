use crate::color::ColorScale;
use crate::config::{AppConfig, InteractiveConfig};
use crate::data;
use crate::error::MapError;
use crate::tabular::format_number;
use crate::types::ValueMap;
use anyhow::{Context, Result};
use geojson::FeatureCollection;
use serde_json::Value;
use std::fs;
use tracing::{info, warn};

/// Six-class yellow-green sequential ramp.
pub const YLGN: [&str; 6] = ["#ffffcc", "#d9f0a3", "#addd8e", "#78c679", "#31a354", "#006837"];
pub const NO_DATA_FILL: &str = "#bdbdbd";

const FILL_OPACITY: f64 = 0.7;
const LINE_OPACITY: f64 = 0.2;

/// Equal-width threshold scale over the dataset's range.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdScale {
    pub min: f64,
    pub max: f64,
}

impl ThresholdScale {
    pub fn from_values(values: &ValueMap) -> Result<Self, MapError> {
        let scale = ColorScale::from_values(values)?;
        Ok(Self {
            min: scale.min,
            max: scale.max,
        })
    }

    pub fn bin(&self, value: f64) -> usize {
        let range = self.max - self.min;
        if range <= 0.0 {
            return 0;
        }
        let t = ((value - self.min) / range).clamp(0.0, 1.0);
        ((t * YLGN.len() as f64) as usize).min(YLGN.len() - 1)
    }

    pub fn fill(&self, value: Option<f64>) -> &'static str {
        match value {
            Some(v) if v.is_finite() => YLGN[self.bin(v)],
            _ => NO_DATA_FILL,
        }
    }

    /// Lower edge of every bin plus the upper edge of the last.
    pub fn edges(&self) -> Vec<f64> {
        let n = YLGN.len();
        (0..=n)
            .map(|i| self.min + (self.max - self.min) * i as f64 / n as f64)
            .collect()
    }
}

fn property_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => n.as_f64().map(format_number),
        _ => None,
    }
}

/// Annotates each feature with `value` and `fill` properties. Returns how
/// many features found a value.
pub fn join_values(
    collection: &mut FeatureCollection,
    values: &ValueMap,
    key_on: &str,
    scale: &ThresholdScale,
) -> usize {
    let mut matched = 0;
    for feature in &mut collection.features {
        let value = feature
            .property(key_on)
            .and_then(property_to_id)
            .and_then(|id| values.get(&id).copied().flatten());
        if value.is_some() {
            matched += 1;
        }

        let json_value = value
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        feature.set_property("value", json_value);
        feature.set_property("fill", scale.fill(value));
    }
    matched
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn legend_html(scale: &ThresholdScale, name: &str) -> String {
    let edges = scale.edges();
    let mut rows = String::new();
    for (i, color) in YLGN.iter().enumerate() {
        rows.push_str(&format!(
            "<div><i style=\"background:{}\"></i>{} &ndash; {}</div>",
            color,
            format_number((edges[i] * 100.0).round() / 100.0),
            format_number((edges[i + 1] * 100.0).round() / 100.0)
        ));
    }
    rows.push_str(&format!(
        "<div><i style=\"background:{}\"></i>No data</div>",
        NO_DATA_FILL
    ));
    format!("<strong>{}</strong>{}", escape_html(name), rows)
}

/// Replaces each `{{NAME}}` in one pass, so substituted text is never
/// scanned for placeholders itself. Unknown names are left as they are.
fn fill_template(template: &str, fields: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let field = after.find("}}").and_then(|end| {
            fields
                .iter()
                .find(|(name, _)| *name == &after[..end])
                .map(|(_, value)| (end, value))
        });
        match field {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn page(
    config: &InteractiveConfig,
    collection: &FeatureCollection,
    scale: &ThresholdScale,
) -> Result<String> {
    let data = serde_json::to_string(collection)?.replace("</", "<\\/");
    let legend = serde_json::to_string(&legend_html(scale, &config.legend))?.replace("</", "<\\/");

    let fields = [
        ("TITLE", escape_html(&config.legend)),
        ("LAT", config.center[0].to_string()),
        ("LON", config.center[1].to_string()),
        ("ZOOM", config.zoom.to_string()),
        ("TILES", serde_json::to_string(&config.tiles)?),
        ("FILL_OPACITY", FILL_OPACITY.to_string()),
        ("LINE_OPACITY", LINE_OPACITY.to_string()),
        ("LEGEND", legend),
        ("DATA", data),
    ];
    Ok(fill_template(PAGE_TEMPLATE, &fields))
}

/// Builds the page for the `[interactive]` section and writes it out.
pub fn write_interactive(app: &AppConfig) -> Result<()> {
    let config = app
        .interactive
        .as_ref()
        .ok_or(MapError::MissingSection("interactive"))?;
    let input = &app.input;

    let values = data::load_values(
        &input.resolve(&config.dataset),
        &config.data_id,
        &config.data_column,
    )?;
    let scale = ThresholdScale::from_values(&values)?;

    let mut collection = data::load_geojson(&input.resolve(&config.geojson))?;
    let matched = join_values(&mut collection, &values, &config.key_on, &scale);
    if matched == 0 {
        warn!(
            "No feature property '{}' matched a dataset id",
            config.key_on
        );
    }

    let output = input.resolve(&config.output);
    let html = page(config, &collection, &scale)?;
    fs::write(&output, html).with_context(|| format!("Failed to write {:?}", output))?;
    info!(
        "Interactive map with {}/{} matched features saved to {:?}",
        matched,
        collection.features.len(),
        output
    );
    Ok(())
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{TITLE}}</title>
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>
html, body, #map { height: 100%; margin: 0; }
.legend { background: white; padding: 6px 8px; font: 12px sans-serif; line-height: 18px; }
.legend i { width: 18px; height: 18px; float: left; margin-right: 8px; opacity: {{FILL_OPACITY}}; }
.fullscreen-toggle { background: white; padding: 4px 8px; cursor: pointer; font: 12px sans-serif; }
</style>
</head>
<body>
<div id="map"></div>
<script>
var data = {{DATA}};
var map = L.map('map').setView([{{LAT}}, {{LON}}], {{ZOOM}});
var base = L.tileLayer({{TILES}}, { attribution: '&copy; OpenStreetMap contributors' }).addTo(map);

function style(feature) {
  return {
    fillColor: feature.properties.fill,
    fillOpacity: {{FILL_OPACITY}},
    color: 'black',
    opacity: {{LINE_OPACITY}},
    weight: 1
  };
}

var layer = L.geoJSON(data, {
  style: style,
  onEachFeature: function (feature, l) {
    var v = feature.properties.value;
    l.bindTooltip(v === null ? 'No data' : String(v));
    l.on({
      mouseover: function (e) { e.target.setStyle({ weight: 3, opacity: 1 }); },
      mouseout: function (e) { layer.resetStyle(e.target); }
    });
  }
}).addTo(map);

L.control.layers({ 'Base map': base }, { 'Choropleth': layer }).addTo(map);

var legend = L.control({ position: 'bottomright' });
legend.onAdd = function () {
  var div = L.DomUtil.create('div', 'legend');
  div.innerHTML = {{LEGEND}};
  return div;
};
legend.addTo(map);

var fullscreen = L.control({ position: 'topright' });
fullscreen.onAdd = function () {
  var div = L.DomUtil.create('div', 'fullscreen-toggle leaflet-bar');
  div.textContent = 'Expand me';
  L.DomEvent.on(div, 'click', function () {
    if (document.fullscreenElement) {
      document.exitFullscreen();
    } else {
      document.getElementById('map').requestFullscreen();
    }
  });
  document.addEventListener('fullscreenchange', function () {
    div.textContent = document.fullscreenElement ? 'Exit me' : 'Expand me';
    map.invalidateSize();
  });
  return div;
};
fullscreen.addTo(map);
</script>
</body>
</html>
"#;
