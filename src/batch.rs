use crate::config::{AppConfig, PlotSpec};
use crate::data;
use crate::error::MapError;
use crate::render::{self, Style};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Reads the metadata rows: geometry, dataset, id column, value column,
/// geometry id field, title, description, output, west, south, east, north.
pub fn read_metadata(path: &Path, skip_header: bool) -> Result<Vec<PlotSpec>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open metadata file: {:?}", path))?;
    parse_metadata(file, skip_header).with_context(|| format!("Invalid metadata in {:?}", path))
}

fn parse_metadata<R: Read>(reader: R, skip_header: bool) -> Result<Vec<PlotSpec>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(skip_header)
        .trim(Trim::All)
        .from_reader(reader);

    let mut specs = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let spec: PlotSpec = record
            .deserialize(None)
            .with_context(|| format!("Metadata row {} is malformed", i + 1))?;
        specs.push(spec);
    }
    Ok(specs)
}

/// Runs `execute` once per plot, in order, stopping at the first failure.
pub fn run_batch<F>(specs: &[PlotSpec], mut execute: F) -> Result<usize>
where
    F: FnMut(&PlotSpec) -> Result<()>,
{
    for (i, spec) in specs.iter().enumerate() {
        info!("[{}/{}] Rendering {:?}", i + 1, specs.len(), spec.title);
        execute(spec).with_context(|| format!("Failed to render {:?}", spec.output))?;
    }
    Ok(specs.len())
}

/// Load, render and save one map. Paths are used as given.
pub fn render_plot(
    spec: &PlotSpec,
    style: &Style,
    format: Option<&str>,
    save_dpi: Option<f32>,
) -> Result<()> {
    let viewport = spec.viewport()?;
    let output_format = render::output_format(&spec.output, format)?;

    let values = data::load_values(&spec.dataset, &spec.data_id, &spec.data_column)?;
    let records = data::load_geometry(&spec.shapefile, &spec.shape_id)?;

    let map = render::render(
        &records,
        &values,
        &viewport,
        style,
        &spec.title,
        &spec.description,
    )?;
    render::save(&map, &spec.output, output_format, save_dpi.unwrap_or(style.dpi))
}

/// Renders every row of the configured metadata file.
pub fn run(config: &AppConfig) -> Result<usize> {
    let input = &config.input;
    let batch = config
        .batch
        .as_ref()
        .ok_or(MapError::MissingSection("batch"))?;
    let style = Style::from_config(&config.style)?;
    let specs = read_metadata(&input.resolve(&batch.metadata), batch.skip_header)?;

    run_batch(&specs, |spec| {
        render_plot(
            &spec.resolved(input),
            &style,
            config.style.format.as_deref(),
            config.style.save_dpi,
        )
    })
}
