use crate::error::MapError;
use crate::tabular::{format_number, read_table};
use crate::types::{GeometryRecord, ValueMap};
use anyhow::{anyhow, Context, Result};
use geo::Coord;
use shapefile::dbase::{FieldType, FieldValue};
use shapefile::{PolygonRing, Reader, Shape};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reads `id_column` -> `value_column` from a CSV or spreadsheet. Later rows
/// overwrite earlier ones with the same id.
pub fn load_values(path: &Path, id_column: &str, value_column: &str) -> Result<ValueMap> {
    let table = read_table(path)?;
    let id_idx = table.column_index(id_column, path)?;
    let value_idx = table.column_index(value_column, path)?;

    let mut values = ValueMap::new();
    let mut missing = 0usize;

    for row in 0..table.rows.len() {
        let id = normalize_id(&table.cell(row, id_idx));
        if id.is_empty() {
            continue;
        }
        let value = parse_value(&table.cell(row, value_idx));
        if value.is_none() {
            missing += 1;
        }
        values.insert(id, value);
    }

    info!(
        "Loaded {} values from {:?} ({} without data)",
        values.len(),
        path,
        missing
    );
    Ok(values)
}

fn normalize_id(raw: &str) -> String {
    let raw = raw.trim();
    match raw.parse::<f64>() {
        Ok(n) if raw.contains('.') => format_number(n),
        _ => raw.to_string(),
    }
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Reads polygon records from a shapefile (`.shp` plus its `.shx`/`.dbf`),
/// taking each record's id from the attribute field `id_field`.
pub fn load_geometry(path: &Path, id_field: &str) -> Result<Vec<GeometryRecord>> {
    let path = &shp_path(path);
    let mut reader =
        Reader::from_path(path).with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let id_value = record.get(id_field).ok_or_else(|| MapError::MissingColumn {
            path: path.to_path_buf(),
            column: id_field.to_string(),
        })?;

        let id = match field_to_id(id_value) {
            Some(id) => id,
            None => {
                skipped += 1;
                continue;
            }
        };

        let (points, parts) = match shape {
            Shape::Polygon(polygon) => flatten_rings(polygon.rings(), |p| (p.x, p.y)),
            Shape::PolygonM(polygon) => flatten_rings(polygon.rings(), |p| (p.x, p.y)),
            Shape::PolygonZ(polygon) => flatten_rings(polygon.rings(), |p| (p.x, p.y)),
            other => {
                debug!("Skipping non-polygon shape {:?} for id {}", other.shapetype(), id);
                skipped += 1;
                continue;
            }
        };

        records.push(GeometryRecord::new(id, points, parts));
    }

    info!(
        "Loaded {} polygon records from {:?} ({} skipped)",
        records.len(),
        path,
        skipped
    );
    Ok(records)
}

/// Shapefiles are often named without extension, meaning the `.shp` member.
fn shp_path(path: &Path) -> PathBuf {
    match path.extension() {
        Some(_) => path.to_path_buf(),
        None => path.with_extension("shp"),
    }
}

fn flatten_rings<P>(
    rings: &[PolygonRing<P>],
    xy: impl Fn(&P) -> (f64, f64),
) -> (Vec<Coord<f64>>, Vec<usize>) {
    let mut points = Vec::new();
    let mut parts = Vec::with_capacity(rings.len());
    for ring in rings {
        parts.push(points.len());
        points.extend(ring.points().iter().map(|p| {
            let (x, y) = xy(p);
            Coord { x, y }
        }));
    }
    (points, parts)
}

fn field_to_id(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(s)) => Some(s.trim().to_string()),
        FieldValue::Numeric(Some(n)) => Some(format_number(*n)),
        FieldValue::Integer(i) => Some(i.to_string()),
        FieldValue::Float(Some(f)) => Some(format_number(*f as f64)),
        FieldValue::Double(d) => Some(format_number(*d)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Character,
    Number,
    Logical,
    Date,
    Other,
}

impl From<FieldType> for FieldKind {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Character => FieldKind::Character,
            FieldType::Numeric
            | FieldType::Float
            | FieldType::Integer
            | FieldType::Double
            | FieldType::Currency => FieldKind::Number,
            FieldType::Logical => FieldKind::Logical,
            FieldType::Date | FieldType::DateTime => FieldKind::Date,
            _ => FieldKind::Other,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Character => "Character",
            FieldKind::Number => "Number",
            FieldKind::Logical => "Logical",
            FieldKind::Date => "Date",
            FieldKind::Other => "Memo/other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
}

/// What a shapefile holds: shape count, geometry type and attribute fields.
#[derive(Debug, Clone)]
pub struct ShapefileSchema {
    pub shape_count: usize,
    pub shape_type: String,
    pub fields: Vec<FieldSchema>,
}

impl fmt::Display for ShapefileSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of shapes in shapefile: {}", self.shape_count)?;
        writeln!(f, "Geometry type: {}", self.shape_type)?;
        writeln!(f, "Fields in records (.dbf):")?;
        for field in &self.fields {
            writeln!(f, "    {:<16} (type {})", field.name, field.kind)?;
        }
        Ok(())
    }
}

pub fn load_schema(path: &Path) -> Result<ShapefileSchema> {
    let path = &shp_path(path);
    let mut reader =
        Reader::from_path(path).with_context(|| format!("Failed to open Shapefile: {:?}", path))?;
    let shape_type = format!("{:?}", reader.header().shape_type);

    let mut shape_count = 0usize;
    for result in reader.iter_shapes_and_records() {
        result?;
        shape_count += 1;
    }

    let dbf_path = path.with_extension("dbf");
    let dbf = shapefile::dbase::Reader::from_path(&dbf_path)
        .with_context(|| format!("Failed to open attribute table: {:?}", dbf_path))?;
    let fields = dbf
        .fields()
        .iter()
        .filter(|field| field.name() != "DeletionFlag")
        .map(|field| FieldSchema {
            name: field.name().to_string(),
            kind: FieldKind::from(field.field_type()),
        })
        .collect();

    Ok(ShapefileSchema {
        shape_count,
        shape_type,
        fields,
    })
}

/// Loads a GeoJSON FeatureCollection as-is, for the interactive page.
pub fn load_geojson(path: &Path) -> Result<geojson::FeatureCollection> {
    use geojson::GeoJson;
    use std::io::BufReader;

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let geojson = GeoJson::from_reader(BufReader::new(file)).context("Failed to parse GeoJSON")?;

    match geojson {
        GeoJson::FeatureCollection(fc) => {
            if fc.features.is_empty() {
                warn!("GeoJSON {:?} has no features", path);
            }
            Ok(fc)
        }
        _ => Err(anyhow!("GeoJSON must be a FeatureCollection")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use shapefile::dbase::{FieldName, Record, TableWriterBuilder};
    use shapefile::{Point, PointZ, Polygon, PolygonZ, Writer, NO_DATA};
    use std::fs;

    fn id_table() -> TableWriterBuilder {
        TableWriterBuilder::new()
            .add_character_field(FieldName::try_from("CSDUID").unwrap(), 10)
            .add_numeric_field(FieldName::try_from("Total").unwrap(), 10, 2)
    }

    fn id_record(id: &str) -> Record {
        let mut record = Record::default();
        record.insert("CSDUID".to_string(), FieldValue::Character(Some(id.to_string())));
        record.insert("Total".to_string(), FieldValue::Numeric(Some(1.0)));
        record
    }

    fn square(x0: f64, y0: f64, size: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x0, y0 + size),
            Point::new(x0 + size, y0 + size),
            Point::new(x0 + size, y0),
            Point::new(x0, y0),
        ]
    }

    /// Two records: a two-part polygon with a hole, and a plain square.
    fn write_polygons(path: &Path) {
        let mut writer = Writer::from_path(path, id_table()).unwrap();
        let islands = Polygon::with_rings(vec![
            PolygonRing::Outer(square(0.0, 0.0, 10.0)),
            PolygonRing::Inner(square(2.0, 2.0, 2.0)),
            PolygonRing::Outer(square(20.0, 0.0, 5.0)),
        ]);
        writer.write_shape_and_record(&islands, &id_record("5915022")).unwrap();
        writer
            .write_shape_and_record(&Polygon::new(PolygonRing::Outer(square(30.0, 0.0, 1.0))), &id_record("5915025"))
            .unwrap();
    }

    #[test]
    fn values_keep_missing_cells_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, "CSDUID,Total\n5915001,12.5\n5915002,\n5915003,n/a\n").unwrap();

        let values = load_values(&path, "CSDUID", "Total").unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values["5915001"], Some(12.5));
        assert_eq!(values["5915002"], None);
        assert_eq!(values["5915003"], None);
    }

    #[test]
    fn ids_with_float_formatting_are_coerced() {
        assert_eq!(normalize_id(" 5915022.0 "), "5915022");
        assert_eq!(normalize_id("00123"), "00123");
        assert_eq!(normalize_id("Burnaby"), "Burnaby");
    }

    #[test]
    fn thousands_separators_are_accepted() {
        assert_eq!(parse_value("1,250"), Some(1250.0));
        assert_eq!(parse_value("NaN"), None);
    }

    #[test]
    fn missing_value_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, "CSDUID,Total\n1,2\n").unwrap();

        let err = load_values(&path, "CSDUID", "Median").unwrap_err();
        match err.downcast_ref::<MapError>() {
            Some(MapError::MissingColumn { column, .. }) => assert_eq!(column, "Median"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn unsupported_dataset_extension() {
        let err = load_values(Path::new("Data/table.json"), "a", "b").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MapError>(),
            Some(MapError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn bare_shapefile_names_mean_the_shp_member() {
        assert_eq!(shp_path(Path::new("Data/van-csd11/van-csd11")), Path::new("Data/van-csd11/van-csd11.shp"));
        assert_eq!(shp_path(Path::new("a/b.shp")), Path::new("a/b.shp"));
    }

    #[test]
    fn field_kinds_display_like_the_report() {
        assert_eq!(FieldKind::from(FieldType::Character).to_string(), "Character");
        assert_eq!(FieldKind::from(FieldType::Numeric), FieldKind::Number);
        assert_eq!(FieldKind::from(FieldType::Date), FieldKind::Date);
    }

    #[test]
    fn dbase_ids_are_stringified() {
        assert_eq!(
            field_to_id(&FieldValue::Character(Some("5915022 ".into()))),
            Some("5915022".to_string())
        );
        assert_eq!(
            field_to_id(&FieldValue::Numeric(Some(5915022.0))),
            Some("5915022".to_string())
        );
        assert_eq!(field_to_id(&FieldValue::Character(None)), None);
    }

    #[test]
    fn multipart_shapes_flatten_into_points_and_parts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("van-csd11.shp");
        write_polygons(&path);

        let records = load_geometry(&dir.path().join("van-csd11"), "CSDUID").unwrap();
        assert_eq!(records.len(), 2);

        let islands = &records[0];
        assert_eq!(islands.id, "5915022");
        assert_eq!(islands.parts, vec![0, 5, 10]);
        assert_eq!(islands.points.len(), 15);
        assert_eq!(islands.rings().len(), 3);
        assert!(islands.rings()[2].iter().all(|c| c.x >= 20.0 && c.x <= 25.0));

        assert_eq!(records[1].id, "5915025");
        assert_eq!(records[1].parts, vec![0]);
    }

    #[test]
    fn polygon_z_shapes_are_read_in_the_plane() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elevated.shp");
        let ring: Vec<PointZ> = square(-123.1, 49.2, 0.1)
            .into_iter()
            .map(|p| PointZ::new(p.x, p.y, 12.0, NO_DATA))
            .collect();
        {
            let mut writer = Writer::from_path(&path, id_table()).unwrap();
            writer
                .write_shape_and_record(&PolygonZ::new(PolygonRing::Outer(ring)), &id_record("5915004"))
                .unwrap();
        }

        let records = load_geometry(&path, "CSDUID").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "5915004");
        assert_eq!(records[0].points.len(), 5);
        assert!(records[0].points.iter().all(|c| (49.2..=49.3 + 1e-9).contains(&c.y)));
    }

    #[test]
    fn unknown_shape_id_field_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("van-csd11.shp");
        write_polygons(&path);

        let err = load_geometry(&path, "DAUID").unwrap_err();
        match err.downcast_ref::<MapError>() {
            Some(MapError::MissingColumn { column, .. }) => assert_eq!(column, "DAUID"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn schema_lists_shapes_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("van-csd11.shp");
        write_polygons(&path);

        let schema = load_schema(&dir.path().join("van-csd11")).unwrap();
        assert_eq!(schema.shape_count, 2);
        assert_eq!(schema.shape_type, "Polygon");
        assert_eq!(
            schema.fields,
            vec![
                FieldSchema {
                    name: "CSDUID".into(),
                    kind: FieldKind::Character
                },
                FieldSchema {
                    name: "Total".into(),
                    kind: FieldKind::Number
                },
            ]
        );

        let report = schema.to_string();
        assert!(report.contains("Number of shapes in shapefile: 2"));
        assert!(report.contains("CSDUID"));
    }

    #[test]
    fn spreadsheet_float_ids_match_shapefile_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheltercosts.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "CSDUID").unwrap();
        sheet.write_string(0, 1, "Total").unwrap();
        sheet.write_number(1, 0, 5915022.0).unwrap();
        sheet.write_number(1, 1, 41.5).unwrap();
        sheet.write_number(2, 0, 5915025.0).unwrap();
        sheet.write_string(2, 1, "x").unwrap();
        workbook.save(&path).unwrap();

        let values = load_values(&path, "CSDUID", "Total").unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["5915022"], Some(41.5));
        assert_eq!(values["5915025"], None);
    }
}
