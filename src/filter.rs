use crate::error::MapError;
use crate::tabular::{read_table, write_table, Table, TableFormat};
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Rows of `table` whose `column` equals `value`, header unchanged.
pub fn filter_rows(table: &Table, column: usize, value: &str) -> Table {
    let value = value.trim();
    Table {
        headers: table.headers.clone(),
        rows: table
            .rows
            .iter()
            .filter(|row| row.get(column).map_or(false, |c| c.text().trim() == value))
            .cloned()
            .collect(),
    }
}

/// Copies the rows of `input` matching `column == value` to `output`, which
/// must use the same format as the input.
pub fn filter_file(input: &Path, column: &str, value: &str, output: &Path) -> Result<Table> {
    let input_format = TableFormat::from_path(input)?;
    if TableFormat::from_path(output)? != input_format {
        return Err(MapError::unsupported(output).into());
    }

    let table = read_table(input)?;
    let column_idx = table.column_index(column, input)?;
    let filtered = filter_rows(&table, column_idx, value);

    write_table(output, &filtered)?;
    info!(
        "Kept {} of {} rows where {} = {:?}, written to {:?}",
        filtered.rows.len(),
        table.rows.len(),
        column,
        value,
        output
    );
    Ok(filtered)
}

/// First `n` rows as aligned text, for a quick look at the result.
pub fn head(table: &Table, n: usize) -> String {
    let shown: Vec<Vec<String>> = table
        .rows
        .iter()
        .take(n)
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect();
    let mut widths: Vec<usize> = table.headers.iter().map(|h| h.chars().count()).collect();
    for row in &shown {
        for (i, cell) in row.iter().enumerate() {
            if i >= widths.len() {
                widths.push(0);
            }
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = line(table.headers.as_slice());
    for row in &shown {
        out.push('\n');
        out.push_str(&line(row.as_slice()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::Cell;
    use rust_xlsxwriter::Workbook;
    use std::fs;

    const NHS: &str = "\
CD_Name,CSD_Name,Total
Greater Vancouver,Burnaby,223218
Fraser Valley,Abbotsford,133497
Greater Vancouver, Richmond ,190473
";

    #[test]
    fn keeps_only_matching_rows() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bc2011nhs.csv");
        let output = dir.path().join("GV2011nhs.csv");
        fs::write(&input, NHS).unwrap();

        let kept = filter_file(&input, "CD_Name", "Greater Vancouver", &output).unwrap();
        assert_eq!(kept.rows.len(), 2);

        let written = read_table(&output).unwrap();
        assert_eq!(written.headers, vec!["CD_Name", "CSD_Name", "Total"]);
        assert_eq!(written.rows.len(), 2);
        assert_eq!(written.cell(1, 1), " Richmond ");
    }

    #[test]
    fn spreadsheet_rows_are_copied_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bc2011nhs.xlsx");
        let output = dir.path().join("GV2011nhs.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in ["CD_Name", "CSD_Code", "Total"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        sheet.write_string(1, 0, "Greater Vancouver").unwrap();
        sheet.write_string(1, 1, "0512").unwrap();
        sheet.write_number(1, 2, 223218.0).unwrap();
        sheet.write_string(2, 0, "Fraser Valley").unwrap();
        sheet.write_string(2, 1, "0934").unwrap();
        sheet.write_number(2, 2, 133497.0).unwrap();
        workbook.save(&input).unwrap();

        filter_file(&input, "CD_Name", "Greater Vancouver", &output).unwrap();

        let written = read_table(&output).unwrap();
        assert_eq!(written.rows.len(), 1);
        assert_eq!(written.rows[0][1], Cell::Text("0512".into()));
        assert_eq!(written.rows[0][2], Cell::Number(223218.0));
    }

    #[test]
    fn unknown_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        fs::write(&input, NHS).unwrap();

        let err = filter_file(&input, "Province", "BC", &dir.path().join("out.csv")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MapError>(),
            Some(MapError::MissingColumn { .. })
        ));
    }

    #[test]
    fn output_must_match_input_format() {
        let err = filter_file(
            Path::new("in.csv"),
            "CD_Name",
            "x",
            Path::new("out.xlsx"),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MapError>(),
            Some(MapError::UnsupportedFormat { .. })
        ));
        assert!(filter_file(Path::new("in.txt"), "a", "b", Path::new("out.txt")).is_err());
    }

    #[test]
    fn head_aligns_columns() {
        let table = Table {
            headers: vec!["id".into(), "name".into()],
            rows: vec![
                vec!["1".into(), "Burnaby".into()],
                vec!["22".into(), "Delta".into()],
                vec!["3".into(), "Surrey".into()],
            ],
        };
        assert_eq!(head(&table, 2), "id  name\n1   Burnaby\n22  Delta");
    }
}
