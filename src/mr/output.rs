//! Result records, one line per output cell: `[row, col]<TAB>value`

use std::{fs, path::Path, sync::OnceLock};

use regex::Regex;

use crate::mr::{
    error::{MatrixError, Result},
    function::matmul::CellKey,
    matrix::{Matrix, Shape},
};

fn record_regex() -> &'static Regex {
    static RECORD: OnceLock<Regex> = OnceLock::new();
    RECORD.get_or_init(|| Regex::new(r"^\[(\d+), (\d+)\]\t(.*)$").expect("record pattern is valid"))
}

/// Values keep full round-trip precision and always carry a `.` or exponent
pub fn format_record(key: CellKey, value: f64) -> String {
    format!("[{}, {}]\t{:?}", key.row, key.col, value)
}

/// Parse one record, `line` is only used for error reporting
pub fn parse_record(line: usize, content: &str) -> Result<(CellKey, f64)> {
    let malformed = || MatrixError::MalformedRecord {
        line,
        content: content.to_string(),
    };
    let caps = record_regex().captures(content).ok_or_else(malformed)?;
    let row = caps[1].parse::<usize>().map_err(|_| malformed())?;
    let col = caps[2].parse::<usize>().map_err(|_| malformed())?;
    let value = caps[3].trim().parse::<f64>().map_err(|_| malformed())?;
    Ok((CellKey::new(row, col), value))
}

/// Read every record of a result file, blank lines are ignored
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<(CellKey, f64)>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| MatrixError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| parse_record(n + 1, line))
        .collect()
}

/// Rebuild the result matrix, every cell of `shape` must appear exactly once
pub fn assemble(records: &[(CellKey, f64)], shape: Shape) -> Result<Matrix> {
    let mut cells = vec![None; shape.rows * shape.cols];
    for &(key, value) in records {
        if key.row >= shape.rows || key.col >= shape.cols {
            return Err(MatrixError::UnexpectedCell { key, shape });
        }
        if cells[key.row * shape.cols + key.col].replace(value).is_some() {
            return Err(MatrixError::DuplicateCell(key));
        }
    }
    let mut rows = Vec::with_capacity(shape.rows);
    for row in 0..shape.rows {
        let mut values = Vec::with_capacity(shape.cols);
        for col in 0..shape.cols {
            let value = cells[row * shape.cols + col].ok_or(MatrixError::MissingCell(CellKey::new(row, col)))?;
            values.push(value);
        }
        rows.push(values);
    }
    Matrix::from_rows("C", rows)
}

/// Element-wise `|actual - expected| <= atol + rtol * |expected|`
pub fn all_close(expected: &Matrix, actual: &Matrix, atol: f64, rtol: f64) -> bool {
    if expected.shape() != actual.shape() {
        return false;
    }
    (0..expected.rows()).all(|i| {
        expected
            .row(i)
            .iter()
            .zip(actual.row(i))
            .all(|(e, a)| (a - e).abs() <= atol + rtol * e.abs())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_format_matches_job_output() {
        assert_eq!(format_record(CellKey::new(0, 1), 22.0), "[0, 1]\t22.0");
        assert_eq!(format_record(CellKey::new(12, 3), 0.5), "[12, 3]\t0.5");
    }

    #[test]
    fn parse_record_reads_formatted_line() {
        let (key, value) = parse_record(1, &format_record(CellKey::new(4, 9), 1.0 / 3.0)).unwrap();
        assert_eq!(key, CellKey::new(4, 9));
        assert_eq!(value, 1.0 / 3.0);
    }

    #[test]
    fn parse_record_rejects_other_layouts() {
        assert!(matches!(
            parse_record(3, "[1,2]\t3.0"),
            Err(MatrixError::MalformedRecord { line: 3, .. })
        ));
        assert!(parse_record(1, "[1, 2] 3.0").is_err());
        assert!(parse_record(1, "[1, 2]\tabc").is_err());
    }

    #[test]
    fn assemble_requires_every_cell_once() {
        let shape = Shape::new(1, 2);
        let full = [(CellKey::new(0, 1), 2.0), (CellKey::new(0, 0), 1.0)];
        assert_eq!(assemble(&full, shape).unwrap().row(0), &[1.0, 2.0]);

        assert!(matches!(
            assemble(&full[..1], shape),
            Err(MatrixError::MissingCell(key)) if key == CellKey::new(0, 0)
        ));
        let doubled = [full[0], full[1], full[0]];
        assert!(matches!(assemble(&doubled, shape), Err(MatrixError::DuplicateCell(_))));
        let stray = [(CellKey::new(1, 0), 1.0)];
        assert!(matches!(assemble(&stray, shape), Err(MatrixError::UnexpectedCell { .. })));
    }

    #[test]
    fn all_close_uses_tolerances() {
        let expected = Matrix::from_rows("C", vec![vec![1.0, 100.0]]).unwrap();
        let near = Matrix::from_rows("C", vec![vec![1.0 + 1e-12, 100.0 + 1e-8]]).unwrap();
        let far = Matrix::from_rows("C", vec![vec![1.0, 100.1]]).unwrap();
        assert!(all_close(&expected, &near, 1e-9, 1e-9));
        assert!(!all_close(&expected, &far, 1e-9, 1e-9));
        let other_shape = Matrix::from_rows("C", vec![vec![1.0], vec![100.0]]).unwrap();
        assert!(!all_close(&expected, &other_shape, 1.0, 1.0));
    }
}
