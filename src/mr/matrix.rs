use std::{fmt, fs, path::{Path, PathBuf}, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::mr::error::{MatrixError, Result};

/// Number of rows and columns of a matrix, written as `RxC`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

impl FromStr for Shape {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (rows, cols) = s
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| format!("expected a shape like `3x4`, got `{}`", s))?;
        let rows = rows.trim().parse::<usize>().map_err(|e| format!("bad row count: {}", e))?;
        let cols = cols.trim().parse::<usize>().map_err(|e| format!("bad column count: {}", e))?;
        if rows == 0 || cols == 0 {
            return Err(format!("shape `{}` has an empty dimension", s));
        }
        Ok(Self { rows, cols })
    }
}

/// Shape of the whole job: `A` is `a_rows x inner`, `B` is `inner x b_cols`.
///
/// Every distributor and reducer invocation receives this value, nothing else
/// about the job is shared between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobShape {
    pub a_rows: usize,
    pub inner: usize,
    pub b_cols: usize,
}

impl JobShape {
    /// Build the job shape from the operand shapes
    pub fn new(a: Shape, b: Shape) -> Result<Self> {
        if a.cols != b.rows {
            return Err(MatrixError::DimensionMismatch {
                a,
                b,
                message: format!("A has {} columns but B has {} rows", a.cols, b.rows),
            });
        }
        Ok(Self {
            a_rows: a.rows,
            inner: a.cols,
            b_cols: b.cols,
        })
    }

    /// Like [`JobShape::new`], but also checks explicitly configured shapes
    /// against the ones taken from the loaded matrices
    pub fn resolve(a: Shape, b: Shape, a_cfg: Option<Shape>, b_cfg: Option<Shape>) -> Result<Self> {
        for (name, loaded, configured) in [("A", a, a_cfg), ("B", b, b_cfg)] {
            if let Some(configured) = configured {
                if configured != loaded {
                    return Err(MatrixError::DimensionMismatch {
                        a,
                        b,
                        message: format!("{} was configured as {} but loaded as {}", name, configured, loaded),
                    });
                }
            }
        }
        Self::new(a, b)
    }

    pub fn a(&self) -> Shape {
        Shape::new(self.a_rows, self.inner)
    }

    pub fn b(&self) -> Shape {
        Shape::new(self.inner, self.b_cols)
    }

    pub fn output(&self) -> Shape {
        Shape::new(self.a_rows, self.b_cols)
    }
}

/// A dense row-major matrix, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    name: String,
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Build a matrix from rows, every row must have the length of the first one
    pub fn from_rows(name: impl Into<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let name = name.into();
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if cols == 0 {
            return Err(MatrixError::MalformedInput {
                path: PathBuf::from(&name),
                line: 0,
                message: "matrix has no elements".to_string(),
            });
        }
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(MatrixError::MalformedInput {
                    path: PathBuf::from(&name),
                    line: i + 1,
                    message: format!("row has {} columns, expected {}", row.len(), cols),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            name,
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Read a whitespace separated text matrix, one row per line.
    ///
    /// Blank lines and `#` comments are skipped. The matrix takes the file stem
    /// as its name, so `data/A.txt` becomes `A`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| MatrixError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let malformed = |line: usize, message: String| MatrixError::MalformedInput {
            path: path.to_path_buf(),
            line,
            message,
        };

        let mut cols = None;
        let mut rows = 0;
        let mut data = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let before = data.len();
            for token in line.split_whitespace() {
                let value = token
                    .parse::<f64>()
                    .map_err(|_| malformed(n + 1, format!("`{}` is not a number", token)))?;
                data.push(value);
            }
            let width = data.len() - before;
            match cols {
                None => cols = Some(width),
                Some(expected) if expected != width => {
                    return Err(malformed(
                        n + 1,
                        format!("row has {} columns, expected {}", width, expected),
                    ));
                }
                Some(_) => {}
            }
            rows += 1;
        }

        let cols = cols.ok_or_else(|| malformed(0, "file contains no rows".to_string()))?;
        log::debug!("[Load] Read matrix {} ({}x{}) from {}", name, rows, cols, path.display());
        Ok(Self { name, rows, cols, data })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> Shape {
        Shape::new(self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Reference product computed with the naive triple loop
    pub fn multiply(&self, other: &Matrix) -> Result<Matrix> {
        let shape = JobShape::new(self.shape(), other.shape())?;
        let mut data = vec![0.0; shape.a_rows * shape.b_cols];
        for i in 0..shape.a_rows {
            for k in 0..shape.b_cols {
                let mut sum = 0.0;
                for j in 0..shape.inner {
                    sum += self.get(i, j) * other.get(j, k);
                }
                data[i * shape.b_cols + k] = sum;
            }
        }
        Ok(Self {
            name: format!("{}{}", self.name, other.name),
            rows: shape.a_rows,
            cols: shape.b_cols,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_tmp(contents: &str, name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn load_takes_name_from_file_stem() {
        let (_dir, path) = write_tmp("1 2 3\n4 5 6\n", "A.txt");
        let m = Matrix::load(&path).unwrap();
        assert_eq!(m.name(), "A");
        assert_eq!(m.shape(), Shape::new(2, 3));
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn load_accepts_scientific_notation_and_blank_lines() {
        let (_dir, path) = write_tmp(
            "# generated\n1.000000000000000000e+00 2.5e-1\n\n-3 4\n",
            "B.mat",
        );
        let m = Matrix::load(&path).unwrap();
        assert_eq!(m.shape(), Shape::new(2, 2));
        assert_eq!(m.get(0, 1), 0.25);
        assert_eq!(m.get(1, 0), -3.0);
    }

    #[test]
    fn load_rejects_short_row() {
        let (_dir, path) = write_tmp("1 2 3\n4 5\n", "A.txt");
        match Matrix::load(&path) {
            Err(MatrixError::MalformedInput { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed input, got {:?}", other),
        }
    }

    #[test]
    fn load_rejects_bad_number() {
        let (_dir, path) = write_tmp("1 two\n", "A.txt");
        assert!(matches!(
            Matrix::load(&path),
            Err(MatrixError::MalformedInput { line: 1, .. })
        ));
    }

    #[test]
    fn load_rejects_empty_file() {
        let (_dir, path) = write_tmp("\n# nothing\n", "A.txt");
        assert!(matches!(Matrix::load(&path), Err(MatrixError::MalformedInput { .. })));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Matrix::load(dir.path().join("nope.txt")),
            Err(MatrixError::Io { .. })
        ));
    }

    #[test]
    fn shape_parses_from_str() {
        assert_eq!("3x4".parse::<Shape>().unwrap(), Shape::new(3, 4));
        assert_eq!(" 10 X 2".trim().parse::<Shape>().unwrap(), Shape::new(10, 2));
        assert!("3".parse::<Shape>().is_err());
        assert!("0x4".parse::<Shape>().is_err());
    }

    #[test]
    fn job_shape_rejects_inner_mismatch() {
        let err = JobShape::new(Shape::new(2, 3), Shape::new(2, 3)).unwrap_err();
        assert!(matches!(err, MatrixError::DimensionMismatch { .. }));
    }

    #[test]
    fn job_shape_checks_configured_shapes() {
        let a = Shape::new(2, 3);
        let b = Shape::new(3, 4);
        let shape = JobShape::resolve(a, b, Some(a), None).unwrap();
        assert_eq!(shape.output(), Shape::new(2, 4));
        assert!(matches!(
            JobShape::resolve(a, b, None, Some(Shape::new(3, 5))),
            Err(MatrixError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn naive_product() {
        let a = Matrix::from_rows("A", vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let b = Matrix::from_rows("B", vec![vec![5.0, 6.0], vec![7.0, 8.0]]).unwrap();
        let c = a.multiply(&b).unwrap();
        assert_eq!(c.row(0), &[19.0, 22.0]);
        assert_eq!(c.row(1), &[43.0, 50.0]);
    }

    #[test]
    fn from_rows_rejects_ragged() {
        assert!(Matrix::from_rows("A", vec![vec![1.0, 2.0], vec![3.0]]).is_err());
    }
}
