//! The map reduce functions of the job, shared by the local runner and the workers

/// Dense matrix multiplication application
pub mod matmul {
    use std::{fmt, str::FromStr};

    use anyhow::{anyhow, Context};
    use serde::{Deserialize, Serialize};

    use crate::mr::{
        error::{BucketDefect, MatrixError, Result},
        matrix::{JobShape, Matrix},
    };

    /// Which operand an element came from
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub enum Side {
        A,
        B,
    }

    impl Side {
        /// Operands are positional: the first input is `A`, the second is `B`
        pub fn from_input_index(index: usize) -> Option<Self> {
            match index {
                0 => Some(Side::A),
                1 => Some(Side::B),
                _ => None,
            }
        }
    }

    impl fmt::Display for Side {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Side::A => f.write_str("A"),
                Side::B => f.write_str("B"),
            }
        }
    }

    impl FromStr for Side {
        type Err = anyhow::Error;

        fn from_str(s: &str) -> anyhow::Result<Self> {
            match s {
                "A" => Ok(Side::A),
                "B" => Ok(Side::B),
                _ => Err(anyhow!("unknown matrix tag `{}`", s)),
            }
        }
    }

    /// Coordinate of one cell of the result matrix
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct CellKey {
        pub row: usize,
        pub col: usize,
    }

    impl CellKey {
        pub fn new(row: usize, col: usize) -> Self {
            Self { row, col }
        }
    }

    impl fmt::Display for CellKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "[{}, {}]", self.row, self.col)
        }
    }

    /// One input element on its way to an output cell.
    /// `index` is the position along the shared inner dimension.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct TaggedElement {
        pub side: Side,
        pub index: usize,
        pub value: f64,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct KeyValue {
        pub key: CellKey,
        pub value: TaggedElement,
    }

    impl KeyValue {
        pub fn new(key: CellKey, value: TaggedElement) -> Self {
            Self { key, value }
        }

        /// Encode as one intermediate file line, `row col side index value`
        pub fn to_line(&self) -> String {
            format!(
                "{} {} {} {} {:?}\n",
                self.key.row, self.key.col, self.value.side, self.value.index, self.value.value
            )
        }

        pub fn parse_line(line: &str) -> anyhow::Result<Self> {
            let fields = line.split_whitespace().collect::<Vec<&str>>();
            if fields.len() != 5 {
                return Err(anyhow!("expected 5 fields in intermediate line {:?}", line));
            }
            let key = CellKey::new(
                fields[0].parse().context("bad row")?,
                fields[1].parse().context("bad column")?,
            );
            let value = TaggedElement {
                side: fields[2].parse()?,
                index: fields[3].parse().context("bad inner index")?,
                value: fields[4].parse().context("bad value")?,
            };
            Ok(Self { key, value })
        }
    }

    /// Route every element of `matrix` to each output cell that needs it.
    ///
    /// `A[i][j]` goes to `(i, k)` for every output column `k`, `B[j][k]` goes to
    /// `(i, k)` for every output row `i`. Both yield `a_rows * inner * b_cols`
    /// pairs. The shape is checked before anything is emitted.
    pub fn distribute<'a>(
        matrix: &'a Matrix,
        side: Side,
        shape: &JobShape,
    ) -> Result<Box<dyn Iterator<Item = KeyValue> + Send + 'a>> {
        let expected = match side {
            Side::A => shape.a(),
            Side::B => shape.b(),
        };
        if matrix.shape() != expected {
            let (a, b) = match side {
                Side::A => (matrix.shape(), shape.b()),
                Side::B => (shape.a(), matrix.shape()),
            };
            return Err(MatrixError::DimensionMismatch {
                a,
                b,
                message: format!(
                    "matrix {} is {} but the job expects {} to be {}",
                    matrix.name(),
                    matrix.shape(),
                    side,
                    expected
                ),
            });
        }

        let JobShape { a_rows, inner, b_cols } = *shape;
        let iter: Box<dyn Iterator<Item = KeyValue> + Send + 'a> = match side {
            Side::A => Box::new((0..a_rows).flat_map(move |i| {
                (0..inner).flat_map(move |j| {
                    let value = TaggedElement { side, index: j, value: matrix.get(i, j) };
                    (0..b_cols).map(move |k| KeyValue::new(CellKey::new(i, k), value))
                })
            })),
            Side::B => Box::new((0..inner).flat_map(move |j| {
                (0..b_cols).flat_map(move |k| {
                    let value = TaggedElement { side, index: j, value: matrix.get(j, k) };
                    (0..a_rows).map(move |i| KeyValue::new(CellKey::new(i, k), value))
                })
            })),
        };
        Ok(iter)
    }

    /// Place one side's elements by inner index, rejecting duplicates and strays
    fn place(key: CellKey, side: Side, elements: &[TaggedElement], inner: usize) -> Result<Vec<f64>> {
        let defect = |defect: BucketDefect| MatrixError::IncompleteBucket { key, defect };
        let mut slots = vec![None; inner];
        for element in elements {
            let slot = slots
                .get_mut(element.index)
                .ok_or_else(|| defect(BucketDefect::OutOfRange { side, index: element.index }))?;
            if slot.replace(element.value).is_some() {
                return Err(defect(BucketDefect::Duplicate { side, index: element.index }));
            }
        }
        // with no strays or duplicates a short bucket shows up as a missing index
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or_else(|| defect(BucketDefect::Missing { side, index })))
            .collect()
    }

    /// Join one output cell's bucket on the inner index and sum the products.
    ///
    /// The bucket may arrive in any order. Products are accumulated in
    /// ascending inner index so the result does not depend on that order.
    pub fn reduce_cell(key: CellKey, bucket: &[TaggedElement], inner: usize) -> Result<f64> {
        let (a, b): (Vec<TaggedElement>, Vec<TaggedElement>) =
            bucket.iter().copied().partition(|element| element.side == Side::A);
        let a = place(key, Side::A, &a, inner)?;
        let b = place(key, Side::B, &b, inner)?;
        Ok(a.iter().zip(&b).fold(0.0, |sum, (x, y)| sum + x * y))
    }

    #[cfg(test)]
    mod tests {
        use std::collections::HashMap;

        use super::*;

        fn matrices() -> (Matrix, Matrix, JobShape) {
            let a = Matrix::from_rows("A", vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
            let b = Matrix::from_rows(
                "B",
                vec![vec![1.0, 0.0, 2.0, 1.0], vec![0.0, 1.0, 1.0, 3.0], vec![2.0, 2.0, 0.0, 1.0]],
            )
            .unwrap();
            let shape = JobShape::new(a.shape(), b.shape()).unwrap();
            (a, b, shape)
        }

        fn tagged(side: Side, index: usize, value: f64) -> TaggedElement {
            TaggedElement { side, index, value }
        }

        #[test]
        fn distribute_emits_expected_counts() {
            let (a, b, shape) = matrices();
            let from_a = distribute(&a, Side::A, &shape).unwrap().collect::<Vec<_>>();
            let from_b = distribute(&b, Side::B, &shape).unwrap().collect::<Vec<_>>();
            assert_eq!(from_a.len(), 2 * 3 * 4);
            assert_eq!(from_b.len(), 2 * 3 * 4);

            // every cell gets exactly `inner` elements from each side
            for pairs in [&from_a, &from_b] {
                let mut per_key = HashMap::new();
                for kv in pairs.iter() {
                    *per_key.entry(kv.key).or_insert(0) += 1;
                }
                assert_eq!(per_key.len(), 2 * 4);
                assert!(per_key.values().all(|&n| n == 3));
            }
        }

        #[test]
        fn distribute_routes_elements_to_their_cells() {
            let (a, b, shape) = matrices();
            assert!(distribute(&a, Side::A, &shape)
                .unwrap()
                .filter(|kv| kv.key == CellKey::new(1, 2))
                .all(|kv| kv.value.value == a.get(1, kv.value.index)));
            assert!(distribute(&b, Side::B, &shape)
                .unwrap()
                .filter(|kv| kv.key == CellKey::new(0, 3))
                .all(|kv| kv.value.value == b.get(kv.value.index, 3)));
        }

        #[test]
        fn distribute_rejects_wrong_side_shape() {
            let (a, _, shape) = matrices();
            assert!(matches!(
                distribute(&a, Side::B, &shape),
                Err(MatrixError::DimensionMismatch { .. })
            ));
        }

        #[test]
        fn reduce_is_order_independent() {
            let key = CellKey::new(0, 0);
            let mut bucket = vec![
                tagged(Side::A, 0, 0.1),
                tagged(Side::A, 1, 0.2),
                tagged(Side::A, 2, 0.3),
                tagged(Side::B, 0, 0.7),
                tagged(Side::B, 1, 1e-17),
                tagged(Side::B, 2, 3.3),
            ];
            let expected = reduce_cell(key, &bucket, 3).unwrap();
            assert_eq!(expected, 0.1 * 0.7 + 0.2 * 1e-17 + 0.3 * 3.3);
            for rotation in 1..bucket.len() {
                bucket.rotate_left(1);
                let mut reversed = bucket.clone();
                reversed.reverse();
                assert_eq!(reduce_cell(key, &bucket, 3).unwrap().to_bits(), expected.to_bits(), "rotation {}", rotation);
                assert_eq!(reduce_cell(key, &reversed, 3).unwrap().to_bits(), expected.to_bits());
            }
        }

        #[test]
        fn reduce_rejects_missing_contribution() {
            let key = CellKey::new(1, 1);
            let bucket = [tagged(Side::A, 0, 1.0), tagged(Side::A, 1, 1.0), tagged(Side::B, 0, 1.0)];
            match reduce_cell(key, &bucket, 2) {
                Err(MatrixError::IncompleteBucket { key: k, defect }) => {
                    assert_eq!(k, key);
                    assert_eq!(defect, BucketDefect::Missing { side: Side::B, index: 1 });
                }
                other => panic!("expected incomplete bucket, got {:?}", other),
            }
        }

        #[test]
        fn reduce_rejects_duplicate_index() {
            let bucket = [
                tagged(Side::A, 0, 1.0),
                tagged(Side::A, 0, 1.0),
                tagged(Side::B, 0, 1.0),
                tagged(Side::B, 1, 1.0),
            ];
            assert!(matches!(
                reduce_cell(CellKey::new(0, 0), &bucket, 2),
                Err(MatrixError::IncompleteBucket {
                    defect: BucketDefect::Duplicate { side: Side::A, index: 0 },
                    ..
                })
            ));
        }

        #[test]
        fn reduce_rejects_out_of_range_index() {
            let bucket = [
                tagged(Side::A, 0, 1.0),
                tagged(Side::A, 1, 1.0),
                tagged(Side::B, 0, 1.0),
                tagged(Side::B, 5, 1.0),
            ];
            assert!(matches!(
                reduce_cell(CellKey::new(0, 0), &bucket, 2),
                Err(MatrixError::IncompleteBucket {
                    defect: BucketDefect::OutOfRange { side: Side::B, index: 5 },
                    ..
                })
            ));
        }

        #[test]
        fn key_value_line_round_trip_keeps_bits() {
            let kv = KeyValue::new(CellKey::new(3, 7), tagged(Side::B, 2, 0.1 + 0.2));
            let parsed = KeyValue::parse_line(kv.to_line().trim_end()).unwrap();
            assert_eq!(parsed.key, kv.key);
            assert_eq!(parsed.value.side, Side::B);
            assert_eq!(parsed.value.value.to_bits(), kv.value.value.to_bits());
        }

        #[test]
        fn key_value_rejects_garbage() {
            assert!(KeyValue::parse_line("1 2 C 0 1.0").is_err());
            assert!(KeyValue::parse_line("1 2 A 0").is_err());
        }
    }
}
