//! In-memory tabular data and the relational operations transform functions build on.

use crate::error::FrameError;
use crate::schema::{DataType, Field, Schema};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// A single row; values are positionally aligned with the frame's schema.
pub type Row = Vec<Value>;

/// A materialised table: a schema plus rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    schema: Schema,
    rows: Vec<Row>,
}

impl Frame {
    /// Create a frame, checking that every row matches the schema width.
    pub fn new(schema: Schema, rows: Vec<Row>) -> Result<Self, FrameError> {
        let expected = schema.len();
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
            return Err(FrameError::RowWidth {
                row,
                expected,
                actual: r.len(),
            });
        }
        Ok(Self { schema, rows })
    }

    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.field_names()
    }

    /// Resolve a column name to its position.
    pub fn column_index(&self, name: &str) -> Result<usize, FrameError> {
        match self.schema.positions(name).as_slice() {
            [index] => Ok(*index),
            [] => Err(FrameError::ColumnNotFound {
                column: name.to_string(),
                available: self.column_names(),
            }),
            _ => Err(FrameError::AmbiguousColumn {
                column: name.to_string(),
            }),
        }
    }

    /// Values of one column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&Value>, FrameError> {
        let index = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| &r[index]).collect())
    }

    /// Append the rows of another frame with an identical column layout.
    pub fn append(&mut self, other: Frame) -> Result<(), FrameError> {
        let ours = self.schema.fields().iter().map(|f| (&f.name, f.data_type));
        let theirs = other.schema.fields().iter().map(|f| (&f.name, f.data_type));
        if !ours.eq(theirs) {
            return Err(FrameError::SchemaMismatch {
                message: format!(
                    "[{}] vs [{}]",
                    self.column_names().join(", "),
                    other.column_names().join(", ")
                ),
            });
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Project the named columns in the given order. `*` expands to every column.
    pub fn select(&self, columns: &[String]) -> Result<Frame, FrameError> {
        let mut indices = Vec::new();
        for column in columns {
            if column == "*" {
                indices.extend(0..self.num_columns());
            } else {
                indices.push(self.column_index(column)?);
            }
        }
        let fields = indices
            .iter()
            .map(|&i| self.schema.fields()[i].clone())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Frame {
            schema: Schema::new(fields),
            rows,
        })
    }

    /// Remove every column whose name is listed. Unknown names are ignored.
    pub fn drop_columns(&self, columns: &[String]) -> Frame {
        let keep: Vec<usize> = self
            .schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| !columns.contains(&f.name))
            .map(|(i, _)| i)
            .collect();
        let fields = keep
            .iter()
            .map(|&i| self.schema.fields()[i].clone())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Frame {
            schema: Schema::new(fields),
            rows,
        }
    }

    /// Add a column, or replace every column with the same name in place.
    pub fn with_column(
        &self,
        name: &str,
        data_type: DataType,
        values: Vec<Value>,
    ) -> Result<Frame, FrameError> {
        if values.len() != self.num_rows() {
            return Err(FrameError::invalid(format!(
                "column '{name}' has {} values for {} rows",
                values.len(),
                self.num_rows()
            )));
        }
        let positions = self.schema.positions(name);
        let mut fields = self.schema.fields().to_vec();
        let mut rows = self.rows.clone();
        if positions.is_empty() {
            fields.push(Field::new(name, data_type));
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(value);
            }
        } else {
            for &p in &positions {
                fields[p] = Field::new(name, data_type);
            }
            for (row, value) in rows.iter_mut().zip(values) {
                for &p in &positions {
                    row[p] = value.clone();
                }
            }
        }
        Ok(Frame {
            schema: Schema::new(fields),
            rows,
        })
    }

    /// Keep the rows whose mask entry is true.
    pub fn retain_mask(&self, mask: &[bool]) -> Result<Frame, FrameError> {
        if mask.len() != self.num_rows() {
            return Err(FrameError::invalid(format!(
                "mask has {} entries for {} rows",
                mask.len(),
                self.num_rows()
            )));
        }
        let rows = self
            .rows
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(row, _)| row.clone())
            .collect();
        Ok(Frame {
            schema: self.schema.clone(),
            rows,
        })
    }

    /// Cast one column to a new type. Values that cannot be cast become null.
    pub fn cast_column(&self, name: &str, to: DataType) -> Result<Frame, FrameError> {
        let index = self.column_index(name)?;
        let mut fields = self.schema.fields().to_vec();
        fields[index].data_type = to;
        fields[index].nullable = true;
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row[index] = to.cast(&row[index]);
                row
            })
            .collect();
        Ok(Frame {
            schema: Schema::new(fields),
            rows,
        })
    }

    /// Remove duplicate rows, keeping the first occurrence. With a subset, rows
    /// are compared on those columns only.
    pub fn distinct(&self, subset: Option<&[String]>) -> Result<Frame, FrameError> {
        let indices: Vec<usize> = match subset {
            Some(columns) if !columns.is_empty() => columns
                .iter()
                .map(|c| self.column_index(c))
                .collect::<Result<_, _>>()?,
            _ => (0..self.num_columns()).collect(),
        };
        let mut seen = HashSet::new();
        let rows = self
            .rows
            .iter()
            .filter(|row| seen.insert(row_key(row, &indices, true)))
            .cloned()
            .collect();
        Ok(Frame {
            schema: self.schema.clone(),
            rows,
        })
    }

    /// Join with another frame on equally named key columns.
    ///
    /// Output columns are the keys once, then the remaining left columns, then
    /// the remaining right columns. Semi and anti joins return left columns only.
    /// Null keys never match.
    pub fn join(&self, right: &Frame, on: &[String], how: JoinType) -> Result<Frame, FrameError> {
        if on.is_empty() {
            return match how {
                JoinType::Inner | JoinType::Cross => Ok(self.cross_join(right)),
                other => Err(FrameError::invalid(format!(
                    "{other} join requires at least one key column"
                ))),
            };
        }

        let left_keys = on
            .iter()
            .map(|k| self.column_index(k))
            .collect::<Result<Vec<_>, _>>()?;
        let right_keys = on
            .iter()
            .map(|k| right.column_index(k))
            .collect::<Result<Vec<_>, _>>()?;
        let left_rest: Vec<usize> = (0..self.num_columns())
            .filter(|i| !left_keys.contains(i))
            .collect();
        let right_rest: Vec<usize> = (0..right.num_columns())
            .filter(|i| !right_keys.contains(i))
            .collect();

        let mut lookup: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            if right_keys.iter().any(|&k| row[k].is_null()) {
                continue;
            }
            lookup
                .entry(row_key(row, &right_keys, false))
                .or_default()
                .push(i);
        }

        let match_for = |row: &Row| matching_rows(&lookup, row, &left_keys);

        if matches!(how, JoinType::Semi | JoinType::Anti) {
            let keep_matched = how == JoinType::Semi;
            let rows = self
                .rows
                .iter()
                .filter(|row| match_for(row).is_empty() != keep_matched)
                .cloned()
                .collect();
            return Ok(Frame {
                schema: self.schema.clone(),
                rows,
            });
        }

        let outer = how != JoinType::Inner && how != JoinType::Cross;
        let mut fields: Vec<Field> = left_keys
            .iter()
            .map(|&i| self.schema.fields()[i].clone())
            .collect();
        fields.extend(left_rest.iter().map(|&i| self.schema.fields()[i].clone()));
        fields.extend(right_rest.iter().map(|&i| right.schema.fields()[i].clone()));
        if outer {
            for f in &mut fields {
                f.nullable = true;
            }
        }

        let keep_left_unmatched = matches!(how, JoinType::Left | JoinType::Full);
        let keep_right_unmatched = matches!(how, JoinType::Right | JoinType::Full);
        let mut right_matched = vec![false; right.num_rows()];
        let mut rows = Vec::new();

        for left_row in &self.rows {
            let matches = match_for(left_row);
            for &r in matches {
                right_matched[r] = true;
                let right_row = &right.rows[r];
                let mut out: Row = left_keys.iter().map(|&i| left_row[i].clone()).collect();
                out.extend(left_rest.iter().map(|&i| left_row[i].clone()));
                out.extend(right_rest.iter().map(|&i| right_row[i].clone()));
                rows.push(out);
            }
            if matches.is_empty() && keep_left_unmatched {
                let mut out: Row = left_keys.iter().map(|&i| left_row[i].clone()).collect();
                out.extend(left_rest.iter().map(|&i| left_row[i].clone()));
                out.extend(right_rest.iter().map(|_| Value::Null));
                rows.push(out);
            }
        }

        if keep_right_unmatched {
            for (r, right_row) in right.rows.iter().enumerate() {
                if right_matched[r] {
                    continue;
                }
                let mut out: Row = right_keys.iter().map(|&i| right_row[i].clone()).collect();
                out.extend(left_rest.iter().map(|_| Value::Null));
                out.extend(right_rest.iter().map(|&i| right_row[i].clone()));
                rows.push(out);
            }
        }

        Ok(Frame {
            schema: Schema::new(fields),
            rows,
        })
    }

    fn cross_join(&self, right: &Frame) -> Frame {
        let mut fields = self.schema.fields().to_vec();
        fields.extend(right.schema.fields().iter().cloned());
        let rows = self
            .rows
            .iter()
            .flat_map(|l| {
                right.rows.iter().map(move |r| {
                    let mut out = l.clone();
                    out.extend(r.iter().cloned());
                    out
                })
            })
            .collect();
        Frame {
            schema: Schema::new(fields),
            rows,
        }
    }
}

impl fmt::Display for Frame {
    /// Tab-separated preview, header first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.column_names().join("\t"))?;
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .map(|v| match v {
                    Value::Null => "null".to_string(),
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

fn matching_rows<'a>(
    lookup: &'a HashMap<String, Vec<usize>>,
    row: &Row,
    keys: &[usize],
) -> &'a [usize] {
    if keys.iter().any(|&k| row[k].is_null()) {
        return &[];
    }
    lookup
        .get(&row_key(row, keys, false))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Canonical text key for a set of values. Numbers that are equal compare equal
/// regardless of integer or float representation.
fn row_key(row: &Row, indices: &[usize], include_nulls: bool) -> String {
    let mut key = String::new();
    for &i in indices {
        match &row[i] {
            Value::Null if include_nulls => key.push_str("n:"),
            Value::Null => {}
            Value::Number(n) => {
                key.push_str("d:");
                match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => key.push_str(&i.to_string()),
                    (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                        key.push_str(&(f as i64).to_string())
                    }
                    _ => key.push_str(&n.to_string()),
                }
            }
            Value::String(s) => {
                key.push_str("s:");
                key.push_str(s);
            }
            other => {
                key.push_str("v:");
                key.push_str(&other.to_string());
            }
        }
        key.push('\u{1f}');
    }
    key
}

// ---------------------------------------------------------------------------
// JoinType
// ---------------------------------------------------------------------------

/// Join strategies, spelled as in Spark's `how` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Full => "full",
            JoinType::Semi => "semi",
            JoinType::Anti => "anti",
            JoinType::Cross => "cross",
        };
        f.write_str(name)
    }
}

impl FromStr for JoinType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "");
        match normalized.as_str() {
            "inner" => Ok(JoinType::Inner),
            "left" | "leftouter" => Ok(JoinType::Left),
            "right" | "rightouter" => Ok(JoinType::Right),
            "outer" | "full" | "fullouter" => Ok(JoinType::Full),
            "semi" | "leftsemi" => Ok(JoinType::Semi),
            "anti" | "leftanti" => Ok(JoinType::Anti),
            "cross" => Ok(JoinType::Cross),
            _ => Err(format!(
                "unsupported join type '{s}' (expected inner, left, right, outer, full, semi, anti or cross)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn people() -> Frame {
        Frame::new(
            Schema::of(&[
                ("id", DataType::Integer),
                ("name", DataType::String),
                ("age", DataType::Integer),
            ]),
            vec![
                vec![json!(1), json!("Alice"), json!(30)],
                vec![json!(2), json!("Bob"), json!(25)],
                vec![json!(3), json!("Carol"), Value::Null],
                vec![Value::Null, json!("Nobody"), json!(50)],
            ],
        )
        .unwrap()
    }

    fn orders() -> Frame {
        Frame::new(
            Schema::of(&[("id", DataType::Long), ("amount", DataType::Double)]),
            vec![
                vec![json!(1), json!(10.5)],
                vec![json!(1), json!(3.0)],
                vec![json!(4), json!(7.25)],
                vec![Value::Null, json!(1.0)],
            ],
        )
        .unwrap()
    }

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let err = Frame::new(
            Schema::of(&[("a", DataType::String)]),
            vec![vec![json!("x")], vec![json!("y"), json!("z")]],
        )
        .unwrap_err();
        assert_eq!(
            err,
            FrameError::RowWidth {
                row: 1,
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_select_with_star_and_order() {
        let frame = people();
        let selected = frame.select(&names(&["age", "id"])).unwrap();
        assert_eq!(selected.column_names(), names(&["age", "id"]));
        assert_eq!(selected.rows()[0], vec![json!(30), json!(1)]);

        let all = frame.select(&names(&["*"])).unwrap();
        assert_eq!(all.column_names(), frame.column_names());

        let err = frame.select(&names(&["salary"])).unwrap_err();
        assert!(matches!(err, FrameError::ColumnNotFound { .. }));
    }

    #[test]
    fn test_drop_ignores_missing_columns() {
        let dropped = people().drop_columns(&names(&["age", "not_there"]));
        assert_eq!(dropped.column_names(), names(&["id", "name"]));
    }

    #[test]
    fn test_with_column_adds_and_replaces() {
        let frame = people();
        let added = frame
            .with_column("flag", DataType::Boolean, vec![json!(true); 4])
            .unwrap();
        assert_eq!(added.num_columns(), 4);

        let replaced = frame
            .with_column(
                "age",
                DataType::String,
                vec![json!("a"), json!("b"), json!("c"), json!("d")],
            )
            .unwrap();
        assert_eq!(replaced.column_names(), frame.column_names());
        assert_eq!(replaced.schema().fields()[2].data_type, DataType::String);
        assert_eq!(replaced.rows()[1][2], json!("b"));
    }

    #[test]
    fn test_cast_column_nulls_invalid_values() {
        let frame = Frame::new(
            Schema::of(&[("v", DataType::String)]),
            vec![vec![json!("12")], vec![json!("oops")]],
        )
        .unwrap();
        let cast = frame.cast_column("v", DataType::Integer).unwrap();
        assert_eq!(cast.schema().fields()[0].data_type, DataType::Integer);
        assert_eq!(cast.rows(), &[vec![json!(12)], vec![Value::Null]]);
    }

    #[test]
    fn test_distinct_keeps_first() {
        let frame = Frame::new(
            Schema::of(&[("k", DataType::String), ("v", DataType::Integer)]),
            vec![
                vec![json!("a"), json!(1)],
                vec![json!("a"), json!(2)],
                vec![json!("a"), json!(1)],
                vec![Value::Null, json!(3)],
                vec![Value::Null, json!(4)],
            ],
        )
        .unwrap();
        assert_eq!(frame.distinct(None).unwrap().num_rows(), 4);

        let by_key = frame.distinct(Some(&names(&["k"]))).unwrap();
        assert_eq!(
            by_key.rows(),
            &[vec![json!("a"), json!(1)], vec![Value::Null, json!(3)]]
        );
    }

    #[test]
    fn test_inner_join_column_order_and_multiplicity() {
        let joined = people()
            .join(&orders(), &names(&["id"]), JoinType::Inner)
            .unwrap();
        assert_eq!(joined.column_names(), names(&["id", "name", "age", "amount"]));
        assert_eq!(
            joined.rows(),
            &[
                vec![json!(1), json!("Alice"), json!(30), json!(10.5)],
                vec![json!(1), json!("Alice"), json!(30), json!(3.0)],
            ]
        );
    }

    #[test]
    fn test_outer_joins() {
        let left = people()
            .join(&orders(), &names(&["id"]), JoinType::Left)
            .unwrap();
        assert_eq!(left.num_rows(), 5);
        assert_eq!(left.rows()[4], vec![Value::Null, json!("Nobody"), json!(50), Value::Null]);

        let right = people()
            .join(&orders(), &names(&["id"]), JoinType::Right)
            .unwrap();
        assert_eq!(right.num_rows(), 4);
        assert_eq!(right.rows()[2], vec![json!(4), Value::Null, Value::Null, json!(7.25)]);

        let full = people()
            .join(&orders(), &names(&["id"]), JoinType::Full)
            .unwrap();
        assert_eq!(full.num_rows(), 7);
    }

    #[test]
    fn test_semi_and_anti_joins() {
        let semi = people()
            .join(&orders(), &names(&["id"]), JoinType::Semi)
            .unwrap();
        assert_eq!(semi.column_names(), people().column_names());
        assert_eq!(semi.num_rows(), 1);

        let anti = people()
            .join(&orders(), &names(&["id"]), JoinType::Anti)
            .unwrap();
        assert_eq!(anti.num_rows(), 3);
    }

    #[test]
    fn test_cross_join_without_keys() {
        let crossed = people().join(&orders(), &[], JoinType::Cross).unwrap();
        assert_eq!(crossed.num_rows(), 16);
        assert_eq!(crossed.num_columns(), 5);
        assert!(matches!(
            crossed.column_index("id"),
            Err(FrameError::AmbiguousColumn { .. })
        ));
        assert!(people().join(&orders(), &[], JoinType::Left).is_err());
    }

    #[test]
    fn test_join_type_spellings() {
        assert_eq!("left_outer".parse::<JoinType>().unwrap(), JoinType::Left);
        assert_eq!("FULL_OUTER".parse::<JoinType>().unwrap(), JoinType::Full);
        assert_eq!("outer".parse::<JoinType>().unwrap(), JoinType::Full);
        assert_eq!("left_anti".parse::<JoinType>().unwrap(), JoinType::Anti);
        assert!("sideways".parse::<JoinType>().is_err());
    }

    #[test]
    fn test_append_requires_same_layout() {
        let mut frame = people();
        frame.append(people()).unwrap();
        assert_eq!(frame.num_rows(), 8);
        assert!(frame.append(orders()).is_err());
    }
}
