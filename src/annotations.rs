//! Annotations attached to images, datasets and projects on the image server:
//! tags, key/value maps, file attachments and tables.
//!
//! Measurement results usually travel as tables; see [distances_table()] for
//! the table form of [compute_distances()](crate::distances::compute_distances)
//! output.

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::distances::PairwiseDistances;
use crate::error::{Error, Result};

/// Namespace that makes map annotations editable in the server's clients.
pub const NS_CLIENT_MAP_ANNOTATION: &str = "openmicroscopy.org/omero/client/mapAnnotation";

/// Namespace of table (bulk) annotations.
pub const NS_BULK_ANNOTATIONS: &str = "openmicroscopy.org/omero/bulk_annotations";

const TABLE_SUFFIX_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Annotation {
    Tag(String),
    Map(MapAnnotation),
    File(FileAnnotation),
    Table(Table),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapAnnotation {
    pub namespace: Option<String>,
    pub pairs: Vec<(String, String)>,
}

fn map_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl MapAnnotation {
    pub fn new(pairs: Vec<(String, String)>, client_editable: bool) -> Self {
        let namespace = if client_editable {
            Some(NS_CLIENT_MAP_ANNOTATION.to_string())
        } else {
            None
        };
        MapAnnotation{namespace, pairs}
    }

    /// Builds a map annotation from either a JSON object, or an array of
    /// `[key, value]` pairs. Values that are not strings are stored as their
    /// JSON text. Object keys keep their document order.
    pub fn from_json(value: &Value, client_editable: bool) -> Result<Self> {
        let pairs = match value {
            Value::Object(map) => {
                map.iter().map(|(k, v)| (k.clone(), map_value_string(v))).collect()
            },
            Value::Array(items) => {
                let mut pairs = Vec::<(String, String)>::with_capacity(items.len());
                for item in items {
                    match item.as_array().map(|a| a.as_slice()) {
                        Some([Value::String(k), v]) => {
                            pairs.push((k.clone(), map_value_string(v)));
                        },
                        _ => return Err(Error::InvalidAnnotation(format!(
                            "expected a [key, value] pair, got {}", item))),
                    }
                }
                pairs
            },
            other => return Err(Error::InvalidAnnotation(format!(
                "cannot convert {} to a map annotation", other))),
        };
        Ok(MapAnnotation::new(pairs, client_editable))
    }
}

/// A local file to be uploaded and attached.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileAnnotation {
    pub path: PathBuf,
    pub namespace: Option<String>,
    pub description: Option<String>,
}

impl FileAnnotation {
    /// # Errors
    /// [Error::Io] if `path` is not a readable file.
    pub fn from_local_file(path: &Path, namespace: Option<&str>,
                           description: Option<&str>) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{:?} is not a file", path))));
        }
        Ok(FileAnnotation{path: path.to_path_buf(),
                          namespace: namespace.map(String::from),
                          description: description.map(String::from)})
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ColumnValues {
    /// `size` is the length of the longest value.
    String { size: usize, values: Vec<String> },
    Long(Vec<i64>),
    Double(Vec<f64>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::String{values, ..} => values.len(),
            ColumnValues::Long(values) => values.len(),
            ColumnValues::Double(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub description: String,
    pub values: ColumnValues,
}

impl Column {
    pub fn strings(name: &str, description: &str, values: Vec<String>) -> Self {
        let size = values.iter().map(|v| v.len()).max().unwrap_or(0);
        Column{name: name.to_string(), description: description.to_string(),
               values: ColumnValues::String{size, values}}
    }

    pub fn longs(name: &str, description: &str, values: Vec<i64>) -> Self {
        Column{name: name.to_string(), description: description.to_string(),
               values: ColumnValues::Long(values)}
    }

    pub fn doubles(name: &str, description: &str, values: Vec<f64>) -> Self {
        Column{name: name.to_string(), description: description.to_string(),
               values: ColumnValues::Double(values)}
    }

    /// Infers the column type from the first value: strings give a string
    /// column, integers and booleans a long column, other numbers a double
    /// column. Every later value must fit that type; integers are accepted in
    /// double columns.
    pub fn from_json(name: &str, description: &str, values: &[Value]) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidColumn{
            name: name.to_string(), reason};
        let Some(first) = values.first() else {
            return Err(invalid("no values".to_string()));
        };
        match first {
            Value::String(_) => {
                let strings = values.iter().map(|v| v.as_str().map(String::from)
                    .ok_or_else(|| invalid(format!("{} is not a string", v))))
                    .collect::<Result<Vec<String>>>()?;
                Ok(Column::strings(name, description, strings))
            },
            Value::Bool(_) => {
                let longs = values.iter().map(|v| v.as_bool().map(i64::from)
                    .ok_or_else(|| invalid(format!("{} is not a boolean", v))))
                    .collect::<Result<Vec<i64>>>()?;
                Ok(Column::longs(name, description, longs))
            },
            Value::Number(n) if n.is_i64() => {
                let longs = values.iter().map(|v| v.as_i64()
                    .ok_or_else(|| invalid(format!("{} is not an integer", v))))
                    .collect::<Result<Vec<i64>>>()?;
                Ok(Column::longs(name, description, longs))
            },
            Value::Number(_) => {
                let doubles = values.iter().map(|v| v.as_f64()
                    .ok_or_else(|| invalid(format!("{} is not a number", v))))
                    .collect::<Result<Vec<f64>>>()?;
                Ok(Column::doubles(name, description, doubles))
            },
            other => Err(invalid(format!("cannot detect column type for {}", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Table {
    /// Unique file name of the table on the server.
    pub name: String,
    pub namespace: String,
    pub columns: Vec<Column>,
}

fn random_letters(len: usize) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::rng();
    (0..len).map(|_| LETTERS[rng.random_range(0..LETTERS.len())] as char).collect()
}

impl Table {
    /// A table annotation named `<table_name>_<32 random letters>.h5`.
    ///
    /// # Errors
    /// [Error::InvalidColumn] if the columns differ in length, or there are
    /// none.
    pub fn new(table_name: &str, columns: Vec<Column>) -> Result<Self> {
        let Some(first) = columns.first() else {
            return Err(Error::InvalidColumn{
                name: table_name.to_string(), reason: "table has no columns".to_string()});
        };
        let num_rows = first.values.len();
        if let Some(column) = columns.iter().find(|c| c.values.len() != num_rows) {
            return Err(Error::InvalidColumn{
                name: column.name.clone(),
                reason: format!("has {} rows, expected {}", column.values.len(), num_rows)});
        }
        Ok(Table{name: format!("{}_{}.h5", table_name, random_letters(TABLE_SUFFIX_LEN)),
                 namespace: NS_BULK_ANNOTATIONS.to_string(),
                 columns})
    }

    /// Builds a table from parallel lists of column names, descriptions and
    /// JSON values. See [Column::from_json()] for type inference.
    pub fn from_json_columns(table_name: &str, names: &[&str], descriptions: &[&str],
                             values: &[Vec<Value>]) -> Result<Self> {
        if names.len() != descriptions.len() || names.len() != values.len() {
            return Err(Error::InvalidColumn{
                name: table_name.to_string(),
                reason: format!("{} names, {} descriptions and {} value lists",
                                names.len(), descriptions.len(), values.len())});
        }
        let columns = names.iter().zip(descriptions.iter()).zip(values.iter())
            .map(|((n, d), v)| Column::from_json(n, d, v))
            .collect::<Result<Vec<Column>>>()?;
        Table::new(table_name, columns)
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }
}

/// One table row per retained nearest neighbor match across all channel
/// pairs.
pub fn distances_table(table_name: &str, distances: &[PairwiseDistances])
                       -> Result<Table> {
    let mut channel_a = Vec::<i64>::new();
    let mut channel_b = Vec::<i64>::new();
    let mut index_a = Vec::<i64>::new();
    let mut index_b = Vec::<i64>::new();
    let mut x = Vec::<f64>::new();
    let mut y = Vec::<f64>::new();
    let mut z = Vec::<f64>::new();
    let mut distance = Vec::<f64>::new();
    for pair in distances {
        for m in pair.iter() {
            channel_a.push(pair.channels.0 as i64);
            channel_b.push(pair.channels.1 as i64);
            index_a.push(m.index_a as i64);
            index_b.push(m.index_b as i64);
            x.push(m.coords[0]);
            y.push(m.coords[1]);
            z.push(m.coords[2]);
            distance.push(m.distance);
        }
    }
    Table::new(table_name, vec![
        Column::longs("channel_A", "Source channel", channel_a),
        Column::longs("channel_B", "Target channel", channel_b),
        Column::longs("index_A", "Spot index in the source channel", index_a),
        Column::longs("index_B", "Nearest spot index in the target channel", index_b),
        Column::doubles("x_A", "Source spot x", x),
        Column::doubles("y_A", "Source spot y", y),
        Column::doubles("z_A", "Source spot z", z),
        Column::doubles("distance", "Weighted distance to the nearest spot", distance),
    ])
}

// mod tests.
