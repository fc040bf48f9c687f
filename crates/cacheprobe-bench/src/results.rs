//! Benchmark result tables and per-model summaries.
//!
//! A result CSV has a header `Layer Name,<algo>,<algo>,…` followed by one row
//! per artifact file: `<file>,<ratio>,<ratio>,…`, positionally aligned with
//! the algorithm names.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cacheprobe_core::{Error, Result};

/// Label of the first header column.
pub const LABEL_COLUMN: &str = "Layer Name";

/// One artifact's compression ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub file: String,
    pub ratios: Vec<f64>,
}

/// A parsed result CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    label: String,
    algorithms: Vec<String>,
    rows: Vec<ResultRow>,
}

impl ResultTable {
    /// Empty table with the given algorithm columns.
    pub fn new<I, S>(algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: LABEL_COLUMN.to_string(),
            algorithms: algorithms.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row. The ratio count must match the algorithm count.
    pub fn push(&mut self, file: impl Into<String>, ratios: Vec<f64>) -> Result<()> {
        let file = file.into();
        if ratios.len() != self.algorithms.len() {
            return Err(Error::InvalidResult {
                path: PathBuf::new(),
                message: format!(
                    "row '{}' has {} ratios, expected {}",
                    file,
                    ratios.len(),
                    self.algorithms.len()
                ),
            });
        }
        self.rows.push(ResultRow { file, ratios });
        Ok(())
    }

    /// Parses CSV text. Blank lines are ignored and a single trailing empty
    /// field per line is tolerated.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidResult {
            path: PathBuf::new(),
            message,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| invalid(e.to_string()))?;
            let line = record.position().map_or(0, |p| p.line());
            let fields = record_fields(&record);
            if !fields.is_empty() {
                records.push((line, fields));
            }
        }

        let mut records = records.into_iter();
        let (_, mut columns) = records
            .next()
            .ok_or_else(|| invalid("missing header line".to_string()))?;
        let label = columns.remove(0);
        let algorithms = columns;

        let mut rows = Vec::new();
        for (line, mut fields) in records {
            if fields.len() != algorithms.len() + 1 {
                return Err(invalid(format!(
                    "line {}: expected {} fields, found {}",
                    line,
                    algorithms.len() + 1,
                    fields.len()
                )));
            }
            let file = fields.remove(0);
            let ratios = fields
                .iter()
                .map(|f| {
                    f.parse::<f64>()
                        .map_err(|e| invalid(format!("line {}: bad ratio '{}': {}", line, f, e)))
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push(ResultRow { file, ratios });
        }

        Ok(Self {
            label,
            algorithms,
            rows,
        })
    }

    /// Reads and parses a result CSV.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::InvalidResult {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&text).map_err(|e| match e {
            Error::InvalidResult { message, .. } => Error::InvalidResult {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Renders the table with ratios at four decimals.
    pub fn to_csv(&self) -> Result<String> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        let csv_err = |e: csv::Error| Error::io(format!("failed to encode result table: {e}"));

        wtr.write_record(std::iter::once(&self.label).chain(&self.algorithms))
            .map_err(csv_err)?;
        for row in &self.rows {
            let ratios = row.ratios.iter().map(|r| format!("{r:.4}"));
            wtr.write_record(std::iter::once(row.file.clone()).chain(ratios))
                .map_err(csv_err)?;
        }

        let bytes = wtr
            .into_inner()
            .map_err(|e| Error::io(format!("failed to flush result table: {e}")))?;
        String::from_utf8(bytes).map_err(|e| Error::io(e.to_string()))
    }

    /// Writes the table to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_csv()?)
            .map_err(|e| Error::io(format!("failed to write {}: {}", path.display(), e)))
    }

    /// Label of the file column.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Algorithm names in column order.
    #[must_use]
    pub fn algorithms(&self) -> &[String] {
        &self.algorithms
    }

    #[must_use]
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Mean ratio per algorithm. Empty when the table has no rows.
    #[must_use]
    pub fn averages(&self) -> IndexMap<String, f64> {
        if self.rows.is_empty() {
            return IndexMap::new();
        }
        let n = self.rows.len() as f64;
        self.algorithms
            .iter()
            .enumerate()
            .map(|(i, algo)| {
                let sum: f64 = self.rows.iter().map(|r| r.ratios[i]).sum();
                (algo.clone(), sum / n)
            })
            .collect()
    }
}

/// Fields of a record, minus one trailing empty field. A record of only
/// empty fields comes back empty.
fn record_fields(record: &csv::StringRecord) -> Vec<String> {
    let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
    if fields.len() > 1 && fields.last().is_some_and(String::is_empty) {
        fields.pop();
    }
    if fields.iter().all(String::is_empty) {
        fields.clear();
    }
    fields
}

/// Average ratios for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Model directory name.
    pub model: String,
    /// Leading `_`-separated component of the model name, used as a plot label.
    pub category: String,
    /// Number of artifact rows averaged.
    pub files: usize,
    /// Mean ratio per algorithm, in column order.
    pub averages: IndexMap<String, f64>,
}

impl ModelSummary {
    /// Summarizes a parsed table.
    #[must_use]
    pub fn from_table(model: impl Into<String>, table: &ResultTable) -> Self {
        let model = model.into();
        let category = model.split('_').next().unwrap_or_default().to_string();
        Self {
            model,
            category,
            files: table.rows().len(),
            averages: table.averages(),
        }
    }
}

/// Summarizes `<root>/<model>/<result_file>` for every model directory,
/// sorted by model name. Unreadable tables are logged and skipped.
pub fn summarize_dir(root: &Path, result_file: &str) -> Result<Vec<ModelSummary>> {
    let entries = fs::read_dir(root)
        .map_err(|e| Error::io(format!("failed to read {}: {}", root.display(), e)))?;

    let mut models: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                entry.path().join(result_file),
            )
        })
        .collect();
    models.sort();

    let mut summaries = Vec::with_capacity(models.len());
    for (model, path) in models {
        if !path.is_file() {
            debug!(model = %model, "no result table, skipping");
            continue;
        }
        match ResultTable::read(&path) {
            Ok(table) => summaries.push(ModelSummary::from_table(model, &table)),
            Err(e) => warn!(model = %model, error = %e, "skipping unreadable result table"),
        }
    }
    Ok(summaries)
}

/// Union of algorithm names across summaries, in first-seen order.
#[must_use]
pub fn algorithm_columns(summaries: &[ModelSummary]) -> Vec<String> {
    let mut columns: IndexMap<&str, ()> = IndexMap::new();
    for summary in summaries {
        for algo in summary.averages.keys() {
            columns.entry(algo.as_str()).or_insert(());
        }
    }
    columns.into_keys().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "Layer Name,BDI,FPC,BDI 2B,BDI+ZR,ZeroVec,ZerosRun,BDI+ZE,BDI+ZV\n\
        /x/m_conv1_weight,1.2500,1.1000,1.0000,1.3000,1.0500,1.0100,1.2000,1.4000\n\
        /x/m_conv1_bias,1.7500,1.9000,1.0000,1.5000,2.0500,1.0100,1.4000,1.6000\n";

    #[test]
    fn test_parse_header_and_rows() {
        let table = ResultTable::parse(SAMPLE).unwrap();
        assert_eq!(table.label(), "Layer Name");
        assert_eq!(table.algorithms().len(), 8);
        assert_eq!(table.algorithms()[2], "BDI 2B");
        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.rows()[1].file, "/x/m_conv1_bias");
    }

    #[test]
    fn test_averages() {
        let table = ResultTable::parse(SAMPLE).unwrap();
        let avg = table.averages();
        assert!((avg["BDI"] - 1.5).abs() < 1e-9);
        assert!((avg["FPC"] - 1.5).abs() < 1e-9);
        assert!((avg["BDI 2B"] - 1.0).abs() < 1e-9);
        assert_eq!(avg.keys().next().map(String::as_str), Some("BDI"));
    }

    #[test]
    fn test_trailing_comma_and_blank_lines() {
        let text = "Layer Name,BDI,FPC,\n\n/a,1.0,2.0,\n\n";
        let table = ResultTable::parse(text).unwrap();
        assert_eq!(table.algorithms(), &["BDI", "FPC"]);
        assert_eq!(table.rows()[0].ratios, vec![1.0, 2.0]);
    }

    #[test]
    fn test_misaligned_row_rejected() {
        let text = "Layer Name,BDI,FPC\n/a,1.0,2.0\n/b,1.0\n";
        match ResultTable::parse(text) {
            Err(Error::InvalidResult { message, .. }) => {
                assert!(message.starts_with("line 3:"), "{message}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_padded_fields_and_whitespace_lines() {
        let text = "Layer Name , BDI , FPC\r\n   \r\n /a , 1.5 ,2.0\r\n";
        let table = ResultTable::parse(text).unwrap();
        assert_eq!(table.label(), "Layer Name");
        assert_eq!(table.algorithms(), &["BDI", "FPC"]);
        assert_eq!(table.rows()[0].file, "/a");
        assert_eq!(table.rows()[0].ratios, vec![1.5, 2.0]);
    }

    #[test]
    fn test_written_table_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("comparison_results.csv");
        let mut table = ResultTable::new(["BDI", "BDI 2B"]);
        table.push("/x/m,conv", vec![1.25, 3.0]).unwrap();
        table.write(&path).unwrap();

        let read = ResultTable::read(&path).unwrap();
        assert_eq!(read.rows()[0].file, "/x/m,conv");
        assert_eq!(read, table);
    }

    #[test]
    fn test_write_uses_four_decimals() {
        let mut table = ResultTable::new(["BDI", "FPC"]);
        table.push("/a", vec![1.0, 2.123456]).unwrap();
        assert_eq!(
            table.to_csv().unwrap(),
            "Layer Name,BDI,FPC\n/a,1.0000,2.1235\n"
        );
        assert!(table.push("/b", vec![1.0]).is_err());
    }

    #[test]
    fn test_read_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("comparison_results.csv");
        fs::write(&path, "Layer Name,BDI\n/a,oops\n").unwrap();
        match ResultTable::read(&path) {
            Err(Error::InvalidResult { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_summarize_dir_sorted_and_skips_missing() {
        let dir = tempdir().unwrap();
        for (model, body) in [
            ("resnet18_Imagenet", Some(SAMPLE)),
            ("alexnet_Imagenet", Some("Layer Name,BDI\n/a,2.0\n/b,4.0\n")),
            ("vgg16_Imagenet", None),
        ] {
            let model_dir = dir.path().join(model);
            fs::create_dir_all(&model_dir).unwrap();
            if let Some(body) = body {
                fs::write(model_dir.join("comparison_results.csv"), body).unwrap();
            }
        }

        let summaries = summarize_dir(dir.path(), "comparison_results.csv").unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].model, "alexnet_Imagenet");
        assert_eq!(summaries[0].category, "alexnet");
        assert_eq!(summaries[0].files, 2);
        assert!((summaries[0].averages["BDI"] - 3.0).abs() < 1e-9);

        assert_eq!(algorithm_columns(&summaries).len(), 8);
    }
}
