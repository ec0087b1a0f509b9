//! Paper metadata tables on disk.
//!
//! Input columns are carried through untouched and in order; `cited_by` and
//! `lookup_status` are appended on output. Loading a previous output restores
//! both, which is what makes resumed runs possible.

use crate::error::{CitedByError, Result};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const TITLE_COLUMN: &str = "title";
pub const SUBMITTER_COLUMN: &str = "submitter";
pub const CITED_BY_COLUMN: &str = "cited_by";
pub const STATUS_COLUMN: &str = "lookup_status";

/// Where a record stands with respect to citation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupStatus {
    /// Not attempted yet
    #[default]
    Pending,
    Found,
    NotFound,
    /// Title failed validation; never sent
    Skipped,
    /// Transient failure, retry on a later pass
    Error,
    /// Provider refused the request, retry on a later pass
    Blocked,
}

impl LookupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "",
            Self::Found => "found",
            Self::NotFound => "not_found",
            Self::Skipped => "skipped",
            Self::Error => "error",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "" | "pending" => Some(Self::Pending),
            "found" => Some(Self::Found),
            "not_found" => Some(Self::NotFound),
            "skipped" => Some(Self::Skipped),
            "error" => Some(Self::Error),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// A later pass would not change the answer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Found | Self::NotFound | Self::Skipped)
    }
}

/// One row of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    values: Vec<String>,
    cited_by: Option<u64>,
    status: LookupStatus,
}

impl Record {
    pub fn cited_by(&self) -> Option<u64> {
        self.cited_by
    }

    pub fn status(&self) -> LookupStatus {
        self.status
    }

    /// Record a citation count. A count already recorded is never replaced;
    /// returns whether the record changed.
    pub(crate) fn set_found(&mut self, count: u64) -> bool {
        if self.status == LookupStatus::Found {
            return false;
        }
        self.cited_by = Some(count);
        self.status = LookupStatus::Found;
        true
    }

    /// Record a non-count status. Ignored on records that already have a
    /// count; returns whether the record changed.
    pub(crate) fn set_status(&mut self, status: LookupStatus) -> bool {
        if self.status == LookupStatus::Found || status == LookupStatus::Found {
            return false;
        }
        self.status = status;
        true
    }
}

/// Ordered table of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    columns: Vec<String>,
    title_col: usize,
    submitter_col: usize,
    records: Vec<Record>,
}

impl Dataset {
    /// Empty dataset with the given input columns, which must include
    /// `title` and `submitter`.
    pub fn new(columns: Vec<String>) -> Result<Self> {
        let find = |name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| CitedByError::MissingColumn(name.to_string()))
        };
        let title_col = find(TITLE_COLUMN)?;
        let submitter_col = find(SUBMITTER_COLUMN)?;

        Ok(Self {
            columns,
            title_col,
            submitter_col,
            records: Vec::new(),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, idx: usize) -> Option<&Record> {
        self.records.get(idx)
    }

    pub(crate) fn record_mut(&mut self, idx: usize) -> Option<&mut Record> {
        self.records.get_mut(idx)
    }

    /// Title of row `idx`; `None` when absent or empty.
    pub fn title(&self, idx: usize) -> Option<&str> {
        self.records
            .get(idx)
            .and_then(|r| r.values.get(self.title_col))
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    pub fn submitter(&self, idx: usize) -> Option<&str> {
        self.records
            .get(idx)
            .and_then(|r| r.values.get(self.submitter_col))
            .map(String::as_str)
    }

    /// Number of records per status.
    pub fn count_status(&self, status: LookupStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Read a dataset from CSV.
    ///
    /// Existing `cited_by` / `lookup_status` columns are parsed back into
    /// record state and re-appended at the end on output.
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let cited_by_idx = headers.iter().position(|h| h == CITED_BY_COLUMN);
        let status_idx = headers.iter().position(|h| h == STATUS_COLUMN);
        let is_data_column = |i: usize| Some(i) != cited_by_idx && Some(i) != status_idx;

        let columns = headers
            .iter()
            .enumerate()
            .filter(|(col, _)| is_data_column(*col))
            .map(|(_, h)| h.clone())
            .collect();
        let mut dataset = Self::new(columns)?;

        for (i, row) in rdr.records().enumerate() {
            let row = row?;
            let row_num = i + 1;

            let values = row
                .iter()
                .enumerate()
                .filter(|(col, _)| is_data_column(*col))
                .map(|(_, v)| v.to_string())
                .collect();

            let cited_by = match cited_by_idx.and_then(|idx| row.get(idx)) {
                Some(raw) => parse_cited_by(raw).ok_or_else(|| CitedByError::Malformed {
                    row: row_num,
                    message: format!("invalid {} value '{}'", CITED_BY_COLUMN, raw),
                })?,
                None => None,
            };

            let status = match status_idx.and_then(|idx| row.get(idx)) {
                Some(raw) => LookupStatus::parse(raw).ok_or_else(|| CitedByError::Malformed {
                    row: row_num,
                    message: format!("invalid {} value '{}'", STATUS_COLUMN, raw),
                })?,
                None => LookupStatus::Pending,
            };

            let status = match (status, cited_by) {
                // Output of tools that only wrote cited_by
                (LookupStatus::Pending, Some(_)) => LookupStatus::Found,
                (LookupStatus::Found, None) => {
                    return Err(CitedByError::Malformed {
                        row: row_num,
                        message: format!("status 'found' without a {} value", CITED_BY_COLUMN),
                    })
                }
                (status, _) => status,
            };

            dataset.records.push(Record {
                values,
                cited_by: if status == LookupStatus::Found { cited_by } else { None },
                status,
            });
        }

        Ok(dataset)
    }

    /// Write the dataset as CSV, `cited_by` and `lookup_status` last.
    /// Absent counts are written as empty cells.
    pub fn to_writer<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);

        wtr.write_record(
            self.columns
                .iter()
                .map(String::as_str)
                .chain([CITED_BY_COLUMN, STATUS_COLUMN]),
        )?;

        for record in &self.records {
            let cited_by = record.cited_by.map(|n| n.to_string()).unwrap_or_default();
            wtr.write_record(
                record
                    .values
                    .iter()
                    .map(String::as_str)
                    .chain([cited_by.as_str(), record.status.as_str()]),
            )?;
        }

        wtr.flush()?;
        Ok(())
    }
}

/// Empty cells mean no count. Integral floats ("42.0") are accepted since
/// dataframe tools write nullable integer columns that way.
fn parse_cited_by(raw: &str) -> Option<Option<u64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(None);
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Some(Some(n));
    }
    match raw.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Some(Some(f as u64)),
        _ => None,
    }
}

/// Load a dataset from a CSV file.
pub fn load(path: &Path) -> Result<Dataset> {
    let file = std::fs::File::open(path)?;
    let dataset = Dataset::from_reader(io::BufReader::new(file))?;
    info!(
        path = %path.display(),
        records = dataset.len(),
        completed = dataset.records().iter().filter(|r| r.status().is_terminal()).count(),
        "Loaded dataset"
    );
    Ok(dataset)
}

/// Save a dataset to `path`.
///
/// The table is written to `<path>.tmp` and renamed over `path`, so readers
/// (and crashes) only ever see a complete file.
pub fn save(dataset: &Dataset, path: &Path) -> Result<()> {
    let tmp_path = tmp_path_for(path);

    {
        let file = std::fs::File::create(&tmp_path)?;
        let mut writer = io::BufWriter::new(file);
        dataset.to_writer(&mut writer)?;
        io::Write::flush(&mut writer)?;
    }
    std::fs::rename(&tmp_path, path)?;

    debug!(path = %path.display(), records = dataset.len(), "Saved dataset");
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
