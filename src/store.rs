use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DATA_DIR: &str = "data";
pub const ARTIFACT_DIR: &str = "data/artifacts";

/// A row type persisted by a [`Store`]. `FILE_STEM` names the CSV/JSON pair
/// under the data directory; `key` is the per-stage dedup key.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const FILE_STEM: &'static str;

    fn key(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    #[serde(rename = "Document Number")]
    pub document_id: String,
    #[serde(rename = "View URL")]
    pub detail_url: String,
    #[serde(rename = "Recorded Date")]
    pub recorded_date: String,
    #[serde(rename = "Filed Date")]
    pub filed_date: String,
    #[serde(rename = "Document Type")]
    pub document_type: String,
    #[serde(rename = "Party Name")]
    pub party_name: String,
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Parcel Address")]
    pub parcel_address: String,
}

impl Record for ListingRecord {
    const FILE_STEM: &'static str = "listings";

    fn key(&self) -> &str {
        &self.document_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailRecord {
    #[serde(rename = "Document Number")]
    pub document_id: String,
    #[serde(rename = "Document Type")]
    pub document_type: String,
    #[serde(rename = "Date Recorded")]
    pub date_recorded: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "View URL")]
    pub detail_url: String,
    /// Empty until the PDF has been durably stored.
    #[serde(rename = "PDF Path")]
    pub artifact_path: String,
}

impl Record for DetailRecord {
    const FILE_STEM: &'static str = "details";

    fn key(&self) -> &str {
        &self.document_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(rename = "Source PDF")]
    pub source_artifact: String,
    #[serde(rename = "Case Number")]
    pub case_number: String,
    #[serde(rename = "Case Confidence")]
    pub case_confidence: f64,
    #[serde(rename = "Amount (USD)")]
    pub amount: String,
    #[serde(rename = "Amount Confidence")]
    pub amount_confidence: f64,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Address Confidence")]
    pub address_confidence: f64,
}

impl Record for ExtractedFields {
    const FILE_STEM: &'static str = "extracted";

    // Completion is tracked per artifact; case-number dedup is a separate,
    // cross-artifact check in the extract stage.
    fn key(&self) -> &str {
        &self.source_artifact
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    #[serde(rename = "Case Number")]
    pub case_number: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Status")]
    pub status_label: String,
    #[serde(rename = "Color Tag")]
    pub status_tag: String,
}

impl Record for VerificationResult {
    const FILE_STEM: &'static str = "verified";

    fn key(&self) -> &str {
        &self.case_number
    }
}

/// Append-only CSV plus a JSON mirror rewritten in full on every append.
///
/// The CSV is authoritative: it is read once at open to rebuild the in-memory
/// row vector and the key set that serves as the stage's resume checkpoint.
/// Appends for an already-known key are rejected, never merged, so a store can
/// hold at most one row per key across any number of interrupted runs.
pub struct Store<T: Record> {
    csv_path: PathBuf,
    json_path: PathBuf,
    rows: Vec<T>,
    keys: HashSet<String>,
}

impl<T: Record> Store<T> {
    pub fn open_default() -> Result<Self> {
        Self::open(Path::new(DATA_DIR))
    }

    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
        let csv_path = dir.join(format!("{}.csv", T::FILE_STEM));
        let json_path = dir.join(format!("{}.json", T::FILE_STEM));

        let mut recovered = false;
        let rows: Vec<T> = if csv_path.exists() {
            load_csv(&csv_path)?
        } else if json_path.exists() {
            // CSV lost but mirror survived; recover from it.
            recovered = true;
            load_json(&json_path)?
        } else {
            Vec::new()
        };

        let keys = rows.iter().map(|r| r.key().to_string()).collect();
        let store = Self {
            csv_path,
            json_path,
            rows,
            keys,
        };
        // Recovered rows must land back in the CSV right away: the CSV is
        // preferred at the next open, and a later append would otherwise
        // start a fresh file holding only the new row.
        if recovered && !store.rows.is_empty() {
            store.rewrite_csv()?;
        }
        Ok(store)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn keys(&self) -> &HashSet<String> {
        &self.keys
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row, returning false (and writing nothing) if its key is
    /// already present. The CSV append lands before the JSON rewrite, so a
    /// crash between the two leaves the authoritative file complete.
    pub fn append(&mut self, row: T) -> Result<bool> {
        if self.keys.contains(row.key()) {
            return Ok(false);
        }

        let new_file = !self.csv_path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("opening {}", self.csv_path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(new_file)
            .from_writer(file);
        writer.serialize(&row)?;
        writer.flush()?;

        self.keys.insert(row.key().to_string());
        self.rows.push(row);
        self.rewrite_json()?;
        Ok(true)
    }

    fn rewrite_csv(&self) -> Result<()> {
        let tmp = self.csv_path.with_extension("csv.tmp");
        let mut writer = csv::Writer::from_path(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &self.csv_path)?;
        Ok(())
    }

    fn rewrite_json(&self) -> Result<()> {
        let tmp = self.json_path.with_extension("json.tmp");
        let file = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        serde_json::to_writer_pretty(file, &self.rows)?;
        fs::rename(&tmp, &self.json_path)?;
        Ok(())
    }
}

fn load_csv<T: Record>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn load_json<T: Record>(path: &Path) -> Result<Vec<T>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

// ── Tests ──
