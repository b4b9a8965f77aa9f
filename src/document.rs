// Extracted-document input model.
//
// Table geometry detection happens outside this crate: an external extractor
// walks the scanned PDF and dumps every table it finds as rows of text
// cells, serialized as JSON. This module is the typed boundary for that
// input. Cells are optional because scanned tables routinely have holes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One extracted row: a fixed-width ordered sequence of optional text cells.
/// Expected shape: [no, date-time, student, description-a,
/// description-b-or-method, amount].
pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPage {
    #[serde(default)]
    pub tables: Vec<ExtractedTable>,
}

/// A whole extracted statement: pages, each with zero or more tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub pages: Vec<ExtractedPage>,
}

impl ExtractedDocument {
    /// Load an extractor dump from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read extracted document: {}", path.display()))?;

        let doc: ExtractedDocument = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse extracted document: {}", path.display()))?;

        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_document_with_missing_cells() {
        let json = r#"{
            "pages": [
                {
                    "tables": [
                        {
                            "rows": [
                                ["NO", "TANGGAL", "SISWA", "KETERANGAN", "METODE", "JUMLAH"],
                                ["1", "05-01-2024 14:37", "Budi", "Bayar SPP", null, "150.000"]
                            ]
                        }
                    ]
                },
                {}
            ]
        }"#;

        let doc: ExtractedDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0].tables[0].rows.len(), 2);
        assert_eq!(doc.pages[0].tables[0].rows[1][4], None);
        assert!(doc.pages[1].tables.is_empty());
    }
}
