//! Catalog entries listing datasets available for checkout.

use serde::Deserialize;

/// One dataset as listed by the server catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Server-side processing status, e.g. `READY` or `PROCESSING`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub processed_at: Option<String>,
    #[serde(default)]
    pub result_count: Option<u64>,
    #[serde(default)]
    pub total_area_ha: Option<f64>,
    /// Bounding box as [min x, min y, max x, max y].
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
}

impl CatalogItem {
    /// Whether the dataset can be checked out right now.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s == "READY")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_sparse_entry() {
        let item: CatalogItem =
            serde_json::from_str(r#"{"id": 5, "name": "north-field"}"#).unwrap();
        assert_eq!(item.id, 5);
        assert!(item.is_ready());
        assert!(item.bbox.is_none());
    }

    #[test]
    fn processing_entries_are_not_ready() {
        let item: CatalogItem = serde_json::from_str(
            r#"{"id": 6, "name": "south-field", "status": "PROCESSING",
                "resultCount": 120, "totalAreaHa": 48.5,
                "bbox": [10.0, 45.0, 10.5, 45.5]}"#,
        )
        .unwrap();
        assert!(!item.is_ready());
        assert_eq!(item.result_count, Some(120));
        assert_eq!(item.bbox, Some([10.0, 45.0, 10.5, 45.5]));
    }
}
