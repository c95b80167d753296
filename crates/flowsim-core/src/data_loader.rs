//! Catalogue loading from JSON.
//!
//! Feature-gated behind `data-loader`. The document is a list of item
//! records:
//!
//! ```json
//! [{"item_id": 1, "name": "bolt", "weight": 0.2, "category": "hardware",
//!   "volume": 0.1, "stackable": true}]
//! ```

use crate::catalogue::{Catalogue, CatalogueBuilder, CatalogueError, ItemDef};

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("catalogue error: {0}")]
    Catalogue(#[from] CatalogueError),
}

/// Load a catalogue from a JSON string.
pub fn load_catalogue_json(json: &str) -> Result<Catalogue, DataLoadError> {
    let items: Vec<ItemDef> = serde_json::from_str(json)?;
    build_catalogue(items)
}

/// Load a catalogue from JSON bytes.
pub fn load_catalogue_json_bytes(bytes: &[u8]) -> Result<Catalogue, DataLoadError> {
    let items: Vec<ItemDef> = serde_json::from_slice(bytes)?;
    build_catalogue(items)
}

fn build_catalogue(items: Vec<ItemDef>) -> Result<Catalogue, DataLoadError> {
    let mut builder = CatalogueBuilder::new();
    for item in items {
        builder.register(item);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ItemId;

    #[test]
    fn load_empty_list() {
        let cat = load_catalogue_json("[]").unwrap();
        assert!(cat.is_empty());
    }

    #[test]
    fn load_items() {
        let json = r#"[
            {"item_id": 1, "name": "bolt", "weight": 0.5, "category": "hardware", "volume": 0.25, "stackable": true},
            {"item_id": 2, "name": "panel", "weight": 12.0, "volume": 40.0}
        ]"#;
        let cat = load_catalogue_json(json).unwrap();
        assert_eq!(cat.len(), 2);
        assert_eq!(cat.item_id("panel"), Some(ItemId(2)));
        let panel = cat.get(ItemId(2)).unwrap();
        assert!(panel.category.is_empty());
        assert!(!panel.stackable);
        // min(2112 / 40, 1000 / 12) = min(52, 83)
        assert_eq!(cat.qty_per_pallet(ItemId(2), 2112.0, 1000.0), Ok(52));
    }

    #[test]
    fn load_bytes() {
        let cat = load_catalogue_json_bytes(br#"[{"item_id": 7, "name": "nut", "weight": 1.0, "volume": 1.0}]"#).unwrap();
        assert!(cat.contains(ItemId(7)));
    }

    #[test]
    fn non_positive_weight_fails() {
        let json = r#"[{"item_id": 1, "name": "ghost", "weight": 0.0, "volume": 1.0}]"#;
        assert!(matches!(
            load_catalogue_json(json),
            Err(DataLoadError::Catalogue(CatalogueError::InvalidWeight(ItemId(1))))
        ));
    }

    #[test]
    fn duplicate_id_fails() {
        let json = r#"[
            {"item_id": 1, "name": "a", "weight": 1.0, "volume": 1.0},
            {"item_id": 1, "name": "b", "weight": 1.0, "volume": 1.0}
        ]"#;
        assert!(matches!(
            load_catalogue_json(json),
            Err(DataLoadError::Catalogue(CatalogueError::DuplicateItem(_)))
        ));
    }

    #[test]
    fn load_invalid_json_fails() {
        let result = load_catalogue_json("not valid json {{{");
        assert!(matches!(result.unwrap_err(), DataLoadError::JsonParse(_)));
    }
}
