use crate::id::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Master data of one stock keeping unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDef {
    pub item_id: ItemId,
    pub name: String,
    /// Weight in kilograms.
    pub weight: f64,
    #[serde(default)]
    pub category: String,
    /// Volume in cubic decimetres.
    pub volume: f64,
    #[serde(default)]
    pub stackable: bool,
}

/// Builder for constructing an immutable [`Catalogue`].
#[derive(Debug, Default)]
pub struct CatalogueBuilder {
    items: Vec<ItemDef>,
}

impl CatalogueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, item: ItemDef) -> &mut Self {
        self.items.push(item);
        self
    }

    /// Convenience registration for tests and small layouts.
    pub fn item(&mut self, id: u32, name: &str, weight: f64, volume: f64) -> &mut Self {
        self.register(ItemDef {
            item_id: ItemId(id),
            name: name.to_string(),
            weight,
            category: String::new(),
            volume,
            stackable: true,
        })
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<Catalogue, CatalogueError> {
        let mut items = BTreeMap::new();
        let mut by_name = HashMap::new();
        for item in self.items {
            if !(item.weight > 0.0) {
                return Err(CatalogueError::InvalidWeight(item.item_id));
            }
            if !(item.volume > 0.0) {
                return Err(CatalogueError::InvalidVolume(item.item_id));
            }
            if items.contains_key(&item.item_id) {
                return Err(CatalogueError::DuplicateItem(item.item_id));
            }
            by_name.insert(item.name.clone(), item.item_id);
            items.insert(item.item_id, item);
        }
        Ok(Catalogue { items, by_name })
    }
}

/// Immutable item catalogue. Frozen after build().
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    items: BTreeMap<ItemId, ItemDef>,
    by_name: HashMap<String, ItemId>,
}

impl Catalogue {
    pub fn get(&self, id: ItemId) -> Option<&ItemDef> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn item_id(&self, name: &str) -> Option<ItemId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemDef> {
        self.items.values()
    }

    /// Most units of `id` one pallet can carry within both limits.
    pub fn qty_per_pallet(
        &self,
        id: ItemId,
        volume_cap: f64,
        weight_cap: f64,
    ) -> Result<u32, CatalogueError> {
        let item = self.get(id).ok_or(CatalogueError::UnknownItem(id))?;
        let by_volume = (volume_cap / item.volume).floor();
        let by_weight = (weight_cap / item.weight).floor();
        // Float-to-int `as` saturates; limits are validated positive.
        Ok(by_volume.min(by_weight) as u32)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogueError {
    #[error("unknown item {0}")]
    UnknownItem(ItemId),
    #[error("item {0} listed twice")]
    DuplicateItem(ItemId),
    #[error("item {0} must have a positive weight")]
    InvalidWeight(ItemId),
    #[error("item {0} must have a positive volume")]
    InvalidVolume(ItemId),
}
