use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

pub mod grouping;
pub mod status;

pub use grouping::{filter, group, StatusGroups, Summary};
pub use status::{classify, classify_all, classify_item, ClassifiedItem, Status};

/// Spreadsheet row identifier. Row 0 is never a real row; it marks an item
/// the remote store has not assigned a slot to yet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RowId(u32);

impl RowId {
    pub const UNASSIGNED: RowId = RowId(0);

    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RowId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(RowId)
    }
}

/// Shop name to free-text note. Keys are matched case-insensitively, keep
/// the spelling they were first inserted with, and stay in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ShopInfo(IndexMap<String, String>);

impl ShopInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, shop: &str, note: impl Into<String>) -> Option<String> {
        let shop = shop.trim();
        if shop.is_empty() {
            return None;
        }
        match self.position(shop) {
            Some(index) => self
                .0
                .get_index_mut(index)
                .map(|(_, slot)| std::mem::replace(slot, note.into())),
            None => self.0.insert(shop.to_string(), note.into()),
        }
    }

    pub fn get(&self, shop: &str) -> Option<&str> {
        let index = self.position(shop)?;
        self.0.get_index(index).map(|(_, note)| note.as_str())
    }

    pub fn remove(&mut self, shop: &str) -> Option<String> {
        let index = self.position(shop)?;
        self.0.shift_remove_index(index).map(|(_, note)| note)
    }

    pub fn contains(&self, shop: &str) -> bool {
        self.position(shop).is_some()
    }

    fn position(&self, shop: &str) -> Option<usize> {
        let wanted = shop.trim().to_lowercase();
        self.0.keys().position(|key| key.to_lowercase() == wanted)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn notes(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ShopInfo {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut info = ShopInfo::new();
        for (shop, note) in iter {
            info.insert(shop.as_ref(), note);
        }
        info
    }
}

impl<'de> Deserialize<'de> for ShopInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<IndexMap<String, Value>>::deserialize(deserializer)?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(shop, note)| cell_text(note).map(|note| (shop, note)))
            .collect())
    }
}

/// One inventory row as the remote store reports it.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Rows the store reports without an index decode as
    /// [`RowId::UNASSIGNED`].
    #[serde(rename = "rowIndex", default)]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: RowId,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(rename = "amount", default, deserialize_with = "lenient_text")]
    pub quantity: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub expiration_date: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub alert_date: String,
    #[serde(rename = "shops", default)]
    pub shop_info: ShopInfo,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub in_use: bool,
}

impl Item {
    pub fn new(id: RowId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            quantity: String::new(),
            expiration_date: String::new(),
            alert_date: String::new(),
            shop_info: ShopInfo::new(),
            in_use: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// Partial item used as the payload of add and update requests. Fields left
/// as `None` are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "amount", default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_date: Option<String>,
    #[serde(rename = "shops", default, skip_serializing_if = "Option::is_none")]
    pub shop_info: Option<ShopInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_use: Option<bool>,
}

impl ItemDraft {
    pub fn from_item(item: &Item) -> Self {
        Self {
            name: Some(item.name.clone()),
            quantity: Some(item.quantity.clone()),
            expiration_date: Some(item.expiration_date.clone()),
            alert_date: Some(item.alert_date.clone()),
            shop_info: Some(item.shop_info.clone()),
            in_use: Some(item.in_use),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &ItemDraft::default()
    }

    pub fn has_name(&self) -> bool {
        self.name
            .as_deref()
            .map(|name| !name.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn apply_to(&self, item: &mut Item) {
        if let Some(name) = &self.name {
            item.name = name.clone();
        }
        if let Some(quantity) = &self.quantity {
            item.quantity = quantity.clone();
        }
        if let Some(expiration) = &self.expiration_date {
            item.expiration_date = expiration.clone();
        }
        if let Some(alert) = &self.alert_date {
            item.alert_date = alert.clone();
        }
        if let Some(shops) = &self.shop_info {
            item.shop_info = shops.clone();
        }
        if let Some(in_use) = self.in_use {
            item.in_use = in_use;
        }
    }

    /// Materialise the draft as a not-yet-assigned row.
    pub fn to_item(&self, id: RowId) -> Item {
        let mut item = Item::new(id, String::new());
        self.apply_to(&mut item);
        item
    }
}

fn cell_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        other => Some(other.to_string()),
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(cell_text).unwrap_or_default())
}

fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(flag)) => flag,
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Some(Value::String(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "x" | "1"
        ),
        _ => false,
    })
}
