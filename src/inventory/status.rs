use serde::{Deserialize, Serialize};
use time::Date;

use super::Item;
use crate::dates;

/// Urgency bucket of an item. Declaration order is display order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Status {
    InUse,
    Expired,
    Expiring,
    Ok,
}

impl Status {
    pub fn title(self) -> &'static str {
        match self {
            Status::InUse => "In Use",
            Status::Expired => "Expired",
            Status::Expiring => "Expiring Soon",
            Status::Ok => "OK",
        }
    }
}

/// An item together with the fields derived from its dates. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedItem {
    #[serde(flatten)]
    pub item: Item,
    pub status: Status,
    pub days_until_expiration: Option<i64>,
    pub days_until_alert: Option<i64>,
}

pub fn classify(item: &Item, today: Date) -> Status {
    if item.in_use {
        return Status::InUse;
    }
    let expiration = dates::days_until_text(&item.expiration_date, today);
    if matches!(expiration, Some(days) if days < 0) {
        return Status::Expired;
    }
    let alert = dates::days_until_text(&item.alert_date, today);
    if matches!(alert, Some(days) if days <= 0) {
        return Status::Expiring;
    }
    Status::Ok
}

pub fn classify_item(item: Item, today: Date) -> ClassifiedItem {
    let status = classify(&item, today);
    let days_until_expiration = dates::days_until_text(&item.expiration_date, today);
    let days_until_alert = dates::days_until_text(&item.alert_date, today);
    ClassifiedItem {
        item,
        status,
        days_until_expiration,
        days_until_alert,
    }
}

pub fn classify_all<I>(items: I, today: Date) -> Vec<ClassifiedItem>
where
    I: IntoIterator<Item = Item>,
{
    items
        .into_iter()
        .map(|item| classify_item(item, today))
        .collect()
}
