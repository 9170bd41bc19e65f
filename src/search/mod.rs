use time::Date;

use crate::dates;
use crate::inventory::{ClassifiedItem, Status};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<Date>,
    pub to: Option<Date>, // inclusive
}

impl DateRange {
    pub fn has_range(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    pub fn merge(&mut self, other: DateRange) {
        if let Some(from) = other.from {
            self.from = Some(self.from.map_or(from, |existing| existing.max(from)));
        }
        if let Some(to) = other.to {
            self.to = Some(self.to.map_or(to, |existing| existing.min(to)));
        }
    }

    fn contains(&self, date: Date) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Free-text item filter. Plain terms must each appear in the name, quantity
/// or one of the shop notes; qualifiers narrow further.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub terms: Vec<String>,
    pub shops: Vec<String>,
    pub statuses: Vec<Status>,
    pub expires: DateRange,
}

impl ItemQuery {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
            && self.shops.is_empty()
            && self.statuses.is_empty()
            && !self.expires.has_range()
    }

    pub fn matches(&self, entry: &ClassifiedItem) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&entry.status) {
            return false;
        }
        let item = &entry.item;
        if !self.shops.iter().all(|shop| item.shop_info.contains(shop)) {
            return false;
        }
        if self.expires.has_range() {
            match dates::parse(&item.expiration_date) {
                Some(date) if self.expires.contains(date) => {}
                _ => return false,
            }
        }
        let haystacks: Vec<String> = [item.name.as_str(), item.quantity.as_str()]
            .into_iter()
            .chain(item.shop_info.notes())
            .map(str::to_lowercase)
            .collect();
        self.terms
            .iter()
            .all(|term| haystacks.iter().any(|hay| hay.contains(term.as_str())))
    }
}

pub fn parse_item_query(input: &str) -> ItemQuery {
    let mut query = ItemQuery::default();
    for raw in input.split_whitespace() {
        if let Some(shop) = raw.strip_prefix("shop:") {
            if let Some(value) = sanitize_term(shop) {
                query.shops.push(value);
            }
            continue;
        }
        if let Some(status) = raw.strip_prefix("status:") {
            match status.parse::<Status>() {
                Ok(status) => query.statuses.push(status),
                Err(_) => tracing::debug!(status, "ignoring unknown status qualifier"),
            }
            continue;
        }
        if let Some(range) = raw.strip_prefix("expires:") {
            query.expires.merge(parse_date_range(range));
            continue;
        }
        if let Some(value) = sanitize_term(raw) {
            query.terms.push(value);
        }
    }
    query
}

fn sanitize_term(raw: &str) -> Option<String> {
    let term: String = raw
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | '\''))
        .collect::<String>()
        .to_lowercase();
    if term.is_empty() {
        None
    } else {
        Some(term)
    }
}

fn parse_date_range(spec: &str) -> DateRange {
    let mut range = DateRange::default();
    let parts: Vec<&str> = spec.split("..").collect();
    match parts.as_slice() {
        [single] => {
            let date = dates::parse(single);
            range.from = date;
            range.to = date;
        }
        [from, to] => {
            range.from = dates::parse(from);
            range.to = dates::parse(to);
        }
        _ => {}
    }
    range
}
