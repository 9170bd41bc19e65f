use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::app::{InventoryApp, InventoryView, MutationOutcome};
use crate::dates::{self, AlertWindow};
use crate::inventory::{ClassifiedItem, ItemDraft, RowId, ShopInfo, Status};
use crate::remote::RemoteGateway;
use crate::search::parse_item_query;
use crate::storage::{ChangeRequest, PendingChange};
use crate::sync::{DrainReport, SkipReason, Transition};

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Search terms (supports shop:, status: and expires:FROM..TO)
    #[arg()]
    pub query: Vec<String>,
    /// Only show these statuses (inuse, expired, expiring, ok)
    #[arg(long = "status")]
    pub statuses: Vec<Status>,
    /// Print the grouped items as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ItemFields {
    /// Free-text amount, e.g. "2 jars"
    #[arg(long)]
    pub quantity: Option<String>,
    /// Expiration date (DD.MM.YYYY, DD/MM/YYYY or YYYY-MM-DD; empty clears)
    #[arg(long)]
    pub expires: Option<String>,
    /// Alert date, same formats as --expires
    #[arg(long, conflicts_with = "alert_window")]
    pub alert: Option<String>,
    /// Derive the alert date from the expiration (1day, 1week, 1month, 3months, 6months)
    #[arg(long)]
    pub alert_window: Option<AlertWindow>,
    /// Shop note as SHOP=NOTE; repeat for several shops
    #[arg(long = "shop", value_parser = parse_shop)]
    pub shops: Vec<(String, String)>,
    /// Mark the item as opened / in use
    #[arg(long)]
    pub in_use: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Item name
    pub name: String,
    #[command(flatten)]
    pub fields: ItemFields,
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    /// Row id of the item
    pub id: RowId,
    /// New name
    #[arg(long)]
    pub name: Option<String>,
    #[command(flatten)]
    pub fields: ItemFields,
    /// Clear the in-use flag
    #[arg(long, conflicts_with = "in_use")]
    pub not_in_use: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Row id of the item
    pub id: RowId,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Seconds between rounds (defaults to sync.interval_secs)
    #[arg(long)]
    pub interval: Option<u64>,
    /// Search terms applied to every round
    #[arg()]
    pub query: Vec<String>,
}

fn parse_shop(raw: &str) -> Result<(String, String), String> {
    let (shop, note) = raw.split_once('=').unwrap_or((raw, ""));
    let shop = shop.trim();
    if shop.is_empty() {
        return Err("shop name cannot be empty".to_string());
    }
    Ok((shop.to_string(), note.trim().to_string()))
}

impl ItemFields {
    fn into_draft(self, name: Option<String>) -> Result<ItemDraft> {
        let alert_date = match (self.alert, self.alert_window) {
            (Some(alert), _) => Some(alert),
            (None, Some(window)) => {
                let Some(expires) = self.expires.as_deref() else {
                    bail!("--alert-window needs --expires");
                };
                let Some(alert) = dates::alert_date_for(expires, window) else {
                    bail!("unrecognised expiration date '{expires}'");
                };
                Some(dates::iso(alert))
            }
            (None, None) => None,
        };
        let shop_info = if self.shops.is_empty() {
            None
        } else {
            Some(self.shops.into_iter().collect::<ShopInfo>())
        };
        Ok(ItemDraft {
            name,
            quantity: self.quantity,
            expiration_date: self.expires,
            alert_date,
            shop_info,
            in_use: self.in_use.then_some(true),
        })
    }
}

pub fn list<G: RemoteGateway>(app: &InventoryApp<G>, args: ListArgs) -> Result<()> {
    let mut query = parse_item_query(&args.query.join(" "));
    query.statuses.extend(args.statuses);
    let view = app.view(&query)?;
    if args.json {
        let groups: indexmap::IndexMap<Status, &[ClassifiedItem]> = view.groups.iter().collect();
        let json = serde_json::to_string_pretty(&groups).context("encoding items as JSON")?;
        println!("{json}");
    } else {
        print!(
            "{}",
            format_view(&view, app.config().display.show_empty_sections)
        );
    }
    Ok(())
}

pub fn add<G: RemoteGateway>(app: &InventoryApp<G>, args: AddArgs) -> Result<()> {
    let draft = args.fields.into_draft(Some(args.name))?;
    let outcome = app.add(draft).context("queueing new item")?;
    print!("{}", format_mutation("Added", &outcome));
    Ok(())
}

pub fn update<G: RemoteGateway>(app: &InventoryApp<G>, args: UpdateArgs) -> Result<()> {
    let mut draft = args.fields.into_draft(args.name)?;
    if args.not_in_use {
        draft.in_use = Some(false);
    }
    let outcome = app
        .update(args.id, draft)
        .with_context(|| format!("queueing update of item {}", args.id))?;
    print!("{}", format_mutation("Updated", &outcome));
    Ok(())
}

pub fn delete<G: RemoteGateway>(app: &InventoryApp<G>, args: DeleteArgs) -> Result<()> {
    let outcome = app
        .delete(args.id)
        .with_context(|| format!("queueing deletion of item {}", args.id))?;
    print!("{}", format_mutation("Deleted", &outcome));
    Ok(())
}

pub fn sync<G: RemoteGateway>(app: &InventoryApp<G>) -> Result<()> {
    let report = app.sync_now()?;
    print!("{}", format_report(&report));
    Ok(())
}

pub fn pending<G: RemoteGateway>(app: &InventoryApp<G>) -> Result<()> {
    let changes = app.pending()?;
    print!("{}", format_pending(&changes));
    Ok(())
}

pub fn watch<G: RemoteGateway>(app: &InventoryApp<G>, args: WatchArgs) -> Result<()> {
    let interval = args
        .interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| app.config().sync.interval())
        .max(Duration::from_secs(1));
    let query = parse_item_query(&args.query.join(" "));
    let show_empty = app.config().display.show_empty_sections;
    let ticker = crossbeam_channel::tick(interval);
    tracing::info!(interval_secs = interval.as_secs(), "watching inventory");

    loop {
        match app.tick(&query, dates::today()) {
            Ok(tick) => {
                if tick.transition == Transition::WentOnline {
                    println!("Back online.");
                }
                if let Some(report) = tick.sync.as_ref().filter(|r| r.skipped.is_none()) {
                    print!("{}", format_report(report));
                }
                print!("{}", format_view(&tick.view, show_empty));
                println!();
            }
            Err(err) => tracing::error!(error = %format!("{err:#}"), "refresh round failed"),
        }
        if ticker.recv().is_err() {
            break;
        }
    }
    Ok(())
}

pub fn announce_startup_sync(report: &DrainReport) {
    if report.skipped.is_none() {
        eprint!("{}", format_report(report));
    }
}

fn format_view(view: &InventoryView, show_empty: bool) -> String {
    let mut out = String::new();
    if let Some(advisory) = &view.advisory {
        let _ = writeln!(&mut out, "! {advisory}");
    }
    for (status, items) in view.groups.iter() {
        if items.is_empty() && !show_empty {
            continue;
        }
        let _ = writeln!(&mut out, "{} ({})", status.title(), items.len());
        for entry in items {
            let _ = writeln!(&mut out, "  {}", format_item(entry));
        }
    }
    let summary = view.summary;
    let _ = writeln!(
        &mut out,
        "{} in use · {} expired · {} expiring · {} ok ({} total)",
        summary.in_use,
        summary.expired,
        summary.expiring,
        summary.ok,
        summary.total()
    );
    if view.pending > 0 {
        let _ = writeln!(&mut out, "{} change(s) waiting to sync", view.pending);
    }
    if let Some(fetched_at) = view.fetched_at {
        let _ = writeln!(&mut out, "Fetched {}", format_timestamp(fetched_at));
    }
    out
}

fn format_item(entry: &ClassifiedItem) -> String {
    let item = &entry.item;
    let id = if item.id.is_assigned() {
        format!("#{}", item.id)
    } else {
        "#new".to_string()
    };
    let mut line = format!("{id}  {}", item.name);
    if !item.quantity.trim().is_empty() {
        let _ = write!(&mut line, " · {}", item.quantity.trim());
    }
    if entry.days_until_expiration.is_some() {
        let _ = write!(
            &mut line,
            " · expires {} ({})",
            dates::format_display(&item.expiration_date),
            dates::relative_label(entry.days_until_expiration)
        );
    }
    if entry.days_until_alert.is_some() {
        let _ = write!(
            &mut line,
            " · alert {} ({})",
            dates::format_display(&item.alert_date),
            dates::relative_label(entry.days_until_alert)
        );
    }
    for (shop, note) in item.shop_info.iter() {
        if note.is_empty() {
            let _ = write!(&mut line, " · {shop}");
        } else {
            let _ = write!(&mut line, " · {shop}: {note}");
        }
    }
    line
}

fn format_mutation(verb: &str, outcome: &MutationOutcome) -> String {
    let mut out = format!("{verb} (change {})\n", outcome.change);
    match &outcome.sync {
        Some(report) => out.push_str(&format_report(report)),
        None => out.push_str("Offline: queued for the next sync.\n"),
    }
    out
}

fn format_report(report: &DrainReport) -> String {
    match report.skipped {
        Some(SkipReason::Empty) => return "Nothing to sync.\n".to_string(),
        Some(SkipReason::Offline) => return "Offline: pending changes kept.\n".to_string(),
        Some(SkipReason::Busy) => return "A sync is already running.\n".to_string(),
        None => {}
    }
    let mut out = format!(
        "Synced {} change(s), {} kept for retry, {} dropped\n",
        report.succeeded, report.retained, report.failed
    );
    for change in &report.dropped {
        let _ = writeln!(
            &mut out,
            "  dropped {} after {} attempts",
            describe(change),
            change.retry_count
        );
    }
    if report.interrupted {
        out.push_str("Remote unreachable: remaining changes kept for later.\n");
    }
    out
}

fn format_pending(changes: &[PendingChange]) -> String {
    if changes.is_empty() {
        return "No pending changes.\n".to_string();
    }
    let mut out = String::new();
    for change in changes {
        let _ = writeln!(
            &mut out,
            "{}  {}  queued {}  retries {}",
            change.id,
            describe(change),
            format_timestamp(change.created_at),
            change.retry_count
        );
    }
    out
}

fn describe(change: &PendingChange) -> String {
    match &change.request {
        ChangeRequest::Add { item } => {
            format!("add '{}'", item.name.as_deref().unwrap_or_default())
        }
        ChangeRequest::Update { target, .. } => format!("update #{target}"),
        ChangeRequest::Delete { target } => format!("delete #{target}"),
    }
}

fn format_timestamp(stamp: OffsetDateTime) -> String {
    stamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| stamp.unix_timestamp().to_string())
}
