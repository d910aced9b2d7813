#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::tickets::models::{RawTicketRow, Ticket};
use crate::{RagError, Result};

/// Boundary to the external ticket store (a spreadsheet-equivalent). The
/// source delivers tickets at least once and the sink is eventually
/// consistent; the resolver relies on `ticket_id` idempotency, not on this
/// trait, for exactly-once effects.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Tickets that still need processing (anything not resolved/closed).
    async fn fetch_open(&self, limit: usize) -> Result<Vec<Ticket>>;

    async fn get(&self, ticket_id: &str) -> Result<Option<Ticket>>;

    /// Write back status/category/resolution, keyed by `ticket_id`.
    async fn update(&self, ticket: &Ticket) -> Result<()>;
}

/// In-memory store used by tests and embedding into other processes.
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    tickets: Mutex<BTreeMap<String, Ticket>>,
}

impl InMemoryTicketStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub async fn insert(&self, ticket: Ticket) {
        self.tickets
            .lock()
            .await
            .insert(ticket.ticket_id.clone(), ticket);
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    #[inline]
    async fn fetch_open(&self, limit: usize) -> Result<Vec<Ticket>> {
        Ok(self
            .tickets
            .lock()
            .await
            .values()
            .filter(|t| !t.status.is_settled())
            .take(limit)
            .cloned()
            .collect())
    }

    #[inline]
    async fn get(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        Ok(self.tickets.lock().await.get(ticket_id).cloned())
    }

    #[inline]
    async fn update(&self, ticket: &Ticket) -> Result<()> {
        self.tickets
            .lock()
            .await
            .insert(ticket.ticket_id.clone(), ticket.clone());
        Ok(())
    }
}

/// File-backed store for offline CLI operation: a JSON array of raw ticket
/// rows, validated at the boundary on every read. Rows that fail validation
/// are skipped with a warning rather than aborting the batch.
#[derive(Debug)]
pub struct JsonFileTicketStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl JsonFileTicketStore {
    #[inline]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            io_lock: Mutex::new(()),
        }
    }

    async fn read_rows(&self) -> Result<Vec<RawTicketRow>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read ticket file: {}", self.path.display()))?;

        let rows: Vec<RawTicketRow> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse ticket file: {}", self.path.display()))?;

        Ok(rows)
    }

    async fn write_rows(&self, rows: &[RawTicketRow]) -> Result<()> {
        let json = serde_json::to_string_pretty(rows)
            .context("Failed to serialize ticket rows")?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .with_context(|| format!("Failed to write ticket file: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace ticket file: {}", self.path.display()))?;

        Ok(())
    }

    fn validate_rows(&self, rows: Vec<RawTicketRow>) -> Vec<Ticket> {
        let mut tickets = Vec::with_capacity(rows.len());
        for row in rows {
            match row.validate() {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => warn!("Skipping invalid ticket row in {}: {}", self.path.display(), e),
            }
        }
        tickets
    }
}

#[async_trait]
impl TicketStore for JsonFileTicketStore {
    #[inline]
    async fn fetch_open(&self, limit: usize) -> Result<Vec<Ticket>> {
        let _guard = self.io_lock.lock().await;
        let rows = self.read_rows().await?;

        let tickets: Vec<Ticket> = self
            .validate_rows(rows)
            .into_iter()
            .filter(|t| !t.status.is_settled())
            .take(limit)
            .collect();

        debug!(
            "Fetched {} open tickets from {}",
            tickets.len(),
            self.path.display()
        );
        Ok(tickets)
    }

    #[inline]
    async fn get(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        let _guard = self.io_lock.lock().await;
        let rows = self.read_rows().await?;

        Ok(self
            .validate_rows(rows)
            .into_iter()
            .find(|t| t.ticket_id == ticket_id))
    }

    #[inline]
    async fn update(&self, ticket: &Ticket) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut rows = self.read_rows().await?;

        let updated = RawTicketRow::from(ticket);
        match rows
            .iter_mut()
            .find(|row| row.ticket_id.as_deref() == Some(ticket.ticket_id.as_str()))
        {
            Some(row) => *row = updated,
            None => {
                return Err(RagError::Load(format!(
                    "ticket {} not found in {}",
                    ticket.ticket_id,
                    self.path.display()
                )));
            }
        }

        self.write_rows(&rows).await
    }
}
