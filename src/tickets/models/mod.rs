#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Categorizing,
    Categorized,
    Resolving,
    Resolved,
    Failed,
    Closed,
}

impl std::fmt::Display for TicketStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            TicketStatus::Open => write!(f, "open"),
            TicketStatus::Categorizing => write!(f, "categorizing"),
            TicketStatus::Categorized => write!(f, "categorized"),
            TicketStatus::Resolving => write!(f, "resolving"),
            TicketStatus::Resolved => write!(f, "resolved"),
            TicketStatus::Failed => write!(f, "failed"),
            TicketStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = TicketRowError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, TicketRowError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "" => Ok(TicketStatus::Open),
            "categorizing" => Ok(TicketStatus::Categorizing),
            "categorized" => Ok(TicketStatus::Categorized),
            "resolving" => Ok(TicketStatus::Resolving),
            "resolved" => Ok(TicketStatus::Resolved),
            "failed" => Ok(TicketStatus::Failed),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(TicketRowError::UnknownStatus(other.to_string())),
        }
    }
}

impl TicketStatus {
    /// Position along the monotonic open -> closed chain. `Failed` sits off
    /// the chain and is handled separately.
    fn chain_rank(self) -> Option<u8> {
        match self {
            TicketStatus::Open => Some(0),
            TicketStatus::Categorizing => Some(1),
            TicketStatus::Categorized => Some(2),
            TicketStatus::Resolving => Some(3),
            TicketStatus::Resolved => Some(4),
            TicketStatus::Closed => Some(5),
            TicketStatus::Failed => None,
        }
    }

    /// Whether a direct transition to `next` is legal. Chain states only move
    /// one step forward; the in-flight states may drop to `Failed`; `Failed`
    /// may re-enter the state it failed from.
    #[inline]
    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        match (self, next) {
            (TicketStatus::Categorizing | TicketStatus::Resolving, TicketStatus::Failed) => true,
            (TicketStatus::Failed, TicketStatus::Open | TicketStatus::Categorized) => true,
            _ => match (self.chain_rank(), next.chain_rank()) {
                (Some(from), Some(to)) => to == from + 1,
                _ => false,
            },
        }
    }

    /// Resolved and closed tickets are never reprocessed; `ticket_id` is the
    /// idempotency key guarding against at-least-once delivery.
    #[inline]
    pub fn is_settled(self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Closed)
    }

    /// States with an external call in flight.
    #[inline]
    pub fn is_in_flight(self) -> bool {
        matches!(self, TicketStatus::Categorizing | TicketStatus::Resolving)
    }
}

/// A validated support ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub content: String,
    pub category: Option<String>,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolution_text: Option<String>,
    /// Set when an ungrounded resolution was accepted; flags the ticket for
    /// human review.
    #[serde(default)]
    pub low_confidence: bool,
    #[serde(default)]
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub reporter: Option<String>,
}

impl Ticket {
    #[inline]
    pub fn new(ticket_id: String, content: String) -> Self {
        let now = Utc::now();
        Self {
            ticket_id,
            content,
            category: None,
            status: TicketStatus::Open,
            created_at: now,
            updated_at: now,
            resolution_text: None,
            low_confidence: false,
            retry_count: 0,
            last_error: None,
            reporter: None,
        }
    }

    /// The state a failed ticket rolls back into on retry: `Categorized` once
    /// classification succeeded, `Open` otherwise.
    #[inline]
    pub fn rollback_target(&self) -> TicketStatus {
        if self.category.is_some() {
            TicketStatus::Categorized
        } else {
            TicketStatus::Open
        }
    }
}

#[derive(Debug, Error)]
pub enum TicketRowError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Field {0} cannot be empty")]
    EmptyField(&'static str),
    #[error("Unknown ticket status: {0}")]
    UnknownStatus(String),
    #[error("Invalid timestamp {1} in field {0}")]
    InvalidTimestamp(&'static str, String),
}

/// A loosely-typed ticket row as delivered by the external sheet. Validated at
/// the boundary into a `Ticket`; unknown fields are rejected outright rather
/// than propagated as untyped data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTicketRow {
    pub ticket_id: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub timestamp: Option<String>,
    pub updated_at: Option<String>,
    pub resolution_text: Option<String>,
    pub low_confidence: Option<bool>,
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub reporter: Option<String>,
}

impl RawTicketRow {
    /// Validate into the strongly-typed entity, failing fast on schema errors.
    #[inline]
    pub fn validate(self) -> Result<Ticket, TicketRowError> {
        let ticket_id = require(self.ticket_id, "ticket_id")?;
        let content = require(self.content, "content")?;

        let status: TicketStatus = self.status.as_deref().unwrap_or("open").parse()?;

        let created_at = parse_timestamp(self.timestamp, "timestamp")?;
        let updated_at = match self.updated_at {
            Some(raw) => parse_timestamp(Some(raw), "updated_at")?,
            None => created_at,
        };

        let category = self.category.filter(|c| !c.trim().is_empty());

        Ok(Ticket {
            ticket_id,
            content,
            category,
            status,
            created_at,
            updated_at,
            resolution_text: self.resolution_text,
            low_confidence: self.low_confidence.unwrap_or(false),
            retry_count: self.retry_count.unwrap_or(0),
            last_error: self.last_error,
            reporter: self.reporter,
        })
    }
}

impl From<&Ticket> for RawTicketRow {
    #[inline]
    fn from(ticket: &Ticket) -> Self {
        Self {
            ticket_id: Some(ticket.ticket_id.clone()),
            content: Some(ticket.content.clone()),
            category: ticket.category.clone(),
            status: Some(ticket.status.to_string()),
            timestamp: Some(ticket.created_at.to_rfc3339()),
            updated_at: Some(ticket.updated_at.to_rfc3339()),
            resolution_text: ticket.resolution_text.clone(),
            low_confidence: Some(ticket.low_confidence),
            retry_count: Some(ticket.retry_count),
            last_error: ticket.last_error.clone(),
            reporter: ticket.reporter.clone(),
        }
    }
}

fn require(value: Option<String>, field: &'static str) -> Result<String, TicketRowError> {
    let value = value.ok_or(TicketRowError::MissingField(field))?;
    if value.trim().is_empty() {
        return Err(TicketRowError::EmptyField(field));
    }
    Ok(value)
}

fn parse_timestamp(
    value: Option<String>,
    field: &'static str,
) -> Result<DateTime<Utc>, TicketRowError> {
    match value {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| TicketRowError::InvalidTimestamp(field, raw)),
    }
}
