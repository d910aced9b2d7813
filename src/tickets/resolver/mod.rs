
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::retriever::{RetrievalResult, Retriever};
use crate::synthesis::{AnswerSynthesizer, GenerationProvider};
use crate::tickets::models::{Ticket, TicketStatus};
use crate::tickets::store::TicketStore;
use crate::{RagError, Result};

/// Classifies ticket content into a category. External model call; the same
/// content may classify differently across calls, which is why accepted
/// categories are cached on the ticket and never re-requested.
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    async fn classify(&self, content: &str) -> Result<String>;
}

/// Classifier backed by the generation model, prompted with the configured
/// category list and normalized to one of its entries.
pub struct PromptClassifier {
    generator: Arc<dyn GenerationProvider>,
    categories: Vec<String>,
}

impl PromptClassifier {
    #[inline]
    pub fn new(generator: Arc<dyn GenerationProvider>, categories: Vec<String>) -> Self {
        Self {
            generator,
            categories,
        }
    }

    fn normalize(&self, response: &str) -> Result<String> {
        let lowered = response.trim().to_lowercase();

        if let Some(exact) = self
            .categories
            .iter()
            .find(|c| c.to_lowercase() == lowered)
        {
            return Ok(exact.clone());
        }

        if let Some(contained) = self
            .categories
            .iter()
            .find(|c| lowered.contains(&c.to_lowercase()))
        {
            return Ok(contained.clone());
        }

        Err(RagError::Classification(format!(
            "model response '{}' matches none of the configured categories",
            response.trim()
        )))
    }
}

#[async_trait]
impl ClassificationProvider for PromptClassifier {
    #[inline]
    async fn classify(&self, content: &str) -> Result<String> {
        let prompt = format!(
            "Classify the following support ticket into exactly one of these categories: \
             {}.\n\nTicket:\n{}\n\nRespond with the category name only.",
            self.categories.join(", "),
            content
        );

        let response = self.generator.generate(&prompt).await.map_err(|e| match e {
            RagError::Generation(msg) => RagError::Classification(msg),
            other => other,
        })?;

        self.normalize(&response)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub event_id: Uuid,
    pub ticket_id: String,
    pub event: String,
    pub severity: AlertSeverity,
}

/// Fire-and-forget notification sink. Implementations must swallow their own
/// failures; a broken sink never blocks a ticket transition.
pub trait AlertSink: Send + Sync {
    fn notify(&self, event: &AlertEvent);
}

/// Default sink that routes alerts into the tracing log.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    #[inline]
    fn notify(&self, event: &AlertEvent) {
        match event.severity {
            AlertSeverity::Info => {
                info!("Ticket {}: {} ({})", event.ticket_id, event.event, event.event_id);
            }
            AlertSeverity::Warning => {
                warn!("Ticket {}: {} ({})", event.ticket_id, event.event, event.event_id);
            }
            AlertSeverity::Error => {
                error!("Ticket {}: {} ({})", event.ticket_id, event.event, event.event_id);
            }
        }
    }
}

/// Outcome counters for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub fetched: usize,
    pub resolved: usize,
    pub failed: usize,
    pub skipped: usize,
    pub conflicts: usize,
}

/// Drives tickets through categorize -> retrieve -> resolve -> update.
///
/// Tickets are processed concurrently across distinct ids, but each id has at
/// most one in-flight transition: a concurrent delivery of the same ticket
/// observes the per-ticket lock held and fails with `TicketConflict`, leaving
/// the ticket untouched.
pub struct TicketResolver {
    store: Arc<dyn TicketStore>,
    retriever: Arc<Retriever>,
    synthesizer: Arc<AnswerSynthesizer>,
    classifier: Arc<dyn ClassificationProvider>,
    alerts: Arc<dyn AlertSink>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    max_retries: u32,
    worker_count: usize,
    top_k: usize,
    score_threshold: f32,
}

impl TicketResolver {
    #[inline]
    pub fn new(
        config: &Config,
        store: Arc<dyn TicketStore>,
        retriever: Arc<Retriever>,
        synthesizer: Arc<AnswerSynthesizer>,
        classifier: Arc<dyn ClassificationProvider>,
    ) -> Self {
        Self {
            store,
            retriever,
            synthesizer,
            classifier,
            alerts: Arc::new(TracingAlertSink),
            locks: StdMutex::new(HashMap::new()),
            max_retries: config.resolver.max_retries,
            worker_count: config.resolver.worker_count,
            top_k: config.retrieval.top_k,
            score_threshold: config.retrieval.score_threshold,
        }
    }

    #[inline]
    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Categorize a ticket. A no-op returning the stored result when the
    /// ticket is already at or past `categorized`; the model is not invoked
    /// again for duplicate deliveries.
    #[inline]
    pub async fn categorize(&self, ticket_id: &str) -> Result<Ticket> {
        let _guard = self.acquire(ticket_id)?;
        let ticket = self.load(ticket_id).await?;
        self.categorize_locked(ticket).await
    }

    /// Resolve a categorized ticket. A no-op returning the stored resolution
    /// when the ticket is already resolved or closed.
    #[inline]
    pub async fn resolve(&self, ticket_id: &str) -> Result<Ticket> {
        let _guard = self.acquire(ticket_id)?;
        let ticket = self.load(ticket_id).await?;
        self.resolve_locked(ticket).await
    }

    /// Retry a failed ticket back into the state it failed from, bounded by
    /// the configured retry budget, and continue processing from there.
    #[inline]
    pub async fn retry(&self, ticket_id: &str) -> Result<Ticket> {
        let _guard = self.acquire(ticket_id)?;
        let ticket = self.load(ticket_id).await?;
        self.retry_locked(ticket).await
    }

    /// Run a ticket through every remaining stage of its lifecycle.
    #[inline]
    pub async fn process(&self, ticket_id: &str) -> Result<Ticket> {
        let _guard = self.acquire(ticket_id)?;
        let ticket = self.load(ticket_id).await?;
        self.process_locked(ticket).await
    }

    /// Fetch open tickets and process them concurrently across distinct ids,
    /// bounded by the configured worker count.
    #[inline]
    pub async fn process_all(self: &Arc<Self>, limit: usize) -> Result<ResolutionStats> {
        let mut tickets = self.store.fetch_open(limit).await?;

        // At-least-once delivery can hand us the same ticket twice in a batch.
        let mut seen = std::collections::HashSet::new();
        tickets.retain(|t| seen.insert(t.ticket_id.clone()));

        let mut stats = ResolutionStats {
            fetched: tickets.len(),
            ..ResolutionStats::default()
        };

        info!("Processing {} tickets", tickets.len());

        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut join_set = JoinSet::new();

        for ticket in tickets {
            if ticket.status.is_settled() {
                stats.skipped += 1;
                continue;
            }

            let resolver = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let outcome = resolver.process(&ticket.ticket_id).await;
                (ticket.ticket_id, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (ticket_id, outcome) = joined.map_err(|e| anyhow!("worker panicked: {}", e))?;
            match outcome {
                Ok(ticket) if ticket.status == TicketStatus::Resolved => stats.resolved += 1,
                Ok(ticket) if ticket.status == TicketStatus::Closed => stats.skipped += 1,
                Ok(_) => stats.failed += 1,
                Err(RagError::TicketConflict(_)) => {
                    debug!("Skipping ticket {} held by another worker", ticket_id);
                    stats.conflicts += 1;
                }
                Err(e) => {
                    error!("Ticket {} failed: {}", ticket_id, e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            "Batch complete: {} resolved, {} failed, {} skipped, {} conflicts",
            stats.resolved, stats.failed, stats.skipped, stats.conflicts
        );

        Ok(stats)
    }

    async fn process_locked(&self, ticket: Ticket) -> Result<Ticket> {
        match ticket.status {
            TicketStatus::Resolved | TicketStatus::Closed => {
                debug!("Ticket {} already settled; skipping", ticket.ticket_id);
                Ok(ticket)
            }
            TicketStatus::Failed => self.retry_locked(ticket).await,
            TicketStatus::Open | TicketStatus::Categorizing => {
                let ticket = self.categorize_locked(ticket).await?;
                self.resolve_locked(ticket).await
            }
            TicketStatus::Categorized | TicketStatus::Resolving => {
                self.resolve_locked(ticket).await
            }
        }
    }

    async fn categorize_locked(&self, mut ticket: Ticket) -> Result<Ticket> {
        if ticket.status.is_settled()
            || matches!(
                ticket.status,
                TicketStatus::Categorized | TicketStatus::Resolving
            )
        {
            debug!(
                "Ticket {} already categorized as {:?}; returning stored result",
                ticket.ticket_id, ticket.category
            );
            return Ok(ticket);
        }

        if ticket.status == TicketStatus::Failed {
            return Err(RagError::Other(anyhow!(
                "ticket {} is failed; call retry() instead",
                ticket.ticket_id
            )));
        }

        // A ticket already in categorizing was interrupted mid-flight; resume
        // the classification without re-entering the state.
        if ticket.status == TicketStatus::Open {
            self.transition(&mut ticket, TicketStatus::Categorizing).await?;
        }

        match self.classifier.classify(&ticket.content).await {
            Ok(category) => {
                info!("Ticket {} categorized as {}", ticket.ticket_id, category);
                ticket.category = Some(category);
                self.transition(&mut ticket, TicketStatus::Categorized).await?;
                Ok(ticket)
            }
            Err(e) => self.fail(ticket, "classification", e).await,
        }
    }

    async fn resolve_locked(&self, mut ticket: Ticket) -> Result<Ticket> {
        if ticket.status.is_settled() {
            debug!(
                "Ticket {} already resolved; returning stored resolution",
                ticket.ticket_id
            );
            return Ok(ticket);
        }

        match ticket.status {
            TicketStatus::Open | TicketStatus::Categorizing => {
                return Err(RagError::Other(anyhow!(
                    "ticket {} must be categorized before it can be resolved",
                    ticket.ticket_id
                )));
            }
            TicketStatus::Failed => {
                return Err(RagError::Other(anyhow!(
                    "ticket {} is failed; call retry() instead",
                    ticket.ticket_id
                )));
            }
            TicketStatus::Categorized => {
                self.transition(&mut ticket, TicketStatus::Resolving).await?;
            }
            // Resolving: interrupted mid-flight, resume.
            TicketStatus::Resolving | TicketStatus::Resolved | TicketStatus::Closed => {}
        }

        let results = match self.retrieve_context(&ticket).await {
            Ok(results) => results,
            Err(e) => return self.fail(ticket, "retrieval", e).await,
        };

        let answer = match self.synthesizer.answer(&ticket.content, &results).await {
            Ok(answer) => answer,
            Err(e) => return self.fail(ticket, "synthesis", e).await,
        };

        ticket.resolution_text = Some(answer.text);
        ticket.low_confidence = !answer.grounded;
        ticket.last_error = None;
        self.transition(&mut ticket, TicketStatus::Resolved).await?;

        let (event, severity) = if answer.grounded {
            ("resolved".to_string(), AlertSeverity::Info)
        } else {
            (
                "resolved without grounding; flagged for review".to_string(),
                AlertSeverity::Warning,
            )
        };
        self.alerts.notify(&AlertEvent {
            event_id: Uuid::new_v4(),
            ticket_id: ticket.ticket_id.clone(),
            event,
            severity,
        });

        Ok(ticket)
    }

    async fn retry_locked(&self, mut ticket: Ticket) -> Result<Ticket> {
        if ticket.status != TicketStatus::Failed {
            return Err(RagError::Other(anyhow!(
                "ticket {} is {}; only failed tickets can be retried",
                ticket.ticket_id,
                ticket.status
            )));
        }

        if ticket.retry_count >= self.max_retries {
            warn!(
                "Ticket {} exhausted its retry budget ({}); leaving failed",
                ticket.ticket_id, self.max_retries
            );
            return Ok(ticket);
        }

        ticket.retry_count += 1;
        let target = ticket.rollback_target();
        info!(
            "Retrying ticket {} (attempt {}) back into {}",
            ticket.ticket_id, ticket.retry_count, target
        );
        self.transition(&mut ticket, target).await?;

        match target {
            TicketStatus::Open => {
                let ticket = self.categorize_locked(ticket).await?;
                self.resolve_locked(ticket).await
            }
            _ => self.resolve_locked(ticket).await,
        }
    }

    /// Retrieve context for a ticket. An empty index is downgraded to "no
    /// context": the ticket still resolves, ungrounded, under the
    /// low-confidence policy.
    async fn retrieve_context(&self, ticket: &Ticket) -> Result<Vec<RetrievalResult>> {
        match self
            .retriever
            .retrieve(&ticket.content, self.top_k, self.score_threshold)
            .await
        {
            Ok(results) => Ok(results),
            Err(RagError::EmptyIndex) => {
                warn!(
                    "Index is empty; resolving ticket {} without context",
                    ticket.ticket_id
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Record a failure: the ticket moves to `failed` with the originating
    /// error kind attached, stays queryable, and the error propagates.
    async fn fail(&self, mut ticket: Ticket, stage: &str, error: RagError) -> Result<Ticket> {
        error!(
            "Ticket {} failed during {}: {}",
            ticket.ticket_id, stage, error
        );

        ticket.last_error = Some(format!("{}: {}", stage, error));
        self.transition(&mut ticket, TicketStatus::Failed).await?;

        self.alerts.notify(&AlertEvent {
            event_id: Uuid::new_v4(),
            ticket_id: ticket.ticket_id.clone(),
            event: format!("failed during {}", stage),
            severity: AlertSeverity::Error,
        });

        Err(error)
    }

    /// Apply a validated status transition and write it through to the store.
    async fn transition(&self, ticket: &mut Ticket, next: TicketStatus) -> Result<()> {
        if !ticket.status.can_transition_to(next) {
            return Err(RagError::TicketConflict(format!(
                "{} cannot move from {} to {}",
                ticket.ticket_id, ticket.status, next
            )));
        }

        debug!(
            "Ticket {}: {} -> {}",
            ticket.ticket_id, ticket.status, next
        );
        ticket.status = next;
        ticket.updated_at = Utc::now();
        self.store.update(ticket).await
    }

    async fn load(&self, ticket_id: &str) -> Result<Ticket> {
        self.store
            .get(ticket_id)
            .await?
            .ok_or_else(|| RagError::Load(format!("ticket {} not found in store", ticket_id)))
    }

    /// At-most-one in-flight transition per ticket id. A held lock means a
    /// concurrent delivery is mid-transition; reject rather than queue so the
    /// duplicate cannot race the winner into a divergent state.
    fn acquire(&self, ticket_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(ticket_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        lock.try_lock_owned()
            .map_err(|_| RagError::TicketConflict(ticket_id.to_string()))
    }
}
