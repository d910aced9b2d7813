// Ticket resolution module
// Ticket entity and validation, the external store boundary, and the
// categorize -> retrieve -> resolve state machine

pub mod models;
pub mod resolver;
pub mod store;

pub use models::{RawTicketRow, Ticket, TicketRowError, TicketStatus};
pub use resolver::{
    AlertEvent, AlertSeverity, AlertSink, ClassificationProvider, PromptClassifier,
    ResolutionStats, TicketResolver, TracingAlertSink,
};
pub use store::{InMemoryTicketStore, JsonFileTicketStore, TicketStore};
