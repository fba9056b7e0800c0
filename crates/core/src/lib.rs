pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::context::{
    ContextScope, ConversationStatus, IntentContext, IntentLabel, SchedulerContext, SharedContext,
};
pub use domain::session::{NewSessionRecord, RecordRole, SessionId, SessionRecord};
pub use errors::{ConversationError, MalformedContextError};
pub use flows::{LoopEngine, LoopEvent, LoopState};
