//! In-process typed event bus plus the audit trail built on top of it.
//!
//! Publishing an event never blocks on and never fails because of a
//! subscriber: [`bus::EventBus`] enqueues onto an unbounded channel and a
//! dispatcher task fans each event out to every interested subscriber in
//! its own isolated task. [`audit::AuditSubscriber`] is the one subscriber
//! this crate ships: it maps every event to an [`record::AuditRecord`],
//! sanitizing metadata before it reaches storage, and a
//! [`retention::RetentionService`] prunes old records on a schedule the
//! host controls.

pub mod audit;
pub mod bus;
pub mod error;
pub mod event;
pub mod record;
pub mod retention;

pub use audit::{AuditStore, AuditSubscriber};
pub use bus::{BusError, EventBus, EventSubscriber, Interest, SubscriberRegistry};
pub use error::{AuditError, AuditResult};
pub use event::{
    Actor, ActorType, DomainEvent, EventHeader, EventResult, SessionEventKind, Severity, Target,
    UserEventKind, VerificationEventKind,
};
pub use record::AuditRecord;
pub use retention::{RetentionService, RetentionStore};
