//! SAGA Orchestration
//!
//! Multi-step, multi-service transactions. Each saga kind has an ordered step
//! list; steps are persisted with the transaction and executed in order.
//!
//! # State Machine
//!
//! ```text
//! PENDING → PROCESSING ──all steps ok──→ COMPLETED
//!               │
//!          step fails
//!               ↓
//!         COMPENSATING ──undo completed steps, newest first──→ COMPENSATED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Strict Order**: steps run in id order; a failed step stops the run and
//!    later steps are never executed or compensated.
//! 2. **Reverse Undo**: only COMPLETED steps with a compensation payload are
//!    undone, in reverse execution order.
//! 3. **Best-Effort Compensation**: a failing undo marks that step FAILED and
//!    the sweep continues with the earlier steps.

pub mod definitions;
pub mod handlers;
pub mod orchestrator;


pub use definitions::{SagaDefinitions, SagaKind, SagaPayload};
pub use handlers::{StepHandler, StepRegistry};
pub use orchestrator::{SagaOrchestrator, SagaRequest};
