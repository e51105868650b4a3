//! # Kensho: BDD Spec Execution Engine
//!
//! Kensho is the execution engine of a behavior-driven spec framework.
//! A front-end hands it a fully built tree of nested context blocks
//! (hooks, lazy named bindings, leaf example declarations); the engine
//! flattens the tree into an ordered list of runnable examples, runs each
//! in isolation with inherited hooks and per-example memoized bindings,
//! collects assertion outcomes, and reports results with
//! source-location-tagged failures.
//!
//! ```text
//! Context Tree → Flattening → Example Suite → Hooks / Body / Verifiers → Reporting
//! ```
//!
//! Examples execute strictly one at a time in suite order. The only
//! suspension point is the polling probe behind asynchronous verifiers,
//! which blocks the current task until it resolves or times out.

pub mod binding;
pub mod call_site;
pub mod config;
pub mod context;
pub mod error;
pub mod example;
mod flatten;
pub mod matcher;
pub mod probe;
pub mod report;
pub mod suite;
pub mod value;
pub mod verifier;

// Re-exports
pub use binding::{BindingDecl, BindingProducer};
pub use call_site::CallSite;
pub use config::EngineConfig;
pub use context::{ContextArena, HookFn, LeafNode, NodeId};
pub use error::{EngineResult, Error};
pub use example::{example_body, Example, ExampleBody, ExampleState, RunContext};
pub use matcher::{MatcherFactory, MatcherRegistry, Matching};
pub use probe::DEFAULT_PROBE_TIMEOUT;
pub use report::{
    BroadcastReporter, CollectingReporter, Failure, FailureKind, ReportEvent, ReportEventKind,
    Reporting, SuiteSummary, TracingReporter,
};
pub use suite::ExampleSuite;
pub use value::{FutureValue, Subject, Value};
pub use verifier::{Expectation, Verifier, VerifierKind};
