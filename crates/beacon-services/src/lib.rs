//! beacon-services: runtime state shared between the engine and its callers.

pub mod registry;

pub use registry::{ApplyOutcome, Registry, RegistryPolicy};
