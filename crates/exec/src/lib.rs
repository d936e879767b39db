//! Tool execution core for the Pulse assistant.
//!
//! An [`Executor`] owns the `pulse_*` tool registry and the optional provider
//! set.  Each invocation receives the caller's [`ResolvedContext`], so a
//! session's knowledge of which resources the model has seen persists
//! across calls.  Write paths pass through the guards in [`guard`], the
//! command classifier in `pulse-safety`, the operator policy and the
//! approval store before anything is dispatched to an agent.

pub mod context;
pub mod executor;
pub mod guard;
pub mod model;
pub mod providers;
pub mod routing;
pub mod state;
pub mod tools;

pub use context::{ResolvedContext, ResolvedResource, ResourceRegistration};
pub use executor::{AUTO_RECOVERY_ARG, CANCELED, ControlSettings, Core, Executor, ToolContext, dispatch_failure};
pub use guard::{EXECUTION_CONTEXT_UNAVAILABLE, GuardError, ROUTING_MISMATCH, STRICT_RESOLUTION};
pub use providers::{
    AgentServer, CommandOutput, CommandPayload, CommandPolicy, ConnectedAgent, DispatchError, PolicyDecision,
    Providers, StateProvider,
};
pub use routing::{RoutingResult, TargetType, Transport, resolve_route};
pub use state::{ResourceKind, ResourceLocation, Snapshot};
