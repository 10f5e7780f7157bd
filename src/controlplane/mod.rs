//! Control Plane Module
//!
//! Drives capacity cycles against the configured appliances: the cycle
//! orchestrator, the notification sinks, and the appliance backends.

pub mod backends;
pub mod notify;
pub mod orchestrator;

pub use backends::{
    ApplianceClient, BackendFactory, DryRunBackend, InMemoryAppliance, UnavailableBackend,
};
pub use notify::{build_notifiers, render_report, LogNotifier, WebhookNotifier};
pub use orchestrator::{ManagedAppliance, Orchestrator};
