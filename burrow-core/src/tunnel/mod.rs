//! Supervised tunnels: validation, providers, lifecycle and registry

pub mod cloudflared;
pub mod config;
pub mod events;
pub mod instance;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod restart;
pub mod state;
pub mod supervisor;

pub use cloudflared::{CloudflaredInfo, check_installation};
pub use config::{
    LocalAddr, LocalScheme, StartConfig, ValidConfig, ValidationError, ValidationErrors, validate,
};
pub use events::{BroadcastSink, LogLevel, NullSink, TransitionSink, TunnelEvent};
pub use instance::{InstanceRecord, TunnelId, TunnelInstance, TunnelTarget};
pub use provider::{ProviderContext, ProviderFactory, ProviderRegistry, TunnelProvider};
pub use registry::{ShutdownReport, TunnelRegistry};
pub use restart::RetryPolicy;
pub use state::{ProviderStatus, RuntimeStatus, TunnelState};
pub use supervisor::{SupervisorConfig, TunnelHandle};
