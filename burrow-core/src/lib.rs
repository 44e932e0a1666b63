//! burrow-core: Core library for burrow supervised tunnels
//!
//! This crate provides the building blocks for exposing local services through
//! external tunnel providers:
//!
//! - **Validation** - [`validate`] turns a [`StartConfig`] into a [`ValidConfig`]
//! - **Providers** - the [`TunnelProvider`] contract, [`ProviderRegistry`], and the
//!   `cloudflare` and `mock` providers
//! - **Supervision** - one task per tunnel driving the lifecycle state machine,
//!   reachable through a [`TunnelHandle`]
//! - **Registry** - [`TunnelRegistry`], the process-wide table of active tunnels
//! - **Events** - [`TunnelEvent`] published through a [`TransitionSink`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use burrow_core::{
//!     BroadcastSink, ProviderRegistry, StartConfig, SupervisorConfig, TunnelRegistry,
//!     providers::CloudflareFactory,
//! };
//!
//! # async fn example() -> Result<(), burrow_core::TunnelError> {
//! let providers = ProviderRegistry::new().with(Arc::new(CloudflareFactory::default()));
//! let registry = TunnelRegistry::new(
//!     providers,
//!     SupervisorConfig::default(),
//!     Arc::new(BroadcastSink::default()),
//! );
//!
//! let config = StartConfig::new("app.example.com", "http://localhost:3000", "token");
//! let tunnel = registry.create("cloudflare", &config).await?;
//! println!("{} is {}", tunnel.id(), tunnel.snapshot().state);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                TunnelRegistry                │
//! │   id ──▶ TunnelHandle (commands + watch)     │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │            Supervisor task (per id)          │
//! │  ┌───────────────┐   ┌────────────────────┐  │
//! │  │InstanceRecord │   │ TunnelProvider     │  │
//! │  │ state machine │   │ (cloudflared, ...) │  │
//! │  └───────────────┘   └────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod tunnel;

pub use error::{ProviderError, TunnelError};
pub use tunnel::providers;
pub use tunnel::{
    BroadcastSink, CloudflaredInfo, InstanceRecord, LogLevel, NullSink, ProviderContext,
    ProviderFactory, ProviderRegistry, ProviderStatus, RetryPolicy, RuntimeStatus,
    ShutdownReport, StartConfig, SupervisorConfig, TransitionSink, TunnelEvent, TunnelHandle,
    TunnelId, TunnelInstance, TunnelProvider, TunnelRegistry, TunnelState, TunnelTarget,
    ValidConfig, ValidationError, ValidationErrors, check_installation, validate,
};
