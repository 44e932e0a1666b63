//! Built-in provider plugins

pub mod cloudflare;
pub mod mock;

pub use cloudflare::{CLOUDFLARE, CloudflareFactory, CloudflareProvider, CloudflareSettings};
pub use mock::{MockCalls, MockProvider, MockProviderFactory};
