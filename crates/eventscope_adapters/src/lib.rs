pub mod configuration;
pub mod console_surface;
pub mod network;
pub mod proxy;
pub mod telemetry;
pub mod upstream;

// Re-exports for convenience
pub use console_surface::{ConsoleSurfaceProvider, LinePrompt, TerminalPrompt};
pub use proxy::ProxyForwarder;
pub use upstream::HttpActionsApi;
