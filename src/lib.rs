// Library exports for embedders and tests

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_target;
pub mod host;
pub mod js;
pub mod method_channel;
pub mod registry;

// Re-export commonly used types
pub use bridge::MercuryBridge;
pub use config::{BridgeConfig, ConfigError};
pub use dispatcher::Dispatcher;
pub use error::{BridgeError, HostError};
pub use event_target::{Event, EventTarget, ListenerId, ListenerOptions};
pub use host::{Completion, HostBridge, HostResult, LogLevel, LoopbackHost, RecordingHost};
pub use js::JsBridgeEnvironment;
pub use method_channel::{InvokeMethodFuture, MethodChannel, METHOD_CHANNEL_MODULE};
pub use registry::ModuleListenerRegistry;
