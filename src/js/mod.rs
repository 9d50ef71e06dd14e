mod bootstrap;
pub mod environment;
pub mod runtime;

pub use environment::JsBridgeEnvironment;
pub use runtime::QuickJsEngine;
