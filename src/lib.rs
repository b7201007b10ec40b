// render-caps - Vulkan capability negotiation
//
// Turns a batch of renderer feature requests into an instance, a chosen
// physical device per renderer and a ready logical device with queues.
// Missing capabilities narrow the request instead of failing it.

pub mod backend;
pub mod config;
pub mod error;

pub use backend::{
    aggregate, Context, ContextDescriptor, DebugSeverity, DebugSink, DebugSource, Debugger,
    FeatureRequest, Features, QueueRoles, Renderer, RendererDescriptor, SelectionMode, Version,
};
pub use config::Config;
pub use error::{Error, Result};
