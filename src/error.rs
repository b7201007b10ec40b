// Error taxonomy for the capability negotiation core
//
// Missing capabilities are never errors: they narrow the feature set and
// log a warning. Only outcomes that abort the current creation call are here.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A context already exists in this process
    #[error("a context already exists in this process; only one may be live at a time")]
    ContextExists,

    /// The Vulkan library could not be loaded
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    /// An enumeration or create call into the backend failed
    #[error("{call} failed: {result}")]
    Backend {
        call: &'static str,
        result: vk::Result,
    },

    /// No physical device satisfies the hard-required queue families
    #[error("no physical device satisfies the required queue families")]
    NoSuitableDevice,

    /// A layer, extension or application name contained an interior NUL byte
    #[error("invalid name {0:?}: contains an interior NUL byte")]
    InvalidName(String),
}

impl Error {
    pub(crate) fn backend(call: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Error::Backend { call, result }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
