//! Error taxonomy for the rendering gateway.
//!
//! Every failure mode of construction and of a single render is one variant of
//! [`RenderError`]. The gateway never panics the host process; all failure
//! paths return through this channel with enough context (module path,
//! offending props key, diagnostic text) for server-side logging. The HTTP
//! layer is expected to map any variant to a generic 500 and keep the
//! diagnostic text out of responses.

use thiserror::Error;

/// All errors surfaced by [`crate::Gateway`].
#[derive(Debug, Error)]
pub enum RenderError {
    /// Construction-time failure, fatal to startup.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// `page_path` does not resolve to a module under the source directory.
    /// Also covers paths that escape the source root via `..` segments.
    #[error("page module not found: {path}")]
    ModuleNotFound { path: String },

    /// The module source failed to parse, load, or expose a render entry
    /// point. Never cached: a corrected module succeeds on the next call.
    #[error("failed to compile `{path}`: {detail}")]
    Compile { path: String, detail: String },

    /// The module's render logic threw during execution, or produced a value
    /// the serializer cannot represent as HTML.
    #[error("render of `{path}` failed: {message}")]
    Runtime { path: String, message: String },

    /// Execution exceeded the configured per-render deadline. The evaluation
    /// context was torn down and will not be reused.
    #[error("render timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// `props` contained a value outside the closed serializable set, or a
    /// key the sandbox refuses to inject. `path` names the offending entry.
    #[error("unsupported property at `{path}`: {detail}")]
    UnsupportedProperty { path: String, detail: String },
}
