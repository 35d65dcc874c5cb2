//! Rendering gateway facade: configuration, path resolution, and the
//! per-render Loader -> Sandbox -> Serializer pipeline.

use crate::cache::ModuleCache;
use crate::error::RenderError;
use crate::sandbox::{self, ExecuteRequest};
use crate::{html, props};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Gateway configuration. Validated once at construction; render calls
/// trust it afterwards.
pub struct Options {
    /// URL prefix under which the caller serves static assets. The gateway
    /// itself never serves files; this is validated for consistency only.
    pub public_path: String,
    /// Filesystem root against which page-module paths are resolved.
    pub source_dir: String,
    /// Maximum time for a single render in milliseconds (None = unlimited)
    pub timeout_ms: Option<u64>,
    /// Maximum heap size per evaluation context in bytes (None = unlimited)
    pub max_heap_size: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            public_path: String::from("/public"),
            source_dir: String::from("."),
            timeout_ms: Some(30_000), // 30 seconds default
            max_heap_size: Some(64 * 1024 * 1024), // 64MB default
        }
    }
}

/// The server-side rendering gateway.
///
/// Long-lived and shared: one instance per process serves concurrent
/// [`Gateway::render`] calls. Owns the module cache; evaluation contexts
/// are created per render and never outlive it.
pub struct Gateway {
    /// Canonicalized at construction.
    source_dir: PathBuf,
    timeout: Option<Duration>,
    max_heap_size: Option<usize>,
    cache: Arc<ModuleCache>,
}

impl Gateway {
    /// Create a gateway, validating the configuration.
    ///
    /// # Errors
    /// [`RenderError::Configuration`] if `source_dir` does not exist or is
    /// not a directory, or `public_path` is not rooted at `/` or contains
    /// traversal segments.
    pub fn with_options(options: Options) -> Result<Self, RenderError> {
        validate_public_path(&options.public_path)?;

        let source_dir = Path::new(&options.source_dir)
            .canonicalize()
            .map_err(|e| {
                RenderError::Configuration(format!(
                    "source_dir '{}' is not accessible: {e}",
                    options.source_dir
                ))
            })?;
        if !source_dir.is_dir() {
            return Err(RenderError::Configuration(format!(
                "source_dir '{}' is not a directory",
                options.source_dir
            )));
        }

        Ok(Self {
            source_dir,
            timeout: options.timeout_ms.map(Duration::from_millis),
            max_heap_size: options.max_heap_size,
            cache: Arc::new(ModuleCache::new()),
        })
    }

    /// Render the page module at `page_path` (relative to the source
    /// directory) with `props` injected into its render function, returning
    /// the serialized HTML.
    ///
    /// Output is deterministic: two calls with the same resolved module and
    /// deeply-equal props produce byte-identical HTML. On any failure no
    /// partial HTML is returned.
    pub async fn render(
        &self,
        page_path: &str,
        props: serde_json::Value,
    ) -> Result<String, RenderError> {
        props::validate(&props)?;
        let entry = self.resolve_page(page_path)?;

        tracing::debug!(page = page_path, entry = %entry.display(), "rendering page module");

        let tree = sandbox::execute_page(ExecuteRequest {
            source_dir: self.source_dir.clone(),
            entry,
            page_path: page_path.to_string(),
            props,
            cache: Arc::clone(&self.cache),
            timeout: self.timeout,
            max_heap_size: self.max_heap_size,
        })
        .await?;

        let document = html::decode(&tree)
            .and_then(|node| html::serialize(&node))
            .map_err(|e| RenderError::Runtime {
                path: page_path.to_string(),
                message: e.to_string(),
            })?;

        Ok(document)
    }

    /// Drop all cached module entries. Subsequent renders re-read and
    /// re-fingerprint their modules from disk.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Resolve `page_path` to a canonical module path under the source
    /// directory. Extension inference: the exact path first, then `.js`,
    /// then `.mjs`.
    fn resolve_page(&self, page_path: &str) -> Result<PathBuf, RenderError> {
        let not_found = || RenderError::ModuleNotFound {
            path: page_path.to_string(),
        };

        let relative = Path::new(page_path);
        // Reject absolute paths and any `..` segment before touching the
        // filesystem, so nothing outside the root is ever stat'd.
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(not_found());
        }

        let exact = self.source_dir.join(relative);
        let mut candidates = vec![exact.clone()];
        if relative.extension().is_none() {
            candidates.push(exact.with_extension("js"));
            candidates.push(exact.with_extension("mjs"));
        }

        for candidate in candidates {
            let Ok(canonical) = candidate.canonicalize() else {
                continue;
            };
            // Symlink defense: the resolved path must still live under the
            // source root.
            if !canonical.starts_with(&self.source_dir) {
                return Err(not_found());
            }
            if canonical.is_file()
                && matches!(
                    canonical.extension().and_then(|e| e.to_str()),
                    Some("js") | Some("mjs")
                )
            {
                return Ok(canonical);
            }
        }

        Err(not_found())
    }
}

fn validate_public_path(public_path: &str) -> Result<(), RenderError> {
    if !public_path.starts_with('/') {
        return Err(RenderError::Configuration(format!(
            "public_path '{public_path}' must be rooted at '/'"
        )));
    }
    if public_path.split('/').any(|segment| segment == "..") {
        return Err(RenderError::Configuration(format!(
            "public_path '{public_path}' must not contain traversal segments"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_rejects_missing_source_dir() {
        let result = Gateway::with_options(Options {
            source_dir: "/definitely/not/a/real/dir".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(RenderError::Configuration(_))));
    }

    #[test]
    fn test_rejects_file_as_source_dir() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();

        let result = Gateway::with_options(Options {
            source_dir: file.display().to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(RenderError::Configuration(_))));
    }

    #[test]
    fn test_rejects_unrooted_public_path() {
        let dir = tempdir().unwrap();
        let result = Gateway::with_options(Options {
            source_dir: dir.path().display().to_string(),
            public_path: "assets".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(RenderError::Configuration(_))));
    }

    #[test]
    fn test_rejects_traversal_in_public_path() {
        let dir = tempdir().unwrap();
        let result = Gateway::with_options(Options {
            source_dir: dir.path().display().to_string(),
            public_path: "/assets/../private".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(RenderError::Configuration(_))));
    }

    #[test]
    fn test_resolve_page_infers_extension() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.js"), "export default () => null;").unwrap();

        let gateway = Gateway::with_options(Options {
            source_dir: dir.path().display().to_string(),
            ..Default::default()
        })
        .unwrap();

        let resolved = gateway.resolve_page("index").unwrap();
        assert!(resolved.ends_with("index.js"));
    }

    #[test]
    fn test_resolve_page_rejects_absolute_and_traversal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.js"), "export default () => null;").unwrap();

        let gateway = Gateway::with_options(Options {
            source_dir: dir.path().display().to_string(),
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            gateway.resolve_page("/etc/passwd"),
            Err(RenderError::ModuleNotFound { .. })
        ));
        assert!(matches!(
            gateway.resolve_page("../index.js"),
            Err(RenderError::ModuleNotFound { .. })
        ));
        assert!(matches!(
            gateway.resolve_page("a/../../index.js"),
            Err(RenderError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_page_rejects_wrong_extension() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data.json"), "{}").unwrap();

        let gateway = Gateway::with_options(Options {
            source_dir: dir.path().display().to_string(),
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            gateway.resolve_page("data.json"),
            Err(RenderError::ModuleNotFound { .. })
        ));
    }
}
