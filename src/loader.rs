//! Module loader scoped to the gateway's source directory.
//!
//! Resolves page modules and their relative imports against the configured
//! source root, blocks everything else (remote URLs, traversal out of the
//! root, non-JS files), and serves source text through the shared
//! [`ModuleCache`] so the fingerprint discipline covers imported components
//! as well as page entry points.

use crate::cache::ModuleCache;
use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a raw import specifier should be interpreted.
enum Specifier<'a> {
    /// http/https/data/blob - always refused
    Remote(&'a str),
    /// `./x` or `../x`, resolved against the importing module
    Relative(&'a str),
    /// Already a `file://` URL
    FileUrl(&'a str),
    /// `/abs/path` on the local filesystem
    Rooted(&'a str),
    /// Anything else; resolved from the source root, no package lookup
    Bare(&'a str),
}

impl<'a> Specifier<'a> {
    fn classify(raw: &'a str) -> Self {
        const REMOTE_SCHEMES: &[&str] = &["http://", "https://", "data:", "blob:"];
        if REMOTE_SCHEMES.iter().any(|scheme| raw.starts_with(scheme)) {
            Self::Remote(raw)
        } else if raw.starts_with("./") || raw.starts_with("../") {
            Self::Relative(raw)
        } else if raw.starts_with("file://") {
            Self::FileUrl(raw)
        } else if raw.starts_with('/') {
            Self::Rooted(raw)
        } else {
            Self::Bare(raw)
        }
    }
}

/// A module loader restricted to a single source directory.
///
/// Guarantees:
/// - No network access (http/https/data/blob specifiers rejected)
/// - No filesystem escape (canonicalization + prefix check against the root)
/// - Only `.js` and `.mjs` files are loadable
/// - Dynamic imports allowed, subject to the same checks
pub(crate) struct GatewayLoader {
    /// Canonicalized source root; validated by the gateway at construction.
    source_dir: PathBuf,
    cache: Arc<ModuleCache>,
}

impl GatewayLoader {
    pub(crate) fn new(source_dir: PathBuf, cache: Arc<ModuleCache>) -> Self {
        Self { source_dir, cache }
    }

    /// Canonicalize and verify the path stays under the source root.
    /// Canonicalization resolves symlinks, so a link pointing outside the
    /// root is rejected too.
    fn is_path_allowed(&self, path: &Path) -> bool {
        match path.canonicalize() {
            Ok(canonical) => canonical.starts_with(&self.source_dir),
            Err(_) => false,
        }
    }

    fn is_extension_allowed(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("js") | Some("mjs")
        )
    }

    /// Shared gate for resolve and load: the specifier must name a file
    /// under the source root with an allowed extension.
    fn checked_module_path(&self, resolved: &ModuleSpecifier) -> Result<PathBuf, Error> {
        if resolved.scheme() != "file" {
            return Err(anyhow!(
                "only file:// modules are allowed, got: {}",
                resolved.scheme()
            ));
        }

        let path = resolved
            .to_file_path()
            .map_err(|_| anyhow!("failed to convert URL to path: {}", resolved))?;

        if !self.is_path_allowed(&path) {
            return Err(anyhow!(
                "access denied: '{}' is outside the source directory",
                path.display()
            ));
        }
        if !Self::is_extension_allowed(&path) {
            return Err(anyhow!(
                "only .js and .mjs modules are allowed, got: {}",
                path.display()
            ));
        }

        Ok(path)
    }
}

impl ModuleLoader for GatewayLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        let resolved = match Specifier::classify(specifier) {
            Specifier::Remote(raw) => {
                return Err(anyhow!("remote imports are forbidden: {raw}"));
            }
            Specifier::Relative(raw) => ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("invalid referrer '{referrer}': {e}"))?
                .join(raw)
                .map_err(|e| anyhow!("failed to resolve '{raw}': {e}"))?,
            Specifier::FileUrl(raw) => ModuleSpecifier::parse(raw)
                .map_err(|e| anyhow!("invalid file URL '{raw}': {e}"))?,
            Specifier::Rooted(raw) => ModuleSpecifier::from_file_path(raw)
                .map_err(|_| anyhow!("invalid absolute path: {raw}"))?,
            Specifier::Bare(raw) => {
                ModuleSpecifier::from_file_path(self.source_dir.join(raw))
                    .map_err(|_| anyhow!("invalid bare specifier: {raw}"))?
            }
        };

        self.checked_module_path(&resolved)?;
        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let specifier = module_specifier.clone();

        // Re-run the full gate: load can be reached with specifiers that did
        // not pass through resolve.
        let path = match self.checked_module_path(&specifier) {
            Ok(path) => path,
            Err(e) => return ModuleLoadResponse::Sync(Err(e)),
        };

        let entry = match self.cache.load(&path) {
            Ok(entry) => entry,
            Err(e) => {
                return ModuleLoadResponse::Sync(Err(anyhow!(
                    "failed to read '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        ModuleLoadResponse::Sync(Ok(ModuleSource::new(
            ModuleType::JavaScript,
            ModuleSourceCode::String(entry.source.to_string().into()),
            &specifier,
            None,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn loader_for(dir: &Path) -> GatewayLoader {
        GatewayLoader::new(
            dir.canonicalize().unwrap(),
            Arc::new(ModuleCache::new()),
        )
    }

    #[test]
    fn test_blocks_remote_urls() {
        let dir = tempdir().unwrap();
        let loader = loader_for(dir.path());

        let result = loader.resolve(
            "https://evil.example/payload.js",
            "file:///page.js",
            ResolutionKind::Import,
        );
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("remote imports are forbidden"));
    }

    #[test]
    fn test_blocks_data_and_blob_urls() {
        let dir = tempdir().unwrap();
        let loader = loader_for(dir.path());

        for raw in ["data:text/javascript,1", "blob:null/abc"] {
            let result = loader.resolve(raw, "file:///page.js", ResolutionKind::Import);
            assert!(result.is_err(), "{raw} should be refused");
        }
    }

    #[test]
    fn test_blocks_path_traversal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("page.js"), "export default 1;").unwrap();
        let loader = loader_for(dir.path());

        let entry = format!("file://{}/page.js", dir.path().display());
        let result = loader.resolve("../../../etc/passwd", &entry, ResolutionKind::Import);
        assert!(result.is_err());
    }

    #[test]
    fn test_allows_relative_imports() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("header.js"), "export default 1;").unwrap();
        let loader = loader_for(dir.path());

        let entry = format!(
            "file://{}/page.js",
            dir.path().canonicalize().unwrap().display()
        );
        let result = loader.resolve("./header.js", &entry, ResolutionKind::Import);
        assert!(result.is_ok());
    }

    #[test]
    fn test_resolves_bare_specifiers_from_root() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("components")).unwrap();
        fs::write(dir.path().join("components/card.js"), "export default 1;").unwrap();
        let loader = loader_for(dir.path());

        let entry = format!(
            "file://{}/page.js",
            dir.path().canonicalize().unwrap().display()
        );
        let result = loader.resolve("components/card.js", &entry, ResolutionKind::Import);
        assert!(result.is_ok());
    }

    #[test]
    fn test_blocks_non_js_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data.json"), "{}").unwrap();
        let loader = loader_for(dir.path());

        let entry = format!(
            "file://{}/page.js",
            dir.path().canonicalize().unwrap().display()
        );
        let result = loader.resolve("./data.json", &entry, ResolutionKind::Import);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains(".js and .mjs"));
    }
}
