//! Repository URL aliases used for origin comparison and cache keys.

use std::path::{Component, Path, PathBuf};

use md5::{Digest, Md5};
use url::Url;

/// Strip the scheme from a repository URL: `https://foo.org/bar` → `foo.org/bar`.
///
/// Trailing slashes are dropped so that `repo` and `repo/` compare equal.
/// Inputs that do not parse as URLs (local paths) are returned trimmed.
pub fn alias(url: &str) -> String {
    let trimmed = url.trim();
    let alias = match Url::parse(trimmed) {
        Ok(parsed) if parsed.has_host() => {
            let host = parsed.host_str().unwrap_or_default();
            match parsed.port() {
                Some(port) => format!("{host}:{port}{}", parsed.path()),
                None => format!("{host}{}", parsed.path()),
            }
        }
        Ok(parsed) if parsed.scheme() == "file" => parsed.path().to_string(),
        _ => trimmed.to_string(),
    };
    alias.trim_end_matches('/').to_string()
}

/// True if two repository locators point at the same repository.
pub fn same_repository(a: &str, b: &str) -> bool {
    alias(a) == alias(b)
}

/// Anchor a relative local-path locator at `cwd`.
///
/// Mercurial records local clone sources in `paths.default` as absolute,
/// lexically normalized paths. URLs and absolute paths are returned as-is.
pub fn absolutize_local(locator: &str, cwd: &Path) -> String {
    let path = Path::new(locator);
    if locator.is_empty() || Url::parse(locator).is_ok() || path.is_absolute() {
        return locator.to_string();
    }
    normalize(&cwd.join(path)).to_string_lossy().to_string()
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Join URL segments with a single `/`, trimming trailing slashes of each part.
pub fn urljoin<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|part| part.as_ref().trim_end_matches('/'))
        .collect::<Vec<_>>()
        .join("/")
}

/// TaskCluster index namespace for a repository alias.
pub fn cache_namespace(prefix: &str, alias: &str) -> String {
    let digest = Md5::digest(alias.as_bytes());
    format!("{prefix}.{}", hex::encode(digest))
}
