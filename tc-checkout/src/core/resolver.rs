//! Pure resolution of a checkout request into a fetch plan.

use std::path::Path;

use tracing::warn;

use crate::core::alias::absolutize_local;
use crate::core::types::{CheckoutRequest, FetchPlan, RevisionSpec};
use crate::error::CheckoutError;

/// Resolve a raw request into a [`FetchPlan`].
///
/// - A missing head URL falls back to the base URL (and vice versa).
/// - A missing head revision becomes [`RevisionSpec::DefaultBranchHead`].
/// - `head_ref` is recorded but never influences the plan.
///
/// No I/O happens here beyond a warning when `head_ref` is ignored.
pub fn resolve(request: &CheckoutRequest) -> Result<FetchPlan, CheckoutError> {
    if request.directory.as_os_str().is_empty() {
        return Err(CheckoutError::InvalidRequest(
            "directory must not be empty".to_string(),
        ));
    }

    let base_url = non_empty(request.base_url.as_deref());
    let head_url = non_empty(request.head_url.as_deref());
    let (base_url, source_url) = match (base_url, head_url) {
        (Some(base), Some(head)) => (base, head),
        (Some(base), None) => (base.clone(), base),
        (None, Some(head)) => (head.clone(), head),
        (None, None) => {
            return Err(CheckoutError::InvalidRequest(
                "one of baseUrl or headUrl is required".to_string(),
            ));
        }
    };

    let target = match non_empty(request.head_rev.as_deref()) {
        Some(rev) => RevisionSpec::Literal(rev),
        None => RevisionSpec::DefaultBranchHead,
    };

    let head_ref = non_empty(request.head_ref.as_deref());
    if let Some(head_ref) = &head_ref
        && head_ref != target.as_backend_arg()
    {
        warn!(
            head_ref = %head_ref,
            target = %target,
            "headRef is not supported for mercurial and is ignored"
        );
    }

    Ok(FetchPlan {
        directory: request.directory.clone(),
        base_url,
        source_url,
        target,
        head_ref,
    })
}

/// Anchor relative local-path URLs of `plan` at `cwd`, the way the backend
/// records them as a clone origin.
pub fn anchor_local_paths(plan: FetchPlan, cwd: &Path) -> FetchPlan {
    FetchPlan {
        base_url: absolutize_local(&plan.base_url, cwd),
        source_url: absolutize_local(&plan.source_url, cwd),
        ..plan
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
