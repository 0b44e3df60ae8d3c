//! Mount-path normalization.
//!
//! The transport serves the bridge under a caller-given namespace such as
//! `"api/socket/"`.  Namespaces are normalized to a canonical form with one
//! leading slash, no trailing slash, and no empty segments, so `"api/socket/"`,
//! `"/api//socket"` and `" /api/socket "` all become `"/api/socket"`.  The
//! empty namespace (or `"/"`) normalizes to `""` and matches every path.

/// Returns the canonical form of `namespace`.
///
/// # Examples
///
/// ```rust
/// use sockrpc_core::normalize_namespace;
///
/// assert_eq!(normalize_namespace("api/socket/"), "/api/socket");
/// assert_eq!(normalize_namespace("/"), "");
/// ```
pub fn normalize_namespace(namespace: &str) -> String {
    let segments: Vec<&str> = namespace
        .trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.is_empty() {
        String::new()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Returns `true` if `path` is the namespace itself or lies beneath it.
///
/// `namespace` must already be normalized.  Only whole segments match:
/// `/rpc` matches `/rpc` and `/rpc/ws` but not `/rpcx`.
pub fn namespace_matches(namespace: &str, path: &str) -> bool {
    if namespace.is_empty() {
        return true;
    }
    match path.strip_prefix(namespace) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
