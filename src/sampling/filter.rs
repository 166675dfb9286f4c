//! Static exclusion rules.
//!
//! Load balancer probes and static assets are never worth replaying.

use crate::http::CapturedRequest;

/// User-Agent marker of the load balancer health checker.
pub const HEALTH_CHECK_AGENT: &str = "ELB-HealthChecker";

/// Path suffixes of static assets.
pub const STATIC_EXTENSIONS: [&str; 9] = [
    ".html", ".js", ".css", ".gif", ".png", ".jpeg", ".jpg", ".svg", ".webp",
];

pub fn is_health_check(request: &CapturedRequest) -> bool {
    let marker = HEALTH_CHECK_AGENT.as_bytes();
    request
        .user_agent()
        .windows(marker.len())
        .any(|window| window == marker)
}

/// Whether `path` (query already stripped) names a static asset.
pub fn is_static_asset(path: &str) -> bool {
    let path = path.as_bytes();
    STATIC_EXTENSIONS.iter().any(|ext| {
        let ext = ext.as_bytes();
        path.len() >= ext.len() && path[path.len() - ext.len()..].eq_ignore_ascii_case(ext)
    })
}
