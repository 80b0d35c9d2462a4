//! Bounding of untrusted values reported by game servers and status APIs.

use tracing::warn;

/// Upper bound for a reported player count.
///
/// Counts can be anything up to 2^32-1, which would flatten every graph
/// downstream, so they are capped here.
pub const MAX_PLAYER_COUNT: i64 = 250_000;

/// Only favicons embedded as image data URIs are passed on.
pub const FAVICON_PREFIX: &str = "data:image/";

/// Clamp a reported player count into `[0, MAX_PLAYER_COUNT]`.
///
/// Out-of-range values are logged with the offending host.
pub fn cap_player_count(host: &str, player_count: i64) -> i64 {
    if player_count > MAX_PLAYER_COUNT {
        warn!(
            host,
            player_count,
            cap = MAX_PLAYER_COUNT,
            "server reported a player count above the cap, capping it"
        );
        MAX_PLAYER_COUNT
    } else if player_count < 0 {
        warn!(host, player_count, "server reported an invalid player count, setting to 0");
        0
    } else {
        player_count
    }
}

/// Keep a favicon only if it is a data URI image.
pub fn accept_favicon(favicon: Option<String>) -> Option<String> {
    favicon.filter(|icon| icon.starts_with(FAVICON_PREFIX))
}
