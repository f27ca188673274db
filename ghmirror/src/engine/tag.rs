use strum::{AsRefStr, Display};

/// Closed set of `X-Cache` values. Every response carries exactly one,
/// both as a header and as the metrics `cache` label, so exhaustiveness
/// checking guards invariant 3 at compile time rather than at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatusTag {
    OnlineMiss,
    OnlineHit,
    OfflineMiss,
    OfflineHit,
    RateLimitedMiss,
    RateLimitedHit,
    ApiErrorMiss,
    ApiErrorHit,
    ApiTimeoutHit,
    ApiConnectionErrorHit,
}

impl CacheStatusTag {
    /// True for the `*_HIT` variants, i.e. those served from cache rather
    /// than fresh from upstream.
    #[must_use]
    pub const fn is_hit(self) -> bool {
        matches!(
            self,
            Self::OnlineHit
                | Self::OfflineHit
                | Self::RateLimitedHit
                | Self::ApiErrorHit
                | Self::ApiTimeoutHit
                | Self::ApiConnectionErrorHit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values_are_screaming_snake_case() {
        assert_eq!(CacheStatusTag::OnlineMiss.to_string(), "ONLINE_MISS");
        assert_eq!(
            CacheStatusTag::ApiConnectionErrorHit.to_string(),
            "API_CONNECTION_ERROR_HIT"
        );
    }

    #[test]
    fn hit_variants_are_classified_correctly() {
        assert!(CacheStatusTag::OnlineHit.is_hit());
        assert!(!CacheStatusTag::OnlineMiss.is_hit());
    }
}
