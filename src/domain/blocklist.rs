//! Blocklist classifier for permanently unobservable post URLs

use serde::{Deserialize, Serialize};

/// One blocklist entry: a URL substring and the reason it cannot be observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRule {
    pub pattern: String,
    pub reason: String,
}

impl BlockRule {
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// Result of classifying a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockClassification {
    Allowed,
    Blocked { reason: String },
}

impl BlockClassification {
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Blocked { reason } => Some(reason),
        }
    }
}

/// Ordered table of known-unobservable domains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocklist {
    rules: Vec<BlockRule>,
}

impl Blocklist {
    #[must_use]
    pub const fn new(rules: Vec<BlockRule>) -> Self {
        Self { rules }
    }

    /// Default table: shorteners, bot-blocking and login-walled platforms
    #[must_use]
    pub fn default_rules() -> Vec<BlockRule> {
        vec![
            BlockRule::new("gnun.link", "단축 URL (리다이렉트 차단)"),
            BlockRule::new("daedamo.com", "대다모 (봇 차단)"),
            BlockRule::new("corp.babitalk.com", "바비톡 (사내 전용 URL)"),
            BlockRule::new("gangnamunni.com", "강남언니 (JS/봇 차단)"),
            BlockRule::new("sungyesa.com", "성예사 (로그인/봇 차단)"),
        ]
    }

    /// First matching rule wins
    #[must_use]
    pub fn classify(&self, url: &str) -> BlockClassification {
        self.rules
            .iter()
            .find(|rule| !rule.pattern.is_empty() && url.contains(&rule.pattern))
            .map_or(BlockClassification::Allowed, |rule| BlockClassification::Blocked {
                reason: rule.reason.clone(),
            })
    }

    #[must_use]
    pub fn rules(&self) -> &[BlockRule] {
        &self.rules
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://gnun.link/abc", "단축 URL (리다이렉트 차단)")]
    #[case("https://www.daedamo.com/bbs/123", "대다모 (봇 차단)")]
    #[case("https://corp.babitalk.com/post/9", "바비톡 (사내 전용 URL)")]
    #[case("https://www.gangnamunni.com/community/1", "강남언니 (JS/봇 차단)")]
    #[case("http://sungyesa.com/new/1", "성예사 (로그인/봇 차단)")]
    fn test_blocked_domains(#[case] url: &str, #[case] reason: &str) {
        let classification = Blocklist::default().classify(url);
        assert!(classification.is_blocked());
        assert_eq!(classification.reason(), Some(reason));
    }

    #[rstest]
    #[case("https://cafe.naver.com/feko/999120")]
    #[case("https://babitalk.com/community/1")]
    #[case("")]
    fn test_allowed_urls(#[case] url: &str) {
        let classification = Blocklist::default().classify(url);
        assert_eq!(classification, BlockClassification::Allowed);
        assert_eq!(classification.reason(), None);
    }

    #[test]
    fn test_first_match_wins() {
        let blocklist = Blocklist::new(vec![
            BlockRule::new("example.com", "first"),
            BlockRule::new("example.com/deep", "second"),
        ]);
        assert_eq!(
            blocklist.classify("https://example.com/deep/1").reason(),
            Some("first")
        );
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        let blocklist = Blocklist::new(vec![BlockRule::new("", "everything")]);
        assert!(!blocklist.classify("https://cafe.naver.com/a/1").is_blocked());
    }
}
