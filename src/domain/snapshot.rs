//! Metrics snapshot - the result of a single extraction attempt
//!
//! A snapshot is produced once by the page extractor and consumed once by
//! reconciliation. Failure is carried in [`TerminalSignal`], never as an
//! error value, so a zeroed snapshot is never mistaken for an observation.

use serde::{Deserialize, Serialize};

/// Terminal outcome of an extraction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalSignal {
    /// Metrics were observed
    None,
    /// The platform reported the post as removed
    Deleted,
    /// Observation failed; metrics are unknown, not zero
    TransientError,
}

/// How the comment figures of a snapshot were obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentSource {
    /// Comment elements were found with the given selector
    Dom { selector: String },
    /// No comment list matched; the labeled total in the page text was used
    /// and every comment counts as external
    TextFallback,
    /// Neither the comment list nor a labeled total was found
    NotFound,
}

/// Comment totals with `external <= total` held by construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommentTally {
    total: u64,
    external: u64,
}

impl CommentTally {
    /// Tally from per-comment author classification
    pub fn from_authorship<I>(is_author: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        is_author
            .into_iter()
            .fold(Self::default(), |mut tally, by_author| {
                tally.total += 1;
                if !by_author {
                    tally.external += 1;
                }
                tally
            })
    }

    /// Total only; authorship is undecidable so all comments count as external
    #[must_use]
    pub const fn undifferentiated(total: u64) -> Self {
        Self { total, external: total }
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub const fn external(&self) -> u64 {
        self.external
    }
}

/// Snapshot of a post's engagement metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub title: String,
    pub total_comment_count: u64,
    pub external_comment_count: u64,
    pub view_count: u64,
    pub terminal_signal: TerminalSignal,
    pub comment_source: CommentSource,
}

impl MetricsSnapshot {
    pub fn observed(
        title: impl Into<String>,
        comments: CommentTally,
        view_count: u64,
        comment_source: CommentSource,
    ) -> Self {
        Self {
            title: title.into(),
            total_comment_count: comments.total(),
            external_comment_count: comments.external(),
            view_count,
            terminal_signal: TerminalSignal::None,
            comment_source,
        }
    }

    #[must_use]
    pub const fn deleted() -> Self {
        Self::terminal(TerminalSignal::Deleted)
    }

    #[must_use]
    pub const fn transient_error() -> Self {
        Self::terminal(TerminalSignal::TransientError)
    }

    const fn terminal(signal: TerminalSignal) -> Self {
        Self {
            title: String::new(),
            total_comment_count: 0,
            external_comment_count: 0,
            view_count: 0,
            terminal_signal: signal,
            comment_source: CommentSource::NotFound,
        }
    }

    #[must_use]
    pub const fn is_observed(&self) -> bool {
        matches!(self.terminal_signal, TerminalSignal::None)
    }
}
