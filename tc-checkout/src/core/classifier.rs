//! Deterministic classification of backend failure output.

use std::sync::LazyLock;

use regex::Regex;

/// Whether a failed backend command is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Fatal,
}

/// Messages that mean retrying cannot help. Checked before transient markers.
const FATAL_MARKERS: &[&str] = &[
    "authorization failed",
    "authorization required",
    "unknown revision",
    "abort: unknown",
    "filtered revision",
    "no space left on device",
    "permission denied",
    "read-only file system",
    "not a mercurial bundle",
    "does not appear to be an hg repository",
    "no suitable response from remote hg",
];

/// Messages produced by flaky networks or an overloaded caching layer.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection aborted",
    "timed out",
    "temporary failure in name resolution",
    "stream ended unexpectedly",
    "broken pipe",
    "eof occurred in violation of protocol",
    "remote hung up",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "network is unreachable",
];

/// Messages from a repository left mid-transaction or mid-update by a killed
/// process. Only recreating the repository clears them.
const INTERRUPTED_MARKERS: &[&str] = &[
    "abandoned transaction found",
    "interrupted transaction",
    "run 'hg recover'",
    "last update was interrupted",
];

static HTTP_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)http error:?\s*(\d{3})").expect("static http status regex")
});

static REPOSITORY_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)repository .* not found").expect("static not-found regex")
});

/// Classify the stderr of a failed network command (clone, pull, identify
/// against a remote).
///
/// - Fatal markers win over everything else.
/// - HTTP 5xx and the transient markers are retryable.
/// - Anything unrecognized is fatal, so unknown failures never loop.
pub fn classify_network_failure(stderr: &str) -> FailureClass {
    let lowered = stderr.to_lowercase();

    if let Some(code) = http_status(&lowered) {
        return if (500..600).contains(&code) {
            FailureClass::Transient
        } else {
            FailureClass::Fatal
        };
    }
    if FATAL_MARKERS.iter().any(|marker| lowered.contains(marker))
        || REPOSITORY_NOT_FOUND.is_match(&lowered)
    {
        return FailureClass::Fatal;
    }
    if TRANSIENT_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return FailureClass::Transient;
    }
    FailureClass::Fatal
}

/// True if the output says the requested revision does not exist.
pub fn is_unknown_revision(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    lowered.contains("unknown revision") || lowered.contains("abort: unknown")
}

/// True if the output reports an abandoned transaction or interrupted update.
pub fn is_interrupted_transaction(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    INTERRUPTED_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn http_status(lowered: &str) -> Option<u16> {
    HTTP_STATUS
        .captures(lowered)
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse().ok())
}

/// Reduce backend stderr to a single readable reason line.
pub fn summarize_reason(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("abort:"))
        .or_else(|| lines.last())
        .map(|line| line.to_string())
        .unwrap_or_else(|| "no output from backend".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_reset_is_transient() {
        let stderr = "abort: error: [Errno 104] Connection reset by peer";
        assert_eq!(classify_network_failure(stderr), FailureClass::Transient);
    }

    #[test]
    fn timeouts_are_transient() {
        assert_eq!(
            classify_network_failure("abort: error: Connection timed out"),
            FailureClass::Transient
        );
        assert_eq!(
            classify_network_failure("abort: error: The read operation timed out"),
            FailureClass::Transient
        );
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(
            classify_network_failure("abort: HTTP Error 503: Service Unavailable"),
            FailureClass::Transient
        );
        assert_eq!(
            classify_network_failure("abort: HTTP Error 502: Bad Gateway"),
            FailureClass::Transient
        );
    }

    #[test]
    fn client_errors_are_fatal() {
        assert_eq!(
            classify_network_failure("abort: HTTP Error 401: Unauthorized"),
            FailureClass::Fatal
        );
        assert_eq!(
            classify_network_failure("abort: HTTP Error 404: Not Found"),
            FailureClass::Fatal
        );
    }

    #[test]
    fn auth_and_unknown_revision_are_fatal() {
        assert_eq!(
            classify_network_failure("abort: authorization failed"),
            FailureClass::Fatal
        );
        assert_eq!(
            classify_network_failure("abort: unknown revision 'deadbeef'!"),
            FailureClass::Fatal
        );
        assert_eq!(
            classify_network_failure("abort: repository /tmp/nope not found"),
            FailureClass::Fatal
        );
    }

    #[test]
    fn disk_full_is_fatal_even_with_transient_words() {
        let stderr = "abort: No space left on device (connection reset afterwards)";
        assert_eq!(classify_network_failure(stderr), FailureClass::Fatal);
    }

    #[test]
    fn unrecognized_failures_are_fatal() {
        assert_eq!(
            classify_network_failure("abort: something odd happened"),
            FailureClass::Fatal
        );
        assert_eq!(classify_network_failure(""), FailureClass::Fatal);
    }

    #[test]
    fn detects_unknown_revision() {
        assert!(is_unknown_revision("abort: unknown revision 'abc123'!"));
        assert!(!is_unknown_revision("abort: HTTP Error 500"));
    }

    #[test]
    fn detects_interrupted_transaction() {
        assert!(is_interrupted_transaction(
            "abort: abandoned transaction found!\n(run 'hg recover' to clean up transaction)\n"
        ));
        assert!(is_interrupted_transaction("abort: last update was interrupted"));
        assert!(!is_interrupted_transaction("abort: unknown revision 'abc123'!"));
    }

    #[test]
    fn summary_prefers_abort_line() {
        let stderr =
            "pulling from https://example/repo\nwarning: noise\nabort: HTTP Error 500: boom\n";
        assert_eq!(summarize_reason(stderr), "abort: HTTP Error 500: boom");
        assert_eq!(summarize_reason("  \n"), "no output from backend");
        assert_eq!(summarize_reason("only line"), "only line");
    }
}
