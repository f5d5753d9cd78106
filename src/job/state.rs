use std::fmt;

/// Where a job directory sits in the pipeline, derived from its name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Ready,
    Active,
    Error,
    Receiving,
    Handled,
    Inferred,
    Unknown,
}

/// States that carry a name prefix, in matching order.
const PREFIXED: [JobState; 6] = [
    JobState::Ready,
    JobState::Active,
    JobState::Error,
    JobState::Receiving,
    JobState::Handled,
    JobState::Inferred,
];

impl JobState {
    /// The directory-name prefix for this state. `Unknown` has none.
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            JobState::Ready => Some("ready_"),
            JobState::Active => Some("active_"),
            JobState::Error => Some("error_"),
            JobState::Receiving => Some("receiving_"),
            JobState::Handled => Some("handled_"),
            JobState::Inferred => Some("inferred_"),
            JobState::Unknown => None,
        }
    }

    /// State implied by the name alone, ignoring any error marker.
    pub fn from_name(name: &str) -> JobState {
        PREFIXED
            .into_iter()
            .find(|state| {
                state
                    .prefix()
                    .is_some_and(|prefix| starts_with_ignore_case(name, prefix))
            })
            .unwrap_or(JobState::Unknown)
    }

    /// Classify a job directory.
    ///
    /// An error marker forces `Error` for every state except `Handled`: a
    /// marker next to a non-terminal prefix means a rename to `error_` was
    /// interrupted, while handled directories keep their marker for operators.
    pub fn classify(name: &str, has_error_marker: bool) -> JobState {
        match JobState::from_name(name) {
            JobState::Handled => JobState::Handled,
            _ if has_error_marker => JobState::Error,
            state => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == JobState::Handled
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Ready => write!(f, "ready"),
            JobState::Active => write!(f, "active"),
            JobState::Error => write!(f, "error"),
            JobState::Receiving => write!(f, "receiving"),
            JobState::Handled => write!(f, "handled"),
            JobState::Inferred => write!(f, "inferred"),
            JobState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Strip one leading state prefix (case-insensitive) from a directory name.
pub fn strip_state_prefix(name: &str) -> &str {
    PREFIXED
        .into_iter()
        .filter_map(JobState::prefix)
        .find(|prefix| starts_with_ignore_case(name, prefix))
        .map(|prefix| &name[prefix.len()..])
        .unwrap_or(name)
}

fn starts_with_ignore_case(name: &str, prefix: &str) -> bool {
    name.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_classify_case_insensitively() {
        assert_eq!(JobState::classify("ready_1234", false), JobState::Ready);
        assert_eq!(JobState::classify("READY_1234", false), JobState::Ready);
        assert_eq!(JobState::classify("Active_1234", false), JobState::Active);
        assert_eq!(JobState::classify("error_1234", false), JobState::Error);
        assert_eq!(
            JobState::classify("receiving_1234", false),
            JobState::Receiving
        );
        assert_eq!(
            JobState::classify("handled_error_1234", false),
            JobState::Handled
        );
        assert_eq!(JobState::classify("inferred_1234", false), JobState::Inferred);
    }

    #[test]
    fn unmatched_names_are_unknown() {
        assert_eq!(JobState::classify("1234", false), JobState::Unknown);
        assert_eq!(JobState::classify("readyx_1234", false), JobState::Unknown);
        assert_eq!(JobState::classify("", false), JobState::Unknown);
        assert_eq!(JobState::classify("rea", false), JobState::Unknown);
    }

    #[test]
    fn error_marker_overrides_non_terminal_prefixes() {
        for name in [
            "ready_1",
            "active_1",
            "receiving_1",
            "inferred_1",
            "error_1",
            "x",
        ] {
            assert_eq!(JobState::classify(name, true), JobState::Error, "{name}");
        }
    }

    #[test]
    fn error_marker_does_not_reopen_handled_jobs() {
        assert_eq!(
            JobState::classify("handled_error_1", true),
            JobState::Handled
        );
    }

    #[test]
    fn classification_ignores_invocation_order() {
        let names = ["ready_a", "active_b", "nope", "handled_c", "inferred_d"];
        let first: Vec<_> = names
            .iter()
            .map(|n| JobState::classify(n, false))
            .collect();
        let second: Vec<_> = names
            .iter()
            .rev()
            .map(|n| JobState::classify(n, false))
            .rev()
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn strip_prefix_removes_one_level() {
        assert_eq!(strip_state_prefix("ready_20240101_abc"), "20240101_abc");
        assert_eq!(strip_state_prefix("INFERRED_abc"), "abc");
        assert_eq!(strip_state_prefix("handled_error_abc"), "error_abc");
        assert_eq!(strip_state_prefix("plain"), "plain");
    }

    #[test]
    fn multibyte_names_do_not_panic() {
        assert_eq!(JobState::classify("ændret_æøå", false), JobState::Unknown);
        assert_eq!(strip_state_prefix("ø"), "ø");
    }
}
