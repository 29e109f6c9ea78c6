use super::GitFailureKind;

// Checked in order; the first list with a match wins. Ref errors come first
// because "pathspec ... did not match" would otherwise hit the not-found list.
const REF_NOT_FOUND_PATTERNS: &[&str] = &[
    "did not match any file(s) known to git",
    "unknown revision",
    "couldn't find remote ref",
    "remote branch",
    "invalid reference",
    "not a commit",
    "reference is not a tree",
    "needed a single revision",
];

const AUTH_PATTERNS: &[&str] = &[
    "authentication failed",
    "permission denied (publickey",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "invalid username or password",
];

const NETWORK_PATTERNS: &[&str] = &[
    "could not resolve host",
    "connection refused",
    "connection timed out",
    "operation timed out",
    "connection reset by peer",
    "connection closed by",
    "network is unreachable",
    "unable to access",
    "ssh_dispatch_run_fatal",
];

const REPO_NOT_FOUND_PATTERNS: &[&str] = &[
    "repository not found",
    "does not appear to be a git repository",
    "does not exist",
    "not a git repository",
    "not found",
];

/// Map combined git output to a failure kind by substring matching.
pub fn classify_output(output: &str) -> GitFailureKind {
    let lower = output.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if matches(REF_NOT_FOUND_PATTERNS) {
        GitFailureKind::RefNotFound
    } else if matches(AUTH_PATTERNS) {
        GitFailureKind::AuthenticationFailed
    } else if matches(NETWORK_PATTERNS) {
        GitFailureKind::NetworkError
    } else if matches(REPO_NOT_FOUND_PATTERNS) {
        GitFailureKind::RepositoryNotFound
    } else {
        GitFailureKind::Unclassified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_missing_ref() {
        let out = "error: pathspec 'nope' did not match any file(s) known to git";
        assert_eq!(classify_output(out), GitFailureKind::RefNotFound);
        let out = "warning: Could not find remote branch nope to clone.\nfatal: Remote branch nope not found in upstream origin";
        assert_eq!(classify_output(out), GitFailureKind::RefNotFound);
    }

    #[test]
    fn classifies_auth_failure() {
        let out = "git@github.com: Permission denied (publickey).\nfatal: Could not read from remote repository.";
        assert_eq!(classify_output(out), GitFailureKind::AuthenticationFailed);
        let out = "fatal: Authentication failed for 'https://github.com/o/r.git/'";
        assert_eq!(classify_output(out), GitFailureKind::AuthenticationFailed);
    }

    #[test]
    fn classifies_network_failure() {
        let out = "fatal: unable to access 'https://nohost.invalid/r.git/': Could not resolve host: nohost.invalid";
        assert_eq!(classify_output(out), GitFailureKind::NetworkError);
    }

    #[test]
    fn classifies_missing_repository() {
        let out = "fatal: repository '/tmp/nowhere' does not exist";
        assert_eq!(classify_output(out), GitFailureKind::RepositoryNotFound);
        let out = "remote: Repository not found.";
        assert_eq!(classify_output(out), GitFailureKind::RepositoryNotFound);
    }

    #[test]
    fn unknown_output_is_unclassified() {
        assert_eq!(
            classify_output("fatal: something odd happened"),
            GitFailureKind::Unclassified
        );
        assert_eq!(classify_output(""), GitFailureKind::Unclassified);
    }
}
