use regex::Regex;
use serde::Deserialize;

/// The role-assignment write action the connect flow requires of the signed-in
/// user before it will hand out roles on a subscription.
pub const MANAGE_ACCESS_ACTION: &str = "microsoft.authorization/roleassignments/write";

/// One entry of an ARM permissions response: wildcard patterns granted to the
/// caller (`actions`) and patterns carved back out (`notActions`).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default, rename = "notActions")]
    pub not_actions: Vec<String>,
}

/// Whether `action` (a fixed lowercase action string) is authorized by any of
/// the permission sets: some `actions` pattern must match while no
/// `notActions` pattern does. A notActions match always overrides; empty
/// `actions` grants nothing.
pub fn allows_action(sets: &[PermissionSet], action: &str) -> bool {
    sets.iter().any(|set| {
        set.actions.iter().any(|p| pattern_matches(p, action))
            && !set.not_actions.iter().any(|p| pattern_matches(p, action))
    })
}

/// Exact-match variant used for the read-access probe: `*` or `*/read` grants,
/// while a notAction of `*` or any suffix `/read` revokes.
pub fn allows_read(sets: &[PermissionSet]) -> bool {
    sets.iter().any(|set| {
        set.actions
            .iter()
            .any(|a| a.eq_ignore_ascii_case("*/read") || a.eq_ignore_ascii_case("*"))
            && !set.not_actions.iter().any(|n| {
                n.eq_ignore_ascii_case("*") || n.to_lowercase().ends_with("/read")
            })
    })
}

/// Wildcard pattern match: literal characters are escaped, `*` becomes `.*`,
/// and the whole pattern is anchored.
fn pattern_matches(pattern: &str, action: &str) -> bool {
    let anchored = format!(
        "^{}$",
        regex::escape(&pattern.to_lowercase()).replace("\\*", ".*")
    );
    Regex::new(&anchored)
        .map(|re| re.is_match(action))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(actions: &[&str], not_actions: &[&str]) -> PermissionSet {
        PermissionSet {
            actions: actions.iter().map(|s| s.to_string()).collect(),
            not_actions: not_actions.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn star_grants_everything() {
        let sets = vec![set(&["*"], &[])];
        assert!(allows_action(&sets, MANAGE_ACCESS_ACTION));
        assert!(allows_read(&sets));
    }

    #[test]
    fn not_actions_override_grant() {
        // Owner-minus-authorization-writes: reads ok, role assignment writes not.
        let sets = vec![set(&["*"], &["Microsoft.Authorization/*/Write"])];
        assert!(!allows_action(&sets, MANAGE_ACCESS_ACTION));
        assert!(allows_read(&sets));
    }

    #[test]
    fn empty_actions_grant_nothing() {
        let sets = vec![set(&[], &[])];
        assert!(!allows_action(&sets, MANAGE_ACCESS_ACTION));
        assert!(!allows_read(&sets));
        assert!(!allows_action(&[], MANAGE_ACCESS_ACTION));
    }

    #[test]
    fn wildcard_segments_match() {
        let sets = vec![set(&["Microsoft.Authorization/*/write"], &[])];
        assert!(allows_action(&sets, MANAGE_ACCESS_ACTION));
        assert!(!allows_action(
            &sets,
            "microsoft.authorization/roleassignments/read"
        ));
    }

    #[test]
    fn suffix_wildcard_is_anchored() {
        let sets = vec![set(&["*/write"], &[])];
        assert!(allows_action(&sets, MANAGE_ACCESS_ACTION));
        assert!(!allows_action(
            &sets,
            "microsoft.authorization/roleassignments/writex"
        ));
    }

    #[test]
    fn literal_patterns_do_not_glob() {
        // A dot in the pattern is a literal dot, not a regex any-char.
        let sets = vec![set(&["microsoftXauthorization/roleassignments/write"], &[])];
        assert!(!allows_action(&sets, MANAGE_ACCESS_ACTION));
    }

    #[test]
    fn any_grant_in_any_set_suffices() {
        let sets = vec![
            set(&["Microsoft.Compute/*"], &[]),
            set(&["*/read", "microsoft.authorization/roleassignments/write"], &[]),
        ];
        assert!(allows_action(&sets, MANAGE_ACCESS_ACTION));
    }

    #[test]
    fn reader_set_allows_read_only() {
        let sets = vec![set(&["*/read"], &[])];
        assert!(allows_read(&sets));
        assert!(!allows_action(&sets, MANAGE_ACCESS_ACTION));
    }

    #[test]
    fn read_carveouts_revoke_read() {
        let sets = vec![set(&["*"], &["*/read"])];
        assert!(!allows_read(&sets));
        let sets = vec![set(&["*/read"], &["Microsoft.Storage/storageAccounts/read"])];
        assert!(!allows_read(&sets));
    }
}
