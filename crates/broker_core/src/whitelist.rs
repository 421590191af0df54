use crate::error::WhitelistError;
use std::collections::HashSet;

/// Per-kind allow-set of conversation identifiers.
///
/// An empty set means "allow all" for that kind, matching the upstream
/// `CapabilityGuard`'s empty-network-whitelist convention.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    groups: HashSet<i64>,
    users: HashSet<i64>,
}

impl Whitelist {
    pub fn new(groups: HashSet<i64>, users: HashSet<i64>) -> Self {
        Self { groups, users }
    }

    pub fn check_group(&self, group_id: i64) -> Result<(), WhitelistError> {
        if self.groups.is_empty() || self.groups.contains(&group_id) {
            Ok(())
        } else {
            Err(WhitelistError::GroupNotAllowed(group_id))
        }
    }

    pub fn check_user(&self, user_id: i64) -> Result<(), WhitelistError> {
        if self.users.is_empty() || self.users.contains(&user_id) {
            Ok(())
        } else {
            Err(WhitelistError::UserNotAllowed(user_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_whitelist_allows_all() {
        let wl = Whitelist::default();
        assert!(wl.check_group(123).is_ok());
        assert!(wl.check_user(456).is_ok());
    }

    #[test]
    fn test_nonempty_whitelist_denies_absent() {
        let wl = Whitelist::new(HashSet::from([200]), HashSet::new());
        assert!(wl.check_group(200).is_ok());
        assert!(matches!(
            wl.check_group(100),
            Err(WhitelistError::GroupNotAllowed(100))
        ));
    }

    #[test]
    fn test_user_whitelist_independent_of_group() {
        let wl = Whitelist::new(HashSet::new(), HashSet::from([7]));
        assert!(wl.check_group(999).is_ok());
        assert!(wl.check_user(7).is_ok());
        assert!(wl.check_user(8).is_err());
    }
}
