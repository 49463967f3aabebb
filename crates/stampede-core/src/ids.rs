use uuid::Uuid;

/// Generates a fresh test identifier (`stampede-test-<uuid8>`).
#[must_use]
pub fn test_id() -> String {
    prefixed("stampede-test")
}

/// Generates a fresh scenario identifier (`scenario-<uuid8>`).
#[must_use]
pub fn scenario_id() -> String {
    prefixed("scenario")
}

/// Generates a fresh user-manager identifier (`user-manager-<uuid8>`).
/// Manager ids must be unique process-wide; the UUID component covers that.
#[must_use]
pub fn user_manager_id() -> String {
    prefixed("user-manager")
}

/// Generates a fresh virtual-user identifier (`user-<uuid8>`).
#[must_use]
pub fn user_id() -> String {
    prefixed("user")
}

fn prefixed(prefix: &str) -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("{prefix}-{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_short_uuid() {
        let id = user_manager_id();
        assert!(id.starts_with("user-manager-"));
        assert_eq!(id.len(), "user-manager-".len() + 8);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(user_id(), user_id());
    }
}
