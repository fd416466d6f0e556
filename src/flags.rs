use std::sync::Arc;

/// Feature flags the engine consults at runtime. Each resolves to a boolean
/// through the embedder-supplied [`FlagManager`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::IntoStaticStr,
)]
pub enum Flag {
    /// Run policy checkers before resolvers. Enabled by default.
    #[strum(to_string = "EXECUTE_ACCESS_CHECKS")]
    ExecuteAccessChecks,
    /// Bypass the content-addressed execution plan cache.
    #[strum(to_string = "DISABLE_QUERY_PLAN_CACHE")]
    DisableQueryPlanCache,
    /// Collapse batch coalescing to flush-per-enqueue. Escape hatch for the
    /// enqueue-then-flush tick protocol.
    #[strum(to_string = "KILLSWITCH_NON_BLOCKING_ENQUEUE_FLUSH")]
    KillswitchNonBlockingEnqueueFlush,
    /// Allow resolvers to execute subqueries and submutations through their
    /// context handle.
    #[strum(to_string = "ENABLE_SUBQUERY_EXECUTION_VIA_HANDLE")]
    EnableSubqueryExecutionViaHandle,
}

impl Flag {
    /// The value used when the embedder's flag manager has no opinion.
    pub fn default_value(self) -> bool {
        matches!(self, Flag::ExecuteAccessChecks)
    }
}

/// Resolves feature flags. Process-wide; implementations must be thread-safe.
pub trait FlagManager: Send + Sync {
    fn is_enabled(&self, flag: Flag) -> bool;
}

/// Flag manager with a fixed set of enabled flags on top of the defaults.
#[derive(Default)]
pub struct StaticFlagManager {
    enabled: Vec<Flag>,
    disabled: Vec<Flag>,
}

impl StaticFlagManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(mut self, flag: Flag) -> Self {
        self.enabled.push(flag);
        self
    }

    pub fn disable(mut self, flag: Flag) -> Self {
        self.disabled.push(flag);
        self
    }
}

impl FlagManager for StaticFlagManager {
    fn is_enabled(&self, flag: Flag) -> bool {
        if self.disabled.contains(&flag) {
            false
        } else if self.enabled.contains(&flag) {
            true
        } else {
            flag.default_value()
        }
    }
}

pub(crate) fn default_flag_manager() -> Arc<dyn FlagManager> {
    Arc::new(StaticFlagManager::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn access_checks_is_the_only_default_on_flag() {
        let manager = StaticFlagManager::new();
        for flag in Flag::iter() {
            assert_eq!(
                manager.is_enabled(flag),
                flag == Flag::ExecuteAccessChecks,
                "unexpected default for {flag}",
            );
        }
    }

    #[test]
    fn explicit_settings_override_defaults() {
        let manager = StaticFlagManager::new()
            .enable(Flag::EnableSubqueryExecutionViaHandle)
            .disable(Flag::ExecuteAccessChecks);
        assert!(manager.is_enabled(Flag::EnableSubqueryExecutionViaHandle));
        assert!(!manager.is_enabled(Flag::ExecuteAccessChecks));
    }
}
