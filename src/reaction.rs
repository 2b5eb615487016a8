//! Reaction policy for detected corruption
//!
//! Maps the configured `ReactionMode` onto the concrete steps a check takes
//! once the live stack and the mirror disagree.

use crate::config::{DumpConfig, ReactionMode, ShadowConfig};

/// Concrete steps to take after a mismatch, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaction {
    /// Print the diagnostic report
    pub report: bool,
    /// Restore the live stack from the mirror
    pub heal: bool,
    /// Terminate the process
    pub abort: bool,
}

impl Reaction {
    /// Steps for a reaction mode
    pub const fn for_mode(mode: ReactionMode) -> Self {
        match mode {
            ReactionMode::Ignore => Self::steps(false, false, false),
            ReactionMode::QuietHeal => Self::steps(false, true, false),
            ReactionMode::Report => Self::steps(true, false, false),
            ReactionMode::Heal => Self::steps(true, true, false),
            ReactionMode::Abort => Self::steps(true, false, true),
        }
    }

    const fn steps(report: bool, heal: bool, abort: bool) -> Self {
        Self {
            report,
            heal,
            abort,
        }
    }

    /// Whether the reaction leaves memory and output untouched
    pub const fn is_silent(&self) -> bool {
        !self.report && !self.heal && !self.abort
    }
}

/// Resolved policy for one corruption event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionPolicy {
    pub mode: ReactionMode,
    pub reaction: Reaction,
    pub dump: DumpConfig,
}

impl ReactionPolicy {
    /// Resolve the policy from a configuration snapshot
    pub fn resolve(config: &ShadowConfig) -> Self {
        Self {
            mode: config.reaction,
            reaction: Reaction::for_mode(config.reaction),
            dump: config.dump.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_is_silent() {
        assert!(Reaction::for_mode(ReactionMode::Ignore).is_silent());
    }

    #[test]
    fn test_quiet_heal_heals_without_report() {
        let r = Reaction::for_mode(ReactionMode::QuietHeal);
        assert!(r.heal);
        assert!(!r.report);
        assert!(!r.abort);
    }

    #[test]
    fn test_report_leaves_memory_alone() {
        let r = Reaction::for_mode(ReactionMode::Report);
        assert!(r.report);
        assert!(!r.heal);
        assert!(!r.abort);
    }

    #[test]
    fn test_heal_reports_and_heals() {
        let r = Reaction::for_mode(ReactionMode::Heal);
        assert!(r.report && r.heal && !r.abort);
    }

    #[test]
    fn test_abort_reports_then_aborts() {
        let r = Reaction::for_mode(ReactionMode::Abort);
        assert!(r.report && r.abort && !r.heal);
    }

    #[test]
    fn test_policy_carries_dump_config() {
        let mut config = ShadowConfig::default();
        config.reaction = ReactionMode::Heal;
        config.dump.width = 8;
        let policy = ReactionPolicy::resolve(&config);
        assert_eq!(policy.mode, ReactionMode::Heal);
        assert_eq!(policy.dump.width, 8);
        assert_eq!(policy.reaction, Reaction::for_mode(ReactionMode::Heal));
    }
}
