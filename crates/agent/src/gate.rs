use omniagent_core::{ActionKind, AutonomyMode, RiskLevel};

/// Decide whether a proposed action must pause for human approval.
///
/// This is the one place safety policy lives; new autonomy tiers are added
/// here, not at call sites. The kind-based override is evaluated before the
/// missing-label default — reversing that order changes safety behavior.
pub fn should_block(kind: ActionKind, risk: Option<RiskLevel>, mode: AutonomyMode) -> bool {
    // Internal or inert kinds never block, whatever their label says.
    if matches!(
        kind,
        ActionKind::SaveMemory | ActionKind::Done | ActionKind::Wait
    ) {
        return false;
    }

    // Fail closed: an unlabeled action is treated as high risk.
    let risk = risk.unwrap_or(RiskLevel::High);

    match mode {
        AutonomyMode::Manual => true,
        AutonomyMode::Semi => risk == RiskLevel::High,
        AutonomyMode::Auto => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ActionKind::*;
    use AutonomyMode::*;
    use RiskLevel::*;

    #[test]
    fn manual_blocks_everything_executable() {
        assert!(should_block(Click, Some(High), Manual));
        assert!(should_block(Click, Some(Low), Manual));
        assert!(should_block(Navigate, Some(Medium), Manual));
    }

    #[test]
    fn semi_blocks_only_high() {
        assert!(should_block(Click, Some(High), Semi));
        assert!(!should_block(Click, Some(Low), Semi));
        assert!(!should_block(Click, Some(Medium), Semi));
    }

    #[test]
    fn auto_blocks_nothing() {
        assert!(!should_block(Click, Some(High), Auto));
        assert!(!should_block(Navigate, None, Auto));
    }

    #[test]
    fn missing_risk_fails_closed() {
        assert!(should_block(Click, None, Semi));
        assert!(should_block(Type, None, Manual));
    }

    #[test]
    fn inert_kinds_never_block_even_in_manual() {
        assert!(!should_block(Done, Some(High), Manual));
        assert!(!should_block(SaveMemory, Some(High), Manual));
        assert!(!should_block(Wait, None, Manual));
    }

    #[test]
    fn kind_override_beats_missing_label_default() {
        // An unlabeled DONE would default to HIGH if the label rule came
        // first; the kind override must win.
        assert!(!should_block(Done, None, Semi));
        assert!(!should_block(SaveMemory, None, Manual));
    }
}
