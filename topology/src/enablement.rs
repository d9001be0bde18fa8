//! Per-height quorum type enablement.
//!
//! Enablement depends on the chain tip and on feature flags that can change at any time, so it
//! must be re-evaluated per tip rather than cached across reorganizations.

use llmq_types::{Consensus, QuorumType};

/// Spork value meaning "off" (a timestamp far in the future).
pub const SPORK_DISABLED: i64 = 4_070_908_800;

/// Feature-flag overrides that affect quorum connectivity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sporks {
    /// Connect every member of a quorum to every other member.
    pub quorum_all_connected: i64,

    /// Probe members for proof-of-service.
    pub quorum_pose: i64,
}

impl Default for Sporks {
    fn default() -> Self {
        Self {
            quorum_all_connected: SPORK_DISABLED,
            quorum_pose: SPORK_DISABLED,
        }
    }
}

impl Sporks {
    /// `0` enables the flag for every quorum type, `1` for every type except the large
    /// 100/400-member ones.
    fn eval(quorum_type: QuorumType, value: i64) -> bool {
        match value {
            0 => true,
            1 => !matches!(
                quorum_type,
                QuorumType::Llmq100_67 | QuorumType::Llmq400_60 | QuorumType::Llmq400_85
            ),
            _ => false,
        }
    }

    pub fn is_all_members_connected_enabled(&self, quorum_type: QuorumType) -> bool {
        Self::eval(quorum_type, self.quorum_all_connected)
    }

    pub fn is_pose_enabled(&self, quorum_type: QuorumType) -> bool {
        Self::eval(quorum_type, self.quorum_pose)
    }
}

/// The chain state enablement is evaluated against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainTip {
    pub height: u64,

    /// Whether the test-dummy version-bits deployment is active at this tip.
    pub test_dummy_active: bool,

    /// Whether at least one quorum of the rotating instant-send type has been mined.
    pub have_dip0024_quorums: bool,
}

/// Returns whether quorums of `quorum_type` are created (and accepted) at `tip`.
pub fn is_quorum_type_enabled(
    consensus: &Consensus,
    quorum_type: QuorumType,
    tip: &ChainTip,
) -> bool {
    match quorum_type {
        QuorumType::TestInstantSend | QuorumType::Devnet | QuorumType::Llmq50_60 => {
            // The legacy instant-send type retires once rotating quorums exist, unless another
            // feature still depends on it.
            if consensus.is_instant_send_type_shared() {
                return true;
            }
            if !consensus.is_dip0024_active(tip.height) {
                return true;
            }
            !tip.have_dip0024_quorums
        }
        QuorumType::Test
        | QuorumType::TestPlatform
        | QuorumType::Llmq400_60
        | QuorumType::Llmq400_85
        | QuorumType::DevnetPlatform => true,
        QuorumType::TestV17 => tip.test_dummy_active,
        QuorumType::Llmq100_67 => tip.height + 1 >= consensus.dip0020_height,
        QuorumType::Llmq60_75 | QuorumType::DevnetDip0024 | QuorumType::TestDip0024 => {
            consensus.is_dip0024_active(tip.height)
        }
        QuorumType::Llmq25_67 => tip.height >= consensus.llmq_25_67_height,
    }
}

/// Returns the quorum types of `consensus` enabled at `tip`, in processing order.
pub fn enabled_quorum_types(consensus: &Consensus, tip: &ChainTip) -> Vec<QuorumType> {
    consensus
        .llmqs
        .iter()
        .copied()
        .filter(|quorum_type| is_quorum_type_enabled(consensus, *quorum_type, tip))
        .collect()
}

/// Returns whether quorums of `quorum_type` mined in the cycle containing `height` rotate.
///
/// Rotation must already be active one block before the cycle's base block.
pub fn is_quorum_rotation_enabled(
    consensus: &Consensus,
    quorum_type: QuorumType,
    height: u64,
) -> bool {
    let params = quorum_type.params();
    if !params.use_rotation {
        return false;
    }
    let cycle_base = height - (height % params.dkg_interval);
    if cycle_base < 1 {
        return false;
    }
    consensus.is_dip0024_active(cycle_base - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, QuorumType::Llmq400_60, true; "zero enables large")]
    #[test_case(0, QuorumType::Llmq50_60, true; "zero enables small")]
    #[test_case(1, QuorumType::Llmq400_60, false; "one excludes 400_60")]
    #[test_case(1, QuorumType::Llmq400_85, false; "one excludes 400_85")]
    #[test_case(1, QuorumType::Llmq100_67, false; "one excludes 100_67")]
    #[test_case(1, QuorumType::Llmq60_75, true; "one enables 60_75")]
    #[test_case(SPORK_DISABLED, QuorumType::Test, false; "disabled")]
    fn test_sporks(value: i64, quorum_type: QuorumType, expected: bool) {
        let sporks = Sporks {
            quorum_all_connected: value,
            quorum_pose: value,
        };
        assert_eq!(sporks.is_all_members_connected_enabled(quorum_type), expected);
        assert_eq!(sporks.is_pose_enabled(quorum_type), expected);
    }

    #[test]
    fn test_default_sporks_disabled() {
        let sporks = Sporks::default();
        for quorum_type in QuorumType::ALL {
            assert!(!sporks.is_all_members_connected_enabled(quorum_type));
            assert!(!sporks.is_pose_enabled(quorum_type));
        }
    }

    #[test]
    fn test_legacy_instant_send_retires() {
        let consensus = Consensus::regtest();
        let mut tip = ChainTip {
            height: 100,
            ..Default::default()
        };
        assert!(is_quorum_type_enabled(&consensus, QuorumType::TestInstantSend, &tip));
        assert!(!is_quorum_type_enabled(&consensus, QuorumType::TestDip0024, &tip));

        // Rotation active but no rotating quorum yet
        tip.height = 1_000;
        assert!(is_quorum_type_enabled(&consensus, QuorumType::TestInstantSend, &tip));
        assert!(is_quorum_type_enabled(&consensus, QuorumType::TestDip0024, &tip));

        // First rotating quorum retires the legacy type
        tip.have_dip0024_quorums = true;
        assert!(!is_quorum_type_enabled(&consensus, QuorumType::TestInstantSend, &tip));

        // Shared types never retire
        let testnet = Consensus::testnet();
        tip.height = testnet.dip0024_height + 10;
        assert!(is_quorum_type_enabled(&testnet, QuorumType::Llmq50_60, &tip));
    }

    #[test]
    fn test_height_gated_types() {
        let consensus = Consensus::testnet();
        let tip = |height| ChainTip {
            height,
            ..Default::default()
        };
        assert!(!is_quorum_type_enabled(&consensus, QuorumType::Llmq100_67, &tip(4_298)));
        assert!(is_quorum_type_enabled(&consensus, QuorumType::Llmq100_67, &tip(4_299)));
        assert!(!is_quorum_type_enabled(&consensus, QuorumType::Llmq25_67, &tip(846_999)));
        assert!(is_quorum_type_enabled(&consensus, QuorumType::Llmq25_67, &tip(847_000)));
    }

    #[test]
    fn test_version_bits_gated_type() {
        let consensus = Consensus::regtest();
        let mut tip = ChainTip::default();
        assert!(!is_quorum_type_enabled(&consensus, QuorumType::TestV17, &tip));
        tip.test_dummy_active = true;
        assert!(is_quorum_type_enabled(&consensus, QuorumType::TestV17, &tip));
    }

    #[test]
    fn test_enabled_quorum_types() {
        let consensus = Consensus::regtest();
        let tip = ChainTip {
            height: 10,
            ..Default::default()
        };
        assert_eq!(
            enabled_quorum_types(&consensus, &tip),
            vec![
                QuorumType::Test,
                QuorumType::TestInstantSend,
                QuorumType::TestPlatform
            ]
        );
    }

    #[test]
    fn test_rotation() {
        let consensus = Consensus::regtest();

        // Non-rotating types never rotate
        assert!(!is_quorum_rotation_enabled(&consensus, QuorumType::Test, 10_000));

        // Genesis cycle never rotates
        assert!(!is_quorum_rotation_enabled(&consensus, QuorumType::TestDip0024, 10));

        // Cycle base 888 is before activation, 912 is after
        assert!(!is_quorum_rotation_enabled(&consensus, QuorumType::TestDip0024, 900));
        assert!(is_quorum_rotation_enabled(&consensus, QuorumType::TestDip0024, 912));
        assert!(is_quorum_rotation_enabled(&consensus, QuorumType::TestDip0024, 935));
    }
}
