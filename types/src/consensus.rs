//! Network-wide settings that decide which quorum type serves which feature.

use crate::QuorumType;

/// A known network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

/// Immutable consensus settings for one network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Consensus {
    pub network: Network,

    /// Quorum types mined on this network (in the order they are processed).
    pub llmqs: Vec<QuorumType>,

    pub llmq_type_chain_locks: QuorumType,
    pub llmq_type_instant_send: QuorumType,
    pub llmq_type_dip0024_instant_send: QuorumType,
    pub llmq_type_platform: QuorumType,
    pub llmq_type_mnhf: QuorumType,

    /// First height at which `Llmq100_67` quorums are enabled.
    pub dip0020_height: u64,

    /// First height at which rotating quorums are enabled.
    pub dip0024_height: u64,

    /// First height at which `Llmq25_67` quorums are enabled.
    pub llmq_25_67_height: u64,
}

impl Consensus {
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            llmqs: vec![
                QuorumType::Llmq50_60,
                QuorumType::Llmq60_75,
                QuorumType::Llmq400_60,
                QuorumType::Llmq400_85,
                QuorumType::Llmq100_67,
            ],
            llmq_type_chain_locks: QuorumType::Llmq400_60,
            llmq_type_instant_send: QuorumType::Llmq50_60,
            llmq_type_dip0024_instant_send: QuorumType::Llmq60_75,
            llmq_type_platform: QuorumType::Llmq100_67,
            llmq_type_mnhf: QuorumType::Llmq400_85,
            dip0020_height: 1_388_000,
            dip0024_height: 1_737_792,
            llmq_25_67_height: u64::MAX,
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            llmqs: vec![
                QuorumType::Llmq50_60,
                QuorumType::Llmq60_75,
                QuorumType::Llmq400_60,
                QuorumType::Llmq400_85,
                QuorumType::Llmq100_67,
                QuorumType::Llmq25_67,
            ],
            llmq_type_chain_locks: QuorumType::Llmq50_60,
            llmq_type_instant_send: QuorumType::Llmq50_60,
            llmq_type_dip0024_instant_send: QuorumType::Llmq60_75,
            llmq_type_platform: QuorumType::Llmq25_67,
            llmq_type_mnhf: QuorumType::Llmq50_60,
            dip0020_height: 4_300,
            dip0024_height: 769_700,
            llmq_25_67_height: 847_000,
        }
    }

    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            llmqs: vec![
                QuorumType::Test,
                QuorumType::TestInstantSend,
                QuorumType::TestV17,
                QuorumType::TestDip0024,
                QuorumType::TestPlatform,
            ],
            llmq_type_chain_locks: QuorumType::Test,
            llmq_type_instant_send: QuorumType::TestInstantSend,
            llmq_type_dip0024_instant_send: QuorumType::TestDip0024,
            llmq_type_platform: QuorumType::TestPlatform,
            llmq_type_mnhf: QuorumType::Test,
            dip0020_height: 300,
            dip0024_height: 900,
            llmq_25_67_height: u64::MAX,
        }
    }

    /// Returns whether the legacy instant-send quorum type doubles as the quorum type of
    /// another feature (and therefore must never be disabled).
    pub fn is_instant_send_type_shared(&self) -> bool {
        self.llmq_type_instant_send == self.llmq_type_chain_locks
            || self.llmq_type_instant_send == self.llmq_type_platform
            || self.llmq_type_instant_send == self.llmq_type_mnhf
    }

    /// Returns whether rotating quorums are active for the block following `height`.
    pub fn is_dip0024_active(&self, height: u64) -> bool {
        height + 1 >= self.dip0024_height
    }
}
