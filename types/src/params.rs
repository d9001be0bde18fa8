//! Quorum types and their immutable parameter table.

use crate::Error;
use bytes::{Buf, BufMut};
use llmq_codec::{Error as CodecError, FixedSize, Read, Write};
use std::fmt::{Display, Formatter};

/// A named quorum parameter set.
///
/// The discriminant is the on-wire identifier. Unknown identifiers are rejected with
/// [Error::UnknownQuorumType] and never mapped to a default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum QuorumType {
    Llmq50_60 = 1,
    Llmq400_60 = 2,
    Llmq400_85 = 3,
    Llmq100_67 = 4,
    Llmq60_75 = 5,
    Llmq25_67 = 6,
    Test = 100,
    Devnet = 101,
    TestV17 = 102,
    TestDip0024 = 103,
    TestInstantSend = 104,
    DevnetDip0024 = 105,
    TestPlatform = 106,
    DevnetPlatform = 107,
}

/// Parameters shared by every quorum of one [QuorumType].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Params {
    pub name: &'static str,

    /// Number of members selected for each quorum.
    pub size: usize,

    /// Minimum number of valid members for a quorum to be considered complete.
    pub min_size: usize,

    /// Number of shares required to recover a signature.
    pub threshold: usize,

    /// Number of blocks between two quorums (or two rotation cycles).
    pub dkg_interval: u64,

    /// Whether quorums of this type rotate members across several indexed quorums per cycle.
    pub use_rotation: bool,

    /// Number of most recent quorums eligible to sign new requests.
    pub signing_active_quorum_count: usize,

    /// Number of most recent quorums whose signatures (and connections) are still accepted.
    ///
    /// This is at least one more than `signing_active_quorum_count` so that signatures
    /// produced right before a new quorum is mined are not dropped.
    pub keep_old_connections: usize,

    /// Number of members asked for quorum data during data recovery.
    pub recovery_members: usize,
}

impl QuorumType {
    /// Every known quorum type.
    pub const ALL: [QuorumType; 14] = [
        QuorumType::Llmq50_60,
        QuorumType::Llmq400_60,
        QuorumType::Llmq400_85,
        QuorumType::Llmq100_67,
        QuorumType::Llmq60_75,
        QuorumType::Llmq25_67,
        QuorumType::Test,
        QuorumType::Devnet,
        QuorumType::TestV17,
        QuorumType::TestDip0024,
        QuorumType::TestInstantSend,
        QuorumType::DevnetDip0024,
        QuorumType::TestPlatform,
        QuorumType::DevnetPlatform,
    ];

    /// Returns the immutable parameters of this quorum type.
    pub const fn params(&self) -> &'static Params {
        match self {
            QuorumType::Llmq50_60 => &LLMQ_50_60,
            QuorumType::Llmq400_60 => &LLMQ_400_60,
            QuorumType::Llmq400_85 => &LLMQ_400_85,
            QuorumType::Llmq100_67 => &LLMQ_100_67,
            QuorumType::Llmq60_75 => &LLMQ_60_75,
            QuorumType::Llmq25_67 => &LLMQ_25_67,
            QuorumType::Test => &LLMQ_TEST,
            QuorumType::Devnet => &LLMQ_DEVNET,
            QuorumType::TestV17 => &LLMQ_TEST_V17,
            QuorumType::TestDip0024 => &LLMQ_TEST_DIP0024,
            QuorumType::TestInstantSend => &LLMQ_TEST_INSTANTSEND,
            QuorumType::DevnetDip0024 => &LLMQ_DEVNET_DIP0024,
            QuorumType::TestPlatform => &LLMQ_TEST_PLATFORM,
            QuorumType::DevnetPlatform => &LLMQ_DEVNET_PLATFORM,
        }
    }
}

impl TryFrom<u8> for QuorumType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        QuorumType::ALL
            .into_iter()
            .find(|t| *t as u8 == value)
            .ok_or(Error::UnknownQuorumType(value))
    }
}

impl From<QuorumType> for u8 {
    fn from(value: QuorumType) -> Self {
        value as u8
    }
}

impl Display for QuorumType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.params().name)
    }
}

impl Write for QuorumType {
    fn write(&self, buf: &mut impl BufMut) {
        (*self as u8).write(buf);
    }
}

impl Read for QuorumType {
    fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        let raw = u8::read(buf)?;
        QuorumType::try_from(raw).map_err(|_| CodecError::UnknownTag("QuorumType", raw))
    }
}

impl FixedSize for QuorumType {
    const SIZE: usize = u8::SIZE;
}

const LLMQ_50_60: Params = Params {
    name: "llmq_50_60",
    size: 50,
    min_size: 40,
    threshold: 30,
    dkg_interval: 24,
    use_rotation: false,
    signing_active_quorum_count: 24,
    keep_old_connections: 25,
    recovery_members: 25,
};

const LLMQ_400_60: Params = Params {
    name: "llmq_400_60",
    size: 400,
    min_size: 300,
    threshold: 240,
    dkg_interval: 24 * 12,
    use_rotation: false,
    signing_active_quorum_count: 4,
    keep_old_connections: 5,
    recovery_members: 100,
};

const LLMQ_400_85: Params = Params {
    name: "llmq_400_85",
    size: 400,
    min_size: 350,
    threshold: 340,
    dkg_interval: 24 * 24,
    use_rotation: false,
    signing_active_quorum_count: 4,
    keep_old_connections: 5,
    recovery_members: 100,
};

const LLMQ_100_67: Params = Params {
    name: "llmq_100_67",
    size: 100,
    min_size: 80,
    threshold: 67,
    dkg_interval: 24,
    use_rotation: false,
    signing_active_quorum_count: 24,
    keep_old_connections: 25,
    recovery_members: 50,
};

const LLMQ_60_75: Params = Params {
    name: "llmq_60_75",
    size: 60,
    min_size: 50,
    threshold: 45,
    dkg_interval: 24 * 12,
    use_rotation: true,
    signing_active_quorum_count: 32,
    keep_old_connections: 64,
    recovery_members: 25,
};

const LLMQ_25_67: Params = Params {
    name: "llmq_25_67",
    size: 25,
    min_size: 22,
    threshold: 17,
    dkg_interval: 24,
    use_rotation: false,
    signing_active_quorum_count: 24,
    keep_old_connections: 25,
    recovery_members: 12,
};

const LLMQ_TEST: Params = Params {
    name: "llmq_test",
    size: 3,
    min_size: 2,
    threshold: 2,
    dkg_interval: 24,
    use_rotation: false,
    signing_active_quorum_count: 2,
    keep_old_connections: 3,
    recovery_members: 3,
};

const LLMQ_DEVNET: Params = Params {
    name: "llmq_devnet",
    size: 12,
    min_size: 7,
    threshold: 6,
    dkg_interval: 24,
    use_rotation: false,
    signing_active_quorum_count: 4,
    keep_old_connections: 5,
    recovery_members: 6,
};

const LLMQ_TEST_V17: Params = Params {
    name: "llmq_test_v17",
    size: 3,
    min_size: 2,
    threshold: 2,
    dkg_interval: 24,
    use_rotation: false,
    signing_active_quorum_count: 2,
    keep_old_connections: 3,
    recovery_members: 3,
};

const LLMQ_TEST_DIP0024: Params = Params {
    name: "llmq_test_dip0024",
    size: 4,
    min_size: 4,
    threshold: 3,
    dkg_interval: 24,
    use_rotation: true,
    signing_active_quorum_count: 2,
    keep_old_connections: 3,
    recovery_members: 3,
};

const LLMQ_TEST_INSTANTSEND: Params = Params {
    name: "llmq_test_instantsend",
    size: 3,
    min_size: 2,
    threshold: 2,
    dkg_interval: 24,
    use_rotation: false,
    signing_active_quorum_count: 2,
    keep_old_connections: 3,
    recovery_members: 3,
};

const LLMQ_DEVNET_DIP0024: Params = Params {
    name: "llmq_devnet_dip0024",
    size: 8,
    min_size: 6,
    threshold: 4,
    dkg_interval: 48,
    use_rotation: true,
    signing_active_quorum_count: 2,
    keep_old_connections: 4,
    recovery_members: 4,
};

const LLMQ_TEST_PLATFORM: Params = Params {
    name: "llmq_test_platform",
    size: 3,
    min_size: 2,
    threshold: 2,
    dkg_interval: 24,
    use_rotation: false,
    signing_active_quorum_count: 2,
    keep_old_connections: 4,
    recovery_members: 3,
};

const LLMQ_DEVNET_PLATFORM: Params = Params {
    name: "llmq_devnet_platform",
    size: 12,
    min_size: 9,
    threshold: 8,
    dkg_interval: 24,
    use_rotation: false,
    signing_active_quorum_count: 4,
    keep_old_connections: 5,
    recovery_members: 6,
};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use llmq_codec::{Decode, Encode};
    use test_case::test_case;

    #[test_case(1, QuorumType::Llmq50_60; "llmq_50_60")]
    #[test_case(4, QuorumType::Llmq100_67; "llmq_100_67")]
    #[test_case(100, QuorumType::Test; "llmq_test")]
    #[test_case(107, QuorumType::DevnetPlatform; "llmq_devnet_platform")]
    fn test_known_ids(raw: u8, expected: QuorumType) {
        assert_eq!(QuorumType::try_from(raw).unwrap(), expected);
        assert_eq!(u8::from(expected), raw);
    }

    #[test_case(0; "none")]
    #[test_case(7; "gap")]
    #[test_case(255; "max")]
    fn test_unknown_ids(raw: u8) {
        assert_eq!(
            QuorumType::try_from(raw),
            Err(Error::UnknownQuorumType(raw))
        );
        assert!(matches!(
            QuorumType::decode(Bytes::from(vec![raw])),
            Err(CodecError::UnknownTag("QuorumType", r)) if r == raw
        ));
    }

    #[test]
    fn test_params_consistent() {
        for quorum_type in QuorumType::ALL {
            let params = quorum_type.params();
            assert!(params.threshold <= params.min_size, "{quorum_type}");
            assert!(params.min_size <= params.size, "{quorum_type}");
            assert!(
                params.keep_old_connections > params.signing_active_quorum_count,
                "{quorum_type}"
            );
            if params.use_rotation {
                assert!(params.signing_active_quorum_count.is_power_of_two());
            }
        }
    }

    #[test]
    fn test_codec() {
        let encoded = QuorumType::Llmq60_75.encode();
        assert_eq!(encoded.as_ref(), &[5]);
        assert_eq!(QuorumType::decode(encoded).unwrap(), QuorumType::Llmq60_75);
    }

    #[test]
    fn test_display() {
        assert_eq!(QuorumType::Llmq400_85.to_string(), "llmq_400_85");
    }
}
