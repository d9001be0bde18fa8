use crate::QuorumType;
use bytes::{Buf, BufMut, Bytes};
use llmq_codec::{
    field::{blob_size, read_blob, write_blob},
    Encode, EncodeSize, Error as CodecError, FixedSize, Read, Write,
};
use llmq_utils::{hash, Digest, Sha256};

/// Maximum length of an aggregated signature.
pub const MAX_SIGNATURE_LENGTH: usize = 96;

/// Computes the digest share holders actually sign for a session.
///
/// Binding the quorum type and quorum hash prevents a signature produced for one quorum (or one
/// application) from being replayed in another context.
pub fn sign_hash(
    quorum_type: QuorumType,
    quorum_hash: &Digest,
    id: &Digest,
    msg_hash: &Digest,
) -> Digest {
    Sha256::new()
        .update(&[quorum_type as u8])
        .update(quorum_hash)
        .update(id)
        .update(msg_hash)
        .finalize()
}

/// An aggregated threshold signature for one signing session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveredSignature {
    pub quorum_type: QuorumType,
    pub quorum_hash: Digest,

    /// Session identifier.
    pub id: Digest,
    pub msg_hash: Digest,
    pub signature: Bytes,
}

impl RecoveredSignature {
    /// Returns the content hash (the digest of the full encoding) used for inventory and
    /// duplicate detection.
    pub fn hash(&self) -> Digest {
        hash(&self.encode())
    }

    /// Returns the digest the signature is expected to verify against.
    pub fn sign_hash(&self) -> Digest {
        sign_hash(self.quorum_type, &self.quorum_hash, &self.id, &self.msg_hash)
    }
}

impl Write for RecoveredSignature {
    fn write(&self, buf: &mut impl BufMut) {
        self.quorum_type.write(buf);
        self.quorum_hash.write(buf);
        self.id.write(buf);
        self.msg_hash.write(buf);
        write_blob(&self.signature, buf);
    }
}

impl Read for RecoveredSignature {
    fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        let quorum_type = QuorumType::read(buf)?;
        let quorum_hash = Digest::read(buf)?;
        let id = Digest::read(buf)?;
        let msg_hash = Digest::read(buf)?;
        let signature = read_blob(buf, MAX_SIGNATURE_LENGTH)?;
        Ok(Self {
            quorum_type,
            quorum_hash,
            id,
            msg_hash,
            signature,
        })
    }
}

impl EncodeSize for RecoveredSignature {
    fn encode_size(&self) -> usize {
        QuorumType::SIZE + 3 * Digest::SIZE + blob_size(self.signature.len())
    }
}

/// A provisional single-message commitment for a session, recorded before a recovered
/// signature exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Vote {
    pub quorum_type: QuorumType,
    pub id: Digest,
    pub msg_hash: Digest,
}

impl Write for Vote {
    fn write(&self, buf: &mut impl BufMut) {
        self.quorum_type.write(buf);
        self.id.write(buf);
        self.msg_hash.write(buf);
    }
}

impl Read for Vote {
    fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        Ok(Self {
            quorum_type: QuorumType::read(buf)?,
            id: Digest::read(buf)?,
            msg_hash: Digest::read(buf)?,
        })
    }
}

impl FixedSize for Vote {
    const SIZE: usize = QuorumType::SIZE + 2 * Digest::SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmq_codec::Decode;

    fn signature() -> RecoveredSignature {
        RecoveredSignature {
            quorum_type: QuorumType::Test,
            quorum_hash: hash(b"quorum"),
            id: hash(b"id"),
            msg_hash: hash(b"msg"),
            signature: Bytes::from(vec![7; MAX_SIGNATURE_LENGTH]),
        }
    }

    #[test]
    fn test_sign_hash_binds_every_input() {
        let sig = signature();
        let base = sig.sign_hash();
        assert_eq!(
            base,
            sign_hash(sig.quorum_type, &sig.quorum_hash, &sig.id, &sig.msg_hash)
        );

        // Changing any input changes the digest
        assert_ne!(
            base,
            sign_hash(QuorumType::TestV17, &sig.quorum_hash, &sig.id, &sig.msg_hash)
        );
        assert_ne!(
            base,
            sign_hash(sig.quorum_type, &hash(b"other"), &sig.id, &sig.msg_hash)
        );
        assert_ne!(
            base,
            sign_hash(sig.quorum_type, &sig.quorum_hash, &hash(b"other"), &sig.msg_hash)
        );
        assert_ne!(
            base,
            sign_hash(sig.quorum_type, &sig.quorum_hash, &sig.id, &hash(b"other"))
        );
    }

    #[test]
    fn test_content_hash_covers_signature() {
        let sig = signature();
        let mut other = sig.clone();
        other.signature = Bytes::from_static(&[1, 2, 3]);
        assert_eq!(sig.sign_hash(), other.sign_hash());
        assert_ne!(sig.hash(), other.hash());
    }

    #[test]
    fn test_codec() {
        let sig = signature();
        let encoded = sig.encode();
        assert_eq!(encoded.len(), 1 + 32 * 3 + 2 + MAX_SIGNATURE_LENGTH);
        assert_eq!(RecoveredSignature::decode(encoded).unwrap(), sig);

        let vote = Vote {
            quorum_type: sig.quorum_type,
            id: sig.id,
            msg_hash: sig.msg_hash,
        };
        assert_eq!(Vote::decode(vote.encode()).unwrap(), vote);
    }

    #[test]
    fn test_oversized_signature_rejected() {
        let mut sig = signature();
        sig.signature = Bytes::from(vec![0; MAX_SIGNATURE_LENGTH + 1]);
        assert!(matches!(
            RecoveredSignature::decode(sig.encode()),
            Err(CodecError::InvalidLength(97))
        ));
    }
}
