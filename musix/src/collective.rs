//! Consistency check of collective call sequences.
//!
//! Connection management is an SPMD collective: every process of every
//! application must issue the same `connect`/`disconnect` calls, with the same
//! arguments and in the same order. Nothing in the calls themselves can detect
//! a violation, which would silently desynchronize connection codes across the
//! run.
//!
//! A [`CollectiveTrace`] folds each collective call into a running digest. The
//! resulting [`CollectiveFingerprint`] can be exchanged between processes by
//! the embedding runtime (e.g. with an all-gather) and compared with
//! [`CollectiveFingerprint::check`].
//!
//! The digest is computed with XXH64 over a fixed little-endian encoding of
//! the call arguments, so it does not depend on the toolchain, the target or
//! the executable: applications of a coupled run are typically separate
//! programs.

use xxhash_rust::xxh64::Xxh64;

use crate::connectivity::{CommunicationType, ConnectivityError, ProcessingMethod};

/// Summary of the collective calls issued by a process.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CollectiveFingerprint {
    /// Number of collective calls.
    pub calls: u64,
    /// Digest of the call sequence.
    pub digest: u64,
}

impl CollectiveFingerprint {
    /// Checks that a peer issued the same collective calls.
    pub fn check(&self, peer: &CollectiveFingerprint) -> Result<(), ConnectivityError> {
        if self == peer {
            return Ok(());
        }

        Err(ConnectivityError::CollectiveMismatch {
            local_calls: self.calls,
            local_digest: self.digest,
            remote_calls: peer.calls,
            remote_digest: peer.digest,
        })
    }
}

/// An argument of a collective call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum CallArg<'a> {
    Str(&'a str),
    Int(u64),
}

impl<'a> From<&'a str> for CallArg<'a> {
    fn from(s: &'a str) -> Self {
        Self::Str(s)
    }
}

impl From<usize> for CallArg<'_> {
    fn from(n: usize) -> Self {
        // Lossless on all supported targets.
        Self::Int(n as u64)
    }
}

impl From<CommunicationType> for CallArg<'_> {
    fn from(comm_type: CommunicationType) -> Self {
        Self::Int(match comm_type {
            CommunicationType::Collective => 0,
            CommunicationType::PointToPoint => 1,
        })
    }
}

impl From<ProcessingMethod> for CallArg<'_> {
    fn from(proc_method: ProcessingMethod) -> Self {
        Self::Int(match proc_method {
            ProcessingMethod::Tree => 0,
            ProcessingMethod::Table => 1,
        })
    }
}

const STR_TAG: u8 = 0;
const INT_TAG: u8 = 1;

/// Running digest of collective calls.
#[derive(Clone, Debug, Default)]
pub(crate) struct CollectiveTrace {
    fingerprint: CollectiveFingerprint,
}

impl CollectiveTrace {
    /// Folds a call and its arguments into the digest.
    pub(crate) fn record(&mut self, call: &str, args: &[CallArg<'_>]) {
        let mut hasher = Xxh64::new(0);
        hasher.update(&self.fingerprint.digest.to_le_bytes());
        write_str(&mut hasher, call);
        hasher.update(&(args.len() as u64).to_le_bytes());
        for arg in args {
            match *arg {
                CallArg::Str(s) => {
                    hasher.update(&[STR_TAG]);
                    write_str(&mut hasher, s);
                }
                CallArg::Int(n) => {
                    hasher.update(&[INT_TAG]);
                    hasher.update(&n.to_le_bytes());
                }
            }
        }

        self.fingerprint.digest = hasher.digest();
        self.fingerprint.calls += 1;
    }

    /// Returns the current fingerprint.
    pub(crate) fn fingerprint(&self) -> CollectiveFingerprint {
        self.fingerprint
    }
}

/// Writes a length-prefixed string.
fn write_str(hasher: &mut Xxh64, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
