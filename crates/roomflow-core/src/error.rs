//! Error types for roomflow.

use thiserror::Error;

/// Result type alias for roomflow operations.
pub type Result<T> = std::result::Result<T, RoomflowError>;

/// Coarse failure category, matching what a coupling driver can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad case data or a second channel. Fatal at initialization.
    Configuration,
    /// An allocation could not be satisfied.
    Resource,
    /// A peer did not acknowledge within a bounded wait.
    Synchronization,
    /// Non-finite solver state (only when the finite guard is enabled).
    Numerical,
    /// The other side of the channel raised its error flag.
    Peer,
}

/// Errors raised by the solver, the coupling channel and the session API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoomflowError {
    // ===== Configuration =====
    /// Generic invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Thermal boundary kind outside the closed set.
    #[error("invalid thermal boundary kind {0} (expected 1 = fixed temperature, 2 = fixed heat flux)")]
    InvalidThermalKind(i64),

    /// Boundary region with bad extents or missing values.
    #[error("malformed boundary region '{name}': {reason}")]
    MalformedRegion {
        /// Region name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Rack name that does not follow `<name> <dir> <heat> <ratio>`.
    #[error("malformed rack name '{0}'")]
    MalformedRackName(String),

    /// A coupling channel is already live in this process.
    #[error("a coupling channel is already initialized in this process")]
    AlreadyInitialized,

    /// Exchange vector length disagrees with the channel layout.
    #[error("{what}: expected {expected} values, got {actual}")]
    LayoutMismatch {
        /// Which vector.
        what: &'static str,
        /// Length implied by the layout.
        expected: usize,
        /// Length supplied by the caller.
        actual: usize,
    },

    /// Case file could not be read.
    #[error("cannot read case file '{path}': {reason}")]
    CaseFile {
        /// Path as given.
        path: String,
        /// Underlying reason.
        reason: String,
    },

    // ===== Resource =====
    /// Allocation failed.
    #[error("failed to allocate {bytes} bytes for {what}")]
    AllocationFailed {
        /// Structure being allocated.
        what: &'static str,
        /// Requested size.
        bytes: usize,
    },

    // ===== Synchronization =====
    /// Peer did not acknowledge the stop command in time.
    #[error("could not stop in required time ({attempts} attempts)")]
    ShutdownTimeout {
        /// Number of polls performed.
        attempts: u32,
    },

    /// Channel was torn down while a side was still using it.
    #[error("coupling channel closed")]
    ChannelClosed,

    /// A flag transition broke the single-slot handshake.
    #[error("handshake violation: {0}")]
    HandshakeViolation(String),

    // ===== Peer =====
    /// The peer raised its error flag.
    #[error("peer reported error: {0}")]
    PeerFault(String),

    // ===== Numerical =====
    /// Non-finite value detected in a solver field.
    #[error("non-finite value in {field} after step {step}")]
    NonFinite {
        /// Field name.
        field: &'static str,
        /// Step counter when detected.
        step: u64,
    },

    /// Device execution failure.
    #[error("kernel {kernel} failed: {reason}")]
    KernelFailed {
        /// Operation name.
        kernel: &'static str,
        /// Reason.
        reason: String,
    },
}

impl RoomflowError {
    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a malformed region error.
    pub fn region(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRegion {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an allocation failure for `count` elements of `T`.
    pub fn allocation<T>(what: &'static str, count: usize) -> Self {
        Self::AllocationFailed {
            what,
            bytes: count.saturating_mul(std::mem::size_of::<T>()),
        }
    }

    /// Failure category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidConfig(_)
            | Self::InvalidThermalKind(_)
            | Self::MalformedRegion { .. }
            | Self::MalformedRackName(_)
            | Self::AlreadyInitialized
            | Self::LayoutMismatch { .. }
            | Self::CaseFile { .. } => ErrorCategory::Configuration,
            Self::AllocationFailed { .. } => ErrorCategory::Resource,
            Self::ShutdownTimeout { .. } | Self::ChannelClosed | Self::HandshakeViolation(_) => {
                ErrorCategory::Synchronization
            }
            Self::PeerFault(_) => ErrorCategory::Peer,
            Self::NonFinite { .. } | Self::KernelFailed { .. } => ErrorCategory::Numerical,
        }
    }

    /// Whether the error ends the enclosing coupling or solve call.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ShutdownTimeout { .. })
    }
}

/// Allocate a zero-filled vector, reporting failure instead of aborting.
pub fn try_zeroed<T: Clone + Default>(what: &'static str, len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| RoomflowError::allocation::<T>(what, len))?;
    v.resize(len, T::default());
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            RoomflowError::InvalidThermalKind(7).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            RoomflowError::allocation::<f64>("field store", 10).category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            RoomflowError::ShutdownTimeout { attempts: 3 }.category(),
            ErrorCategory::Synchronization
        );
        assert_eq!(
            RoomflowError::PeerFault("boom".into()).category(),
            ErrorCategory::Peer
        );
    }

    #[test]
    fn test_shutdown_timeout_is_reported_not_fatal() {
        let err = RoomflowError::ShutdownTimeout { attempts: 10000 };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("could not stop in required time"));
    }

    #[test]
    fn test_allocation_size() {
        match RoomflowError::allocation::<f64>("x", 4) {
            RoomflowError::AllocationFailed { bytes, .. } => assert_eq!(bytes, 32),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_try_zeroed() {
        let v: Vec<f64> = try_zeroed("test", 16).unwrap();
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|&x| x == 0.0));

        let huge = try_zeroed::<f64>("huge", usize::MAX / 2);
        assert!(matches!(huge, Err(RoomflowError::AllocationFailed { .. })));
    }
}
