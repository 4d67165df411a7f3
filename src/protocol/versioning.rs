//! Protocol version compatibility.
//!
//! OGMs carry a one-byte compatibility version. Peers speaking a different
//! version are ignored; there is no negotiation.

use std::fmt;

/// Compatibility version this implementation speaks
pub const COMPAT_VERSION: u8 = 5;

/// Result of comparing a peer's version with ours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCompatibility {
    /// Same version
    Compatible,

    /// Anything else; the OGM must be dropped
    Incompatible {
        /// The peer's protocol version
        peer_version: u8,
    },
}

impl VersionCompatibility {
    /// Whether OGMs with this version may be processed.
    pub fn is_compatible(&self) -> bool {
        matches!(self, Self::Compatible)
    }
}

impl fmt::Display for VersionCompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compatible => write!(f, "Compatible (v{})", COMPAT_VERSION),
            Self::Incompatible { peer_version } => {
                write!(
                    f,
                    "Incompatible (peer v{}, expected v{})",
                    peer_version, COMPAT_VERSION
                )
            },
        }
    }
}

/// Check a received version byte against [`COMPAT_VERSION`].
pub fn check_version_compatibility(peer_version: u8) -> VersionCompatibility {
    if peer_version == COMPAT_VERSION {
        VersionCompatibility::Compatible
    } else {
        VersionCompatibility::Incompatible { peer_version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_version_compatible() {
        let result = check_version_compatibility(COMPAT_VERSION);
        assert_eq!(result, VersionCompatibility::Compatible);
        assert!(result.is_compatible());
    }

    #[test]
    fn test_other_versions_incompatible() {
        for version in [0, 4, 6, 255] {
            let result = check_version_compatibility(version);
            assert_eq!(
                result,
                VersionCompatibility::Incompatible {
                    peer_version: version
                }
            );
            assert!(!result.is_compatible());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            check_version_compatibility(4).to_string(),
            "Incompatible (peer v4, expected v5)"
        );
    }
}
