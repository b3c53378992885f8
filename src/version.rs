// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Disk format version of segment files
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Version {
    /// Flat index of record offsets, 8-byte integers
    V0,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u64::from(*self))
    }
}

impl From<Version> for u64 {
    fn from(value: Version) -> Self {
        match value {
            Version::V0 => 0,
        }
    }
}

impl TryFrom<u64> for Version {
    type Error = crate::Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::V0),
            _ => Err(crate::Error::InvalidVersion(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn version_round_trip() -> crate::Result<()> {
        let raw = u64::from(Version::V0);
        assert_eq!(Version::V0, Version::try_from(raw)?);
        Ok(())
    }

    #[test]
    fn version_unknown() {
        assert!(matches!(
            Version::try_from(7),
            Err(crate::Error::InvalidVersion(7))
        ));
    }
}
