use std::{cmp::Ordering, fmt::Display, num::ParseIntError, str::FromStr};

use snafu::{ResultExt, Snafu, ensure};

/// The number of dot-separated components of a [`RwVersion`].
pub const COMPONENT_COUNT: usize = 5;

/// Error variants which can be encountered when creating a new [`RwVersion`]
/// from unparsed input.
#[derive(Debug, PartialEq, Snafu)]
pub enum ParseVersionError {
    #[snafu(display("expected {COMPONENT_COUNT} dot-separated components, found {count}"))]
    InvalidComponentCount { count: usize },

    #[snafu(display("failed to parse version component {index}"))]
    ParseComponent { source: ParseIntError, index: usize },
}

/// A RIFT.ware release version, following the
/// `<MAJOR>.<MINOR>.<PATCH>.<BUILD>.<REVISION>` format.
///
/// Versions are ordered componentwise from left to right.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct RwVersion([u64; COMPONENT_COUNT]);

impl FromStr for RwVersion {
    type Err = ParseVersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = input.split('.').collect();
        ensure!(
            parts.len() == COMPONENT_COUNT,
            InvalidComponentCountSnafu { count: parts.len() }
        );

        let mut components = [0; COMPONENT_COUNT];
        for (index, (component, part)) in components.iter_mut().zip(parts).enumerate() {
            *component = part.parse().context(ParseComponentSnafu { index })?;
        }

        Ok(Self(components))
    }
}

impl PartialOrd for RwVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RwVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(lhs, rhs)| lhs.cmp(rhs))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl Display for RwVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [major, minor, patch, build, revision] = self.0;
        write!(f, "{major}.{minor}.{patch}.{build}.{revision}")
    }
}

impl RwVersion {
    pub fn new(major: u64, minor: u64, patch: u64, build: u64, revision: u64) -> Self {
        Self([major, minor, patch, build, revision])
    }

    pub fn components(&self) -> [u64; COMPONENT_COUNT] {
        self.0
    }
}

/// Compares two raw version strings.
///
/// Returns [`Ordering::Equal`] if either side is not a valid [`RwVersion`],
/// which callers treat as "nothing to migrate".
pub fn compare_lenient(previous: &str, new: &str) -> Ordering {
    match (previous.parse::<RwVersion>(), new.parse::<RwVersion>()) {
        (Ok(previous), Ok(new)) => previous.cmp(&new),
        (previous_result, new_result) => {
            tracing::debug!(
                previous,
                new,
                previous_valid = previous_result.is_ok(),
                new_valid = new_result.is_ok(),
                "version is not a five-component version, treating versions as equal"
            );
            Ordering::Equal
        }
    }
}
