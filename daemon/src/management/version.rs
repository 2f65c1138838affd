use anyhow::{anyhow, bail};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Dotted release number such as `1.11` or `1.11.2`, as published by mod release listings.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    major: u16,
    minor: u16,
    patch: Option<u16>,
}

impl Version {
    pub fn new(major: u16, minor: u16, patch: Option<u16>) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref RELEASE_RE: Regex = Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?$").unwrap();
        }
        let Some(caps) = RELEASE_RE.captures(value.trim()) else {
            bail!("Invalid version: '{}'", value)
        };

        let component = |index: usize| {
            caps.get(index)
                .map(|m| {
                    m.as_str()
                        .parse::<u16>()
                        .map_err(|_| anyhow!("Invalid version component: '{}'", m.as_str()))
                })
                .transpose()
        };
        Ok(Self {
            major: component(1)?.unwrap_or_default(),
            minor: component(2)?.unwrap_or_default(),
            patch: component(3)?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(patch) = self.patch {
            write!(f, ".{}", patch)?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.unwrap_or(0).cmp(&other.patch.unwrap_or(0)))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_compares_numerically() {
        let old: Version = "1.9".parse().unwrap();
        let new: Version = "1.10".parse().unwrap();
        assert!(old < new);
        assert_eq!(Version::new(1, 10, None), Version::new(1, 10, Some(0)));
    }

    #[test]
    fn display_keeps_original_shape() {
        assert_eq!("1.11".parse::<Version>().unwrap().to_string(), "1.11");
        assert_eq!("1.11.2".parse::<Version>().unwrap().to_string(), "1.11.2");
    }

    #[test]
    fn rejects_garbage() {
        assert!("latest".parse::<Version>().is_err());
        assert!("1".parse::<Version>().is_err());
    }
}
