use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest tube name accepted, in bytes.
pub const MAX_TUBE_NAME_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TubeNameError {
    #[error("tube name is empty")]
    Empty,

    #[error("tube name is longer than {} bytes", MAX_TUBE_NAME_LEN)]
    TooLong,

    #[error("tube name {0:?} must not start with '-'")]
    LeadingHyphen(String),

    #[error("tube name {name:?} contains invalid character {ch:?}")]
    InvalidChar { name: String, ch: char },
}

/// Name of a tube.
///
/// Same alphabet as beanstalkd: ASCII letters, digits and `-+/;.$_()`,
/// never starting with a hyphen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TubeName(String);

impl TubeName {
    pub fn new(s: impl Into<String>) -> Result<Self, TubeNameError> {
        let s = s.into();
        if s.is_empty() {
            return Err(TubeNameError::Empty);
        }
        if s.len() > MAX_TUBE_NAME_LEN {
            return Err(TubeNameError::TooLong);
        }
        if s.starts_with('-') {
            return Err(TubeNameError::LeadingHyphen(s));
        }
        if let Some(ch) = s.chars().find(|c| !is_name_char(*c)) {
            return Err(TubeNameError::InvalidChar { name: s, ch });
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-+/;.$_()".contains(c)
}

impl TryFrom<String> for TubeName {
    type Error = TubeNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TubeName {
    type Error = TubeNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TubeName> for String {
    fn from(value: TubeName) -> Self {
        value.0
    }
}

impl fmt::Display for TubeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
