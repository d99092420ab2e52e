use std::{fmt, sync::LazyLock};

use regex::Regex;

use super::BackendError;

#[derive(thiserror::Error, Debug)]
pub enum RangeError {
    #[error("Invalid range")]
    InvalidRange { offset: u64, length: u64 },
    #[error("Range unsupported")]
    RangeUnsupported(String),
}

impl From<RangeError> for BackendError {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::InvalidRange { offset, length } => BackendError::InvalidRange { offset, length },
            RangeError::RangeUnsupported(header) => BackendError::RangeUnsupported(header),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeUnit {
    Bytes,
}

impl RangeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeUnit::Bytes => "bytes",
        }
    }
}

impl fmt::Display for RangeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range sent in a `Range` request header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeRequest {
    pub unit: RangeUnit,
    pub start: u64,
    pub end: u64,
}

impl RangeRequest {
    pub fn new(unit: RangeUnit, offset: u64, length: u64) -> Result<Self, RangeError> {
        // a zero length has no inclusive end
        let end = length
            .checked_sub(1)
            .and_then(|last| offset.checked_add(last))
            .ok_or(RangeError::InvalidRange { offset, length })?;
        Ok(RangeRequest {
            unit,
            start: offset,
            end,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for RangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}-{}", self.unit, self.start, self.end)
    }
}

static CONTENT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bytes ([0-9]+)-([0-9]+)/([0-9]+)$").expect("content range pattern")
});

/// Range confirmed by a `Content-Range` response header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentRange {
    pub unit: RangeUnit,
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    /// Parses `bytes <start>-<end>/<total>`. Any other shape, including `*` for an unknown
    /// total or an end before the start, is rejected.
    pub fn parse(header: &str) -> Result<Self, RangeError> {
        let unsupported = || RangeError::RangeUnsupported(header.to_string());
        let captures = CONTENT_RANGE.captures(header).ok_or_else(unsupported)?;
        let field = |i: usize| captures[i].parse::<u64>().map_err(|_| unsupported());
        let (start, end, total) = (field(1)?, field(2)?, field(3)?);
        if end < start {
            return Err(unsupported());
        }
        Ok(ContentRange {
            unit: RangeUnit::Bytes,
            start,
            end,
            total,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}
