//! Repository case, link and test run domain models used by forecasting.

use serde::{Deserialize, Serialize};

/// Link type that groups a manual and an automated version of the same test.
pub const SAME_TEST_DIFFERENT_SOURCE: &str = "SAME_TEST_DIFFERENT_SOURCE";

/// Status system name of a test run case that has not been executed yet.
pub const UNTESTED_STATUS: &str = "untested";

/// Where a repository case was authored or imported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseSource {
    /// Written by hand; durations come from manual test run results.
    Manual,
    Junit,
    Testng,
    Xunit,
    Nunit,
    Mstest,
    Mocha,
    Cucumber,
    Api,
}

impl CaseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::Junit => "JUNIT",
            Self::Testng => "TESTNG",
            Self::Xunit => "XUNIT",
            Self::Nunit => "NUNIT",
            Self::Mstest => "MSTEST",
            Self::Mocha => "MOCHA",
            Self::Cucumber => "CUCUMBER",
            Self::Api => "API",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MANUAL" => Some(Self::Manual),
            "JUNIT" => Some(Self::Junit),
            "TESTNG" => Some(Self::Testng),
            "XUNIT" => Some(Self::Xunit),
            "NUNIT" => Some(Self::Nunit),
            "MSTEST" => Some(Self::Mstest),
            "MOCHA" => Some(Self::Mocha),
            "CUCUMBER" => Some(Self::Cucumber),
            "API" => Some(Self::Api),
            _ => None,
        }
    }
}

impl std::fmt::Display for CaseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a test run case still counts towards the run's remaining work.
pub fn is_untested(status: Option<&str>) -> bool {
    match status {
        None => true,
        Some(s) => s.eq_ignore_ascii_case(UNTESTED_STATUS),
    }
}

/// Manual and automated forecast values, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPair {
    pub manual: Option<i32>,
    pub automated: Option<f64>,
}

impl ForecastPair {
    pub fn new(manual: Option<i32>, automated: Option<f64>) -> Self {
        Self { manual, automated }
    }

    pub fn is_empty(&self) -> bool {
        self.manual.is_none() && self.automated.is_none()
    }
}

/// A repository case as seen by the forecast service.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRecord {
    pub id: i32,
    /// Raw source column; unknown values are ignored when sampling
    pub source: String,
    pub forecast: ForecastPair,
}

impl CaseRecord {
    pub fn source(&self) -> Option<CaseSource> {
        CaseSource::parse(&self.source)
    }
}

/// A non-deleted SAME_TEST_DIFFERENT_SOURCE edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaseLinkEdge {
    pub case_a_id: i32,
    pub case_b_id: i32,
}

impl CaseLinkEdge {
    /// The other end of the edge, if `case_id` is one of its ends.
    pub fn other(&self, case_id: i32) -> Option<i32> {
        if self.case_a_id == case_id {
            Some(self.case_b_id)
        } else if self.case_b_id == case_id {
            Some(self.case_a_id)
        } else {
            None
        }
    }
}

/// A test run case together with the current forecast of its repository case.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCaseForecast {
    pub repository_case_id: i32,
    pub status: Option<String>,
    pub forecast: ForecastPair,
}

impl RunCaseForecast {
    pub fn is_untested(&self) -> bool {
        is_untested(self.status.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_parsing() {
        assert_eq!(CaseSource::parse("MANUAL"), Some(CaseSource::Manual));
        assert_eq!(CaseSource::parse("JUNIT"), Some(CaseSource::Junit));
        assert_eq!(CaseSource::parse("junit"), None);
        assert_eq!(CaseSource::parse("CUCUMBER"), Some(CaseSource::Cucumber));
    }

    #[test]
    fn test_untested_status() {
        assert!(is_untested(None));
        assert!(is_untested(Some("untested")));
        assert!(is_untested(Some("UNTESTED")));
        assert!(!is_untested(Some("passed")));
    }

    #[test]
    fn test_link_edge_other() {
        let edge = CaseLinkEdge {
            case_a_id: 1,
            case_b_id: 2,
        };
        assert_eq!(edge.other(1), Some(2));
        assert_eq!(edge.other(2), Some(1));
        assert_eq!(edge.other(3), None);
    }
}
