//! The three fixed upstream tourism-data sources
//!
//! Everything source-specific the pipeline needs (base URL, endpoint path,
//! query extras, envelope shape, destination table, key fields) hangs off
//! [`SourceKind`] with exhaustive matches, so adding or misspelling a source
//! is a compile error rather than a runtime lookup miss.

use serde::{Deserialize, Serialize};

/// One of the three fixed upstream tourism-data providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Ecotourism area listings (nested envelope)
    Greentour,
    /// Barrier-free travel listings (nested envelope)
    BarrierFree,
    /// Hub tourist attraction statistics (flat envelope)
    BaseTour,
}

impl SourceKind {
    /// All sources in the order a run processes them.
    pub const ALL: [SourceKind; 3] =
        [SourceKind::Greentour, SourceKind::BarrierFree, SourceKind::BaseTour];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greentour => "greentour",
            Self::BarrierFree => "barrier_free",
            Self::BaseTour => "base_tour",
        }
    }

    /// Upstream service base URL.
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Greentour => "https://apis.data.go.kr/B551011/GreenTourService1",
            Self::BarrierFree => "https://apis.data.go.kr/B551011/KorWithService2",
            Self::BaseTour => "https://apis.data.go.kr/B551011/LocgoHubTarService1",
        }
    }

    /// Endpoint path for the area-based listing of this source.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            Self::Greentour => "/areaBasedList1",
            Self::BarrierFree => "/areaBasedList2",
            Self::BaseTour => "/areaBasedList1",
        }
    }

    /// `MobileApp` identity sent with every request.
    pub fn app_name(&self) -> &'static str {
        match self {
            Self::Greentour => "MyEcotourApp",
            Self::BarrierFree => "BarrierFreeApp",
            Self::BaseTour => "MyBaseTourApp",
        }
    }

    /// Source-specific query parameters appended to the shared set.
    pub fn extra_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Greentour => &[],
            Self::BarrierFree => &[("arrange", "C"), ("areaCode", "35")],
            Self::BaseTour => &[("baseYm", "202506"), ("areaCd", "47")],
        }
    }

    /// Destination table for normalized rows.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Greentour => "greentour_areabased",
            Self::BarrierFree => "barrier_free_areabased",
            Self::BaseTour => "base_tour_areabased",
        }
    }

    /// Field(s) whose concatenation uniquely identifies a record within the
    /// destination table.
    pub fn key_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Greentour | Self::BarrierFree => &["contentid"],
            Self::BaseTour => &["hubtatscode", "baseym"],
        }
    }

    /// Whether envelope validation is strict for this source.
    ///
    /// BaseTour has been observed with several envelope shapes, so its
    /// validation only logs; the other two fail on a bad envelope or a
    /// non-success result code.
    pub fn strict_envelope(&self) -> bool {
        !matches!(self, Self::BaseTour)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "greentour" => Ok(Self::Greentour),
            "barrier_free" => Ok(Self::BarrierFree),
            "base_tour" => Ok(Self::BaseTour),
            other => Err(anyhow::anyhow!("Unknown source: {}", other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_as_str_round_trips_through_from_str() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_key_fields_per_source() {
        assert_eq!(SourceKind::Greentour.key_fields(), &["contentid"]);
        assert_eq!(SourceKind::BarrierFree.key_fields(), &["contentid"]);
        assert_eq!(SourceKind::BaseTour.key_fields(), &["hubtatscode", "baseym"]);
    }

    #[test]
    fn test_only_base_tour_tolerates_loose_envelopes() {
        assert!(SourceKind::Greentour.strict_envelope());
        assert!(SourceKind::BarrierFree.strict_envelope());
        assert!(!SourceKind::BaseTour.strict_envelope());
    }

    #[test]
    fn test_table_names_are_distinct() {
        let mut names: Vec<_> = SourceKind::ALL.iter().map(|k| k.table_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
    }
}
