pub mod analyzer;

pub use analyzer::{
    is_close_competitor, AnalysisConfig, AnalysisResult, CompetitorEntry, InfluenceAnalyzer,
    LowInfluenceEntry,
};
