//! Self-evolution: inefficiency detection, mutation lifecycle and
//! cross-session pattern aggregation

pub mod analyzer;
pub mod mutation;
pub mod patterns;

pub use analyzer::{
    analyze_observations, Inefficiency, InefficiencyAnalyzer, InefficiencyType, MutationStrategy,
    PerformanceMetrics, RuntimeAnalysis,
};
pub use mutation::{CheckpointReport, EvolutionReport, MutationConfig, MutationLifecycleManager, MutationOutcome};
pub use patterns::{AgentRuleProposal, PatternAggregator, PatternReport, SkillSuggestion, WorkflowPattern};
