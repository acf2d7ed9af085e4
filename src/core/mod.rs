mod engine;
mod error;
mod features;
mod packer;
mod plan;
mod policy;
pub mod population;
mod reference;
mod types;
mod verify;

pub use engine::{
    AcceleratedCalculator, BatchBuffers, BatchOutputs, DEFAULT_BLOCK_WIDTH, ExecutionConfig,
    JurisdictionGroups, execute_blocks, post_ledger,
};
pub use error::{ConfigError, ContractError, EngineError};
pub use features::{build_features, fill_features};
pub use packer::{check_destination, pack_into, pack_results};
pub use plan::{
    FEDERAL_COLUMN, ManifestEntry, PayrollManifest, Plan, PlanSummary, PolicyLayout,
    SharedThresholds, build_transform,
};
pub use policy::PolicySet;
pub use reference::{ReferenceCalculator, payroll_amount, progressive_tax};
pub use types::{
    Jurisdiction, LedgerBucket, PayrollField, PayrollPolicy, PayrollRule, ProgressiveTable,
    Record, Side, TaxKind, TaxResult,
};
pub use verify::{DriftReport, DriftSite, compare};
