use thiserror::Error;

/// Malformed policy data. Only ever raised while loading policies or building a plan.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unrecognized payroll rule '{0}'")]
    UnknownRule(String),
    #[error("payroll rule '{rule}' requires a parameter")]
    MissingParameter { rule: &'static str },
    #[error("payroll parameter {0} must be finite and > 0")]
    InvalidParameter(f64),
    #[error("threshold {parameter} for {policy} is missing from the shared threshold basis")]
    MissingThreshold { policy: String, parameter: f64 },
    #[error("table has {bounds} bounds but {rates} rates")]
    TableLengthMismatch { bounds: usize, rates: usize },
    #[error("progressive table has no brackets")]
    EmptyTable,
    #[error("first bracket lower bound must be 0, got {0}")]
    FirstBoundNotZero(f64),
    #[error("bracket bounds must be finite and strictly increasing (at index {0})")]
    BoundsNotIncreasing(usize),
    #[error("rate {0} must be finite and within [0, 1]")]
    InvalidRate(f64),
    #[error("jurisdiction {0} is configured more than once")]
    DuplicateJurisdiction(String),
    #[error("no result field carries {kind} on the {side} side")]
    UnassignablePayroll { kind: String, side: String },
    #[error("result field {0} is fed by more than one payroll policy")]
    DuplicatePayrollField(&'static str),
    #[error("result field {0} has no payroll policy")]
    UnmappedPayrollField(&'static str),
    #[error("threshold basis entry {value} at index {index} must be finite, > 0 and above its predecessor")]
    InvalidThresholdBasis { index: usize, value: f64 },
    #[error("ledger bucket '{name}' has invalid rate {rate}")]
    InvalidLedgerRate { name: String, rate: f64 },
    #[error("malformed policy file: {0}")]
    Malformed(String),
}

/// Caller supplied buffers or records that disagree with the batch. Raised before any work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractError {
    #[error("{what}: expected length {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{what}: expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("record {index} has invalid income {income}")]
    InvalidIncome { index: usize, income: f64 },
    #[error("result {index} has no ledger array sized to {buckets} buckets")]
    MissingLedger { index: usize, buckets: usize },
    #[error("ledger output requested={requested} disagrees with the allocated buffers")]
    LedgerMismatch { requested: bool },
    #[error("block width must be >= 1")]
    InvalidBlockWidth,
    #[error("result {index} is for record {accelerated}, reference is for record {reference}")]
    RecordMismatch {
        index: usize,
        accelerated: u64,
        reference: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("contract violation: {0}")]
    Contract(#[from] ContractError),
}

pub(crate) fn expect_len(
    what: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), ContractError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ContractError::LengthMismatch {
            what,
            expected,
            actual,
        })
    }
}

pub(crate) fn expect_shape(
    what: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> Result<(), ContractError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ContractError::ShapeMismatch {
            what,
            expected,
            actual,
        })
    }
}
