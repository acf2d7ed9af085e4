//! Blocked execution of a compiled [`Plan`] over a batch of records.
//!
//! The transform is applied in column blocks of at most `block_width`
//! policies, so the only `N`-row scratch matrix is `N x block_width` no matter
//! how many jurisdictions and payroll policies the plan carries. Each block's
//! columns are scattered straight into the typed output arrays.

use std::ops::Range;

use ndarray::linalg::general_mat_mul;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, ShapeBuilder, s};
use serde::{Deserialize, Serialize};

use super::error::{ContractError, EngineError, expect_len, expect_shape};
use super::features::fill_features;
use super::packer::{check_destination, pack_into, pack_results};
use super::plan::{FEDERAL_COLUMN, Plan, PolicyLayout};
use super::types::{Jurisdiction, Record, TaxResult};

pub const DEFAULT_BLOCK_WIDTH: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Maximum number of transform columns multiplied at once.
    pub block_width: usize,
    pub include_ledger: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            block_width: DEFAULT_BLOCK_WIDTH,
            include_ledger: true,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.block_width == 0 {
            return Err(ContractError::InvalidBlockWidth);
        }
        Ok(())
    }

    fn effective_width(&self, layout: &PolicyLayout) -> usize {
        self.block_width.min(layout.total_columns())
    }
}

/// Record indices per jurisdiction, built once per batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JurisdictionGroups {
    groups: Vec<Vec<usize>>,
}

impl JurisdictionGroups {
    pub fn from_records(records: &[Record]) -> Self {
        let mut groups = vec![Vec::new(); Jurisdiction::ALL.len()];
        for (idx, record) in records.iter().enumerate() {
            groups[record.jurisdiction.index()].push(idx);
        }
        Self { groups }
    }

    pub fn indices(&self, jurisdiction: Jurisdiction) -> &[usize] {
        &self.groups[jurisdiction.index()]
    }

    /// Number of grouped records.
    pub fn len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(Vec::is_empty)
    }
}

/// Raw per-policy output arrays of one batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOutputs {
    pub federal: Array1<f64>,
    pub jurisdiction: Array1<f64>,
    /// One array per payroll policy, in plan order.
    pub payroll: Vec<Array1<f64>>,
    /// `[N] x [bucket_count]` postings, present only when the ledger is requested.
    pub ledger: Option<Array2<f64>>,
}

impl BatchOutputs {
    pub fn zeros(records: usize, plan: &Plan, include_ledger: bool) -> Self {
        Self {
            federal: Array1::zeros(records),
            jurisdiction: Array1::zeros(records),
            payroll: vec![Array1::zeros(records); plan.layout().payroll_count()],
            ledger: include_ledger.then(|| Array2::zeros((records, plan.ledger_rates().len()))),
        }
    }

    pub fn records(&self) -> usize {
        self.federal.len()
    }

    pub(crate) fn validate(&self, records: usize, plan: &Plan) -> Result<(), ContractError> {
        expect_len("federal output", records, self.federal.len())?;
        expect_len("jurisdiction output", records, self.jurisdiction.len())?;
        expect_len(
            "payroll output count",
            plan.layout().payroll_count(),
            self.payroll.len(),
        )?;
        for column in &self.payroll {
            expect_len("payroll output", records, column.len())?;
        }
        if let Some(ledger) = &self.ledger {
            expect_shape(
                "ledger output",
                (records, plan.ledger_rates().len()),
                ledger.dim(),
            )?;
        }
        Ok(())
    }
}

/// Every working buffer a batch needs. Reusable across batches of the same size;
/// each run overwrites all of it.
#[derive(Clone, Debug)]
pub struct BatchBuffers {
    features: Array2<f64>,
    scratch: Array2<f64>,
    outputs: BatchOutputs,
}

impl BatchBuffers {
    pub fn new(records: usize, plan: &Plan, config: &ExecutionConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let width = config.effective_width(plan.layout());
        Ok(Self {
            features: Array2::zeros((records, plan.feature_count())),
            // Column-major so every block column handed to the scatter step is contiguous.
            scratch: Array2::zeros((records, width).f()),
            outputs: BatchOutputs::zeros(records, plan, config.include_ledger),
        })
    }

    pub fn records(&self) -> usize {
        self.outputs.records()
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn outputs(&self) -> &BatchOutputs {
        &self.outputs
    }

    fn validate(
        &self,
        records: usize,
        plan: &Plan,
        config: &ExecutionConfig,
    ) -> Result<(), ContractError> {
        expect_shape(
            "feature matrix",
            (records, plan.feature_count()),
            self.features.dim(),
        )?;
        expect_shape(
            "block scratch",
            (records, config.effective_width(plan.layout())),
            self.scratch.dim(),
        )?;
        if self.outputs.ledger.is_some() != config.include_ledger {
            return Err(ContractError::LedgerMismatch {
                requested: config.include_ledger,
            });
        }
        self.outputs.validate(records, plan)
    }
}

/// Multiplies `features` by the plan transform block by block and scatters each
/// block into `outputs`. `scratch` must be `[N] x [min(block_width, policy_count)]`.
pub fn execute_blocks(
    plan: &Plan,
    features: &Array2<f64>,
    groups: &JurisdictionGroups,
    scratch: &mut Array2<f64>,
    outputs: &mut BatchOutputs,
) -> Result<(), EngineError> {
    let records = features.nrows();
    let layout = plan.layout();
    let total = layout.total_columns();
    let width = scratch.ncols();

    expect_shape(
        "feature matrix",
        (records, plan.feature_count()),
        features.dim(),
    )?;
    expect_len("block scratch rows", records, scratch.nrows())?;
    expect_len("jurisdiction groups", records, groups.len())?;
    if width == 0 {
        return Err(ContractError::InvalidBlockWidth.into());
    }
    outputs.validate(records, plan)?;

    // Records of jurisdictions without a column keep zero.
    outputs.jurisdiction.fill(0.0);
    if records == 0 {
        return Ok(());
    }

    let transform = plan.transform();
    for start in (0..total).step_by(width) {
        let end = (start + width).min(total);
        let mut block = scratch.slice_mut(s![.., ..end - start]);
        general_mat_mul(
            1.0,
            features,
            &transform.slice(s![.., start..end]),
            0.0,
            &mut block,
        );
        tracing::trace!(start, end, "applied transform block");
        scatter_block(layout, groups, start..end, block.view(), outputs);
    }
    Ok(())
}

fn scatter_block(
    layout: &PolicyLayout,
    groups: &JurisdictionGroups,
    columns: Range<usize>,
    block: ArrayView2<'_, f64>,
    outputs: &mut BatchOutputs,
) {
    let local = |global: usize| {
        columns
            .contains(&global)
            .then(|| block.column(global - columns.start))
    };

    if let Some(column) = local(FEDERAL_COLUMN) {
        outputs.federal.assign(&column);
    }

    for &(jurisdiction, global) in layout.jurisdiction_columns() {
        if let Some(column) = local(global) {
            for &row in groups.indices(jurisdiction) {
                outputs.jurisdiction[row] = column[row];
            }
        }
    }

    for (policy, output) in outputs.payroll.iter_mut().enumerate() {
        if let Some(column) = local(layout.payroll_column(policy)) {
            output.assign(&column);
        }
    }
}

/// Ledger postings as the outer product `incomes x rates`.
pub fn post_ledger(
    incomes: ArrayView1<'_, f64>,
    rates: &Array1<f64>,
    ledger: &mut Array2<f64>,
) -> Result<(), EngineError> {
    expect_shape("ledger output", (incomes.len(), rates.len()), ledger.dim())?;
    if incomes.is_empty() || rates.is_empty() {
        return Ok(());
    }
    general_mat_mul(
        1.0,
        &incomes.insert_axis(Axis(1)),
        &rates.view().insert_axis(Axis(0)),
        0.0,
        ledger,
    );
    Ok(())
}

/// Batch entry point for the matrix path. Borrows an immutable plan, so any
/// number of calculators can share one.
#[derive(Copy, Clone, Debug)]
pub struct AcceleratedCalculator<'p> {
    plan: &'p Plan,
    config: ExecutionConfig,
}

impl<'p> AcceleratedCalculator<'p> {
    pub fn new(plan: &'p Plan, config: ExecutionConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { plan, config })
    }

    pub fn plan(&self) -> &'p Plan {
        self.plan
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn buffers(&self, records: usize) -> Result<BatchBuffers, EngineError> {
        BatchBuffers::new(records, self.plan, &self.config)
    }

    /// Fills `buffers` with raw outputs for `records`. All size and input checks
    /// run before any buffer is written.
    pub fn run(&self, records: &[Record], buffers: &mut BatchBuffers) -> Result<(), EngineError> {
        buffers.validate(records.len(), self.plan, &self.config)?;
        for (index, record) in records.iter().enumerate() {
            if !record.income.is_finite() || record.income < 0.0 {
                return Err(ContractError::InvalidIncome {
                    index,
                    income: record.income,
                }
                .into());
            }
        }

        let incomes: Array1<f64> = records.iter().map(|r| r.income).collect();
        let groups = JurisdictionGroups::from_records(records);

        let BatchBuffers {
            features,
            scratch,
            outputs,
        } = buffers;
        fill_features(features, incomes.view(), self.plan.thresholds())?;
        execute_blocks(self.plan, features, &groups, scratch, outputs)?;
        if let Some(ledger) = outputs.ledger.as_mut() {
            post_ledger(incomes.view(), self.plan.ledger_rates(), ledger)?;
        }

        tracing::debug!(
            records = records.len(),
            block_width = scratch.ncols(),
            policies = self.plan.layout().total_columns(),
            "computed batch"
        );
        Ok(())
    }

    pub fn compute<'a>(&self, records: &'a [Record]) -> Result<Vec<TaxResult<'a>>, EngineError> {
        let mut buffers = self.buffers(records.len())?;
        self.run(records, &mut buffers)?;
        pack_results(records, buffers.outputs(), self.plan)
    }

    /// Repeated-batch form of [`compute`](Self::compute): reuses `buffers` and
    /// overwrites every field of `results`.
    pub fn compute_into<'a>(
        &self,
        records: &'a [Record],
        buffers: &mut BatchBuffers,
        results: &mut [TaxResult<'a>],
    ) -> Result<(), EngineError> {
        let buckets = self
            .config
            .include_ledger
            .then(|| self.plan.ledger_rates().len());
        check_destination(results, records.len(), buckets)?;
        self.run(records, buffers)?;
        pack_into(results, records, buffers.outputs(), self.plan)
    }
}
