//! Compile-once policy plan.
//!
//! Every progressive table and payroll rule is re-expressed as one column of
//! coefficients over a shared hinge basis `[x, max(0, x - t_1), ..., max(0, x - t_T)]`,
//! so a single matrix product evaluates every policy for a whole batch.
//!
//! Column order is fixed by [`PolicyLayout`]: federal first, then configured
//! jurisdictions in [`Jurisdiction`] order, then payroll policies in declared order.

use ndarray::{Array1, Array2, ArrayViewMut1};
use serde::Serialize;

use super::error::{ConfigError, EngineError};
use super::policy::PolicySet;
use super::types::{Jurisdiction, PayrollField, PayrollPolicy, PayrollRule, ProgressiveTable};

pub const FEDERAL_COLUMN: usize = 0;

/// Sorted, strictly increasing union of every non-zero policy boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedThresholds(Vec<f64>);

impl SharedThresholds {
    pub fn collect(policies: &PolicySet) -> Self {
        let tables = std::iter::once(&policies.federal).chain(policies.jurisdictions.values());
        let mut values: Vec<f64> = tables
            .flat_map(|table| table.bounds().iter().copied())
            .filter(|&bound| bound > 0.0)
            .chain(policies.payroll.iter().filter_map(|p| p.rule.threshold()))
            .collect();

        values.sort_by(|a, b| a.total_cmp(b));
        // Policy constants, so exact equality is the right notion of duplicate.
        values.dedup();
        Self(values)
    }

    /// Wraps an already merged basis, rejecting values that are not finite,
    /// positive and strictly increasing.
    pub fn from_sorted(values: Vec<f64>) -> Result<Self, ConfigError> {
        let mut previous = 0.0;
        for (index, &value) in values.iter().enumerate() {
            if !value.is_finite() || value <= previous {
                return Err(ConfigError::InvalidThresholdBasis { index, value });
            }
            previous = value;
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Transform row carrying the hinge feature for `value`, if `value` is in the basis.
    pub fn row_of(&self, value: f64) -> Option<usize> {
        self.0
            .binary_search_by(|probe| probe.total_cmp(&value))
            .ok()
            .map(|idx| idx + 1)
    }
}

/// Deterministic policy to column assignment.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyLayout {
    jurisdictions: Vec<(Jurisdiction, usize)>,
    payroll_offset: usize,
    payroll_count: usize,
    labels: Vec<String>,
}

impl PolicyLayout {
    pub fn from_policies(policies: &PolicySet) -> Self {
        let mut labels = vec!["federal".to_string()];
        let jurisdictions: Vec<(Jurisdiction, usize)> = policies
            .jurisdictions
            .keys()
            .enumerate()
            .map(|(idx, &jurisdiction)| {
                labels.push(format!("jurisdiction:{}", jurisdiction.code()));
                (jurisdiction, FEDERAL_COLUMN + 1 + idx)
            })
            .collect();
        let payroll_offset = 1 + jurisdictions.len();
        labels.extend(policies.payroll.iter().map(|p| format!("payroll:{}", p.label())));

        Self {
            jurisdictions,
            payroll_offset,
            payroll_count: policies.payroll.len(),
            labels,
        }
    }

    pub fn jurisdiction_columns(&self) -> &[(Jurisdiction, usize)] {
        &self.jurisdictions
    }

    pub fn jurisdiction_column(&self, jurisdiction: Jurisdiction) -> Option<usize> {
        self.jurisdictions
            .iter()
            .find(|(j, _)| *j == jurisdiction)
            .map(|&(_, column)| column)
    }

    pub fn payroll_column(&self, policy: usize) -> usize {
        self.payroll_offset + policy
    }

    pub fn payroll_count(&self) -> usize {
        self.payroll_count
    }

    pub fn total_columns(&self) -> usize {
        self.payroll_offset + self.payroll_count
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub field: PayrollField,
    /// Index into the plan's payroll policies (and payroll output arrays).
    pub policy: usize,
}

/// Explicit result-field to payroll-policy mapping, complete for every [`PayrollField`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayrollManifest {
    entries: Vec<ManifestEntry>,
}

impl PayrollManifest {
    pub fn resolve(payroll: &[PayrollPolicy]) -> Result<Self, ConfigError> {
        let mut by_field: Vec<Option<usize>> = vec![None; PayrollField::ALL.len()];
        for (idx, policy) in payroll.iter().enumerate() {
            let field = PayrollField::for_policy(policy.kind, policy.side).ok_or_else(|| {
                ConfigError::UnassignablePayroll {
                    kind: policy.kind.name().to_string(),
                    side: policy.side.name().to_string(),
                }
            })?;
            let slot = &mut by_field[field as usize];
            if slot.is_some() {
                return Err(ConfigError::DuplicatePayrollField(field.name()));
            }
            *slot = Some(idx);
        }

        let entries = PayrollField::ALL
            .into_iter()
            .zip(by_field)
            .map(|(field, policy)| {
                policy
                    .map(|policy| ManifestEntry { field, policy })
                    .ok_or(ConfigError::UnmappedPayrollField(field.name()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }
}

/// Builds the `[1 + T] x [policy_count]` transform over `thresholds`.
pub fn build_transform(
    policies: &PolicySet,
    layout: &PolicyLayout,
    thresholds: &SharedThresholds,
) -> Result<Array2<f64>, ConfigError> {
    let mut transform = Array2::<f64>::zeros((1 + thresholds.len(), layout.total_columns()));

    fill_table_column(
        transform.column_mut(FEDERAL_COLUMN),
        &policies.federal,
        thresholds,
        "federal",
    )?;

    for &(jurisdiction, column) in layout.jurisdiction_columns() {
        if let Some(table) = policies.table_for(jurisdiction) {
            fill_table_column(
                transform.column_mut(column),
                table,
                thresholds,
                jurisdiction.code(),
            )?;
        }
    }

    for (idx, policy) in policies.payroll.iter().enumerate() {
        fill_payroll_column(
            transform.column_mut(layout.payroll_column(idx)),
            policy,
            thresholds,
        )?;
    }

    Ok(transform)
}

fn fill_table_column(
    mut column: ArrayViewMut1<'_, f64>,
    table: &ProgressiveTable,
    thresholds: &SharedThresholds,
    name: &str,
) -> Result<(), ConfigError> {
    let bounds = table.bounds();
    let rates = table.rates();
    column[0] = rates[0];
    for k in 1..table.len() {
        let row = thresholds
            .row_of(bounds[k])
            .ok_or_else(|| ConfigError::MissingThreshold {
                policy: name.to_string(),
                parameter: bounds[k],
            })?;
        column[row] = rates[k] - rates[k - 1];
    }
    Ok(())
}

fn fill_payroll_column(
    mut column: ArrayViewMut1<'_, f64>,
    policy: &PayrollPolicy,
    thresholds: &SharedThresholds,
) -> Result<(), ConfigError> {
    let row_of = |parameter: f64| {
        thresholds
            .row_of(parameter)
            .ok_or_else(|| ConfigError::MissingThreshold {
                policy: policy.label(),
                parameter,
            })
    };

    match policy.rule {
        PayrollRule::Flat => {
            column[0] = policy.rate;
        }
        PayrollRule::AboveThreshold { threshold } => {
            column[row_of(threshold)?] = policy.rate;
        }
        PayrollRule::Capped { cap } => {
            // rate*x - rate*max(0, x - cap) == rate*min(x, cap)
            column[0] = policy.rate;
            column[row_of(cap)?] = -policy.rate;
        }
    }
    Ok(())
}

/// Immutable compiled form of a [`PolicySet`], shared read-only by every batch.
#[derive(Clone, Debug)]
pub struct Plan {
    layout: PolicyLayout,
    thresholds: SharedThresholds,
    transform: Array2<f64>,
    manifest: PayrollManifest,
    ledger_rates: Array1<f64>,
    ledger_names: Vec<String>,
}

impl Plan {
    pub fn build(policies: &PolicySet) -> Result<Self, EngineError> {
        for policy in &policies.payroll {
            policy.validate()?;
        }
        for bucket in &policies.ledger {
            if !bucket.rate.is_finite() || bucket.rate < 0.0 {
                return Err(ConfigError::InvalidLedgerRate {
                    name: bucket.name.clone(),
                    rate: bucket.rate,
                }
                .into());
            }
        }

        let layout = PolicyLayout::from_policies(policies);
        let thresholds = SharedThresholds::collect(policies);
        let transform = build_transform(policies, &layout, &thresholds)?;
        let manifest = PayrollManifest::resolve(&policies.payroll)?;

        tracing::debug!(
            thresholds = thresholds.len(),
            columns = layout.total_columns(),
            jurisdictions = layout.jurisdiction_columns().len(),
            ledger_buckets = policies.ledger.len(),
            "built policy plan"
        );

        Ok(Self {
            layout,
            thresholds,
            transform,
            manifest,
            ledger_rates: policies.ledger.iter().map(|b| b.rate).collect(),
            ledger_names: policies.ledger.iter().map(|b| b.name.clone()).collect(),
        })
    }

    pub fn layout(&self) -> &PolicyLayout {
        &self.layout
    }

    pub fn thresholds(&self) -> &SharedThresholds {
        &self.thresholds
    }

    pub fn transform(&self) -> &Array2<f64> {
        &self.transform
    }

    pub fn manifest(&self) -> &PayrollManifest {
        &self.manifest
    }

    pub fn ledger_rates(&self) -> &Array1<f64> {
        &self.ledger_rates
    }

    pub fn ledger_names(&self) -> &[String] {
        &self.ledger_names
    }

    /// Width of the feature basis: income plus one hinge per threshold.
    pub fn feature_count(&self) -> usize {
        1 + self.thresholds.len()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            thresholds: self.thresholds.as_slice().to_vec(),
            columns: self.layout.labels().to_vec(),
            feature_count: self.feature_count(),
            policy_count: self.layout.total_columns(),
            ledger_buckets: self.ledger_names.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub thresholds: Vec<f64>,
    pub columns: Vec<String>,
    pub feature_count: usize,
    pub policy_count: usize,
    pub ledger_buckets: Vec<String>,
}
