//! Scalar evaluation of every policy, one record at a time.
//!
//! This path never touches the plan, the threshold basis, or any matrix: it
//! walks brackets and applies each payroll rule's closed form directly, which
//! makes it the oracle the matrix path is checked against.

use super::policy::PolicySet;
use super::types::{PayrollField, PayrollPolicy, PayrollRule, ProgressiveTable, Record, TaxResult};

/// Bracket walk with right-open brackets `[bounds[k], bounds[k + 1])`.
pub fn progressive_tax(table: &ProgressiveTable, income: f64) -> f64 {
    let bounds = table.bounds();
    let mut tax = 0.0;
    for (k, (&start, &rate)) in bounds.iter().zip(table.rates()).enumerate() {
        if income <= start {
            break;
        }
        let end = bounds.get(k + 1).copied().unwrap_or(f64::INFINITY);
        tax += (income.min(end) - start) * rate;
    }
    tax
}

pub fn payroll_amount(policy: &PayrollPolicy, income: f64) -> f64 {
    match policy.rule {
        PayrollRule::Flat => policy.rate * income,
        PayrollRule::AboveThreshold { threshold } => policy.rate * (income - threshold).max(0.0),
        PayrollRule::Capped { cap } => policy.rate * income.min(cap),
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ReferenceCalculator<'p> {
    policies: &'p PolicySet,
    include_ledger: bool,
}

impl<'p> ReferenceCalculator<'p> {
    pub fn new(policies: &'p PolicySet) -> Self {
        Self {
            policies,
            include_ledger: true,
        }
    }

    pub fn with_ledger(mut self, include_ledger: bool) -> Self {
        self.include_ledger = include_ledger;
        self
    }

    pub fn evaluate<'a>(&self, record: &'a Record) -> TaxResult<'a> {
        let income = record.income;
        let mut result = TaxResult::new(record);
        result.federal_tax = progressive_tax(&self.policies.federal, income);
        result.jurisdiction_tax = self
            .policies
            .table_for(record.jurisdiction)
            .map_or(0.0, |table| progressive_tax(table, income));

        for policy in &self.policies.payroll {
            if let Some(field) = PayrollField::for_policy(policy.kind, policy.side) {
                *field.slot(&mut result) = payroll_amount(policy, income);
            }
        }

        if self.include_ledger {
            result.ledger = Some(
                self.policies
                    .ledger
                    .iter()
                    .map(|bucket| income * bucket.rate)
                    .collect(),
            );
        }
        result
    }

    pub fn compute<'a>(&self, records: &'a [Record]) -> Vec<TaxResult<'a>> {
        records.iter().map(|record| self.evaluate(record)).collect()
    }
}
