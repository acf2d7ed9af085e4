use serde::Serialize;

use super::error::{ContractError, EngineError, expect_len};
use super::types::{PayrollField, TaxResult};

/// The single largest disagreement seen while comparing two result sets.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSite {
    pub index: usize,
    pub record_id: u64,
    pub field: String,
    pub accelerated: f64,
    pub reference: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub checked: usize,
    pub max_abs_delta: f64,
    /// Absolute delta over `max(|reference|, 1)`.
    pub max_rel_delta: f64,
    pub worst: Option<DriftSite>,
}

impl DriftReport {
    pub fn within(&self, tolerance: f64) -> bool {
        self.max_rel_delta <= tolerance
    }
}

fn scalar_fields(result: &TaxResult<'_>) -> impl Iterator<Item = (&'static str, f64)> {
    [
        ("federalTax", result.federal_tax),
        ("jurisdictionTax", result.jurisdiction_tax),
    ]
    .into_iter()
    .chain(
        PayrollField::ALL
            .into_iter()
            .map(move |field| (field.name(), field.get(result))),
    )
}

/// Compares every `stride`-th result field by field, ledger postings included.
pub fn compare(
    accelerated: &[TaxResult<'_>],
    reference: &[TaxResult<'_>],
    stride: usize,
) -> Result<DriftReport, EngineError> {
    expect_len("reference results", accelerated.len(), reference.len())?;
    for (index, (fast, slow)) in accelerated.iter().zip(reference).enumerate() {
        if fast.record.id != slow.record.id {
            return Err(ContractError::RecordMismatch {
                index,
                accelerated: fast.record.id,
                reference: slow.record.id,
            }
            .into());
        }
    }

    let mut report = DriftReport {
        checked: 0,
        max_abs_delta: 0.0,
        max_rel_delta: 0.0,
        worst: None,
    };

    for index in (0..accelerated.len()).step_by(stride.max(1)) {
        let (fast, slow) = (&accelerated[index], &reference[index]);
        let fast_ledger = fast.ledger.as_deref().unwrap_or_default();
        let slow_ledger = slow.ledger.as_deref().unwrap_or_default();
        expect_len("ledger postings", slow_ledger.len(), fast_ledger.len())?;

        let ledger_fields = fast_ledger
            .iter()
            .zip(slow_ledger)
            .enumerate()
            .map(|(bucket, (&a, &r))| (format!("ledger[{bucket}]"), a, r));
        let fields = scalar_fields(fast)
            .zip(scalar_fields(slow))
            .map(|((name, a), (_, r))| (name.to_string(), a, r))
            .chain(ledger_fields);

        for (field, a, r) in fields {
            let abs = match (a - r).abs() {
                delta if delta.is_nan() => f64::INFINITY,
                delta => delta,
            };
            let rel = abs / r.abs().max(1.0);
            report.max_abs_delta = report.max_abs_delta.max(abs);
            if rel > report.max_rel_delta {
                report.max_rel_delta = rel;
                report.worst = Some(DriftSite {
                    index,
                    record_id: fast.record.id,
                    field,
                    accelerated: a,
                    reference: r,
                });
            }
        }
        report.checked += 1;
    }

    if report.max_rel_delta > 0.0 {
        tracing::debug!(
            checked = report.checked,
            max_abs_delta = report.max_abs_delta,
            max_rel_delta = report.max_rel_delta,
            "compared accelerated results against reference"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Jurisdiction, Record};

    fn record(id: u64) -> Record {
        Record {
            id,
            name: format!("r{id}"),
            jurisdiction: Jurisdiction::Illinois,
            income: 1_000.0,
        }
    }

    #[test]
    fn identical_results_report_no_drift() {
        let records = vec![record(1), record(2)];
        let results: Vec<_> = records.iter().map(|r| TaxResult::with_ledger(r, 2)).collect();
        let report = compare(&results, &results.clone(), 1).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.max_abs_delta, 0.0);
        assert!(report.worst.is_none());
        assert!(report.within(0.0));
    }

    #[test]
    fn worst_field_is_reported() {
        let records = vec![record(1), record(2), record(3)];
        let reference: Vec<_> = records.iter().map(|r| TaxResult::with_ledger(r, 2)).collect();
        let mut accelerated = reference.clone();
        accelerated[2].employer_futa = 0.5;
        if let Some(ledger) = accelerated[2].ledger.as_mut() {
            ledger[1] = 0.25;
        }

        let report = compare(&accelerated, &reference, 1).unwrap();
        assert_eq!(report.max_abs_delta, 0.5);
        assert!(!report.within(1e-9));
        let worst = report.worst.expect("drift found");
        assert_eq!(worst.record_id, 3);
        assert_eq!(worst.field, "employerFuta");
    }

    #[test]
    fn stride_samples_records() {
        let records: Vec<_> = (0..10).map(record).collect();
        let results: Vec<_> = records.iter().map(TaxResult::new).collect();
        assert_eq!(compare(&results, &results, 4).unwrap().checked, 3);
        assert_eq!(compare(&results, &results, 0).unwrap().checked, 10);
    }

    #[test]
    fn mismatched_inputs_are_contract_violations() {
        let records = vec![record(1), record(2)];
        let results: Vec<_> = records.iter().map(TaxResult::new).collect();
        assert_eq!(
            compare(&results, &results[..1], 1).unwrap_err(),
            EngineError::Contract(ContractError::LengthMismatch {
                what: "reference results",
                expected: 2,
                actual: 1,
            })
        );

        let with_ledger: Vec<_> = records.iter().map(|r| TaxResult::with_ledger(r, 3)).collect();
        assert!(compare(&with_ledger, &results, 1).is_err());
    }

    #[test]
    fn results_for_different_records_are_not_compared() {
        let batch = vec![record(1), record(2), record(3)];
        let other = vec![record(1), record(2), record(4)];
        let accelerated: Vec<_> = batch.iter().map(TaxResult::new).collect();
        let reference: Vec<_> = other.iter().map(TaxResult::new).collect();
        assert_eq!(
            compare(&accelerated, &reference, 5).unwrap_err(),
            EngineError::Contract(ContractError::RecordMismatch {
                index: 2,
                accelerated: 3,
                reference: 4,
            })
        );
    }
}
