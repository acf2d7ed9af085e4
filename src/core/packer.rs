use super::engine::BatchOutputs;
use super::error::{ContractError, EngineError, expect_len};
use super::plan::Plan;
use super::types::{Record, TaxResult};

/// Checks that `results` can receive a batch of `records` rows. `ledger_buckets`
/// is the required ledger length, or `None` when the ledger is not produced.
pub fn check_destination(
    results: &[TaxResult<'_>],
    records: usize,
    ledger_buckets: Option<usize>,
) -> Result<(), ContractError> {
    expect_len("result objects", records, results.len())?;
    if let Some(buckets) = ledger_buckets {
        for (index, result) in results.iter().enumerate() {
            match &result.ledger {
                Some(ledger) if ledger.len() == buckets => {}
                _ => return Err(ContractError::MissingLedger { index, buckets }),
            }
        }
    }
    Ok(())
}

pub fn pack_results<'a>(
    records: &'a [Record],
    outputs: &BatchOutputs,
    plan: &Plan,
) -> Result<Vec<TaxResult<'a>>, EngineError> {
    let buckets = outputs.ledger.as_ref().map(|ledger| ledger.ncols());
    let mut results: Vec<TaxResult<'a>> = records
        .iter()
        .map(|record| match buckets {
            Some(buckets) => TaxResult::with_ledger(record, buckets),
            None => TaxResult::new(record),
        })
        .collect();
    pack_into(&mut results, records, outputs, plan)?;
    Ok(results)
}

/// Overwrites every field of `results` from `outputs`; a reused result ends up
/// equal to a freshly packed one.
pub fn pack_into<'a>(
    results: &mut [TaxResult<'a>],
    records: &'a [Record],
    outputs: &BatchOutputs,
    plan: &Plan,
) -> Result<(), EngineError> {
    outputs.validate(records.len(), plan)?;
    let buckets = outputs.ledger.as_ref().map(|ledger| ledger.ncols());
    check_destination(results, records.len(), buckets)?;

    let manifest = plan.manifest().entries();
    for (row, (result, record)) in results.iter_mut().zip(records).enumerate() {
        result.record = record;
        result.federal_tax = outputs.federal[row];
        result.jurisdiction_tax = outputs.jurisdiction[row];
        for entry in manifest {
            *entry.field.slot(result) = outputs.payroll[entry.policy][row];
        }
        match &outputs.ledger {
            Some(ledger) => {
                if let Some(postings) = result.ledger.as_mut() {
                    for (posting, &value) in postings.iter_mut().zip(ledger.row(row)) {
                        *posting = value;
                    }
                }
            }
            None => result.ledger = None,
        }
    }
    Ok(())
}
