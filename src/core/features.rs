use ndarray::{Array2, ArrayView1};

use super::error::{ContractError, EngineError, expect_shape};
use super::plan::SharedThresholds;

/// Builds the `[N] x [1 + T]` hinge feature matrix for `incomes`.
pub fn build_features(
    incomes: ArrayView1<'_, f64>,
    thresholds: &SharedThresholds,
) -> Result<Array2<f64>, EngineError> {
    let mut features = Array2::<f64>::zeros((incomes.len(), 1 + thresholds.len()));
    fill_features(&mut features, incomes, thresholds)?;
    Ok(features)
}

/// Overwrites every cell of `features`: column 0 is income, column `1 + i`
/// is `max(0, income - thresholds[i])`.
pub fn fill_features(
    features: &mut Array2<f64>,
    incomes: ArrayView1<'_, f64>,
    thresholds: &SharedThresholds,
) -> Result<(), EngineError> {
    expect_shape(
        "feature matrix",
        (incomes.len(), 1 + thresholds.len()),
        features.dim(),
    )?;
    for (index, &income) in incomes.iter().enumerate() {
        if !income.is_finite() || income < 0.0 {
            return Err(ContractError::InvalidIncome { index, income }.into());
        }
    }

    features.column_mut(0).assign(&incomes);
    let cuts = thresholds.as_slice();
    for mut row in features.rows_mut() {
        // Hinges read income back from column 0 rather than the source array.
        let income = row[0];
        for (cell, &cut) in row.iter_mut().skip(1).zip(cuts) {
            *cell = (income - cut).max(0.0);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn features_hold_income_and_hinges() {
        let thresholds = SharedThresholds::from_sorted(vec![10.0, 25.0]).unwrap();
        let incomes = array![0.0, 10.0, 30.0];
        let features = build_features(incomes.view(), &thresholds).unwrap();
        assert_eq!(
            features,
            array![[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [30.0, 20.0, 5.0]]
        );
    }

    #[test]
    fn fill_features_overwrites_previous_batch() {
        let thresholds = SharedThresholds::from_sorted(vec![5.0]).unwrap();
        let mut features = Array2::<f64>::from_elem((2, 2), 99.0);
        fill_features(&mut features, array![1.0, 8.0].view(), &thresholds).unwrap();
        assert_eq!(features, array![[1.0, 0.0], [8.0, 3.0]]);
    }

    #[test]
    fn empty_basis_gives_income_only() {
        let thresholds = SharedThresholds::from_sorted(Vec::new()).unwrap();
        let features = build_features(array![4.0, 2.0].view(), &thresholds).unwrap();
        assert_eq!(features, array![[4.0], [2.0]]);
    }

    #[test]
    fn rejects_mismatched_shape_and_invalid_income() {
        let thresholds = SharedThresholds::from_sorted(vec![5.0]).unwrap();
        let mut features = Array2::<f64>::zeros((3, 2));
        let err = fill_features(&mut features, array![1.0, 2.0].view(), &thresholds).unwrap_err();
        assert_eq!(
            err,
            EngineError::Contract(ContractError::ShapeMismatch {
                what: "feature matrix",
                expected: (2, 2),
                actual: (3, 2),
            })
        );

        let err = build_features(array![1.0, -2.0].view(), &thresholds).unwrap_err();
        assert_eq!(
            err,
            EngineError::Contract(ContractError::InvalidIncome {
                index: 1,
                income: -2.0
            })
        );
    }
}
