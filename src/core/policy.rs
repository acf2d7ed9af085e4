use std::collections::BTreeMap;

use serde::Deserialize;

use super::error::{ConfigError, EngineError};
use super::types::{Jurisdiction, LedgerBucket, PayrollPolicy, PayrollRule, ProgressiveTable, Side, TaxKind};

/// All policy data a plan is compiled from. Read-only once built.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicySet {
    pub federal: ProgressiveTable,
    pub jurisdictions: BTreeMap<Jurisdiction, ProgressiveTable>,
    pub payroll: Vec<PayrollPolicy>,
    pub ledger: Vec<LedgerBucket>,
}

impl PolicySet {
    pub fn table_for(&self, jurisdiction: Jurisdiction) -> Option<&ProgressiveTable> {
        self.jurisdictions.get(&jurisdiction)
    }

    /// Built-in single-filer data set. Florida, Texas and Washington levy no
    /// income tax and therefore have no table.
    pub fn standard() -> Result<Self, ConfigError> {
        let federal = ProgressiveTable::new(
            vec![
                0.0, 11_926.0, 48_476.0, 103_351.0, 197_301.0, 250_526.0, 626_351.0,
            ],
            vec![0.10, 0.12, 0.22, 0.24, 0.32, 0.35, 0.37],
        )?;

        let mut jurisdictions = BTreeMap::new();
        jurisdictions.insert(
            Jurisdiction::California,
            ProgressiveTable::new(
                vec![
                    0.0, 10_756.0, 25_499.0, 40_245.0, 55_866.0, 70_606.0, 360_659.0, 432_787.0,
                    721_314.0, 1_000_000.0,
                ],
                vec![
                    0.01, 0.02, 0.04, 0.06, 0.08, 0.093, 0.103, 0.113, 0.123, 0.133,
                ],
            )?,
        );
        jurisdictions.insert(
            Jurisdiction::NewYork,
            ProgressiveTable::new(
                vec![
                    0.0, 8_500.0, 11_700.0, 13_900.0, 80_650.0, 215_400.0, 1_077_550.0,
                    5_000_000.0, 25_000_000.0,
                ],
                vec![
                    0.04, 0.045, 0.0525, 0.055, 0.06, 0.0685, 0.0965, 0.103, 0.109,
                ],
            )?,
        );
        jurisdictions.insert(Jurisdiction::Georgia, ProgressiveTable::flat(0.0539)?);
        jurisdictions.insert(Jurisdiction::Illinois, ProgressiveTable::flat(0.0495)?);
        jurisdictions.insert(Jurisdiction::NorthCarolina, ProgressiveTable::flat(0.0425)?);
        jurisdictions.insert(Jurisdiction::Pennsylvania, ProgressiveTable::flat(0.0307)?);

        let payroll = vec![
            PayrollPolicy::new(
                TaxKind::SocialSecurity,
                Side::Employee,
                PayrollRule::Capped { cap: 176_100.0 },
                0.062,
            )?,
            PayrollPolicy::new(TaxKind::Medicare, Side::Employee, PayrollRule::Flat, 0.0145)?,
            PayrollPolicy::new(
                TaxKind::AdditionalMedicare,
                Side::Employee,
                PayrollRule::AboveThreshold {
                    threshold: 200_000.0,
                },
                0.009,
            )?,
            PayrollPolicy::new(
                TaxKind::SocialSecurity,
                Side::Employer,
                PayrollRule::Capped { cap: 176_100.0 },
                0.062,
            )?,
            PayrollPolicy::new(TaxKind::Medicare, Side::Employer, PayrollRule::Flat, 0.0145)?,
            PayrollPolicy::new(
                TaxKind::Futa,
                Side::Employer,
                PayrollRule::Capped { cap: 7_000.0 },
                0.006,
            )?,
            PayrollPolicy::new(
                TaxKind::Suta,
                Side::Employer,
                PayrollRule::Capped { cap: 9_000.0 },
                0.027,
            )?,
        ];

        let ledger = vec![
            LedgerBucket {
                name: "benefits".to_string(),
                rate: 0.075,
            },
            LedgerBucket {
                name: "retirement-match".to_string(),
                rate: 0.04,
            },
            LedgerBucket {
                name: "workers-comp".to_string(),
                rate: 0.012,
            },
            LedgerBucket {
                name: "overhead".to_string(),
                rate: 0.05,
            },
        ];

        Ok(Self {
            federal,
            jurisdictions,
            payroll,
            ledger,
        })
    }

    /// Parse and validate a JSON policy file.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let file = serde_json::from_str::<PolicyFile>(json)
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Ok(Self::try_from(file)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableFile {
    bounds: Vec<f64>,
    rates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JurisdictionTableFile {
    jurisdiction: Jurisdiction,
    bounds: Vec<f64>,
    rates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PayrollFile {
    kind: TaxKind,
    side: Side,
    rule: String,
    rate: f64,
    #[serde(default)]
    parameter: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    federal: TableFile,
    #[serde(default)]
    jurisdictions: Vec<JurisdictionTableFile>,
    payroll: Vec<PayrollFile>,
    #[serde(default)]
    ledger: Vec<LedgerBucket>,
}

impl TryFrom<PolicyFile> for PolicySet {
    type Error = ConfigError;

    fn try_from(file: PolicyFile) -> Result<Self, Self::Error> {
        let federal = ProgressiveTable::new(file.federal.bounds, file.federal.rates)?;

        let mut jurisdictions = BTreeMap::new();
        for entry in file.jurisdictions {
            let table = ProgressiveTable::new(entry.bounds, entry.rates)?;
            if jurisdictions.insert(entry.jurisdiction, table).is_some() {
                return Err(ConfigError::DuplicateJurisdiction(
                    entry.jurisdiction.code().to_string(),
                ));
            }
        }

        let payroll = file
            .payroll
            .into_iter()
            .map(|p| {
                let rule = PayrollRule::parse(&p.rule, p.parameter)?;
                PayrollPolicy::new(p.kind, p.side, rule, p.rate)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            federal,
            jurisdictions,
            payroll,
            ledger: file.ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::Plan;

    const MINIMAL_JSON: &str = r#"{
        "federal": { "bounds": [0, 11926], "rates": [0.10, 0.12] },
        "jurisdictions": [
            { "jurisdiction": "CA", "bounds": [0, 10000], "rates": [0.01, 0.02] }
        ],
        "payroll": [
            { "kind": "social-security", "side": "employee", "rule": "capped", "rate": 0.062, "parameter": 170000 },
            { "kind": "medicare", "side": "employee", "rule": "flat", "rate": 0.0145 }
        ],
        "ledger": [ { "name": "benefits", "rate": 0.05 } ]
    }"#;

    #[test]
    fn standard_policy_set_is_valid() {
        let policies = PolicySet::standard().expect("standard policies");
        assert_eq!(policies.federal.len(), 7);
        assert_eq!(policies.payroll.len(), 7);
        assert_eq!(policies.ledger.len(), 4);
        assert!(policies.table_for(Jurisdiction::Texas).is_none());
        assert!(policies.table_for(Jurisdiction::California).is_some());
    }

    #[test]
    fn from_json_parses_minimal_policy_file() {
        let policies = PolicySet::from_json(MINIMAL_JSON).expect("valid policy file");
        assert_eq!(policies.federal.bounds(), &[0.0, 11_926.0]);
        assert_eq!(policies.jurisdictions.len(), 1);
        assert_eq!(
            policies.payroll[0].rule,
            PayrollRule::Capped { cap: 170_000.0 }
        );
        assert_eq!(policies.payroll[1].rule, PayrollRule::Flat);
        assert_eq!(policies.ledger[0].name, "benefits");
    }

    #[test]
    fn from_json_rejects_unknown_rule_kind() {
        let json = MINIMAL_JSON.replace("\"flat\"", "\"tiered\"");
        let err = PolicySet::from_json(&json).unwrap_err();
        assert_eq!(
            err,
            EngineError::Config(ConfigError::UnknownRule("tiered".to_string()))
        );
    }

    #[test]
    fn from_json_rejects_duplicate_jurisdiction() {
        let json = MINIMAL_JSON.replace(
            r#"{ "jurisdiction": "CA", "bounds": [0, 10000], "rates": [0.01, 0.02] }"#,
            r#"{ "jurisdiction": "CA", "bounds": [0], "rates": [0.01] },
               { "jurisdiction": "CA", "bounds": [0], "rates": [0.02] }"#,
        );
        let err = PolicySet::from_json(&json).unwrap_err();
        assert_eq!(
            err,
            EngineError::Config(ConfigError::DuplicateJurisdiction("CA".to_string()))
        );
    }

    #[test]
    fn ledger_rates_are_checked_when_the_plan_is_built() {
        let json = MINIMAL_JSON.replace(r#""rate": 0.05 }"#, r#""rate": -0.05 }"#);
        let policies = PolicySet::from_json(&json).expect("ledger rates are not checked on load");
        assert_eq!(
            Plan::build(&policies).unwrap_err(),
            EngineError::Config(ConfigError::InvalidLedgerRate {
                name: "benefits".to_string(),
                rate: -0.05,
            })
        );
    }

    #[test]
    fn from_json_reports_malformed_documents() {
        let err = PolicySet::from_json("{ not json").unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::Malformed(_))));
    }
}
