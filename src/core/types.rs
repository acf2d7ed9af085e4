use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Fixed set of jurisdictions a record can belong to. Declaration order is the
/// column order used by the transform layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Jurisdiction {
    #[serde(rename = "CA")]
    California,
    #[serde(rename = "FL")]
    Florida,
    #[serde(rename = "GA")]
    Georgia,
    #[serde(rename = "IL")]
    Illinois,
    #[serde(rename = "NY")]
    NewYork,
    #[serde(rename = "NC")]
    NorthCarolina,
    #[serde(rename = "PA")]
    Pennsylvania,
    #[serde(rename = "TX")]
    Texas,
    #[serde(rename = "WA")]
    Washington,
}

impl Jurisdiction {
    pub const ALL: [Jurisdiction; 9] = [
        Jurisdiction::California,
        Jurisdiction::Florida,
        Jurisdiction::Georgia,
        Jurisdiction::Illinois,
        Jurisdiction::NewYork,
        Jurisdiction::NorthCarolina,
        Jurisdiction::Pennsylvania,
        Jurisdiction::Texas,
        Jurisdiction::Washington,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Jurisdiction::California => "CA",
            Jurisdiction::Florida => "FL",
            Jurisdiction::Georgia => "GA",
            Jurisdiction::Illinois => "IL",
            Jurisdiction::NewYork => "NY",
            Jurisdiction::NorthCarolina => "NC",
            Jurisdiction::Pennsylvania => "PA",
            Jurisdiction::Texas => "TX",
            Jurisdiction::Washington => "WA",
        }
    }

    /// Position within [`Jurisdiction::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaxKind {
    SocialSecurity,
    Medicare,
    AdditionalMedicare,
    Futa,
    Suta,
}

impl TaxKind {
    pub fn name(self) -> &'static str {
        match self {
            TaxKind::SocialSecurity => "social-security",
            TaxKind::Medicare => "medicare",
            TaxKind::AdditionalMedicare => "additional-medicare",
            TaxKind::Futa => "futa",
            TaxKind::Suta => "suta",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Side {
    Employee,
    Employer,
}

impl Side {
    pub fn name(self) -> &'static str {
        match self {
            Side::Employee => "employee",
            Side::Employer => "employer",
        }
    }
}

/// How a payroll policy turns income into an amount.
///
/// Both the transform builder and the scalar calculator match on this
/// exhaustively, so a new arm has to be handled in both places.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PayrollRule {
    /// `rate * income`
    Flat,
    /// `rate * max(0, income - threshold)`
    AboveThreshold { threshold: f64 },
    /// `rate * min(income, cap)`
    Capped { cap: f64 },
}

impl PayrollRule {
    pub fn parse(name: &str, parameter: Option<f64>) -> Result<Self, ConfigError> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        let rule = match normalized.as_str() {
            "flat" => PayrollRule::Flat,
            "above-threshold" => PayrollRule::AboveThreshold {
                threshold: parameter.ok_or(ConfigError::MissingParameter {
                    rule: "above-threshold",
                })?,
            },
            "capped" => PayrollRule::Capped {
                cap: parameter.ok_or(ConfigError::MissingParameter { rule: "capped" })?,
            },
            _ => return Err(ConfigError::UnknownRule(name.to_string())),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn name(self) -> &'static str {
        match self {
            PayrollRule::Flat => "flat",
            PayrollRule::AboveThreshold { .. } => "above-threshold",
            PayrollRule::Capped { .. } => "capped",
        }
    }

    /// The boundary this rule contributes to the shared threshold basis, if any.
    pub fn threshold(self) -> Option<f64> {
        match self {
            PayrollRule::Flat => None,
            PayrollRule::AboveThreshold { threshold } => Some(threshold),
            PayrollRule::Capped { cap } => Some(cap),
        }
    }

    fn validate(self) -> Result<(), ConfigError> {
        match self.threshold() {
            Some(value) if !value.is_finite() || value <= 0.0 => {
                Err(ConfigError::InvalidParameter(value))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PayrollPolicy {
    pub kind: TaxKind,
    pub side: Side,
    pub rule: PayrollRule,
    pub rate: f64,
}

impl PayrollPolicy {
    pub fn new(kind: TaxKind, side: Side, rule: PayrollRule, rate: f64) -> Result<Self, ConfigError> {
        let policy = Self {
            kind,
            side,
            rule,
            rate,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Re-checks rate and rule parameter; fields are public and may have been
    /// edited after construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_rate(self.rate)?;
        self.rule.validate()
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.side.name(), self.kind.name())
    }
}

/// Bracketed schedule: `rates[k]` applies to income in `[bounds[k], bounds[k + 1])`.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressiveTable {
    bounds: Vec<f64>,
    rates: Vec<f64>,
}

impl ProgressiveTable {
    pub fn new(bounds: Vec<f64>, rates: Vec<f64>) -> Result<Self, ConfigError> {
        if bounds.len() != rates.len() {
            return Err(ConfigError::TableLengthMismatch {
                bounds: bounds.len(),
                rates: rates.len(),
            });
        }
        let Some(&first) = bounds.first() else {
            return Err(ConfigError::EmptyTable);
        };
        if first != 0.0 {
            return Err(ConfigError::FirstBoundNotZero(first));
        }
        for (idx, pair) in bounds.windows(2).enumerate() {
            if !pair[1].is_finite() || pair[1] <= pair[0] {
                return Err(ConfigError::BoundsNotIncreasing(idx + 1));
            }
        }
        for &rate in &rates {
            validate_rate(rate)?;
        }
        Ok(Self { bounds, rates })
    }

    pub fn flat(rate: f64) -> Result<Self, ConfigError> {
        Self::new(vec![0.0], vec![rate])
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

/// A fixed-rate allocation posted to the general ledger for every record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerBucket {
    pub name: String,
    pub rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: u64,
    pub name: String,
    pub jurisdiction: Jurisdiction,
    pub income: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxResult<'a> {
    pub record: &'a Record,
    pub federal_tax: f64,
    pub jurisdiction_tax: f64,
    pub employee_social_security: f64,
    pub employee_medicare: f64,
    pub employee_additional_medicare: f64,
    pub employer_social_security: f64,
    pub employer_medicare: f64,
    pub employer_futa: f64,
    pub employer_suta: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<Vec<f64>>,
}

impl<'a> TaxResult<'a> {
    pub fn new(record: &'a Record) -> Self {
        Self {
            record,
            federal_tax: 0.0,
            jurisdiction_tax: 0.0,
            employee_social_security: 0.0,
            employee_medicare: 0.0,
            employee_additional_medicare: 0.0,
            employer_social_security: 0.0,
            employer_medicare: 0.0,
            employer_futa: 0.0,
            employer_suta: 0.0,
            ledger: None,
        }
    }

    pub fn with_ledger(record: &'a Record, buckets: usize) -> Self {
        Self {
            ledger: Some(vec![0.0; buckets]),
            ..Self::new(record)
        }
    }
}

/// The seven payroll amounts carried by [`TaxResult`], in declaration order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PayrollField {
    EmployeeSocialSecurity,
    EmployeeMedicare,
    EmployeeAdditionalMedicare,
    EmployerSocialSecurity,
    EmployerMedicare,
    EmployerFuta,
    EmployerSuta,
}

impl PayrollField {
    pub const ALL: [PayrollField; 7] = [
        PayrollField::EmployeeSocialSecurity,
        PayrollField::EmployeeMedicare,
        PayrollField::EmployeeAdditionalMedicare,
        PayrollField::EmployerSocialSecurity,
        PayrollField::EmployerMedicare,
        PayrollField::EmployerFuta,
        PayrollField::EmployerSuta,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PayrollField::EmployeeSocialSecurity => "employeeSocialSecurity",
            PayrollField::EmployeeMedicare => "employeeMedicare",
            PayrollField::EmployeeAdditionalMedicare => "employeeAdditionalMedicare",
            PayrollField::EmployerSocialSecurity => "employerSocialSecurity",
            PayrollField::EmployerMedicare => "employerMedicare",
            PayrollField::EmployerFuta => "employerFuta",
            PayrollField::EmployerSuta => "employerSuta",
        }
    }

    pub fn for_policy(kind: TaxKind, side: Side) -> Option<Self> {
        match (side, kind) {
            (Side::Employee, TaxKind::SocialSecurity) => Some(PayrollField::EmployeeSocialSecurity),
            (Side::Employee, TaxKind::Medicare) => Some(PayrollField::EmployeeMedicare),
            (Side::Employee, TaxKind::AdditionalMedicare) => {
                Some(PayrollField::EmployeeAdditionalMedicare)
            }
            (Side::Employer, TaxKind::SocialSecurity) => Some(PayrollField::EmployerSocialSecurity),
            (Side::Employer, TaxKind::Medicare) => Some(PayrollField::EmployerMedicare),
            (Side::Employer, TaxKind::Futa) => Some(PayrollField::EmployerFuta),
            (Side::Employer, TaxKind::Suta) => Some(PayrollField::EmployerSuta),
            _ => None,
        }
    }

    pub fn get(self, result: &TaxResult<'_>) -> f64 {
        match self {
            PayrollField::EmployeeSocialSecurity => result.employee_social_security,
            PayrollField::EmployeeMedicare => result.employee_medicare,
            PayrollField::EmployeeAdditionalMedicare => result.employee_additional_medicare,
            PayrollField::EmployerSocialSecurity => result.employer_social_security,
            PayrollField::EmployerMedicare => result.employer_medicare,
            PayrollField::EmployerFuta => result.employer_futa,
            PayrollField::EmployerSuta => result.employer_suta,
        }
    }

    pub fn slot<'r>(self, result: &'r mut TaxResult<'_>) -> &'r mut f64 {
        match self {
            PayrollField::EmployeeSocialSecurity => &mut result.employee_social_security,
            PayrollField::EmployeeMedicare => &mut result.employee_medicare,
            PayrollField::EmployeeAdditionalMedicare => &mut result.employee_additional_medicare,
            PayrollField::EmployerSocialSecurity => &mut result.employer_social_security,
            PayrollField::EmployerMedicare => &mut result.employer_medicare,
            PayrollField::EmployerFuta => &mut result.employer_futa,
            PayrollField::EmployerSuta => &mut result.employer_suta,
        }
    }
}

fn validate_rate(rate: f64) -> Result<(), ConfigError> {
    if rate.is_finite() && (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRate(rate))
    }
}
