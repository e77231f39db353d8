//! Hybrid Annuity Model price escalation.
//!
//! ```text
//! P0  = 0.70 × WPI_base    + 0.30 × CPI-IW_base
//! Pc  = 0.70 × WPI_current + 0.30 × CPI-IW_current
//! PIM = Pc / P0
//! escalation = work_done × (PIM − 1)
//! ```
//!
//! Rounding is applied to output fields only: 2 dp for amounts and composite
//! indices, 4 dp for PIM. Intermediate arithmetic stays at full precision.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Weight of the primary (wholesale) index in the composite.
pub const PRIMARY_WEIGHT: f64 = 0.70;
/// Weight of the secondary (consumer) index in the composite.
pub const SECONDARY_WEIGHT: f64 = 0.30;

const OUT_OF_RANGE: &str = "result out of range";
/// 2^52: every f64 at or above this magnitude is already an integer.
const MAX_EXACT_INTEGER: f64 = 4_503_599_627_370_496.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalcError {
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),
}

/// Primary and secondary index values for one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexPair {
    pub primary: f64,
    pub secondary: f64,
}

impl IndexPair {
    pub fn new(primary: f64, secondary: f64) -> Self {
        Self { primary, secondary }
    }

    fn validate(&self) -> Result<(), CalcError> {
        for value in [self.primary, self.secondary] {
            if value.is_nan() || value.is_infinite() {
                return Err(CalcError::InvalidInput("non-finite index value"));
            }
            if value <= 0.0 {
                return Err(CalcError::InvalidInput("non-positive index value"));
            }
        }
        Ok(())
    }
}

/// Weighted components of both composites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub primary_base_weighted: f64,
    pub secondary_base_weighted: f64,
    pub primary_current_weighted: f64,
    pub secondary_current_weighted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationResult {
    pub p0: f64,
    pub pc: f64,
    pub pim: f64,
    pub work_done: f64,
    pub escalation_amount: f64,
    pub total_amount: f64,
    pub is_de_escalation: bool,
    pub breakdown: Breakdown,
}

/// Compute the escalation for `work_value` between the base and current periods.
pub fn escalate(
    work_value: f64,
    base: IndexPair,
    current: IndexPair,
) -> Result<EscalationResult, CalcError> {
    if !work_value.is_finite() {
        return Err(CalcError::InvalidInput("non-finite work value"));
    }
    if work_value < 0.0 {
        return Err(CalcError::InvalidInput("negative work value"));
    }
    base.validate()?;
    current.validate()?;

    let primary_base_weighted = PRIMARY_WEIGHT * base.primary;
    let secondary_base_weighted = SECONDARY_WEIGHT * base.secondary;
    let primary_current_weighted = PRIMARY_WEIGHT * current.primary;
    let secondary_current_weighted = SECONDARY_WEIGHT * current.secondary;

    let p0 = primary_base_weighted + secondary_base_weighted;
    let pc = primary_current_weighted + secondary_current_weighted;
    if !(p0.is_finite() && pc.is_finite()) || p0 <= 0.0 {
        return Err(CalcError::InvalidInput(OUT_OF_RANGE));
    }
    let pim = pc / p0;
    let escalation_amount = work_value * (pim - 1.0);
    let total_amount = work_value + escalation_amount;
    if !(pim.is_finite() && escalation_amount.is_finite() && total_amount.is_finite()) {
        return Err(CalcError::InvalidInput(OUT_OF_RANGE));
    }

    Ok(EscalationResult {
        p0: round_to(p0, 2),
        pc: round_to(pc, 2),
        pim: round_to(pim, 4),
        work_done: work_value,
        escalation_amount: round_to(escalation_amount, 2),
        total_amount: round_to(total_amount, 2),
        is_de_escalation: pim < 1.0,
        breakdown: Breakdown {
            primary_base_weighted: round_to(primary_base_weighted, 2),
            secondary_base_weighted: round_to(secondary_base_weighted, 2),
            primary_current_weighted: round_to(primary_current_weighted, 2),
            secondary_current_weighted: round_to(secondary_current_weighted, 2),
        },
    })
}

/// PIM for display, two decimals.
pub fn format_pim(pim: f64) -> String {
    format!("{pim:.2}")
}

/// Round half away from zero to `decimals` places.
///
/// Values too large to carry a fractional digit at that scale are returned
/// unchanged.
fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let scaled = value * factor;
    if !scaled.is_finite() || value.abs() >= MAX_EXACT_INTEGER / factor {
        return value;
    }
    scaled.round() / factor
}
