//! Derived-field computation for indicators.
//!
//! Everything here is pure: the store loads rows, calls [`derive`] and
//! writes the result back. Absent values never count toward an average and
//! an aggregate over no present values is absent rather than zero.

use crate::models::{
    AggregationMethod, MonthlyValues, QuarterlyValues, ValueKind, MONTHS_PER_YEAR, QUARTERS_PER_YEAR,
};

/// Zero-based month indices making up each quarter.
pub const QUARTER_MONTHS: [[usize; 3]; QUARTERS_PER_YEAR] = [[0, 1, 2], [3, 4, 5], [6, 7, 8], [9, 10, 11]];

/// Short month keys, used for column names and CLI output.
pub const MONTH_KEYS: [&str; MONTHS_PER_YEAR] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedValues {
    pub monthly: MonthlyValues,
    pub quarterly: QuarterlyValues,
    pub year_to_date: Option<f64>,
}

pub fn aggregate<I>(method: AggregationMethod, values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut total = 0.0;
    let mut count = 0usize;
    for value in values.into_iter().flatten() {
        total += value;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(match method {
        AggregationMethod::Average => total / count as f64,
        AggregationMethod::Sum => total,
    })
}

/// Each of the 24 monthly fields becomes the aggregate of that field across children.
pub fn aggregate_children(method: AggregationMethod, children: &[MonthlyValues]) -> MonthlyValues {
    let mut out = MonthlyValues::default();
    for kind in ValueKind::ALL {
        for month in 0..MONTHS_PER_YEAR {
            out.series_mut(kind)[month] = aggregate(method, children.iter().map(|child| child.series(kind)[month]));
        }
    }
    out
}

pub fn quarters_from_months(method: AggregationMethod, monthly: &MonthlyValues) -> QuarterlyValues {
    let mut out = QuarterlyValues::default();
    for kind in ValueKind::ALL {
        let series = monthly.series(kind);
        for (quarter, months) in QUARTER_MONTHS.iter().enumerate() {
            out.series_mut(kind)[quarter] = aggregate(method, months.iter().map(|&month| series[month]));
        }
    }
    out
}

pub fn year_to_date(method: AggregationMethod, monthly: &MonthlyValues) -> Option<f64> {
    aggregate(method, monthly.result.iter().copied()).map(round_to_cents)
}

/// Quarters only need recomputing for new rows or when months or the method moved.
pub fn needs_quarter_recalc(
    previous: Option<(&MonthlyValues, AggregationMethod)>,
    monthly: &MonthlyValues,
    method: AggregationMethod,
) -> bool {
    match previous {
        None => true,
        Some((stored, stored_method)) => stored != monthly || stored_method != method,
    }
}

/// Recomputes every derived field of one indicator.
///
/// `children` holds the monthly values of the direct children; when it is
/// non-empty the incoming months are discarded in favour of the children's
/// aggregate and quarters are always recomputed.
pub fn derive(
    method: AggregationMethod,
    monthly: MonthlyValues,
    stored_quarterly: QuarterlyValues,
    children: &[MonthlyValues],
    recalc_quarters: bool,
) -> DerivedValues {
    let (monthly, recalc_quarters) = if children.is_empty() {
        (monthly, recalc_quarters)
    } else {
        (aggregate_children(method, children), true)
    };
    let quarterly = if recalc_quarters {
        quarters_from_months(method, &monthly)
    } else {
        stored_quarterly
    };
    DerivedValues {
        monthly,
        quarterly,
        year_to_date: year_to_date(method, &monthly),
    }
}

/// Two decimals, halves to even.
fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
