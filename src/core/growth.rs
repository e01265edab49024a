use std::collections::{HashMap, HashSet};

use super::types::{AccountInput, AccountType, CapitalExpenseInput};

/// Monthly-compounding growth for one year.
///
///   monthly = (1 + annual)^(1/12) - 1
///   FV = PV * (1 + monthly)^12 + PMT * ((1 + monthly)^12 - 1) / monthly
///
/// A zero net rate degenerates to straight contribution accumulation.
pub fn compound_growth(pv: f64, monthly_contribution: f64, annual_return_pct: f64) -> f64 {
    let net_rate = annual_return_pct / 100.0;
    if net_rate == 0.0 {
        return pv + monthly_contribution * 12.0;
    }
    let monthly_rate = (1.0 + net_rate).powf(1.0 / 12.0) - 1.0;
    let growth_factor = (1.0 + monthly_rate).powi(12);
    pv * growth_factor + monthly_contribution * ((growth_factor - 1.0) / monthly_rate)
}

/// Amount a capital expense contributes in `year`: a one-off fires only in
/// its start year; a recurring expense fires at start + k * interval for
/// k in [0, recurrence_count).
pub fn capital_expense_for_year(expense: &CapitalExpenseInput, year: i32) -> f64 {
    if year < expense.start_year {
        return 0.0;
    }
    let Some(interval) = expense.recurrence_interval_years.filter(|i| *i > 0) else {
        return if year == expense.start_year {
            expense.amount
        } else {
            0.0
        };
    };
    let diff = (year - expense.start_year) as u32;
    if diff % interval != 0 {
        return 0.0;
    }
    if diff / interval >= expense.recurrence_count {
        return 0.0;
    }
    expense.amount
}

/// Distribute a lump sum (sale proceeds, reinvested surplus) across
/// accounts: proportionally by balance over unsold non-retirement accounts,
/// falling back to an equal split over any unsold non-property account.
pub fn distribute_to_accounts(
    amount: f64,
    accounts: &[AccountInput],
    values: &mut HashMap<String, f64>,
    sold_properties: &HashSet<String>,
    exclude: Option<&HashSet<String>>,
) {
    if amount <= 0.0 {
        return;
    }

    let skipped = |acc: &AccountInput| {
        sold_properties.contains(&acc.account_id)
            || exclude.is_some_and(|e| e.contains(&acc.account_id))
    };

    let non_retirement: Vec<&AccountInput> = accounts
        .iter()
        .filter(|a| a.account_type == AccountType::NonRetirement && !skipped(a))
        .collect();

    if !non_retirement.is_empty() {
        let total_value: f64 = non_retirement
            .iter()
            .map(|a| values.get(&a.account_id).copied().unwrap_or(0.0))
            .sum();
        for acc in &non_retirement {
            let balance = values.get(&acc.account_id).copied().unwrap_or(0.0);
            let weight = if total_value > 0.0 {
                balance / total_value
            } else {
                1.0 / non_retirement.len() as f64
            };
            *values.entry(acc.account_id.clone()).or_insert(0.0) += amount * weight;
        }
        return;
    }

    let others: Vec<&AccountInput> = accounts
        .iter()
        .filter(|a| a.account_type != AccountType::Property && !skipped(a))
        .collect();

    if !others.is_empty() {
        let share = amount / others.len() as f64;
        for acc in &others {
            *values.entry(acc.account_id.clone()).or_insert(0.0) += share;
        }
    }
}

/// Value-weighted average annual return across accounts, two decimals.
pub fn weighted_average_return(accounts: &[AccountInput]) -> f64 {
    let total_value: f64 = accounts.iter().map(|a| a.current_value).sum();
    if total_value == 0.0 {
        return 0.0;
    }
    let weighted: f64 = accounts
        .iter()
        .map(|a| a.annual_return_pct * (a.current_value / total_value))
        .sum();
    (weighted * 100.0).round() / 100.0
}
