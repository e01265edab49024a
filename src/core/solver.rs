use std::collections::{HashMap, HashSet};

use super::tax::{CgtOptions, calculate_cgt, calculate_income_tax, inflate_cgt_exclusion};
use super::types::{AccountInput, AccountType, WithdrawalDetail, WithdrawalOrderEntry};

/// Hard cap on the fixed-point refinement loop. Convergence is expected in
/// a few iterations because the marginal rate is bounded at 45%, so each
/// correction shrinks geometrically.
pub const MAX_ITERATIONS: u32 = 10;

/// Stop once the combined additional tax + CGT moves by less than this many
/// currency units between iterations.
pub const CONVERGENCE_THRESHOLD: f64 = 100.0;

/// Everything the solver needs besides the mutable running state: the
/// deficit to cover, the ordering policy, and the per-member tax context
/// already established earlier in the year.
#[derive(Debug)]
pub struct WithdrawalSolverInput<'a> {
    /// Absolute cash shortfall to cover (positive).
    pub deficit: f64,
    pub accounts: &'a [AccountInput],
    /// Explicit priorities; empty falls back to the default type ordering.
    pub withdrawal_order: &'a [WithdrawalOrderEntry],
    /// Taxable income per member before any withdrawal.
    pub base_taxable_by_member: &'a HashMap<String, f64>,
    pub member_ages: &'a HashMap<String, i32>,
    pub years_from_base: u32,
    pub bracket_inflation_rate_pct: f64,
    /// account id -> owning member id.
    pub account_owners: &'a HashMap<String, String>,
    /// Annual CGT exclusion already consumed per member earlier this year
    /// (property sales); the solver only spends what remains.
    pub cgt_exclusion_used: &'a HashMap<String, f64>,
}

#[derive(Debug)]
pub struct WithdrawalSolverResult {
    pub withdrawals: Vec<WithdrawalDetail>,
    /// Additional income tax created by retirement-account withdrawals.
    pub additional_tax: f64,
    /// CGT created by capital gains realized on non-retirement withdrawals.
    pub additional_cgt: f64,
    pub total_withdrawn: f64,
    pub depleted_account_ids: Vec<String>,
    /// All funds exhausted with the deficit still uncovered.
    pub portfolio_depleted: bool,
}

/// Default type ordering: cheapest tax consequences first.
fn default_type_priority(account_type: AccountType) -> i32 {
    match account_type {
        AccountType::TaxFree => 1,
        AccountType::NonRetirement => 2,
        AccountType::Property => 3,
        AccountType::Retirement => 4,
    }
}

fn build_ordered_accounts<'a>(
    accounts: &'a [AccountInput],
    withdrawal_order: &[WithdrawalOrderEntry],
    values: &HashMap<String, f64>,
    sold_properties: &HashSet<String>,
) -> Vec<&'a AccountInput> {
    let mut available: Vec<&AccountInput> = accounts
        .iter()
        .filter(|a| {
            values.get(&a.account_id).copied().unwrap_or(0.0) > 0.0
                && !sold_properties.contains(&a.account_id)
        })
        .collect();

    if withdrawal_order.is_empty() {
        available.sort_by_key(|a| default_type_priority(a.account_type));
    } else {
        let explicit: HashMap<&str, i32> = withdrawal_order
            .iter()
            .map(|w| (w.account_id.as_str(), w.priority))
            .collect();
        available.sort_by_key(|a| explicit.get(a.account_id.as_str()).copied().unwrap_or(999));
    }
    available
}

struct WithdrawPass {
    withdrawn: f64,
    details: Vec<WithdrawalDetail>,
    /// Realized capital gain per non-retirement account drawn from.
    realized_gains: Vec<(String, f64)>,
}

/// One pass down the ordered accounts. Non-retirement draws realize a
/// proportional share of the unrealized gain and shrink the cost basis by
/// the same proportion.
fn withdraw_pass(
    amount: f64,
    ordered: &[&AccountInput],
    values: &mut HashMap<String, f64>,
    cost_basis: &mut HashMap<String, f64>,
) -> WithdrawPass {
    let mut remaining = amount;
    let mut details = Vec::new();
    let mut realized_gains = Vec::new();

    for acc in ordered {
        if remaining <= 0.0 {
            break;
        }
        let available = values.get(&acc.account_id).copied().unwrap_or(0.0);
        if available <= 0.0 {
            continue;
        }

        let take = remaining.min(available);
        *values.entry(acc.account_id.clone()).or_insert(0.0) -= take;
        remaining -= take;

        if acc.account_type == AccountType::NonRetirement {
            let basis = cost_basis.get(&acc.account_id).copied().unwrap_or(0.0);
            let gain = take * (1.0 - basis / available).max(0.0);
            if gain > 0.0 {
                realized_gains.push((acc.account_id.clone(), gain));
            }
            cost_basis.insert(acc.account_id.clone(), basis * (1.0 - take / available));
        }

        details.push(WithdrawalDetail {
            account_id: acc.account_id.clone(),
            account_name: acc.account_name.clone(),
            account_type: acc.account_type,
            amount: take,
            is_taxable: acc.account_type == AccountType::Retirement,
        });
    }

    WithdrawPass {
        withdrawn: amount - remaining,
        details,
        realized_gains,
    }
}

/// Resolve the withdrawal <-> tax fixed point for one deficit year.
///
/// Each iteration re-simulates the whole withdrawal from the pre-withdrawal
/// snapshot rather than patching the previous pass, so approximation error
/// never compounds. `values` and `cost_basis` are left in the state of the
/// final pass.
pub fn solve_withdrawals(
    input: &WithdrawalSolverInput<'_>,
    values: &mut HashMap<String, f64>,
    cost_basis: &mut HashMap<String, f64>,
    sold_properties: &HashSet<String>,
) -> WithdrawalSolverResult {
    if input.deficit <= 0.0 {
        return WithdrawalSolverResult {
            withdrawals: Vec::new(),
            additional_tax: 0.0,
            additional_cgt: 0.0,
            total_withdrawn: 0.0,
            depleted_account_ids: Vec::new(),
            portfolio_depleted: false,
        };
    }

    let snapshot_values = values.clone();
    let snapshot_basis = cost_basis.clone();
    let bracket_rate = input.bracket_inflation_rate_pct / 100.0;

    let mut additional_tax = 0.0;
    let mut additional_cgt = 0.0;
    let mut final_details: Vec<WithdrawalDetail> = Vec::new();
    let mut portfolio_depleted = false;

    for _ in 0..MAX_ITERATIONS {
        values.clone_from(&snapshot_values);
        cost_basis.clone_from(&snapshot_basis);

        let ordered =
            build_ordered_accounts(input.accounts, input.withdrawal_order, values, sold_properties);

        let needed = input.deficit + additional_tax + additional_cgt;
        let pass = withdraw_pass(needed, &ordered, values, cost_basis);

        if pass.withdrawn + 1e-6 < needed {
            portfolio_depleted = true;
        }

        // Taxable retirement income and realized gains, grouped per member.
        let mut retirement_by_member: HashMap<&str, f64> = HashMap::new();
        for detail in &pass.details {
            if detail.is_taxable {
                if let Some(member_id) = input.account_owners.get(&detail.account_id) {
                    *retirement_by_member.entry(member_id.as_str()).or_insert(0.0) +=
                        detail.amount;
                }
            }
        }
        let mut gains_by_member: HashMap<&str, f64> = HashMap::new();
        for (account_id, gain) in &pass.realized_gains {
            if let Some(member_id) = input.account_owners.get(account_id) {
                *gains_by_member.entry(member_id.as_str()).or_insert(0.0) += gain;
            }
        }
        final_details = pass.details;

        // Incremental income tax: tax(base + withdrawal) - tax(base).
        let mut member_ids: Vec<&str> = retirement_by_member
            .keys()
            .chain(gains_by_member.keys())
            .copied()
            .collect();
        member_ids.sort_unstable();
        member_ids.dedup();

        let mut new_tax = 0.0;
        let mut new_cgt = 0.0;
        for member_id in member_ids {
            let base_taxable = input
                .base_taxable_by_member
                .get(member_id)
                .copied()
                .unwrap_or(0.0);
            let age = input.member_ages.get(member_id).copied().unwrap_or(65);
            let withdrawn = retirement_by_member.get(member_id).copied().unwrap_or(0.0);

            let base = calculate_income_tax(base_taxable, age, input.years_from_base, bracket_rate);
            let with_withdrawal = calculate_income_tax(
                base_taxable + withdrawn,
                age,
                input.years_from_base,
                bracket_rate,
            );
            new_tax += (with_withdrawal.net_tax - base.net_tax).max(0.0);

            if let Some(gain) = gains_by_member.get(member_id) {
                let used = input
                    .cgt_exclusion_used
                    .get(member_id)
                    .copied()
                    .unwrap_or(0.0);
                let remaining =
                    (inflate_cgt_exclusion(input.years_from_base, bracket_rate) - used).max(0.0);
                new_cgt += calculate_cgt(
                    *gain,
                    with_withdrawal.marginal_rate,
                    CgtOptions {
                        remaining_annual_exclusion: remaining,
                        primary_residence_exclusion: 0.0,
                    },
                )
                .tax;
            }
        }

        let delta = ((new_tax + new_cgt) - (additional_tax + additional_cgt)).abs();
        additional_tax = new_tax;
        additional_cgt = new_cgt;

        if delta < CONVERGENCE_THRESHOLD || portfolio_depleted {
            break;
        }
    }

    let mut depleted_account_ids = Vec::new();
    for acc in input.accounts {
        let started = snapshot_values.get(&acc.account_id).copied().unwrap_or(0.0);
        let ended = values.get(&acc.account_id).copied().unwrap_or(0.0);
        if started > 0.0 && ended <= 0.0 && !sold_properties.contains(&acc.account_id) {
            depleted_account_ids.push(acc.account_id.clone());
        }
    }

    WithdrawalSolverResult {
        total_withdrawn: final_details.iter().map(|d| d.amount).sum(),
        withdrawals: final_details,
        additional_tax: additional_tax.round(),
        additional_cgt: additional_cgt.round(),
        depleted_account_ids,
        portfolio_depleted,
    }
}
