use std::collections::{BTreeMap, HashMap, HashSet};

use super::growth::{capital_expense_for_year, compound_growth, distribute_to_accounts};
use super::solver::{WithdrawalSolverInput, solve_withdrawals};
use super::tax::{
    CgtOptions, PRIMARY_RESIDENCE_EXCLUSION, calculate_cgt, calculate_income_tax,
    inflate_cgt_exclusion,
};
use super::types::{
    AccountInput, AccountType, AccountYearDetail, CgtExemption, FamilySettings, MemberConfig,
    MemberYearTax, ProjectionConfig, ProjectionMode, ProjectionYearResult, WithdrawalDetail,
    WithdrawalOrderEntry,
};

/// Mutable simulation state threaded through the year loop. Values carry
/// full precision between years; rounding happens only at the result edge.
struct SimState {
    values: HashMap<String, f64>,
    cost_basis: HashMap<String, f64>,
    sold_properties: HashSet<String>,
}

impl SimState {
    fn new(accounts: &[AccountInput]) -> Self {
        let mut values = HashMap::new();
        let mut cost_basis = HashMap::new();
        for acc in accounts {
            values.insert(acc.account_id.clone(), acc.current_value);
            if matches!(
                acc.account_type,
                AccountType::NonRetirement | AccountType::Property
            ) {
                cost_basis.insert(
                    acc.account_id.clone(),
                    acc.tax_base_cost.unwrap_or(acc.current_value * 0.5),
                );
            }
        }
        Self {
            values,
            cost_basis,
            sold_properties: HashSet::new(),
        }
    }

    fn value(&self, account_id: &str) -> f64 {
        self.values.get(account_id).copied().unwrap_or(0.0)
    }
}

/// Household-mode lookups, built once per run.
struct HouseholdContext<'a> {
    members: &'a [MemberConfig],
    withdrawal_order: &'a [WithdrawalOrderEntry],
    settings: &'a FamilySettings,
    /// account id -> owning member id.
    account_owners: HashMap<String, String>,
    member_name_to_id: HashMap<String, String>,
}

impl<'a> HouseholdContext<'a> {
    fn new(
        accounts: &[AccountInput],
        members: &'a [MemberConfig],
        withdrawal_order: &'a [WithdrawalOrderEntry],
        settings: &'a FamilySettings,
    ) -> Self {
        let account_owners = accounts
            .iter()
            .filter_map(|a| Some((a.account_id.clone(), a.member_id.clone()?)))
            .collect();
        let member_name_to_id = members
            .iter()
            .map(|m| (m.name.clone(), m.member_id.clone()))
            .collect();
        Self {
            members,
            withdrawal_order,
            settings,
            account_owners,
            member_name_to_id,
        }
    }

    /// Income/rental rows name their owner either by id or display name.
    fn resolve_member(&self, member_id: &Option<String>, member_name: &str) -> Option<String> {
        member_id
            .clone()
            .or_else(|| self.member_name_to_id.get(member_name).cloned())
    }
}

struct SaleEvent {
    account_id: String,
    capital_gain: f64,
    member_id: Option<String>,
    is_primary_residence: bool,
}

fn active_in_year(start: Option<i32>, end: Option<i32>, year: i32) -> bool {
    start.is_none_or(|s| year >= s) && end.is_none_or(|e| year <= e)
}

/// Run the projection year by year from `current_year` through `target_year`
/// inclusive, producing one enriched result row per year.
///
/// With no members configured the run is a pure growth/income/expense
/// projection: tax, deficit withdrawals, and surplus reinvestment are all
/// skipped. With members present the full seven-phase household pipeline
/// runs each year.
pub fn run_projection(config: &ProjectionConfig) -> Vec<ProjectionYearResult> {
    let household = match config.mode() {
        ProjectionMode::Legacy => None,
        ProjectionMode::Household {
            members,
            withdrawal_order,
            settings,
        } => Some(HouseholdContext::new(
            &config.accounts,
            members,
            withdrawal_order,
            settings,
        )),
    };

    let inflation_rate = config.inflation_rate_pct / 100.0;
    let mut state = SimState::new(&config.accounts);
    let mut results = Vec::new();

    for year in config.current_year..=config.target_year {
        let years_from_now = (year - config.current_year).max(0) as u32;
        let inflation_factor = (1.0 + inflation_rate).powi(years_from_now as i32);

        let mut retired_member_ids: Vec<String> = Vec::new();
        if let Some(ctx) = &household {
            for m in ctx.members {
                if year >= m.retirement_year {
                    retired_member_ids.push(m.member_id.clone());
                }
            }
        }
        let retired_set: HashSet<&str> = retired_member_ids.iter().map(String::as_str).collect();
        let is_partially_retired = !retired_member_ids.is_empty();
        let is_fully_retired = household
            .as_ref()
            .is_some_and(|ctx| retired_member_ids.len() == ctx.members.len());

        let opening_values: HashMap<String, f64> = config
            .accounts
            .iter()
            .map(|a| (a.account_id.clone(), state.value(&a.account_id)))
            .collect();

        // Phase 1: growth, contributions, and property sale events.
        let mut property_sale_proceeds = 0.0;
        let mut contributions_by_account: HashMap<String, f64> = HashMap::new();
        let mut sale_events: Vec<SaleEvent> = Vec::new();

        for acc in &config.accounts {
            if state.sold_properties.contains(&acc.account_id) {
                contributions_by_account.insert(acc.account_id.clone(), 0.0);
                continue;
            }

            if acc.account_type == AccountType::Property {
                // Straight annual appreciation, no contributions.
                let grown = state.value(&acc.account_id) * (1.0 + acc.annual_return_pct / 100.0);
                state.values.insert(acc.account_id.clone(), grown);
                contributions_by_account.insert(acc.account_id.clone(), 0.0);

                if acc.planned_sale_year == Some(year) {
                    let sale_value = state.value(&acc.account_id);
                    let basis = state.cost_basis.get(&acc.account_id).copied().unwrap_or(0.0);
                    sale_events.push(SaleEvent {
                        account_id: acc.account_id.clone(),
                        capital_gain: (sale_value - basis).max(0.0),
                        member_id: household
                            .as_ref()
                            .and_then(|ctx| ctx.account_owners.get(&acc.account_id).cloned()),
                        is_primary_residence: acc.cgt_exemption_type
                            == CgtExemption::PrimaryResidence,
                    });
                    property_sale_proceeds += sale_value * acc.sale_inclusion_pct / 100.0;
                    state.values.insert(acc.account_id.clone(), 0.0);
                    state.cost_basis.insert(acc.account_id.clone(), 0.0);
                    state.sold_properties.insert(acc.account_id.clone());
                }
            } else {
                // Retired owners stop contributing.
                let mut monthly_contribution = acc.monthly_contribution;
                if household.is_some()
                    && acc
                        .member_id
                        .as_deref()
                        .is_some_and(|m| retired_set.contains(m))
                {
                    monthly_contribution = 0.0;
                }

                contributions_by_account
                    .insert(acc.account_id.clone(), monthly_contribution * 12.0);
                let grown = compound_growth(
                    state.value(&acc.account_id),
                    monthly_contribution,
                    acc.annual_return_pct,
                );
                state.values.insert(acc.account_id.clone(), grown);

                // Contributions to taxable accounts raise the cost basis.
                if acc.account_type == AccountType::NonRetirement {
                    *state.cost_basis.entry(acc.account_id.clone()).or_insert(0.0) +=
                        monthly_contribution * 12.0;
                }
            }
        }

        // Phase 2: sale proceeds flow back into the remaining portfolio.
        if property_sale_proceeds > 0.0 {
            distribute_to_accounts(
                property_sale_proceeds,
                &config.accounts,
                &mut state.values,
                &state.sold_properties,
                None,
            );
        }

        // Phase 3: income and expenses for the year, inflated from base.
        let mut rental_income_total = 0.0;
        let mut joint_rental_income_total = 0.0;
        for acc in &config.accounts {
            if acc.account_type == AccountType::Property
                && acc.rental_income_monthly > 0.0
                && !state.sold_properties.contains(&acc.account_id)
                && active_in_year(acc.rental_start_year, acc.rental_end_year, year)
            {
                let amount = acc.rental_income_monthly * 12.0 * inflation_factor;
                rental_income_total += amount;
                if acc.is_joint {
                    joint_rental_income_total += amount;
                }
            }
        }

        let mut total_income = rental_income_total;
        for inc in &config.income {
            if active_in_year(inc.start_year, inc.end_year, year) {
                total_income += inc.monthly_amount * 12.0 * inflation_factor;
            }
        }

        let mut total_expenses = 0.0;
        for exp in &config.expenses {
            if active_in_year(exp.start_year, exp.end_year, year) {
                total_expenses += exp.monthly_amount * 12.0 * inflation_factor;
            }
        }

        let mut capital_expense_total = 0.0;
        for ce in &config.capital_expenses {
            let base_amount = capital_expense_for_year(ce, year);
            if base_amount > 0.0 {
                capital_expense_total += base_amount * inflation_factor;
            }
        }

        let gross_cash_flow = total_income - total_expenses - capital_expense_total;

        // Phase 4: per-member income tax, then CGT on this year's sales.
        let mut member_tax: Vec<MemberYearTax> = Vec::new();
        let mut household_tax = 0.0;
        let mut property_sale_cgt_total = 0.0;
        let mut cgt_exclusion_used: HashMap<String, f64> = HashMap::new();
        let mut net_cash_flow = gross_cash_flow;

        if let Some(ctx) = &household {
            let bracket_rate = ctx.settings.bracket_inflation_rate_pct / 100.0;

            let mut gross_by_member: HashMap<&str, f64> = HashMap::new();
            let mut taxable_by_member: HashMap<&str, f64> = HashMap::new();
            for m in ctx.members {
                gross_by_member.insert(m.member_id.as_str(), 0.0);
                taxable_by_member.insert(m.member_id.as_str(), 0.0);
            }

            for inc in &config.income {
                if !active_in_year(inc.start_year, inc.end_year, year) {
                    continue;
                }
                let annual = inc.monthly_amount * 12.0 * inflation_factor;
                let taxable = annual * inc.taxable_pct / 100.0;
                if let Some(member_id) = ctx.resolve_member(&inc.member_id, &inc.member_name) {
                    if let Some(gross) = gross_by_member.get_mut(member_id.as_str()) {
                        *gross += annual;
                    }
                    if let Some(sum) = taxable_by_member.get_mut(member_id.as_str()) {
                        *sum += taxable;
                    }
                }
            }

            for acc in &config.accounts {
                if acc.account_type != AccountType::Property
                    || acc.rental_income_monthly <= 0.0
                    || state.sold_properties.contains(&acc.account_id)
                    || !active_in_year(acc.rental_start_year, acc.rental_end_year, year)
                {
                    continue;
                }
                let annual = acc.rental_income_monthly * 12.0 * inflation_factor;

                if acc.is_joint && ctx.members.len() > 1 {
                    let share = annual / ctx.members.len() as f64;
                    for m in ctx.members {
                        if let Some(gross) = gross_by_member.get_mut(m.member_id.as_str()) {
                            *gross += share;
                        }
                        if let Some(sum) = taxable_by_member.get_mut(m.member_id.as_str()) {
                            *sum += share;
                        }
                    }
                } else if let Some(member_id) =
                    ctx.resolve_member(&acc.member_id, &acc.member_name)
                {
                    if let Some(gross) = gross_by_member.get_mut(member_id.as_str()) {
                        *gross += annual;
                    }
                    if let Some(sum) = taxable_by_member.get_mut(member_id.as_str()) {
                        *sum += annual;
                    }
                }
            }

            for m in ctx.members {
                let age = m.age_in(year);
                let taxable = taxable_by_member
                    .get(m.member_id.as_str())
                    .copied()
                    .unwrap_or(0.0);
                let tax = calculate_income_tax(taxable, age, years_from_now, bracket_rate);
                member_tax.push(MemberYearTax {
                    member_id: m.member_id.clone(),
                    name: m.name.clone(),
                    age,
                    gross_income: gross_by_member
                        .get(m.member_id.as_str())
                        .copied()
                        .unwrap_or(0.0)
                        .round(),
                    taxable_income: taxable.round(),
                    net_tax: tax.net_tax,
                    effective_rate: tax.effective_rate,
                    marginal_rate: tax.marginal_rate,
                    monthly_tax: tax.monthly_tax,
                    cgt_payable: 0.0,
                    capital_gains: 0.0,
                });
            }
            household_tax = member_tax.iter().map(|t| t.net_tax).sum();

            // Phase 4b: CGT on property sales, sharing the annual exclusion
            // per member across this year's events.
            for sale in &sale_events {
                let Some(member_id) = &sale.member_id else {
                    continue;
                };
                let marginal_rate = member_tax
                    .iter()
                    .find(|t| &t.member_id == member_id)
                    .map_or(36.0, |t| t.marginal_rate);
                let used_so_far = cgt_exclusion_used.get(member_id).copied().unwrap_or(0.0);
                let remaining =
                    (inflate_cgt_exclusion(years_from_now, bracket_rate) - used_so_far).max(0.0);

                let cgt = calculate_cgt(
                    sale.capital_gain,
                    marginal_rate,
                    CgtOptions {
                        remaining_annual_exclusion: remaining,
                        primary_residence_exclusion: if sale.is_primary_residence {
                            PRIMARY_RESIDENCE_EXCLUSION
                        } else {
                            0.0
                        },
                    },
                );
                cgt_exclusion_used.insert(member_id.clone(), used_so_far + cgt.exclusion_used);
                property_sale_cgt_total += cgt.tax;
                if let Some(row) = member_tax.iter_mut().find(|t| &t.member_id == member_id) {
                    row.cgt_payable += cgt.tax;
                    row.capital_gains += sale.capital_gain;
                }
            }
            household_tax += property_sale_cgt_total;
            net_cash_flow = gross_cash_flow - household_tax;
        }

        // Phase 5: deficit withdrawals once anyone is retired.
        let mut withdrawal_details: Vec<WithdrawalDetail> = Vec::new();
        let mut deficit = 0.0;
        let mut portfolio_depleted = false;
        let mut withdrawal_cgt = 0.0;

        if let Some(ctx) = &household {
            if is_partially_retired && net_cash_flow < 0.0 {
                deficit = net_cash_flow.abs();

                let mut base_taxable_by_member: HashMap<String, f64> = HashMap::new();
                let mut member_ages: HashMap<String, i32> = HashMap::new();
                for row in &member_tax {
                    base_taxable_by_member.insert(row.member_id.clone(), row.taxable_income);
                    member_ages.insert(row.member_id.clone(), row.age);
                }

                let input = WithdrawalSolverInput {
                    deficit,
                    accounts: &config.accounts,
                    withdrawal_order: ctx.withdrawal_order,
                    base_taxable_by_member: &base_taxable_by_member,
                    member_ages: &member_ages,
                    years_from_base: years_from_now,
                    bracket_inflation_rate_pct: ctx.settings.bracket_inflation_rate_pct,
                    account_owners: &ctx.account_owners,
                    cgt_exclusion_used: &cgt_exclusion_used,
                };
                let result = solve_withdrawals(
                    &input,
                    &mut state.values,
                    &mut state.cost_basis,
                    &state.sold_properties,
                );

                withdrawal_details = result.withdrawals;
                portfolio_depleted = result.portfolio_depleted;
                withdrawal_cgt = result.additional_cgt;

                let additional = result.additional_tax + result.additional_cgt;
                if additional > 0.0 {
                    household_tax += additional;
                    net_cash_flow -= additional;
                }
            }
        }

        // Phase 6: reinvest any remaining surplus when configured to.
        let mut surplus_reinvested = 0.0;
        if let Some(ctx) = &household {
            if net_cash_flow > 0.0 {
                let should_reinvest = if is_partially_retired {
                    ctx.settings.reinvest_surplus_post_retirement
                } else {
                    ctx.settings.reinvest_surplus_pre_retirement
                };
                if should_reinvest {
                    surplus_reinvested = net_cash_flow;
                    distribute_to_accounts(
                        surplus_reinvested,
                        &config.accounts,
                        &mut state.values,
                        &state.sold_properties,
                        None,
                    );
                }
            }
        }

        // Phase 7: assemble the year row. Currency fields round to whole
        // units; the accounts map keeps the raw running balances.
        let total: f64 = state.values.values().sum();

        let account_details: Vec<AccountYearDetail> = config
            .accounts
            .iter()
            .map(|acc| {
                let opening = opening_values
                    .get(&acc.account_id)
                    .copied()
                    .unwrap_or(0.0)
                    .round();
                let closing = state.value(&acc.account_id).round();
                let contributions = contributions_by_account
                    .get(&acc.account_id)
                    .copied()
                    .unwrap_or(0.0)
                    .round();
                let withdrawal: f64 = withdrawal_details
                    .iter()
                    .filter(|w| w.account_id == acc.account_id)
                    .map(|w| w.amount)
                    .sum::<f64>()
                    .round();
                AccountYearDetail {
                    account_id: acc.account_id.clone(),
                    account_name: acc.account_name.clone(),
                    account_type: acc.account_type,
                    opening,
                    contributions,
                    growth: closing - opening - contributions + withdrawal,
                    withdrawal,
                    closing,
                }
            })
            .collect();

        let depleted_account_ids: Vec<String> = config
            .accounts
            .iter()
            .filter(|acc| {
                state.value(&acc.account_id) <= 0.0
                    && !state.sold_properties.contains(&acc.account_id)
            })
            .map(|acc| acc.account_id.clone())
            .collect();

        results.push(ProjectionYearResult {
            year,
            total: total.round(),
            accounts: state
                .values
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect::<BTreeMap<String, f64>>(),
            total_income: total_income.round(),
            total_expenses: total_expenses.round(),
            capital_expense_total: capital_expense_total.round(),
            net_cash_flow: net_cash_flow.round(),
            property_sale_proceeds: property_sale_proceeds.round(),
            rental_income: rental_income_total.round(),
            joint_rental_income: joint_rental_income_total.round(),
            member_tax,
            household_tax: household_tax.round(),
            household_cgt: (property_sale_cgt_total + withdrawal_cgt).round(),
            property_sale_cgt: property_sale_cgt_total.round(),
            account_details,
            withdrawal_details,
            gross_cash_flow: gross_cash_flow.round(),
            deficit: deficit.round(),
            surplus_reinvested: surplus_reinvested.round(),
            is_fully_retired,
            is_partially_retired,
            retired_member_ids,
            depleted_account_ids,
            portfolio_depleted,
        });
    }

    results
}
