use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountType {
    Retirement,
    NonRetirement,
    TaxFree,
    Property,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CgtExemption {
    #[default]
    None,
    PrimaryResidence,
}

/// One account in the household snapshot. Property accounts carry the
/// rental/sale fields; the other types leave them at their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountInput {
    pub account_id: String,
    pub account_name: String,
    pub member_name: String,
    pub member_id: Option<String>,
    pub account_type: AccountType,
    pub current_value: f64,
    pub monthly_contribution: f64,
    pub annual_return_pct: f64,
    pub is_joint: bool,
    pub rental_income_monthly: f64,
    pub rental_start_year: Option<i32>,
    pub rental_end_year: Option<i32>,
    pub planned_sale_year: Option<i32>,
    /// Percentage of the sale value that flows back into the portfolio.
    pub sale_inclusion_pct: f64,
    pub tax_base_cost: Option<f64>,
    pub cgt_exemption_type: CgtExemption,
}

impl Default for AccountInput {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            account_name: String::new(),
            member_name: String::new(),
            member_id: None,
            account_type: AccountType::NonRetirement,
            current_value: 0.0,
            monthly_contribution: 0.0,
            annual_return_pct: 0.0,
            is_joint: false,
            rental_income_monthly: 0.0,
            rental_start_year: None,
            rental_end_year: None,
            planned_sale_year: None,
            sale_inclusion_pct: 100.0,
            tax_base_cost: None,
            cgt_exemption_type: CgtExemption::None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeInput {
    pub label: String,
    pub member_name: String,
    pub member_id: Option<String>,
    pub monthly_amount: f64,
    pub taxable_pct: f64,
    /// Inclusive bounds; `None` means unbounded on that side.
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

impl Default for IncomeInput {
    fn default() -> Self {
        Self {
            label: String::new(),
            member_name: String::new(),
            member_id: None,
            monthly_amount: 0.0,
            taxable_pct: 100.0,
            start_year: None,
            end_year: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpenseInput {
    pub label: String,
    pub monthly_amount: f64,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CapitalExpenseInput {
    pub label: String,
    pub amount: f64,
    pub start_year: i32,
    /// `None` (or zero) means a one-off expense.
    pub recurrence_interval_years: Option<u32>,
    pub recurrence_count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberConfig {
    pub member_id: String,
    pub name: String,
    /// ISO date, `YYYY-MM-DD`.
    pub date_of_birth: String,
    pub retirement_age: u32,
    /// Pre-computed: birth year + retirement age.
    pub retirement_year: i32,
}

impl MemberConfig {
    pub fn birth_year(&self) -> i32 {
        self.date_of_birth
            .get(..4)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    pub fn age_in(&self, year: i32) -> i32 {
        year - self.birth_year()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FamilySettings {
    pub reinvest_surplus_pre_retirement: bool,
    pub reinvest_surplus_post_retirement: bool,
    pub bracket_inflation_rate_pct: f64,
}

impl Default for FamilySettings {
    fn default() -> Self {
        Self {
            reinvest_surplus_pre_retirement: false,
            reinvest_surplus_post_retirement: false,
            bracket_inflation_rate_pct: 2.0,
        }
    }
}

/// Explicit per-account withdrawal priority; lower withdraws first.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalOrderEntry {
    pub account_id: String,
    pub priority: i32,
}

/// The full input contract for one projection run: plain values only,
/// assumed validated upstream.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectionConfig {
    pub accounts: Vec<AccountInput>,
    pub income: Vec<IncomeInput>,
    pub expenses: Vec<ExpenseInput>,
    pub capital_expenses: Vec<CapitalExpenseInput>,
    pub current_year: i32,
    pub target_year: i32,
    pub inflation_rate_pct: f64,
    pub members: Vec<MemberConfig>,
    pub withdrawal_order: Vec<WithdrawalOrderEntry>,
    pub settings: FamilySettings,
}

/// The engine's two operating modes, made explicit so the behavioral branch
/// is a visible, testable choice. The wire contract stays the permissive one
/// (an empty member list means legacy), but engine code branches on this
/// enum, never on `members.is_empty()`.
#[derive(Copy, Clone, Debug)]
pub enum ProjectionMode<'a> {
    /// Pure growth/income/expense projection: no tax, no withdrawals, no
    /// surplus reinvestment.
    Legacy,
    Household {
        members: &'a [MemberConfig],
        withdrawal_order: &'a [WithdrawalOrderEntry],
        settings: &'a FamilySettings,
    },
}

impl ProjectionConfig {
    pub fn mode(&self) -> ProjectionMode<'_> {
        if self.members.is_empty() {
            ProjectionMode::Legacy
        } else {
            ProjectionMode::Household {
                members: &self.members,
                withdrawal_order: &self.withdrawal_order,
                settings: &self.settings,
            }
        }
    }
}

/* ── Output types ────────────────────────────────────── */

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberYearTax {
    pub member_id: String,
    pub name: String,
    pub age: i32,
    pub gross_income: f64,
    pub taxable_income: f64,
    pub net_tax: f64,
    pub effective_rate: f64,
    pub marginal_rate: f64,
    pub monthly_tax: f64,
    pub cgt_payable: f64,
    pub capital_gains: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountYearDetail {
    pub account_id: String,
    pub account_name: String,
    pub account_type: AccountType,
    pub opening: f64,
    pub contributions: f64,
    pub growth: f64,
    pub withdrawal: f64,
    pub closing: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalDetail {
    pub account_id: String,
    pub account_name: String,
    pub account_type: AccountType,
    pub amount: f64,
    /// Whether this withdrawal creates additional taxable income.
    pub is_taxable: bool,
}

/// One immutable row per simulated year. Currency fields are rounded to
/// whole units; the `accounts` map keeps the raw running values so the next
/// year (and any downstream consumer) sees the exact state.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionYearResult {
    pub year: i32,
    pub total: f64,
    pub accounts: BTreeMap<String, f64>,
    pub total_income: f64,
    pub total_expenses: f64,
    pub capital_expense_total: f64,
    pub net_cash_flow: f64,
    pub property_sale_proceeds: f64,
    pub rental_income: f64,
    pub joint_rental_income: f64,
    pub member_tax: Vec<MemberYearTax>,
    pub household_tax: f64,
    pub household_cgt: f64,
    pub property_sale_cgt: f64,
    pub account_details: Vec<AccountYearDetail>,
    pub withdrawal_details: Vec<WithdrawalDetail>,
    pub gross_cash_flow: f64,
    pub deficit: f64,
    pub surplus_reinvested: f64,
    pub is_fully_retired: bool,
    pub is_partially_retired: bool,
    pub retired_member_ids: Vec<String>,
    pub depleted_account_ids: Vec<String>,
    pub portfolio_depleted: bool,
}
