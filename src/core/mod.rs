mod engine;
mod growth;
mod solver;
mod tax;
mod types;

pub use engine::run_projection;
pub use growth::{
    capital_expense_for_year, compound_growth, distribute_to_accounts, weighted_average_return,
};
pub use solver::{
    CONVERGENCE_THRESHOLD, MAX_ITERATIONS, WithdrawalSolverInput, WithdrawalSolverResult,
    solve_withdrawals,
};
pub use tax::{
    CGT_ANNUAL_EXCLUSION, CGT_INCLUSION_RATE, CgtOptions, CgtResult, IncomeTaxResult,
    PRIMARY_RESIDENCE_EXCLUSION, REBATES, TAX_BRACKETS, TaxBracket, TaxRebates, calculate_cgt,
    calculate_income_tax, inflate_cgt_exclusion,
};
pub use types::{
    AccountInput, AccountType, AccountYearDetail, CapitalExpenseInput, CgtExemption, ExpenseInput,
    FamilySettings, IncomeInput, MemberConfig, MemberYearTax, ProjectionConfig, ProjectionMode,
    ProjectionYearResult, WithdrawalDetail, WithdrawalOrderEntry,
};
