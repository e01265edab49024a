use serde::Serialize;

/// SARS 2025/2026 personal income tax schedule. The projection keeps this
/// single schedule fixed in real terms and inflates it forward by the
/// configured bracket inflation rate.
#[derive(Copy, Clone, Debug)]
pub struct TaxBracket {
    pub min: f64,
    pub max: f64,
    pub rate: f64,
    /// Cumulative tax owed at the bottom of the bracket.
    pub base: f64,
}

#[derive(Copy, Clone, Debug)]
pub struct TaxRebates {
    pub primary: f64,
    /// Age >= 65.
    pub secondary: f64,
    /// Age >= 75.
    pub tertiary: f64,
}

pub const TAX_BRACKETS: [TaxBracket; 7] = [
    TaxBracket { min: 0.0, max: 237_100.0, rate: 0.18, base: 0.0 },
    TaxBracket { min: 237_101.0, max: 370_500.0, rate: 0.26, base: 42_678.0 },
    TaxBracket { min: 370_501.0, max: 512_800.0, rate: 0.31, base: 77_362.0 },
    TaxBracket { min: 512_801.0, max: 673_000.0, rate: 0.36, base: 121_475.0 },
    TaxBracket { min: 673_001.0, max: 857_900.0, rate: 0.39, base: 179_147.0 },
    TaxBracket { min: 857_901.0, max: 1_817_000.0, rate: 0.41, base: 251_258.0 },
    TaxBracket { min: 1_817_001.0, max: f64::INFINITY, rate: 0.45, base: 644_489.0 },
];

pub const REBATES: TaxRebates = TaxRebates {
    primary: 17_235.0,
    secondary: 9_444.0,
    tertiary: 3_145.0,
};

pub const CGT_ANNUAL_EXCLUSION: f64 = 40_000.0;
pub const CGT_INCLUSION_RATE: f64 = 0.4;
pub const PRIMARY_RESIDENCE_EXCLUSION: f64 = 2_000_000.0;

fn inflation_factor(years: u32, rate: f64) -> f64 {
    (1.0 + rate).powi(years as i32)
}

fn inflate_brackets(years: u32, rate: f64) -> [TaxBracket; 7] {
    let factor = inflation_factor(years, rate);
    TAX_BRACKETS.map(|b| TaxBracket {
        min: (b.min * factor).round(),
        max: if b.max.is_finite() {
            (b.max * factor).round()
        } else {
            f64::INFINITY
        },
        rate: b.rate,
        base: (b.base * factor).round(),
    })
}

fn inflate_rebates(years: u32, rate: f64) -> TaxRebates {
    let factor = inflation_factor(years, rate);
    TaxRebates {
        primary: (REBATES.primary * factor).round(),
        secondary: (REBATES.secondary * factor).round(),
        tertiary: (REBATES.tertiary * factor).round(),
    }
}

/// The annual CGT exclusion grown to a future year, whole currency units.
pub fn inflate_cgt_exclusion(years: u32, rate: f64) -> f64 {
    (CGT_ANNUAL_EXCLUSION * inflation_factor(years, rate)).round()
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeTaxResult {
    pub annual_taxable_income: f64,
    pub gross_tax: f64,
    pub primary_rebate: f64,
    pub secondary_rebate: f64,
    pub tertiary_rebate: f64,
    pub total_rebates: f64,
    pub net_tax: f64,
    /// Percent, two decimals.
    pub effective_rate: f64,
    /// Percent.
    pub marginal_rate: f64,
    pub monthly_tax: f64,
}

/// Progressive income tax with age-based rebates, against the bracket table
/// inflated `years_from_base` years forward.
///
/// Within the containing bracket the tax is `base + (income - min + 1) * rate`,
/// except the lowest bracket which is plain `income * rate`. The `+1` above
/// the lowest bracket mirrors the inclusive lower bound of the published
/// schedule and is kept exactly as the schedule defines it.
pub fn calculate_income_tax(
    annual_taxable_income: f64,
    age: i32,
    years_from_base: u32,
    bracket_inflation_rate: f64,
) -> IncomeTaxResult {
    let brackets = if years_from_base > 0 {
        inflate_brackets(years_from_base, bracket_inflation_rate)
    } else {
        TAX_BRACKETS
    };
    let rebates = if years_from_base > 0 {
        inflate_rebates(years_from_base, bracket_inflation_rate)
    } else {
        REBATES
    };

    if annual_taxable_income <= 0.0 {
        return IncomeTaxResult {
            annual_taxable_income: 0.0,
            gross_tax: 0.0,
            primary_rebate: 0.0,
            secondary_rebate: 0.0,
            tertiary_rebate: 0.0,
            total_rebates: 0.0,
            net_tax: 0.0,
            effective_rate: 0.0,
            marginal_rate: brackets[0].rate * 100.0,
            monthly_tax: 0.0,
        };
    }

    let mut gross_tax = 0.0;
    let mut marginal_rate = brackets[0].rate;

    for bracket in &brackets {
        if annual_taxable_income >= bracket.min {
            marginal_rate = bracket.rate;
            if annual_taxable_income <= bracket.max {
                gross_tax = if bracket.min == 0.0 {
                    annual_taxable_income * bracket.rate
                } else {
                    bracket.base + (annual_taxable_income - bracket.min + 1.0) * bracket.rate
                };
                break;
            }
        }
    }

    let primary_rebate = rebates.primary;
    let secondary_rebate = if age >= 65 { rebates.secondary } else { 0.0 };
    let tertiary_rebate = if age >= 75 { rebates.tertiary } else { 0.0 };
    let total_rebates = primary_rebate + secondary_rebate + tertiary_rebate;

    let net_tax = (gross_tax - total_rebates).max(0.0);
    let effective_rate = net_tax / annual_taxable_income * 100.0;

    IncomeTaxResult {
        annual_taxable_income,
        gross_tax: gross_tax.round(),
        primary_rebate,
        secondary_rebate,
        tertiary_rebate,
        total_rebates,
        net_tax: net_tax.round(),
        effective_rate: (effective_rate * 100.0).round() / 100.0,
        marginal_rate: marginal_rate * 100.0,
        monthly_tax: (net_tax / 12.0).round(),
    }
}

/// Exclusions available to one gain-realization event. The annual exclusion
/// is a scarce per-member per-year budget shared across events, so callers
/// pass the remaining balance and read back `exclusion_used`.
#[derive(Copy, Clone, Debug, Default)]
pub struct CgtOptions {
    pub remaining_annual_exclusion: f64,
    pub primary_residence_exclusion: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CgtResult {
    pub capital_gain: f64,
    pub net_gain: f64,
    pub taxable_gain: f64,
    pub tax: f64,
    /// Percent, two decimals.
    pub effective_rate: f64,
    /// Annual exclusion actually consumed by this event.
    pub exclusion_used: f64,
}

/// Capital gains tax on one realized gain: primary-residence exclusion
/// first, then whatever remains of the annual exclusion, then the fixed
/// inclusion rate taxed at the supplied marginal rate.
pub fn calculate_cgt(capital_gain: f64, marginal_rate_pct: f64, options: CgtOptions) -> CgtResult {
    let gain = capital_gain.max(0.0);
    let after_primary = (gain - options.primary_residence_exclusion.max(0.0)).max(0.0);
    let exclusion_used = options.remaining_annual_exclusion.max(0.0).min(after_primary);
    let net_gain = after_primary - exclusion_used;

    let taxable_gain = (net_gain * CGT_INCLUSION_RATE).round();
    let tax = (taxable_gain * marginal_rate_pct / 100.0).round();
    let effective_rate = if gain > 0.0 {
        (tax / gain * 10_000.0).round() / 100.0
    } else {
        0.0
    };

    CgtResult {
        capital_gain: gain,
        net_gain,
        taxable_gain,
        tax,
        effective_rate,
        exclusion_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn lowest_bracket_has_no_base_offset() {
        let result = calculate_income_tax(100_000.0, 40, 0, 0.02);
        assert_approx(result.gross_tax, 18_000.0);
        assert_approx(result.net_tax, 765.0);
        assert_approx(result.marginal_rate, 18.0);
        assert_approx(result.monthly_tax, 64.0);
    }

    #[test]
    fn second_bracket_applies_base_and_plus_one_offset() {
        // 42_678 + (300_000 - 237_101 + 1) * 0.26 = 59_032
        let result = calculate_income_tax(300_000.0, 40, 0, 0.02);
        assert_approx(result.gross_tax, 59_032.0);
        assert_approx(result.net_tax, 41_797.0);
        assert_approx(result.marginal_rate, 26.0);
    }

    #[test]
    fn bracket_boundary_pair_is_continuous() {
        let below = calculate_income_tax(237_100.0, 40, 0, 0.02);
        let above = calculate_income_tax(237_101.0, 40, 0, 0.02);
        assert_approx(below.gross_tax, 42_678.0);
        // One unit into the next bracket: base + 1 * 0.26, rounded.
        assert_approx(above.gross_tax, 42_678.0);
        assert_approx(above.marginal_rate, 26.0);
    }

    #[test]
    fn age_rebates_reduce_net_tax_in_steps() {
        let at_40 = calculate_income_tax(300_000.0, 40, 0, 0.02);
        let at_65 = calculate_income_tax(300_000.0, 65, 0, 0.02);
        let at_75 = calculate_income_tax(300_000.0, 75, 0, 0.02);
        assert_approx(at_65.net_tax, at_40.net_tax - 9_444.0);
        assert_approx(at_75.net_tax, at_40.net_tax - 9_444.0 - 3_145.0);
    }

    #[test]
    fn income_at_the_tax_threshold_pays_nothing() {
        // 95_750 * 0.18 exactly equals the primary rebate.
        let result = calculate_income_tax(95_750.0, 40, 0, 0.02);
        assert_approx(result.net_tax, 0.0);
        assert_approx(result.monthly_tax, 0.0);
    }

    #[test]
    fn non_positive_income_short_circuits_with_lowest_marginal_rate() {
        for income in [0.0, -5_000.0] {
            let result = calculate_income_tax(income, 70, 3, 0.02);
            assert_approx(result.net_tax, 0.0);
            assert_approx(result.gross_tax, 0.0);
            assert_approx(result.total_rebates, 0.0);
            assert_approx(result.marginal_rate, 18.0);
        }
    }

    #[test]
    fn year_zero_matches_the_uninflated_table() {
        for income in [50_000.0, 237_100.0, 400_000.0, 2_000_000.0] {
            let base = calculate_income_tax(income, 40, 0, 0.0);
            let with_rate = calculate_income_tax(income, 40, 0, 0.09);
            assert_approx(with_rate.gross_tax, base.gross_tax);
            assert_approx(with_rate.net_tax, base.net_tax);
        }
    }

    #[test]
    fn inflated_brackets_shift_the_same_real_income_onto_the_same_tax() {
        // 10 years at 2%: a bracket-edge income scaled by the same factor
        // lands on the scaled tax within rounding noise.
        let factor: f64 = 1.02f64.powi(10);
        let base = calculate_income_tax(237_100.0, 40, 0, 0.02);
        let future = calculate_income_tax((237_100.0 * factor).round(), 40, 10, 0.02);
        let scaled = base.gross_tax * factor;
        assert!(
            (future.gross_tax - scaled).abs() <= 2.0,
            "expected ~{scaled}, got {}",
            future.gross_tax
        );
    }

    #[test]
    fn top_bracket_applies_45_percent() {
        let result = calculate_income_tax(2_000_000.0, 40, 0, 0.02);
        assert_approx(result.marginal_rate, 45.0);
        // 644_489 + (2_000_000 - 1_817_001 + 1) * 0.45
        assert_approx(result.gross_tax, 726_839.0);
    }

    #[test]
    fn cgt_applies_annual_exclusion_and_inclusion_rate() {
        let result = calculate_cgt(
            100_000.0,
            45.0,
            CgtOptions {
                remaining_annual_exclusion: 40_000.0,
                primary_residence_exclusion: 0.0,
            },
        );
        assert_approx(result.net_gain, 60_000.0);
        assert_approx(result.taxable_gain, 24_000.0);
        assert_approx(result.tax, 10_800.0);
        assert_approx(result.exclusion_used, 40_000.0);
    }

    #[test]
    fn cgt_primary_residence_exclusion_can_wipe_out_the_gain() {
        let result = calculate_cgt(
            1_500_000.0,
            45.0,
            CgtOptions {
                remaining_annual_exclusion: 40_000.0,
                primary_residence_exclusion: PRIMARY_RESIDENCE_EXCLUSION,
            },
        );
        assert_approx(result.tax, 0.0);
        assert_approx(result.net_gain, 0.0);
        assert_approx(result.exclusion_used, 0.0);
    }

    #[test]
    fn cgt_reports_partial_exclusion_consumption() {
        let result = calculate_cgt(
            30_000.0,
            36.0,
            CgtOptions {
                remaining_annual_exclusion: 10_000.0,
                primary_residence_exclusion: 0.0,
            },
        );
        assert_approx(result.exclusion_used, 10_000.0);
        assert_approx(result.net_gain, 20_000.0);
        assert_approx(result.taxable_gain, 8_000.0);
        assert_approx(result.tax, 2_880.0);
    }

    #[test]
    fn cgt_exclusion_inflates_like_brackets() {
        assert_approx(inflate_cgt_exclusion(0, 0.02), 40_000.0);
        assert_approx(inflate_cgt_exclusion(1, 0.02), 40_800.0);
        assert_approx(inflate_cgt_exclusion(10, 0.02), (40_000.0 * 1.02f64.powi(10)).round());
    }

    proptest! {
        #[test]
        fn prop_net_tax_is_monotonic_in_income(
            income in 0u32..2_000_000,
            bump in 0u32..500_000,
            age in 20i32..90
        ) {
            let lo = calculate_income_tax(income as f64, age, 0, 0.02);
            let hi = calculate_income_tax((income + bump) as f64, age, 0, 0.02);
            prop_assert!(hi.net_tax + 1e-9 >= lo.net_tax);
        }

        #[test]
        fn prop_rebates_never_increase_tax_with_age(
            income in 0u32..2_000_000,
            years in 0u32..40
        ) {
            let young = calculate_income_tax(income as f64, 40, years, 0.02);
            let senior = calculate_income_tax(income as f64, 65, years, 0.02);
            let elder = calculate_income_tax(income as f64, 75, years, 0.02);
            prop_assert!(senior.net_tax <= young.net_tax + 1e-9);
            prop_assert!(elder.net_tax <= senior.net_tax + 1e-9);
        }

        #[test]
        fn prop_cgt_never_exceeds_marginal_rate_on_the_full_gain(
            gain in 0u32..5_000_000,
            marginal in 0u32..46,
            remaining in 0u32..41_000
        ) {
            let result = calculate_cgt(gain as f64, marginal as f64, CgtOptions {
                remaining_annual_exclusion: remaining as f64,
                primary_residence_exclusion: 0.0,
            });
            prop_assert!(result.tax >= 0.0);
            prop_assert!(result.tax <= gain as f64 * marginal as f64 / 100.0 + 1.0);
            prop_assert!(result.exclusion_used <= remaining as f64 + 1e-9);
        }
    }
}
