//! End-to-end pricing scenarios combining global rates, conditions and coupons.

use pricewise::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use testresult::TestResult;

fn items(lines: &[(i64, i64)]) -> Vec<Item> {
    lines
        .iter()
        .map(|&(quantity, price)| Item::new().with("quantity", quantity).with("price", price))
        .collect()
}

fn calculator(lines: &[(i64, i64)]) -> Calculator {
    let mut calculator = Calculator::new(&Settings::default());
    calculator.set_items(items(lines));
    calculator
}

#[derive(Debug, Default)]
struct MoreThanOneProduct;

impl ConditionRule for MoreThanOneProduct {
    fn evaluate(&self, items: &[Item]) -> bool {
        items.len() > 1
    }

    fn slug(&self) -> Option<&str> {
        Some("more_than_1_products_10")
    }

    fn discount(&self) -> Decimal {
        dec!(10)
    }
}

#[test]
fn plain_basket_totals_its_lines() -> TestResult {
    let calc = calculator(&[(2, 50), (1, 100)]);

    assert_eq!(calc.subtotal()?, dec!(200));
    assert_eq!(calc.total()?, dec!(200));

    Ok(())
}

#[test]
fn global_discount_reduces_the_subtotal() -> TestResult {
    let mut calc = calculator(&[(2, 50), (1, 100)]);
    calc.set_global_discount(dec!(10));

    assert_eq!(calc.total_with_discount(None)?, dec!(180));

    Ok(())
}

#[test]
fn global_tax_is_added_to_the_subtotal() -> TestResult {
    let mut calc = calculator(&[(2, 50), (1, 100)]);
    calc.set_global_tax_rate(dec!(10));

    assert_eq!(calc.total_with_taxes(None)?, dec!(220));

    Ok(())
}

#[test]
fn single_use_coupon_discounts_one_calculation() -> TestResult {
    let mut calc = calculator(&[(2, 50), (1, 100)]);
    calc.add_coupon(Coupon::new("SINGLEUSE", dec!(50)).single_use())?;

    assert!(calc.apply_coupon("SINGLEUSE", None)?);
    assert_eq!(calc.total_with_discount(None)?, dec!(100));

    assert!(!calc.apply_coupon("SINGLEUSE", None)?);
    assert_eq!(calc.coupon_discount(), dec!(50));

    calc.remove_applied_coupons()?;

    assert_eq!(calc.total_with_discount(None)?, dec!(200));
    assert_eq!(calc.total()?, dec!(200));

    Ok(())
}

#[test]
fn global_discount_with_tax() -> TestResult {
    let mut calc = calculator(&[(2, 50), (1, 100)]);
    calc.discount(dec!(15)).set_global_tax_rate(dec!(19));

    assert_eq!(calc.total()?, dec!(202.30));
    assert_eq!(calc.total_with_discount(None)?, dec!(170));
    assert_eq!(calc.total_with_taxes(None)?, dec!(238));
    assert_eq!(calc.tax_amount()?, dec!(38));
    assert_eq!(calc.savings(None)?, dec!(35.70));

    Ok(())
}

#[test]
fn catalog_condition_breakdown() -> TestResult {
    let mut catalog = RuleCatalog::new();
    catalog.register::<MoreThanOneProduct>("app", "MoreThanOneProduct");

    let mut calc = calculator(&[(2, 50), (1, 100)]);
    calc.conditions_mut().register_catalog(&catalog, "app")?;
    calc.set_global_tax_rate(dec!(19));

    let breakdown = calc.breakdown()?;

    assert_eq!(
        breakdown,
        Breakdown {
            total: dec!(214.20),
            subtotal: dec!(200),
            tax_amount: dec!(38),
            total_after_discount: dec!(180),
            savings: dec!(23.80),
            tax_rate: dec!(19),
            discount_rate: dec!(10),
        }
    );

    Ok(())
}

#[test]
fn limited_coupon_only_counts_once() -> TestResult {
    let mut calc = calculator(&[(5, 10), (2, 25)]);
    calc.add_coupon(Coupon::new("LIMITED45", dec!(45)).with_usage_limit(1))?;

    assert!(calc.apply_coupon("LIMITED45", None)?);
    assert_eq!(calc.total()?, dec!(55));

    assert!(!calc.apply_coupon("LIMITED45", None)?);
    assert!(calc.coupon("LIMITED45").is_none());
    assert_eq!(calc.total()?, dec!(100));

    Ok(())
}

#[test]
fn large_quantities_stay_exact() -> TestResult {
    let mut calc = calculator(&[(1_000_000, 10), (1_000_000, 20)]);
    calc.set_global_discount(dec!(10)).set_global_tax_rate(dec!(100));

    let breakdown = calc.breakdown()?;

    assert_eq!(breakdown.total, dec!(54000000));
    assert_eq!(breakdown.tax_amount, dec!(30000000));
    assert_eq!(breakdown.total_after_discount, dec!(27000000));
    assert_eq!(breakdown.savings, dec!(6000000));

    Ok(())
}

#[test]
fn fractional_results_are_reported_to_three_places() -> TestResult {
    let mut calc = calculator(&[(3, 15), (1, 25)]);
    calc.set_global_discount(dec!(25)).set_global_tax_rate(dec!(15));

    let breakdown = calc.breakdown()?;

    assert_eq!(breakdown.total, dec!(60.375));
    assert_eq!(breakdown.subtotal, dec!(70));
    assert_eq!(breakdown.tax_amount, dec!(10.5));
    assert_eq!(breakdown.total_after_discount, dec!(52.50));
    assert_eq!(breakdown.savings, dec!(20.125));

    Ok(())
}

#[test]
fn custom_field_names() -> TestResult {
    let mut calc = Calculator::new(&Settings::default());
    calc.set_fields([("price", "amount"), ("quantity", "qty")])
        .set_items(vec![
            Item::new().with("qty", 2).with("amount", 20),
            Item::new().with("qty", 1).with("amount", 20),
        ]);

    assert_eq!(calc.total_with_discount(Some(dec!(50)))?, dec!(30));

    Ok(())
}

#[test]
fn field_mapping_from_settings() -> TestResult {
    let settings = Settings::from_yaml_str("fields:\n  price: unit_price\n  quantity: count\n")?;

    let mut calc = Calculator::new(&settings);
    calc.set_items(vec![Item::new().with("count", 4).with("unit_price", "2.50")]);

    assert_eq!(calc.subtotal()?, dec!(10));

    Ok(())
}

#[test]
fn all_sources_add_up_before_the_cap() -> TestResult {
    let mut calc = calculator(&[(1, 100)]);
    calc.set_global_discount(dec!(10))
        .define_if("loyal", true, dec!(5))?
        .add([
            ConditionSpec::new("big_basket", Rule::new(|items| items.len() > 3), dec!(20)),
            ConditionSpec::new("weekend", true, dec!(5)),
        ])?;
    calc.add_coupon(Coupon::new("WELCOME", dec!(10)))?;
    calc.apply_coupon("WELCOME", Some(UserId::from(7)))?;

    assert_eq!(calc.condition_discount(), dec!(10));
    assert_eq!(calc.discount_rate(None), dec!(30));
    assert_eq!(calc.total()?, dec!(70));
    assert_eq!(
        calc.coupon("WELCOME").map(|coupon| coupon.used_by.clone()),
        Some(vec![UserId::from(7)])
    );

    Ok(())
}

#[test]
fn zero_quantity_aborts_everything() {
    let calc = calculator(&[(1, 10), (0, 10)]);

    assert!(matches!(
        calc.breakdown(),
        Err(CalculationError::ZeroQuantity { index: 1 })
    ));
    assert!(calc.total().is_err());
}
