//! Property-based tests for pricing, status control and gateway signing.

use std::collections::BTreeMap;

use proptest::prelude::*;
use rust_decimal::Decimal;
use stateset_checkout::{
    config::PaymentGatewayConfig,
    entities::OrderStatus,
    services::{
        payment_gateway::canonical_string, promotions::calculate_discount, DiscountRule,
        PaymentCallbackVerifier, StatusTransitionGuard, VerificationOutcome,
    },
};

const ALLOWED_EDGES: [(OrderStatus, OrderStatus); 7] = [
    (OrderStatus::PendingPayment, OrderStatus::FailedPayment),
    (OrderStatus::PendingPayment, OrderStatus::Paid),
    (OrderStatus::PendingPayment, OrderStatus::Cancelled),
    (OrderStatus::Paid, OrderStatus::Processing),
    (OrderStatus::Processing, OrderStatus::AwaitingShipment),
    (OrderStatus::AwaitingShipment, OrderStatus::Shipped),
    (OrderStatus::Shipped, OrderStatus::Delivered),
];

fn status_strategy() -> impl Strategy<Value = OrderStatus> {
    prop::sample::select(OrderStatus::ALL.to_vec())
}

fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000_000, 0u32..3).prop_map(|(units, scale)| Decimal::new(units, scale))
}

fn rule_strategy() -> impl Strategy<Value = DiscountRule> {
    prop_oneof![
        (0u32..=150, prop::option::of(0i64..1_000_000)).prop_map(|(percent, max)| {
            DiscountRule::Percentage {
                percent: Decimal::from(percent),
                max: max.map(Decimal::from),
            }
        }),
        (0i64..100_000_000).prop_map(|amount| DiscountRule::FixedAmount {
            amount: Decimal::from(amount)
        }),
        (0u32..=100, prop::option::of(0i64..1_000_000)).prop_map(|(percent, max)| {
            DiscountRule::Shipping {
                percent: Decimal::from(percent),
                max: max.map(Decimal::from),
            }
        }),
    ]
}

fn params_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("vnp_[A-Za-z]{1,12}", "[ -~]{0,24}", 1..10)
}

fn verifier() -> PaymentCallbackVerifier {
    PaymentCallbackVerifier::new(PaymentGatewayConfig {
        merchant_code: "TESTSHOP".to_string(),
        secret_key: "property_test_secret".to_string(),
        ..PaymentGatewayConfig::default()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn discount_never_exceeds_amount(rule in rule_strategy(), amount in amount_strategy()) {
        let discount = calculate_discount(&rule, amount).unwrap();
        prop_assert!(discount >= Decimal::ZERO);
        prop_assert!(discount <= amount);
    }

    #[test]
    fn only_listed_edges_are_allowed(from in status_strategy(), to in status_strategy()) {
        prop_assert_eq!(
            StatusTransitionGuard::can_transition(from, to),
            ALLOWED_EDGES.contains(&(from, to))
        );
        if from.is_terminal() {
            prop_assert!(!StatusTransitionGuard::can_transition(from, to));
        }
    }

    #[test]
    fn canonical_string_ignores_insertion_order(params in params_strategy()) {
        let mut reversed = BTreeMap::new();
        for (key, value) in params.iter().rev() {
            reversed.insert(key.clone(), value.clone());
        }
        prop_assert_eq!(canonical_string(&params), canonical_string(&reversed));
    }

    #[test]
    fn any_changed_value_breaks_the_signature(params in params_strategy(), suffix in "[a-z0-9]{1,4}") {
        let verifier = verifier();
        let mut signed = params.clone();
        let signature = verifier.sign(&params).unwrap();
        signed.insert(verifier.config().signature_param.clone(), signature);
        prop_assert_ne!(verifier.verify(&signed), VerificationOutcome::SignatureInvalid);

        let key = params.keys().next().unwrap().clone();
        let tampered = format!("{}{}", params[&key], suffix);
        signed.insert(key, tampered);
        prop_assert_eq!(verifier.verify(&signed), VerificationOutcome::SignatureInvalid);
    }
}
