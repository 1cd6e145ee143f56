//! Property-based tests for the spending domain.
//!
//! These verify invariants that must hold for any sequence of operations:
//! the rolling spend never exceeds the limit and always equals the sum of
//! committed authorizations; captures never exceed the authorized amount;
//! terminal states absorb all further transitions.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;

use aurum::domain::{
    Authorization, AuthorizationState, CardAccount, CardAccountId, Currency, Money, TenantId,
};

/// Positive amounts between 0.01 and 1000.00 with two decimal places.
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=100_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn eur(amount: Decimal) -> Money {
    Money::new(amount, Currency::Eur)
}

fn account(limit: Decimal) -> CardAccount {
    CardAccount::new(TenantId::new("tenant-prop").unwrap(), eur(limit), Utc::now())
}

fn authorization(amount: Decimal) -> Authorization {
    Authorization::new(
        TenantId::new("tenant-prop").unwrap(),
        CardAccountId::new(),
        eur(amount),
        "merchant",
        "reference",
        Utc::now(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// For any sequence of authorize attempts, the rolling spend stays
    /// within the limit and equals the sum of the attempts that succeeded.
    #[test]
    fn limit_safety(
        limit in arb_amount(),
        attempts in prop::collection::vec(arb_amount(), 1..20),
    ) {
        let mut account = account(limit);
        let mut committed = Decimal::ZERO;

        for amount in &attempts {
            if account.authorize(&eur(*amount), Utc::now()).is_ok() {
                committed += amount;
            }
        }

        prop_assert!(account.rolling_spend().amount() <= limit);
        prop_assert_eq!(account.rolling_spend().amount(), committed);
        prop_assert_eq!(
            account.available_limit().amount(),
            limit - committed
        );
    }

    /// Interleaved authorize and release operations never drive the rolling
    /// spend negative or above the limit.
    #[test]
    fn rolling_spend_stays_bounded(
        limit in arb_amount(),
        operations in prop::collection::vec((any::<bool>(), arb_amount()), 1..30),
    ) {
        let mut account = account(limit);

        for (is_release, amount) in &operations {
            let amount = eur(*amount);
            if *is_release {
                let _ = account.release(&amount, Utc::now());
            } else {
                let _ = account.authorize(&amount, Utc::now());
            }

            prop_assert!(!account.rolling_spend().is_negative());
            prop_assert!(
                account.rolling_spend().amount() <= account.spending_limit().amount()
            );
        }
    }

    /// A successful capture never exceeds the authorized amount, and a
    /// second capture always fails.
    #[test]
    fn capture_bound(
        authorized in arb_amount(),
        capture in arb_amount(),
        recapture in arb_amount(),
    ) {
        let mut auth = authorization(authorized);

        match auth.capture(&eur(capture), Utc::now()) {
            Ok(()) => {
                prop_assert!(capture <= authorized);
                prop_assert_eq!(auth.state(), AuthorizationState::Captured);
                prop_assert_eq!(auth.captured_amount().amount(), capture);

                prop_assert!(auth.capture(&eur(recapture), Utc::now()).is_err());
                prop_assert_eq!(auth.captured_amount().amount(), capture);
            }
            Err(_) => {
                prop_assert!(capture > authorized);
                prop_assert_eq!(auth.state(), AuthorizationState::Authorized);
                prop_assert!(auth.captured_amount().is_zero());
            }
        }
    }

    /// Once an authorization leaves the Authorized state, no further
    /// transition is accepted and the state never changes again.
    #[test]
    fn terminal_states_absorb(
        authorized in arb_amount(),
        exit in 0u8..3,
        attempts in prop::collection::vec(0u8..3, 1..10),
    ) {
        let now = Utc::now();
        let mut auth = authorization(authorized);

        let expected = match exit {
            0 => {
                auth.capture(&eur(authorized), now).unwrap();
                AuthorizationState::Captured
            }
            1 => {
                auth.reverse(now).unwrap();
                AuthorizationState::Reversed
            }
            _ => {
                auth.expire(now).unwrap();
                AuthorizationState::Expired
            }
        };
        let version = auth.version();

        for attempt in attempts {
            let result = match attempt {
                0 => auth.capture(&eur(authorized), now),
                1 => auth.reverse(now),
                _ => auth.expire(now),
            };
            prop_assert!(result.is_err());
            prop_assert_eq!(auth.state(), expected);
            prop_assert_eq!(auth.version(), version);
        }
    }
}
