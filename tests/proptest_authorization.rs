//! Property-based tests for authorization, chain storage and simulation
//!
//! These tests use proptest to check invariants across many random inputs,
//! catching edge cases that unit tests might miss.

use autopilot::delegation::{
    ActionHash, Approval, DelegationAccount, DelegationAuthority, DelegationKind, DelegationLink,
    InMemoryDelegationStore,
};
use autopilot::evaluation::MarketSnapshot;
use autopilot::resilience::RetryPolicy;
use autopilot::simulation::{simulate, SimulationConfig};
use autopilot::strategy::{
    ActionSpec, ComparisonOperator, NewStrategy, StrategyRegistry, TriggerSpec,
};
use autopilot::types::{AccountId, Address, SystemClock};
use chrono::{TimeZone, Utc};
use ed25519_dalek::SigningKey;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

fn key(n: u8) -> SigningKey {
    SigningKey::from_bytes(&[n; 32])
}

fn address_of(key: &SigningKey) -> Address {
    Address::from_key_bytes(key.verifying_key().as_bytes())
}

fn authority(store: Arc<InMemoryDelegationStore>) -> DelegationAuthority {
    DelegationAuthority::new(store, RetryPolicy::immediate(1), Arc::new(SystemClock))
}

proptest! {
    /// A multisig account exists only with 1 <= threshold <= distinct signers
    #[test]
    fn threshold_bounded_by_signer_count(
        signer_count in 1u8..6,
        threshold in 0u32..8,
    ) {
        let signers: Vec<Address> = (1..=signer_count).map(|n| address_of(&key(n))).collect();
        let created = DelegationAccount::new(
            AccountId::new("acct"),
            signers[0].clone(),
            DelegationKind::Multisig,
            signers,
            threshold,
            Utc::now(),
        );
        let valid = threshold >= 1 && threshold <= u32::from(signer_count);
        prop_assert_eq!(created.is_ok(), valid);
        if let Ok(account) = created {
            prop_assert!(account.threshold() as usize <= account.signers().len());
        }
    }

    /// Authorization holds exactly when enough distinct signers approve,
    /// and adding approvals never takes it away
    #[test]
    fn authorization_is_monotonic_in_approvals(
        signer_count in 1u8..6,
        threshold_seed in 0u32..100,
        mask in 0u8..32,
        duplicate in any::<bool>(),
    ) {
        let threshold = threshold_seed % u32::from(signer_count) + 1;
        let keys: Vec<SigningKey> = (1..=signer_count).map(key).collect();
        let signers: Vec<Address> = keys.iter().map(address_of).collect();

        let authority = authority(Arc::new(InMemoryDelegationStore::new()));
        let account = authority
            .create_account(signers[0].clone(), DelegationKind::Multisig, signers, threshold)
            .unwrap();
        let hash = ActionHash::from_bytes([mask; 32]);

        let chosen: Vec<&SigningKey> = keys
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, k)| k)
            .collect();
        let mut approvals: Vec<Approval> = chosen.iter().map(|k| Approval::sign(k, &hash)).collect();
        if duplicate {
            // Repeats of the same signer count once
            approvals.extend(chosen.iter().map(|k| Approval::sign(k, &hash)));
        }

        let granted = authority.authorize(account.id(), &hash, &approvals).is_ok();
        prop_assert_eq!(granted, chosen.len() >= threshold as usize);

        let mut everyone = approvals.clone();
        everyone.extend(keys.iter().map(|k| Approval::sign(k, &hash)));
        if granted {
            prop_assert!(authority.authorize(account.id(), &hash, &everyone).is_ok());
        }
    }

    /// Storing the same chain again yields the same hash and one stored copy
    #[test]
    fn store_chain_is_idempotent(
        hops in 1usize..5,
        seed in 1u8..200,
        caveat in "[a-z_]{0,12}",
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let store = Arc::new(InMemoryDelegationStore::new());
            let authority = authority(store.clone());
            let links: Vec<DelegationLink> = (0..hops)
                .map(|i| {
                    let from = Address::from_key_bytes(&[seed.wrapping_add(i as u8); 32]);
                    let to = Address::from_key_bytes(&[seed.wrapping_add(i as u8 + 1); 32]);
                    DelegationLink::new(from, to).with_caveat(caveat.clone())
                })
                .collect();

            let first = authority.store_chain(links.clone()).await.unwrap();
            let second = authority.store_chain(links.clone()).await.unwrap();
            assert_eq!(first, second);
            assert_eq!(store.len().await, 1);
            assert_eq!(authority.fetch_chain(&first).await.unwrap().links(), links.as_slice());
        });
    }

    /// Simulation is a pure function of strategy, snapshot and config
    #[test]
    fn simulation_is_deterministic(
        price_cents in 1i64..100_000_000,
        target_cents in 1i64..100_000_000,
        volatility in 0u32..50,
        amount in 1u32..10_000,
    ) {
        let registry = StrategyRegistry::new(Arc::new(SystemClock));
        let strategy = registry
            .create(NewStrategy::new(
                AccountId::new("acct"),
                "dip buyer",
                TriggerSpec::PriceThreshold {
                    asset: "BTC".into(),
                    operator: ComparisonOperator::Lt,
                    price: Decimal::new(target_cents, 2),
                },
                ActionSpec::Buy {
                    asset: "BTC".into(),
                    amount: Decimal::from(amount),
                    currency: "USD".into(),
                },
            ))
            .unwrap();
        let snapshot = MarketSnapshot::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
            .with_price("BTC", Decimal::new(price_cents, 2))
            .with_metric("volatility:24h", Decimal::from(volatility));
        let config = SimulationConfig::default();

        let first = simulate(&strategy, &snapshot, &config);
        let second = simulate(&strategy, &snapshot, &config);
        prop_assert_eq!(&first, &second);
        prop_assert!(first.success);
        prop_assert!(first.projected.expected_fires_per_month >= Decimal::ZERO);
        prop_assert!(first.projected.estimated_cost >= Decimal::ZERO);
    }
}
