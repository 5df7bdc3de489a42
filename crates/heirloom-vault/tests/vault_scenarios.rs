//! End-to-end vault creation scenarios: configuration in, address and
//! witness script out, across networks and profiles.

use bitcoin::Network;
use heirloom_vault::config::{DecayQuorum, KeyRole, VaultConfiguration, VaultProfile, VaultTimelock};
use heirloom_vault::generate::generate;
use heirloom_vault::policy::{analyze, PolicyKind};
use heirloom_vault::script::validate_address;
use heirloom_vault::spend_path::BranchFlag;

fn owner_key() -> String {
    format!("02{}", "aa".repeat(32))
}

fn heir_key() -> String {
    format!("03{}", "bb".repeat(32))
}

#[test]
fn mainnet_timelock_vault() {
    // Owner 02aa..aa, heir 03bb..bb, locked until block 900,000 on mainnet.
    let cfg = VaultConfiguration::timelock_vault(owner_key(), heir_key(), 900_000);
    let bundle = generate(&cfg, Network::Bitcoin);

    assert!(bundle.is_valid, "error: {:?}", bundle.error);
    let address = bundle.address.as_deref().unwrap();
    assert!(address.starts_with("bc1q"), "address: {}", address);
    assert_eq!(address.len(), 62);

    let script = bundle.witness_script.as_ref().unwrap();
    assert!(script.to_asm_string().contains("OP_CLTV"));

    assert!(validate_address(address, Network::Bitcoin));
    assert!(!validate_address(address, Network::Testnet));

    assert_eq!(bundle.lock_height, Some(900_000));
}

#[test]
fn testnet_dead_man_switch_vault() {
    // 90 days of inactivity = 12,960 blocks, on testnet.
    let cfg = VaultConfiguration::dead_man_switch(owner_key(), heir_key(), 90).unwrap();
    let bundle = generate(&cfg, Network::Testnet);

    assert!(bundle.is_valid, "error: {:?}", bundle.error);
    let address = bundle.address.as_deref().unwrap();
    assert!(address.starts_with("tb1q"), "address: {}", address);

    let script = bundle.witness_script.as_ref().unwrap();
    assert!(script.to_asm_string().contains("OP_CSV"));

    let policy = bundle.policy.as_deref().unwrap();
    assert!(policy.contains("older(12960)"));
    assert!(!policy.contains("after("));
}

#[test]
fn multisig_decay_vault() {
    // Owner + two heirs: 2-of-3 now, 1-of-2 heirs after block 900,000.
    let mut cfg = VaultConfiguration::new(VaultProfile::Family)
        .with_key(KeyRole::Owner, owner_key())
        .with_heir("Alice", 50, format!("02{}", "cc".repeat(32)))
        .with_heir("Bob", 50, format!("03{}", "ee".repeat(32)))
        .with_timelock(KeyRole::Heir, VaultTimelock::Absolute(900_000));
    cfg.decay = Some(DecayQuorum {
        threshold_before: 2,
        threshold_after: 1,
    });

    let bundle = generate(&cfg, Network::Bitcoin);
    assert!(bundle.is_valid, "error: {:?}", bundle.error);

    let script = bundle.witness_script.as_ref().unwrap();
    let asm = script.to_asm_string();
    assert_eq!(asm.matches("OP_CHECKMULTISIG").count(), 2);

    // The owner key never appears in the decayed quorum.
    let after_decay = bundle
        .spend_paths
        .iter()
        .find(|p| p.name == "multisig_after_decay")
        .unwrap();
    let quorum = &after_decay.threshold.as_ref().unwrap().keys;
    assert!(quorum.iter().all(|k| k.to_string() != owner_key()));
    assert_eq!(after_decay.lock.n_lock_time, Some(900_000));
}

#[test]
fn policy_analysis_scenario() {
    let x = format!("02{}", "aa".repeat(32));
    let y = format!("02{}", "cc".repeat(32));
    let analysis = analyze(&format!("or(pk({}),and(pk({}),after(900000)))", x, y)).unwrap();

    assert_eq!(analysis.kind, PolicyKind::Timelock);
    assert_eq!(analysis.keys.len(), 2);
    assert_eq!(analysis.absolute_locks.len(), 1);
    assert!(!analysis.has_challenge);
    assert!(!analysis.has_oracle);
}

#[test]
fn addresses_are_deterministic_across_runs() {
    for network in [Network::Bitcoin, Network::Testnet, Network::Signet] {
        let cfg = VaultConfiguration::dead_man_switch(owner_key(), heir_key(), 90).unwrap();
        let a = generate(&cfg, network);
        let b = generate(&cfg, network);
        assert_eq!(a.address, b.address);
        assert_eq!(a.witness_script, b.witness_script);
    }
}

#[test]
fn all_profiles_emit_branch_framed_scripts() {
    let spouse = VaultConfiguration::new(VaultProfile::Spouse)
        .with_key(KeyRole::Owner, owner_key())
        .with_key(KeyRole::Spouse, format!("02{}", "cc".repeat(32)))
        .with_key(KeyRole::Heir, heir_key())
        .with_timelock(KeyRole::Spouse, VaultTimelock::Relative(4_320))
        .with_timelock(KeyRole::Heir, VaultTimelock::Relative(12_960));

    let family = VaultConfiguration::new(VaultProfile::Family)
        .with_key(KeyRole::Owner, owner_key())
        .with_key(KeyRole::Recovery, format!("02{}", "dd".repeat(32)))
        .with_heir("Alice", 40, format!("02{}", "cc".repeat(32)))
        .with_heir("Bob", 40, format!("03{}", "ee".repeat(32)))
        .with_timelock(KeyRole::Recovery, VaultTimelock::Relative(4_320))
        .with_timelock(KeyRole::Heir, VaultTimelock::Relative(12_960));

    let business = VaultConfiguration::new(VaultProfile::Business)
        .with_key(KeyRole::Owner, owner_key())
        .with_key(KeyRole::Partner, format!("02{}", "cc".repeat(32)))
        .with_key(KeyRole::Trustee, format!("03{}", "ee".repeat(32)))
        .with_timelock(KeyRole::Owner, VaultTimelock::Relative(4_320))
        .with_timelock(KeyRole::Trustee, VaultTimelock::Relative(12_960));

    let dms = VaultConfiguration::dead_man_switch(owner_key(), heir_key(), 90).unwrap();
    let timelock = VaultConfiguration::timelock_vault(owner_key(), heir_key(), 900_000);

    for cfg in [spouse, family, business, dms, timelock] {
        let bundle = generate(&cfg, Network::Bitcoin);
        assert!(bundle.is_valid, "{:?}: {:?}", cfg.profile, bundle.error);
        let script = bundle.witness_script.unwrap();
        let bytes = script.as_bytes();
        assert_eq!(bytes[0], 0x63, "{:?} must start with OP_IF", cfg.profile);
        assert_eq!(
            bytes[bytes.len() - 1],
            0x68,
            "{:?} must end with OP_ENDIF",
            cfg.profile
        );
    }
}

#[test]
fn owner_paths_never_carry_gates() {
    use bitcoin::hashes::{sha256, Hash};
    let mut cfg = VaultConfiguration::dead_man_switch(owner_key(), heir_key(), 90).unwrap();
    cfg.gates = vec![
        heirloom_vault::config::Gate::Challenge,
        heirloom_vault::config::Gate::Oracle,
    ];
    cfg.challenge_hash = Some(sha256::Hash::hash(b"the family motto"));
    cfg.keys
        .insert(KeyRole::Oracle, format!("02{}", "dd".repeat(32)));

    let bundle = generate(&cfg, Network::Bitcoin);
    assert!(bundle.is_valid, "error: {:?}", bundle.error);

    for path in &bundle.spend_paths {
        if path.selectors == vec![BranchFlag::True] {
            assert!(path.oracle.is_none(), "owner path must not be oracle-gated");
            assert!(
                path.challenge_hash.is_none(),
                "owner path must not be challenge-gated"
            );
        }
    }

    // And the policy keeps the owner subexpression bare.
    let policy = bundle.policy.unwrap();
    assert!(policy.starts_with(&format!("or(pk({})", owner_key())));
}

#[test]
fn every_csv_vault_has_clean_bip68_encoding() {
    for days in [1, 30, 90, 180, 455] {
        let cfg = VaultConfiguration::dead_man_switch(owner_key(), heir_key(), days).unwrap();
        let bundle = generate(&cfg, Network::Bitcoin);
        assert!(bundle.is_valid);
        let seq = bundle.sequence.unwrap().to_consensus_u32();
        heirloom_vault::timelock::validate_bip68(seq).unwrap();
        assert_eq!(seq & (1 << 31), 0, "disable bit must be clear");
    }

    // Past the 16-bit block range no valid BIP-68 encoding exists (time
    // mode saturates even earlier), so configuration creation hard-errors
    // instead of silently truncating the window.
    assert!(VaultConfiguration::dead_man_switch(owner_key(), heir_key(), 500).is_err());
}
