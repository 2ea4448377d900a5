//! End-to-end engine scenarios, single agent, no background threads.
//!
//! Each test drives the engine API directly and checks both the resulting
//! balances and the exact journal lines.

use bank_simulator_core_rs::{BankEngine, Currency, Journal, JournalCapture, OpError};

// ============================================================================
// Test Helpers
// ============================================================================

fn engine_with_capture(agents: u32) -> (BankEngine, JournalCapture) {
    let (journal, capture) = Journal::capture();
    (BankEngine::new(agents, journal), capture)
}

// ============================================================================
// Scenario: open then withdraw
// ============================================================================

#[test]
fn test_open_and_withdraw_usd() {
    let (engine, capture) = engine_with_capture(1);

    engine.open_account(1, 10, 7777, 100, 50).unwrap();
    assert_eq!(engine.balance(1, 10, 7777).unwrap(), (100, 50));

    engine.withdraw(1, 10, 7777, Currency::Usd, 30).unwrap();
    assert_eq!(engine.balance(1, 10, 7777).unwrap(), (100, 20));

    let lines = capture.lines();
    assert_eq!(
        lines[0],
        "1: New account id is 10 with password 7777 and initial balance 100 ILS and 50 USD"
    );
    assert!(lines.contains(
        &"1: Account 10 new balance is 100 ILS and 20 USD after 30 USD was withdrawn".to_string()
    ));
}

// ============================================================================
// Scenario: transfer to a missing destination
// ============================================================================

#[test]
fn test_transfer_to_missing_destination_changes_nothing() {
    let (engine, capture) = engine_with_capture(1);

    engine.open_account(1, 10, 7777, 0, 0).unwrap();
    engine.deposit(1, 10, 7777, Currency::Ils, 100).unwrap();

    assert_eq!(
        engine.transfer(1, 10, 7777, 20, Currency::Ils, 40),
        Err(OpError::AccountNotFound(20))
    );

    assert_eq!(engine.balance(1, 10, 7777).unwrap(), (100, 0));
    assert!(capture.contains("Error 1: Your transaction failed – account id 20 does not exist"));
}

// ============================================================================
// Scenario: successful transfer
// ============================================================================

#[test]
fn test_transfer_between_two_accounts() {
    let (engine, capture) = engine_with_capture(1);

    engine.open_account(1, 10, 7777, 100, 0).unwrap();
    engine.open_account(1, 20, 8888, 0, 0).unwrap();
    engine.transfer(1, 10, 7777, 20, Currency::Ils, 60).unwrap();

    assert_eq!(engine.balance(1, 10, 7777).unwrap(), (40, 0));
    assert_eq!(engine.balance(1, 20, 8888).unwrap(), (60, 0));

    let transfer_lines = capture
        .lines()
        .iter()
        .filter(|l| l.contains("Transfer"))
        .count();
    assert_eq!(transfer_lines, 1, "exactly one transfer line");
    assert!(capture.contains(
        "1: Transfer 60 ILS from account 10 to account 20 new account balance is 40 ILS and 0 USD new target account balance is 60 ILS and 0 USD"
    ));
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_deposit_withdraw_round_trip() {
    let (engine, _capture) = engine_with_capture(1);
    engine.open_account(1, 10, 7777, 55, 44).unwrap();
    engine.deposit(1, 10, 7777, Currency::Ils, 17).unwrap();
    engine.withdraw(1, 10, 7777, Currency::Ils, 17).unwrap();
    assert_eq!(engine.balance(1, 10, 7777).unwrap(), (55, 44));
}

#[test]
fn test_exchange_round_trip_usd_ils_usd() {
    let (engine, _capture) = engine_with_capture(1);
    engine.open_account(1, 10, 7777, 0, 8).unwrap();
    engine
        .exchange(1, 10, 7777, Currency::Usd, Currency::Ils, 8)
        .unwrap();
    assert_eq!(engine.balance(1, 10, 7777).unwrap(), (40, 0));
    engine
        .exchange(1, 10, 7777, Currency::Ils, Currency::Usd, 40)
        .unwrap();
    assert_eq!(engine.balance(1, 10, 7777).unwrap(), (0, 8));
}

#[test]
fn test_open_duplicate_leaves_directory_unchanged() {
    let (engine, _capture) = engine_with_capture(1);
    engine.open_account(1, 10, 7777, 1, 2).unwrap();
    assert_eq!(
        engine.open_account(1, 10, 1111, 9, 9),
        Err(OpError::AccountExists)
    );
    assert_eq!(engine.account_count(), 1);
    assert_eq!(engine.balance(1, 10, 7777).unwrap(), (1, 2));
}
