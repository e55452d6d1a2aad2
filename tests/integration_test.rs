use std::io::Write;

use assert_cmd::Command;
use predicates as pred;
use tempfile::NamedTempFile;

#[test]
fn end_to_end_outputs_expected_balances() {
    // alice: 100.00 funded, 40.00 sent to bob, 10.00 withdrawn -> 50.00
    // bob:   40.00 received, 25.00 request approved, second request rejected -> 65.00
    // carol: overdraw attempt and self transfer both dead-lettered -> 5.00
    let mut file = NamedTempFile::new().expect("create temp file");
    writeln!(
        file,
        "command, account, target, amount, note\n\
    open, alice@bank.test, , ,\n\
    open, bob@bank.test, , ,\n\
    open, carol@bank.test, , ,\n\
    add_funds, alice@bank.test, , 100.00, opening deposit\n\
    add_funds, carol@bank.test, , 5, \n\
    transfer, alice@bank.test, bob@bank.test, 40.00, rent\n\
    withdraw, alice@bank.test, , 10.00,\n\
    withdraw, carol@bank.test, , 150.00,\n\
    transfer, carol@bank.test, carol@bank.test, 1.00,\n\
    teleport, carol@bank.test, , 1.00,\n\
    request, bob@bank.test, r1, 25.00, groceries\n\
    request, bob@bank.test, r2, 99.00, holiday\n\
    approve, , r1, ,\n\
    approve, , r1, ,\n\
    reject, , r2, , not this time\n\
    transfer, bob@bank.test, nobody@bank.test, 1.00,"
    )
    .unwrap();

    let exe = env!("CARGO_BIN_EXE_custodial_ledger");
    let mut cmd = Command::new(exe);
    cmd.arg(file.path()).env_remove("DATABASE_URL");

    cmd.assert()
        .success()
        .stdout(pred::str::contains("account,balance"))
        .stdout(pred::str::contains("alice@bank.test,50.00"))
        .stdout(pred::str::contains("bob@bank.test,65.00"))
        .stdout(pred::str::contains("carol@bank.test,5.00"));
}

#[test]
fn missing_argument_fails() {
    let exe = env!("CARGO_BIN_EXE_custodial_ledger");
    Command::new(exe)
        .env_remove("DATABASE_URL")
        .assert()
        .failure()
        .stderr(pred::str::contains("usage"));
}
