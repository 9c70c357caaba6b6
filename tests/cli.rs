mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, company, count, partner};
use predicates::str::contains;

fn seed(ws: &TestWorkspace) {
    ws.write_period_file(
        "2024-01",
        "K3241.K03200Y0.D40113.EMPRECSV",
        &[
            company("12345678", "ACME COMÉRCIO LTDA", "2062", "15000,00", "03"),
            company("87654321", "BETA SERVIÇOS ME", "2135", "", "01"),
        ],
    );
    ws.write_period_file(
        "2024-01",
        "K3241.K03200Y0.D40113.SOCIOCSV",
        &[partner("12345678", "ANA PEREIRA", "***000111**", "49")],
    );
    ws.write_period_file(
        "2024-01",
        "F.K03200$Z.D40113.MUNICCSV",
        &[vec!["7107", "SAO PAULO"], vec!["6001", "RIO DE JANEIRO"]],
    );
}

fn binary() -> Command {
    Command::cargo_bin("cnpj-consolidator").expect("binary exists")
}

#[test]
fn import_prints_report_and_writes_database() {
    let ws = TestWorkspace::new();
    seed(&ws);
    let report_path = ws.path().join("report.json");
    binary()
        .args([
            "import",
            "--root",
            ws.root().to_str().unwrap(),
            "--database",
            ws.database().to_str().unwrap(),
            "--report-json",
            report_path.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("inserted"))
        .stdout(contains("empresa"))
        .stdout(contains("municipio"));

    assert_eq!(count(&ws.database(), "empresa"), 2);
    assert_eq!(count(&ws.database(), "municipio"), 2);
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).expect("read report")).expect("parse report");
    assert_eq!(report["tables"]["company"]["inserted"], 2);
    assert_eq!(report["tables"]["partner"]["inserted"], 1);
}

#[test]
fn stats_lists_row_counts() {
    let ws = TestWorkspace::new();
    seed(&ws);
    binary()
        .args([
            "import",
            "-r",
            ws.root().to_str().unwrap(),
            "-d",
            ws.database().to_str().unwrap(),
            "--skip-indexes",
        ])
        .assert()
        .success();

    binary()
        .args(["stats", "--database", ws.database().to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("socio"))
        .stdout(contains("estabelecimento"));
}

#[test]
fn scan_shows_plan_without_creating_a_database() {
    let ws = TestWorkspace::new();
    seed(&ws);
    binary()
        .args(["scan", "--root", ws.root().to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("EMPRECSV"))
        .stdout(contains("2024-01"));
    assert!(!ws.database().exists());
}

#[test]
fn configured_patterns_classify_custom_names() {
    let ws = TestWorkspace::new();
    ws.write_period_file(
        "2024-02",
        "cadastro_pj.txt",
        &[company("12345678", "ACME", "2062", "", "")],
    );
    let config = ws.path().join("consolidator.yml");
    fs::write(&config, "chunk_size: 500\npatterns:\n  - pattern: cadastro_pj\n    kind: company\n")
        .expect("write config");
    binary()
        .args([
            "import",
            "--root",
            ws.root().to_str().unwrap(),
            "--database",
            ws.database().to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success();
    assert_eq!(count(&ws.database(), "empresa"), 1);
}

#[test]
fn missing_root_exits_with_error() {
    let ws = TestWorkspace::new();
    binary()
        .args([
            "import",
            "--root",
            ws.path().join("ausente").to_str().unwrap(),
            "--database",
            ws.database().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}

#[test]
fn stats_requires_existing_database() {
    let ws = TestWorkspace::new();
    binary()
        .args(["stats", "--database", ws.database().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}
