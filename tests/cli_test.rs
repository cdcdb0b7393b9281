use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

#[test]
fn test_cli_help_lists_options() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--db-path"))
        .stdout(predicate::str::contains("--tariffs"))
        .stdout(predicate::str::contains("--poll-interval"));

    Ok(())
}

#[test]
fn test_cli_requires_panel_configuration() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.env_clear()
        .env("GATEWAY_WALLET", "4100")
        .env("GATEWAY_TOKEN", "tok");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("PANEL_"));

    Ok(())
}

#[test]
fn test_cli_requires_gateway_token() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.env_clear()
        .env("PANEL_1_CODE", "de1")
        .env("PANEL_1_URL", "https://panel.example.net")
        .env("PANEL_1_USERNAME", "admin")
        .env("PANEL_1_PASSWORD", "pw")
        .env("PANEL_1_INBOUND_ID", "1")
        .env("PANEL_1_ADDRESS", "de1.example.net")
        .env("PANEL_1_PORT", "443")
        .env("PANEL_1_PUBLIC_KEY", "pbk")
        .env("PANEL_1_SHORT_ID", "ab")
        .env("PANEL_1_SNI", "www.microsoft.com")
        .env("GATEWAY_WALLET", "4100");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("GATEWAY_TOKEN"));

    Ok(())
}

#[test]
fn test_cli_rejects_invalid_tariff_catalog() -> Result<(), Box<dyn std::error::Error>> {
    let mut tariffs = tempfile::NamedTempFile::new()?;
    writeln!(tariffs, "[]")?;

    let mut cmd = Command::new(cargo_bin!());
    cmd.env_clear().arg("--tariffs").arg(tariffs.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("tariff"));

    Ok(())
}
