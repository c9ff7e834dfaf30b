use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use clap::Parser;
use clap::error::ErrorKind;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;

const SENSOR_FIXTURE: &str = "hci0|AA:BB|Progressor_7F21|-48;hci0|CC:DD|Speaker|-60";

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl progressor::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(args: progressor::Args) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let options = progressor::RunOptions::builder()
        .config(args.sensor_config())
        .maybe_log_level(args.log_level())
        .maybe_output_format(args.output_format())
        .build();
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let runtime = match maybe_fake_args {
        Some(fake_args) => progressor::SensorRuntime::fake(fake_args),
        None => progressor::SensorRuntime::platform().await?,
    };
    progressor::run_with_clients(command, &mut output, &FakeTerminalClient, runtime, options)
        .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv<const N: usize>(argv: [&str; N]) -> anyhow::Result<String> {
    let parsed_args = progressor::Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args).await
}

#[tokio::test]
async fn scan_command_lists_matching_sensors_as_json_lines() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "scan",
        "--duration",
        "100ms",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {"event":"discovered","adapter_name":"hci0","device_id":"AA:BB","local_name":"Progressor_7F21","rssi":-48}
    {"event":"scan_finished","devices":1}
    "#);
    Ok(())
}

#[tokio::test]
async fn scan_command_renders_table_in_pretty_mode() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "--output",
        "pretty",
        "scan",
        "--duration",
        "100ms",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r"
    + Progressor_7F21 AA:BB rssi=-48

    Found 1 sensor(s):
    ╭─────────────────┬───────────┬─────────┬──────╮
    │ name            │ device_id │ adapter │ rssi │
    ├─────────────────┼───────────┼─────────┼──────┤
    │ Progressor_7F21 │ AA:BB     │ hci0    │ -48  │
    ╰─────────────────┴───────────┴─────────┴──────╯
    ");
    Ok(())
}

#[tokio::test]
async fn scan_command_honours_name_prefix() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "--name-prefix",
        "Speaker",
        "scan",
        "--duration",
        "100ms",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {"event":"discovered","adapter_name":"hci0","device_id":"CC:DD","local_name":"Speaker","rssi":-60}
    {"event":"scan_finished","devices":1}
    "#);
    Ok(())
}

#[tokio::test]
async fn measure_command_streams_until_sample_limit() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "measure",
        "--max-samples",
        "3",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {"event":"connected","adapter_name":"hci0","device_id":"AA:BB","local_name":"Progressor_7F21","rssi":-48}
    {"event":"sample","index":1,"weight":10.25,"time":0.1}
    {"event":"sample","index":2,"weight":10.5,"time":0.1125}
    {"event":"sample","index":3,"weight":0.75,"time":0.125}
    {"event":"measurement_stopped","samples":3,"peak":10.5,"reason":"reached_limit"}
    {"event":"disconnected","device_id":"AA:BB"}
    "#);
    Ok(())
}

#[tokio::test]
async fn measure_command_tares_before_streaming() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "--fake-notifications",
        "01080000204100000000",
        "measure",
        "--tare",
        "--max-samples",
        "1",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {"event":"connected","adapter_name":"hci0","device_id":"AA:BB","local_name":"Progressor_7F21","rssi":-48}
    {"event":"command","command":"tare","outcome":"sent"}
    {"event":"sample","index":1,"weight":10.0,"time":0.0}
    {"event":"measurement_stopped","samples":1,"peak":10.0,"reason":"reached_limit"}
    {"event":"disconnected","device_id":"AA:BB"}
    "#);
    Ok(())
}

#[tokio::test]
async fn measure_command_stops_when_duration_elapses() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "--fake-notification-interval",
        "10s",
        "measure",
        "--duration",
        "50ms",
    ])
    .await?;

    assert!(stdout.contains(
        r#"{"event":"measurement_stopped","samples":0,"peak":null,"reason":"duration_elapsed"}"#
    ));
    Ok(())
}

#[tokio::test]
async fn measure_command_reports_peripheral_drop() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "--fake-disconnect-after",
        "1",
        "measure",
        "--max-samples",
        "10",
    ])
    .await?;

    assert!(stdout.contains(r#""reason":"disconnected""#));
    assert!(
        stdout
            .trim_end()
            .ends_with(r#"{"event":"disconnected","device_id":"AA:BB"}"#)
    );
    Ok(())
}

#[tokio::test]
async fn control_command_sends_tare() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "command",
        "tare",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {"event":"connected","adapter_name":"hci0","device_id":"AA:BB","local_name":"Progressor_7F21","rssi":-48}
    {"event":"command","command":"tare","outcome":"sent"}
    {"event":"disconnected","device_id":"AA:BB"}
    "#);
    Ok(())
}

#[tokio::test]
async fn control_command_writes_opcode_to_the_control_point() -> anyhow::Result<()> {
    let fake = progressor::FakeArgs::builder()
        .scan_fixture(SENSOR_FIXTURE)?
        .build();
    let runtime = progressor::SensorRuntime::fake(fake);
    let journal = runtime.journal().expect("fake runtime should keep a journal");
    let options = progressor::RunOptions::builder()
        .output_format(progressor::OutputFormat::Json)
        .build();
    let command = progressor::Command::Control(progressor::ControlArgs::new(
        progressor::SensorCommand::Battery,
    ));

    let mut output = Vec::new();
    progressor::run_with_clients(command, &mut output, &FakeTerminalClient, runtime, options)
        .await?;

    assert_eq!(vec![vec![0x6F]], journal.control_writes());
    Ok(())
}

#[tokio::test]
async fn control_command_fails_when_no_sensor_is_found() {
    let result = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        "hci0|CC:DD|Speaker|-60",
        "command",
        "shutdown",
        "--scan-timeout",
        "50ms",
    ])
    .await;

    let error = result.expect_err("command should fail without a sensor");
    assert_matches!(
        error.downcast_ref::<progressor::InteractionError>(),
        Some(progressor::InteractionError::NoMatchingDevice { .. })
    );
}

#[tokio::test]
async fn control_command_surfaces_connect_failure() {
    let result = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "--fake-connect-failure",
        "command",
        "tare",
    ])
    .await;

    let error = result.expect_err("connect should fail");
    assert_eq!(
        "fake backend rejected the connection to `AA:BB`",
        error.to_string()
    );
}

#[tokio::test]
async fn denied_permissions_abort_the_scan() {
    let result = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "--fake-deny",
        "location,bluetooth_connect",
        "scan",
    ])
    .await;

    let error = result.expect_err("scan should be refused");
    assert_matches!(
        error.downcast_ref::<progressor::InteractionError>(),
        Some(progressor::InteractionError::PermissionDenied)
    );
}

#[tokio::test]
async fn scan_command_applies_fake_discovery_delay() -> anyhow::Result<()> {
    let started_at = Instant::now();
    let stdout = run_with_argv([
        "progressor",
        "--fake",
        "--fake-scan",
        "hci0|AA:BB|Progressor_7F21|-48;hci0|11:22|Progressor_0A|-55",
        "--fake-discovery-delay",
        "40ms",
        "scan",
        "--duration",
        "200ms",
    ])
    .await?;

    assert!(started_at.elapsed() >= Duration::from_millis(200));
    assert!(stdout.contains(r#"{"event":"scan_finished","devices":2}"#));
    Ok(())
}

#[test]
fn fake_scan_fixture_is_required_in_fake_mode() {
    let error = progressor::Args::try_parse_from(["progressor", "--fake", "scan"])
        .expect_err("fake mode without fixtures should fail");
    assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
}

#[test]
fn fake_flags_require_fake_mode() {
    let error = progressor::Args::try_parse_from([
        "progressor",
        "--fake-scan",
        SENSOR_FIXTURE,
        "scan",
    ])
    .expect_err("fixtures without fake mode should fail");
    assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
}

#[test]
fn invalid_fixture_is_rejected_while_parsing() {
    let error = progressor::Args::try_parse_from([
        "progressor",
        "--fake",
        "--fake-scan",
        "invalid-record",
        "scan",
    ])
    .expect_err("malformed fixture should fail");
    assert_eq!(ErrorKind::ValueValidation, error.kind());
}

#[test]
fn unknown_sensor_command_is_rejected() {
    let error = progressor::Args::try_parse_from([
        "progressor",
        "--fake",
        "--fake-scan",
        SENSOR_FIXTURE,
        "command",
        "reboot",
    ])
    .expect_err("unknown command should fail");
    assert_eq!(ErrorKind::InvalidValue, error.kind());
}

#[test]
fn fake_args_builder_rejects_invalid_fixture() {
    let result = progressor::FakeArgs::builder().scan_fixture("invalid-record");
    assert_matches!(result, Err(progressor::FixtureError::InvalidRecordFieldCount));
}
