use crate::integration::infrastructure::CollectorTestHarness;
use bincover::Invocation;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Writes an executable script that runs `body`
///
/// The handle is synced and closed before the path is returned. Spawns from
/// tests running in parallel may still inherit it for a moment, which the
/// runner waits out.
fn fake_binary(harness: &CollectorTestHarness, body: &str) -> PathBuf {
    let path = harness.temp_path().join("fake_instr_bin");
    let mut file = fs::File::create(&path).unwrap();
    write!(file, "#!/bin/sh\n{}\n", body).unwrap();
    file.set_permissions(fs::Permissions::from_mode(0o755)).unwrap();
    file.sync_all().unwrap();
    drop(file);
    path
}

#[tokio::test]
#[should_panic(expected = "cannot merge profiles with different coverage modes")]
async fn test_mode_mismatch_across_runs_is_fatal() {
    let harness = CollectorTestHarness::new().unwrap();
    let mut collector = harness.collector(true).unwrap();

    collector
        .run_binary(&CollectorTestHarness::echo_arg("set").args(["hello"]))
        .await
        .unwrap();
    assert_eq!(collector.run_count(), 1);

    let _ = collector
        .run_binary(&CollectorTestHarness::echo_arg("atomic").args(["hello"]))
        .await;
}

#[tokio::test]
#[should_panic(expected = "expected \"set\", found \"\"")]
async fn test_empty_mode_after_adopted_mode_is_mismatch() {
    let harness = CollectorTestHarness::new().unwrap();
    let mut collector = harness.collector(true).unwrap();

    collector
        .run_binary(&CollectorTestHarness::echo_arg("set").args(["hello"]))
        .await
        .unwrap();

    let _ = collector
        .run_binary(&CollectorTestHarness::echo_arg("").args(["hello"]))
        .await;
}

#[tokio::test]
#[should_panic(expected = "coverage mode cannot be empty")]
async fn test_uninstrumented_binary_with_coverage_is_fatal() {
    let harness = CollectorTestHarness::new().unwrap();
    let mut collector = harness.collector(true).unwrap();

    let _ = collector
        .run_binary(&CollectorTestHarness::echo_arg("").args(["hello"]))
        .await;
}

#[tokio::test]
#[should_panic(expected = "unexpected coverage mode \"bogus\"")]
async fn test_unsupported_mode_is_fatal() {
    let harness = CollectorTestHarness::new().unwrap();
    let binary = fake_binary(
        &harness,
        r#"printf 'START_OF_METADATA\n{"cover_mode":"bogus","exit_code":0}\nEND_OF_METADATA\n'"#,
    );
    let mut collector = harness.collector(true).unwrap();

    let _ = collector.run_binary(&Invocation::new(binary)).await;
}

#[tokio::test]
#[should_panic(expected = "metadata end marker is unexpectedly missing")]
async fn test_truncated_metadata_is_fatal() {
    let harness = CollectorTestHarness::new().unwrap();
    let binary = fake_binary(
        &harness,
        r#"printf 'output\nSTART_OF_METADATA\n{"cover_mode":"set","exit_code":0}\n'"#,
    );
    let mut collector = harness.collector(false).unwrap();

    let _ = collector.run_binary(&Invocation::new(binary)).await;
}

#[tokio::test]
#[should_panic(expected = "malformed metadata payload")]
async fn test_malformed_metadata_is_fatal() {
    let harness = CollectorTestHarness::new().unwrap();
    let binary = fake_binary(
        &harness,
        r#"printf 'START_OF_METADATA\n{"cover_mode":\nEND_OF_METADATA\n'"#,
    );
    let mut collector = harness.collector(false).unwrap();

    let _ = collector.run_binary(&Invocation::new(binary)).await;
}

/// A callee that exits non-zero never reaches metadata extraction
#[tokio::test]
async fn test_non_zero_exit_is_recoverable() -> eyre::Result<()> {
    let harness = CollectorTestHarness::new()?;
    let binary = fake_binary(&harness, "echo 'boom' >&2\nexit 4");
    let mut collector = harness.collector(true)?;

    let err = collector
        .run_binary(&Invocation::new(&binary))
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains(&binary.display().to_string()));
    assert!(err.contains("exit code: 4"));
    assert!(err.contains("boom"));
    assert_eq!(collector.run_count(), 0);

    collector.tear_down()?;
    Ok(())
}

/// Output bytes that are not UTF-8 reach the caller unchanged
#[tokio::test]
async fn test_non_utf8_output_is_preserved() -> eyre::Result<()> {
    let harness = CollectorTestHarness::new()?;
    let binary = fake_binary(
        &harness,
        r#"printf 'a\377b\nSTART_OF_METADATA\n{"cover_mode":"","exit_code":0}\nEND_OF_METADATA\n'"#,
    );
    let mut collector = harness.collector(false)?;

    let outcome = collector.run_binary(&Invocation::new(binary)).await?;
    assert_eq!(outcome.output, b"a\xffb\n");
    assert_eq!(outcome.output_lossy(), "a\u{fffd}b\n");

    collector.tear_down()?;
    Ok(())
}
