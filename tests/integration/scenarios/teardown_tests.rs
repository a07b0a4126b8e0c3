use crate::integration::infrastructure::{assert_single_header, assert_units, CollectorTestHarness};
use eyre::Result;
use std::fs;
use std::path::PathBuf;

/// Three runs merge into one profile with the units in run order
#[tokio::test]
async fn test_merges_runs_in_order() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = CollectorTestHarness::new()?;
    let mut collector = harness.collector(true)?;

    let runs: [&[&str]; 3] = [&["hello"], &[], &["a", "b"]];
    for args in runs {
        collector
            .run_binary(&CollectorTestHarness::echo_arg("set").args(args.iter().copied()))
            .await?;
    }
    collector.tear_down()?;

    let merged = harness.read_merged_profile()?;
    assert_single_header(&merged, "set");
    assert_units(
        &merged,
        &[
            "demos/echo_arg.rs:one_argument 1 1",
            "demos/echo_arg.rs:no_argument 1 1",
            "demos/echo_arg.rs:too_many_arguments 1 1",
        ],
    );
    Ok(())
}

#[tokio::test]
async fn test_merged_profile_keeps_count_mode() -> Result<()> {
    let harness = CollectorTestHarness::new()?;
    let mut collector = harness.collector(true)?;

    collector
        .run_binary(&CollectorTestHarness::echo_arg("count").args(["x"]))
        .await?;
    collector.tear_down()?;

    let merged = harness.read_merged_profile()?;
    assert_single_header(&merged, "count");
    assert_units(&merged, &["demos/echo_arg.rs:one_argument 1 1"]);
    Ok(())
}

#[tokio::test]
async fn test_tear_down_without_runs_writes_nothing() -> Result<()> {
    let harness = CollectorTestHarness::new()?;
    let mut collector = harness.collector(true)?;

    collector.tear_down()?;
    assert!(!harness.merged_profile().exists());
    Ok(())
}

/// Temporary profiles are gone after teardown and a second teardown changes nothing
#[tokio::test]
async fn test_tear_down_releases_temporary_files_once() -> Result<()> {
    let harness = CollectorTestHarness::new()?;
    let mut collector = harness.collector(true)?;

    collector
        .run_binary(&CollectorTestHarness::echo_arg("atomic").args(["x"]))
        .await?;
    let profiles: Vec<PathBuf> = collector.coverage_profiles().map(PathBuf::from).collect();
    assert_eq!(profiles.len(), 1);
    assert!(profiles[0].exists());

    collector.tear_down()?;
    assert!(!profiles[0].exists());
    assert!(!collector.is_ready());

    fs::write(harness.merged_profile(), "sentinel")?;
    collector.tear_down()?;
    assert_eq!(harness.read_merged_profile()?, "sentinel");
    Ok(())
}

/// Dropping a collector without teardown still removes its temporary files
#[tokio::test]
async fn test_drop_releases_temporary_files() -> Result<()> {
    let harness = CollectorTestHarness::new()?;
    let mut collector = harness.collector(true)?;

    collector
        .run_binary(&CollectorTestHarness::echo_arg("set").args(["x"]))
        .await?;
    let profiles: Vec<PathBuf> = collector.coverage_profiles().map(PathBuf::from).collect();
    drop(collector);

    assert!(profiles.iter().all(|path| !path.exists()));
    assert!(!harness.merged_profile().exists());
    Ok(())
}

/// A profile the callee never wrote fails the merge as an ordinary error
#[tokio::test]
async fn test_corrupted_profile_fails_merge() -> Result<()> {
    let harness = CollectorTestHarness::new()?;
    let mut collector = harness.collector(true)?;

    collector
        .run_binary(&CollectorTestHarness::echo_arg("set").args(["x"]))
        .await?;
    let profile: PathBuf = collector
        .coverage_profiles()
        .map(PathBuf::from)
        .next()
        .expect("one coverage profile");
    fs::write(&profile, "garbage\n")?;

    let err = collector.tear_down().unwrap_err();
    assert!(format!("{:#}", err).contains("missing coverage mode"));
    assert!(!profile.exists());
    Ok(())
}
