/// Coverage profile assertions for integration tests

/// Assert that a merged profile has exactly one header, for `mode`, on its first line
pub fn assert_single_header(profile: &str, mode: &str) {
    let header = format!("mode: {}", mode);
    assert_eq!(
        profile.lines().next(),
        Some(header.as_str()),
        "merged profile should start with '{}'",
        header
    );
    assert_eq!(
        profile.lines().filter(|line| line.starts_with("mode:")).count(),
        1,
        "merged profile should carry a single mode header:\n{}",
        profile
    );
}

/// Assert the coverage units of a merged profile, in order
pub fn assert_units(profile: &str, expected: &[&str]) {
    let units: Vec<&str> = profile.lines().skip(1).collect();
    assert_eq!(units, expected, "unexpected coverage units in merged profile");
}
