pub mod protocol_violation_tests;
pub mod teardown_tests;
