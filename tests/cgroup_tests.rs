//! Tests for cgroup-v2 limit encoding.

use ccrun::cgroup::{cpu_max_value, is_cgroup_v2, memory_max_value};

// =============================================================================
// cpu.max Encoding
// =============================================================================

#[test]
fn half_cpu_is_half_the_period() {
    assert_eq!(cpu_max_value(50), "50000 100000");
}

#[test]
fn quarter_cpu() {
    assert_eq!(cpu_max_value(25), "25000 100000");
}

#[test]
fn zero_percent_means_unlimited() {
    assert_eq!(cpu_max_value(0), "max");
}

#[test]
fn full_or_oversubscribed_cpu_means_unlimited() {
    assert_eq!(cpu_max_value(100), "max");
    assert_eq!(cpu_max_value(400), "max");
}

#[test]
fn one_percent_clamps_to_the_kernel_minimum_quota() {
    let encoded = cpu_max_value(1);
    let quota: u64 = encoded.split_whitespace().next().unwrap().parse().unwrap();
    assert!(quota >= 1000, "quota {} below kernel minimum", quota);
}

// =============================================================================
// memory.max Encoding
// =============================================================================

#[test]
fn positive_limits_encode_as_bytes() {
    assert_eq!(memory_max_value(64 * 1024 * 1024), "67108864");
    assert_eq!(memory_max_value(1), "1");
}

#[test]
fn zero_or_negative_limits_mean_unlimited() {
    assert_eq!(memory_max_value(0), "max");
    assert_eq!(memory_max_value(-42), "max");
}

// =============================================================================
// Hierarchy Detection
// =============================================================================

#[test]
fn v2_detection_does_not_panic() {
    // Result depends on the host; the statfs probe itself must be safe.
    let _ = is_cgroup_v2();
}
