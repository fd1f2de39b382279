use lan_sweep_rs::error::RangeError;
use lan_sweep_rs::targets::{expand, TargetSpec, MAX_TARGETS};

#[test]
fn single_ip_expands_to_itself() {
    let once = expand("10.0.0.5", None).unwrap();
    assert_eq!(once, vec!["10.0.0.5"]);
    let again = expand(&once[0], None).unwrap();
    assert_eq!(again, once);
}

#[test]
fn reversed_range_is_an_error() {
    let err = expand("10.0.0.5", Some("10.0.0.1")).unwrap_err();
    assert!(matches!(err, RangeError::ReversedRange { .. }));
}

#[test]
fn equal_endpoints_are_a_single_address() {
    assert_eq!(expand("10.0.0.5", Some("10.0.0.5")).unwrap(), vec!["10.0.0.5"]);
}

#[test]
fn cidr_over_cap_is_rejected_not_truncated() {
    let err = expand("10.0.0.0/21", None).unwrap_err();
    assert_eq!(
        err,
        RangeError::RangeTooLarge {
            count: 2046,
            cap: MAX_TARGETS
        }
    );
    // a /22 has 1022 hosts and fits
    assert_eq!(expand("10.0.0.0/22", None).unwrap().len(), 1022);
}

#[test]
fn range_over_cap_is_rejected() {
    let err = expand("10.0.0.0", Some("10.0.4.0")).unwrap_err();
    assert!(matches!(err, RangeError::RangeTooLarge { count: 1025, .. }));
}

#[test]
fn huge_ipv6_block_is_rejected_without_overflow() {
    let err = expand("fd00::/64", None).unwrap_err();
    assert!(matches!(err, RangeError::RangeTooLarge { .. }));
    let full = TargetSpec::parse("::", Some("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff")).unwrap();
    assert_eq!(full.len(), u128::MAX);
}

#[test]
fn mixed_versions_and_garbage_are_rejected() {
    assert_eq!(
        expand("10.0.0.1", Some("fe80::1")).unwrap_err(),
        RangeError::VersionMismatch
    );
    assert!(matches!(
        expand("10.0.0.300", None).unwrap_err(),
        RangeError::InvalidAddress(_)
    ));
    assert!(matches!(
        expand("10.0.0.0/33", None).unwrap_err(),
        RangeError::InvalidAddress(_)
    ));
}

#[test]
fn output_is_ascending() {
    let ips = expand("192.168.1.250", Some("192.168.2.3")).unwrap();
    assert_eq!(ips.first().map(String::as_str), Some("192.168.1.250"));
    assert_eq!(ips.last().map(String::as_str), Some("192.168.2.3"));
    assert_eq!(ips.len(), 10);
}
