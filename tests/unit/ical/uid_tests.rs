use caldav_sync::sanitize_uid;

#[test]
fn safe_uids_pass_through() {
    assert_eq!(
        sanitize_uid("event-123@example.com").expect("valid uid"),
        "event-123@example.com"
    );
}

#[test]
fn unsafe_characters_become_underscores() {
    assert_eq!(
        sanitize_uid("uid with spaces@x.com").expect("valid uid"),
        "uid_with_spaces@x.com"
    );
    assert_eq!(sanitize_uid("a/b?c#d").expect("valid uid"), "a_b_c_d");
}

#[test]
fn path_traversal_is_rejected() {
    sanitize_uid("../../../etc/passwd").expect_err("dot-dot must be rejected");
    sanitize_uid("..").expect_err("bare dot-dot must be rejected");
}

#[test]
fn lone_dot_is_rejected() {
    sanitize_uid(".").expect_err("lone dot must be rejected");
}

#[test]
fn surrounding_dots_are_trimmed() {
    assert_eq!(sanitize_uid(".abc.").expect("valid uid"), "abc");
}

#[test]
fn empty_results_are_rejected() {
    sanitize_uid("").expect_err("empty uid");
    sanitize_uid("...").expect_err("dots only");
}

#[test]
fn sanitized_output_contains_only_safe_characters() {
    let out = sanitize_uid("weird:uid/with\\many{}chars").expect("valid uid");
    assert!(
        out.chars()
            .all(|c| c.is_ascii_alphanumeric() || "@._-".contains(c))
    );
    assert!(!out.contains(".."));
}
