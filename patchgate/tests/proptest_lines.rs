//! Property-based tests for line edits and plan validation.

use patchgate::core::guardrail::{GuardrailPolicy, validate};
use patchgate::core::lines::apply_line_op;
use patchgate::core::plan::{OpKind, parse_plan};
use patchgate::error::GuardrailViolation;
use patchgate::test_support::{create_op, plan_json};
use proptest::prelude::*;

fn body(lines: &[String]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// A file of 1..12 non-empty lines plus a valid inclusive range into it.
fn file_and_range() -> impl Strategy<Value = (Vec<String>, usize, usize)> {
    prop::collection::vec("[a-z]{1,6}", 1..12).prop_flat_map(|lines| {
        let len = lines.len();
        (Just(lines), 1..=len).prop_flat_map(move |(lines, start)| {
            (Just(lines), Just(start), start..=len)
        })
    })
}

fn safe_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9_]{0,6}", 1..4).prop_map(|parts| parts.join("/"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: replacing a range and then replacing the new range with the
    /// original text restores the file.
    #[test]
    fn replace_range_is_invertible(
        (lines, start, end) in file_and_range(),
        replacement in prop::collection::vec("[A-Z]{1,6}", 1..5)
    ) {
        let original = body(&lines);
        let edited = apply_line_op(&original, &OpKind::ReplaceRange {
            start_line: start,
            end_line: end,
            content: body(&replacement),
        }).expect("in range");

        let restored = apply_line_op(&edited, &OpKind::ReplaceRange {
            start_line: start,
            end_line: start + replacement.len() - 1,
            content: body(&lines[start - 1..end]),
        }).expect("in range");

        prop_assert_eq!(restored, original);
    }

    /// Property: deleting a range removes exactly that many lines.
    #[test]
    fn delete_range_shrinks_by_range_length((lines, start, end) in file_and_range()) {
        let edited = apply_line_op(&body(&lines), &OpKind::DeleteRange {
            start_line: start,
            end_line: end,
        }).expect("in range");
        prop_assert_eq!(edited.lines().count(), lines.len() - (end - start + 1));
    }

    /// Property: validation is a pure function of plan and policy.
    #[test]
    fn validation_is_idempotent(paths in prop::collection::vec(safe_path(), 1..6)) {
        let ops = paths.iter().map(|path| create_op(path, "x\n")).collect();
        let plan = parse_plan(&plan_json("default", ops), "default").expect("parse");
        let policy = GuardrailPolicy::default();
        let first = validate(&plan, &policy);
        let second = validate(&plan, &policy);
        prop_assert_eq!(first, second);
    }

    /// Property: any `..` segment is rejected no matter where it appears.
    #[test]
    fn traversal_anywhere_is_unsafe(
        prefix in prop::collection::vec("[a-z]{1,4}", 0..3),
        suffix in prop::collection::vec("[a-z]{1,4}", 1..3)
    ) {
        let mut parts = prefix;
        parts.push("..".to_string());
        parts.extend(suffix);
        let path = parts.join("/");
        let plan = parse_plan(
            &plan_json("default", vec![create_op(&path, "x")]),
            "default",
        ).expect("parse");
        let rejected = matches!(
            validate(&plan, &GuardrailPolicy::default()),
            Err(GuardrailViolation::UnsafePath { .. })
        );
        prop_assert!(rejected);
    }
}
