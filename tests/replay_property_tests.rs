//! Property tests for replay and validation boundaries

use event_schemas::replay::{generate_schemas, replay};
use event_schemas::{ColumnDefinition, Operation, Schema, UpdateSchemaRequest, Validator};
use proptest::prelude::*;

/// A random but valid migration history for one event: every step only
/// touches columns that exist at that point.
fn arb_history() -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec((0u8..3, 0usize..16, 1usize..4), 1..12).prop_map(|steps| {
        let mut live: Vec<String> = Vec::new();
        let mut next_id = 0;
        let mut ops = Vec::new();
        for (version, (kind, pick, batch)) in steps.into_iter().enumerate() {
            let version = version as u32;
            let mut ordering = 0;
            for _ in 0..batch {
                let op = if kind == 0 || live.is_empty() || version == 0 {
                    let name = format!("col_{next_id}");
                    next_id += 1;
                    live.push(name.clone());
                    Operation::add("prop_event", &ColumnDefinition::new(&name, &name, "int"))
                } else if kind == 1 {
                    let name = live.remove(pick % live.len());
                    Operation::delete("prop_event", name)
                } else {
                    let idx = pick % live.len();
                    let to = format!("renamed_{next_id}");
                    next_id += 1;
                    let from = std::mem::replace(&mut live[idx], to.clone());
                    Operation::rename("prop_event", from, to)
                };
                ops.push(op.at(version, ordering));
                ordering += 1;
            }
        }
        ops
    })
}

proptest! {
    #[test]
    fn prop_replay_is_deterministic(ops in arb_history()) {
        let first = generate_schemas(&ops).unwrap();
        let second = generate_schemas(&ops).unwrap();
        prop_assert_eq!(first.len(), 1);
        prop_assert_eq!(first[0].checksum().unwrap(), second[0].checksum().unwrap());
        prop_assert_eq!(&first, &second);
    }

    #[test]
    fn prop_generate_matches_sequential_replay(ops in arb_history()) {
        let expected = replay(Schema::new("prop_event"), &ops).unwrap();
        let generated = generate_schemas(&ops).unwrap().remove(0);
        prop_assert_eq!(&generated.columns, &expected.columns);
        prop_assert_eq!(generated.version, ops.iter().map(|o| o.version).max().unwrap());
    }

    #[test]
    fn prop_row_order_does_not_matter(ops in arb_history()) {
        let mut reversed = ops.clone();
        reversed.reverse();
        prop_assert_eq!(generate_schemas(&ops).unwrap(), generate_schemas(&reversed).unwrap());
    }

    #[test]
    fn prop_outbound_names_stay_unique(ops in arb_history()) {
        let schema = generate_schemas(&ops).unwrap().remove(0);
        let mut names: Vec<_> = schema.columns.iter().map(|c| c.outbound_name.clone()).collect();
        names.sort();
        names.dedup();
        prop_assert_eq!(names.len(), schema.columns.len());
    }

    #[test]
    fn prop_identifier_length_boundary(len in 0usize..200) {
        let validator = Validator::default();
        let name = "a".repeat(len);
        prop_assert_eq!(validator.validate_identifier(&name).is_ok(), (1..=127).contains(&len));
    }

    #[test]
    fn prop_leading_digit_rejected(digit in 0u8..10, rest in "[a-z_]{0,20}") {
        let validator = Validator::default();
        let name = format!("{digit}{rest}");
        prop_assert!(validator.validate_identifier(&name).is_err());
    }

    #[test]
    fn prop_update_ceiling(existing in 250usize..300, added in 0usize..60) {
        let validator = Validator::default();
        let current = Schema::with_columns(
            "wide_event",
            (0..existing).map(|i| ColumnDefinition::new("f", format!("c{i}"), "int")).collect(),
        );
        let request = (0..added).fold(UpdateSchemaRequest::new("wide_event"), |req, i| {
            req.add(ColumnDefinition::new("g", format!("n{i}"), "int"))
        });
        let result = validator.pre_validate_update(&request, &current);
        if added == 0 {
            prop_assert!(result.is_err());
        } else {
            prop_assert_eq!(result.is_ok(), existing + added <= 300);
        }
    }
}

#[test]
fn test_rename_of_missing_column_poisons_replay() {
    let ops = vec![
        Operation::add("login", &ColumnDefinition::new("a", "a", "int")).at(0, 0),
        Operation::rename("login", "ghost", "b").at(1, 0),
    ];
    assert!(replay(Schema::new("login"), &ops).is_err());
    assert!(generate_schemas(&ops).is_err());
}
