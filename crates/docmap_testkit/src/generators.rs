//! Property-based test generators using proptest.
//!
//! Provides strategies for ids, field values and sequences of operations
//! on tracked fields and groups.

use docmap_codec::{ObjectId, Value};
use proptest::prelude::*;

/// Strategy for generating document ids.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    prop::array::uniform16(any::<u8>()).prop_map(ObjectId::from_bytes)
}

/// Strategy for generating valid field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating values of a `string` field, null included.
pub fn text_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        4 => prop::string::string_regex("[a-zA-Z0-9 ]{0,24}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
    ]
}

/// Strategy for generating scalar values of any kind.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z]{0,12}".prop_map(Value::Text),
        object_id_strategy().prop_map(Value::Id),
    ]
}

/// Strategy for generating a non-empty sequence of writes to one field.
pub fn field_writes_strategy(max_writes: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(text_value_strategy(), 1..=max_writes.max(1))
}

/// An operation on a group, naming members by their index in a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOperation {
    /// Queue members for addition.
    Add(Vec<usize>),
    /// Queue members for removal.
    Remove(Vec<usize>),
}

/// Strategy for generating a group operation over `pool` members.
pub fn group_operation_strategy(pool: usize) -> impl Strategy<Value = GroupOperation> {
    let members = prop::collection::vec(0..pool.max(1), 1..4);
    prop_oneof![
        3 => members.clone().prop_map(GroupOperation::Add),
        2 => members.prop_map(GroupOperation::Remove),
    ]
}

/// Strategy for generating a sequence of group operations.
pub fn group_operations_strategy(
    pool: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<GroupOperation>> {
    prop::collection::vec(group_operation_strategy(pool), min_ops..max_ops)
}

/// Expected content of a group: every saved member, then every added one,
/// leaving out anything named in `remove`. Repeats are kept.
pub fn expected_group_content<T: PartialEq + Clone>(saved: &[T], add: &[T], remove: &[T]) -> Vec<T> {
    saved
        .iter()
        .chain(add)
        .filter(|member| !remove.contains(member))
        .cloned()
        .collect()
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_group_content() {
        let all = expected_group_content(&["A", "B", "C", "D"], &["U", "V"], &["B", "V"]);
        assert_eq!(all, vec!["A", "C", "D", "U"]);
    }

    #[test]
    fn expected_group_content_keeps_repeats() {
        let all = expected_group_content(&["A"], &["U", "U"], &[]);
        assert_eq!(all, vec!["A", "U", "U"]);
        assert!(expected_group_content(&["A"], &["U", "U"], &["U", "A"]).is_empty());
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn field_name_is_valid(name in field_name_strategy()) {
            let first = name.chars().next();
            prop_assert!(first.is_some_and(|c| c.is_ascii_lowercase()));
            prop_assert!(!name.contains('.'));
        }

        #[test]
        fn field_writes_are_not_empty(writes in field_writes_strategy(5)) {
            prop_assert!(!writes.is_empty());
            prop_assert!(writes.len() <= 5);
            prop_assert!(writes.iter().all(|v| v.is_null() || v.as_text().is_some()));
        }

        #[test]
        fn group_operations_stay_in_pool(ops in group_operations_strategy(4, 1, 10)) {
            for op in ops {
                let (GroupOperation::Add(members) | GroupOperation::Remove(members)) = op;
                prop_assert!(members.iter().all(|m| *m < 4));
            }
        }
    }
}
