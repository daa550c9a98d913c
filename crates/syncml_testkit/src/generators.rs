//! Property-based test generators using proptest.

use crate::fixtures::vcard;
use proptest::prelude::*;

/// Strategy for contact names that survive vCard and XML escaping.
pub fn contact_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,12}").expect("Invalid regex")
}

/// Strategy for a set of distinct vCards.
pub fn contact_set_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(contact_name_strategy(), 1..=max.max(1))
        .prop_map(|names| names.iter().map(|n| vcard(n)).collect())
}

/// Strategy for client maximum message sizes, from barely enough for one
/// small item up to comfortable.
pub fn max_message_size_strategy() -> impl Strategy<Value = usize> {
    1_800usize..12_000
}

/// Strategy for client item ids.
pub fn cuid_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9]{1,6}").expect("Invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn contact_sets_are_distinct() {
        let mut runner = TestRunner::default();
        let set = contact_set_strategy(5)
            .new_tree(&mut runner)
            .unwrap()
            .current();
        let mut unique = set.clone();
        unique.dedup();
        assert_eq!(unique.len(), set.len());
        assert!(!set.is_empty() && set.len() <= 5);
    }
}
