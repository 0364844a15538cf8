//! Gender/preference compatibility between two searching participants

use crate::types::{Gender, Preference, SearchRecord};

/// Decide whether two participants are mutually acceptable.
///
/// Each side's preference must accept the other side's gender; `Any` accepts
/// everyone, including participants without a recorded gender. The rule is
/// symmetric because it is the conjunction of both directions.
pub fn compatible(a: &SearchRecord, b: &SearchRecord) -> bool {
    attributes_compatible(a.gender, a.preference, b.gender, b.preference)
}

/// Same rule expressed over raw attributes
pub fn attributes_compatible(
    a_gender: Option<Gender>,
    a_preference: Preference,
    b_gender: Option<Gender>,
    b_preference: Preference,
) -> bool {
    a_preference.accepts(b_gender) && b_preference.accepts(a_gender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gender_strategy() -> impl Strategy<Value = Option<Gender>> {
        prop_oneof![
            Just(None),
            Just(Some(Gender::Male)),
            Just(Some(Gender::Female)),
            Just(Some(Gender::Other)),
        ]
    }

    fn preference_strategy() -> impl Strategy<Value = Preference> {
        prop_oneof![
            Just(Preference::Any),
            Just(Preference::Male),
            Just(Preference::Female),
            Just(Preference::Other),
        ]
    }

    #[test]
    fn test_both_any_is_compatible() {
        assert!(attributes_compatible(
            Some(Gender::Male),
            Preference::Any,
            Some(Gender::Male),
            Preference::Any
        ));
        assert!(attributes_compatible(None, Preference::Any, None, Preference::Any));
    }

    #[test]
    fn test_one_sided_preference() {
        // Female wants male, partner accepts anyone
        assert!(attributes_compatible(
            Some(Gender::Female),
            Preference::Male,
            Some(Gender::Male),
            Preference::Any
        ));
        assert!(!attributes_compatible(
            Some(Gender::Female),
            Preference::Male,
            Some(Gender::Female),
            Preference::Any
        ));
    }

    #[test]
    fn test_mutual_preferences() {
        assert!(attributes_compatible(
            Some(Gender::Male),
            Preference::Female,
            Some(Gender::Female),
            Preference::Male
        ));
        // B wants a female too, A is male
        assert!(!attributes_compatible(
            Some(Gender::Male),
            Preference::Female,
            Some(Gender::Female),
            Preference::Female
        ));
        assert!(attributes_compatible(
            Some(Gender::Other),
            Preference::Other,
            Some(Gender::Other),
            Preference::Other
        ));
    }

    #[test]
    fn test_unknown_gender_only_matches_wildcards() {
        assert!(!attributes_compatible(
            None,
            Preference::Any,
            Some(Gender::Male),
            Preference::Female
        ));
    }

    proptest! {
        #[test]
        fn compatibility_is_symmetric(
            a_gender in gender_strategy(),
            a_pref in preference_strategy(),
            b_gender in gender_strategy(),
            b_pref in preference_strategy(),
        ) {
            prop_assert_eq!(
                attributes_compatible(a_gender, a_pref, b_gender, b_pref),
                attributes_compatible(b_gender, b_pref, a_gender, a_pref)
            );
        }

        #[test]
        fn wildcards_on_both_sides_always_match(
            a_gender in gender_strategy(),
            b_gender in gender_strategy(),
        ) {
            prop_assert!(attributes_compatible(a_gender, Preference::Any, b_gender, Preference::Any));
        }
    }
}
