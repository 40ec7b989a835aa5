//! Property-based tests for the markup translator.

use proptest::prelude::*;
use quill_syntax::{
    GeneratedClassContext, MarkupTranslator, Statement, TemplateTranslator, Translation,
};

// ============================================================================
// Test helpers
// ============================================================================

fn translate(src: &str) -> Translation {
    MarkupTranslator::new().translate(src, &GeneratedClassContext::default())
}

fn literal_text(translation: &Translation) -> String {
    translation
        .tree
        .execute_body(&GeneratedClassContext::default())
        .iter()
        .filter_map(|s| match s {
            Statement::WriteLiteral { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

// Markup without any '@': tags, attributes, entities, unicode
fn markup_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "[^@]{0,12}",
            "<[a-z]{1,5}( [a-z]{1,5}=\"[^@\"]{0,6}\")*>",
            "</[a-z]{1,5}>",
        ],
        0..8,
    )
    .prop_map(|parts| parts.concat())
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    /// Text without directives translates to itself.
    #[test]
    fn markup_without_directives_is_identity(src in markup_strategy()) {
        let translation = translate(&src);
        prop_assert!(translation.diagnostics.is_empty());
        let body = translation.tree.execute_body(&GeneratedClassContext::default());
        let all_literal = body.iter().all(|s| matches!(s, Statement::WriteLiteral { .. }));
        prop_assert!(all_literal);
        prop_assert_eq!(literal_text(&translation), src);
    }

    /// Literal statements never overlap and appear in source order.
    #[test]
    fn literal_positions_increase(src in "[a-z <>=\"@.()]{0,40}") {
        let translation = translate(&src);
        let positions: Vec<usize> = translation
            .tree
            .execute_body(&GeneratedClassContext::default())
            .iter()
            .filter_map(|s| match s {
                Statement::WriteLiteral { position, text } => Some(position + text.len()),
                _ => None,
            })
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    }

    /// Translation never panics and diagnostics point inside the template.
    #[test]
    fn diagnostics_stay_in_bounds(src in "\\PC{0,60}") {
        let translation = translate(&src);
        for d in &translation.diagnostics {
            prop_assert!(d.position <= src.len());
            prop_assert!(d.line >= 1 && d.column >= 1);
        }
    }

    /// An escaped '@' always renders as a single '@'.
    #[test]
    fn escaped_at_collapses(before in "[a-z ]{0,8}", after in "[a-z ]{0,8}") {
        let src = format!("{before} @@{after}");
        let translation = translate(&src);
        prop_assert_eq!(literal_text(&translation), format!("{before} @{after}"));
    }
}
