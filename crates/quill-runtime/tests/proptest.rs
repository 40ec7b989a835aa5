//! Property-based tests for attribute rendering and encoding.

use proptest::prelude::*;
use quill_runtime::{
    write_attribute_to, AttributeValue, EncodedStringFactory, HtmlEncodedStringFactory,
    PositionTagged, TemplateOutput, TemplateValue,
};
use serde_json::Value;

#[derive(Default)]
struct Buffer(String);

impl TemplateOutput for Buffer {
    fn write_literal(&mut self, text: &str) {
        self.0.push_str(text);
    }

    fn encoder(&self) -> &dyn EncodedStringFactory {
        &HtmlEncodedStringFactory
    }
}

fn render(values: &[AttributeValue]) -> String {
    let mut out = Buffer::default();
    write_attribute_to(
        &mut out,
        "data-x",
        &PositionTagged::new(" data-x=\"".to_string(), 0),
        &PositionTagged::new("\"".to_string(), 0),
        values,
    );
    out.0
}

fn suppressed_value() -> impl Strategy<Value = TemplateValue> {
    prop_oneof![
        Just(TemplateValue::Json(Value::Null)),
        Just(TemplateValue::from(false)),
    ]
}

proptest! {
    /// An attribute whose fragments are all null or false renders nothing.
    #[test]
    fn suppressed_fragments_collapse_the_attribute(
        values in prop::collection::vec(suppressed_value(), 1..6),
        prefix in "[ ]{0,3}",
    ) {
        let fragments: Vec<AttributeValue> = values
            .into_iter()
            .map(|v| AttributeValue::dynamic((prefix.as_str(), 0), v, 0))
            .collect();
        prop_assert_eq!(render(&fragments), "");
    }

    /// Encoded output never contains raw markup characters.
    #[test]
    fn html_encoding_removes_markup(text in "\\PC{0,40}") {
        let encoded = HtmlEncodedStringFactory.create_encoded_string(&text);
        let encoded = encoded.as_str();
        prop_assert!(!encoded.contains('<'));
        prop_assert!(!encoded.contains('>'));
        prop_assert!(!encoded.contains('"'));
    }

    /// A single string fragment is wrapped by the outer prefix and suffix.
    #[test]
    fn single_fragment_is_wrapped(text in "[a-z0-9 ]{1,20}") {
        let fragments = vec![AttributeValue::dynamic(("", 0), TemplateValue::from(text.as_str()), 0)];
        prop_assert_eq!(render(&fragments), format!(" data-x=\"{text}\""));
    }
}
