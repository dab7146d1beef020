//! Sample record synthesis from a template

use crate::dataset::Record;
use crate::template::{FieldKind, Template};
use serde_json::json;

/// Build an example record for a template.
///
/// Each field's declared example is used when present; otherwise a
/// kind-appropriate placeholder is generated.
pub fn sample_record(template: &Template) -> Record {
    let mut record = Record::new();

    for (key, spec) in template.fields.iter() {
        let value = match &spec.example {
            Some(example) => example.clone(),
            None => match spec.kind {
                FieldKind::Boolean => json!(true),
                FieldKind::Number => json!(100),
                FieldKind::Date => json!("2024-01-01"),
                FieldKind::Select => spec
                    .options
                    .as_ref()
                    .and_then(|o| o.first())
                    .map(|o| json!(o))
                    .unwrap_or(serde_json::Value::Null),
                _ => json!(format!("Sample {}", key)),
            },
        };
        record.insert(key.to_string(), value);
    }

    record
}
