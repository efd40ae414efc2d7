//! Best-effort schema inference from a small document sample.
//!
//! The first type observed for a field wins; polymorphic fields are not
//! reconciled across documents.

use crate::query::Document;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

/// Examples kept per field
pub const MAX_EXAMPLES: usize = 3;

/// Inferred type of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Array,
    Null,
    Object,
    Number,
    String,
    Boolean,
}

impl FieldType {
    pub fn classify(value: &Value) -> Self {
        match value {
            Value::Array(_) => FieldType::Array,
            Value::Null => FieldType::Null,
            Value::Object(_) => FieldType::Object,
            Value::Number(_) => FieldType::Number,
            Value::String(_) => FieldType::String,
            Value::Bool(_) => FieldType::Boolean,
        }
    }
}

/// Summary of one field
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub examples: Vec<Value>,
}

/// Field summaries in first-discovery order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDescriptor {
    fields: Vec<(String, FieldSchema)>,
}

impl SchemaDescriptor {
    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, schema)| schema)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn entry(&mut self, name: &str, value: &Value) -> &mut FieldSchema {
        let idx = match self.fields.iter().position(|(field, _)| field == name) {
            Some(idx) => idx,
            None => {
                self.fields.push((
                    name.to_string(),
                    FieldSchema {
                        field_type: FieldType::classify(value),
                        examples: Vec::new(),
                    },
                ));
                self.fields.len() - 1
            }
        };
        &mut self.fields[idx].1
    }
}

impl Serialize for SchemaDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, schema) in &self.fields {
            map.serialize_entry(name, schema)?;
        }
        map.end()
    }
}

/// Infer a schema from sampled documents.
pub fn infer_schema(documents: &[Document]) -> SchemaDescriptor {
    let mut schema = SchemaDescriptor::default();

    for doc in documents {
        for (name, value) in doc {
            let field = schema.entry(name, value);
            if !value.is_null() && field.examples.len() < MAX_EXAMPLES {
                field.examples.push(value.clone());
            }
        }
    }

    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_basic_types_and_examples() {
        let schema = infer_schema(&[doc(json!({"a": 1, "b": "x", "c": [1, 2]}))]);

        let a = schema.get("a").unwrap();
        assert_eq!(a.field_type, FieldType::Number);
        assert_eq!(a.examples, vec![json!(1)]);

        let b = schema.get("b").unwrap();
        assert_eq!(b.field_type, FieldType::String);
        assert_eq!(b.examples, vec![json!("x")]);

        let c = schema.get("c").unwrap();
        assert_eq!(c.field_type, FieldType::Array);
        assert_eq!(c.examples, vec![json!([1, 2])]);
    }

    #[test]
    fn test_examples_capped_at_three() {
        let docs: Vec<Document> = (0..5).map(|i| doc(json!({ "n": i }))).collect();
        let schema = infer_schema(&docs);
        assert_eq!(schema.get("n").unwrap().examples, vec![json!(0), json!(1), json!(2)]);
    }

    #[test]
    fn test_first_seen_type_wins() {
        let schema = infer_schema(&[
            doc(json!({"v": "text"})),
            doc(json!({"v": 5})),
        ]);
        let v = schema.get("v").unwrap();
        assert_eq!(v.field_type, FieldType::String);
        assert_eq!(v.examples, vec![json!("text"), json!(5)]);
    }

    #[test]
    fn test_nulls_classified_but_not_sampled() {
        let schema = infer_schema(&[
            doc(json!({"deleted": null})),
            doc(json!({"deleted": true})),
        ]);
        let deleted = schema.get("deleted").unwrap();
        assert_eq!(deleted.field_type, FieldType::Null);
        assert_eq!(deleted.examples, vec![json!(true)]);
    }

    #[test]
    fn test_discovery_order_and_serialization() {
        let schema = infer_schema(&[
            doc(json!({"z": {"nested": 1}, "a": false})),
            doc(json!({"m": "late"})),
        ]);
        let names: Vec<&str> = schema.field_names().collect();
        assert_eq!(names, vec!["z", "a", "m"]);

        let rendered = serde_json::to_string(&schema).unwrap();
        assert!(rendered.starts_with(r#"{"z":{"type":"object""#));
        assert!(rendered.contains(r#""a":{"type":"boolean","examples":[false]}"#));
    }

    #[test]
    fn test_empty_sample() {
        assert!(infer_schema(&[]).is_empty());
    }
}
