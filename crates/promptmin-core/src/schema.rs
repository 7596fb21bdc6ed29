use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Restricted JSON schema: `object` with `required`/`properties`, and the
/// scalar `string`, `number`, `boolean` and `array` types. Anything else is
/// rejected when the config is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SchemaLite {
    Object {
        #[serde(default)]
        required: Vec<String>,
        #[serde(default)]
        properties: BTreeMap<String, SchemaLite>,
    },
    String,
    Number,
    Boolean,
    Array,
}

impl SchemaLite {
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            SchemaLite::Object {
                required,
                properties,
            } => {
                let Value::Object(object) = value else {
                    return Err("expected object".to_string());
                };
                for key in required {
                    if !object.contains_key(key) {
                        return Err(format!("missing required: {key}"));
                    }
                }
                for (key, schema) in properties {
                    let Some(field) = object.get(key) else {
                        continue;
                    };
                    schema
                        .validate(field)
                        .map_err(|reason| format!("{key}: {reason}"))?;
                }
                Ok(())
            }
            SchemaLite::String => expect(value.is_string(), "expected string"),
            SchemaLite::Number => expect(value.is_number(), "expected number"),
            SchemaLite::Boolean => expect(value.is_boolean(), "expected boolean"),
            SchemaLite::Array => expect(value.is_array(), "expected array"),
        }
    }
}

fn expect(ok: bool, reason: &str) -> Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(reason.to_string())
    }
}
