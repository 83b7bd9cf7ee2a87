//! Buyer-supplied fields for manual fulfillment

use serde_json::{Map, Value};

use super::error::OrderError;
use crate::catalog::ManualFormField;
use crate::core_types::ProductId;

/// Validate submitted fields against the product schema.
///
/// Returns a normalized object holding only declared keys with string values.
pub fn validate_manual_form(
    product_id: ProductId,
    schema: &[ManualFormField],
    input: Option<&Map<String, Value>>,
) -> Result<Value, OrderError> {
    let mut out = Map::new();
    for field in schema {
        let raw = input.and_then(|m| m.get(&field.key));
        let value = match raw {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(_) => {
                return Err(OrderError::ManualFormInvalid {
                    product_id,
                    field: field.key.clone(),
                    reason: "must be a scalar value",
                });
            }
        };
        if value.is_empty() {
            if field.required {
                return Err(OrderError::ManualFormInvalid {
                    product_id,
                    field: field.key.clone(),
                    reason: "is required",
                });
            }
            continue;
        }
        if field.max_len > 0 && value.chars().count() > field.max_len {
            return Err(OrderError::ManualFormInvalid {
                product_id,
                field: field.key.clone(),
                reason: "is too long",
            });
        }
        out.insert(field.key.clone(), Value::String(value));
    }
    Ok(Value::Object(out))
}
