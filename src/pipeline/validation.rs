//! Record field validation
//!
//! Shared by the `validate` stage and the orchestrator's validate-only mode.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One field problem in one input record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFieldError {
    pub record_index: u64,
    pub field: String,
    pub message: String,
}

/// Normalized registration fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub secondary_link_id: Option<String>,
}

impl NormalizedRecord {
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "phone": self.phone,
            "email": self.email,
            "secondary_link_id": self.secondary_link_id,
        })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

fn string_field<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Strip formatting and country/trunk prefixes; `None` unless 10 digits remain.
/// Only `+`, spaces and `-` count as formatting; any other character rejects.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '0'..='9' => digits.push(c),
            '+' | ' ' | '-' => {}
            _ => return None,
        }
    }
    let national = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('0') => &digits[1..],
        12 if digits.starts_with("91") => &digits[2..],
        _ => return None,
    };
    if national.starts_with('0') {
        return None;
    }
    Some(national.to_string())
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Validate one record, collecting every field error.
pub fn validate_record(
    record_index: u64,
    record: &Value,
) -> Result<NormalizedRecord, Vec<RecordFieldError>> {
    let mut errors = Vec::new();
    let mut error = |field: &str, message: &str| {
        errors.push(RecordFieldError {
            record_index,
            field: field.to_string(),
            message: message.to_string(),
        })
    };

    if !record.is_object() {
        error("record", "must be an object");
        return Err(errors);
    }

    let name = string_field(record, "name");
    if name.is_none() {
        error("name", "is required");
    }

    let phone = match string_field(record, "phone") {
        None => {
            error("phone", "is required");
            None
        }
        Some(raw) => {
            let normalized = normalize_phone(raw);
            if normalized.is_none() {
                error("phone", "must be a valid 10 digit mobile number");
            }
            normalized
        }
    };

    let email = string_field(record, "email");
    if let Some(email) = email {
        if !valid_email(email) {
            error("email", "is not a valid email address");
        }
    }

    match (name, phone) {
        (Some(name), Some(phone)) if errors.is_empty() => Ok(NormalizedRecord {
            name: name.to_string(),
            phone,
            email: email.map(str::to_lowercase),
            secondary_link_id: string_field(record, "fpo_id").map(str::to_string),
        }),
        _ => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("98765 43210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_phone("+91-98765-43210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_phone("09876543210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("0123456789"), None);
    }

    #[test]
    fn test_normalize_phone_rejects_stray_characters() {
        assert_eq!(normalize_phone("98765abc43210"), None);
        assert_eq!(normalize_phone("(987) 654-3210"), None);
        assert_eq!(normalize_phone("98765.43210"), None);
        assert_eq!(normalize_phone("+91 98765-43210").as_deref(), Some("9876543210"));
    }

    #[test]
    fn test_valid_record() {
        let record = json!({"name": "Asha", "phone": "+91 9876543210", "email": "Asha@Example.com"});
        let normalized = validate_record(0, &record).unwrap();
        assert_eq!(normalized.phone, "9876543210");
        assert_eq!(normalized.email.as_deref(), Some("asha@example.com"));
        assert_eq!(normalized.secondary_link_id, None);
    }

    #[test]
    fn test_collects_all_field_errors() {
        let record = json!({"phone": "12", "email": "nope"});
        let errors = validate_record(4, &record).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "phone", "email"]);
        assert!(errors.iter().all(|e| e.record_index == 4));
    }

    #[test]
    fn test_non_object_record() {
        let errors = validate_record(0, &json!("just a string")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "record");
    }
}
