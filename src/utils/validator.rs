//! Field checks applied at data-entry time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{HrError, HrResult};

static ID_CARD_18: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{17}[0-9X]$").unwrap());
static ID_CARD_15: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{15}$").unwrap());

fn blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

pub fn require(field: &str, value: Option<&str>) -> HrResult<()> {
    if blank(value) {
        return Err(HrError::validation(field, "is required"));
    }
    Ok(())
}

pub fn is_valid_id_card(id_card: &str) -> bool {
    ID_CARD_18.is_match(id_card) || ID_CARD_15.is_match(id_card)
}

/// Name plus at least one of employee number / ID card; optional dates must parse.
pub fn validate_employee_identity(
    name: Option<&str>,
    employee_number: Option<&str>,
    id_card: Option<&str>,
) -> HrResult<()> {
    require("name", name)?;
    if blank(employee_number) && blank(id_card) {
        return Err(HrError::validation(
            "employee_number",
            "employee number or ID card is required",
        ));
    }
    if let Some(card) = id_card.filter(|c| !c.trim().is_empty()) {
        if !is_valid_id_card(card.trim()) {
            return Err(HrError::validation("id_card", format!("malformed ID card: {card}")));
        }
    }
    Ok(())
}

pub fn validate_rate(field: &str, rate: f64) -> HrResult<()> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(HrError::validation(field, format!("must be between 0 and 1, got {rate}")));
    }
    Ok(())
}

pub fn validate_non_negative(field: &str, value: f64) -> HrResult<()> {
    if value < 0.0 || value.is_nan() {
        return Err(HrError::validation(field, format!("must not be negative, got {value}")));
    }
    Ok(())
}

/// Numeric coercion for spreadsheet cells: numbers, numeric strings and booleans.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Every field in `required` must map to a non-empty source column.
pub fn validate_mapping(mapping: &HashMap<String, String>, required: &[&str]) -> HrResult<()> {
    for field in required {
        if blank(mapping.get(*field).map(String::as_str)) {
            return Err(HrError::validation(
                "mapping",
                format!("missing column mapping for '{field}'"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_requires_name_and_one_identifier() {
        assert!(validate_employee_identity(Some("Li Lei"), Some("E001"), None).is_ok());
        assert!(validate_employee_identity(Some("Li Lei"), None, Some("11010519491231002X")).is_ok());

        let err = validate_employee_identity(Some("Li Lei"), Some("  "), None).unwrap_err();
        assert!(matches!(err, HrError::Validation { ref field, .. } if field == "employee_number"));

        let err = validate_employee_identity(None, Some("E001"), None).unwrap_err();
        assert!(matches!(err, HrError::Validation { ref field, .. } if field == "name"));
    }

    #[test]
    fn id_card_shapes() {
        assert!(is_valid_id_card("110105194912310021"));
        assert!(is_valid_id_card("11010519491231002X"));
        assert!(is_valid_id_card("110105491231002"));
        assert!(!is_valid_id_card("11010519491231002x"));
        assert!(!is_valid_id_card("12345"));
        assert!(validate_employee_identity(Some("A"), None, Some("12345")).is_err());
    }

    #[test]
    fn rates_must_lie_in_unit_interval() {
        assert!(validate_rate("personal_rate", 0.0).is_ok());
        assert!(validate_rate("personal_rate", 1.0).is_ok());
        assert!(validate_rate("company_rate", 1.5).is_err());
        assert!(validate_rate("company_rate", -0.01).is_err());
        assert!(validate_rate("company_rate", f64::NAN).is_err());
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(coerce_number(&json!(3)), Some(3.0));
        assert_eq!(coerce_number(&json!(" 2.5 ")), Some(2.5));
        assert_eq!(coerce_number(&json!(true)), Some(1.0));
        assert_eq!(coerce_number(&json!("late")), None);
        assert_eq!(coerce_number(&json!(null)), None);
    }

    #[test]
    fn mapping_must_name_required_columns() {
        let mut mapping = HashMap::new();
        mapping.insert("employee_id".to_string(), "工号".to_string());
        assert!(validate_mapping(&mapping, &["employee_id"]).is_ok());
        assert!(validate_mapping(&mapping, &["employee_id", "date"]).is_err());
    }
}
