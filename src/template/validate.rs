//! Record validation against a template
//!
//! Validation never short-circuits: every issue for a record is collected so
//! the caller can fix a whole record in one pass. Kind checks only run on
//! non-blank values; a blank optional field is not an error (it still counts
//! as empty for dataset statistics).

use crate::dataset::Record;
use crate::template::{FieldKind, FieldSpec, Template};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashMap;

/// A single validation finding for one field of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: &str, message: String) -> Self {
        Self {
            field: field.to_string(),
            message,
        }
    }
}

/// Validation outcome for one record in a batch
#[derive(Debug, Clone)]
pub struct RecordReport {
    /// Zero-based position of the record in the batch
    pub index: usize,
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

/// How often one issue message occurred across a batch
#[derive(Debug, Clone)]
pub struct IssueFrequency {
    pub message: String,
    pub count: u32,
}

/// Aggregate outcome of validating a batch of records
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub total_records: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    /// Issue messages ordered by descending frequency
    pub common_issues: Vec<IssueFrequency>,
}

/// True when a value is absent for validation purposes
pub fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// String form of a value, used for length, pattern, and option checks
pub fn value_as_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .expect("static email pattern compiles")
    })
}

fn is_valid_email(value: &str) -> bool {
    email_regex().is_match(value)
}

/// Phone check: at least 8 digits once separators are stripped
fn is_valid_phone(value: &str) -> bool {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '+'))
        .collect();
    cleaned.len() >= 8 && cleaned.chars().all(|c| c.is_ascii_digit())
}

fn is_valid_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn check_kind(key: &str, spec: &FieldSpec, value: &serde_json::Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let text = value_as_string(value);

    match spec.kind {
        FieldKind::Email => {
            if !is_valid_email(&text) {
                issues.push(ValidationIssue::new(
                    key,
                    format!("'{}' is not a valid email address", spec.label),
                ));
            }
        }
        FieldKind::Phone => {
            if !is_valid_phone(&text) {
                issues.push(ValidationIssue::new(
                    key,
                    format!("'{}' is not a valid phone number", spec.label),
                ));
            }
        }
        FieldKind::Date => {
            if !is_valid_date(&text) {
                issues.push(ValidationIssue::new(
                    key,
                    format!("'{}' is not a valid date (expected YYYY-MM-DD)", spec.label),
                ));
            }
        }
        FieldKind::Number => match numeric_value(value) {
            Some(n) => {
                if let Some(min) = spec.min_value {
                    if n < min {
                        issues.push(ValidationIssue::new(
                            key,
                            format!("'{}' is below the minimum of {}", spec.label, min),
                        ));
                    }
                }
                if let Some(max) = spec.max_value {
                    if n > max {
                        issues.push(ValidationIssue::new(
                            key,
                            format!("'{}' is above the maximum of {}", spec.label, max),
                        ));
                    }
                }
            }
            None => {
                issues.push(ValidationIssue::new(
                    key,
                    format!("'{}' must be a number", spec.label),
                ));
            }
        },
        FieldKind::Boolean => {
            if !value.is_boolean() {
                issues.push(ValidationIssue::new(
                    key,
                    format!("'{}' must be true or false", spec.label),
                ));
            }
        }
        FieldKind::Select => {
            if let Some(options) = &spec.options {
                if !options.iter().any(|o| o == &text) {
                    issues.push(ValidationIssue::new(
                        key,
                        format!("'{}' must be one of: {}", spec.label, options.join(", ")),
                    ));
                }
            }
        }
        FieldKind::Text | FieldKind::Textarea => {}
    }

    if let Some(max_length) = spec.max_length {
        if text.chars().count() > max_length {
            issues.push(ValidationIssue::new(
                key,
                format!("'{}' exceeds the maximum length of {}", spec.label, max_length),
            ));
        }
    }

    if let Some(pattern) = &spec.pattern {
        // Patterns anchor at the start of the value, not the whole of it
        let matched = Regex::new(pattern)
            .ok()
            .and_then(|re| re.find(&text))
            .map_or(false, |m| m.start() == 0);
        if !matched {
            issues.push(ValidationIssue::new(
                key,
                format!("'{}' has an invalid format", spec.label),
            ));
        }
    }

    issues
}

/// Validate one record against a template, returning every issue found
pub fn validate_record(template: &Template, record: &Record) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    // Required fields first, in declaration order
    for (key, spec) in template.fields.iter() {
        if spec.required {
            let missing = record.get(key).map_or(true, is_blank);
            if missing {
                issues.push(ValidationIssue::new(
                    key,
                    format!("Missing required field: {}", spec.label),
                ));
            }
        }
    }

    for (key, value) in record.iter() {
        match template.fields.get(key) {
            Some(spec) => {
                if !is_blank(value) {
                    issues.extend(check_kind(key, spec, value));
                }
            }
            None => {
                issues.push(ValidationIssue::new(
                    key,
                    format!("Unknown field: {}", key),
                ));
            }
        }
    }

    issues
}

/// Validate a batch of records, producing per-record reports and a summary
pub fn validate_batch(template: &Template, records: &[Record]) -> (Vec<RecordReport>, BatchSummary) {
    let mut reports = Vec::with_capacity(records.len());
    let mut frequency: HashMap<String, u32> = HashMap::new();
    let mut valid_records = 0usize;

    for (index, record) in records.iter().enumerate() {
        let issues = validate_record(template, record);
        let valid = issues.is_empty();
        if valid {
            valid_records += 1;
        } else {
            for issue in &issues {
                *frequency.entry(issue.message.clone()).or_insert(0) += 1;
            }
        }
        reports.push(RecordReport {
            index,
            valid,
            issues,
        });
    }

    let mut common_issues: Vec<IssueFrequency> = frequency
        .into_iter()
        .map(|(message, count)| IssueFrequency { message, count })
        .collect();
    common_issues.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));

    let summary = BatchSummary {
        total_records: records.len(),
        valid_records,
        invalid_records: records.len() - valid_records,
        common_issues,
    };

    (reports, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::MappingRules;
    use serde_json::json;

    fn medical() -> crate::template::Template {
        MappingRules::default_rules()
            .get("medical_form")
            .unwrap()
            .clone()
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn valid_patient() -> Record {
        record(json!({
            "patient_name": "John Michael Smith",
            "patient_id": "P123456",
            "date_of_birth": "1985-06-15",
            "gender": "Male",
            "emergency_contact": true,
            "phone": "+1-555-123-4567",
            "email": "john.smith@email.com"
        }))
    }

    #[test]
    fn test_valid_record_has_no_issues() {
        let issues = validate_record(&medical(), &valid_patient());
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }

    #[test]
    fn test_missing_required_field() {
        let mut rec = valid_patient();
        rec.remove("patient_name");
        let issues = validate_record(&medical(), &rec);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "patient_name");
        assert!(issues[0].message.contains("Missing required field"));
    }

    #[test]
    fn test_blank_required_field() {
        let mut rec = valid_patient();
        rec.insert("patient_name".to_string(), json!("   "));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.iter().any(|i| i.field == "patient_name"));
    }

    #[test]
    fn test_blank_optional_field_allowed() {
        let mut rec = valid_patient();
        rec.insert("email".to_string(), json!(""));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }

    #[test]
    fn test_bad_email() {
        let mut rec = valid_patient();
        rec.insert("email".to_string(), json!("not-an-email"));
        let issues = validate_record(&medical(), &rec);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "email");
    }

    #[test]
    fn test_bad_phone_too_short() {
        let mut rec = valid_patient();
        rec.insert("phone".to_string(), json!("+1-555"));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.iter().any(|i| i.field == "phone"));
    }

    #[test]
    fn test_bad_phone_letters() {
        let mut rec = valid_patient();
        rec.insert("phone".to_string(), json!("call me maybe"));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.iter().any(|i| i.field == "phone"));
    }

    #[test]
    fn test_bad_date() {
        let mut rec = valid_patient();
        rec.insert("date_of_birth".to_string(), json!("15/06/1985"));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.iter().any(|i| i.field == "date_of_birth"));
    }

    #[test]
    fn test_impossible_date() {
        let mut rec = valid_patient();
        rec.insert("date_of_birth".to_string(), json!("1985-02-30"));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.iter().any(|i| i.field == "date_of_birth"));
    }

    #[test]
    fn test_select_membership() {
        let mut rec = valid_patient();
        rec.insert("gender".to_string(), json!("Unsure"));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.iter().any(|i| i.field == "gender"));
    }

    #[test]
    fn test_boolean_kind() {
        let mut rec = valid_patient();
        rec.insert("emergency_contact".to_string(), json!("yes"));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.iter().any(|i| i.field == "emergency_contact"));
    }

    #[test]
    fn test_pattern_anchored_at_start() {
        // patient_id pattern is ^P[0-9]+$
        let mut rec = valid_patient();
        rec.insert("patient_id".to_string(), json!("XP123456"));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.iter().any(|i| i.field == "patient_id"));
    }

    #[test]
    fn test_max_length() {
        let mut rec = valid_patient();
        rec.insert("patient_name".to_string(), json!("x".repeat(51)));
        let issues = validate_record(&medical(), &rec);
        assert!(issues.iter().any(|i| i.field == "patient_name"));
    }

    #[test]
    fn test_unknown_field_reported() {
        let mut rec = valid_patient();
        rec.insert("favorite_color".to_string(), json!("green"));
        let issues = validate_record(&medical(), &rec);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "favorite_color");
        assert!(issues[0].message.contains("Unknown field"));
    }

    #[test]
    fn test_number_bounds() {
        let rules = MappingRules::default_rules();
        let employee = rules.get("employee_form").unwrap();
        let mut rec = record(json!({
            "employee_name": "Sarah Elizabeth Johnson",
            "employee_id": "EMP12345",
            "department": "IT",
            "position": "Software Engineer",
            "hire_date": "2024-01-15",
            "salary": 75000
        }));
        assert!(validate_record(employee, &rec).is_empty());

        rec.insert("salary".to_string(), json!(-5));
        assert!(validate_record(employee, &rec)
            .iter()
            .any(|i| i.field == "salary"));

        rec.insert("salary".to_string(), json!(20_000_000));
        assert!(validate_record(employee, &rec)
            .iter()
            .any(|i| i.field == "salary"));
    }

    #[test]
    fn test_number_from_string() {
        let rules = MappingRules::default_rules();
        let employee = rules.get("employee_form").unwrap();
        let rec = record(json!({
            "employee_name": "Sarah Elizabeth Johnson",
            "employee_id": "EMP12345",
            "department": "IT",
            "position": "Software Engineer",
            "hire_date": "2024-01-15",
            "salary": "75000"
        }));
        assert!(validate_record(employee, &rec).is_empty());
    }

    #[test]
    fn test_all_issues_collected() {
        let rec = record(json!({
            "patient_id": "BROKEN",
            "date_of_birth": "not-a-date",
            "gender": "Nope"
        }));
        let issues = validate_record(&medical(), &rec);
        // missing name, bad id format, bad date, bad select
        assert!(issues.len() >= 4, "expected >= 4 issues, got {:?}", issues);
    }

    #[test]
    fn test_batch_summary() {
        let template = medical();
        let mut bad = valid_patient();
        bad.remove("patient_name");

        let records = vec![valid_patient(), bad.clone(), bad];
        let (reports, summary) = validate_batch(&template, &records);

        assert_eq!(reports.len(), 3);
        assert!(reports[0].valid);
        assert!(!reports[1].valid);
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.valid_records, 1);
        assert_eq!(summary.invalid_records, 2);
        assert_eq!(summary.common_issues[0].count, 2);
    }
}
