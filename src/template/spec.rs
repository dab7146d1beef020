//! Template and field specification types
//!
//! Mapping rules are a versioned JSON registry of templates. Each template
//! declares a set of typed fields; each field carries its validation
//! constraints and the name of the PDF form field it maps onto.

use crate::error::{Error, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;

/// Field value kind, driving both validation and display formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Textarea,
    Number,
    Date,
    Select,
    Boolean,
    Phone,
    Email,
}

impl FieldKind {
    /// Kinds whose values are written into text widgets when filling a form
    pub fn is_text_like(&self) -> bool {
        !matches!(self, FieldKind::Boolean)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Number => "number",
            FieldKind::Date => "date",
            FieldKind::Select => "select",
            FieldKind::Boolean => "boolean",
            FieldKind::Phone => "phone",
            FieldKind::Email => "email",
        }
    }
}

/// Specification of a single mappable field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Value kind
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Human-readable label, used in generated documents and messages
    pub label: String,
    /// Whether the field must be present and non-blank
    #[serde(default)]
    pub required: bool,
    /// Maximum length of the string form of the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Regex the string form must match, anchored at the start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Allowed values for select fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Lower bound for number fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    /// Upper bound for number fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    /// Example value, used for sample records and schema export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,
    /// Target AcroForm field name; defaults to the dataset key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_field: Option<String>,
}

impl FieldSpec {
    fn new(kind: FieldKind, label: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
            required: false,
            max_length: None,
            pattern: None,
            options: None,
            min_value: None,
            max_value: None,
            example: None,
            pdf_field: None,
        }
    }
}

/// Ordered set of field specifications, keyed by dataset key.
///
/// Serialized as a JSON object; declaration order is preserved because it
/// drives the row order of generated documents. Duplicate keys are a
/// deserialization error.
#[derive(Debug, Clone, Default)]
pub struct FieldSet(Vec<(String, FieldSpec)>);

impl FieldSet {
    pub fn get(&self, key: &str) -> Option<&FieldSpec> {
        self.0
            .iter()
            .find_map(|(k, spec)| (k == key).then_some(spec))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.0.iter().map(|(k, spec)| (k.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, key: &str, spec: FieldSpec) {
        self.0.push((key.to_string(), spec));
    }
}

impl Serialize for FieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, spec) in &self.0 {
            map.serialize_entry(key, spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct FieldSetVisitor;

        impl<'de> Visitor<'de> for FieldSetVisitor {
            type Value = FieldSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field name to field specification")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut fields: Vec<(String, FieldSpec)> = Vec::new();
                while let Some((key, spec)) = access.next_entry::<String, FieldSpec>()? {
                    if fields.iter().any(|(k, _)| *k == key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate field: {}",
                            key
                        )));
                    }
                    fields.push((key, spec));
                }
                Ok(FieldSet(fields))
            }
        }

        deserializer.deserialize_map(FieldSetVisitor)
    }
}

/// A named document template: display metadata plus its field set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Display title, used as the heading of generated documents
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Compliance regimes the template is designed for (e.g. HIPAA, GDPR)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compliance: Vec<String>,
    pub fields: FieldSet,
}

impl Template {
    /// Number of required fields
    pub fn required_count(&self) -> usize {
        self.fields.iter().filter(|(_, s)| s.required).count()
    }

    /// Resolve the AcroForm target name for a dataset key
    pub fn pdf_field_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.fields
            .get(key)
            .and_then(|s| s.pdf_field.as_deref())
            .unwrap_or(key)
    }
}

/// Versioned registry of templates, loaded from a JSON rules file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRules {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub templates: std::collections::BTreeMap<String, Template>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl MappingRules {
    /// Parse rules from JSON bytes and check them structurally
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let rules: MappingRules =
            serde_json::from_slice(bytes).map_err(|e| Error::InvalidRules {
                reason: e.to_string(),
            })?;
        rules.validate()?;
        Ok(rules)
    }

    /// Load rules from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_slice(&bytes)
    }

    /// Load rules from an optional path, falling back to the built-in
    /// defaults with a warning when the file is absent or unreadable.
    pub fn load_or_default(path: Option<&str>) -> Self {
        match path {
            Some(p) => match Self::load(p) {
                Ok(rules) => {
                    tracing::info!(path = p, templates = rules.templates.len(), "loaded mapping rules");
                    rules
                }
                Err(e) => {
                    tracing::warn!(path = p, error = %e, "failed to load mapping rules, using defaults");
                    Self::default_rules()
                }
            },
            None => Self::default_rules(),
        }
    }

    /// Look up a template by name
    pub fn get(&self, name: &str) -> Result<&Template> {
        self.templates
            .get(name)
            .ok_or_else(|| Error::TemplateNotFound {
                name: name.to_string(),
            })
    }

    /// Structural validation of the rules: templates must have fields,
    /// patterns must compile, select fields must carry options, and
    /// numeric bounds must be ordered.
    pub fn validate(&self) -> Result<()> {
        if self.templates.is_empty() {
            return Err(Error::InvalidRules {
                reason: "rules contain no templates".to_string(),
            });
        }

        for (name, template) in &self.templates {
            if template.fields.is_empty() {
                return Err(Error::InvalidRules {
                    reason: format!("template '{}' has no fields", name),
                });
            }

            for (key, spec) in template.fields.iter() {
                if let Some(pattern) = &spec.pattern {
                    regex::Regex::new(pattern).map_err(|e| Error::InvalidRules {
                        reason: format!("template '{}' field '{}': bad pattern: {}", name, key, e),
                    })?;
                }

                if spec.kind == FieldKind::Select
                    && spec.options.as_ref().map_or(true, |o| o.is_empty())
                {
                    return Err(Error::InvalidRules {
                        reason: format!(
                            "template '{}' field '{}': select field without options",
                            name, key
                        ),
                    });
                }

                if let (Some(min), Some(max)) = (spec.min_value, spec.max_value) {
                    if min > max {
                        return Err(Error::InvalidRules {
                            reason: format!(
                                "template '{}' field '{}': min_value {} exceeds max_value {}",
                                name, key, min, max
                            ),
                        });
                    }
                }

                if spec.max_length == Some(0) {
                    return Err(Error::InvalidRules {
                        reason: format!(
                            "template '{}' field '{}': max_length must be positive",
                            name, key
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Export a self-describing schema document for one template
    pub fn schema_document(&self, name: &str) -> Result<serde_json::Value> {
        let template = self.get(name)?;
        Ok(serde_json::json!({
            "template": name,
            "title": template.title.clone(),
            "description": template.description.clone(),
            "version": self.version.clone(),
            "exported_at": chrono::Utc::now().to_rfc3339(),
            "fields": serde_json::to_value(&template.fields)?,
            "example_record": serde_json::Value::Object(crate::template::sample_record(template)),
        }))
    }

    /// Built-in default rules, used when no rules file is configured.
    ///
    /// Two templates ship by default: a medical intake form and an
    /// employee record form.
    pub fn default_rules() -> Self {
        use serde_json::json;

        let mut medical = FieldSet::default();
        medical.push("patient_name", {
            let mut s = FieldSpec::new(FieldKind::Text, "Patient Full Name");
            s.required = true;
            s.max_length = Some(50);
            s.example = Some(json!("John Michael Smith"));
            s
        });
        medical.push("patient_id", {
            let mut s = FieldSpec::new(FieldKind::Text, "Patient Identification Number");
            s.required = true;
            s.max_length = Some(20);
            s.pattern = Some("^P[0-9]+$".to_string());
            s.example = Some(json!("P123456"));
            s
        });
        medical.push("date_of_birth", {
            let mut s = FieldSpec::new(FieldKind::Date, "Date of Birth");
            s.required = true;
            s.example = Some(json!("1985-06-15"));
            s
        });
        medical.push("gender", {
            let mut s = FieldSpec::new(FieldKind::Select, "Gender");
            s.required = true;
            s.options = Some(vec![
                "Male".to_string(),
                "Female".to_string(),
                "Other".to_string(),
                "Prefer not to say".to_string(),
            ]);
            s.example = Some(json!("Male"));
            s
        });
        medical.push("emergency_contact", {
            let mut s = FieldSpec::new(FieldKind::Boolean, "Emergency Contact Available");
            s.example = Some(json!(true));
            s
        });
        medical.push("phone", {
            let mut s = FieldSpec::new(FieldKind::Phone, "Phone Number");
            s.max_length = Some(20);
            s.example = Some(json!("+1-555-123-4567"));
            s
        });
        medical.push("email", {
            let mut s = FieldSpec::new(FieldKind::Email, "Email Address");
            s.example = Some(json!("john.smith@email.com"));
            s
        });
        medical.push("address", {
            let mut s = FieldSpec::new(FieldKind::Textarea, "Home Address");
            s.max_length = Some(200);
            s.example = Some(json!("123 Main Street, Springfield, IL 62701, USA"));
            s
        });
        medical.push("insurance_id", {
            let mut s = FieldSpec::new(FieldKind::Text, "Insurance Policy Number");
            s.max_length = Some(30);
            s.example = Some(json!("INS789012345"));
            s
        });

        let mut employee = FieldSet::default();
        employee.push("employee_name", {
            let mut s = FieldSpec::new(FieldKind::Text, "Employee Name");
            s.required = true;
            s.max_length = Some(60);
            s.example = Some(json!("Sarah Elizabeth Johnson"));
            s
        });
        employee.push("employee_id", {
            let mut s = FieldSpec::new(FieldKind::Text, "Employee Number");
            s.required = true;
            s.max_length = Some(15);
            s.pattern = Some("^EMP[0-9]{4,8}$".to_string());
            s.example = Some(json!("EMP12345"));
            s
        });
        employee.push("department", {
            let mut s = FieldSpec::new(FieldKind::Select, "Department");
            s.required = true;
            s.options = Some(
                ["IT", "HR", "Finance", "Marketing", "Sales", "Operations"]
                    .iter()
                    .map(|d| d.to_string())
                    .collect(),
            );
            s.example = Some(json!("IT"));
            s
        });
        employee.push("position", {
            let mut s = FieldSpec::new(FieldKind::Text, "Position");
            s.required = true;
            s.max_length = Some(50);
            s.example = Some(json!("Software Engineer"));
            s
        });
        employee.push("hire_date", {
            let mut s = FieldSpec::new(FieldKind::Date, "Hire Date");
            s.required = true;
            s.example = Some(json!("2024-01-15"));
            s
        });
        employee.push("salary", {
            let mut s = FieldSpec::new(FieldKind::Number, "Salary");
            s.min_value = Some(0.0);
            s.max_value = Some(10_000_000.0);
            s.example = Some(json!(75000));
            s
        });
        employee.push("remote_work", {
            let mut s = FieldSpec::new(FieldKind::Boolean, "Remote Work Eligible");
            s.example = Some(json!(true));
            s
        });

        let mut templates = std::collections::BTreeMap::new();
        templates.insert(
            "medical_form".to_string(),
            Template {
                title: "Medical Intake Form".to_string(),
                description: "Patient intake record".to_string(),
                category: Some("healthcare".to_string()),
                compliance: vec!["HIPAA".to_string()],
                fields: medical,
            },
        );
        templates.insert(
            "employee_form".to_string(),
            Template {
                title: "Employee Record".to_string(),
                description: "Employee master data record".to_string(),
                category: Some("hr".to_string()),
                compliance: vec!["GDPR".to_string()],
                fields: employee,
            },
        );

        MappingRules {
            version: default_version(),
            description: "Default field mapping rules".to_string(),
            templates,
        }
    }
}
