//! Declared parameter types, constraints, and the leaf validators the
//! dispatcher applies while resolving parameters.
//!
//! Conversion and validation are split: text sources (path, query, header)
//! go through [`convert_text`] first, body JSON arrives already typed.
//! Both then run [`check_value`], which recurses into registered model
//! schemas and accumulates one [`Problem`] per offending key.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::{Number, Value};

use crate::error::Problem;
use crate::metadata::{ClassKey, MetadataRegistry};

/// Declared type of a handler parameter or model property.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Array(Box<ValueType>),
    Model(ClassKey),
}

/// Constraints checked after type conversion.
#[derive(Clone, Debug)]
pub enum Constraint {
    MinLength(usize),
    MaxLength(usize),
    Pattern(String),
    OneOf(Vec<String>),
    Min(f64),
    Max(f64),
    After(DateTime<Utc>),
    Before(DateTime<Utc>),
}

/// Type plus validation metadata for one bound parameter.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub ty: ValueType,
    pub required: bool,
    pub constraints: Vec<Constraint>,
}

impl ParamSpec {
    fn of(ty: ValueType) -> Self {
        Self {
            ty,
            required: true,
            constraints: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::of(ValueType::String)
    }

    pub fn integer() -> Self {
        Self::of(ValueType::Integer)
    }

    pub fn number() -> Self {
        Self::of(ValueType::Number)
    }

    pub fn boolean() -> Self {
        Self::of(ValueType::Boolean)
    }

    pub fn date() -> Self {
        Self::of(ValueType::Date)
    }

    pub fn array(element: ValueType) -> Self {
        Self::of(ValueType::Array(Box::new(element)))
    }

    pub fn model<T: 'static>() -> Self {
        Self::of(ValueType::Model(ClassKey::of::<T>()))
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Whether JSON-encoded strings may be decoded into arrays/objects for
/// this source. Allowed for query and header values, never for path
/// segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonDecoding {
    Allowed,
    Forbidden,
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Convert a raw string from a text source into the JSON value shape its
/// spec declares.
pub fn convert_text(
    key: &str,
    raw: &str,
    spec: &ParamSpec,
    decoding: JsonDecoding,
) -> Result<Value, Problem> {
    match &spec.ty {
        ValueType::String => Ok(Value::String(raw.to_string())),
        ValueType::Integer => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| Problem::new(key, format!("{key} should be a number"))),
        ValueType::Number => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| Problem::new(key, format!("{key} should be a number"))),
        ValueType::Boolean => match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(Problem::new(key, format!("{key} should be a boolean"))),
        },
        ValueType::Date => {
            if parse_date(raw).is_some() {
                Ok(Value::String(raw.to_string()))
            } else {
                Err(Problem::new(key, format!("{key} should be a valid date")))
            }
        }
        ValueType::Array(_) | ValueType::Model(_) => {
            if decoding == JsonDecoding::Forbidden {
                return Err(Problem::new(
                    key,
                    format!("{key} cannot be decoded from a path segment"),
                ));
            }
            serde_json::from_str::<Value>(raw)
                .map_err(|_| Problem::new(key, format!("{key} should be valid JSON")))
        }
    }
}

fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Validate a converted value against its spec, recursing through model
/// schemas registered in the metadata registry. Problems accumulate; the
/// caller decides how far to carry on.
pub fn check_value(
    key: &str,
    value: &Value,
    spec: &ParamSpec,
    registry: &MetadataRegistry,
    problems: &mut Vec<Problem>,
) {
    if value.is_null() {
        if spec.required {
            problems.push(Problem::new(key, format!("{key} is required")));
        }
        return;
    }

    match &spec.ty {
        ValueType::String => match value.as_str() {
            Some(s) => check_constraints(key, ConstraintTarget::Str(s), &spec.constraints, problems),
            None => problems.push(Problem::new(key, format!("{key} should be a string"))),
        },
        ValueType::Integer => {
            if value.as_i64().is_some() {
                let n = value.as_f64().unwrap_or_default();
                check_constraints(key, ConstraintTarget::Num(n), &spec.constraints, problems);
            } else if value.is_number() {
                problems.push(Problem::new(key, format!("{key} should be an integer")));
            } else {
                problems.push(Problem::new(key, format!("{key} should be a number")));
            }
        }
        ValueType::Number => match value.as_f64() {
            Some(n) => check_constraints(key, ConstraintTarget::Num(n), &spec.constraints, problems),
            None => problems.push(Problem::new(key, format!("{key} should be a number"))),
        },
        ValueType::Boolean => {
            if !value.is_boolean() {
                problems.push(Problem::new(key, format!("{key} should be a boolean")));
            }
        }
        ValueType::Date => match value.as_str().and_then(parse_date) {
            Some(date) => {
                check_constraints(key, ConstraintTarget::Date(date), &spec.constraints, problems);
            }
            None => problems.push(Problem::new(key, format!("{key} should be a valid date"))),
        },
        ValueType::Array(element) => match value.as_array() {
            Some(items) => {
                check_constraints(
                    key,
                    ConstraintTarget::Len(items.len()),
                    &spec.constraints,
                    problems,
                );
                let element_spec = ParamSpec::of((**element).clone());
                for (i, item) in items.iter().enumerate() {
                    check_value(
                        &format!("{key}[{i}]"),
                        item,
                        &element_spec,
                        registry,
                        problems,
                    );
                }
            }
            None => problems.push(Problem::new(key, format!("{key} should be an array"))),
        },
        ValueType::Model(class) => {
            let Some(object) = value.as_object() else {
                problems.push(Problem::new(key, format!("{key} should be an object")));
                return;
            };
            let Some(schema) = registry.model(class) else {
                problems.push(Problem::new(
                    key,
                    format!("model {} is not registered", class.short_name()),
                ));
                return;
            };

            if !schema.allow_unknown {
                for unknown in object.keys().filter(|k| !schema.properties.contains_key(*k)) {
                    let child = join_key(key, unknown);
                    problems.push(Problem::new(&child, format!("{child} should not exist")));
                }
            }

            for (name, property) in &schema.properties {
                let child = join_key(key, name);
                let child_value = object.get(name).unwrap_or(&Value::Null);
                check_value(&child, child_value, property, registry, problems);
            }
        }
    }
}

enum ConstraintTarget<'a> {
    Str(&'a str),
    Num(f64),
    Len(usize),
    Date(DateTime<Utc>),
}

fn check_constraints(
    key: &str,
    target: ConstraintTarget<'_>,
    constraints: &[Constraint],
    problems: &mut Vec<Problem>,
) {
    for constraint in constraints {
        match (constraint, &target) {
            (Constraint::MinLength(min), ConstraintTarget::Str(s)) => {
                if s.chars().count() < *min {
                    problems.push(Problem::new(
                        key,
                        format!("{key} must be at least {min} characters long"),
                    ));
                }
            }
            (Constraint::MaxLength(max), ConstraintTarget::Str(s)) => {
                if s.chars().count() > *max {
                    problems.push(Problem::new(
                        key,
                        format!("{key} must be at most {max} characters long"),
                    ));
                }
            }
            (Constraint::MinLength(min), ConstraintTarget::Len(len)) => {
                if len < min {
                    problems.push(Problem::new(
                        key,
                        format!("{key} must contain at least {min} items"),
                    ));
                }
            }
            (Constraint::MaxLength(max), ConstraintTarget::Len(len)) => {
                if len > max {
                    problems.push(Problem::new(
                        key,
                        format!("{key} must contain at most {max} items"),
                    ));
                }
            }
            (Constraint::Pattern(pattern), ConstraintTarget::Str(s)) => match Regex::new(pattern) {
                Ok(regex) => {
                    if !regex.is_match(s) {
                        problems.push(Problem::new(
                            key,
                            format!("{key} must match pattern {pattern}"),
                        ));
                    }
                }
                Err(_) => problems.push(Problem::new(
                    key,
                    format!("{key} has an invalid pattern constraint"),
                )),
            },
            (Constraint::OneOf(options), ConstraintTarget::Str(s)) => {
                if !options.iter().any(|o| o == s) {
                    problems.push(Problem::new(
                        key,
                        format!("{key} must be one of: {}", options.join(", ")),
                    ));
                }
            }
            (Constraint::Min(min), ConstraintTarget::Num(n)) => {
                if n < min {
                    problems.push(Problem::new(
                        key,
                        format!("{key} must not be less than {min}"),
                    ));
                }
            }
            (Constraint::Max(max), ConstraintTarget::Num(n)) => {
                if n > max {
                    problems.push(Problem::new(
                        key,
                        format!("{key} must not be greater than {max}"),
                    ));
                }
            }
            (Constraint::After(bound), ConstraintTarget::Date(date)) => {
                if date <= bound {
                    problems.push(Problem::new(
                        key,
                        format!("{key} must be after {}", bound.to_rfc3339()),
                    ));
                }
            }
            (Constraint::Before(bound), ConstraintTarget::Date(date)) => {
                if date >= bound {
                    problems.push(Problem::new(
                        key,
                        format!("{key} must be before {}", bound.to_rfc3339()),
                    ));
                }
            }
            // A constraint that does not apply to the value's shape is a
            // no-op; the type check has already reported the real problem.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::records::ModelSchema;
    use crate::metadata::{MetadataValue, Subject};
    use serde_json::json;

    #[test]
    fn text_to_integer_conversion() {
        assert_eq!(
            convert_text("id", "7", &ParamSpec::integer(), JsonDecoding::Forbidden).unwrap(),
            json!(7)
        );
        let problem =
            convert_text("id", "abc", &ParamSpec::integer(), JsonDecoding::Forbidden).unwrap_err();
        assert_eq!(problem.message, "id should be a number");
    }

    #[test]
    fn json_decoding_only_where_allowed() {
        let spec = ParamSpec::array(ValueType::Integer);
        assert_eq!(
            convert_text("ids", "[1,2]", &spec, JsonDecoding::Allowed).unwrap(),
            json!([1, 2])
        );
        assert!(convert_text("ids", "[1,2]", &spec, JsonDecoding::Forbidden).is_err());
    }

    #[test]
    fn constraints_apply_after_conversion() {
        let registry = MetadataRegistry::new();
        let spec = ParamSpec::string()
            .with(Constraint::MinLength(3))
            .with(Constraint::Pattern("^[a-z]+$".into()));

        let mut problems = Vec::new();
        check_value("name", &json!("ok"), &spec, &registry, &mut problems);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message.contains("at least 3 characters"));

        problems.clear();
        check_value("name", &json!("ABCD"), &spec, &registry, &mut problems);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message.contains("pattern"));
    }

    struct CreateUser;

    fn user_registry() -> MetadataRegistry {
        let registry = MetadataRegistry::new();
        registry.set(
            Subject::class::<CreateUser>(),
            MetadataValue::ModelProperties(
                ModelSchema::new()
                    .property("username", ParamSpec::string())
                    .property("age", ParamSpec::integer().optional().with(Constraint::Min(0.0))),
            ),
        );
        registry
    }

    #[test]
    fn model_validation_recurses_and_rejects_unknown_keys() {
        let registry = user_registry();
        let spec = ParamSpec::model::<CreateUser>();

        let mut problems = Vec::new();
        check_value(
            "body",
            &json!({"age": -1, "extra": true}),
            &spec,
            &registry,
            &mut problems,
        );

        let keys: Vec<_> = problems.iter().map(|p| p.key.as_str()).collect();
        assert!(keys.contains(&"body.extra"));
        assert!(keys.contains(&"body.username"));
        assert!(keys.contains(&"body.age"));
    }

    #[test]
    fn optional_null_is_not_a_problem() {
        let registry = MetadataRegistry::new();
        let mut problems = Vec::new();
        check_value(
            "limit",
            &Value::Null,
            &ParamSpec::integer().optional(),
            &registry,
            &mut problems,
        );
        assert!(problems.is_empty());
    }

    #[test]
    fn date_bounds() {
        let registry = MetadataRegistry::new();
        let bound = "2020-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let spec = ParamSpec::date().with(Constraint::After(bound));

        let mut problems = Vec::new();
        check_value("since", &json!("2019-06-01"), &spec, &registry, &mut problems);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message.contains("must be after"));
    }
}
