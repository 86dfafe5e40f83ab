//! Parameter resolution: pull raw values from their declared sources,
//! convert, validate, and place them at the handler's positional indices.
//!
//! Validation is interleaved with resolution. Within one category (path,
//! query, header, body) the first failing parameter short-circuits the
//! rest of that category, but categories are checked independently, so a
//! query problem is still reported when a path problem exists too.

use serde_json::Value;

use crate::auth::CurrentUser;
use crate::body::BodyParserRegistry;
use crate::error::{Problem, Result, TrellisError};
use crate::metadata::MetadataRegistry;
use crate::metadata::records::{BodyBinding, CurrentUserBinding, NamedBinding};
use crate::pipeline::Inbound;
use crate::pipeline::handler::ArgValue;
use crate::validate::{JsonDecoding, check_value, convert_text};

/// Per-handler mapping of argument position to binding source.
#[derive(Clone, Debug, Default)]
pub struct BindingPlan {
    pub path: Vec<NamedBinding>,
    pub query: Vec<NamedBinding>,
    pub header: Vec<NamedBinding>,
    pub body: Option<BodyBinding>,
    pub current_user: Option<CurrentUserBinding>,
}

fn fill(
    slots: &mut [Option<ArgValue>],
    index: usize,
    value: ArgValue,
    handler_name: &str,
) -> Result<()> {
    match slots.get_mut(index) {
        Some(slot) => {
            *slot = Some(value);
            Ok(())
        }
        None => Err(TrellisError::internal(format!(
            "{handler_name} binds parameter #{index} but declares only {} parameters",
            slots.len()
        ))),
    }
}

fn resolve_named_category<'a>(
    bindings: &[NamedBinding],
    lookup: impl Fn(&str) -> Option<&'a str>,
    decoding: JsonDecoding,
    registry: &MetadataRegistry,
    slots: &mut [Option<ArgValue>],
    problems: &mut Vec<Problem>,
    handler_name: &str,
) -> Result<()> {
    for binding in bindings {
        let Some(raw) = lookup(&binding.name) else {
            if binding.spec.required {
                problems.push(Problem::new(
                    &binding.name,
                    format!("{} is required", binding.name),
                ));
                // First failure ends this category's checking.
                return Ok(());
            }
            fill(slots, binding.index, ArgValue::Json(Value::Null), handler_name)?;
            continue;
        };

        let converted = match convert_text(&binding.name, raw, &binding.spec, decoding) {
            Ok(value) => value,
            Err(problem) => {
                problems.push(problem);
                return Ok(());
            }
        };

        let mut local = Vec::new();
        check_value(&binding.name, &converted, &binding.spec, registry, &mut local);
        if !local.is_empty() {
            problems.append(&mut local);
            return Ok(());
        }

        fill(slots, binding.index, ArgValue::Json(converted), handler_name)?;
    }
    Ok(())
}

/// Resolve every entry of the plan into positional arguments, then verify
/// the plan covered the handler's declared parameter count.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_parameters(
    plan: &BindingPlan,
    arity: usize,
    handler_name: &str,
    request: &Inbound,
    user: Option<&CurrentUser>,
    registry: &MetadataRegistry,
    parsers: &BodyParserRegistry,
) -> Result<Vec<ArgValue>> {
    let mut slots: Vec<Option<ArgValue>> = vec![None; arity];
    let mut problems = Vec::new();

    resolve_named_category(
        &plan.path,
        |name| request.path_params.get(name).map(String::as_str),
        JsonDecoding::Forbidden,
        registry,
        &mut slots,
        &mut problems,
        handler_name,
    )?;
    resolve_named_category(
        &plan.query,
        |name| request.query.get(name).map(String::as_str),
        JsonDecoding::Allowed,
        registry,
        &mut slots,
        &mut problems,
        handler_name,
    )?;
    resolve_named_category(
        &plan.header,
        |name| request.header(name),
        JsonDecoding::Allowed,
        registry,
        &mut slots,
        &mut problems,
        handler_name,
    )?;

    if let Some(binding) = &plan.body {
        match parsers.parse(request, binding).await {
            Ok(value) => {
                if value.is_null() && binding.spec.required {
                    problems.push(Problem::new("body", "body is required"));
                } else {
                    let mut local = Vec::new();
                    check_value("body", &value, &binding.spec, registry, &mut local);
                    if local.is_empty() {
                        fill(&mut slots, binding.index, ArgValue::Json(value), handler_name)?;
                    } else {
                        problems.append(&mut local);
                    }
                }
            }
            // The parser's own validation problems join the aggregate;
            // parser-selection failures are configuration errors and fatal.
            Err(TrellisError::Validation(body_problems)) => problems.extend(body_problems),
            Err(fatal) => return Err(fatal),
        }
    }

    if let Some(binding) = &plan.current_user {
        match user {
            Some(current) => fill(
                &mut slots,
                binding.index,
                ArgValue::User(current.clone()),
                handler_name,
            )?,
            None if binding.required => {
                return Err(TrellisError::unauthorized("Authentication required."));
            }
            None => fill(
                &mut slots,
                binding.index,
                ArgValue::Json(Value::Null),
                handler_name,
            )?,
        }
    }

    if !problems.is_empty() {
        return Err(TrellisError::Validation(problems));
    }

    let resolved = slots.iter().filter(|slot| slot.is_some()).count();
    if resolved < arity {
        let index = slots
            .iter()
            .position(Option::is_none)
            .unwrap_or(resolved);
        return Err(TrellisError::BindingPlanIncomplete {
            handler: handler_name.to_string(),
            resolved,
            expected: arity,
            index,
        });
    }

    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ParamSpec;
    use serde_json::json;

    fn request_with_path(pairs: &[(&str, &str)]) -> Inbound {
        Inbound {
            path_params: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn parsers() -> BodyParserRegistry {
        BodyParserRegistry::with_defaults()
    }

    #[tokio::test]
    async fn path_param_resolves_by_declared_type() {
        let plan = BindingPlan {
            path: vec![NamedBinding {
                index: 0,
                name: "id".into(),
                spec: ParamSpec::integer(),
            }],
            ..Default::default()
        };
        let registry = MetadataRegistry::new();

        let args = resolve_parameters(
            &plan,
            1,
            "Tests.get",
            &request_with_path(&[("id", "7")]),
            None,
            &registry,
            &parsers(),
        )
        .await
        .unwrap();
        assert_eq!(args[0].as_i64(), Some(7));
    }

    #[tokio::test]
    async fn invalid_number_is_a_validation_error() {
        let plan = BindingPlan {
            path: vec![NamedBinding {
                index: 0,
                name: "id".into(),
                spec: ParamSpec::number(),
            }],
            ..Default::default()
        };
        let registry = MetadataRegistry::new();

        let err = resolve_parameters(
            &plan,
            1,
            "Tests.get",
            &request_with_path(&[("id", "abc")]),
            None,
            &registry,
            &parsers(),
        )
        .await
        .unwrap_err();

        match err {
            TrellisError::Validation(problems) => {
                assert_eq!(problems.len(), 1);
                assert_eq!(problems[0].key, "id");
                assert!(problems[0].message.contains("should be a number"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn categories_fail_independently() {
        let plan = BindingPlan {
            path: vec![
                NamedBinding {
                    index: 0,
                    name: "id".into(),
                    spec: ParamSpec::integer(),
                },
                NamedBinding {
                    index: 1,
                    name: "rev".into(),
                    spec: ParamSpec::integer(),
                },
            ],
            query: vec![NamedBinding {
                index: 2,
                name: "limit".into(),
                spec: ParamSpec::integer(),
            }],
            ..Default::default()
        };
        let registry = MetadataRegistry::new();
        let mut request = request_with_path(&[("id", "x"), ("rev", "y")]);
        request.query.insert("limit".into(), "z".into());

        let err = resolve_parameters(
            &plan,
            3,
            "Tests.list",
            &request,
            None,
            &registry,
            &parsers(),
        )
        .await
        .unwrap_err();

        match err {
            TrellisError::Validation(problems) => {
                // Path short-circuits after "id"; query is still reported.
                let keys: Vec<_> = problems.iter().map(|p| p.key.as_str()).collect();
                assert_eq!(keys, vec!["id", "limit"]);
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn uncovered_index_fails_with_counts() {
        let plan = BindingPlan {
            path: vec![NamedBinding {
                index: 0,
                name: "id".into(),
                spec: ParamSpec::string(),
            }],
            ..Default::default()
        };
        let registry = MetadataRegistry::new();

        let err = resolve_parameters(
            &plan,
            2,
            "Tests.get",
            &request_with_path(&[("id", "7")]),
            None,
            &registry,
            &parsers(),
        )
        .await
        .unwrap_err();

        match err {
            TrellisError::BindingPlanIncomplete {
                handler,
                resolved,
                expected,
                index,
            } => {
                assert_eq!(handler, "Tests.get");
                assert_eq!((resolved, expected, index), (1, 2, 1));
            }
            other => panic!("expected BindingPlanIncomplete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn optional_query_param_resolves_to_null() {
        let plan = BindingPlan {
            query: vec![NamedBinding {
                index: 0,
                name: "limit".into(),
                spec: ParamSpec::integer().optional(),
            }],
            ..Default::default()
        };
        let registry = MetadataRegistry::new();

        let args = resolve_parameters(
            &plan,
            1,
            "Tests.list",
            &Inbound::default(),
            None,
            &registry,
            &parsers(),
        )
        .await
        .unwrap();
        match &args[0] {
            ArgValue::Json(value) => assert_eq!(*value, json!(null)),
            other => panic!("expected null arg, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn required_current_user_missing_is_unauthorized() {
        let plan = BindingPlan {
            current_user: Some(CurrentUserBinding {
                index: 0,
                required: true,
            }),
            ..Default::default()
        };
        let registry = MetadataRegistry::new();

        let err = resolve_parameters(
            &plan,
            1,
            "Me.profile",
            &Inbound::default(),
            None,
            &registry,
            &parsers(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TrellisError::Unauthorized(_)));
    }
}
