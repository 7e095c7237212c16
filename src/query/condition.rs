//! Filter expressions and their compilation into the backend's native filter
//! syntax (`eq`, `neq`, `lt`, `gt`, `lte`, `gte`, `in`, `nin`, `like`, `not`,
//! `and`, `or`).

use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::{Map, Value, json};

use crate::error::Error;

/// Parameter table consulted for placeholder values (`":id"`).
pub type Params = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::Neq => "neq",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Lte => "lte",
            ComparisonOp::Gte => "gte",
        }
    }
}

impl FromStr for ComparisonOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "eq" => Ok(ComparisonOp::Eq),
            "!=" | "<>" | "neq" => Ok(ComparisonOp::Neq),
            "<" | "lt" => Ok(ComparisonOp::Lt),
            ">" | "gt" => Ok(ComparisonOp::Gt),
            "<=" | "lte" => Ok(ComparisonOp::Lte),
            ">=" | "gte" => Ok(ComparisonOp::Gte),
            _ => Err(Error::UnsupportedOperator(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Connective {
    #[default]
    And,
    Or,
}

impl Connective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Connective::And => "and",
            Connective::Or => "or",
        }
    }
}

impl FromStr for Connective {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(Connective::And),
            "or" => Ok(Connective::Or),
            _ => Err(Error::UnsupportedOperator(s.to_string())),
        }
    }
}

/// A filter expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equality pairs; a list value means membership
    Hash(Vec<(String, Value)>),
    Simple {
        op: ComparisonOp,
        field: String,
        value: Value,
    },
    Between {
        field: String,
        start: Value,
        end: Value,
        negate: bool,
    },
    In {
        field: String,
        values: Vec<Value>,
        negate: bool,
    },
    Like {
        field: String,
        values: Vec<Value>,
        connective: Connective,
        negate: bool,
    },
    Not(Box<Condition>),
    Conjunction {
        connective: Connective,
        operands: Vec<Condition>,
    },
}

impl Condition {
    pub fn hash<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Condition::Hash(
            pairs
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        )
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Hash(vec![(field.into(), value.into())])
    }

    pub fn compare(op: ComparisonOp, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Simple {
            op,
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn between(
        field: impl Into<String>,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Self {
        Condition::Between {
            field: field.into(),
            start: start.into(),
            end: end.into(),
            negate: false,
        }
    }

    pub fn not_between(
        field: impl Into<String>,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Self {
        Condition::Between {
            field: field.into(),
            start: start.into(),
            end: end.into(),
            negate: true,
        }
    }

    pub fn in_list<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Condition::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negate: false,
        }
    }

    pub fn not_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Condition::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negate: true,
        }
    }

    pub fn like(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Like {
            field: field.into(),
            values: vec![value.into()],
            connective: Connective::And,
            negate: false,
        }
    }

    pub fn not(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }

    pub fn and(operands: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Conjunction {
            connective: Connective::And,
            operands: operands.into_iter().collect(),
        }
    }

    pub fn or(operands: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Conjunction {
            connective: Connective::Or,
            operands: operands.into_iter().collect(),
        }
    }

    /// Builds a condition from the operator format, e.g.
    /// `("between", "age", [18, 65])` or `("or not like", "name", ["a", "b"])`.
    pub fn operator(op: &str, field: impl Into<String>, value: Value) -> Result<Self, Error> {
        let field = field.into();
        let normalized = op.trim().to_ascii_lowercase();
        let condition = match normalized.as_str() {
            "in" | "not in" => Condition::In {
                field,
                values: into_list(value),
                negate: normalized == "not in",
            },
            "between" | "not between" => {
                let Value::Array(bounds) = value else {
                    return Err(Error::UnsupportedOperator(format!(
                        "{} needs a [start, end] pair",
                        op
                    )));
                };
                let [start, end]: [Value; 2] = bounds.try_into().map_err(|_| {
                    Error::UnsupportedOperator(format!("{} needs a [start, end] pair", op))
                })?;
                Condition::Between {
                    field,
                    start,
                    end,
                    negate: normalized == "not between",
                }
            }
            "like" | "not like" | "or like" | "or not like" => Condition::Like {
                field,
                values: into_list(value),
                connective: if normalized.starts_with("or") {
                    Connective::Or
                } else {
                    Connective::And
                },
                negate: normalized.contains("not"),
            },
            _ => Condition::Simple {
                op: normalized.parse()?,
                field,
                value,
            },
        };
        Ok(condition)
    }

    /// Joins operands under a named connective; anything but `and`/`or` fails.
    pub fn conjunction(connective: &str, operands: Vec<Condition>) -> Result<Self, Error> {
        Ok(Condition::Conjunction {
            connective: connective.parse()?,
            operands,
        })
    }
}

fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Lowers `condition` into the native filter object. An empty map means no
/// constraint. Pure in `(condition, params)`.
pub fn compile(condition: &Condition, params: &Params) -> Result<Map<String, Value>, Error> {
    match condition {
        Condition::Hash(pairs) => {
            let mut out = Map::new();
            for (field, value) in pairs {
                let compiled = match value {
                    Value::Array(values) => compile_in(field, values, false, params)?,
                    value => field_filter(field, ComparisonOp::Eq.as_str(), resolve(value, params)),
                };
                out.extend(compiled);
            }
            Ok(out)
        }
        Condition::Simple { op, field, value } => {
            Ok(field_filter(field, op.as_str(), resolve(value, params)))
        }
        Condition::Between {
            field,
            start,
            end,
            negate: false,
        } => Ok(single(
            field.clone(),
            json!({ "gt": resolve(start, params), "lt": resolve(end, params) }),
        )),
        Condition::Between {
            field,
            start,
            end,
            negate: true,
        } => compile(
            &Condition::or([
                Condition::compare(ComparisonOp::Lt, field.clone(), start.clone()),
                Condition::compare(ComparisonOp::Gt, field.clone(), end.clone()),
            ]),
            params,
        ),
        Condition::In {
            field,
            values,
            negate,
        } => compile_in(field, values, *negate, params),
        Condition::Like {
            field,
            values,
            connective,
            negate,
        } => {
            let mut parts: Vec<Value> = values
                .iter()
                .map(|value| Value::Object(field_filter(field, "like", resolve(value, params))))
                .collect();
            let combined = match parts.len() {
                0 => return Ok(Map::new()),
                1 => parts.remove(0),
                _ => Value::Object(single(connective.as_str().to_string(), Value::Array(parts))),
            };
            if *negate {
                Ok(single("not".to_string(), combined))
            } else {
                into_map(combined)
            }
        }
        Condition::Not(inner) => {
            let compiled = compile(inner, params)?;
            if compiled.is_empty() {
                return Ok(Map::new());
            }
            Ok(single("not".to_string(), Value::Object(compiled)))
        }
        Condition::Conjunction {
            connective,
            operands,
        } => {
            let mut parts = Vec::with_capacity(operands.len());
            for operand in operands {
                let compiled = compile(operand, params)?;
                if !compiled.is_empty() {
                    parts.push(Value::Object(compiled));
                }
            }
            if parts.is_empty() {
                return Ok(Map::new());
            }
            Ok(single(connective.as_str().to_string(), Value::Array(parts)))
        }
    }
}

fn compile_in(
    field: &str,
    values: &[Value],
    negate: bool,
    params: &Params,
) -> Result<Map<String, Value>, Error> {
    if values.is_empty() {
        return Err(Error::EmptyInCondition(field.to_string()));
    }
    let values = values.iter().map(|value| resolve(value, params)).collect();
    Ok(field_filter(
        field,
        if negate { "nin" } else { "in" },
        Value::Array(values),
    ))
}

fn field_filter(field: &str, op: &str, value: Value) -> Map<String, Value> {
    single(field.to_string(), Value::Object(single(op.to_string(), value)))
}

fn single(key: String, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key, value);
    map
}

fn into_map(value: Value) -> Result<Map<String, Value>, Error> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::Decode(format!("expected a filter object, got {}", other))),
    }
}

/// Replaces a string equal to a parameter name with the bound value,
/// descending into lists.
pub(crate) fn resolve(value: &Value, params: &Params) -> Value {
    match value {
        Value::String(name) => params.get(name).cloned().unwrap_or_else(|| value.clone()),
        Value::Array(values) => Value::Array(values.iter().map(|v| resolve(v, params)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn no_params() -> Params {
        Params::new()
    }

    /// Evaluates a compiled filter against a flat record.
    fn eval(filter: &Map<String, Value>, record: &Map<String, Value>) -> bool {
        filter.iter().all(|(key, body)| match key.as_str() {
            "and" => body
                .as_array()
                .unwrap()
                .iter()
                .all(|part| eval(part.as_object().unwrap(), record)),
            "or" => body
                .as_array()
                .unwrap()
                .iter()
                .any(|part| eval(part.as_object().unwrap(), record)),
            "not" => !eval(body.as_object().unwrap(), record),
            field => {
                let actual = record.get(field).and_then(Value::as_i64);
                body.as_object().unwrap().iter().all(|(op, expected)| {
                    let Some(actual) = actual else { return false };
                    match op.as_str() {
                        "in" => expected.as_array().unwrap().iter().any(|v| v.as_i64() == Some(actual)),
                        "nin" => !expected.as_array().unwrap().iter().any(|v| v.as_i64() == Some(actual)),
                        op => {
                            let expected = expected.as_i64().unwrap();
                            match op {
                                "eq" => actual == expected,
                                "neq" => actual != expected,
                                "lt" => actual < expected,
                                "gt" => actual > expected,
                                "lte" => actual <= expected,
                                "gte" => actual >= expected,
                                other => panic!("unexpected operator {}", other),
                            }
                        }
                    }
                })
            }
        })
    }

    #[test]
    fn test_hash_and_in() {
        let condition = Condition::hash([("status", json!("active")), ("id", json!([1, 2]))]);
        assert_eq!(
            Value::Object(compile(&condition, &no_params()).unwrap()),
            json!({"status": {"eq": "active"}, "id": {"in": [1, 2]}})
        );
    }

    #[test]
    fn test_between_and_negated_between() {
        assert_eq!(
            Value::Object(compile(&Condition::between("age", 18, 65), &no_params()).unwrap()),
            json!({"age": {"gt": 18, "lt": 65}})
        );
        assert_eq!(
            Value::Object(compile(&Condition::not_between("age", 18, 65), &no_params()).unwrap()),
            json!({"or": [{"age": {"lt": 18}}, {"age": {"gt": 65}}]})
        );
    }

    #[test]
    fn test_like_variants() {
        let or_not_like =
            Condition::operator("or not like", "name", json!(["ann", "bob"])).unwrap();
        assert_eq!(
            Value::Object(compile(&or_not_like, &no_params()).unwrap()),
            json!({"not": {"or": [{"name": {"like": "ann"}}, {"name": {"like": "bob"}}]}})
        );
        let empty = Condition::operator("like", "name", json!([])).unwrap();
        assert!(compile(&empty, &no_params()).unwrap().is_empty());
    }

    #[test]
    fn test_not_of_empty_is_empty() {
        let condition = Condition::not(Condition::and([]));
        assert!(compile(&condition, &no_params()).unwrap().is_empty());
        let condition = Condition::not(Condition::Hash(vec![]));
        assert!(compile(&condition, &no_params()).unwrap().is_empty());
    }

    #[test]
    fn test_empty_in_is_rejected() {
        let err = compile(&Condition::in_list("id", Vec::<i64>::new()), &no_params()).unwrap_err();
        assert!(matches!(err, Error::EmptyInCondition(ref field) if field == "id"));
        let err = compile(&Condition::eq("id", json!([])), &no_params()).unwrap_err();
        assert!(matches!(err, Error::EmptyInCondition(_)));
    }

    #[test]
    fn test_unsupported_operators() {
        assert!(matches!(
            Condition::operator("~=", "name", json!("x")),
            Err(Error::UnsupportedOperator(_))
        ));
        assert!(matches!(
            Condition::conjunction("xor", vec![]),
            Err(Error::UnsupportedOperator(_))
        ));
        assert!(matches!(
            Condition::operator("between", "age", json!([1])),
            Err(Error::UnsupportedOperator(_))
        ));
    }

    #[test]
    fn test_placeholders_resolve_recursively() {
        let params = Params::from([
            (":id".to_string(), json!(7)),
            (":other".to_string(), json!(9)),
        ]);
        let condition = Condition::and([
            Condition::eq("owner_id", ":id"),
            Condition::in_list("id", [json!(":id"), json!(":other"), json!(3)]),
        ]);
        assert_eq!(
            Value::Object(compile(&condition, &params).unwrap()),
            json!({"and": [{"owner_id": {"eq": 7}}, {"id": {"in": [7, 9, 3]}}]})
        );
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let condition = Condition::or([
            Condition::compare(ComparisonOp::Gte, "a", 1),
            Condition::not(Condition::not_in("b", [1, 2])),
            Condition::not_between("c", 0, 10),
        ]);
        let first = compile(&condition, &no_params()).unwrap();
        let second = compile(&condition, &no_params()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_double_negation_is_equivalent() {
        let expressions = vec![
            Condition::compare(ComparisonOp::Gt, "a", 2),
            Condition::in_list("a", [1, 3]),
            Condition::not_between("a", 1, 3),
            Condition::or([Condition::eq("a", 1), Condition::compare(ComparisonOp::Lte, "b", 0)]),
            Condition::and([Condition::not_in("b", [0]), Condition::between("a", 0, 4)]),
        ];
        for expression in expressions {
            let plain = compile(&expression, &no_params()).unwrap();
            let doubled = compile(
                &Condition::not(Condition::not(expression.clone())),
                &no_params(),
            )
            .unwrap();
            for a in -1..6 {
                for b in -1..3 {
                    let record = json!({"a": a, "b": b});
                    let record = record.as_object().unwrap();
                    assert_eq!(
                        eval(&plain, record),
                        eval(&doubled, record),
                        "{:?} at a={} b={}",
                        expression,
                        a,
                        b
                    );
                }
            }
        }
    }
}
