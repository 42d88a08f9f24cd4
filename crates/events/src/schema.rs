//! Event schema registry.
//!
//! Every event has to be registered with its parameters before it can be published. Once an
//! id is registered its descriptor never changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use nodebus_core::{BusError, BusResult, EventId, LogLevel};

use crate::record::{Args, Argument};

type Check = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Optional type tag of a parameter: a display name plus a validator.
#[derive(Clone)]
pub struct ParamType {
    name: String,
    check: Check,
}

impl ParamType {
    pub fn custom<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn integer() -> Self {
        Self::custom("integer", |v| v.is_i64() || v.is_u64())
    }

    pub fn number() -> Self {
        Self::custom("number", Value::is_number)
    }

    pub fn boolean() -> Self {
        Self::custom("boolean", Value::is_boolean)
    }

    pub fn string() -> Self {
        Self::custom("string", Value::is_string)
    }

    pub fn array() -> Self {
        Self::custom("array", Value::is_array)
    }

    pub fn object() -> Self {
        Self::custom("object", Value::is_object)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accepts(&self, value: &Value) -> bool {
        (self.check)(value)
    }
}

impl core::fmt::Debug for ParamType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ParamType").field(&self.name).finish()
    }
}

/// JSON type name of a value, used in mismatch messages and type-info logging.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A declared parameter of an event.
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    name: String,
    kind: Option<ParamType>,
    description: String,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            description: String::new(),
        }
    }

    pub fn typed(name: impl Into<String>, kind: ParamType) -> Self {
        Self::new(name).with_type(kind)
    }

    pub fn with_type(mut self, kind: ParamType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Option<&ParamType> {
        self.kind.as_ref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl From<&str> for ParameterDescriptor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Registered shape of an event.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    id: EventId,
    parameters: Vec<ParameterDescriptor>,
    log_level: LogLevel,
}

impl EventDescriptor {
    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// Parameters in declaration order.
    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }
}

/// Registry of event descriptors.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    descriptors: HashMap<EventId, Arc<EventDescriptor>>,
    longest_id: usize,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event. Fails if the id exists or two parameters share a name.
    pub fn register(
        &mut self,
        id: impl Into<EventId>,
        parameters: impl IntoIterator<Item = ParameterDescriptor>,
        log_level: LogLevel,
    ) -> BusResult<()> {
        let id = id.into();
        if self.descriptors.contains_key(&id) {
            return Err(BusError::DuplicateEvent(id));
        }

        let parameters: Vec<ParameterDescriptor> = parameters.into_iter().collect();
        let mut seen = HashSet::new();
        for parameter in &parameters {
            if !seen.insert(parameter.name.as_str()) {
                return Err(BusError::DuplicateParameter {
                    event_id: id,
                    parameter: parameter.name.clone(),
                });
            }
        }

        self.insert(EventDescriptor {
            id,
            parameters,
            log_level,
        });
        Ok(())
    }

    pub(crate) fn insert(&mut self, descriptor: EventDescriptor) {
        self.longest_id = self.longest_id.max(descriptor.id.as_str().chars().count());
        self.descriptors
            .insert(descriptor.id.clone(), Arc::new(descriptor));
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.descriptors.contains_key(id)
    }

    pub fn descriptor(&self, id: &EventId) -> BusResult<Arc<EventDescriptor>> {
        self.descriptors
            .get(id)
            .cloned()
            .ok_or_else(|| BusError::UnknownEvent(id.clone()))
    }

    /// Length (in characters) of the longest registered event id.
    pub fn longest_id(&self) -> usize {
        self.longest_id
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Check `args` against the event's parameters and return them in declared order.
    pub fn validate(&self, id: &EventId, args: &Args) -> BusResult<Vec<Argument>> {
        let descriptor = self.descriptor(id)?;

        let expected: HashSet<&str> = descriptor.parameters.iter().map(|p| p.name.as_str()).collect();
        let provided: HashSet<&str> = args.names().collect();
        if expected != provided {
            return Err(BusError::parameter_mismatch(
                id,
                format!(
                    "event requires: [{}], provided are: [{}]",
                    quoted(descriptor.parameters.iter().map(|p| p.name.as_str())),
                    quoted(args.names()),
                ),
            ));
        }

        let mut ordered = Vec::with_capacity(descriptor.parameters.len());
        for parameter in &descriptor.parameters {
            let Some(value) = args.get(&parameter.name) else {
                return Err(BusError::parameter_mismatch(
                    id,
                    format!("missing parameter '{}'", parameter.name),
                ));
            };
            if let Some(kind) = &parameter.kind {
                if !kind.accepts(value) {
                    return Err(BusError::parameter_mismatch(
                        id,
                        format!(
                            "parameter '{}' expects {}, got {}",
                            parameter.name,
                            kind.name(),
                            value_type_name(value)
                        ),
                    ));
                }
            }
            ordered.push(Argument {
                name: parameter.name.clone(),
                value: value.clone(),
            });
        }
        Ok(ordered)
    }
}

/// Pre-built descriptor, used to seed the reserved core events.
pub(crate) fn descriptor(
    id: &str,
    parameters: Vec<ParameterDescriptor>,
    log_level: LogLevel,
) -> EventDescriptor {
    EventDescriptor {
        id: EventId::from(id),
        parameters,
        log_level,
    }
}

fn quoted<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.map(|n| format!("'{n}'")).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set_value() -> SchemaRegistry {
        let mut schema = SchemaRegistry::new();
        schema
            .register(
                "SET_VALUE",
                [ParameterDescriptor::typed("value", ParamType::integer()).describe("new value")],
                LogLevel::Info,
            )
            .unwrap();
        schema
    }

    #[test]
    fn duplicate_event_is_rejected() {
        let mut schema = set_value();
        let err = schema
            .register("SET_VALUE", [ParameterDescriptor::new("value")], LogLevel::Info)
            .unwrap_err();
        assert!(matches!(err, BusError::DuplicateEvent(id) if id == "SET_VALUE"));
    }

    #[test]
    fn duplicate_parameter_is_rejected_and_nothing_registered() {
        let mut schema = SchemaRegistry::new();
        let err = schema
            .register(
                "MOVE",
                [
                    ParameterDescriptor::new("x"),
                    ParameterDescriptor::typed("x", ParamType::string()),
                ],
                LogLevel::Info,
            )
            .unwrap_err();
        assert!(matches!(err, BusError::DuplicateParameter { parameter, .. } if parameter == "x"));
        assert!(!schema.contains(&EventId::from("MOVE")));
    }

    #[test]
    fn unknown_event_fails_validation() {
        let schema = SchemaRegistry::new();
        let err = schema.validate(&EventId::from("NOPE"), &Args::new()).unwrap_err();
        assert!(matches!(err, BusError::UnknownEvent(_)));
    }

    #[test]
    fn missing_and_extra_arguments_are_mismatches() {
        let schema = set_value();
        let id = EventId::from("SET_VALUE");

        let missing = schema.validate(&id, &Args::new()).unwrap_err();
        assert!(matches!(missing, BusError::ParameterMismatch { .. }));

        let extra = schema
            .validate(&id, &Args::new().with("value", 1).with("other", 2))
            .unwrap_err();
        match extra {
            BusError::ParameterMismatch { detail, .. } => {
                assert!(detail.contains("'other'"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn type_tag_is_enforced() {
        let schema = set_value();
        let err = schema
            .validate(&EventId::from("SET_VALUE"), &Args::new().with("value", "five"))
            .unwrap_err();
        match err {
            BusError::ParameterMismatch { detail, .. } => {
                assert!(detail.contains("expects integer, got string"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn untyped_parameters_accept_anything() {
        let mut schema = SchemaRegistry::new();
        schema
            .register("NOTE", [ParameterDescriptor::new("body")], LogLevel::Debug)
            .unwrap();
        let args = schema
            .validate(&EventId::from("NOTE"), &Args::new().with("body", json!({"k": [1, 2]})))
            .unwrap();
        assert_eq!(args[0].value, json!({"k": [1, 2]}));
    }

    #[test]
    fn arguments_follow_declared_order() {
        let mut schema = SchemaRegistry::new();
        schema
            .register(
                "MOVE",
                [ParameterDescriptor::new("x"), ParameterDescriptor::new("y")],
                LogLevel::Info,
            )
            .unwrap();
        let args = schema
            .validate(&EventId::from("MOVE"), &Args::new().with("y", 2).with("x", 1))
            .unwrap();
        let names: Vec<_> = args.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn tracks_longest_id() {
        let mut schema = set_value();
        schema.register("A", Vec::new(), LogLevel::Info).unwrap();
        assert_eq!(schema.longest_id(), "SET_VALUE".len());
    }

    #[test]
    fn custom_type_tag() {
        let positive = ParamType::custom("positive", |v| v.as_i64().is_some_and(|n| n > 0));
        assert!(positive.accepts(&json!(3)));
        assert!(!positive.accepts(&json!(-3)));
        assert_eq!(value_type_name(&json!(1.5)), "number");
        assert_eq!(value_type_name(&json!(1)), "integer");
    }
}
