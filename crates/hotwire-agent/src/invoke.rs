//! Executing one method call and recording what happened.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use hotwire_classfile::{parse_method_descriptor, BaseType, FieldType};
use hotwire_proto::{Failure, InvocationResult, TargetDescriptor, Value};

use crate::cache::ResultCache;
use crate::resolve::{InstanceResolver, ResolveError};
use crate::runtime::{ClassShape, ManagedRuntime, MemberInfo, RuntimeError};

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("class {0} is not loaded")]
    ClassNotFound(String),

    #[error("no method {class_name}.{method}{}", .descriptor.as_deref().map(|d| format!(" {d}")).unwrap_or_default())]
    MethodNotFound {
        class_name: String,
        method: String,
        descriptor: Option<String>,
    },

    #[error("{class_name}.{method} is ambiguous for {arity} argument(s): {}", .candidates.join(", "))]
    AmbiguousMethod {
        class_name: String,
        method: String,
        arity: usize,
        candidates: Vec<String>,
    },

    #[error("argument {index}: {reason}")]
    ArgumentDecode { index: usize, reason: String },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The called code threw; carries the thrown failure as reported by the runtime.
    #[error("{0}")]
    TargetThrew(Failure),

    #[error(transparent)]
    Runtime(RuntimeError),
}

impl InvocationError {
    pub fn kind(&self) -> &'static str {
        match self {
            InvocationError::ClassNotFound(_) => "ClassNotFound",
            InvocationError::MethodNotFound { .. } => "MethodNotFound",
            InvocationError::AmbiguousMethod { .. } => "AmbiguousMethod",
            InvocationError::ArgumentDecode { .. } => "ArgumentDecode",
            InvocationError::Resolve(_) => "Resolve",
            InvocationError::TargetThrew(_) => "TargetThrew",
            InvocationError::Runtime(_) => "Runtime",
        }
    }

    /// A thrown failure is reported unchanged, so the controller sees the
    /// original exception type, message and stack.
    pub fn to_failure(&self) -> Failure {
        match self {
            InvocationError::TargetThrew(thrown) => thrown.clone(),
            other => Failure::from_error(other.kind(), other),
        }
    }
}

pub struct InvocationDispatcher {
    resolver: InstanceResolver,
    cache: Arc<ResultCache>,
}

impl InvocationDispatcher {
    pub fn new(resolver: InstanceResolver, cache: Arc<ResultCache>) -> Self {
        Self { resolver, cache }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Run `target` and store the outcome under `offset`, whatever it is.
    pub fn invoke(
        &self,
        runtime: &dyn ManagedRuntime,
        target: &TargetDescriptor,
        offset: &str,
    ) -> InvocationResult {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.call(runtime, target)));
        let result = match outcome {
            Ok(Ok((value, rendered))) => InvocationResult::Returned { value, rendered },
            Ok(Err(err)) => {
                tracing::debug!(
                    target: "hotwire.invoke",
                    class = %target.class_name,
                    method = %target.method,
                    error = %err,
                    "invocation failed"
                );
                InvocationResult::Failed(err.to_failure())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(
                    target: "hotwire.invoke",
                    class = %target.class_name,
                    method = %target.method,
                    panic = %message,
                    "invocation panicked"
                );
                InvocationResult::Failed(Failure::new("Panic", message))
            }
        };
        self.cache.put(offset.to_string(), result.clone());
        result
    }

    fn call(
        &self,
        runtime: &dyn ManagedRuntime,
        target: &TargetDescriptor,
    ) -> Result<(Value, String), InvocationError> {
        let class = runtime
            .loaded_class(&target.class_name)
            .map_err(InvocationError::Runtime)?
            .ok_or_else(|| InvocationError::ClassNotFound(target.class_name.clone()))?;
        let method = select_method(&class, target)?;

        let descriptor = parse_method_descriptor(&method.descriptor).map_err(|err| {
            InvocationError::Runtime(RuntimeError::Other(format!(
                "runtime reported invalid descriptor {}: {err}",
                method.descriptor
            )))
        })?;
        if descriptor.params.len() != target.args.len() {
            return Err(InvocationError::ArgumentDecode {
                index: target.args.len().min(descriptor.params.len()),
                reason: format!(
                    "expected {} argument(s), got {}",
                    descriptor.params.len(),
                    target.args.len()
                ),
            });
        }
        let args = target
            .args
            .iter()
            .zip(&descriptor.params)
            .enumerate()
            .map(|(index, (json, ty))| decode_argument(runtime, ty, json).map_err(|reason| {
                InvocationError::ArgumentDecode { index, reason }
            }))
            .collect::<Result<Vec<_>, _>>()?;

        let receiver = if method.is_static() {
            None
        } else {
            let resolved = self.resolver.resolve(runtime, &class, !method.is_public())?;
            tracing::debug!(
                target: "hotwire.invoke",
                class = %class.name,
                object = resolved.object.id,
                origin = %resolved.origin,
                "resolved receiver"
            );
            Some(resolved.object)
        };

        let value = runtime
            .invoke_method(receiver.as_ref(), &class.name, method, &args)
            .map_err(|err| match err {
                RuntimeError::Threw(thrown) => InvocationError::TargetThrew(thrown),
                other => InvocationError::Runtime(other),
            })?;

        let rendered = match runtime.render(&value) {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::warn!(target: "hotwire.invoke", error = %err, "render failed; using plain form");
                value.to_string()
            }
        };
        Ok((value, rendered))
    }
}

/// By descriptor when given, else the only overload taking as many
/// arguments as were supplied.
fn select_method<'a>(
    class: &'a ClassShape,
    target: &TargetDescriptor,
) -> Result<&'a MemberInfo, InvocationError> {
    let not_found = || InvocationError::MethodNotFound {
        class_name: class.name.clone(),
        method: target.method.clone(),
        descriptor: target.descriptor.clone(),
    };
    if target.method.starts_with('<') {
        return Err(not_found());
    }
    let mut named = class.methods.iter().filter(|m| m.name == target.method);

    if let Some(descriptor) = &target.descriptor {
        return named
            .find(|m| &m.descriptor == descriptor)
            .ok_or_else(not_found);
    }

    let arity = target.args.len();
    let candidates: Vec<&MemberInfo> = named
        .filter(|m| {
            parse_method_descriptor(&m.descriptor)
                .map(|d| d.params.len() == arity)
                .unwrap_or(false)
        })
        .collect();
    match candidates.as_slice() {
        [] => Err(not_found()),
        [only] => Ok(*only),
        many => Err(InvocationError::AmbiguousMethod {
            class_name: class.name.clone(),
            method: target.method.clone(),
            arity,
            candidates: many.iter().map(|m| m.descriptor.clone()).collect(),
        }),
    }
}

fn decode_argument(
    runtime: &dyn ManagedRuntime,
    ty: &FieldType,
    text: &str,
) -> Result<Value, String> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|err| format!("invalid JSON: {err}"))?;
    let mismatch = || format!("cannot convert {json} to {ty}");

    match ty {
        FieldType::Base(base) => {
            let integer = |min: i64, max: i64| {
                json.as_i64()
                    .filter(|v| (min..=max).contains(v))
                    .ok_or_else(mismatch)
            };
            Ok(match base {
                BaseType::Boolean => Value::Boolean(json.as_bool().ok_or_else(mismatch)?),
                BaseType::Byte => Value::Byte(integer(i8::MIN.into(), i8::MAX.into())? as i8),
                BaseType::Short => Value::Short(integer(i16::MIN.into(), i16::MAX.into())? as i16),
                BaseType::Int => Value::Int(integer(i32::MIN.into(), i32::MAX.into())? as i32),
                BaseType::Long => Value::Long(integer(i64::MIN, i64::MAX)?),
                BaseType::Char => Value::Char(decode_char(&json).ok_or_else(mismatch)?),
                BaseType::Float => Value::Float(json.as_f64().ok_or_else(mismatch)? as f32),
                BaseType::Double => Value::Double(json.as_f64().ok_or_else(mismatch)?),
            })
        }
        _ if json.is_null() => Ok(Value::Null),
        FieldType::Object(name) if name == "java/lang/String" => match &json {
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            _ => Err(mismatch()),
        },
        FieldType::Object(name) => runtime
            .decode_object(&hotwire_classfile::internal_to_binary(name), &json)
            .map_err(|err| err.to_string()),
        // Arrays are addressed by descriptor (`[I`, `[Ljava/lang/String;`).
        FieldType::Array(_) => runtime
            .decode_object(&ty.to_string(), &json)
            .map_err(|err| err.to_string()),
    }
}

/// A one-character string (BMP only) or a UTF-16 code unit.
fn decode_char(json: &serde_json::Value) -> Option<u16> {
    match json {
        serde_json::Value::String(s) => {
            let mut units = s.encode_utf16();
            match (units.next(), units.next()) {
                (Some(unit), None) => Some(unit),
                _ => None,
            }
        }
        other => other.as_u64().and_then(|v| u16::try_from(v).ok()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
