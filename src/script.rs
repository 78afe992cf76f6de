//! Pre/post request scripts.
//!
//! Scripts are Rhai. Each run sees three values:
//! - `vars`: the chain variables (caller overrides and extracted values included)
//! - `request`: the link request (`id`, `method`, `url`, `headers`, `body`)
//! - `response`: the captured response, post-scripts only
//!
//! Entries a script adds to or changes in `vars` are handed back so the
//! executor can merge them into the chain scope.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;

use crate::error::{Error, Result};

/// Maximum string size a script may build (1MB).
const MAX_SCRIPT_STRING_SIZE: usize = 1024 * 1024;
/// Maximum array size a script may build.
const MAX_SCRIPT_ARRAY_SIZE: usize = 10_000;
/// Maximum map size a script may build.
const MAX_SCRIPT_MAP_SIZE: usize = 10_000;

/// Run one script and return the variables it added or changed.
pub fn run_script(
    source: &str,
    timeout: Duration,
    variables: &HashMap<String, Value>,
    request: &Value,
    response: Option<&Value>,
) -> Result<HashMap<String, Value>> {
    let engine = create_engine(timeout);

    let vars: serde_json::Map<String, Value> = variables
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut scope = Scope::new();
    scope.push("vars", json_to_dynamic(Value::Object(vars)));
    scope.push_constant("request", json_to_dynamic(request.clone()));
    if let Some(response) = response {
        scope.push_constant("response", json_to_dynamic(response.clone()));
    }

    engine
        .run_with_scope(&mut scope, source)
        .map_err(|e| Error::Script(e.to_string()))?;

    let after = scope
        .get_value::<rhai::Map>("vars")
        .ok_or_else(|| Error::Script("`vars` is no longer a map".to_string()))?;

    let changed = after
        .into_iter()
        .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
        .filter(|(k, v)| variables.get(k) != Some(v))
        .collect();
    Ok(changed)
}

fn create_engine(timeout: Duration) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_string_size(MAX_SCRIPT_STRING_SIZE);
    engine.set_max_array_size(MAX_SCRIPT_ARRAY_SIZE);
    engine.set_max_map_size(MAX_SCRIPT_MAP_SIZE);

    let started = Instant::now();
    engine.on_progress(move |_ops| {
        if started.elapsed() > timeout {
            Some(Dynamic::from(format!(
                "script exceeded {}ms",
                timeout.as_millis()
            )))
        } else {
            None
        }
    });

    engine.register_fn("to_json", |v: Dynamic| -> String {
        serde_json::to_string(&dynamic_to_json(v)).unwrap_or_default()
    });

    engine.register_fn("from_json", |s: &str| -> Dynamic {
        match serde_json::from_str::<Value>(s) {
            Ok(value) => json_to_dynamic(value),
            Err(_) => Dynamic::UNIT,
        }
    });

    engine
}

fn dynamic_to_json(v: Dynamic) -> Value {
    if v.is_unit() {
        Value::Null
    } else if v.is_bool() {
        Value::Bool(v.as_bool().unwrap_or(false))
    } else if v.is_int() {
        serde_json::json!(v.as_int().unwrap_or(0))
    } else if v.is_float() {
        serde_json::json!(v.as_float().unwrap_or(0.0))
    } else if v.is_string() {
        Value::String(v.into_string().unwrap_or_default())
    } else if v.is_array() {
        match v.into_array() {
            Ok(arr) => Value::Array(arr.into_iter().map(dynamic_to_json).collect()),
            Err(_) => Value::Null,
        }
    } else if v.is_map() {
        match v.try_cast::<rhai::Map>() {
            Some(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                    .collect(),
            ),
            None => Value::Null,
        }
    } else {
        Value::String(v.to_string())
    }
}

fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let mut map = rhai::Map::new();
            for (k, v) in obj {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}
