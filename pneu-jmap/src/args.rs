use serde_json::{Map, Value};

/// Typed accessors over a method's dynamic argument object. Unknown
/// keys are ignored; a wrong-typed value reads as "not present" and the
/// caller decides whether that is an `invalidArguments`.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Args<'a> {
    pub fn new(value: &'a Value) -> Option<Self> {
        value.as_object().map(|map| Self { map })
    }

    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn opt_str(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).and_then(Value::as_str)
    }

    pub fn str_or(&self, key: &str, default: &'a str) -> &'a str {
        self.opt_str(key).unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.map.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn opt_int(&self, key: &str) -> Option<i64> {
        self.map.get(key).and_then(Value::as_i64)
    }

    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        self.opt_int(key).unwrap_or(default)
    }

    /// Present only when the value is an array of strings.
    pub fn string_slice(&self, key: &str) -> Option<Vec<String>> {
        let items = self.map.get(key)?.as_array()?;
        items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn object(&self, key: &str) -> Option<&'a Map<String, Value>> {
        self.map.get(key)?.as_object()
    }
}
