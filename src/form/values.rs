use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::controller::{FieldKey, FormError, FormResult, FormState};

pub trait FormModel: Clone + Send + Sync + 'static {
    type Fields;

    const FIELD_NAMES: &'static [&'static str];

    fn fields() -> Self::Fields;

    fn field_keys() -> Vec<FieldKey> {
        Self::FIELD_NAMES
            .iter()
            .copied()
            .map(FieldKey::new)
            .collect()
    }
}

/// Nested JSON view over every field value. Dotted names become nested objects and
/// index segments under field arrays become array positions.
#[derive(Clone, Debug, PartialEq)]
pub struct FormValues(Value);

impl Default for FormValues {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

impl FormValues {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub(super) fn collect(state: &FormState) -> Self {
        let mut root = Value::Object(Map::new());

        let mut arrays = state
            .field_arrays
            .iter()
            .filter_map(|(canonical, array)| {
                Some((state.display_name(canonical)?, array.items.len()))
            })
            .collect::<Vec<_>>();
        arrays.sort_by_key(|(name, _)| name.split('.').count());
        for (name, len) in arrays {
            if let Some(slot) = slot_mut(&mut root, &name) {
                match slot {
                    Value::Array(items) => items.resize(len, Value::Null),
                    other => *other = Value::Array(vec![Value::Null; len]),
                }
            }
        }

        for (canonical, field) in &state.fields {
            let Some(value) = &field.value else {
                continue;
            };
            let Some(name) = state.display_name(canonical) else {
                continue;
            };
            if let Some(slot) = slot_mut(&mut root, &name) {
                *slot = value.clone();
            }
        }
        Self(root)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.0, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    pub fn into_json(self) -> Value {
        self.0
    }

    pub fn deserialize<T>(&self) -> FormResult<T>
    where
        T: DeserializeOwned,
    {
        T::deserialize(&self.0).map_err(|error| FormError::ValueConversion(error.to_string()))
    }
}

/// Walks `path` creating objects for missing segments. Numeric segments index into
/// arrays that already exist.
fn slot_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.split('.') {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Array(items) => {
                let index = segment.parse::<usize>().ok()?;
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                items.get_mut(index)?
            }
            Value::Object(map) => map.entry(segment).or_insert(Value::Null),
            _ => return None,
        };
    }
    Some(current)
}
