//! List coercion and the shaping applied to fan-out results.

use serde_json::Value;

use crate::error::CallError;

/// Values that list-returning calls know how to shape.
///
/// Both methods have defaults describing a plain scalar: never null, never
/// nested. Implement it for your own result type to use it with
/// [`lcall()`](crate::lcall) and friends:
///
/// ```
/// use lioncall::Listable;
///
/// #[derive(Debug, PartialEq)]
/// struct Row(u32);
///
/// impl Listable for Row {}
/// ```
pub trait Listable: PartialEq + Sized {
    /// Whether `dropna` removes this value.
    fn is_null(&self) -> bool {
        false
    }

    /// Items of this value if it is itself a list, so `flatten` can splice it.
    fn nested_mut(&mut self) -> Option<&mut Vec<Self>> {
        None
    }
}

impl Listable for Value {
    fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn nested_mut(&mut self) -> Option<&mut Vec<Self>> {
        self.as_array_mut()
    }
}

impl<U: PartialEq> Listable for Option<U> {
    fn is_null(&self) -> bool {
        self.is_none()
    }
}

macro_rules! impl_scalar_listable {
    ($($ty:ty),* $(,)?) => {
        $(impl Listable for $ty {})*
    };
}

impl_scalar_listable!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str,
);

/// Apply the `flatten`, `dropna` and `unique` flags to a list of results.
///
/// Nested lists are processed recursively: `dropna` reaches into them even
/// when they are kept nested. `unique` keeps the first occurrence of every value.
pub(crate) fn shape<T: Listable>(items: Vec<T>, flatten: bool, dropna: bool, unique: bool) -> Vec<T> {
    let items = if flatten || dropna {
        process(items, flatten, dropna)
    } else {
        items
    };

    if unique {
        dedup(items)
    } else {
        items
    }
}

fn process<T: Listable>(items: Vec<T>, flatten: bool, dropna: bool) -> Vec<T> {
    let mut result = Vec::with_capacity(items.len());

    for mut item in items {
        if let Some(nested) = item.nested_mut() {
            let processed = process(std::mem::take(nested), flatten, dropna);
            if flatten {
                result.extend(processed);
            } else {
                *nested = processed;
                result.push(item);
            }
        } else if !(dropna && item.is_null()) {
            result.push(item);
        }
    }

    result
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut seen: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

/// Flags for [`to_list()`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToList {
    /// Splice nested arrays into the result, recursively.
    pub flatten: bool,
    /// Drop `null` items.
    pub dropna: bool,
    /// Keep only the first occurrence of every item. Needs `flatten`.
    pub unique: bool,
    /// Split strings into characters and objects into their values.
    pub use_values: bool,
}

/// Coerce a JSON value into a list.
///
/// - `null` becomes an empty list.
/// - An array becomes its items.
/// - A string or an object becomes a single item, or its characters / values
///   with `use_values`.
/// - Anything else becomes a single item.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use lioncall::{to_list, ToList};
///
/// let flat = ToList { flatten: true, dropna: true, ..ToList::default() };
///
/// assert_eq!(to_list(json!([1, [2, null, [3]]]), flat).unwrap(), vec![json!(1), json!(2), json!(3)]);
/// assert_eq!(to_list(json!(null), flat).unwrap(), Vec::<serde_json::Value>::new());
///
/// let values = ToList { use_values: true, ..ToList::default() };
/// assert_eq!(to_list(json!({"a": 1, "b": 2}), values).unwrap(), vec![json!(1), json!(2)]);
///
/// // uniqueness is only defined on a flat list
/// assert!(to_list(json!([1, 1]), ToList { unique: true, ..ToList::default() }).is_err());
/// ```
pub fn to_list(value: Value, options: ToList) -> Result<Vec<Value>, CallError> {
    if options.unique && !options.flatten {
        return Err(CallError::Validation(
            "unique requires flatten to be set".to_owned(),
        ));
    }

    let items = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::String(s) if options.use_values => {
            s.chars().map(|c| Value::String(c.to_string())).collect()
        }
        Value::Object(map) if options.use_values => map.into_iter().map(|(_, v)| v).collect(),
        other => vec![other],
    };

    Ok(shape(items, options.flatten, options.dropna, options.unique))
}
