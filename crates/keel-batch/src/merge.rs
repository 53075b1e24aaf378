use serde_json::Value;

/// Combine a partial update into an existing payload.
///
/// Later patches win: merging `a` then `b` must leave every field `b` sets
/// with `b`'s value.
pub trait Merge {
    fn merge(&mut self, patch: Self);
}

/// Objects merge field by field, one level deep. Anything else replaces the
/// payload wholesale.
impl Merge for Value {
    fn merge(&mut self, patch: Self) {
        match (self, patch) {
            (Value::Object(current), Value::Object(fields)) => {
                for (key, value) in fields {
                    current.insert(key, value);
                }
            }
            (current, patch) => *current = patch,
        }
    }
}

impl Merge for String {
    fn merge(&mut self, patch: Self) {
        *self = patch;
    }
}
