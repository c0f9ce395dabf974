//! Content hashing used to build cache keys for generated products.
//!
//! Hashes are only guaranteed stable within one build of the crate, which is
//! all a per-process cache needs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Mix `value` into `seed`.
pub fn hash_combine(seed: &mut u64, value: u64) {
    *seed ^= value
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(*seed << 6)
        .wrapping_add(*seed >> 2);
}

/// Hash any hashable value.
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hash a float by its bit pattern, with `-0.0` and `0.0` treated alike.
pub fn hash_f64(value: f64) -> u64 {
    let normalized = if value == 0.0 { 0.0 } else { value };
    hash_value(&normalized.to_bits())
}

/// Hash a JSON value. Object keys are hashed in key order.
pub fn hash_json(value: &serde_json::Value) -> u64 {
    use serde_json::Value;
    match value {
        Value::Null => 0,
        Value::Bool(b) => hash_value(b),
        Value::Number(n) => match n.as_f64() {
            Some(f) => hash_f64(f),
            None => hash_value(&n.to_string()),
        },
        Value::String(s) => hash_value(s),
        Value::Array(items) => {
            let mut seed = hash_value(&items.len());
            for item in items {
                hash_combine(&mut seed, hash_json(item));
            }
            seed
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut seed = hash_value(&map.len());
            for key in keys {
                hash_combine(&mut seed, hash_value(key));
                hash_combine(&mut seed, hash_json(&map[key]));
            }
            seed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_combine_is_order_sensitive() {
        let mut a = 0;
        hash_combine(&mut a, 1);
        hash_combine(&mut a, 2);
        let mut b = 0;
        hash_combine(&mut b, 2);
        hash_combine(&mut b, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_json_hash_ignores_key_order() {
        let a = json!({"x": 1, "y": [1, 2]});
        let b: serde_json::Value = serde_json::from_str(r#"{"y":[1,2],"x":1}"#).unwrap();
        assert_eq!(hash_json(&a), hash_json(&b));
        assert_ne!(hash_json(&a), hash_json(&json!({"x": 2, "y": [1, 2]})));
    }
}
