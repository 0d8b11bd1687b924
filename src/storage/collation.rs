//! The `JSON` collation.
//!
//! View map keys are stored as JSON text and must sort by their JSON
//! semantics, not their byte representation. The collation orders values
//! by type rank first, then structurally within a type:
//!
//! ```text
//! null < false < true < numbers < strings < arrays < objects
//! ```
//!
//! Strings compare by Unicode code point, arrays lexicographically by
//! element, objects lexicographically by key then value. The collation
//! is registered at open time; it is consumed by the view engine.

use std::cmp::Ordering;

use rusqlite::Connection;
use serde_json::Value;

/// Registers the `JSON` collation on a connection.
pub fn register_json_collation(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_collation("JSON", |a, b| compare_json_strings(a, b))
}

/// Compares two JSON-encoded strings by JSON semantics.
///
/// SQLite requires a total order over arbitrary text, so sides that fail
/// to parse rank above every well-formed value and fall back to plain
/// string comparison against each other.
fn compare_json_strings(a: &str, b: &str) -> Ordering {
    match (serde_json::from_str::<Value>(a), serde_json::from_str::<Value>(b)) {
        (Ok(va), Ok(vb)) => compare_values(&va, &vb),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Rank of a JSON value's type in the collation order.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Structural comparison of two JSON values.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        // &str comparison is byte-wise, which for UTF-8 equals code
        // point order.
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = compare_values(ex, ey);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        // serde_json's Map iterates in key order (BTreeMap-backed), so
        // pairwise iteration compares by key then value.
        (Value::Object(x), Value::Object(y)) => {
            for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
                let ord = kx.cmp(ky).then_with(|| compare_values(vx, vy));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}
