//! Shape coercion for raw attention payloads.

use serde_json::Value;

use super::CanonicalAttention;

/// Reduce a raw attention payload to `[head][row][col]`.
///
/// Rank is decided by the first element of the first non-empty row:
/// - not an array, or an empty array: no heads
/// - that element is an array (`raw[0][0]` in the usual case): the outer
///   dimension is heads
/// - otherwise (rank 1 or 2): the whole payload is a single head
///
/// Non-numeric leaves become `0.0`, a row that is a scalar becomes a
/// one-element row, and short rows are padded with `0.0` to the widest row of
/// their head. Canonical input comes back unchanged.
pub fn normalize(raw: Option<&Value>) -> CanonicalAttention {
    let Some(Value::Array(outer)) = raw else {
        return CanonicalAttention::empty();
    };
    if outer.is_empty() {
        return CanonicalAttention::empty();
    }

    // Skipping leading empty heads keeps `[[], [[1.0]]]` a head stack.
    let has_head_axis = outer
        .iter()
        .filter_map(Value::as_array)
        .find_map(|rows| rows.first())
        .is_some_and(Value::is_array);

    let heads = if has_head_axis {
        outer.iter().map(coerce_head).collect()
    } else {
        vec![coerce_rows(outer)]
    };

    CanonicalAttention::from_heads(heads)
}

fn coerce_head(head: &Value) -> Vec<Vec<f64>> {
    match head {
        Value::Array(rows) => coerce_rows(rows),
        scalar => vec![vec![coerce_leaf(scalar)]],
    }
}

fn coerce_rows(rows: &[Value]) -> Vec<Vec<f64>> {
    let mut matrix: Vec<Vec<f64>> = rows
        .iter()
        .map(|row| match row {
            Value::Array(cells) => cells.iter().map(coerce_leaf).collect(),
            scalar => vec![coerce_leaf(scalar)],
        })
        .collect();

    let width = matrix.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut matrix {
        row.resize(width, 0.0);
    }
    matrix
}

fn coerce_leaf(value: &Value) -> f64 {
    value.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0)
}
