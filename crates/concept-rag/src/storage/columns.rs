//! Arrow column plumbing shared by the repositories.
//!
//! Building: list and fixed-size-list constructors for the id arrays and
//! embedding vectors. Reading: by-name column extraction from RecordBatches;
//! absent columns read as defaults (`_distance` only exists on vector search
//! output).

use std::sync::Arc;

use arrow_array::builder::{ListBuilder, StringBuilder, UInt32Builder};
use arrow_array::{
    Array, ArrayRef, BooleanArray, FixedSizeListArray, Float32Array, ListArray, RecordBatch,
    StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field};

/// FixedSizeList<Float32; dim> column from row vectors.
pub(crate) fn vector_column(vectors: &[Vec<f32>], dimension: usize) -> FixedSizeListArray {
    let flat: Vec<f32> = vectors.iter().flat_map(|v| v.iter().copied()).collect();
    let values = Float32Array::from(flat);
    let item = Field::new("item", DataType::Float32, true);
    FixedSizeListArray::new(Arc::new(item), dimension as i32, Arc::new(values) as ArrayRef, None)
}

/// List<UInt32> column from per-row id arrays.
pub(crate) fn u32_list_column(rows: &[Vec<u32>]) -> ListArray {
    let mut builder = ListBuilder::new(UInt32Builder::new());
    for row in rows {
        for value in row {
            builder.values().append_value(*value);
        }
        builder.append(true);
    }
    builder.finish()
}

/// List<Utf8> column from per-row string arrays.
pub(crate) fn utf8_list_column(rows: &[Vec<String>]) -> ListArray {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for row in rows {
        for value in row {
            builder.values().append_value(value);
        }
        builder.append(true);
    }
    builder.finish()
}

/// Schema field for a List<UInt32> column (ListBuilder emits a nullable
/// "item" child).
pub(crate) fn u32_list_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::List(Arc::new(Field::new("item", DataType::UInt32, true))),
        true,
    )
}

pub(crate) fn utf8_list_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
        true,
    )
}

pub(crate) fn vector_field(name: &str, dimension: usize) -> Field {
    Field::new(
        name,
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, true)),
            dimension as i32,
        ),
        true,
    )
}

pub(crate) fn read_str(batch: &RecordBatch, name: &str, row: usize) -> String {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .map(|a| a.value(row).to_string())
        .unwrap_or_default()
}

pub(crate) fn read_u32(batch: &RecordBatch, name: &str, row: usize) -> u32 {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
        .map(|a| a.value(row))
        .unwrap_or_default()
}

pub(crate) fn read_opt_u32(batch: &RecordBatch, name: &str, row: usize) -> Option<u32> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
        .and_then(|a| if a.is_null(row) { None } else { Some(a.value(row)) })
}

pub(crate) fn read_f32(batch: &RecordBatch, name: &str, row: usize) -> f32 {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .map(|a| a.value(row))
        .unwrap_or_default()
}

pub(crate) fn read_opt_f32(batch: &RecordBatch, name: &str, row: usize) -> Option<f32> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .and_then(|a| if a.is_null(row) { None } else { Some(a.value(row)) })
}

pub(crate) fn read_bool(batch: &RecordBatch, name: &str, row: usize) -> bool {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
        .map(|a| a.value(row))
        .unwrap_or_default()
}

pub(crate) fn read_vector(batch: &RecordBatch, name: &str, row: usize) -> Vec<f32> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .map(|a| {
            let values = a.value(row);
            values
                .as_any()
                .downcast_ref::<Float32Array>()
                .map(|f| f.values().to_vec())
                .unwrap_or_default()
        })
        .unwrap_or_default()
}

pub(crate) fn read_u32_list(batch: &RecordBatch, name: &str, row: usize) -> Vec<u32> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<ListArray>())
        .map(|a| {
            let values = a.value(row);
            values
                .as_any()
                .downcast_ref::<UInt32Array>()
                .map(|v| v.values().to_vec())
                .unwrap_or_default()
        })
        .unwrap_or_default()
}

pub(crate) fn read_utf8_list(batch: &RecordBatch, name: &str, row: usize) -> Vec<String> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<ListArray>())
        .map(|a| {
            let values = a.value(row);
            values
                .as_any()
                .downcast_ref::<StringArray>()
                .map(|v| (0..v.len()).map(|i| v.value(i).to_string()).collect())
                .unwrap_or_default()
        })
        .unwrap_or_default()
}

/// Cosine distance emitted by vector search; absent on plain scans.
pub(crate) fn read_distance(batch: &RecordBatch, row: usize) -> Option<f32> {
    batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .map(|a| a.value(row))
}
