use arrow::array::{Array, Int64Array};

use crate::execution::ExecutorError;

/// Downcast an Arrow Array to a concrete type
macro_rules! downcast_value {
    ($Value:expr, $Type:ident) => {{
        use std::any::type_name;
        $Value.as_any().downcast_ref::<$Type>().ok_or_else(|| {
            ExecutorError::OperatorError(format!(
                "could not cast value to {}",
                type_name::<$Type>()
            ))
        })?
    }};
}

/// Downcast ArrayRef to Int64Array
pub fn as_int64_array(array: &dyn Array) -> Result<&Int64Array, ExecutorError> {
    Ok(downcast_value!(array, Int64Array))
}

/// Read a nullable value out of an Int64Array.
#[inline]
pub fn int64_value_at(array: &Int64Array, row: usize) -> Option<i64> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}
