//! Decoding of Arrow IPC-encoded query responses into rows.

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, StringArray, TimestampMillisecondArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::ipc::reader::StreamReader;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use data_types::{Row, RowSchema, SqlQueryOk, Value};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum DecodeError {
    #[error("malformed arrow payload: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("unsupported column type {0} for column \"{1}\"")]
    UnsupportedType(DataType, String),
}

/// Decode a query response's IPC chunks into a [`SqlQueryOk`].
pub(crate) fn decode_response(
    affected_rows: u32,
    batches: &[Bytes],
) -> Result<SqlQueryOk, DecodeError> {
    let mut rows = Vec::new();
    for chunk in batches {
        decode_chunk(chunk, &mut rows)?;
    }
    Ok(SqlQueryOk::new(affected_rows, rows))
}

/// Decode one IPC stream chunk, appending its rows.
pub(crate) fn decode_chunk(chunk: &Bytes, rows: &mut Vec<Row>) -> Result<(), DecodeError> {
    let reader = StreamReader::try_new(Cursor::new(chunk.as_ref()), None)?;
    for batch in reader {
        let batch = batch?;
        rows_from_batch(&batch, rows)?;
    }
    Ok(())
}

fn rows_from_batch(batch: &RecordBatch, rows: &mut Vec<Row>) -> Result<(), DecodeError> {
    let schema = Arc::new(RowSchema::new(
        batch
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect(),
    ));

    for row_idx in 0..batch.num_rows() {
        let values = batch
            .columns()
            .iter()
            .enumerate()
            .map(|(col_idx, column)| {
                value_at(column, row_idx).map_err(|e| match e {
                    DecodeError::UnsupportedType(data_type, _) => DecodeError::UnsupportedType(
                        data_type,
                        batch.schema().field(col_idx).name().clone(),
                    ),
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(Row::new(Arc::clone(&schema), values));
    }
    Ok(())
}

macro_rules! primitive {
    ($column:expr, $row:expr, $array:ty, $variant:ident) => {{
        let array = $column
            .as_any()
            .downcast_ref::<$array>()
            .expect("array type matches data type");
        Value::$variant(array.value($row))
    }};
}

fn value_at(column: &ArrayRef, row: usize) -> Result<Value, DecodeError> {
    if column.is_null(row) {
        return Ok(Value::Null);
    }

    let value = match column.data_type() {
        DataType::Null => Value::Null,
        DataType::Boolean => primitive!(column, row, BooleanArray, Boolean),
        DataType::Int8 => primitive!(column, row, Int8Array, Int8),
        DataType::Int16 => primitive!(column, row, Int16Array, Int16),
        DataType::Int32 => primitive!(column, row, Int32Array, Int32),
        DataType::Int64 => primitive!(column, row, Int64Array, Int64),
        DataType::UInt8 => primitive!(column, row, UInt8Array, UInt8),
        DataType::UInt16 => primitive!(column, row, UInt16Array, UInt16),
        DataType::UInt32 => primitive!(column, row, UInt32Array, UInt32),
        DataType::UInt64 => primitive!(column, row, UInt64Array, UInt64),
        DataType::Float32 => primitive!(column, row, Float32Array, Float32),
        DataType::Float64 => primitive!(column, row, Float64Array, Float64),
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            primitive!(column, row, TimestampMillisecondArray, Timestamp)
        }
        DataType::Utf8 => {
            let array = column
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("array type matches data type");
            Value::String(array.value(row).to_string())
        }
        DataType::Binary => {
            let array = column
                .as_any()
                .downcast_ref::<BinaryArray>()
                .expect("array type matches data type");
            Value::Varbinary(Bytes::copy_from_slice(array.value(row)))
        }
        other => {
            return Err(DecodeError::UnsupportedType(other.clone(), String::new()));
        }
    };
    Ok(value)
}

#[cfg(test)]
pub(crate) mod test_util {
    //! IPC encoding of record batches, the mirror of what the server does.

    use super::*;
    use arrow::ipc::writer::StreamWriter;

    pub(crate) fn encode_batch(batch: &RecordBatch) -> Bytes {
        let mut buf = Vec::new();
        {
            let mut writer =
                StreamWriter::try_new(&mut buf, &batch.schema()).expect("schema encodes");
            writer.write(batch).expect("batch encodes");
            writer.finish().expect("stream finishes");
        }
        Bytes::from(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::encode_batch;
    use super::*;
    use arrow::datatypes::{Field, Schema};
    use assert_matches::assert_matches;

    #[test]
    fn decodes_every_supported_type() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("b", DataType::Boolean, false),
            Field::new("i8", DataType::Int8, false),
            Field::new("i16", DataType::Int16, false),
            Field::new("i32", DataType::Int32, false),
            Field::new("i64", DataType::Int64, false),
            Field::new("u8", DataType::UInt8, false),
            Field::new("u16", DataType::UInt16, false),
            Field::new("u32", DataType::UInt32, false),
            Field::new("u64", DataType::UInt64, false),
            Field::new("f32", DataType::Float32, false),
            Field::new("f64", DataType::Float64, false),
            Field::new("s", DataType::Utf8, false),
            Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Millisecond, None),
                false,
            ),
            Field::new("bin", DataType::Binary, false),
        ]));

        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                Arc::new(BooleanArray::from(vec![true])),
                Arc::new(Int8Array::from(vec![i8::MIN])),
                Arc::new(Int16Array::from(vec![-2_i16])),
                Arc::new(Int32Array::from(vec![3_i32])),
                Arc::new(Int64Array::from(vec![i64::MAX])),
                Arc::new(UInt8Array::from(vec![u8::MAX])),
                Arc::new(UInt16Array::from(vec![5_u16])),
                Arc::new(UInt32Array::from(vec![6_u32])),
                Arc::new(UInt64Array::from(vec![u64::MAX])),
                Arc::new(Float32Array::from(vec![0.5_f32])),
                Arc::new(Float64Array::from(vec![0.25_f64])),
                Arc::new(StringArray::from(vec!["Singapore"])),
                Arc::new(TimestampMillisecondArray::from(vec![1_695_882_000_000])),
                Arc::new(BinaryArray::from(vec![&b"\x00\xFF"[..]])),
            ],
        )
        .unwrap();

        let ok = decode_response(0, &[encode_batch(&batch)]).unwrap();
        assert_eq!(ok.row_count(), 1);

        let row = &ok.rows()[0];
        assert_eq!(row.column("b"), Some(&Value::Boolean(true)));
        assert_eq!(row.column("i8"), Some(&Value::Int8(i8::MIN)));
        assert_eq!(row.column("i64"), Some(&Value::Int64(i64::MAX)));
        assert_eq!(row.column("u64"), Some(&Value::UInt64(u64::MAX)));
        assert_eq!(row.column("f32"), Some(&Value::Float32(0.5)));
        assert_eq!(row.column("s"), Some(&Value::String("Singapore".into())));
        assert_eq!(
            row.column("ts"),
            Some(&Value::Timestamp(1_695_882_000_000))
        );
        assert_eq!(
            row.column("bin"),
            Some(&Value::Varbinary(Bytes::from_static(b"\x00\xFF")))
        );
    }

    #[test]
    fn timestamp_boundary_values_round_trip() {
        for ts in [0, i64::MIN, i64::MAX] {
            let schema = Arc::new(Schema::new(vec![Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Millisecond, None),
                false,
            )]));
            let batch = RecordBatch::try_new(
                schema,
                vec![Arc::new(TimestampMillisecondArray::from(vec![ts]))],
            )
            .unwrap();

            let ok = decode_response(0, &[encode_batch(&batch)]).unwrap();
            assert_eq!(ok.rows()[0].column("ts"), Some(&Value::Timestamp(ts)));
        }
    }

    #[test]
    fn nulls_decode_as_null() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![Some(1), None]))],
        )
        .unwrap();

        let ok = decode_response(0, &[encode_batch(&batch)]).unwrap();
        assert_eq!(ok.rows()[0].column("v"), Some(&Value::Int64(1)));
        assert_eq!(ok.rows()[1].column("v"), Some(&Value::Null));
    }

    #[test]
    fn multiple_chunks_concatenate() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let chunks: Vec<_> = (0..3)
            .map(|i| {
                let batch = RecordBatch::try_new(
                    Arc::clone(&schema),
                    vec![Arc::new(Int64Array::from(vec![i]))],
                )
                .unwrap();
                encode_batch(&batch)
            })
            .collect();

        let ok = decode_response(0, &chunks).unwrap();
        assert_eq!(ok.row_count(), 3);
    }

    #[test]
    fn unsupported_type_errors_with_column_name() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "d",
            DataType::Date32,
            false,
        )]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(arrow::array::Date32Array::from(vec![1]))],
        )
        .unwrap();

        let err = decode_response(0, &[encode_batch(&batch)]).unwrap_err();
        assert_matches!(err, DecodeError::UnsupportedType(DataType::Date32, name) => {
            assert_eq!(name, "d");
        });
    }

    #[test]
    fn garbage_bytes_error() {
        let err = decode_response(0, &[Bytes::from_static(b"not arrow")]).unwrap_err();
        assert_matches!(err, DecodeError::Arrow(_));
    }
}
