//! Mapping from external driver type codes to engine column types.

use crate::error::{BridgeError, Result};
use crate::models::{ColumnDescriptor, ColumnType, ExternalColumn, ExternalType, RecordMetadata};

/// Static mapping table. Codes not listed are not supported.
const TYPE_TABLE: [(ExternalType, ColumnType); 18] = [
    (ExternalType::VARCHAR, ColumnType::String),
    (ExternalType::NVARCHAR, ColumnType::String),
    (ExternalType::LONGVARCHAR, ColumnType::String),
    (ExternalType::LONGNVARCHAR, ColumnType::String),
    (ExternalType::TIMESTAMP, ColumnType::Timestamp),
    (ExternalType::TIMESTAMP_WITH_TIMEZONE, ColumnType::Timestamp),
    (ExternalType::TIME, ColumnType::Timestamp),
    (ExternalType::DOUBLE, ColumnType::Double),
    (ExternalType::FLOAT, ColumnType::Float),
    (ExternalType::REAL, ColumnType::Float),
    (ExternalType::INTEGER, ColumnType::Int),
    (ExternalType::SMALLINT, ColumnType::Short),
    (ExternalType::BIGINT, ColumnType::Long),
    (ExternalType::BOOLEAN, ColumnType::Boolean),
    (ExternalType::DATE, ColumnType::Date),
    (ExternalType::BINARY, ColumnType::Binary),
    (ExternalType::LONGVARBINARY, ColumnType::Binary),
    (ExternalType::VARBINARY, ColumnType::Binary),
];

/// Map an external type code to an engine column type; `None` means not supported.
pub fn map_type(external: ExternalType) -> Option<ColumnType> {
    TYPE_TABLE.iter().find(|(code, _)| *code == external).map(|(_, ty)| *ty)
}

/// Derive engine metadata from the columns an external statement reports.
///
/// Fails on the first column whose type has no mapping.
pub fn derive_metadata(columns: &[ExternalColumn]) -> Result<RecordMetadata> {
    let mut metadata = RecordMetadata::default();
    for (index, column) in columns.iter().enumerate() {
        let column_type = map_type(column.type_code).ok_or_else(|| {
            let type_name = if column.type_name.is_empty() {
                column.type_code.name()
            } else {
                column.type_name.clone()
            };
            BridgeError::unsupported_type(&column.name, type_name, index)
        })?;
        metadata.add(ColumnDescriptor::new(&column.name, column_type));
    }
    Ok(metadata)
}
