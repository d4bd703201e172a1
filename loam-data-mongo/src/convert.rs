use bson::{Bson, Document};
use loam_data::DataError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

/// Per-database encode/decode entry point for the storage format.
///
/// Serde is the codec; the registry pins it to a database so diagnostics can
/// name where a value failed to map.
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    database: String,
}

impl CodecRegistry {
    pub fn for_database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Encode a value into a document.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Document, DataError> {
        bson::to_document(value).map_err(|e| {
            DataError::conversion(format!(
                "failed to encode {} for database '{}': {e}",
                type_name::<T>(),
                self.database
            ))
        })
    }

    /// Decode a document into a value.
    pub fn decode<T: DeserializeOwned>(&self, document: Document) -> Result<T, DataError> {
        bson::from_document(document).map_err(|e| {
            DataError::conversion(format!(
                "failed to decode {} from database '{}': {e}",
                type_name::<T>(),
                self.database
            ))
        })
    }
}

type ValueConverter = Box<dyn Fn(&Bson) -> Option<Bson> + Send + Sync>;

/// Generic value conversion: turns an unwrapped BSON value into the declared
/// result type, or fails with a conversion error if no path exists.
///
/// Custom converters can be registered per target type at startup; they are
/// consulted before the generic serde path. The service is immutable once
/// handed to the operations component.
#[derive(Default)]
pub struct ConversionService {
    converters: HashMap<TypeId, ValueConverter>,
}

impl ConversionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom pre-conversion step for target type `R`. The
    /// converter returns a normalized BSON value, or `None` to fall through
    /// to the generic path.
    pub fn register<R: 'static>(
        &mut self,
        converter: impl Fn(&Bson) -> Option<Bson> + Send + Sync + 'static,
    ) {
        self.converters.insert(TypeId::of::<R>(), Box::new(converter));
    }

    /// Convert `value` to `R`, or fail. Never coerces silently: if neither a
    /// registered converter nor the serde path (including numeric widening /
    /// narrowing) accepts the value, the invocation fails.
    pub fn convert_required<R>(&self, value: Bson) -> Result<R, DataError>
    where
        R: DeserializeOwned + 'static,
    {
        if let Some(converter) = self.converters.get(&TypeId::of::<R>()) {
            if let Some(normalized) = converter(&value) {
                return bson::from_bson(normalized).map_err(|e| {
                    DataError::conversion(format!(
                        "registered converter produced a value not assignable to {}: {e}",
                        type_name::<R>()
                    ))
                });
            }
        }
        match bson::from_bson::<R>(value.clone()) {
            Ok(converted) => Ok(converted),
            Err(_) => {
                for alternative in numeric_alternatives(&value) {
                    if let Ok(converted) = bson::from_bson::<R>(alternative) {
                        return Ok(converted);
                    }
                }
                Err(DataError::conversion(format!(
                    "cannot convert {value:?} to {}",
                    type_name::<R>()
                )))
            }
        }
    }
}

/// Equivalent representations of a numeric value, tried in order when the
/// declared result type does not accept the raw representation.
fn numeric_alternatives(value: &Bson) -> Vec<Bson> {
    match *value {
        Bson::Int32(v) => vec![Bson::Int64(i64::from(v)), Bson::Double(f64::from(v))],
        Bson::Int64(v) => {
            let mut alts = vec![Bson::Double(v as f64)];
            if let Ok(narrow) = i32::try_from(v) {
                alts.push(Bson::Int32(narrow));
            }
            alts
        }
        Bson::Double(v) if v.fract() == 0.0 && v.is_finite() => {
            let mut alts = Vec::new();
            if v >= i64::MIN as f64 && v <= i64::MAX as f64 {
                alts.push(Bson::Int64(v as i64));
            }
            if v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) {
                alts.push(Bson::Int32(v as i32));
            }
            alts
        }
        _ => Vec::new(),
    }
}

/// Convert a raw result document into the declared result type `R`.
///
/// Query results are structurally ambiguous (single aggregate value,
/// identifier plus projected value, DTO projection, full raw document) and
/// the backend does not tag the shape, so disambiguation goes by field count
/// and the declared result type, first match wins:
///
/// 1. `R` is the raw-document type: identity. `Option<Document>` as `R`
///    extends the identity to an absent result.
/// 2. Absent result: treated as an explicit null value, scalar-converted.
/// 3. One field: unwrap it.
/// 4. Two fields: unwrap the one that is not the identifier field; when no
///    field matches the identifier, the first field in document order wins.
/// 5. DTO projection: materialize `R` structurally from the whole document.
/// 6. Anything else is an unrecognized result shape, a fatal mismatch
///    between the declared result type and the backend response.
pub fn convert_result<R>(
    conversion: &ConversionService,
    id_field: &str,
    result: Option<Document>,
    is_dto_projection: bool,
) -> Result<R, DataError>
where
    R: DeserializeOwned + 'static,
{
    if TypeId::of::<R>() == TypeId::of::<Document>() {
        let document = result.ok_or_else(|| {
            DataError::conversion("absent result cannot be returned as a raw document")
        })?;
        return downcast_identity(document);
    }
    if TypeId::of::<R>() == TypeId::of::<Option<Document>>() {
        return downcast_identity(result);
    }

    let value = match result {
        None => Bson::Null,
        Some(document) => match document.len() {
            1 => document
                .iter()
                .next()
                .map(|(_, v)| v.clone())
                .unwrap_or(Bson::Null),
            2 => document
                .iter()
                .find(|(key, _)| key.as_str() != id_field)
                .or_else(|| document.iter().next())
                .map(|(_, v)| v.clone())
                .unwrap_or(Bson::Null),
            _ if is_dto_projection => {
                return bson::from_document(document).map_err(|e| {
                    DataError::conversion(format!(
                        "cannot materialize DTO {} from result: {e}",
                        type_name::<R>()
                    ))
                });
            }
            _ => {
                return Err(DataError::UnrecognizedResult(format!(
                    "{} fields in result for declared type {}",
                    document.len(),
                    type_name::<R>()
                )));
            }
        },
    };
    conversion.convert_required(value)
}

fn downcast_identity<R: 'static, V: Any>(value: V) -> Result<R, DataError> {
    let boxed: Box<dyn Any> = Box::new(value);
    match boxed.downcast::<R>() {
        Ok(result) => Ok(*result),
        Err(_) => Err(DataError::illegal_state(
            "raw document passthrough used with a non-document result type",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde::Deserialize;

    fn service() -> ConversionService {
        ConversionService::new()
    }

    #[test]
    fn single_field_unwraps_and_converts() {
        let result = doc! { "total": 42_i32 };
        let total: i64 = convert_result(&service(), "_id", Some(result), false).unwrap();
        assert_eq!(total, 42);
    }

    #[test]
    fn single_field_numeric_widening_to_double() {
        let result = doc! { "avg": 3_i32 };
        let avg: f64 = convert_result(&service(), "_id", Some(result), false).unwrap();
        assert_eq!(avg, 3.0);
    }

    #[test]
    fn two_fields_skips_identifier() {
        // identifier first, projected value second
        let result = doc! { "_id": 7_i64, "name": "lily" };
        let name: String = convert_result(&service(), "_id", Some(result), false).unwrap();
        assert_eq!(name, "lily");

        // projected value first, identifier second
        let result = doc! { "name": "rose", "_id": 7_i64 };
        let name: String = convert_result(&service(), "_id", Some(result), false).unwrap();
        assert_eq!(name, "rose");
    }

    #[test]
    fn two_fields_none_matches_id_takes_first() {
        // Implementation-defined fallback: stable document order, first wins.
        let result = doc! { "alpha": "a", "beta": "b" };
        let value: String = convert_result(&service(), "_id", Some(result), false).unwrap();
        assert_eq!(value, "a");
    }

    #[test]
    fn absent_result_is_explicit_null() {
        let value: Option<String> = convert_result(&service(), "_id", None, false).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn absent_result_into_scalar_fails() {
        let err = convert_result::<i64>(&service(), "_id", None, false).unwrap_err();
        assert!(matches!(err, DataError::Conversion(_)));
    }

    #[test]
    fn raw_document_passthrough_is_identity() {
        let result = doc! { "a": 1, "b": 2, "c": 3 };
        let back: Document =
            convert_result(&service(), "_id", Some(result.clone()), false).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn optional_raw_document_passthrough_includes_null() {
        let none: Option<Document> = convert_result(&service(), "_id", None, false).unwrap();
        assert!(none.is_none());

        let result = doc! { "x": 1 };
        let some: Option<Document> =
            convert_result(&service(), "_id", Some(result.clone()), false).unwrap();
        assert_eq!(some, Some(result));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct NameAndCount {
        name: String,
        count: i64,
    }

    #[test]
    fn dto_projection_materializes_struct() {
        let result = doc! { "name": "lily", "count": 3_i64, "extra": true };
        let dto: NameAndCount = convert_result(&service(), "_id", Some(result), true).unwrap();
        assert_eq!(
            dto,
            NameAndCount {
                name: "lily".to_string(),
                count: 3
            }
        );
    }

    #[test]
    fn wide_result_without_dto_is_unrecognized() {
        let result = doc! { "a": 1, "b": 2, "c": 3 };
        let err = convert_result::<i64>(&service(), "_id", Some(result), false).unwrap_err();
        assert!(matches!(err, DataError::UnrecognizedResult(_)));
    }

    #[test]
    fn type_mismatch_is_conversion_error() {
        let result = doc! { "name": "lily" };
        let err = convert_result::<i64>(&service(), "_id", Some(result), false).unwrap_err();
        assert!(matches!(err, DataError::Conversion(_)));
    }

    #[test]
    fn registered_converter_runs_first() {
        let mut conversion = ConversionService::new();
        conversion.register::<i64>(|value| match value {
            Bson::String(s) => s.parse::<i64>().ok().map(Bson::Int64),
            _ => None,
        });
        let result = doc! { "count": "17" };
        let count: i64 = convert_result(&conversion, "_id", Some(result), false).unwrap();
        assert_eq!(count, 17);
    }

    #[test]
    fn codec_round_trip() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Pet {
            name: String,
            age: i32,
        }
        let codec = CodecRegistry::for_database("zoo");
        let doc = codec.encode(&Pet {
            name: "rex".into(),
            age: 4,
        })
        .unwrap();
        assert_eq!(doc.get_str("name").unwrap(), "rex");
        let pet: Pet = codec.decode(doc).unwrap();
        assert_eq!(pet.age, 4);
    }
}
