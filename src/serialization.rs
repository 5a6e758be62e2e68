use serde::{de::DeserializeOwned, Serialize};

use crate::errors::TabulationError;

///
/// Encoding of table snapshots. The `Lz4` variants wrap the encoded bytes in
/// a size-prefixed LZ4 block.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SerializationFormat
{
    /// Readable, for inspecting small tables.
    Json,
    JsonLz4,
    Bincode,
    #[default]
    BincodeLz4,
}

impl SerializationFormat
{
    #[inline]
    pub fn is_compressed(&self) -> bool
    {
        matches!(self, Self::JsonLz4 | Self::BincodeLz4)
    }

    #[inline]
    fn is_json(&self) -> bool
    {
        matches!(self, Self::Json | Self::JsonLz4)
    }
}

fn encode<T: Serialize>(data: &T, format: SerializationFormat) -> Result<Vec<u8>, TabulationError>
{
    if format.is_json()
    {
        serde_json::to_vec(data).map_err(|_| TabulationError::SerializationFailed)
    }
    else
    {
        bincode::serde::encode_to_vec(data, bincode::config::standard()).map_err(|_| TabulationError::SerializationFailed)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8], format: SerializationFormat) -> Result<T, TabulationError>
{
    if format.is_json()
    {
        serde_json::from_slice(bytes).map_err(|_| TabulationError::DeserializationFailed)
    }
    else
    {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard()).map_err(|_| TabulationError::DeserializationFailed)?;
        Ok(value)
    }
}

pub fn serialize<T: Serialize>(data: &T, format: SerializationFormat) -> Result<Vec<u8>, TabulationError>
{
    let bytes = encode(data, format)?;
    Ok(if format.is_compressed() { lz4_flex::compress_prepend_size(&bytes) } else { bytes })
}

pub fn deserialize<T: DeserializeOwned>(bytes: &[u8], format: SerializationFormat) -> Result<T, TabulationError>
{
    if format.is_compressed()
    {
        let bytes = lz4_flex::decompress_size_prepended(bytes).map_err(|_| TabulationError::Lz4DecompressionFailed)?;
        decode(&bytes, format)
    }
    else
    {
        decode(bytes, format)
    }
}

#[test]
fn test_options_json_roundtrip()
{
    use crate::options::TabulationOptions;
    let options = TabulationOptions { scale_factors: Some(vec![1.0, 2.0, 500.0]), ..TabulationOptions::new(1e-3) };
    let bytes = serialize(&options, SerializationFormat::Json).unwrap();
    let result: TabulationOptions = deserialize(&bytes, SerializationFormat::Json).unwrap();
    assert_eq!(options, result);
}

#[test]
fn test_bincode_lz4_roundtrip()
{
    let values: Vec<f64> = (0..1000).map(|i| (i % 7) as f64 * 0.5).collect();
    let bytes = serialize(&values, SerializationFormat::BincodeLz4).unwrap();
    assert!(bytes.len() < 8 * values.len());
    let result: Vec<f64> = deserialize(&bytes, SerializationFormat::BincodeLz4).unwrap();
    assert_eq!(values, result);
}

#[test]
fn test_corrupt_lz4_is_rejected()
{
    let result: Result<Vec<f64>, _> = deserialize(&[16, 0, 0, 0, 0xf0], SerializationFormat::JsonLz4);
    assert_eq!(result, Err(TabulationError::Lz4DecompressionFailed));
    let result: Result<Vec<f64>, _> = deserialize(b"[1.0,", SerializationFormat::Json);
    assert_eq!(result, Err(TabulationError::DeserializationFailed));
}
