use std::borrow::Cow;

use heed::{BoxedError, BytesDecode, BytesEncode};
use uuid::Uuid;

/// Maps a signed millisecond timestamp onto `u64` so that big-endian byte
/// order matches chronological order.
fn encode_millis(millis: i64) -> u64 {
    (millis as u64) ^ (1 << 63)
}

fn decode_millis(raw: u64) -> i64 {
    (raw ^ (1 << 63)) as i64
}

fn invalid_length(name: &str) -> BoxedError {
    BoxedError::from(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("Invalid byte length for {name}"),
    ))
}

#[derive(Debug)]
pub struct HeedId(pub u64);

impl From<u64> for HeedId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl<'a> BytesEncode<'a> for HeedId {
    type EItem = Self;

    fn bytes_encode(item: &'a Self::EItem) -> Result<Cow<'a, [u8]>, BoxedError> {
        Ok(Cow::Owned(item.0.to_be_bytes().to_vec()))
    }
}

impl<'a> BytesDecode<'a> for HeedId {
    type DItem = HeedId;

    fn bytes_decode(bytes: &'a [u8]) -> Result<Self::DItem, BoxedError> {
        if bytes.len() != 8 {
            return Err(invalid_length("HeedId"));
        }
        Ok(HeedId(u64::from_be_bytes(bytes.try_into()?)))
    }
}

/// `(event id, thread id)`, so every thread of an event sits in one range.
#[derive(Debug)]
pub struct HeedIdPair(pub (u64, u64));

impl From<(u64, u64)> for HeedIdPair {
    fn from(ids: (u64, u64)) -> Self {
        Self(ids)
    }
}

impl<'a> BytesEncode<'a> for HeedIdPair {
    type EItem = Self;

    fn bytes_encode(item: &'a Self::EItem) -> Result<Cow<'a, [u8]>, BoxedError> {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&item.0 .0.to_be_bytes());
        bytes.extend_from_slice(&item.0 .1.to_be_bytes());
        Ok(Cow::Owned(bytes))
    }
}

impl<'a> BytesDecode<'a> for HeedIdPair {
    type DItem = HeedIdPair;

    fn bytes_decode(bytes: &'a [u8]) -> Result<Self::DItem, BoxedError> {
        if bytes.len() != 16 {
            return Err(invalid_length("HeedIdPair"));
        }
        let first = u64::from_be_bytes(bytes[..8].try_into()?);
        let second = u64::from_be_bytes(bytes[8..].try_into()?);
        Ok(HeedIdPair((first, second)))
    }
}

/// `(timestamp millis, event id)`, the timeline order.
#[derive(Debug)]
pub struct HeedTimestampId(pub (i64, u64));

impl From<(i64, u64)> for HeedTimestampId {
    fn from(key: (i64, u64)) -> Self {
        Self(key)
    }
}

impl<'a> BytesEncode<'a> for HeedTimestampId {
    type EItem = Self;

    fn bytes_encode(item: &'a Self::EItem) -> Result<Cow<'a, [u8]>, BoxedError> {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&encode_millis(item.0 .0).to_be_bytes());
        bytes.extend_from_slice(&item.0 .1.to_be_bytes());
        Ok(Cow::Owned(bytes))
    }
}

impl<'a> BytesDecode<'a> for HeedTimestampId {
    type DItem = HeedTimestampId;

    fn bytes_decode(bytes: &'a [u8]) -> Result<Self::DItem, BoxedError> {
        if bytes.len() != 16 {
            return Err(invalid_length("HeedTimestampId"));
        }
        let millis = decode_millis(u64::from_be_bytes(bytes[..8].try_into()?));
        let id = u64::from_be_bytes(bytes[8..].try_into()?);
        Ok(HeedTimestampId((millis, id)))
    }
}

/// `(thread id, event timestamp millis, event id)`: a thread's members in
/// timeline order.
#[derive(Debug)]
pub struct HeedThreadMember(pub (u64, i64, u64));

impl From<(u64, i64, u64)> for HeedThreadMember {
    fn from(key: (u64, i64, u64)) -> Self {
        Self(key)
    }
}

impl<'a> BytesEncode<'a> for HeedThreadMember {
    type EItem = Self;

    fn bytes_encode(item: &'a Self::EItem) -> Result<Cow<'a, [u8]>, BoxedError> {
        let mut bytes = Vec::with_capacity(24);
        bytes.extend_from_slice(&item.0 .0.to_be_bytes());
        bytes.extend_from_slice(&encode_millis(item.0 .1).to_be_bytes());
        bytes.extend_from_slice(&item.0 .2.to_be_bytes());
        Ok(Cow::Owned(bytes))
    }
}

impl<'a> BytesDecode<'a> for HeedThreadMember {
    type DItem = HeedThreadMember;

    fn bytes_decode(bytes: &'a [u8]) -> Result<Self::DItem, BoxedError> {
        if bytes.len() != 24 {
            return Err(invalid_length("HeedThreadMember"));
        }
        let thread = u64::from_be_bytes(bytes[..8].try_into()?);
        let millis = decode_millis(u64::from_be_bytes(bytes[8..16].try_into()?));
        let event = u64::from_be_bytes(bytes[16..].try_into()?);
        Ok(Self((thread, millis, event)))
    }
}

#[derive(Debug)]
pub struct HeedTimestampUuid(pub (i64, Uuid));

impl From<(i64, Uuid)> for HeedTimestampUuid {
    fn from(key: (i64, Uuid)) -> Self {
        Self(key)
    }
}

impl<'a> BytesEncode<'a> for HeedTimestampUuid {
    type EItem = Self;

    fn bytes_encode(item: &'a Self::EItem) -> Result<Cow<'a, [u8]>, BoxedError> {
        let mut bytes = Vec::with_capacity(24);
        bytes.extend_from_slice(&encode_millis(item.0 .0).to_be_bytes());
        bytes.extend_from_slice(item.0 .1.as_bytes());
        Ok(Cow::Owned(bytes))
    }
}

impl<'a> BytesDecode<'a> for HeedTimestampUuid {
    type DItem = HeedTimestampUuid;

    fn bytes_decode(bytes: &'a [u8]) -> Result<Self::DItem, BoxedError> {
        if bytes.len() != 24 {
            return Err(invalid_length("HeedTimestampUuid"));
        }
        let millis = decode_millis(u64::from_be_bytes(bytes[..8].try_into()?));
        let uuid = Uuid::from_slice(&bytes[8..])?;
        Ok(HeedTimestampUuid((millis, uuid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_keys_sort_chronologically() {
        let keys = [(-5_000, 9), (-1, 1), (0, 3), (1_700_000_000_000, 2)];
        let encoded: Vec<Vec<u8>> = keys
            .iter()
            .map(|&key| {
                HeedTimestampId::bytes_encode(&HeedTimestampId(key))
                    .unwrap()
                    .into_owned()
            })
            .collect();

        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(sorted, encoded);

        let decoded = HeedTimestampId::bytes_decode(&encoded[0]).unwrap();
        assert_eq!(decoded.0, (-5_000, 9));
    }

    #[test]
    fn rejects_truncated_keys() {
        assert!(HeedThreadMember::bytes_decode(&[0u8; 16]).is_err());
        assert!(HeedIdPair::bytes_decode(&[0u8; 8]).is_err());
    }
}
