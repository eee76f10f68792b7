//! Job-data payload codec.
//!
//! A job's structured parameters travel as one JSON string under
//! [`JOB_DATA_KEY`] in the scheduler's parameter map. Other keys belong to job
//! authors and are never read or written here.

use std::collections::BTreeMap;

use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

pub const JOB_DATA_KEY: &str = "JobData";

/// Scheduler parameter map handed to a job at fire time.
pub type JobDataMap = BTreeMap<String, String>;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode the payload under [`JOB_DATA_KEY`]. `None` when absent or blank.
pub fn decode<T: DeserializeOwned>(map: &JobDataMap) -> Result<Option<T>> {
    match raw_json(map) {
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|source| Error::Decode { source }),
        None => Ok(None),
    }
}

/// The stored payload without decoding.
#[must_use]
pub fn raw_json(map: &JobDataMap) -> Option<&str> {
    map.get(JOB_DATA_KEY)
        .map(String::as_str)
        .filter(|raw| !raw.trim().is_empty())
}

/// Encode `value` and store it under [`JOB_DATA_KEY`], replacing any previous payload.
pub fn insert<T: Serialize + ?Sized>(map: &mut JobDataMap, value: &T) -> Result<()> {
    map.insert(JOB_DATA_KEY.to_string(), encode(value)?);
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        serde::{Deserialize, Serialize},
    };

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Params {
        url: String,
        retries: u32,
    }

    #[test]
    fn test_insert_then_decode() {
        let mut map = JobDataMap::new();
        let params = Params {
            url: "https://example.com".into(),
            retries: 3,
        };
        insert(&mut map, &params).unwrap();
        assert_eq!(decode::<Params>(&map).unwrap(), Some(params));
    }

    #[test]
    fn test_absent_or_blank_is_none() {
        let mut map = JobDataMap::new();
        assert_eq!(decode::<Params>(&map).unwrap(), None);
        map.insert(JOB_DATA_KEY.into(), "  ".into());
        assert_eq!(decode::<Params>(&map).unwrap(), None);
        assert!(raw_json(&map).is_none());
    }

    #[test]
    fn test_wrong_shape_is_decode_error() {
        let mut map = JobDataMap::new();
        map.insert(JOB_DATA_KEY.into(), r#"{"url": 5}"#.into());
        assert!(matches!(decode::<Params>(&map), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_other_keys_untouched() {
        let mut map = JobDataMap::new();
        map.insert("retries".into(), "not json".into());
        insert(&mut map, &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(map.get("retries").map(String::as_str), Some("not json"));
        assert_eq!(raw_json(&map), Some(r#"{"a":1}"#));
    }
}
