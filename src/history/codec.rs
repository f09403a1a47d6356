use super::error::Result;
use super::{HistoryItem, HistoryMeta};

/// Outcome of reading one record from storage.
///
/// Lenient callers collapse `Absent` and `Corrupt` into the default value;
/// strict callers can tell them apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<T> {
    Present(T),
    Absent,
    Corrupt(String),
}

impl<T: Default> Loaded<T> {
    pub fn into_lenient(self) -> T {
        match self {
            Loaded::Present(v) => v,
            Loaded::Absent | Loaded::Corrupt(_) => T::default(),
        }
    }
}

impl<T> Loaded<T> {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Loaded::Corrupt(_))
    }
}

pub fn encode_meta(meta: &HistoryMeta) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(meta)?)
}

pub fn decode_meta(raw: &[u8]) -> Loaded<HistoryMeta> {
    match serde_json::from_slice(raw) {
        Ok(meta) => Loaded::Present(meta),
        Err(e) => Loaded::Corrupt(e.to_string()),
    }
}

pub fn encode_chunk(items: &[HistoryItem], level: i32) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(items)?;
    Ok(zstd::encode_all(json.as_slice(), level)?)
}

/// Decompress and parse a chunk. Falls back to reading the bytes as plain
/// JSON, which is how chunks written before compression are stored.
pub fn decode_chunk(raw: &[u8]) -> Loaded<Vec<HistoryItem>> {
    let compressed = zstd::decode_all(raw)
        .map_err(|e| e.to_string())
        .and_then(|json| serde_json::from_slice(&json).map_err(|e| e.to_string()));

    match compressed {
        Ok(items) => Loaded::Present(items),
        Err(decode_err) => match serde_json::from_slice(raw) {
            Ok(items) => Loaded::Present(items),
            Err(plain_err) => Loaded::Corrupt(format!("{decode_err}; as plain json: {plain_err}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str, t: i64) -> HistoryItem {
        HistoryItem { url: url.to_string(), t }
    }

    #[test]
    fn test_chunk_is_compressed() {
        let items = vec![item("https://pve.lan:8006", 10); 50];
        let encoded = encode_chunk(&items, 0).unwrap();
        let json = serde_json::to_vec(&items).unwrap();

        assert!(encoded.len() < json.len());
        assert_eq!(decode_chunk(&encoded), Loaded::Present(items));
    }

    #[test]
    fn test_plain_json_chunk_fallback() {
        let raw = br#"[{"url":"http://grafana.lan","t":42}]"#;
        assert_eq!(
            decode_chunk(raw),
            Loaded::Present(vec![item("http://grafana.lan", 42)])
        );
    }

    #[test]
    fn test_garbage_chunk_is_corrupt() {
        let loaded = decode_chunk(b"\x00\x01not a chunk");
        assert!(loaded.is_corrupt());
        assert!(loaded.into_lenient().is_empty());
    }

    #[test]
    fn test_meta_roundtrip_and_corrupt() {
        assert!(decode_meta(b"{capacities").is_corrupt());

        let meta = HistoryMeta { capacities: vec![0, 999] };
        let raw = encode_meta(&meta).unwrap();
        assert_eq!(raw, br#"{"capacities":[0,999]}"#.to_vec());
        assert_eq!(decode_meta(&raw), Loaded::Present(meta));
    }
}
