use serde::Deserialize;
use serde::Deserializer;

/// Lists can be given either as a sequence, which is what config files
/// produce, or as one comma separated string, which is what environment
/// variables produce.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

impl StringOrVec {
    fn into_items(self) -> Vec<String> {
        match self {
            StringOrVec::Vec(items) => items,
            StringOrVec::String(s) => s.split(',').map(|item| item.trim().to_string()).collect(),
        }
    }
}

/// A deserializer for the url::Url type. This will return an empty [`Vec`] if
/// there are no URLs to deserialize.
pub fn url_deserializer_vec<'de, D>(deserializer: D) -> Result<Vec<url::Url>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut v = Vec::new();
    for s in StringOrVec::deserialize(deserializer)?.into_items() {
        if s.is_empty() {
            continue;
        }
        v.push(s.parse().map_err(serde::de::Error::custom)?);
    }
    Ok(v)
}

/// A deserializer for the url::Url type. Does not support deserializing a list,
/// only a single URL.
pub fn url_deserializer_single<'de, D>(deserializer: D) -> Result<url::Url, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer)?
        .parse()
        .map_err(serde::de::Error::custom)
}

/// A deserializer for the std::time::Duration type.
/// Serde includes a default deserializer, but it expects a struct.
pub fn duration_seconds_deserializer<'de, D>(
    deserializer: D,
) -> Result<std::time::Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(std::time::Duration::from_secs(
        u64::deserialize(deserializer).map_err(serde::de::Error::custom)?,
    ))
}

/// A deserializer for the std::time::Duration type.
/// Serde includes a default deserializer, but it expects a struct.
pub fn duration_milliseconds_deserializer<'de, D>(
    deserializer: D,
) -> Result<std::time::Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(std::time::Duration::from_millis(
        u64::deserialize(deserializer).map_err(serde::de::Error::custom)?,
    ))
}
