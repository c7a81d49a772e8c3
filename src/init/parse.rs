// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Deserializer};
use std::error::Error;
use tower::BoxError;

/// Parse a single key-value pair
pub(crate) fn parse_key_val<T, U>(s: &str) -> Result<(T, U), BoxError>
where
    T: std::str::FromStr,
    T::Err: Error + Send + Sync + 'static,
    U: std::str::FromStr,
    U::Err: Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

/// Strips one pair of surrounding double quotes, if present.
pub(crate) fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(s)
}

// Durations may be given as humantime strings ("200ms", "5s") or as a bare
// number of seconds, so numeric environment overrides also work.
fn duration_from_value<E: serde::de::Error>(value: serde_json::Value) -> Result<std::time::Duration, E> {
    match value {
        serde_json::Value::String(s) => humantime::parse_duration(s.trim())
            .map_err(|e| E::custom(format!("invalid duration `{}`: {}", s, e))),
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(std::time::Duration::from_secs)
            .ok_or_else(|| E::custom(format!("invalid duration: {}", n))),
        _ => Err(E::custom("unexpected value for duration parameter")),
    }
}

pub(crate) mod humantime_duration {
    use super::*;
    use std::time::Duration;

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        duration_from_value(value)
    }
}

pub(crate) mod humantime_duration_opt {
    use super::*;
    use std::time::Duration;

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => duration_from_value(v).map(Some),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[derive(Deserialize)]
    struct Durations {
        #[serde(with = "humantime_duration")]
        a: Duration,
        #[serde(default, with = "humantime_duration_opt")]
        b: Option<Duration>,
    }

    #[test]
    fn key_val() {
        let (k, v) = parse_key_val::<String, String>("app=web=1").unwrap();
        assert_eq!("app", k);
        assert_eq!("web=1", v);
        assert!(parse_key_val::<String, String>("novalue").is_err());
    }

    #[test]
    fn unquotes() {
        assert_eq!("GET", unquote("\"GET\""));
        assert_eq!("GET", unquote("GET"));
        assert_eq!("\"GET", unquote("\"GET"));
    }

    #[test]
    fn durations() {
        let d: Durations = serde_json::from_str(r#"{"a": "200ms", "b": "5s"}"#).unwrap();
        assert_eq!(Duration::from_millis(200), d.a);
        assert_eq!(Some(Duration::from_secs(5)), d.b);

        let d: Durations = serde_json::from_str(r#"{"a": 3}"#).unwrap();
        assert_eq!(Duration::from_secs(3), d.a);
        assert_eq!(None, d.b);

        assert!(serde_json::from_str::<Durations>(r#"{"a": "soon"}"#).is_err());
    }
}
