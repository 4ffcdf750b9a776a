//! Url-encoded form decoding into symbol values
//!
//! Keys follow the bracket convention: `tags[]=a&tags[]=b` builds a list,
//! `user[name]=x` builds a nested map. Plain keys are last-wins.

use ember_core::ScriptValue;
use std::collections::BTreeMap;

/// Decode url-encoded data into a map value
pub fn decode(data: &[u8]) -> ScriptValue {
    let mut fields: BTreeMap<String, ScriptValue> = BTreeMap::new();

    for (key, value) in form_urlencoded::parse(data) {
        if key.is_empty() {
            continue;
        }
        insert(&mut fields, &key, value.into_owned());
    }

    ScriptValue::Map(fields)
}

fn insert(fields: &mut BTreeMap<String, ScriptValue>, key: &str, value: String) {
    let Some((base, rest)) = split_bracket(key) else {
        fields.insert(key.to_string(), ScriptValue::Str(value));
        return;
    };

    let slot = fields
        .entry(base.to_string())
        .or_insert_with(|| ScriptValue::List(Vec::new()));

    if rest.is_empty() {
        match slot {
            ScriptValue::List(items) => items.push(ScriptValue::Str(value)),
            ScriptValue::Map(map) => {
                let index = map.len().to_string();
                map.insert(index, ScriptValue::Str(value));
            }
            other => *other = ScriptValue::List(vec![ScriptValue::Str(value)]),
        }
        return;
    }

    // Promote a list built by earlier `base[]` keys into an indexed map
    if let ScriptValue::List(items) = slot {
        let promoted = std::mem::take(items)
            .into_iter()
            .enumerate()
            .map(|(i, item)| (i.to_string(), item))
            .collect();
        *slot = ScriptValue::Map(promoted);
    } else if !matches!(slot, ScriptValue::Map(_)) {
        *slot = ScriptValue::empty_map();
    }

    if let ScriptValue::Map(map) = slot {
        map.insert(rest.to_string(), ScriptValue::Str(value));
    }
}

/// Split `base[inner]` into `(base, inner)`; anything else yields `None`
fn split_bracket(key: &str) -> Option<(&str, &str)> {
    let open = key.find('[')?;
    if open == 0 || !key.ends_with(']') {
        return None;
    }
    let inner = &key[open + 1..key.len() - 1];
    if inner.contains('[') || inner.contains(']') {
        return None;
    }
    Some((&key[..open], inner))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_at<'a>(value: &'a ScriptValue, key: &str) -> Option<&'a str> {
        value.get(key).and_then(ScriptValue::as_str)
    }

    #[test]
    fn test_plain_fields() {
        let decoded = decode(b"name=Ada+Lovelace&lang=en%2DGB");
        assert_eq!(str_at(&decoded, "name"), Some("Ada Lovelace"));
        assert_eq!(str_at(&decoded, "lang"), Some("en-GB"));
    }

    #[test]
    fn test_last_duplicate_wins() {
        let decoded = decode(b"a=1&a=2");
        assert_eq!(str_at(&decoded, "a"), Some("2"));
    }

    #[test]
    fn test_list_fields() {
        let decoded = decode(b"tags[]=x&tags[]=y");
        assert_eq!(
            decoded.get("tags"),
            Some(&ScriptValue::List(vec!["x".into(), "y".into()]))
        );
    }

    #[test]
    fn test_nested_fields() {
        let decoded = decode(b"user[name]=ada&user[role]=admin");
        let user = decoded.get("user").unwrap();
        assert_eq!(str_at(user, "name"), Some("ada"));
        assert_eq!(str_at(user, "role"), Some("admin"));
    }

    #[test]
    fn test_empty_and_malformed() {
        assert_eq!(decode(b""), ScriptValue::empty_map());

        let decoded = decode(b"=orphan&[x]=1&flag");
        assert!(decoded.get("").is_none());
        assert_eq!(str_at(&decoded, "[x]"), Some("1"));
        assert_eq!(str_at(&decoded, "flag"), Some(""));
    }
}
