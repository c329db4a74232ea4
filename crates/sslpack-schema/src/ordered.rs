//! Order-preserving JSON objects.
//!
//! Makefile patches and extra environment variables are written as JSON
//! objects but applied in declaration order. A `HashMap` would lose that
//! order, so these fields are kept as `Vec<(String, String)>` and routed
//! through [`pairs`] with `#[serde(with = "ordered::pairs")]`.

/// Declaration-ordered list of key/value pairs.
pub type Pairs = Vec<(String, String)>;

/// Serde adapter mapping a JSON object onto [`Pairs`].
pub mod pairs {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    /// Serialize pairs as a JSON object, keeping their order.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(pairs: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(pairs.len()))?;
        for (key, value) in pairs {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    /// Deserialize a JSON object into pairs in document order.
    ///
    /// # Errors
    ///
    /// Fails if the input is not an object of strings.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<super::Pairs, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(PairsVisitor)
    }

    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = super::Pairs;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object of string values")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, String>()? {
                out.push((key, value));
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super::pairs")]
        patches: super::Pairs,
    }

    #[test]
    fn keeps_document_order() {
        let json = r#"{"patches":{"zeta":"1","alpha":"2","mid":"3"}}"#;
        let holder: Holder = serde_json::from_str(json).unwrap();
        let keys: Vec<&str> = holder.patches.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        assert_eq!(serde_json::to_string(&holder).unwrap(), json);
    }
}
