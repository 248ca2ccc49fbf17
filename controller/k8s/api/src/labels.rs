use std::{collections::BTreeMap, fmt};

pub type Map = BTreeMap<String, String>;

/// The label selecting a redirect's generated resources by redirect name.
pub const REDIRECT: &str = "redirect";

/// The label mirroring a ShortLink's alias.
pub const SHORTLINK: &str = "shortlink";

/// An equality-based label selector, as used on list queries.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Selector(Map);

/// Returns the labels for selecting the resources belonging to the given
/// redirect name.
pub fn for_redirect(name: &str) -> Map {
    let mut labels = Map::new();
    labels.insert("app".to_string(), crate::APP_LABEL_VALUE.to_string());
    labels.insert(REDIRECT.to_string(), name.to_string());
    labels
}

// === impl Selector ===

impl Selector {
    pub fn from_map(map: Map) -> Self {
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true when every `key=value` pair in the selector is present in
    /// `labels`. An empty selector matches everything.
    pub fn matches(&self, labels: Option<&Map>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

impl From<Map> for Selector {
    #[inline]
    fn from(map: Map) -> Self {
        Self(map)
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Formats the selector in the `k=v,k2=v2` form the API server accepts.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn test_matches() {
        let labels = |pairs: &[(&str, &str)]| -> Map {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };

        for (selector, labels, matches, msg) in &[
            (Selector::default(), None, true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Some(labels(&[("foo", "bar")])),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Some(labels(&[("foo", "bar"), ("bah", "baz")])),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                Some(labels(&[("foo", "bar")])),
                false,
                "missing label",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Some(labels(&[("foo", "qux")])),
                false,
                "value mismatch",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                None,
                false,
                "unlabeled object",
            ),
        ] {
            assert_eq!(selector.matches(labels.as_ref()), *matches, "{}", msg);
        }
    }

    #[test]
    fn redirect_labels() {
        let selector = Selector::from(for_redirect("old-site"));
        assert_eq!(selector.to_string(), "app=urlshortener,redirect=old-site");
    }
}
