use std::collections::BTreeMap;

/// The proxy environment materialized into a ProxyDef's ConfigMap.
///
/// Each value is exported under both its upper-case and lower-case variable
/// name, since tools disagree on which spelling they honor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyEnv {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

impl ProxyEnv {
    pub const VARIABLES: [&'static str; 6] = [
        "HTTP_PROXY",
        "http_proxy",
        "HTTPS_PROXY",
        "https_proxy",
        "NO_PROXY",
        "no_proxy",
    ];

    /// Builds the environment from the optional proxy settings. Unset
    /// settings are exported as empty values so that the variable set is
    /// always complete.
    pub fn new(
        http_proxy: Option<&str>,
        https_proxy: Option<&str>,
        no_proxy: Option<&str>,
    ) -> Self {
        Self {
            http_proxy: http_proxy.unwrap_or_default().to_string(),
            https_proxy: https_proxy.unwrap_or_default().to_string(),
            no_proxy: no_proxy.unwrap_or_default().to_string(),
        }
    }

    pub fn into_data(self) -> BTreeMap<String, String> {
        let Self {
            http_proxy,
            https_proxy,
            no_proxy,
        } = self;

        [
            ("HTTP_PROXY", http_proxy.clone()),
            ("http_proxy", http_proxy),
            ("HTTPS_PROXY", https_proxy.clone()),
            ("https_proxy", https_proxy),
            ("NO_PROXY", no_proxy.clone()),
            ("no_proxy", no_proxy),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exports_both_spellings() {
        let data = ProxyEnv::new(
            Some("http://proxy:8080"),
            Some("http://proxy:8443"),
            Some("localhost,.svc"),
        )
        .into_data();

        let expected = [
            ("HTTPS_PROXY", "http://proxy:8443"),
            ("HTTP_PROXY", "http://proxy:8080"),
            ("NO_PROXY", "localhost,.svc"),
            ("http_proxy", "http://proxy:8080"),
            ("https_proxy", "http://proxy:8443"),
            ("no_proxy", "localhost,.svc"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>();
        assert_eq!(data, expected);
    }

    #[test]
    fn unset_values_are_empty() {
        let data = ProxyEnv::new(Some("http://proxy:8080"), None, None).into_data();
        let mut keys = data.keys().map(String::as_str).collect::<Vec<_>>();
        keys.sort_unstable();
        let mut expected = ProxyEnv::VARIABLES.to_vec();
        expected.sort_unstable();
        assert_eq!(keys, expected);
        assert_eq!(data["https_proxy"], "");
        assert_eq!(data["NO_PROXY"], "");
    }
}
