use crate::body::encode_form;
use crate::charset::Charset;
use crate::error::InvokeError;

/// Ordered list of form parameters
///
/// By default adding a name that is already present replaces the value of
/// its first occurrence in place. Passing `keep_duplicates = true` appends
/// instead, so a name can carry several values.
///
/// # Example
///
/// ```ignore
/// let mut form = WebForm::new();
/// form.add_param("user", "alice")?
///     .add_param_with("tag", "a", true)?
///     .add_param_with("tag", "b", true)?;
///
/// let request = RequestBuilder::post(url).body_form(form.build())?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebForm {
    params: Vec<(String, String)>,
}

impl WebForm {
    /// Create an empty form
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, replacing the first existing value of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] if `name` is empty.
    pub fn add_param(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Self, InvokeError> {
        self.add_param_with(name, value, false)
    }

    /// Add a parameter, appending when `keep_duplicates` is set.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] if `name` is empty.
    pub fn add_param_with(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        keep_duplicates: bool,
    ) -> Result<&mut Self, InvokeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvokeError::usage("Parameter name cannot be empty"));
        }
        let value = value.into();

        if !keep_duplicates
            && let Some(existing) = self.params.iter_mut().find(|(n, _)| *n == name)
        {
            existing.1 = value;
            return Ok(self);
        }

        self.params.push((name, value));
        Ok(self)
    }

    /// Add every pair from `params`, replacing existing names.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] on the first empty name; pairs before
    /// it have already been added.
    pub fn add_params<I, K, V>(&mut self, params: I) -> Result<&mut Self, InvokeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.add_params_with(params, false)
    }

    /// Add every pair from `params` with the given duplicate mode.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] on the first empty name.
    pub fn add_params_with<I, K, V>(
        &mut self,
        params: I,
        keep_duplicates: bool,
    ) -> Result<&mut Self, InvokeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in params {
            self.add_param_with(name, value, keep_duplicates)?;
        }
        Ok(self)
    }

    /// All values recorded for `name`, in insertion order
    #[must_use]
    pub fn get_param(&self, name: &str) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Remove all parameters.
    pub fn clear(&mut self) -> &mut Self {
        self.params.clear();
        self
    }

    /// Snapshot of the parameters in order
    #[must_use]
    pub fn build(&self) -> Vec<(String, String)> {
        self.params.clone()
    }

    /// URL-encode the parameters in `charset`
    #[must_use]
    pub fn encode(&self, charset: Charset) -> Vec<u8> {
        encode_form(&self.params, charset)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn owned(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_duplicate_modes() {
        let mut form = WebForm::new();
        form.add_param_with("dup", "v1", true)
            .unwrap()
            .add_param_with("dup", "v2", true)
            .unwrap()
            .add_param("nodup", "v1")
            .unwrap()
            .add_param("nodup", "v2")
            .unwrap();

        assert_eq!(
            form.build(),
            owned(&[("dup", "v1"), ("dup", "v2"), ("nodup", "v2")])
        );
        assert_eq!(form.get_param("dup"), vec!["v1", "v2"]);
        assert_eq!(form.get_param("nodup"), vec!["v2"]);
        assert!(form.get_param("missing").is_empty());
    }

    #[test]
    fn test_replacement_keeps_position() {
        let mut form = WebForm::new();
        form.add_param("a", "1").unwrap();
        form.add_param("b", "2").unwrap();
        form.add_param("a", "3").unwrap();

        assert_eq!(form.build(), owned(&[("a", "3"), ("b", "2")]));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut form = WebForm::new();
        let err = form.add_param("", "x").unwrap_err();
        assert!(matches!(err, InvokeError::Usage(_)));
        assert!(form.is_empty());
    }

    #[test]
    fn test_add_params_and_clear() {
        let mut params = BTreeMap::new();
        params.insert("x", "1");
        params.insert("y", "2");

        let mut form = WebForm::new();
        form.add_params(params).unwrap();
        assert_eq!(form.len(), 2);

        form.add_params(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(form.len(), 2);

        form.add_params_with([("x", "3")], true).unwrap();
        assert_eq!(form.get_param("x"), vec!["1", "3"]);

        form.clear();
        assert!(form.is_empty());
    }

    #[test]
    fn test_encode() {
        let mut form = WebForm::new();
        form.add_param("a", "1").unwrap().add_param("b", "2").unwrap();
        assert_eq!(form.encode(Charset::Iso8859_1), b"a=1&b=2");
    }
}
