#![forbid(unsafe_code)]

use std::collections::BTreeMap;

/// A job submission: named attributes holding either one string or an ordered list of strings.
///
/// Both maps are key-ordered so that every traversal (fingerprinting, template building)
/// observes the same sequence regardless of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobRequest {
    attributes: BTreeMap<String, String>,
    vector_attributes: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestError {
    EmptyName,
    AlreadyVector(String),
    AlreadyScalar(String),
}

impl RequestError {
    pub fn message(&self) -> String {
        match self {
            Self::EmptyName => "attribute name must not be empty".to_string(),
            Self::AlreadyVector(name) => {
                format!("attribute {name} is already set as a vector attribute")
            }
            Self::AlreadyScalar(name) => {
                format!("attribute {name} is already set as a single-valued attribute")
            }
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for RequestError {}

impl JobRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a single-valued attribute, replacing any previous value under the same name.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), RequestError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RequestError::EmptyName);
        }
        if self.vector_attributes.contains_key(&name) {
            return Err(RequestError::AlreadyVector(name));
        }
        self.attributes.insert(name, value.into());
        Ok(())
    }

    /// Sets a multi-valued attribute. The order of `values` is significant.
    pub fn set_vector<I, S>(&mut self, name: impl Into<String>, values: I) -> Result<(), RequestError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(RequestError::EmptyName);
        }
        if self.attributes.contains_key(&name) {
            return Err(RequestError::AlreadyScalar(name));
        }
        self.vector_attributes
            .insert(name, values.into_iter().map(Into::into).collect());
        Ok(())
    }

    pub fn with(mut self, name: &str, value: &str) -> Result<Self, RequestError> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn with_vector(mut self, name: &str, values: &[&str]) -> Result<Self, RequestError> {
        self.set_vector(name, values.iter().copied())?;
        Ok(self)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn vector_attributes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.vector_attributes
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.vector_attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_name_shared_between_maps() {
        let mut request = JobRequest::new();
        request.set("drmaa_v_argv", "x").expect("scalar");
        assert_eq!(
            request.set_vector("drmaa_v_argv", ["a"]).unwrap_err(),
            RequestError::AlreadyScalar("drmaa_v_argv".to_string())
        );

        let mut request = JobRequest::new();
        request.set_vector("drmaa_v_env", ["A=1"]).expect("vector");
        assert_eq!(
            request.set("drmaa_v_env", "A=1").unwrap_err(),
            RequestError::AlreadyVector("drmaa_v_env".to_string())
        );
    }

    #[test]
    fn rejects_empty_name() {
        assert_eq!(
            JobRequest::new().set("", "x").unwrap_err(),
            RequestError::EmptyName
        );
    }

    #[test]
    fn later_set_replaces_value() {
        let request = JobRequest::new()
            .with("drmaa_remote_command", "/bin/false")
            .and_then(|r| r.with("drmaa_remote_command", "/bin/true"))
            .expect("request");
        assert_eq!(
            request.attributes().get("drmaa_remote_command").map(String::as_str),
            Some("/bin/true")
        );
    }
}
