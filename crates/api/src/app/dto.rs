use serde::Deserialize;

use botlnek_core::{Domain, Source, StringMap};

/// Body of `POST /domains`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DomainRequest {
    pub key: String,
    #[serde(default)]
    pub attrs: StringMap,
}

impl From<DomainRequest> for Domain {
    fn from(body: DomainRequest) -> Self {
        Domain::new(body.key, body.attrs)
    }
}

/// Body of `POST /aggregates/:domain/:aggregate/:token`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceRequest {
    #[serde(default)]
    pub keys: StringMap,
    #[serde(default)]
    pub attrs: StringMap,
}

impl From<SourceRequest> for Source {
    fn from(body: SourceRequest) -> Self {
        Source::new(body.keys, body.attrs)
    }
}
