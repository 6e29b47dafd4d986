//! Loading of upstream API descriptions.
//!
//! A location starting with `http://` or `https://` is fetched over the
//! network (GET for OpenAPI documents and overlays, POST with the standard
//! introspection query for GraphQL endpoints); anything else is read from the
//! local filesystem. OpenAPI documents may be JSON or YAML; overlays and
//! introspection results are JSON.

use futures::future::try_join_all;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::debug;

use crate::errors::SpecError;
use crate::graphql::introspection::{INTROSPECTION_QUERY, IntrospectionSchema};

pub mod dereference;
pub mod overlay;

pub use dereference::dereference;

pub struct SpecLoader<'a> {
    client: &'a reqwest::Client,
    headers: &'a HeaderMap,
}

impl<'a> SpecLoader<'a> {
    pub fn new(client: &'a reqwest::Client, headers: &'a HeaderMap) -> Self {
        Self { client, headers }
    }

    /// Load an OpenAPI document, apply overlays in order, and resolve every
    /// internal `$ref`.
    pub async fn load_openapi(
        &self,
        primary: &str,
        overlays: &[String],
    ) -> Result<Value, SpecError> {
        let text = self.fetch(primary).await?;
        let mut doc = parse_document(&text)
            .map_err(|e| SpecError::Parse(format!("OpenAPI document {primary}: {e}")))?;
        // Overlays fetch concurrently but apply strictly in list order
        let overlay_texts =
            try_join_all(overlays.iter().map(|location| self.fetch(location))).await?;
        for (location, overlay_text) in overlays.iter().zip(overlay_texts) {
            debug!(%location, "Applying overlay");
            let overlay_doc: Value = serde_json::from_str(&overlay_text)
                .map_err(|e| SpecError::Parse(format!("overlay {location}: {e}")))?;
            let entries = overlay::parse_overlay(overlay_doc)?;
            overlay::apply(&mut doc, &entries);
        }
        dereference(&doc)
    }

    /// Load a GraphQL introspection result, either by introspecting a live
    /// endpoint or by reading a saved introspection JSON file.
    pub async fn load_introspection(
        &self,
        location: &str,
    ) -> Result<IntrospectionSchema, SpecError> {
        let body: Value = if is_remote(location) {
            self.client
                .post(location)
                .headers(self.headers.clone())
                .json(&serde_json::json!({ "query": INTROSPECTION_QUERY }))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?
        } else {
            let text = self.read_file(location).await?;
            serde_json::from_str(&text)
                .map_err(|e| SpecError::Parse(format!("introspection {location}: {e}")))?
        };
        parse_introspection(body)
    }

    async fn fetch(&self, location: &str) -> Result<String, SpecError> {
        if is_remote(location) {
            Ok(self
                .client
                .get(location)
                .headers(self.headers.clone())
                .send()
                .await?
                .error_for_status()
                .map_err(|e| {
                    if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
                        SpecError::NotFound(location.to_string())
                    } else {
                        SpecError::Fetch(e)
                    }
                })?
                .text()
                .await?)
        } else {
            self.read_file(location).await
        }
    }

    async fn read_file(&self, location: &str) -> Result<String, SpecError> {
        tokio::fs::read_to_string(location)
            .await
            .map_err(|e| SpecError::NotFound(format!("{location}: {e}")))
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// JSON first, then YAML.
fn parse_document(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).or_else(|json_error| {
        serde_yml::from_str(text).map_err(|yaml_error| {
            format!("not parseable as JSON ({json_error}) nor as YAML ({yaml_error})")
        })
    })
}

/// Accepts both a full GraphQL response envelope and a bare `__schema` object.
fn parse_introspection(mut body: Value) -> Result<IntrospectionSchema, SpecError> {
    let path = if body.pointer("/data/__schema").is_some() {
        "/data/__schema"
    } else {
        "/__schema"
    };
    let schema = body
        .pointer_mut(path)
        .map(Value::take)
        .ok_or_else(|| SpecError::Invalid("introspection result has no __schema".into()))?;
    serde_json::from_value(schema)
        .map_err(|e| SpecError::Parse(format!("introspection schema: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_json_and_yaml_documents() {
        assert_eq!(
            parse_document(r#"{"openapi": "3.0.0"}"#).unwrap(),
            json!({"openapi": "3.0.0"})
        );
        assert_eq!(
            parse_document("openapi: 3.0.0\ninfo:\n  title: Pets\n").unwrap(),
            json!({"openapi": "3.0.0", "info": {"title": "Pets"}})
        );
        assert!(parse_document(": not: [valid").is_err());
    }

    #[test]
    fn introspection_envelope_variants() {
        let envelope = json!({"data": {"__schema": {"types": []}}});
        assert!(parse_introspection(envelope).is_ok());

        let bare = json!({"__schema": {"types": []}});
        assert!(parse_introspection(bare).is_ok());

        assert!(matches!(
            parse_introspection(json!({"data": null})),
            Err(SpecError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn overlay_applies_over_fetched_document() {
        let mut server = mockito::Server::new_async().await;
        let spec = server
            .mock("GET", "/openapi.json")
            .with_status(200)
            .with_body(
                json!({"paths": {"/pets": {"get": {"operationId": "listPets"}}}}).to_string(),
            )
            .create_async()
            .await;
        let overlay = server
            .mock("GET", "/overlay.json")
            .with_status(200)
            .with_body(
                json!([{"target": "paths./pets.get", "update": {"x-mcp": {"name": "pets_list"}}}])
                    .to_string(),
            )
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let headers = HeaderMap::new();
        let loader = SpecLoader::new(&client, &headers);
        let doc = loader
            .load_openapi(
                &format!("{}/openapi.json", server.url()),
                &[format!("{}/overlay.json", server.url())],
            )
            .await
            .unwrap();

        spec.assert_async().await;
        overlay.assert_async().await;
        assert_eq!(
            doc.pointer("/paths/~1pets/get/x-mcp/name"),
            Some(&json!("pets_list"))
        );
    }

    #[tokio::test]
    async fn missing_remote_spec_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/openapi.json")
            .with_status(404)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let headers = HeaderMap::new();
        let loader = SpecLoader::new(&client, &headers);
        let result = loader
            .load_openapi(&format!("{}/openapi.json", server.url()), &[])
            .await;
        assert!(matches!(result, Err(SpecError::NotFound(_))));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let client = reqwest::Client::new();
        let headers = HeaderMap::new();
        let loader = SpecLoader::new(&client, &headers);
        let result = loader.load_openapi("/no/such/spec.json", &[]).await;
        assert!(matches!(result, Err(SpecError::NotFound(_))));
    }
}
