use crate::bridge::error::BridgeError;
use crate::domain::resource::ResourceType;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct BridgeResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default = "Vec::new")]
    pub errors: Vec<BridgeApiError>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeApiError {
    pub description: String,
}

/// Fetches all resources of a type. Raw JSON objects are returned as-is; the
/// store keeps them schemaless so unmodeled fields survive merges.
pub async fn get_resources(client: &Client, base_url: &str, rtype: ResourceType) -> Result<Vec<Value>, BridgeError> {
    let url = format!("{}/clip/v2/resource/{}", base_url, rtype.as_str());
    let response = client.get(&url).send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(response_error(status, &body));
    }

    let parsed = serde_json::from_str::<BridgeResponse<Value>>(&body)?;
    if let Some(error) = parsed.errors.first() {
        return Err(BridgeError::Api {
            status: status.as_u16(),
            description: error.description.clone(),
        });
    }

    debug!("Fetched {} {} resource(s)", parsed.data.len(), rtype);
    Ok(parsed.data)
}

/// Fetches a single resource by id. A 404 maps to `None`, since resources can
/// vanish between an event referencing them and the follow-up fetch.
pub async fn get_resource(client: &Client, base_url: &str, rtype: ResourceType, id: &str) -> Result<Option<Value>, BridgeError> {
    let url = format!("{}/clip/v2/resource/{}/{}", base_url, rtype.as_str(), id);
    let response = client.get(&url).send().await?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    let body = response.text().await?;
    if !status.is_success() {
        return Err(response_error(status, &body));
    }

    let parsed = serde_json::from_str::<BridgeResponse<Value>>(&body)?;
    Ok(parsed.data.into_iter().next())
}

/// Writes a partial resource update.
pub async fn put_resource(client: &Client, base_url: &str, rtype: ResourceType, id: &str, payload: &Value) -> Result<(), BridgeError> {
    let url = format!("{}/clip/v2/resource/{}/{}", base_url, rtype.as_str(), id);
    let response = client.put(&url).json(payload).send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(response_error(status, &body));
    }

    if let Ok(parsed) = serde_json::from_str::<BridgeResponse<Value>>(&body)
        && let Some(error) = parsed.errors.first()
    {
        return Err(BridgeError::Api {
            status: status.as_u16(),
            description: error.description.clone(),
        });
    }
    Ok(())
}

fn response_error(status: StatusCode, body: &str) -> BridgeError {
    let description = serde_json::from_str::<BridgeResponse<Value>>(body)
        .ok()
        .and_then(|response| response.errors.into_iter().next())
        .map(|error| error.description)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    BridgeError::Api {
        status: status.as_u16(),
        description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn get_resources_returns_the_data_array() -> Result<(), BridgeError> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/clip/v2/resource/light")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{ "errors": [], "data": [{ "id": "l1", "type": "light" }] }"#)
            .create_async()
            .await;

        let resources = get_resources(&Client::new(), &server.url(), ResourceType::Light).await?;

        mock.assert();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0]["id"], "l1");
        Ok(())
    }

    #[tokio::test]
    async fn get_resources_surfaces_the_vendor_error_description() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/clip/v2/resource/light")
            .with_status(403)
            .with_body(r#"{ "errors": [{ "description": "unauthorized user" }], "data": [] }"#)
            .create_async()
            .await;

        let result = get_resources(&Client::new(), &server.url(), ResourceType::Light).await;

        match result {
            Err(BridgeError::Api { status, description }) => {
                assert_eq!(status, 403);
                assert_eq!(description, "unauthorized user");
            }
            other => panic!("expected an API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn get_resource_maps_a_missing_resource_to_none() -> Result<(), BridgeError> {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/clip/v2/resource/device/gone")
            .with_status(404)
            .create_async()
            .await;

        let resource = get_resource(&Client::new(), &server.url(), ResourceType::Device, "gone").await?;

        assert_eq!(resource, None);
        Ok(())
    }

    #[tokio::test]
    async fn put_resource_sends_the_payload_as_json() -> Result<(), BridgeError> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/clip/v2/resource/light/l1")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(serde_json::json!({ "on": { "on": true } })))
            .with_status(200)
            .with_body(r#"{ "errors": [], "data": [] }"#)
            .create_async()
            .await;

        let payload = serde_json::json!({ "on": { "on": true } });
        put_resource(&Client::new(), &server.url(), ResourceType::Light, "l1", &payload).await?;

        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn put_resource_fails_on_an_error_entry_despite_http_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/clip/v2/resource/light/l1")
            .with_status(207)
            .with_body(r#"{ "errors": [{ "description": "device is unreachable" }], "data": [] }"#)
            .create_async()
            .await;

        let payload = serde_json::json!({ "on": { "on": false } });
        let result = put_resource(&Client::new(), &server.url(), ResourceType::Light, "l1", &payload).await;

        assert!(matches!(result, Err(BridgeError::Api { description, .. }) if description == "device is unreachable"));
    }
}
