use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Value, json};

use crate::sanitize::{Credentials, ImageFormat};
use crate::transport::{Transport, next_id};

/// The viewport clip region of one capture.
#[derive(Debug, Clone, Copy)]
pub struct Clip {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// An attached CDP page session.
pub struct Page {
    transport: Arc<Transport>,
    session_id: String,
    target_id: String,
}

impl Page {
    /// Creates a blank target and attaches a flat session to it.
    pub(crate) async fn new(transport: Arc<Transport>) -> Result<Self> {
        let res = transport
            .send(json!({
                "id": next_id(),
                "method": "Target.createTarget",
                "params": { "url": "about:blank" }
            }))
            .await?;
        let target_id = res["targetId"]
            .as_str()
            .context("No targetId")?
            .to_string();

        let res = transport
            .send(json!({
                "id": next_id(),
                "method": "Target.attachToTarget",
                "params": { "targetId": target_id, "flatten": true }
            }))
            .await?;
        let session_id = res["sessionId"]
            .as_str()
            .context("No sessionId")?
            .to_string();

        Ok(Self {
            transport,
            session_id,
            target_id,
        })
    }

    /// Sends a command scoped to this page's session.
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.transport
            .send(json!({
                "id": next_id(),
                "method": method,
                "params": params,
                "sessionId": self.session_id
            }))
            .await
    }

    /// Overrides the page viewport dimensions.
    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.send(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false
            }),
        )
        .await?;
        Ok(())
    }

    /// Attaches a Basic `Authorization` header to every request from this
    /// page, so credentialed sites can be captured without an interactive
    /// auth challenge.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        self.send("Network.enable", json!({})).await?;
        let token = BASE64.encode(format!(
            "{}:{}",
            credentials.username, credentials.password
        ));
        self.send(
            "Network.setExtraHTTPHeaders",
            json!({ "headers": { "Authorization": format!("Basic {token}") } }),
        )
        .await?;
        Ok(())
    }

    /// Navigates the page to the given URL.
    pub async fn goto(&self, url: &str) -> Result<()> {
        let res = self.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(err) = res["errorText"].as_str()
            && !err.is_empty()
        {
            anyhow::bail!("navigation to {url} failed: {err}");
        }
        Ok(())
    }

    /// Captures the clipped region and writes the encoded image to `path`.
    pub async fn screenshot(&self, clip: Clip, format: ImageFormat, path: &Path) -> Result<()> {
        let mut params = json!({
            "format": format.as_str(),
            "clip": {
                "x": clip.x,
                "y": clip.y,
                "width": clip.width,
                "height": clip.height,
                "scale": 1.0
            },
            "fromSurface": true,
            "captureBeyondViewport": true,
        });
        if format != ImageFormat::Png {
            params["quality"] = json!(90);
        }

        let res = self.send("Page.captureScreenshot", params).await?;
        let data = res["data"].as_str().context("No image data received")?;
        let bytes = BASE64.decode(data)?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("failed to write \"{}\"", path.display()))?;
        Ok(())
    }

    /// Closes the target tab.
    pub async fn close(&self) -> Result<()> {
        self.transport
            .send(json!({
                "id": next_id(),
                "method": "Target.closeTarget",
                "params": { "targetId": self.target_id }
            }))
            .await?;
        Ok(())
    }
}
