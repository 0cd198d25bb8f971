// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;

use ward_model::LlmGateway;
use ward_sandbox::VisionOracle;

/// Adapts the LLM gateway to the sandbox's narrow vision seam.  The sandbox
/// only ever sees this trait object, never the gateway.
pub struct GatewayVisionOracle {
    gateway: Arc<LlmGateway>,
}

impl GatewayVisionOracle {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl VisionOracle for GatewayVisionOracle {
    async fn analyze(&self, prompt: &str, images: Vec<String>) -> Result<String, String> {
        self.gateway
            .vision(prompt, images)
            .await
            .map_err(|e| e.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
