//! Signed service-discovery envelope.
//!
//! Clients fetch every handler's static parameters in one signed response;
//! the caller-supplied nonce binds the envelope to the request.

use crate::api::{ChainSignature, InfoRequest, InfoResponse};
use crate::chain::ChainRegistry;
use crate::error::ServiceError;
use crate::swaps::{SwapHandler, SwapHandlerInfo};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Serialize)]
struct Envelope {
    nonce: String,
    services: HashMap<String, SwapHandlerInfo>,
}

/// `POST /info` handler.
pub struct InfoHandler {
    registry: Arc<ChainRegistry>,
    handlers: Vec<Arc<dyn SwapHandler>>,
}

impl InfoHandler {
    pub fn new(registry: Arc<ChainRegistry>, handlers: Vec<Arc<dyn SwapHandler>>) -> Self {
        Self { registry, handlers }
    }

    pub async fn get_info(
        &self,
        request: InfoRequest,
    ) -> std::result::Result<InfoResponse, ServiceError> {
        if request.nonce.len() > 64 || !request.nonce.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ServiceError::invalid_request("Invalid nonce"));
        }

        let services = self
            .handlers
            .iter()
            .map(|handler| (handler.name().to_string(), handler.get_info()))
            .collect();
        let envelope = serde_json::to_string(&Envelope {
            nonce: request.nonce,
            services,
        })
        .map_err(|e| ServiceError::from(crate::error::Error::from(e)))?;

        let mut chains = HashMap::new();
        for chain_id in self.registry.chain_ids() {
            let contract = self
                .registry
                .contract(chain_id)
                .map_err(ServiceError::from)?;
            let signature = contract
                .sign_message(envelope.as_bytes())
                .await
                .map_err(ServiceError::from)?;
            chains.insert(
                chain_id.clone(),
                ChainSignature {
                    address: contract.get_address(),
                    signature,
                },
            );
        }

        let default = chains
            .get(self.registry.default_chain())
            .cloned()
            .ok_or_else(ServiceError::internal)?;

        Ok(InfoResponse {
            envelope,
            address: default.address,
            signature: default.signature,
            chains,
        })
    }
}
