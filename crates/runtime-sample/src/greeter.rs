//! Request/response operations.

use async_trait::async_trait;
use component_runtime::{
    BoxError, Component, ComponentInfo, ComponentType, Context, Envelope, Operation,
    OperationResult,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SampleError;

#[derive(Debug, Deserialize)]
pub struct GreetRequest {
    pub name: String,
    #[serde(default)]
    pub excited: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct GreetResponse {
    pub greeting: String,
}

/// `greet`: `{"name": "Ada"}` → `{"greeting": "Hello, Ada."}`
pub struct Greeter {
    info: ComponentInfo,
}

impl Greeter {
    pub const ID: &'static str = "greet";

    pub fn new() -> Self {
        Self {
            info: ComponentInfo::new(Self::ID, "Greeter", ComponentType::Operation)
                .with_metadata("input", "{name: string, excited?: bool}"),
        }
    }

    fn greet(request: GreetRequest) -> Result<GreetResponse, SampleError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(SampleError::BlankName);
        }
        let end = if request.excited { '!' } else { '.' };
        Ok(GreetResponse {
            greeting: format!("Hello, {name}{end}"),
        })
    }
}

impl Default for Greeter {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for Greeter {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }
}

#[async_trait]
impl Operation for Greeter {
    async fn execute(&self, _ctx: &Context, input: Envelope) -> Result<OperationResult, BoxError> {
        debug!(?input, "greet called");
        let request: GreetRequest = serde_json::from_value(input.data).map_err(SampleError::from)?;
        let response = Self::greet(request)?;
        let data = serde_json::to_value(response)?;
        Ok(Envelope::new(data)
            .with_metadata("operation", Self::ID)
            .into())
    }
}

/// `echo`: returns the input envelope unchanged.
pub struct Echo {
    info: ComponentInfo,
}

impl Echo {
    pub const ID: &'static str = "echo";

    pub fn new() -> Self {
        Self {
            info: ComponentInfo::new(Self::ID, "Echo", ComponentType::Operation),
        }
    }
}

impl Default for Echo {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for Echo {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }
}

#[async_trait]
impl Operation for Echo {
    async fn execute(&self, _ctx: &Context, input: Envelope) -> Result<OperationResult, BoxError> {
        Ok(input.into())
    }
}
