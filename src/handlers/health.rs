use std::sync::Arc;

use serde_json::json;

use crate::error::ToolError;
use crate::protocol::NoParams;
use crate::registry::{typed, RegistryError, ToolDescriptor, ToolRegistry};

use super::ToolContext;

pub fn register(registry: &mut ToolRegistry, ctx: &Arc<ToolContext>) -> Result<(), RegistryError> {
    let c = Arc::clone(ctx);
    registry.register(
        ToolDescriptor::new(
            "health",
            "Liveness check",
            json!({ "type": "object", "properties": {} }),
        ),
        typed("health", move |_: NoParams| {
            let c = Arc::clone(&c);
            async move {
                let initialized = c.session.is_initialized().await;
                Ok::<_, ToolError>(json!({ "status": "ok", "vm_initialized": initialized }))
            }
        }),
    )
}
