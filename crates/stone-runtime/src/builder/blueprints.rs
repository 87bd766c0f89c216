//! Fixed configuration fragments.

use super::setup::builtin_pipes;
use serde_json::{json, Value};
use stone_core::DEFAULT_PRIORITY;

/// Base layer, merged under everything else.
#[must_use]
pub fn setup_blueprint() -> Value {
    json!({
        "stone": {
            "env": "production",
            "name": null,
            "debug": false,
            "logger": null,
            "builder": {
                "middleware": [],
                "defaultMiddlewarePriority": DEFAULT_PRIORITY,
            },
            "adapter": {},
        }
    })
}

/// Kernel defaults plus the builtin setup middleware, contributed by
/// `stone_app`.
#[must_use]
pub fn initialization_blueprint() -> Value {
    json!({
        "stone": {
            "builder": {
                "middleware": builtin_pipes(),
            },
            "kernel": {
                "handler": null,
                "middleware": {
                    "skip": false,
                    "incoming": [],
                    "outgoing": [],
                    "terminate": [],
                    "defaultPriority": DEFAULT_PRIORITY,
                },
                "aliases": {},
                "services": [],
                "listeners": {},
                "providers": [],
                "subscribers": [],
                "errorHandler": null,
            }
        }
    })
}

/// Adapter defaults under `stone.adapter.<name>`, contributed by `adapter`.
#[must_use]
pub fn integration_blueprint(name: &str) -> Value {
    let mut adapters = serde_json::Map::new();
    adapters.insert(
        name.to_string(),
        json!({
            "alias": null,
            "type": null,
            "middleware": { "incoming": [], "outgoing": [] },
            "default": true,
            "current": false,
            "preferred": false,
            "hooks": { "onInit": [], "beforeHandle": [], "onTerminate": [] },
            "errorHandler": null,
            "handlerFactory": null,
        }),
    );
    json!({ "stone": { "adapter": adapters } })
}
