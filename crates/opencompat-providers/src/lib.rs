pub mod chatgpt;
pub mod copilot;
pub mod http;

use opencompat_provider_core::Registry;

/// Register every built-in provider type with the registry.
pub fn register_all(registry: &mut Registry) {
    registry.register_meta(chatgpt::meta());
    registry.register_meta(copilot::meta());
}
