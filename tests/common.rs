use std::sync::Arc;
use viaduct_engine::flags::Flag;
use viaduct_engine::flags::StaticFlagManager;
use viaduct_engine::registry::ResolverRegistry;
use viaduct_engine::ViaductEngine;

pub fn engine(sdl: &str, registry: ResolverRegistry) -> ViaductEngine {
    ViaductEngine::builder()
        .schema_sdl(sdl)
        .registry(registry)
        .build()
        .expect("engine builds")
}

/// An engine with re-entrant subquery execution switched on.
pub fn engine_with_subqueries(sdl: &str, registry: ResolverRegistry) -> ViaductEngine {
    ViaductEngine::builder()
        .schema_sdl(sdl)
        .registry(registry)
        .flag_manager(Arc::new(
            StaticFlagManager::new().enable(Flag::EnableSubqueryExecutionViaHandle),
        ))
        .build()
        .expect("engine builds")
}
