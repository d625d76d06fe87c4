// src/lua.rs - Lua scripts for atomic operations
use redis::Script;

/// Server-side scripts. Each push or pull is exactly one script run, so the
/// store serializes them against every other producer and sweeper.
pub struct LuaScripts {
    pub push: Script,
    pub pull: Script,
}

impl LuaScripts {
    pub fn new() -> Self {
        Self {
            push: Script::new(include_str!("./lua/push.lua")),
            pull: Script::new(include_str!("./lua/pull.lua")),
        }
    }
}

impl Default for LuaScripts {
    fn default() -> Self {
        Self::new()
    }
}
