use mlua::{Function, Lua, RegistryKey};

/// Identity of a Lua function value (raw equality, not value equality).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionIdentity(usize);

impl FunctionIdentity {
    pub fn of(func: &Function) -> Self {
        Self(func.to_pointer() as usize)
    }
}

/// A function value held in the Lua registry so the collector cannot reclaim it.
///
/// Acquired once on registration and released by value, so a pin can never be
/// dropped from the registry twice. The identity stays valid for as long as the
/// pin is held because Lua never moves live objects.
#[derive(Debug)]
pub struct PinnedFunction {
    key: RegistryKey,
    identity: FunctionIdentity,
}

impl PinnedFunction {
    pub fn pin(lua: &Lua, func: Function) -> mlua::Result<Self> {
        let identity = FunctionIdentity::of(&func);
        let key = lua.create_registry_value(func)?;
        Ok(Self { key, identity })
    }

    pub fn identity(&self) -> FunctionIdentity {
        self.identity
    }

    pub fn matches(&self, func: &Function) -> bool {
        self.identity == FunctionIdentity::of(func)
    }

    /// Fetch the pinned function from the registry of `lua`
    pub fn function(&self, lua: &Lua) -> mlua::Result<Function> {
        lua.registry_value(&self.key)
    }

    /// Unpin the function. `lua` must be the state the pin was created in.
    pub fn release(self, lua: &Lua) -> mlua::Result<()> {
        lua.remove_registry_value(self.key)
    }
}
