// src/storage/scripts.rs

// KEYS[1] = counter key, ARGV[1] = increment, ARGV[2] = window in ms.
// The expiry is only set by the call that created the key.
pub(crate) const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local count = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
local ret = redis.call("incrby", key, ARGV[1])
if ret == count then
    if ttl > 0 then
        redis.call("pexpire", key, ARGV[2])
    end
    return {ret, ttl}
end
ttl = redis.call("pttl", key)
return {ret, ttl}
"#;

// KEYS[1] = counter key. Replies {0, 0} for an absent key.
pub(crate) const PEEK_SCRIPT: &str = r#"
local key = KEYS[1]
local v = redis.call("get", key)
if v == false then
    return {0, 0}
end
local ttl = redis.call("pttl", key)
return {tonumber(v), ttl}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScriptKind {
    Increment,
    Peek,
}

impl ScriptKind {
    pub(crate) fn source(self) -> &'static str {
        match self {
            ScriptKind::Increment => INCREMENT_SCRIPT,
            ScriptKind::Peek => PEEK_SCRIPT,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            ScriptKind::Increment => "incr",
            ScriptKind::Peek => "peek",
        }
    }
}

/// Server-assigned identifiers of both scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScriptIds {
    pub(crate) increment: String,
    pub(crate) peek: String,
}

impl ScriptIds {
    fn get(&self, kind: ScriptKind) -> &str {
        match kind {
            ScriptKind::Increment => &self.increment,
            ScriptKind::Peek => &self.peek,
        }
    }
}

#[derive(Debug)]
enum ScriptState {
    Unloaded,
    Ready(ScriptIds),
}

/// Per-store cache of script identifiers.
///
/// `generation` grows with every successful load. A caller that hit NOSCRIPT
/// remembers the generation it evaluated under; if the cache has moved past it
/// by the time the caller holds the write lock, another caller already
/// reloaded and the reload is skipped.
#[derive(Debug)]
pub(crate) struct ScriptCache {
    state: ScriptState,
    generation: u64,
}

impl ScriptCache {
    pub(crate) fn new() -> Self {
        Self {
            state: ScriptState::Unloaded,
            generation: 0,
        }
    }

    /// Identifier for `kind` and the generation it belongs to.
    pub(crate) fn lookup(&self, kind: ScriptKind) -> Option<(String, u64)> {
        match &self.state {
            ScriptState::Ready(ids) => Some((ids.get(kind).to_string(), self.generation)),
            ScriptState::Unloaded => None,
        }
    }

    /// Whether a load is needed, given the generation a failing caller saw
    /// (`None` when the caller found the cache empty).
    pub(crate) fn needs_load(&self, stale: Option<u64>) -> bool {
        match (&self.state, stale) {
            (ScriptState::Unloaded, _) => true,
            (ScriptState::Ready(_), Some(generation)) => generation == self.generation,
            (ScriptState::Ready(_), None) => false,
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.state = ScriptState::Unloaded;
    }

    pub(crate) fn install(&mut self, ids: ScriptIds) {
        self.state = ScriptState::Ready(ids);
        self.generation += 1;
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}
