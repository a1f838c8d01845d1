// src/services/store.rs
use async_trait::async_trait;
use redis::Client;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing;

// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub redis_url: String,
    pub operation_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            operation_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Key holds a value of the wrong type: {0}")]
    WrongType(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::IoError => StoreError::Connection(err.to_string()),
            redis::ErrorKind::AuthenticationFailed => StoreError::Connection("Authentication failed".to_string()),
            _ => StoreError::Operation(err.to_string()),
        }
    }
}

/// A single write executed as part of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    HashIncrement { key: String, field: String, delta: i64 },
    HashIncrementFloat { key: String, field: String, delta: f64 },
    HashSet { key: String, field: String, value: String },
    ListPushFront { key: String, value: String },
    ListTrim { key: String, start: isize, stop: isize },
    /// Sets `key.field` to `sum_field / count_field` read from `source`, rounded to
    /// `places` decimals. Skipped when `key` does not exist or the count is not positive.
    HashSetMean {
        key: String,
        field: String,
        source: String,
        sum_field: String,
        count_field: String,
        places: u32,
    },
}

impl StoreOp {
    pub fn hash_increment(key: &str, field: &str, delta: i64) -> Self {
        StoreOp::HashIncrement { key: key.to_string(), field: field.to_string(), delta }
    }

    pub fn hash_increment_float(key: &str, field: &str, delta: f64) -> Self {
        StoreOp::HashIncrementFloat { key: key.to_string(), field: field.to_string(), delta }
    }

    pub fn hash_set(key: &str, field: &str, value: impl Into<String>) -> Self {
        StoreOp::HashSet { key: key.to_string(), field: field.to_string(), value: value.into() }
    }

    pub fn list_push_front(key: &str, value: impl Into<String>) -> Self {
        StoreOp::ListPushFront { key: key.to_string(), value: value.into() }
    }

    pub fn list_trim(key: &str, start: isize, stop: isize) -> Self {
        StoreOp::ListTrim { key: key.to_string(), start, stop }
    }

    pub fn hash_set_mean(key: &str, field: &str, source: &str, sum_field: &str, count_field: &str, places: u32) -> Self {
        StoreOp::HashSetMean {
            key: key.to_string(),
            field: field.to_string(),
            source: source.to_string(),
            sum_field: sum_field.to_string(),
            count_field: count_field.to_string(),
            places,
        }
    }

    /// The key this op writes to.
    fn key(&self) -> &str {
        match self {
            StoreOp::HashIncrement { key, .. }
            | StoreOp::HashIncrementFloat { key, .. }
            | StoreOp::HashSet { key, .. }
            | StoreOp::ListPushFront { key, .. }
            | StoreOp::ListTrim { key, .. }
            | StoreOp::HashSetMean { key, .. } => key,
        }
    }
}

// ------------------------------
// Traits
// ------------------------------

#[async_trait]
pub trait HashOperations: Send + Sync {
    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;
    async fn hash_increment_float(&self, key: &str, field: &str, delta: f64) -> Result<f64, StoreError>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hash_set_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    /// Writes `fields` only when `key` does not exist yet. Returns whether it wrote.
    async fn hash_create(&self, key: &str, fields: &[(String, String)]) -> Result<bool, StoreError>;
    /// Applies `updates` only when `field` currently equals `expected`. Returns whether it wrote.
    async fn hash_compare_and_set(
        &self,
        key: &str,
        field: &str,
        expected: &str,
        updates: &[(String, String)],
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ListOperations: Send + Sync {
    async fn list_push_front(&self, key: &str, value: &str) -> Result<usize, StoreError>;
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError>;
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait SetOperations: Send + Sync {
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait KeyOperations: Send + Sync {
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    /// Runs every op or none of them. Type and numeric checks happen before the
    /// first write, so a rejected batch leaves the store untouched.
    async fn execute_atomic(&self, ops: &[StoreOp]) -> Result<(), StoreError>;
}

pub trait KeyValueStore: HashOperations + ListOperations + SetOperations + KeyOperations {}

impl<T> KeyValueStore for T where T: HashOperations + ListOperations + SetOperations + KeyOperations {}

// Enum to wrap the store backends
pub enum Store {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl Store {
    pub async fn redis(config: StoreConfig) -> Result<Self, StoreError> {
        Ok(Store::Redis(RedisStore::new(config).await?))
    }

    pub fn memory() -> Self {
        Store::Memory(MemoryStore::new())
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Redis(_) => "redis",
            Store::Memory(_) => "memory",
        }
    }

    fn backend(&self) -> &dyn KeyValueStore {
        match self {
            Store::Redis(store) => store,
            Store::Memory(store) => store,
        }
    }
}

// Cache key generators for the marketplace layout
pub struct StoreKeys;

impl StoreKeys {
    pub fn driver(driver_id: &str) -> String {
        format!("driver:{}", driver_id)
    }

    pub fn driver_metrics(driver_id: &str) -> String {
        format!("driver:{}:metrics", driver_id)
    }

    pub fn driver_history(driver_id: &str) -> String {
        format!("driver:{}:history", driver_id)
    }

    pub fn request(request_id: &str) -> String {
        format!("request:{}", request_id)
    }

    pub fn active_drivers() -> &'static str {
        "active_drivers"
    }

    pub fn active_requests() -> &'static str {
        "active_requests"
    }

    pub fn dashboard_metrics() -> &'static str {
        "metrics"
    }
}

// ------------------------------
// Redis backend
// ------------------------------

const CREATE_IF_ABSENT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
";

const COMPARE_AND_SET_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 3))
return 1
";

// Batch layout: ARGV is a flat run of `op, key index, args...`; KEYS holds each touched key once.
// The first pass replays the batch against shadow copies and rejects it before anything is written.
const ATOMIC_BATCH_SCRIPT: &str = r"
local function decode(i)
    local op = ARGV[i]
    local key = KEYS[tonumber(ARGV[i + 1])]
    if op == 'LPUSH' then
        return op, key, { ARGV[i + 2] }, i + 3
    elseif op == 'HMEAN' then
        return op, key, { ARGV[i + 2], KEYS[tonumber(ARGV[i + 3])], ARGV[i + 4], ARGV[i + 5], ARGV[i + 6] }, i + 7
    end
    return op, key, { ARGV[i + 2], ARGV[i + 3] }, i + 4
end

local types = {}
local values = {}

local function key_type(key)
    if types[key] == nil then
        types[key] = redis.call('TYPE', key)['ok']
    end
    return types[key]
end

local function accepts(key, wanted)
    local kind = key_type(key)
    return kind == 'none' or kind == wanted
end

local function field_value(key, field)
    local id = key .. '\0' .. field
    if values[id] == nil then
        values[id] = redis.call('HGET', key, field)
    end
    return values[id]
end

local plan = {}
local i = 1
while i <= #ARGV do
    local op, key, args, next_i = decode(i)
    if op == 'HINCRBY' or op == 'HINCRBYFLOAT' or op == 'HSET' then
        if not accepts(key, 'hash') then
            return redis.error_reply('WRONGTYPE ' .. key)
        end
        local current = field_value(key, args[1])
        local id = key .. '\0' .. args[1]
        if op == 'HSET' then
            values[id] = args[2]
        elseif op == 'HINCRBY' then
            if current and not string.match(current, '^%-?%d+$') then
                return redis.error_reply('ERR hash value is not an integer: ' .. key .. ' ' .. args[1])
            end
            values[id] = tostring((tonumber(current) or 0) + tonumber(args[2]))
        else
            local base = tonumber(current or '0')
            local next_value = base and base + tonumber(args[2])
            if not next_value or next_value ~= next_value or next_value == math.huge or next_value == -math.huge then
                return redis.error_reply('ERR increment would produce NaN or Infinity: ' .. key .. ' ' .. args[1])
            end
            values[id] = tostring(next_value)
        end
        types[key] = 'hash'
    elseif op == 'LPUSH' or op == 'LTRIM' then
        if not accepts(key, 'list') then
            return redis.error_reply('WRONGTYPE ' .. key)
        end
        if op == 'LPUSH' then
            types[key] = 'list'
        end
    elseif op == 'HMEAN' then
        if not accepts(key, 'hash') or not accepts(args[2], 'hash') then
            return redis.error_reply('WRONGTYPE ' .. key)
        end
    else
        return redis.error_reply('ERR unknown batch op ' .. tostring(op))
    end
    plan[#plan + 1] = { op, key, args }
    i = next_i
end

for _, step in ipairs(plan) do
    local op, key, args = step[1], step[2], step[3]
    if op == 'HMEAN' then
        if redis.call('EXISTS', key) == 1 then
            local stats = redis.call('HMGET', args[2], args[3], args[4])
            local sum, count = tonumber(stats[1]), tonumber(stats[2])
            if sum and count and count > 0 then
                local factor = 10 ^ tonumber(args[5])
                local mean = math.floor(sum / count * factor + 0.5) / factor
                redis.call('HSET', key, args[1], string.format('%.' .. args[5] .. 'f', mean))
            end
        end
    elseif op == 'LPUSH' then
        redis.call('LPUSH', key, args[1])
    else
        redis.call(op, key, args[1], args[2])
    end
end
return #plan
";

/// Flattens a batch into the KEYS and ARGV of the atomic batch script.
fn encode_batch(ops: &[StoreOp]) -> (Vec<String>, Vec<String>) {
    // Lua indexes KEYS from 1
    fn index_of(key: &str, keys: &mut Vec<String>) -> String {
        let position = match keys.iter().position(|k| k == key) {
            Some(position) => position,
            None => {
                keys.push(key.to_string());
                keys.len() - 1
            }
        };
        (position + 1).to_string()
    }

    let mut keys: Vec<String> = Vec::new();
    let mut args = Vec::new();

    for op in ops {
        match op {
            StoreOp::HashIncrement { key, field, delta } => {
                args.extend(["HINCRBY".to_string(), index_of(key, &mut keys), field.clone(), delta.to_string()]);
            }
            StoreOp::HashIncrementFloat { key, field, delta } => {
                args.extend(["HINCRBYFLOAT".to_string(), index_of(key, &mut keys), field.clone(), delta.to_string()]);
            }
            StoreOp::HashSet { key, field, value } => {
                args.extend(["HSET".to_string(), index_of(key, &mut keys), field.clone(), value.clone()]);
            }
            StoreOp::ListPushFront { key, value } => {
                args.extend(["LPUSH".to_string(), index_of(key, &mut keys), value.clone()]);
            }
            StoreOp::ListTrim { key, start, stop } => {
                args.extend(["LTRIM".to_string(), index_of(key, &mut keys), start.to_string(), stop.to_string()]);
            }
            StoreOp::HashSetMean { key, field, source, sum_field, count_field, places } => {
                let key_index = index_of(key, &mut keys);
                let source_index = index_of(source, &mut keys);
                args.extend([
                    "HMEAN".to_string(),
                    key_index,
                    field.clone(),
                    source_index,
                    sum_field.clone(),
                    count_field.clone(),
                    places.to_string(),
                ]);
            }
        }
    }

    (keys, args)
}

pub struct RedisStore {
    connection: redis::aio::MultiplexedConnection,
    config: StoreConfig,
    create_if_absent: redis::Script,
    compare_and_set: redis::Script,
    atomic_batch: redis::Script,
}

impl RedisStore {
    pub async fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.redis_url.clone())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let connection = match tokio::time::timeout(
            config.operation_timeout,
            client.get_multiplexed_tokio_connection(),
        )
        .await
        {
            Ok(connection) => connection.map_err(|e| StoreError::Connection(e.to_string()))?,
            Err(_) => return Err(StoreError::Timeout(config.operation_timeout)),
        };

        tracing::info!("Redis store connected: {}", config.redis_url);

        Ok(Self {
            connection,
            config,
            create_if_absent: redis::Script::new(CREATE_IF_ABSENT_SCRIPT),
            compare_and_set: redis::Script::new(COMPARE_AND_SET_SCRIPT),
            atomic_batch: redis::Script::new(ATOMIC_BATCH_SCRIPT),
        })
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => {
                tracing::warn!("Redis {} timed out after {:?}", operation, self.config.operation_timeout);
                Err(StoreError::Timeout(self.config.operation_timeout))
            }
        }
    }
}

#[async_trait]
impl HashOperations for RedisStore {
    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        self.timed("HINCRBY", async move {
            redis::cmd("HINCRBY").arg(key).arg(field).arg(delta).query_async(&mut conn).await
        })
        .await
    }

    async fn hash_increment_float(&self, key: &str, field: &str, delta: f64) -> Result<f64, StoreError> {
        let mut conn = self.connection.clone();
        self.timed("HINCRBYFLOAT", async move {
            redis::cmd("HINCRBYFLOAT").arg(key).arg(field).arg(delta).query_async(&mut conn).await
        })
        .await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.timed("HSET", async move {
            redis::cmd("HSET").arg(key).arg(field).arg(value).query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn hash_set_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }

        self.timed("HSET", async move { cmd.query_async::<_, ()>(&mut conn).await }).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.connection.clone();
        self.timed("HGETALL", async move {
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn hash_create(&self, key: &str, fields: &[(String, String)]) -> Result<bool, StoreError> {
        if fields.is_empty() {
            return Err(StoreError::Operation("hash_create requires at least one field".to_string()));
        }

        let mut conn = self.connection.clone();
        let mut invocation = self.create_if_absent.prepare_invoke();
        invocation.key(key);
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }

        let written: i64 = self
            .timed("EVALSHA create_if_absent", async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(written == 1)
    }

    async fn hash_compare_and_set(
        &self,
        key: &str,
        field: &str,
        expected: &str,
        updates: &[(String, String)],
    ) -> Result<bool, StoreError> {
        if updates.is_empty() {
            return Err(StoreError::Operation("hash_compare_and_set requires at least one update".to_string()));
        }

        let mut conn = self.connection.clone();
        let mut invocation = self.compare_and_set.prepare_invoke();
        invocation.key(key).arg(field).arg(expected);
        for (update_field, value) in updates {
            invocation.arg(update_field).arg(value);
        }

        let written: i64 = self
            .timed("EVALSHA compare_and_set", async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(written == 1)
    }
}

#[async_trait]
impl ListOperations for RedisStore {
    async fn list_push_front(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut conn = self.connection.clone();
        self.timed("LPUSH", async move {
            redis::cmd("LPUSH").arg(key).arg(value).query_async(&mut conn).await
        })
        .await
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.timed("LTRIM", async move {
            redis::cmd("LTRIM").arg(key).arg(start).arg(stop).query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        self.timed("LRANGE", async move {
            redis::cmd("LRANGE").arg(key).arg(start).arg(stop).query_async(&mut conn).await
        })
        .await
    }
}

#[async_trait]
impl SetOperations for RedisStore {
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.timed("SADD", async move {
            redis::cmd("SADD").arg(key).arg(member).query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.timed("SREM", async move {
            redis::cmd("SREM").arg(key).arg(member).query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        self.timed("SMEMBERS", async move {
            redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await
        })
        .await
    }
}

#[async_trait]
impl KeyOperations for RedisStore {
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.timed("DEL", async move {
            redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        self.timed("EXISTS", async move {
            redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn execute_atomic(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let (keys, args) = encode_batch(ops);
        let mut conn = self.connection.clone();
        let mut invocation = self.atomic_batch.prepare_invoke();
        for key in &keys {
            invocation.key(key);
        }
        for arg in &args {
            invocation.arg(arg);
        }

        let applied: i64 = self
            .timed("EVALSHA atomic_batch", async move { invocation.invoke_async(&mut conn).await })
            .await?;
        tracing::debug!("Atomic batch applied {} ops across {} keys", applied, keys.len());
        Ok(())
    }
}

// ------------------------------
// Memory backend for development/testing
// ------------------------------

#[derive(Debug, Clone)]
enum Entry {
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Set(HashSet<String>),
}

impl Entry {
    fn is_empty(&self) -> bool {
        match self {
            Entry::Hash(map) => map.is_empty(),
            Entry::List(list) => list.is_empty(),
            Entry::Set(set) => set.is_empty(),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn hash_mut<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Result<&'a mut HashMap<String, String>, StoreError> {
    match data.entry(key.to_string()).or_insert_with(|| Entry::Hash(HashMap::new())) {
        Entry::Hash(map) => Ok(map),
        _ => Err(StoreError::WrongType(key.to_string())),
    }
}

fn list_mut<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Result<&'a mut VecDeque<String>, StoreError> {
    match data.entry(key.to_string()).or_insert_with(|| Entry::List(VecDeque::new())) {
        Entry::List(list) => Ok(list),
        _ => Err(StoreError::WrongType(key.to_string())),
    }
}

fn set_mut<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Result<&'a mut HashSet<String>, StoreError> {
    match data.entry(key.to_string()).or_insert_with(|| Entry::Set(HashSet::new())) {
        Entry::Set(set) => Ok(set),
        _ => Err(StoreError::WrongType(key.to_string())),
    }
}

// Redis drops keys whose collection became empty
fn prune(data: &mut HashMap<String, Entry>, key: &str) {
    if data.get(key).is_some_and(Entry::is_empty) {
        data.remove(key);
    }
}

/// Resolves Redis-style inclusive indices (negative counts from the end).
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

fn increment_int(data: &mut HashMap<String, Entry>, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
    let hash = hash_mut(data, key)?;
    let current = match hash.get(field) {
        Some(value) => value
            .parse::<i64>()
            .map_err(|_| StoreError::Operation(format!("hash value is not an integer: {} {}", key, field)))?,
        None => 0,
    };
    let next = current + delta;
    hash.insert(field.to_string(), next.to_string());
    Ok(next)
}

fn increment_float(data: &mut HashMap<String, Entry>, key: &str, field: &str, delta: f64) -> Result<f64, StoreError> {
    let hash = hash_mut(data, key)?;
    let current = match hash.get(field) {
        Some(value) => value
            .parse::<f64>()
            .map_err(|_| StoreError::Operation(format!("hash value is not a float: {} {}", key, field)))?,
        None => 0.0,
    };
    let next = current + delta;
    if !next.is_finite() {
        return Err(StoreError::Operation("increment would produce NaN or Infinity".to_string()));
    }
    hash.insert(field.to_string(), next.to_string());
    Ok(next)
}

fn trim_list(data: &mut HashMap<String, Entry>, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
    if !data.contains_key(key) {
        return Ok(());
    }

    let list = list_mut(data, key)?;
    match resolve_range(list.len(), start, stop) {
        Some((from, to)) => {
            list.truncate(to + 1);
            list.drain(..from);
        }
        None => list.clear(),
    }
    Ok(())
}

fn read_hash<'a>(data: &'a HashMap<String, Entry>, key: &str) -> Result<Option<&'a HashMap<String, String>>, StoreError> {
    match data.get(key) {
        Some(Entry::Hash(map)) => Ok(Some(map)),
        Some(_) => Err(StoreError::WrongType(key.to_string())),
        None => Ok(None),
    }
}

fn set_mean(
    data: &mut HashMap<String, Entry>,
    key: &str,
    field: &str,
    source: &str,
    (sum_field, count_field): (&str, &str),
    places: u32,
) -> Result<(), StoreError> {
    if read_hash(data, key)?.is_none() {
        return Ok(());
    }

    let stats = read_hash(data, source)?;
    let number = |name: &str| stats.and_then(|map| map.get(name)).and_then(|v| v.parse::<f64>().ok());
    let (sum, count) = match (number(sum_field), number(count_field)) {
        (Some(sum), Some(count)) if count > 0.0 => (sum, count),
        _ => return Ok(()),
    };

    let factor = 10f64.powi(places as i32);
    let mean = (sum / count * factor).round() / factor;
    hash_mut(data, key)?.insert(field.to_string(), format!("{:.*}", places as usize, mean));
    Ok(())
}

fn apply_op(data: &mut HashMap<String, Entry>, op: &StoreOp) -> Result<(), StoreError> {
    match op {
        StoreOp::HashIncrement { key, field, delta } => increment_int(data, key, field, *delta).map(|_| ()),
        StoreOp::HashIncrementFloat { key, field, delta } => increment_float(data, key, field, *delta).map(|_| ()),
        StoreOp::HashSet { key, field, value } => {
            hash_mut(data, key)?.insert(field.clone(), value.clone());
            Ok(())
        }
        StoreOp::ListPushFront { key, value } => {
            list_mut(data, key)?.push_front(value.clone());
            Ok(())
        }
        StoreOp::ListTrim { key, start, stop } => trim_list(data, key, *start, *stop),
        StoreOp::HashSetMean { key, field, source, sum_field, count_field, places } => {
            set_mean(data, key, field, source, (sum_field, count_field), *places)
        }
    }
}

#[async_trait]
impl HashOperations for MemoryStore {
    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut data = self.data.write().await;
        let result = increment_int(&mut data, key, field, delta);
        prune(&mut data, key);
        result
    }

    async fn hash_increment_float(&self, key: &str, field: &str, delta: f64) -> Result<f64, StoreError> {
        let mut data = self.data.write().await;
        let result = increment_float(&mut data, key, field, delta);
        prune(&mut data, key);
        result
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        hash_mut(&mut data, key)?.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_set_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let hash = hash_mut(&mut data, key)?;
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        prune(&mut data, key);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(Entry::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_create(&self, key: &str, fields: &[(String, String)]) -> Result<bool, StoreError> {
        if fields.is_empty() {
            return Err(StoreError::Operation("hash_create requires at least one field".to_string()));
        }

        let mut data = self.data.write().await;
        if data.contains_key(key) {
            return Ok(false);
        }

        data.insert(key.to_string(), Entry::Hash(fields.iter().cloned().collect()));
        Ok(true)
    }

    async fn hash_compare_and_set(
        &self,
        key: &str,
        field: &str,
        expected: &str,
        updates: &[(String, String)],
    ) -> Result<bool, StoreError> {
        if updates.is_empty() {
            return Err(StoreError::Operation("hash_compare_and_set requires at least one update".to_string()));
        }

        let mut data = self.data.write().await;
        let hash = match data.get_mut(key) {
            Some(Entry::Hash(map)) => map,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
            None => return Ok(false),
        };

        if hash.get(field).map(String::as_str) != Some(expected) {
            return Ok(false);
        }

        for (update_field, value) in updates {
            hash.insert(update_field.clone(), value.clone());
        }
        Ok(true)
    }
}

#[async_trait]
impl ListOperations for MemoryStore {
    async fn list_push_front(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        let list = list_mut(&mut data, key)?;
        list.push_front(value.to_string());
        Ok(list.len())
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        trim_list(&mut data, key, start, stop)?;
        prune(&mut data, key);
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(Entry::List(list)) => Ok(match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl SetOperations for MemoryStore {
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        set_mut(&mut data, key)?.insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        if !data.contains_key(key) {
            return Ok(());
        }
        set_mut(&mut data, key)?.remove(member);
        prune(&mut data, key);
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl KeyOperations for MemoryStore {
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }

    async fn execute_atomic(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        let mut data = self.data.write().await;

        // Snapshot every touched key so a failed op leaves nothing behind
        let mut snapshot: HashMap<String, Option<Entry>> = HashMap::new();
        for op in ops {
            snapshot
                .entry(op.key().to_string())
                .or_insert_with(|| data.get(op.key()).cloned());
        }

        for op in ops {
            if let Err(err) = apply_op(&mut data, op) {
                for (key, previous) in snapshot {
                    match previous {
                        Some(entry) => data.insert(key, entry),
                        None => data.remove(&key),
                    };
                }
                return Err(err);
            }
        }

        for key in snapshot.keys() {
            prune(&mut data, key);
        }
        Ok(())
    }
}

// ------------------------------
// Enum delegations (Store)
// ------------------------------

#[async_trait]
impl HashOperations for Store {
    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.backend().hash_increment(key, field, delta).await
    }

    async fn hash_increment_float(&self, key: &str, field: &str, delta: f64) -> Result<f64, StoreError> {
        self.backend().hash_increment_float(key, field, delta).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.backend().hash_set(key, field, value).await
    }

    async fn hash_set_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        self.backend().hash_set_multiple(key, fields).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.backend().hash_get_all(key).await
    }

    async fn hash_create(&self, key: &str, fields: &[(String, String)]) -> Result<bool, StoreError> {
        self.backend().hash_create(key, fields).await
    }

    async fn hash_compare_and_set(
        &self,
        key: &str,
        field: &str,
        expected: &str,
        updates: &[(String, String)],
    ) -> Result<bool, StoreError> {
        self.backend().hash_compare_and_set(key, field, expected, updates).await
    }
}

#[async_trait]
impl ListOperations for Store {
    async fn list_push_front(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        self.backend().list_push_front(key, value).await
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        self.backend().list_trim(key, start, stop).await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        self.backend().list_range(key, start, stop).await
    }
}

#[async_trait]
impl SetOperations for Store {
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.backend().set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.backend().set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.backend().set_members(key).await
    }
}

#[async_trait]
impl KeyOperations for Store {
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.backend().delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.backend().exists(key).await
    }

    async fn execute_atomic(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        self.backend().execute_atomic(ops).await
    }
}
