//! Lua scripts for the Redis ticket store.
//!
//! Each ticket is a HASH (`version`, `type`, `principal`, `created`,
//! `expires`, `payload`) plus a member of a sorted-set index scored by
//! creation time. Scripts keep the hash and the index in step and make the
//! version check and the write a single atomic step, which is what makes
//! single-use consumption safe across nodes.
//!
//! Versions start at 1, so a script returning 0 always means "not applied".

/// Insert or overwrite a ticket.
///
/// Arguments:
/// - KEYS[1]: Ticket hash key (e.g., `cas:ticket:{key}`)
/// - KEYS[2]: Index key (e.g., `cas:tickets`)
/// - ARGV[1]: Index member (the ticket key)
/// - ARGV[2]: Ticket type prefix
/// - ARGV[3]: Principal digest, or empty
/// - ARGV[4]: Creation time, epoch millis
/// - ARGV[5]: Eviction time, epoch millis, or 0 for none
/// - ARGV[6]: Payload
///
/// Returns:
/// - The new version
pub const PUT_TICKET: &str = r#"
local version = redis.call('HINCRBY', KEYS[1], 'version', 1)
redis.call('HSET', KEYS[1],
    'type', ARGV[2],
    'principal', ARGV[3],
    'created', ARGV[4],
    'expires', ARGV[5],
    'payload', ARGV[6])

local expires = tonumber(ARGV[5])
if expires ~= nil and expires > 0 then
    redis.call('PEXPIREAT', KEYS[1], expires)
else
    redis.call('PERSIST', KEYS[1])
end

redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
return version
"#;

/// Overwrite a ticket only if its version is unchanged.
///
/// Arguments:
/// - KEYS[1], KEYS[2]: As for [`PUT_TICKET`]
/// - ARGV[1]: Expected version
/// - ARGV[2..7]: As ARGV[1..6] of [`PUT_TICKET`]
///
/// Returns:
/// - The new version on success
/// - 0: Missing ticket or version mismatch
pub const COMPARE_AND_SWAP_TICKET: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if current == false or tonumber(current) ~= tonumber(ARGV[1]) then
    return 0
end

local version = redis.call('HINCRBY', KEYS[1], 'version', 1)
redis.call('HSET', KEYS[1],
    'type', ARGV[3],
    'principal', ARGV[4],
    'created', ARGV[5],
    'expires', ARGV[6],
    'payload', ARGV[7])

local expires = tonumber(ARGV[6])
if expires ~= nil and expires > 0 then
    redis.call('PEXPIREAT', KEYS[1], expires)
end

redis.call('ZADD', KEYS[2], ARGV[5], ARGV[2])
return version
"#;

/// Remove a ticket only if its version is unchanged.
///
/// Arguments:
/// - KEYS[1]: Ticket hash key
/// - KEYS[2]: Index key
/// - ARGV[1]: Expected version
/// - ARGV[2]: Index member
///
/// Returns:
/// - 1: Removed
/// - 0: Missing ticket or version mismatch
pub const COMPARE_AND_REMOVE_TICKET: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if current == false or tonumber(current) ~= tonumber(ARGV[1]) then
    return 0
end

redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[2])
return 1
"#;

/// Remove a ticket unconditionally.
///
/// Arguments:
/// - KEYS[1]: Ticket hash key
/// - KEYS[2]: Index key
/// - ARGV[1]: Index member
///
/// Returns:
/// - 1: Removed
/// - 0: Not present
pub const REMOVE_TICKET: &str = r#"
local removed = redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return removed
"#;

/// Remove every indexed ticket and the index itself.
///
/// Arguments:
/// - KEYS[1]: Index key
/// - ARGV[1]: Ticket hash key prefix (e.g., `cas:ticket:`)
///
/// Returns:
/// - Number of ticket hashes removed
pub const REMOVE_ALL_TICKETS: &str = r#"
local members = redis.call('ZRANGE', KEYS[1], 0, -1)
local removed = 0
for _, member in ipairs(members) do
    removed = removed + redis.call('DEL', ARGV[1] .. member)
end
redis.call('DEL', KEYS[1])
return removed
"#;
