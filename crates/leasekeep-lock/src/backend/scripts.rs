//! Lua scripts run atomically by the Redis backend.

/// Deletes KEYS[1] when its value equals ARGV[1]. Returns 1 on delete.
pub const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Sets the expiry of KEYS[1] to ARGV[2] milliseconds when its value equals
/// ARGV[1]. Returns 1 when the expiry was updated.
pub const COMPARE_AND_EXTEND: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;
